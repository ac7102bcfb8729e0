//! 账号注册后台的控制台客户端：任务启停、验证码轮询、账号列表。

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod accounts;
pub mod dashboard;
pub mod error;
pub mod events;
pub mod gateway;
pub mod model;
pub mod notice;
pub mod scheduler;
pub mod setting;
pub mod status;
pub mod task;
pub mod tools;
pub mod verification;

#[cfg(test)]
mod testing;

pub use dashboard::Dashboard;
pub use error::{DashboardError, DashboardResult};
pub use events::{DashboardEvent, EventReceiver};
pub use gateway::{Backend, HttpGateway};
pub use scheduler::View;
pub use setting::Settings;

/// 锁被污染时继续使用里面的数据，状态本身总是完整替换的
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
