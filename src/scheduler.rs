use chrono::{DateTime, Local};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::accounts::AccountListState;
use crate::events::{DashboardEvent, EventSink};
use crate::gateway::Backend;
use crate::lock;
use crate::status::StatusBoard;

/// 可取消的重复任务。每次 tick 返回下一次等待的时长。
///
/// 取消只影响之后的 tick，正在执行的 tick 会跑完，
/// 所以 tick 自己要在写状态前检查功能是否仍然有效。
pub struct ScheduledTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    pub fn spawn<F, Fut>(name: &'static str, first_delay: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Duration> + Send + 'static,
    {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let handle = tokio::spawn(async move {
            let mut delay = first_delay;
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = sleep(delay) => {}
                }
                delay = tick().await;
                if cancelled.is_cancelled() {
                    break;
                }
            }
            log::debug!("{} timer stopped", name);
        });
        Self { token, handle }
    }

    /// 固定周期，第一次 tick 在一个周期之后
    pub fn every<F, Fut>(name: &'static str, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::spawn(name, period, move || {
            let fut = tick();
            async move {
                fut.await;
                period
            }
        })
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// UI 当前显示的页面
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum View {
    #[default]
    Accounts,
    Config,
    Other,
}

/// 每个 tick 需要的状态，显式传给定时任务
pub struct TickContext<B: Backend> {
    pub status: StatusBoard<B>,
    pub accounts: AccountListState<B>,
    pub view: Arc<Mutex<View>>,
    pub sink: EventSink,
    pub last_refreshed: Arc<Mutex<Option<DateTime<Local>>>>,
}

impl<B: Backend> Clone for TickContext<B> {
    fn clone(&self) -> Self {
        Self {
            status: self.status.clone(),
            accounts: self.accounts.clone(),
            view: self.view.clone(),
            sink: self.sink.clone(),
            last_refreshed: self.last_refreshed.clone(),
        }
    }
}

impl<B: Backend> TickContext<B> {
    /// 错误只记日志，不会让定时器停下
    pub async fn tick(&self) {
        if let Err(err) = self.status.refresh().await {
            log::warn!("status refresh failed: {}", err);
        }

        let on_accounts = *lock(&self.view) == View::Accounts;
        if on_accounts {
            if let Err(err) = self.accounts.refresh(true).await {
                log::warn!("account list refresh failed: {}", err);
            }
        }

        let now = Local::now();
        *lock(&self.last_refreshed) = Some(now);
        self.sink.emit(DashboardEvent::Refreshed(now));
    }
}

/// 定时刷新任务状态，账号页面可见时顺便静默刷新列表
pub struct PollingScheduler<B: Backend> {
    context: TickContext<B>,
    period: Duration,
    timer: Mutex<Option<ScheduledTask>>,
}

impl<B: Backend> PollingScheduler<B> {
    pub fn new(context: TickContext<B>, period: Duration) -> Self {
        Self {
            context,
            period,
            timer: Mutex::new(None),
        }
    }

    /// 重复调用会替换旧的定时器
    pub fn start(&self) {
        let context = self.context.clone();
        let task = ScheduledTask::every("status", self.period, move || {
            let context = context.clone();
            async move { context.tick().await }
        });
        if let Some(old) = lock(&self.timer).replace(task) {
            old.cancel();
        }
        log::info!("status polling started, every {:?}", self.period);
    }

    pub fn stop(&self) {
        if let Some(timer) = lock(&self.timer).take() {
            timer.cancel();
            log::info!("status polling stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.timer)
            .as_ref()
            .map(|t| !t.is_cancelled())
            .unwrap_or(false)
    }

    pub fn last_refreshed_at(&self) -> Option<DateTime<Local>> {
        *lock(&self.context.last_refreshed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DashboardError;
    use crate::model::AccountListQuery;
    use crate::testing::FakeBackend;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn scheduler(backend: &Arc<FakeBackend>, view: View) -> PollingScheduler<FakeBackend> {
        let (sink, _rx) = EventSink::channel();
        let context = TickContext {
            status: StatusBoard::new(backend.clone(), sink.clone()),
            accounts: AccountListState::new(backend.clone(), sink.clone(), AccountListQuery::default()),
            view: Arc::new(Mutex::new(view)),
            sink,
            last_refreshed: Arc::new(Mutex::new(None)),
        };
        PollingScheduler::new(context, Duration::from_secs(10))
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_task_stops_on_cancel() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let task = ScheduledTask::every("test", Duration::from_secs(5), {
            let ticks = ticks.clone();
            move || {
                let ticks = ticks.clone();
                async move {
                    ticks.fetch_add(1, Ordering::SeqCst);
                }
            }
        });

        sleep(Duration::from_millis(16_000)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);

        task.cancel();
        sleep(Duration::from_secs(30)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
        assert!(task.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_refreshes_list_only_on_accounts_view() {
        let backend = Arc::new(FakeBackend::default());
        let on_accounts = scheduler(&backend, View::Accounts);
        on_accounts.start();
        sleep(Duration::from_millis(20_500)).await;
        assert_eq!(backend.count("status"), 2);
        assert_eq!(backend.count("list:"), 2);
        assert!(on_accounts.last_refreshed_at().is_some());
        on_accounts.stop();
        assert!(!on_accounts.is_running());

        let backend = Arc::new(FakeBackend::default());
        let on_config = scheduler(&backend, View::Config);
        on_config.start();
        sleep(Duration::from_millis(20_500)).await;
        assert_eq!(backend.count("status"), 2);
        assert_eq!(backend.count("list:"), 0);
        on_config.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_tick_keeps_timer_alive() {
        let backend = Arc::new(FakeBackend::default());
        backend.fail_next("status", DashboardError::Transport("refused".into()));
        backend.fail_next("list", DashboardError::Application(None));

        let polling = scheduler(&backend, View::Accounts);
        polling.start();
        sleep(Duration::from_millis(30_500)).await;

        assert_eq!(backend.count("status"), 3);
        assert!(polling.is_running());
        polling.stop();
        sleep(Duration::from_secs(30)).await;
        assert_eq!(backend.count("status"), 3);
    }
}
