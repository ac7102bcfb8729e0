use serde::Serialize;
use std::sync::{Arc, Mutex};

use crate::error::DashboardResult;
use crate::events::{DashboardEvent, EventSink};
use crate::gateway::Backend;
use crate::lock;
use crate::model::{TaskState, TaskStatus};
use crate::notice::is_english_mode;
use crate::tools::{format_datetime, format_unix};

/// 任务状态面板需要的派生字段
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskStatusView {
    pub state: TaskState,
    pub label: String,
    pub running: bool,
    pub can_start: bool,
    pub can_stop: bool,
    pub message: String,
    pub active_count: i64,
    pub max_accounts: i64,
    pub remaining: i64,
    pub usage_percent: u32,
    pub last_run: String,
    pub next_run: String,
    pub last_status: String,
    pub total_runs: u64,
    pub successful_runs: u64,
    pub failed_runs: u64,
    pub success_rate: String,
}

fn state_label(state: TaskState) -> &'static str {
    let is_english = is_english_mode();
    match state {
        TaskState::Running => {
            if is_english {
                "Running"
            } else {
                "正在运行"
            }
        }
        TaskState::Monitoring => {
            if is_english {
                "Monitoring"
            } else {
                "监控模式"
            }
        }
        TaskState::Stopped => {
            if is_english {
                "Stopped"
            } else {
                "已停止"
            }
        }
    }
}

fn default_message(status: &TaskStatus) -> &'static str {
    let is_english = is_english_mode();
    let last_status = status.registration_details.last_status.as_deref();
    match (status.task_status, last_status) {
        (TaskState::Running, _) => {
            if is_english {
                "Registering new accounts..."
            } else {
                "正在注册新账号..."
            }
        }
        (TaskState::Monitoring, _) => {
            if is_english {
                "Account limit reached, watching for changes..."
            } else {
                "已达到最大账号数量，正在监控账号数量变化..."
            }
        }
        (TaskState::Stopped, Some("completed")) => {
            if is_english {
                "Task completed"
            } else {
                "任务已完成"
            }
        }
        (TaskState::Stopped, Some("error")) => {
            if is_english {
                "Task failed, please check the logs"
            } else {
                "任务执行出错，请检查日志"
            }
        }
        _ => {
            if is_english {
                "Task not started"
            } else {
                "任务未启动"
            }
        }
    }
}

impl From<&TaskStatus> for TaskStatusView {
    fn from(status: &TaskStatus) -> Self {
        let running = matches!(
            status.task_status,
            TaskState::Running | TaskState::Monitoring
        );
        // 剩余槽位以 max_accounts - active_count 为准，不用后端的 remaining_slots
        let remaining = (status.max_accounts - status.active_count).max(0);
        let usage_percent = if status.max_accounts > 0 {
            (status.active_count.max(0) * 100 / status.max_accounts).min(100) as u32
        } else {
            0
        };
        let message = status
            .status_message
            .as_deref()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| default_message(status))
            .to_string();
        let details = &status.registration_details;
        let stats = &details.statistics;

        TaskStatusView {
            state: status.task_status,
            label: state_label(status.task_status).to_string(),
            running,
            can_start: !running,
            can_stop: running,
            message,
            active_count: status.active_count,
            max_accounts: status.max_accounts,
            remaining,
            usage_percent,
            last_run: details
                .last_run
                .as_deref()
                .map(format_datetime)
                .unwrap_or_else(|| "-".to_string()),
            next_run: details
                .next_run
                .map(format_unix)
                .unwrap_or_else(|| "-".to_string()),
            last_status: details.last_status.clone().unwrap_or_else(|| "-".to_string()),
            total_runs: stats.total_runs,
            successful_runs: stats.successful_runs,
            failed_runs: stats.failed_runs,
            success_rate: stats
                .success_rate
                .clone()
                .unwrap_or_else(|| "0%".to_string()),
        }
    }
}

#[derive(Default)]
struct StatusInner {
    issued: u64,
    applied: u64,
    last: Option<TaskStatus>,
}

/// 拉取并缓存后端任务状态；旧请求晚到时不覆盖新结果
pub struct StatusBoard<B: Backend> {
    backend: Arc<B>,
    sink: EventSink,
    inner: Arc<Mutex<StatusInner>>,
}

impl<B: Backend> Clone for StatusBoard<B> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            sink: self.sink.clone(),
            inner: self.inner.clone(),
        }
    }
}

impl<B: Backend> StatusBoard<B> {
    pub fn new(backend: Arc<B>, sink: EventSink) -> Self {
        Self {
            backend,
            sink,
            inner: Arc::new(Mutex::new(StatusInner::default())),
        }
    }

    pub fn current(&self) -> Option<TaskStatus> {
        lock(&self.inner).last.clone()
    }

    /// 返回最新已应用的状态
    pub async fn refresh(&self) -> DashboardResult<TaskStatus> {
        let seq = {
            let mut inner = lock(&self.inner);
            inner.issued += 1;
            inner.issued
        };

        let status = self.backend.task_status().await?;

        let mut inner = lock(&self.inner);
        if seq < inner.applied {
            log::debug!("discarding stale task status #{} (applied #{})", seq, inner.applied);
            return Ok(inner.last.clone().unwrap_or(status));
        }
        inner.applied = seq;
        inner.last = Some(status.clone());
        self.sink
            .emit(DashboardEvent::StatusUpdated(TaskStatusView::from(&status)));
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RegistrationDetails, TaskStatistics};
    use crate::testing::{drain, FakeBackend};

    fn status(state: TaskState, active: i64, max: i64) -> TaskStatus {
        TaskStatus {
            task_status: state,
            active_count: active,
            max_accounts: max,
            // 与派生值不一致，验证不会被采用
            remaining_slots: 99,
            ..Default::default()
        }
    }

    #[test]
    fn test_view_derivation() {
        let view = TaskStatusView::from(&status(TaskState::Running, 3, 10));
        assert!(view.running && view.can_stop && !view.can_start);
        assert_eq!(view.remaining, 7);
        assert_eq!(view.usage_percent, 30);
        assert_eq!(view.success_rate, "0%");
        assert_eq!(view.next_run, "-");

        let view = TaskStatusView::from(&status(TaskState::Monitoring, 12, 10));
        assert!(view.running);
        assert_eq!(view.remaining, 0);
        assert_eq!(view.usage_percent, 100);

        let view = TaskStatusView::from(&status(TaskState::Stopped, 0, 0));
        assert!(view.can_start && !view.can_stop);
        assert_eq!(view.usage_percent, 0);
    }

    #[test]
    fn test_message_prefers_backend_text() {
        let mut s = status(TaskState::Stopped, 1, 5);
        s.status_message = Some("注册任务未运行".to_string());
        assert_eq!(TaskStatusView::from(&s).message, "注册任务未运行");

        s.status_message = Some("   ".to_string());
        s.registration_details = RegistrationDetails {
            last_status: Some("completed".to_string()),
            statistics: TaskStatistics {
                total_runs: 2,
                successful_runs: 2,
                failed_runs: 0,
                success_rate: Some("100.0%".to_string()),
            },
            ..Default::default()
        };
        let view = TaskStatusView::from(&s);
        assert_eq!(view.message, default_message(&s));
        assert_eq!(view.success_rate, "100.0%");
        assert_eq!(view.last_status, "completed");
    }

    #[tokio::test]
    async fn test_stale_status_is_not_applied() {
        let backend = Arc::new(FakeBackend::default());
        let (sink, mut rx) = crate::events::EventSink::channel();
        let board = StatusBoard::new(backend.clone(), sink);

        backend.push_status(status(TaskState::Running, 1, 10));
        let gate = backend.gate_status();
        let slow = tokio::spawn({
            let board = board.clone();
            async move { board.refresh().await }
        });
        tokio::task::yield_now().await;

        backend.push_status(status(TaskState::Stopped, 2, 10));
        let fresh = board.refresh().await.unwrap();
        assert_eq!(fresh.task_status, TaskState::Stopped);

        gate.notify_one();
        let late = slow.await.unwrap().unwrap();
        assert_eq!(late.task_status, TaskState::Stopped);
        assert_eq!(board.current().unwrap().active_count, 2);

        let updates: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, DashboardEvent::StatusUpdated(_)))
            .collect();
        assert_eq!(updates.len(), 1);
    }
}
