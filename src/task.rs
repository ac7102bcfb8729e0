use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::sleep;

use crate::accounts::AccountListState;
use crate::error::{DashboardError, DashboardResult};
use crate::events::{DashboardEvent, EventSink};
use crate::gateway::Backend;
use crate::notice::{Action, Msg, NoticeLevel};
use crate::setting::TaskSettings;
use crate::status::StatusBoard;
use crate::tools::is_valid_email;
use crate::verification::{VerificationContext, VerificationCoordinator};

/// 启动/停止注册任务，以及自定义邮箱注册
pub struct TaskLifecycleController<B: Backend> {
    backend: Arc<B>,
    sink: EventSink,
    status: StatusBoard<B>,
    accounts: AccountListState<B>,
    verification: VerificationCoordinator<B>,
    settings: TaskSettings,
    custom_in_progress: Arc<AtomicBool>,
}

impl<B: Backend> Clone for TaskLifecycleController<B> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            sink: self.sink.clone(),
            status: self.status.clone(),
            accounts: self.accounts.clone(),
            verification: self.verification.clone(),
            settings: self.settings.clone(),
            custom_in_progress: self.custom_in_progress.clone(),
        }
    }
}

impl<B: Backend> TaskLifecycleController<B> {
    pub fn new(
        backend: Arc<B>,
        sink: EventSink,
        status: StatusBoard<B>,
        accounts: AccountListState<B>,
        verification: VerificationCoordinator<B>,
        settings: TaskSettings,
        custom_in_progress: Arc<AtomicBool>,
    ) -> Self {
        Self {
            backend,
            sink,
            status,
            accounts,
            verification,
            settings,
            custom_in_progress,
        }
    }

    pub fn custom_in_progress(&self) -> bool {
        self.custom_in_progress.load(Ordering::SeqCst)
    }

    pub async fn start_default(&self) -> DashboardResult<()> {
        self.sink.busy(true);
        let result = self.backend.start_task().await;
        self.sink.busy(false);

        match result {
            Ok(ack) => {
                // 等待期间被 stop 过就不再开始轮询
                let epoch = self.verification.epoch();
                self.sink.notice(
                    NoticeLevel::Success,
                    ack.message.unwrap_or_else(|| Msg::TaskStarted.to_string()),
                );
                if let Err(err) = self.status.refresh().await {
                    log::warn!("status refresh after start failed: {}", err);
                }
                sleep(self.settings.verification_start_delay()).await;
                self.verification
                    .start_checking_since(epoch, VerificationContext::TaskRegistration);
                Ok(())
            }
            Err(err) => {
                self.sink
                    .notice(NoticeLevel::Danger, err.notice_text(&Action::StartTask.to_string()));
                Err(err)
            }
        }
    }

    /// 用指定邮箱注册一个账号。验证码轮询在请求发出前就开始，
    /// 因为后端在返回之前就会要求输入验证码。
    pub async fn start_custom(&self, email: &str) -> DashboardResult<()> {
        let email = email.trim();
        if !is_valid_email(email) {
            let err = DashboardError::validation(Msg::InvalidEmail.to_string());
            self.sink.notice(
                NoticeLevel::Warning,
                err.notice_text(&Action::CustomRegistration.to_string()),
            );
            return Err(err);
        }

        if self
            .custom_in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            let err = DashboardError::validation(Msg::CustomRegistrationBusy.to_string());
            self.sink.notice(NoticeLevel::Warning, err.notice_text(""));
            return Err(err);
        }

        self.verification
            .start_checking(VerificationContext::CustomEmail);
        self.sink.busy(true);
        let result = self.backend.register_custom(email).await;
        self.sink.busy(false);

        self.verification.stop_checking().await;
        self.custom_in_progress.store(false, Ordering::SeqCst);

        match result {
            Ok(ack) => {
                self.sink.notice(
                    NoticeLevel::Success,
                    ack.message
                        .unwrap_or_else(|| Msg::CustomRegistrationDone.to_string()),
                );
                self.sink.emit(DashboardEvent::CustomInputCleared);

                let accounts = self.accounts.clone();
                let delay = self.settings.custom_refresh_delay();
                tokio::spawn(async move {
                    sleep(delay).await;
                    let _ = accounts.refresh(false).await;
                });
                Ok(())
            }
            Err(err) => {
                self.sink.notice(
                    NoticeLevel::Danger,
                    err.notice_text(&Action::CustomRegistration.to_string()),
                );
                Err(err)
            }
        }
    }

    pub async fn stop(&self) -> DashboardResult<()> {
        self.sink.busy(true);
        let result = self.backend.stop_task().await;
        self.sink.busy(false);

        match result {
            Ok(ack) => {
                self.sink.notice(
                    NoticeLevel::Success,
                    ack.message.unwrap_or_else(|| Msg::TaskStopped.to_string()),
                );
                if let Err(err) = self.status.refresh().await {
                    log::warn!("status refresh after stop failed: {}", err);
                }
                self.verification.stop_checking().await;
                Ok(())
            }
            Err(err) => {
                self.sink
                    .notice(NoticeLevel::Danger, err.notice_text(&Action::StopTask.to_string()));
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventReceiver;
    use crate::model::{AccountListQuery, TaskState, TaskStatus};
    use crate::setting::VerificationSettings;
    use crate::testing::{drain, pending, FakeBackend};
    use crate::verification::CoordinatorState;
    use std::time::Duration;

    struct Fixture {
        backend: Arc<FakeBackend>,
        task: TaskLifecycleController<FakeBackend>,
        verification: VerificationCoordinator<FakeBackend>,
        rx: EventReceiver,
    }

    fn fixture() -> Fixture {
        let backend = Arc::new(FakeBackend::default());
        let (sink, rx) = EventSink::channel();
        let custom = Arc::new(AtomicBool::new(false));
        let status = StatusBoard::new(backend.clone(), sink.clone());
        let accounts =
            AccountListState::new(backend.clone(), sink.clone(), AccountListQuery::default());
        let verification = VerificationCoordinator::new(
            backend.clone(),
            sink.clone(),
            accounts.clone(),
            status.clone(),
            VerificationSettings::default(),
            Arc::new(AtomicBool::new(false)),
            custom.clone(),
        );
        let task = TaskLifecycleController::new(
            backend.clone(),
            sink,
            status,
            accounts,
            verification.clone(),
            TaskSettings::default(),
            custom,
        );
        Fixture {
            backend,
            task,
            verification,
            rx,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_email_makes_no_calls() {
        let f = fixture();
        let err = f.task.start_custom("not-an-email").await.unwrap_err();
        assert!(matches!(err, DashboardError::Validation(_)));
        assert!(f.backend.calls().is_empty());
        assert!(!f.task.custom_in_progress());
        assert_eq!(f.verification.state(), CoordinatorState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_registration_success() {
        let mut f = fixture();
        let gate = f.backend.gate("custom");
        let running = tokio::spawn({
            let task = f.task.clone();
            async move { task.start_custom("user@example.com").await }
        });
        tokio::task::yield_now().await;

        assert!(f.task.custom_in_progress());
        assert_eq!(f.verification.context(), VerificationContext::CustomEmail);
        assert_eq!(f.verification.state(), CoordinatorState::Polling);

        // 注册进行中时重复提交被拒绝
        let busy = f.task.start_custom("other@example.com").await.unwrap_err();
        assert!(matches!(busy, DashboardError::Validation(_)));
        assert_eq!(f.backend.count("custom:"), 1);

        gate.notify_one();
        running.await.unwrap().unwrap();

        assert!(!f.task.custom_in_progress());
        assert_eq!(f.verification.state(), CoordinatorState::Suppressed);
        assert!(!f.verification.has_timer());
        assert_eq!(f.backend.count("clear"), 1);
        assert!(drain(&mut f.rx).contains(&DashboardEvent::CustomInputCleared));

        sleep(Duration::from_millis(2_100)).await;
        assert_eq!(f.backend.count("list:"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_prompt_uses_custom_copy() {
        let f = fixture();
        f.backend.set_pending(vec![pending("v1", "user@example.com")]);
        let gate = f.backend.gate("custom");
        let running = tokio::spawn({
            let task = f.task.clone();
            async move { task.start_custom("user@example.com").await }
        });
        sleep(Duration::from_millis(10)).await;

        let prompt = f.verification.current_prompt().unwrap();
        assert_eq!(prompt.context, VerificationContext::CustomEmail);

        gate.notify_one();
        running.await.unwrap().unwrap();
        assert!(f.verification.current_prompt().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_registration_failure_clears_flag() {
        let mut f = fixture();
        f.backend
            .fail_next("custom", DashboardError::Transport("reset".into()));
        let err = f.task.start_custom("user@example.com").await.unwrap_err();

        assert!(err.is_transport());
        assert!(!f.task.custom_in_progress());
        assert_eq!(f.verification.state(), CoordinatorState::Suppressed);
        let events = drain(&mut f.rx);
        assert!(!events.contains(&DashboardEvent::CustomInputCleared));
        assert!(events
            .iter()
            .any(|e| matches!(e, DashboardEvent::Notice(n) if n.level == NoticeLevel::Danger)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_default_begins_checking_after_delay() {
        let f = fixture();
        f.backend.push_status(TaskStatus {
            task_status: TaskState::Running,
            ..Default::default()
        });
        f.task.start_default().await.unwrap();

        assert_eq!(f.backend.calls()[..2], ["start".to_string(), "status".to_string()]);
        assert_eq!(f.verification.context(), VerificationContext::TaskRegistration);
        sleep(Duration::from_millis(10)).await;
        assert_eq!(f.backend.count("pending"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_failure_does_not_poll() {
        let f = fixture();
        f.backend
            .fail_next("start", DashboardError::application(Some("already running".into())));
        let err = f.task.start_default().await.unwrap_err();
        assert_eq!(err, DashboardError::Application(Some("already running".into())));
        assert_eq!(f.verification.state(), CoordinatorState::Idle);
        assert_eq!(f.backend.count("status"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_start_delay_keeps_polling_off() {
        let f = fixture();
        f.backend.set_pending(vec![pending("v1", "a@b.io")]);
        let starting = tokio::spawn({
            let task = f.task.clone();
            async move { task.start_default().await }
        });
        sleep(Duration::from_millis(100)).await;

        f.task.stop().await.unwrap();
        starting.await.unwrap().unwrap();
        sleep(Duration::from_secs(12)).await;

        assert_eq!(f.verification.state(), CoordinatorState::Suppressed);
        assert!(!f.verification.has_timer());
        assert!(f.verification.current_prompt().is_none());
        assert_eq!(f.backend.count("pending"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_closes_open_prompt() {
        let mut f = fixture();
        f.backend.set_pending(vec![pending("v1", "a@b.io")]);
        f.task.start_default().await.unwrap();
        sleep(Duration::from_millis(10)).await;
        assert!(f.verification.current_prompt().is_some());

        f.task.stop().await.unwrap();
        assert!(f.verification.current_prompt().is_none());
        assert_eq!(f.backend.count("clear"), 1);
        assert!(drain(&mut f.rx).contains(&DashboardEvent::PromptClosed { id: "v1".into() }));
    }
}
