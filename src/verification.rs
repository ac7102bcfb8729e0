use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::sleep;

use crate::accounts::AccountListState;
use crate::error::{DashboardError, DashboardResult};
use crate::events::{DashboardEvent, EventSink};
use crate::gateway::Backend;
use crate::lock;
use crate::model::{TaskState, VerificationRequest, VerificationStatus};
use crate::notice::{is_english_mode, Action, Msg, NoticeLevel};
use crate::scheduler::ScheduledTask;
use crate::setting::VerificationSettings;
use crate::status::StatusBoard;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Idle,
    Polling,
    PromptOpen,
    /// 被显式停止，直到下一次 start_checking
    Suppressed,
}

/// 决定提示框文案
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum VerificationContext {
    TaskRegistration,
    CustomEmail,
    #[default]
    Default,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationPrompt {
    pub id: String,
    pub email: String,
    pub context: VerificationContext,
    pub title: String,
    pub body: String,
}

impl VerificationPrompt {
    fn new(request: &VerificationRequest, context: VerificationContext) -> Self {
        let is_english = is_english_mode();
        let email = request.email.as_str();
        let (title, mut body) = match context {
            VerificationContext::TaskRegistration => {
                if is_english {
                    (
                        "Registration task needs a code".to_string(),
                        format!("The registration task is waiting for the code sent to {}", email),
                    )
                } else {
                    (
                        "注册任务需要验证码".to_string(),
                        format!("自动注册任务正在等待 {} 收到的验证码", email),
                    )
                }
            }
            VerificationContext::CustomEmail => {
                if is_english {
                    (
                        "Custom email verification".to_string(),
                        format!("Check the inbox of {} and enter the code", email),
                    )
                } else {
                    (
                        "自定义邮箱注册验证".to_string(),
                        format!("请查收 {} 的邮件并输入验证码", email),
                    )
                }
            }
            VerificationContext::Default => {
                if is_english {
                    (
                        "Email verification code".to_string(),
                        format!("Enter the code sent to {}", email),
                    )
                } else {
                    (
                        "需要邮箱验证码".to_string(),
                        format!("请输入发送到 {} 的验证码", email),
                    )
                }
            }
        };
        if let Some(message) = request.message.as_deref().filter(|m| !m.is_empty()) {
            body.push_str(" (");
            body.push_str(message);
            body.push(')');
        }
        VerificationPrompt {
            id: request.id.clone(),
            email: request.email.clone(),
            context,
            title,
            body,
        }
    }
}

/// 同一时间最多一个打开的提示框，被占用时拒绝新的
#[derive(Debug, Default)]
struct PromptSlot(Option<VerificationPrompt>);

impl PromptSlot {
    fn try_open(&mut self, prompt: VerificationPrompt) -> bool {
        if self.0.is_some() {
            return false;
        }
        self.0 = Some(prompt);
        true
    }

    fn close_if(&mut self, id: &str) -> Option<VerificationPrompt> {
        if self.0.as_ref().map(|p| p.id == id).unwrap_or(false) {
            self.0.take()
        } else {
            None
        }
    }

    fn take(&mut self) -> Option<VerificationPrompt> {
        self.0.take()
    }

    fn current(&self) -> Option<&VerificationPrompt> {
        self.0.as_ref()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    Accepted,
    /// 上一次提交还没返回，本次忽略
    InFlight,
}

struct CoordinatorInner {
    state: CoordinatorState,
    context: VerificationContext,
    prompt: PromptSlot,
    submitting: bool,
    // start/stop 时递增，用来识别过期的轮询结果
    epoch: u64,
    warned: HashSet<String>,
    timer: Option<ScheduledTask>,
}

/// 轮询后端待输入的验证码请求，并管理唯一的提示框
pub struct VerificationCoordinator<B: Backend> {
    backend: Arc<B>,
    sink: EventSink,
    accounts: AccountListState<B>,
    status: StatusBoard<B>,
    settings: VerificationSettings,
    modal_visible: Arc<AtomicBool>,
    custom_in_progress: Arc<AtomicBool>,
    inner: Arc<Mutex<CoordinatorInner>>,
}

impl<B: Backend> Clone for VerificationCoordinator<B> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            sink: self.sink.clone(),
            accounts: self.accounts.clone(),
            status: self.status.clone(),
            settings: self.settings.clone(),
            modal_visible: self.modal_visible.clone(),
            custom_in_progress: self.custom_in_progress.clone(),
            inner: self.inner.clone(),
        }
    }
}

impl<B: Backend> VerificationCoordinator<B> {
    pub fn new(
        backend: Arc<B>,
        sink: EventSink,
        accounts: AccountListState<B>,
        status: StatusBoard<B>,
        settings: VerificationSettings,
        modal_visible: Arc<AtomicBool>,
        custom_in_progress: Arc<AtomicBool>,
    ) -> Self {
        Self {
            backend,
            sink,
            accounts,
            status,
            settings,
            modal_visible,
            custom_in_progress,
            inner: Arc::new(Mutex::new(CoordinatorInner {
                state: CoordinatorState::Idle,
                context: VerificationContext::Default,
                prompt: PromptSlot::default(),
                submitting: false,
                epoch: 0,
                warned: HashSet::new(),
                timer: None,
            })),
        }
    }

    pub fn state(&self) -> CoordinatorState {
        lock(&self.inner).state
    }

    pub fn context(&self) -> VerificationContext {
        lock(&self.inner).context
    }

    pub fn current_prompt(&self) -> Option<VerificationPrompt> {
        lock(&self.inner).prompt.current().cloned()
    }

    pub fn is_submitting(&self) -> bool {
        lock(&self.inner).submitting
    }

    pub fn has_timer(&self) -> bool {
        lock(&self.inner)
            .timer
            .as_ref()
            .map(|t| !t.is_cancelled())
            .unwrap_or(false)
    }

    /// 当前轮次，配合 `start_checking_since` 使用
    pub fn epoch(&self) -> u64 {
        lock(&self.inner).epoch
    }

    /// 延迟启动用：`epoch` 之后有过 start/stop 就放弃，返回是否启动
    pub fn start_checking_since(&self, epoch: u64, context: VerificationContext) -> bool {
        let inner = lock(&self.inner);
        if inner.epoch != epoch {
            log::debug!(
                "verification start skipped, round changed (#{} -> #{})",
                epoch,
                inner.epoch
            );
            return false;
        }
        self.start_locked(inner, context);
        true
    }

    /// 已在轮询时只更新文案上下文，不会创建第二个定时器
    pub fn start_checking(&self, context: VerificationContext) {
        self.start_locked(lock(&self.inner), context);
    }

    fn start_locked(&self, mut inner: MutexGuard<'_, CoordinatorInner>, context: VerificationContext) {
        inner.context = context;
        let active = matches!(
            inner.state,
            CoordinatorState::Polling | CoordinatorState::PromptOpen
        );
        if active && inner.timer.is_some() {
            log::debug!("verification polling already active, context -> {:?}", context);
            return;
        }

        inner.state = CoordinatorState::Polling;
        inner.epoch += 1;
        inner.warned.clear();
        let epoch = inner.epoch;
        let this = self.clone();
        let task = ScheduledTask::spawn("verification", Duration::ZERO, move || {
            let this = this.clone();
            async move { this.poll_pending(epoch).await }
        });
        if let Some(old) = inner.timer.replace(task) {
            old.cancel();
        }
        log::info!("verification polling started ({:?})", context);
    }

    /// 一次轮询，返回下次轮询前的等待时间
    pub async fn poll_pending(&self, epoch: u64) -> Duration {
        let interval = self.settings.poll_interval();
        {
            let inner = lock(&self.inner);
            // 提示框打开时不再拉取
            if inner.epoch != epoch || inner.state != CoordinatorState::Polling {
                return interval;
            }
        }

        let requests = match self.backend.pending_verifications().await {
            Ok(requests) => requests,
            Err(err) if err.is_transport() => {
                log::warn!("verification poll failed, backing off: {}", err);
                return self.settings.backoff();
            }
            Err(err) => {
                log::warn!("verification poll failed: {}", err);
                return interval;
            }
        };

        let mut inner = lock(&self.inner);
        if inner.epoch != epoch || inner.state != CoordinatorState::Polling {
            log::debug!("dropping verification poll result from a stopped round");
            return interval;
        }

        for request in requests
            .iter()
            .filter(|r| r.status == VerificationStatus::Failed)
        {
            // 后端会降级为手动模式，之后再给出 pending 请求
            if inner.warned.insert(request.id.clone()) {
                self.sink.notice(
                    NoticeLevel::Warning,
                    Msg::VerificationAutoFailed {
                        email: &request.email,
                        detail: request.message.as_deref(),
                    }
                    .to_string(),
                );
            }
        }

        let Some(request) = requests
            .iter()
            .find(|r| r.status == VerificationStatus::Pending)
        else {
            return interval;
        };

        if self.modal_visible.load(Ordering::SeqCst) {
            log::debug!("another dialog is open, retrying verification prompt shortly");
            return self.settings.modal_retry();
        }

        let context = if self.custom_in_progress.load(Ordering::SeqCst) {
            VerificationContext::CustomEmail
        } else {
            inner.context
        };
        let prompt = VerificationPrompt::new(request, context);
        if inner.prompt.try_open(prompt.clone()) {
            inner.state = CoordinatorState::PromptOpen;
            log::info!("verification code requested for {}", prompt.email);
            self.sink.emit(DashboardEvent::PromptOpened(prompt));
        }
        interval
    }

    pub async fn submit_code(&self, id: &str, code: &str) -> DashboardResult<Submission> {
        let (id, code) = (id.trim(), code.trim());
        if id.is_empty() || code.is_empty() {
            let err = DashboardError::validation(Msg::EmptyVerificationInput.to_string());
            self.sink
                .notice(NoticeLevel::Warning, err.notice_text(&Action::SubmitCode.to_string()));
            return Err(err);
        }

        {
            let mut inner = lock(&self.inner);
            if inner.submitting {
                log::debug!("verification submission already in flight, ignoring");
                return Ok(Submission::InFlight);
            }
            inner.submitting = true;
        }

        let result = self.backend.submit_verification(id, code).await;

        let closed = {
            let mut inner = lock(&self.inner);
            inner.submitting = false;
            if result.is_ok() {
                let closed = inner.prompt.close_if(id);
                if closed.is_some() && inner.state == CoordinatorState::PromptOpen {
                    inner.state = CoordinatorState::Polling;
                }
                closed
            } else {
                None
            }
        };

        match result {
            Ok(ack) => {
                if let Some(prompt) = closed {
                    self.sink.emit(DashboardEvent::PromptClosed { id: prompt.id });
                }
                self.sink.notice(
                    NoticeLevel::Success,
                    ack.message.unwrap_or_else(|| Msg::CodeSubmitted.to_string()),
                );

                // 给后端留出处理时间再刷新列表
                let accounts = self.accounts.clone();
                let delay = self.settings.submit_refresh_delay();
                tokio::spawn(async move {
                    sleep(delay).await;
                    let _ = accounts.refresh(false).await;
                });

                match self.status.refresh().await {
                    Ok(status)
                        if status.task_status == TaskState::Stopped
                            && !self.custom_in_progress.load(Ordering::SeqCst) =>
                    {
                        log::info!("task already stopped, ending verification polling");
                        self.stop_checking().await;
                    }
                    Ok(_) => {}
                    Err(err) => log::warn!("status check after submission failed: {}", err),
                }
                Ok(Submission::Accepted)
            }
            Err(err) => {
                self.sink
                    .notice(NoticeLevel::Danger, err.notice_text(&Action::SubmitCode.to_string()));
                Err(err)
            }
        }
    }

    /// 停止轮询，关闭提示框，并尽量让后端丢弃所有待处理请求
    pub async fn stop_checking(&self) {
        let closed = self.halt(CoordinatorState::Suppressed);
        if let Some(prompt) = closed {
            self.sink.emit(DashboardEvent::PromptClosed { id: prompt.id });
        }
        if let Err(err) = self.backend.clear_verifications().await {
            log::warn!("failed to clear pending verifications: {}", err);
        }
    }

    /// 只停本地定时器，不通知后端
    pub fn shutdown(&self) {
        if let Some(prompt) = self.halt(CoordinatorState::Idle) {
            self.sink.emit(DashboardEvent::PromptClosed { id: prompt.id });
        }
    }

    fn halt(&self, next: CoordinatorState) -> Option<VerificationPrompt> {
        let mut inner = lock(&self.inner);
        inner.state = next;
        inner.epoch += 1;
        inner.context = VerificationContext::Default;
        inner.warned.clear();
        if let Some(timer) = inner.timer.take() {
            timer.cancel();
            log::info!("verification polling stopped");
        }
        inner.prompt.take()
    }
}
