use chrono::{DateTime, Local};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::accounts::{AccountListState, FetchOutcome};
use crate::error::{DashboardError, DashboardResult};
use crate::events::{EventReceiver, EventSink};
use crate::gateway::Backend;
use crate::lock;
use crate::model::{
    AccountListQuery, AccountPage, AccountRef, AccountStatus, BackendConfig, SortField, SortOrder,
    UsageReport,
};
use crate::notice::{set_english_mode, Action, Msg, NoticeLevel};
use crate::scheduler::{PollingScheduler, TickContext, View};
use crate::setting::Settings;
use crate::status::{StatusBoard, TaskStatusView};
use crate::task::TaskLifecycleController;
use crate::tools::is_valid_email;
use crate::verification::{Submission, VerificationCoordinator, VerificationPrompt};

/// 控制台的编排对象，持有全部状态和两个定时器。
///
/// 生命周期：`create` → `start` → `stop` → `dispose`。
/// UI 层只通过 `create` 返回的事件通道接收变化。
pub struct Dashboard<B: Backend> {
    backend: Arc<B>,
    sink: EventSink,
    status: StatusBoard<B>,
    accounts: AccountListState<B>,
    verification: VerificationCoordinator<B>,
    task: TaskLifecycleController<B>,
    scheduler: PollingScheduler<B>,
    view: Arc<Mutex<View>>,
    modal_visible: Arc<AtomicBool>,
}

impl<B: Backend> Dashboard<B> {
    pub fn create(backend: Arc<B>, settings: Settings) -> (Self, EventReceiver) {
        set_english_mode(settings.is_english());
        let (sink, rx) = EventSink::channel();

        let query = AccountListQuery {
            per_page: settings.list.per_page,
            sort_field: settings.list.sort_field,
            sort_order: settings.list.sort_order,
            ..Default::default()
        };
        let status = StatusBoard::new(backend.clone(), sink.clone());
        let accounts = AccountListState::new(backend.clone(), sink.clone(), query);
        let modal_visible = Arc::new(AtomicBool::new(false));
        let custom_in_progress = Arc::new(AtomicBool::new(false));
        let verification = VerificationCoordinator::new(
            backend.clone(),
            sink.clone(),
            accounts.clone(),
            status.clone(),
            settings.verification.clone(),
            modal_visible.clone(),
            custom_in_progress.clone(),
        );
        let task = TaskLifecycleController::new(
            backend.clone(),
            sink.clone(),
            status.clone(),
            accounts.clone(),
            verification.clone(),
            settings.task.clone(),
            custom_in_progress,
        );
        let view = Arc::new(Mutex::new(View::default()));
        let scheduler = PollingScheduler::new(
            TickContext {
                status: status.clone(),
                accounts: accounts.clone(),
                view: view.clone(),
                sink: sink.clone(),
                last_refreshed: Arc::new(Mutex::new(None)),
            },
            settings.status_interval(),
        );

        let dashboard = Self {
            backend,
            sink,
            status,
            accounts,
            verification,
            task,
            scheduler,
            view,
            modal_visible,
        };
        (dashboard, rx)
    }

    /// 首次加载账号列表和任务状态，然后开始定时刷新
    pub async fn start(&self) {
        let _ = self.accounts.refresh(false).await;
        if let Err(err) = self.status.refresh().await {
            log::warn!("initial status load failed: {}", err);
        }
        self.scheduler.start();
    }

    /// 停止两个定时器，不访问后端
    pub fn stop(&self) {
        self.scheduler.stop();
        self.verification.shutdown();
    }

    pub fn dispose(self) {
        self.stop();
        log::info!("dashboard disposed");
    }

    pub fn is_polling(&self) -> bool {
        self.scheduler.is_running()
    }

    pub async fn force_refresh(&self) -> DashboardResult<()> {
        let listed = self.accounts.refresh(false).await;
        let status = self
            .status
            .refresh()
            .await
            .map_err(|err| self.alert(Action::LoadData, err));
        listed?;
        status?;
        Ok(())
    }

    pub fn set_active_view(&self, view: View) {
        *lock(&self.view) = view;
    }

    pub fn active_view(&self) -> View {
        *lock(&self.view)
    }

    /// 其他对话框（例如额度详情）打开时，验证码提示会等待
    pub fn set_modal_visible(&self, visible: bool) {
        self.modal_visible.store(visible, Ordering::SeqCst);
    }

    pub fn last_refreshed_at(&self) -> Option<DateTime<Local>> {
        self.scheduler.last_refreshed_at()
    }

    pub fn task_status(&self) -> Option<TaskStatusView> {
        self.status.current().as_ref().map(TaskStatusView::from)
    }

    pub fn accounts(&self) -> Option<AccountPage> {
        self.accounts.cached()
    }

    pub fn query(&self) -> AccountListQuery {
        self.accounts.query()
    }

    pub fn current_prompt(&self) -> Option<VerificationPrompt> {
        self.verification.current_prompt()
    }

    // 任务

    pub async fn start_task(&self) -> DashboardResult<()> {
        self.task.start_default().await
    }

    pub async fn start_custom(&self, email: &str) -> DashboardResult<()> {
        self.task.start_custom(email).await
    }

    pub async fn stop_task(&self) -> DashboardResult<()> {
        self.task.stop().await
    }

    pub async fn submit_code(&self, id: &str, code: &str) -> DashboardResult<Submission> {
        self.verification.submit_code(id, code).await
    }

    /// 用户关闭验证码提示框
    pub async fn cancel_verification(&self) {
        self.verification.stop_checking().await;
    }

    // 账号列表

    pub async fn set_page(&self, page: u32) -> DashboardResult<FetchOutcome> {
        self.accounts.set_page(page).await
    }

    pub async fn set_per_page(&self, per_page: u32) -> DashboardResult<FetchOutcome> {
        self.accounts.set_per_page(per_page).await
    }

    pub async fn set_sort(&self, field: SortField, order: SortOrder) -> DashboardResult<FetchOutcome> {
        self.accounts.set_sort(field, order).await
    }

    pub async fn set_search(&self, term: &str) -> DashboardResult<FetchOutcome> {
        self.accounts.set_search(term).await
    }

    // 单个账号

    pub async fn update_account_status(
        &self,
        target: &AccountRef,
        status: AccountStatus,
    ) -> DashboardResult<()> {
        self.backend
            .update_account_status(target, status)
            .await
            .map_err(|err| self.alert(Action::UpdateStatus, err))?;
        self.sink.notice(
            NoticeLevel::Success,
            Msg::StatusChanged {
                account: &target.to_string(),
                label: status.label(),
            }
            .to_string(),
        );
        self.reload().await;
        Ok(())
    }

    pub async fn delete_account(&self, target: &AccountRef) -> DashboardResult<()> {
        self.backend
            .delete_account(target, true)
            .await
            .map_err(|err| self.alert(Action::DeleteAccount, err))?;
        self.sink.notice(
            NoticeLevel::Success,
            Msg::AccountDeleted {
                account: &target.to_string(),
            }
            .to_string(),
        );
        self.reload().await;
        Ok(())
    }

    /// 查询实时额度，后端会顺便更新数据库，所以之后刷新列表
    pub async fn account_usage(&self, email: &str) -> DashboardResult<UsageReport> {
        let email = email.trim();
        if !is_valid_email(email) {
            let err = DashboardError::validation(Msg::InvalidEmail.to_string());
            return Err(self.alert(Action::QueryUsage, err));
        }
        let report = self
            .backend
            .account_usage(email)
            .await
            .map_err(|err| self.alert(Action::QueryUsage, err))?;
        if report.db_updated {
            self.reload().await;
        }
        Ok(report)
    }

    /// 后台同步额度，只记日志
    pub async fn update_usage_limit(&self, email: &str, usage_limit: i64) -> DashboardResult<()> {
        match self.backend.update_usage_limit(email, usage_limit).await {
            Ok(_) => {
                log::info!("usage limit of {} updated to {}", email, usage_limit);
                Ok(())
            }
            Err(err) => {
                log::warn!("failed to update usage limit of {}: {}", email, err);
                Err(err)
            }
        }
    }

    pub async fn use_token(&self, id: i64) -> DashboardResult<()> {
        if id <= 0 {
            let err = DashboardError::validation(Msg::InvalidAccountId.to_string());
            return Err(self.alert(Action::UseToken, err));
        }
        self.sink.busy(true);
        let result = self.backend.use_token(id).await;
        self.sink.busy(false);
        let ack = result.map_err(|err| self.alert(Action::UseToken, err))?;
        self.sink.notice(
            NoticeLevel::Success,
            ack.message.unwrap_or_else(|| Msg::TokenApplied.to_string()),
        );
        self.reload().await;
        Ok(())
    }

    /// 从当前页缓存里取 token
    pub fn copy_token(&self, id: i64) -> DashboardResult<String> {
        match self.accounts.find(id) {
            Some(account) if !account.token.is_empty() => {
                self.sink
                    .notice(NoticeLevel::Success, Msg::TokenCopied.to_string());
                Ok(account.token)
            }
            _ => {
                let err = DashboardError::validation(Msg::TokenNotFound.to_string());
                Err(self.alert(Action::CopyToken, err))
            }
        }
    }

    // 配置和维护

    pub async fn load_config(&self) -> DashboardResult<BackendConfig> {
        self.backend
            .load_config()
            .await
            .map_err(|err| self.alert(Action::LoadConfig, err))
    }

    pub async fn save_config(&self, config: BackendConfig) -> DashboardResult<()> {
        let config = config.normalized();
        self.sink.busy(true);
        let result = self.backend.save_config(&config).await;
        self.sink.busy(false);
        let ack = result.map_err(|err| self.alert(Action::SaveConfig, err))?;
        self.sink.notice(
            NoticeLevel::Success,
            ack.message.unwrap_or_else(|| Msg::ConfigSaved.to_string()),
        );
        Ok(())
    }

    pub async fn export_accounts(&self, path: impl AsRef<Path>) -> DashboardResult<()> {
        let path = path.as_ref();
        self.sink.busy(true);
        let result = self.backend.export_accounts().await;
        self.sink.busy(false);
        let content = result.map_err(|err| self.alert(Action::ExportAccounts, err))?;

        if let Err(err) = tokio::fs::write(path, &content).await {
            let err = DashboardError::application(Some(format!("{}: {}", path.display(), err)));
            return Err(self.alert(Action::ExportAccounts, err));
        }
        log::info!("exported {} bytes to {}", content.len(), path.display());
        self.sink.notice(
            NoticeLevel::Success,
            Msg::Exported {
                path: &path.display().to_string(),
            }
            .to_string(),
        );
        Ok(())
    }

    pub async fn import_accounts(&self, path: impl AsRef<Path>) -> DashboardResult<()> {
        let path = path.as_ref();
        let content = match tokio::fs::read(path).await {
            Ok(content) => content,
            Err(err) => {
                let err = DashboardError::validation(format!("{}: {}", path.display(), err));
                return Err(self.alert(Action::ImportAccounts, err));
            }
        };
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "accounts.csv".to_string());

        self.sink.busy(true);
        let result = self.backend.import_accounts(&file_name, content).await;
        self.sink.busy(false);
        let ack = result.map_err(|err| self.alert(Action::ImportAccounts, err))?;
        self.sink.notice(
            NoticeLevel::Success,
            ack.message.unwrap_or_else(|| Msg::Imported.to_string()),
        );
        self.reload().await;
        Ok(())
    }

    pub async fn restart_service(&self) -> DashboardResult<()> {
        let ack = self
            .backend
            .restart()
            .await
            .map_err(|err| self.alert(Action::Restart, err))?;
        self.sink.notice(
            NoticeLevel::Info,
            ack.message.unwrap_or_else(|| Msg::RestartRequested.to_string()),
        );
        Ok(())
    }

    pub async fn reset_machine(&self) -> DashboardResult<()> {
        self.sink.busy(true);
        let result = self.backend.reset_machine().await;
        self.sink.busy(false);
        let ack = result.map_err(|err| self.alert(Action::ResetMachine, err))?;
        self.sink.notice(
            NoticeLevel::Success,
            ack.message.unwrap_or_else(|| Msg::MachineReset.to_string()),
        );
        Ok(())
    }

    async fn reload(&self) {
        let _ = self.accounts.refresh(false).await;
    }

    fn alert(&self, action: Action, err: DashboardError) -> DashboardError {
        let level = match err {
            DashboardError::Validation(_) => NoticeLevel::Warning,
            _ => NoticeLevel::Danger,
        };
        self.sink.notice(level, err.notice_text(&action.to_string()));
        err
    }
}
