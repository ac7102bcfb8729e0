//! 单元测试用的脚本化后端

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use crate::error::{DashboardError, DashboardResult};
use crate::events::{DashboardEvent, EventReceiver};
use crate::gateway::Backend;
use crate::lock;
use crate::model::{
    AccountListQuery, AccountPage, AccountRecord, AccountRef, AccountStatus, Ack, BackendConfig,
    Pagination, TaskStatus, UsageDetail, UsageReport, VerificationRequest, VerificationStatus,
};

pub fn drain(rx: &mut EventReceiver) -> Vec<DashboardEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn account(id: i64) -> AccountRecord {
    AccountRecord {
        id: Some(id),
        email: format!("user{}@example.com", id),
        password: format!("pw{}", id),
        token: format!("token-{}", id),
        status: AccountStatus::Active,
        usage_limit: Some(150),
        created_at: Some("2025-03-01T10:00:00".to_string()),
    }
}

pub fn page_of(count: i64, pagination: Pagination) -> AccountPage {
    AccountPage {
        data: (1..=count).map(account).collect(),
        pagination,
        sort: None,
    }
}

pub fn pending(id: &str, email: &str) -> VerificationRequest {
    VerificationRequest {
        id: id.to_string(),
        email: email.to_string(),
        status: VerificationStatus::Pending,
        auto_failure: false,
        message: None,
    }
}

pub fn failed(id: &str, email: &str) -> VerificationRequest {
    VerificationRequest {
        status: VerificationStatus::Failed,
        auto_failure: true,
        message: Some("mailbox timeout".to_string()),
        ..pending(id, email)
    }
}

/// 记录每次调用；可以预置失败，也可以用 `gate` 卡住某个调用来制造乱序返回
#[derive(Default)]
pub struct FakeBackend {
    calls: Mutex<Vec<String>>,
    statuses: Mutex<VecDeque<TaskStatus>>,
    last_status: Mutex<TaskStatus>,
    pages: Mutex<HashMap<u32, AccountPage>>,
    pending: Mutex<Vec<VerificationRequest>>,
    failures: Mutex<HashMap<String, VecDeque<DashboardError>>>,
    gates: Mutex<HashMap<String, VecDeque<Arc<Notify>>>>,
    config: Mutex<BackendConfig>,
}

impl FakeBackend {
    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    pub fn push_status(&self, status: TaskStatus) {
        lock(&self.statuses).push_back(status);
    }

    pub fn set_page(&self, page: u32, content: AccountPage) {
        lock(&self.pages).insert(page, content);
    }

    pub fn set_pending(&self, requests: Vec<VerificationRequest>) {
        *lock(&self.pending) = requests;
    }

    /// `key` 可以是操作名（"list"）或完整调用（"list:2"）
    pub fn fail_next(&self, key: &str, err: DashboardError) {
        lock(&self.failures)
            .entry(key.to_string())
            .or_default()
            .push_back(err);
    }

    /// 下一次 `key` 调用会等到返回的 Notify 被唤醒
    pub fn gate(&self, key: &str) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        lock(&self.gates)
            .entry(key.to_string())
            .or_default()
            .push_back(notify.clone());
        notify
    }

    pub fn gate_status(&self) -> Arc<Notify> {
        self.gate("status")
    }

    async fn enter(&self, op: &str, call: String) -> DashboardResult<()> {
        lock(&self.calls).push(call.clone());
        let gate = {
            let mut gates = lock(&self.gates);
            match gates.get_mut(&call).and_then(VecDeque::pop_front) {
                Some(gate) => Some(gate),
                None => gates.get_mut(op).and_then(VecDeque::pop_front),
            }
        };
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let mut failures = lock(&self.failures);
        match failures.get_mut(&call).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => match failures.get_mut(op).and_then(VecDeque::pop_front) {
                Some(err) => Err(err),
                None => Ok(()),
            },
        }
    }

    async fn ack(&self, op: &str, call: String) -> DashboardResult<Ack> {
        self.enter(op, call).await?;
        Ok(Ack {
            message: Some(format!("{} ok", op)),
        })
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn list_accounts(&self, query: &AccountListQuery) -> DashboardResult<AccountPage> {
        self.enter("list", format!("list:{}", query.page)).await?;
        let page = lock(&self.pages).get(&query.page).cloned();
        Ok(page.unwrap_or_else(|| AccountPage {
            data: Vec::new(),
            pagination: Pagination {
                page: query.page,
                total_pages: 5,
                per_page: query.per_page,
                total_count: 5 * query.per_page as u64,
            },
            sort: None,
        }))
    }

    async fn task_status(&self) -> DashboardResult<TaskStatus> {
        // 先取值再等待，模拟请求发出时后端的状态
        let next = lock(&self.statuses).pop_front();
        let status = match next {
            Some(status) => {
                *lock(&self.last_status) = status.clone();
                status
            }
            None => lock(&self.last_status).clone(),
        };
        self.enter("status", "status".to_string()).await?;
        Ok(status)
    }

    async fn start_task(&self) -> DashboardResult<Ack> {
        self.ack("start", "start".to_string()).await
    }

    async fn stop_task(&self) -> DashboardResult<Ack> {
        self.ack("stop", "stop".to_string()).await
    }

    async fn register_custom(&self, email: &str) -> DashboardResult<Ack> {
        self.ack("custom", format!("custom:{}", email)).await
    }

    async fn pending_verifications(&self) -> DashboardResult<Vec<VerificationRequest>> {
        self.enter("pending", "pending".to_string()).await?;
        Ok(lock(&self.pending).clone())
    }

    async fn clear_verifications(&self) -> DashboardResult<Ack> {
        lock(&self.pending).clear();
        self.ack("clear", "clear".to_string()).await
    }

    async fn submit_verification(&self, id: &str, code: &str) -> DashboardResult<Ack> {
        self.ack("submit", format!("submit:{}:{}", id, code)).await?;
        lock(&self.pending).retain(|r| r.id != id);
        Ok(Ack { message: None })
    }

    async fn update_account_status(
        &self,
        target: &AccountRef,
        status: AccountStatus,
    ) -> DashboardResult<Ack> {
        self.ack("account-status", format!("account-status:{}:{}", target, status.as_str()))
            .await
    }

    async fn delete_account(&self, target: &AccountRef, hard_delete: bool) -> DashboardResult<Ack> {
        self.ack("delete", format!("delete:{}:{}", target, hard_delete))
            .await
    }

    async fn account_usage(&self, email: &str) -> DashboardResult<UsageReport> {
        self.enter("usage", format!("usage:{}", email)).await?;
        Ok(UsageReport {
            email: email.to_string(),
            usage: UsageDetail {
                remaining_balance: Some(120.0),
                total_limit: 150.0,
                used_limit: 30.0,
                remaining_days: Some(9.0),
                status: "active".to_string(),
            },
            db_updated: true,
            timestamp: None,
        })
    }

    async fn update_usage_limit(&self, email: &str, usage_limit: i64) -> DashboardResult<Ack> {
        self.ack("update-usage", format!("update-usage:{}:{}", email, usage_limit))
            .await
    }

    async fn use_token(&self, id: i64) -> DashboardResult<Ack> {
        self.ack("use-token", format!("use-token:{}", id)).await
    }

    async fn load_config(&self) -> DashboardResult<BackendConfig> {
        self.enter("config", "config:get".to_string()).await?;
        Ok(lock(&self.config).clone())
    }

    async fn save_config(&self, config: &BackendConfig) -> DashboardResult<Ack> {
        self.ack("config", "config:save".to_string()).await?;
        *lock(&self.config) = config.clone();
        Ok(Ack { message: None })
    }

    async fn export_accounts(&self) -> DashboardResult<Vec<u8>> {
        self.enter("export", "export".to_string()).await?;
        Ok(b"id,email\n1,user1@example.com\n".to_vec())
    }

    async fn import_accounts(&self, file_name: &str, content: Vec<u8>) -> DashboardResult<Ack> {
        self.ack("import", format!("import:{}:{}", file_name, content.len()))
            .await
    }

    async fn restart(&self) -> DashboardResult<Ack> {
        self.ack("restart", "restart".to_string()).await
    }

    async fn reset_machine(&self) -> DashboardResult<Ack> {
        self.ack("reset-machine", "reset-machine".to_string()).await
    }
}
