use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::notice::is_english_mode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    #[default]
    Stopped,
    Running,
    Monitoring, // 账号已满，只监控数量变化
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TaskStatistics {
    #[serde(default)]
    pub total_runs: u64,
    #[serde(default)]
    pub successful_runs: u64,
    #[serde(default)]
    pub failed_runs: u64,
    #[serde(default)]
    pub success_rate: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RegistrationDetails {
    #[serde(default)]
    pub last_run: Option<String>,
    #[serde(default)]
    pub next_run: Option<f64>, // unix 秒
    #[serde(default)]
    pub last_status: Option<String>,
    #[serde(default)]
    pub statistics: TaskStatistics,
}

/// `/registration/status` 的返回，客户端只读
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TaskStatus {
    #[serde(default)]
    pub task_status: TaskState,
    #[serde(default)]
    pub status_message: Option<String>,
    #[serde(default)]
    pub active_count: i64,
    #[serde(default)]
    pub max_accounts: i64,
    #[serde(default)]
    pub remaining_slots: i64,
    #[serde(default)]
    pub registration_details: RegistrationDetails,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    Pending,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationRequest {
    #[serde(deserialize_with = "de_string_or_number")]
    pub id: String,
    pub email: String,
    pub status: VerificationStatus,
    #[serde(default)]
    pub auto_failure: bool,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Disabled,
    Deleted,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Disabled => "disabled",
            AccountStatus::Deleted => "deleted",
        }
    }

    pub fn label(&self) -> &'static str {
        let is_english = is_english_mode();
        match self {
            AccountStatus::Active => {
                if is_english {
                    "active"
                } else {
                    "正常"
                }
            }
            AccountStatus::Disabled => {
                if is_english {
                    "disabled"
                } else {
                    "停用"
                }
            }
            AccountStatus::Deleted => {
                if is_english {
                    "deleted"
                } else {
                    "删除"
                }
            }
        }
    }
}

impl FromStr for AccountStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(AccountStatus::Active),
            "disabled" => Ok(AccountStatus::Disabled),
            "deleted" => Ok(AccountStatus::Deleted),
            other => Err(format!("unknown account status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    #[serde(default)]
    pub id: Option<i64>,
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub token: String,
    pub status: AccountStatus,
    // 后端有时把额度存成字符串
    #[serde(default, deserialize_with = "de_lenient_i64")]
    pub usage_limit: Option<i64>,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    #[default]
    CreatedAt,
    Email,
    UsageLimit,
}

impl SortField {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortField::CreatedAt => "created_at",
            SortField::Email => "email",
            SortField::UsageLimit => "usage_limit",
        }
    }
}

impl FromStr for SortField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "created_at" => Ok(SortField::CreatedAt),
            "email" => Ok(SortField::Email),
            "usage_limit" => Ok(SortField::UsageLimit),
            other => Err(format!("unknown sort field: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "asc" => Ok(SortOrder::Asc),
            "desc" => Ok(SortOrder::Desc),
            other => Err(format!("unknown sort order: {}", other)),
        }
    }
}

/// 账号列表的查询参数，只由 `AccountListState` 修改
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountListQuery {
    pub page: u32,
    pub per_page: u32,
    pub sort_field: SortField,
    pub sort_order: SortOrder,
    pub search: String,
}

impl Default for AccountListQuery {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: 10,
            sort_field: SortField::CreatedAt,
            sort_order: SortOrder::Desc,
            search: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub total_pages: u32,
    #[serde(default)]
    pub per_page: u32,
    #[serde(default)]
    pub total_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortInfo {
    pub field: SortField,
    pub order: SortOrder,
}

/// 一页账号及其分页信息，整体替换缓存
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AccountPage {
    #[serde(default)]
    pub data: Vec<AccountRecord>,
    #[serde(default)]
    pub pagination: Pagination,
    #[serde(default)]
    pub sort: Option<SortInfo>,
}

/// 账号定位方式，有 id 时优先用 id
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountRef {
    Id(i64),
    Email(String),
}

impl AccountRef {
    pub fn of(record: &AccountRecord) -> Self {
        match record.id {
            Some(id) => AccountRef::Id(id),
            None => AccountRef::Email(record.email.clone()),
        }
    }
}

impl fmt::Display for AccountRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountRef::Id(id) => write!(f, "(ID:{})", id),
            AccountRef::Email(email) => f.write_str(email),
        }
    }
}

impl FromStr for AccountRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("empty account reference".to_string());
        }
        match s.parse::<i64>() {
            Ok(id) => Ok(AccountRef::Id(id)),
            Err(_) => Ok(AccountRef::Email(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UsageDetail {
    #[serde(default)]
    pub remaining_balance: Option<f64>,
    #[serde(default)]
    pub total_limit: f64,
    #[serde(default)]
    pub used_limit: f64,
    #[serde(default)]
    pub remaining_days: Option<f64>,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UsageReport {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub usage: UsageDetail,
    #[serde(default)]
    pub db_updated: bool,
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// 后端 `/config` 的配置项，字段名沿用后端的大写写法
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(rename = "BROWSER_HEADLESS", default)]
    pub browser_headless: bool,
    #[serde(rename = "DYNAMIC_USERAGENT", default)]
    pub dynamic_useragent: bool,
    #[serde(rename = "BROWSER_USER_AGENT", default)]
    pub browser_user_agent: String,
    #[serde(rename = "MAX_ACCOUNTS", default)]
    pub max_accounts: i64,
    #[serde(rename = "EMAIL_DOMAINS", default)]
    pub email_domains: String,
    #[serde(rename = "EMAIL_USERNAME", default)]
    pub email_username: String,
    #[serde(rename = "EMAIL_PIN", default)]
    pub email_pin: String,
    #[serde(rename = "BROWSER_PATH", default)]
    pub browser_path: Option<String>,
    #[serde(rename = "CURSOR_PATH", default)]
    pub cursor_path: Option<String>,
}

impl BackendConfig {
    /// 动态 UA 开启时不保存固定 UA
    pub fn normalized(mut self) -> Self {
        if self.dynamic_useragent {
            self.browser_user_agent.clear();
        }
        self
    }
}

/// 只带提示信息的后端应答
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Ack {
    pub message: Option<String>,
}

fn de_lenient_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Some(serde_json::Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .map(|f| f as i64),
        _ => None,
    })
}

fn de_string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match value {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {}",
            other
        ))),
    }
}
