use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::model::{SortField, SortOrder};

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct Settings {
    pub base_url: String,
    pub language: String,
    pub status_interval_secs: u64,
    /// 保存后端配置用的 HTTP 方法，旧版后端只接受 PUT
    pub config_save_method: ConfigSaveMethod,
    pub verification: VerificationSettings,
    pub task: TaskSettings,
    pub list: ListSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_string(),
            language: "zh".to_string(),
            status_interval_secs: 10,
            config_save_method: ConfigSaveMethod::default(),
            verification: VerificationSettings::default(),
            task: TaskSettings::default(),
            list: ListSettings::default(),
        }
    }
}

impl Settings {
    /// 读取 YAML 配置，文件不存在时使用默认值
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            log::info!("settings file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read settings file {}", path.display()))?;
        let settings: Settings = serde_yaml::from_str(&text)
            .with_context(|| format!("failed to parse settings file {}", path.display()))?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> anyhow::Result<()> {
        url::Url::parse(&self.base_url)
            .with_context(|| format!("invalid base_url: {}", self.base_url))?;
        if self.status_interval_secs == 0 || self.verification.poll_interval_secs == 0 {
            anyhow::bail!("polling intervals must be positive");
        }
        if self.list.per_page == 0 {
            anyhow::bail!("list.per_page must be positive");
        }
        Ok(())
    }

    pub fn is_english(&self) -> bool {
        self.language.eq_ignore_ascii_case("en")
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(self.status_interval_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConfigSaveMethod {
    #[default]
    Post,
    Put,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct VerificationSettings {
    pub poll_interval_secs: u64,
    pub backoff_secs: u64,
    pub modal_retry_ms: u64,
    pub submit_refresh_delay_ms: u64,
}

impl Default for VerificationSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            backoff_secs: 10,
            modal_retry_ms: 500,
            submit_refresh_delay_ms: 2000,
        }
    }
}

impl VerificationSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_secs(self.backoff_secs)
    }

    pub fn modal_retry(&self) -> Duration {
        Duration::from_millis(self.modal_retry_ms)
    }

    pub fn submit_refresh_delay(&self) -> Duration {
        Duration::from_millis(self.submit_refresh_delay_ms)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct TaskSettings {
    pub verification_start_delay_ms: u64,
    pub custom_refresh_delay_ms: u64,
}

impl Default for TaskSettings {
    fn default() -> Self {
        Self {
            verification_start_delay_ms: 500,
            custom_refresh_delay_ms: 2000,
        }
    }
}

impl TaskSettings {
    pub fn verification_start_delay(&self) -> Duration {
        Duration::from_millis(self.verification_start_delay_ms)
    }

    pub fn custom_refresh_delay(&self) -> Duration {
        Duration::from_millis(self.custom_refresh_delay_ms)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ListSettings {
    pub per_page: u32,
    pub sort_field: SortField,
    pub sort_order: SortOrder,
}

impl Default for ListSettings {
    fn default() -> Self {
        Self {
            per_page: 10,
            sort_field: SortField::CreatedAt,
            sort_order: SortOrder::Desc,
        }
    }
}
