use thiserror::Error;

use crate::notice::is_english_mode;

/// 后端交互的三类失败。
///
/// 所有操作都把失败收敛到这里，调用方只需要把它转换成提示即可，
/// 不会有错误越过操作边界。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DashboardError {
    /// 本地预检失败（邮箱格式、空验证码等），从不发出网络请求
    #[error("validation failed: {0}")]
    Validation(String),
    /// 网络/DNS/超时
    #[error("transport error: {0}")]
    Transport(String),
    /// 后端返回 success:false
    #[error("application error: {}", .0.as_deref().unwrap_or("unknown"))]
    Application(Option<String>),
}

pub type DashboardResult<T> = Result<T, DashboardError>;

impl DashboardError {
    pub fn validation(message: impl Into<String>) -> Self {
        DashboardError::Validation(message.into())
    }

    pub fn application(message: Option<String>) -> Self {
        DashboardError::Application(message.filter(|m| !m.trim().is_empty()))
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, DashboardError::Transport(_))
    }

    /// 面向操作员的提示文案，`action` 是失败的动作名称（例如“启动任务”）。
    pub fn notice_text(&self, action: &str) -> String {
        let is_english = is_english_mode();
        match self {
            DashboardError::Validation(message) => message.clone(),
            DashboardError::Transport(_) => {
                if is_english {
                    format!("{} failed, please try again later", action)
                } else {
                    format!("{}失败，请稍后重试", action)
                }
            }
            DashboardError::Application(message) => {
                let fallback = if is_english { "unknown error" } else { "未知错误" };
                let message = message.as_deref().unwrap_or(fallback);
                if is_english {
                    format!("{} failed: {}", action, message)
                } else {
                    format!("{}失败: {}", action, message)
                }
            }
        }
    }
}

impl From<reqwest::Error> for DashboardError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return DashboardError::Application(Some(format!("malformed response: {}", err)));
        }
        DashboardError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for DashboardError {
    fn from(err: serde_json::Error) -> Self {
        DashboardError::Application(Some(format!("malformed response: {}", err)))
    }
}
