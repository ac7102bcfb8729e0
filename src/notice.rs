use lazy_static::lazy_static;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

lazy_static! {
    static ref IS_ENGLISH: AtomicBool = AtomicBool::new(false);
}

pub fn is_english_mode() -> bool {
    IS_ENGLISH.load(Ordering::Relaxed)
}

pub fn set_english_mode(enabled: bool) {
    IS_ENGLISH.store(enabled, Ordering::Relaxed);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Success,
    Info,
    Warning,
    Danger,
}

/// 短暂显示给操作员的提示
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub text: String,
}

impl Notice {
    pub fn new(level: NoticeLevel, text: impl Into<String>) -> Self {
        Self {
            level,
            text: text.into(),
        }
    }
}

/// 失败提示里使用的动作名称
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    LoadData,
    StartTask,
    StopTask,
    CustomRegistration,
    SubmitCode,
    UpdateStatus,
    DeleteAccount,
    QueryUsage,
    UseToken,
    CopyToken,
    LoadConfig,
    SaveConfig,
    ExportAccounts,
    ImportAccounts,
    Restart,
    ResetMachine,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (en, zh) = match self {
            Action::LoadData => ("Loading data", "加载数据"),
            Action::StartTask => ("Starting the task", "启动任务"),
            Action::StopTask => ("Stopping the task", "停止任务"),
            Action::CustomRegistration => ("Custom registration", "自定义邮箱注册"),
            Action::SubmitCode => ("Submitting the code", "提交验证码"),
            Action::UpdateStatus => ("Updating account status", "更新账号状态"),
            Action::DeleteAccount => ("Deleting the account", "删除账号"),
            Action::QueryUsage => ("Querying usage", "获取账号用量"),
            Action::UseToken => ("Using the token", "使用Token"),
            Action::CopyToken => ("Copying the token", "复制Token"),
            Action::LoadConfig => ("Loading config", "加载配置"),
            Action::SaveConfig => ("Saving config", "保存配置"),
            Action::ExportAccounts => ("Exporting accounts", "导出账号"),
            Action::ImportAccounts => ("Importing accounts", "导入账号"),
            Action::Restart => ("Restarting the service", "重启服务"),
            Action::ResetMachine => ("Resetting the machine id", "重置机器码"),
        };
        f.write_str(if is_english_mode() { en } else { zh })
    }
}

/// 固定的提示文案
pub enum Msg<'a> {
    TaskStarted,
    TaskStopped,
    CustomRegistrationDone,
    CustomRegistrationBusy,
    InvalidEmail,
    InvalidAccountId,
    EmptyVerificationInput,
    CodeSubmitted,
    VerificationAutoFailed { email: &'a str, detail: Option<&'a str> },
    StatusChanged { account: &'a str, label: &'a str },
    AccountDeleted { account: &'a str },
    TokenCopied,
    TokenApplied,
    TokenNotFound,
    ConfigSaved,
    Exported { path: &'a str },
    Imported,
    RestartRequested,
    MachineReset,
}

impl fmt::Display for Msg<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let is_english = is_english_mode();
        match self {
            Msg::TaskStarted => f.write_str(if is_english {
                "Registration task started"
            } else {
                "定时任务已成功启动"
            }),
            Msg::TaskStopped => f.write_str(if is_english {
                "Registration task stopped"
            } else {
                "定时任务已成功停止"
            }),
            Msg::CustomRegistrationDone => f.write_str(if is_english {
                "Custom email registration finished"
            } else {
                "自定义邮箱注册完成"
            }),
            Msg::CustomRegistrationBusy => f.write_str(if is_english {
                "A custom registration is already running"
            } else {
                "已有自定义邮箱注册正在进行"
            }),
            Msg::InvalidAccountId => f.write_str(if is_english {
                "Invalid account id"
            } else {
                "账号ID无效"
            }),
            Msg::InvalidEmail => f.write_str(if is_english {
                "Please enter a valid email address"
            } else {
                "请输入有效的邮箱地址"
            }),
            Msg::EmptyVerificationInput => f.write_str(if is_english {
                "Verification code must not be empty"
            } else {
                "验证码不能为空"
            }),
            Msg::CodeSubmitted => f.write_str(if is_english {
                "Verification code submitted"
            } else {
                "验证码已提交"
            }),
            Msg::VerificationAutoFailed { email, detail } => {
                let detail = detail.unwrap_or("");
                if is_english {
                    write!(
                        f,
                        "Automatic code fetch failed for {}, waiting for manual input. {}",
                        email, detail
                    )
                } else {
                    write!(f, "{} 自动获取验证码失败，等待手动输入。{}", email, detail)
                }
            }
            Msg::StatusChanged { account, label } => {
                if is_english {
                    write!(f, "Account {} set to {}", account, label)
                } else {
                    write!(f, "账号 {} 已成功设置为{}状态", account, label)
                }
            }
            Msg::AccountDeleted { account } => {
                if is_english {
                    write!(f, "Account {} deleted", account)
                } else {
                    write!(f, "账号 {} 已成功删除", account)
                }
            }
            Msg::TokenCopied => f.write_str(if is_english {
                "Token copied"
            } else {
                "复制成功，Token已复制到剪贴板"
            }),
            Msg::TokenApplied => f.write_str(if is_english {
                "Token applied to the local client"
            } else {
                "Token 已应用到本地客户端"
            }),
            Msg::TokenNotFound => f.write_str(if is_english {
                "Account not found on the current page"
            } else {
                "当前页面没有该账号"
            }),
            Msg::ConfigSaved => f.write_str(if is_english {
                "Configuration saved"
            } else {
                "配置已成功保存"
            }),
            Msg::Exported { path } => {
                if is_english {
                    write!(f, "Accounts exported to {}", path)
                } else {
                    write!(f, "账号已导出到 {}", path)
                }
            }
            Msg::Imported => f.write_str(if is_english {
                "Accounts imported"
            } else {
                "账号导入成功"
            }),
            Msg::RestartRequested => f.write_str(if is_english {
                "Restart requested"
            } else {
                "已请求重启服务"
            }),
            Msg::MachineReset => f.write_str(if is_english {
                "Machine id reset"
            } else {
                "机器码已重置"
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_failed_message_names_the_email() {
        let text = Msg::VerificationAutoFailed {
            email: "a@b.io",
            detail: None,
        }
        .to_string();
        assert!(text.contains("a@b.io"));
    }

    #[test]
    fn notice_level_serializes_lowercase() {
        let json = serde_json::to_string(&Notice::new(NoticeLevel::Danger, "x")).unwrap();
        assert_eq!(json, r#"{"level":"danger","text":"x"}"#);
    }
}
