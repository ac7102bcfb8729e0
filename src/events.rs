use chrono::{DateTime, Local};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::model::AccountPage;
use crate::notice::{Notice, NoticeLevel};
use crate::status::TaskStatusView;
use crate::verification::VerificationPrompt;

/// 推送给 UI 层的回调事件
#[derive(Debug, Clone, PartialEq)]
pub enum DashboardEvent {
    Notice(Notice),
    /// 阻塞式加载遮罩
    Busy(bool),
    StatusUpdated(TaskStatusView),
    AccountsUpdated(AccountPage),
    Refreshed(DateTime<Local>),
    PromptOpened(VerificationPrompt),
    PromptClosed { id: String },
    /// 自定义邮箱注册成功后清空输入框
    CustomInputCleared,
}

pub type EventReceiver = UnboundedReceiver<DashboardEvent>;

#[derive(Clone, Debug)]
pub struct EventSink {
    tx: UnboundedSender<DashboardEvent>,
    // 进行中的阻塞操作数，遮罩只在 0 <-> 1 时切换
    busy: Arc<AtomicUsize>,
}

impl EventSink {
    pub fn channel() -> (Self, EventReceiver) {
        let (tx, rx) = unbounded_channel();
        (
            Self {
                tx,
                busy: Arc::new(AtomicUsize::new(0)),
            },
            rx,
        )
    }

    pub fn emit(&self, event: DashboardEvent) {
        // UI 已经退出时直接丢弃
        if self.tx.send(event).is_err() {
            log::trace!("event receiver dropped");
        }
    }

    pub fn notice(&self, level: NoticeLevel, text: impl Into<String>) {
        let notice = Notice::new(level, text);
        match notice.level {
            NoticeLevel::Danger => log::error!("{}", notice.text),
            NoticeLevel::Warning => log::warn!("{}", notice.text),
            _ => log::info!("{}", notice.text),
        }
        self.emit(DashboardEvent::Notice(notice));
    }

    pub fn busy(&self, busy: bool) {
        if busy {
            if self.busy.fetch_add(1, Ordering::SeqCst) == 0 {
                self.emit(DashboardEvent::Busy(true));
            }
            return;
        }
        let previous = self
            .busy
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if previous == Ok(1) {
            self.emit(DashboardEvent::Busy(false));
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst) > 0
    }
}
