use std::sync::{Arc, Mutex};

use crate::error::{DashboardError, DashboardResult};
use crate::events::{DashboardEvent, EventSink};
use crate::gateway::Backend;
use crate::lock;
use crate::model::{AccountListQuery, AccountPage, AccountRecord, SortField, SortOrder};
use crate::notice::{Action, NoticeLevel};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Applied,
    /// 有更新的请求已经发出，这次的响应被丢弃
    Discarded,
}

struct ListInner {
    query: AccountListQuery,
    generation: u64,
    cached: Option<AccountPage>,
}

/// 分页、排序、搜索参数以及当前页缓存
pub struct AccountListState<B: Backend> {
    backend: Arc<B>,
    sink: EventSink,
    inner: Arc<Mutex<ListInner>>,
}

impl<B: Backend> Clone for AccountListState<B> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            sink: self.sink.clone(),
            inner: self.inner.clone(),
        }
    }
}

impl<B: Backend> AccountListState<B> {
    pub fn new(backend: Arc<B>, sink: EventSink, query: AccountListQuery) -> Self {
        Self {
            backend,
            sink,
            inner: Arc::new(Mutex::new(ListInner {
                query,
                generation: 0,
                cached: None,
            })),
        }
    }

    pub fn query(&self) -> AccountListQuery {
        lock(&self.inner).query.clone()
    }

    pub fn cached(&self) -> Option<AccountPage> {
        lock(&self.inner).cached.clone()
    }

    pub fn find(&self, id: i64) -> Option<AccountRecord> {
        let inner = lock(&self.inner);
        inner
            .cached
            .as_ref()
            .and_then(|page| page.data.iter().find(|a| a.id == Some(id)).cloned())
    }

    pub async fn set_page(&self, page: u32) -> DashboardResult<FetchOutcome> {
        if page == 0 {
            return Err(DashboardError::validation("page must be at least 1"));
        }
        lock(&self.inner).query.page = page;
        self.refresh(false).await
    }

    pub async fn set_sort(&self, field: SortField, order: SortOrder) -> DashboardResult<FetchOutcome> {
        {
            let mut inner = lock(&self.inner);
            inner.query.sort_field = field;
            inner.query.sort_order = order;
            inner.query.page = 1;
        }
        self.refresh(false).await
    }

    pub async fn set_search(&self, term: &str) -> DashboardResult<FetchOutcome> {
        {
            let mut inner = lock(&self.inner);
            inner.query.search = term.trim().to_string();
            inner.query.page = 1;
        }
        self.refresh(false).await
    }

    pub async fn set_per_page(&self, per_page: u32) -> DashboardResult<FetchOutcome> {
        if per_page == 0 {
            return Err(DashboardError::validation("per_page must be positive"));
        }
        {
            let mut inner = lock(&self.inner);
            inner.query.per_page = per_page;
            inner.query.page = 1;
        }
        self.refresh(false).await
    }

    /// 用当前查询拉取一页。`silent` 时不显示加载遮罩，失败只记日志。
    pub async fn refresh(&self, silent: bool) -> DashboardResult<FetchOutcome> {
        let (query, generation) = {
            let mut inner = lock(&self.inner);
            inner.generation += 1;
            (inner.query.clone(), inner.generation)
        };

        if !silent {
            self.sink.busy(true);
        }
        let result = self.backend.list_accounts(&query).await;
        if !silent {
            self.sink.busy(false);
        }

        match result {
            Ok(page) => {
                let mut inner = lock(&self.inner);
                if inner.generation != generation {
                    log::debug!(
                        "discarding stale account page {} (request #{}, latest #{})",
                        query.page,
                        generation,
                        inner.generation
                    );
                    return Ok(FetchOutcome::Discarded);
                }
                inner.cached = Some(page.clone());
                self.sink.emit(DashboardEvent::AccountsUpdated(page));
                Ok(FetchOutcome::Applied)
            }
            Err(err) => {
                let superseded = lock(&self.inner).generation != generation;
                if superseded {
                    log::debug!("superseded account request for page {} failed: {}", query.page, err);
                } else if silent {
                    log::warn!("silent account refresh failed: {}", err);
                } else {
                    self.sink
                        .notice(NoticeLevel::Danger, err.notice_text(&Action::LoadData.to_string()));
                }
                Err(err)
            }
        }
    }
}
