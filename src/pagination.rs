use std::sync::Arc;

use async_trait::async_trait;
use metrics::increment_counter;
use tracing::warn;

use crate::models::{Id, LikedVideo, TimePeriod, TrendingSort, TrendingVideo};
use crate::repo::{Repo, RepoError, RepoResult};

pub const LIKED_PAGE_SIZE: usize = 12;
pub const TRENDING_PAGE_SIZE: usize = 20;

/// Offset/limit window over some remote listing.
#[async_trait]
pub trait PageSource: Send + Sync {
    type Item: Clone + Send;
    fn name(&self) -> &'static str;
    async fn fetch(&self, offset: usize, limit: usize) -> RepoResult<Vec<Self::Item>>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum PageLoad {
    Appended(usize),
    /// Nothing more to fetch; no call was made.
    Exhausted,
    Failed(RepoError),
}

/// Accumulates pages from a [`PageSource`]. A failed page keeps what is loaded and
/// leaves the offset untouched so the same window is retried.
pub struct PagedList<S: PageSource> {
    source: S,
    page_size: usize,
    items: Vec<S::Item>,
    offset: usize,
    has_more: bool,
    last_error: Option<RepoError>,
}

impl<S: PageSource> PagedList<S> {
    pub fn new(source: S, page_size: usize) -> Self {
        Self {
            source,
            page_size: page_size.max(1),
            items: Vec::new(),
            offset: 0,
            has_more: true,
            last_error: None,
        }
    }

    /// Resume a listing a client has already paged through up to `offset`.
    pub fn starting_at(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub async fn load_next(&mut self) -> PageLoad {
        if !self.has_more {
            return PageLoad::Exhausted;
        }
        match self.source.fetch(self.offset, self.page_size).await {
            Ok(page) => {
                let n = page.len();
                self.has_more = n == self.page_size;
                self.offset += n;
                self.items.extend(page);
                self.last_error = None;
                PageLoad::Appended(n)
            }
            Err(e) => {
                warn!(source = self.source.name(), offset = self.offset, error = %e, "page fetch failed");
                increment_counter!("videome_page_fetch_failures_total", "source" => self.source.name());
                self.last_error = Some(e.clone());
                PageLoad::Failed(e)
            }
        }
    }

    /// Drop everything and start again from offset zero.
    pub fn reset(&mut self) {
        self.items.clear();
        self.offset = 0;
        self.has_more = true;
        self.last_error = None;
    }

    pub fn items(&self) -> &[S::Item] {
        &self.items
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn last_error(&self) -> Option<&RepoError> {
        self.last_error.as_ref()
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Remove items locally (e.g. after an unlike). The offset shrinks with them
    /// because the remote listing no longer contains those rows either.
    pub fn remove_where<F>(&mut self, mut pred: F) -> usize
    where
        F: FnMut(&S::Item) -> bool,
    {
        let before = self.items.len();
        self.items.retain(|it| !pred(it));
        let removed = before - self.items.len();
        self.offset = self.offset.saturating_sub(removed);
        removed
    }
}

pub struct LikedVideosSource {
    pub repo: Arc<dyn Repo>,
    pub user: Id,
}

#[async_trait]
impl PageSource for LikedVideosSource {
    type Item = LikedVideo;

    fn name(&self) -> &'static str {
        "liked"
    }

    async fn fetch(&self, offset: usize, limit: usize) -> RepoResult<Vec<LikedVideo>> {
        self.repo.liked_videos(self.user, limit, offset).await
    }
}

pub struct TrendingSource {
    pub repo: Arc<dyn Repo>,
    pub period: TimePeriod,
    pub sort: TrendingSort,
}

#[async_trait]
impl PageSource for TrendingSource {
    type Item = TrendingVideo;

    fn name(&self) -> &'static str {
        "trending"
    }

    async fn fetch(&self, offset: usize, limit: usize) -> RepoResult<Vec<TrendingVideo>> {
        self.repo.trending_videos(self.period, self.sort, limit, offset).await
    }
}

pub fn liked_list(repo: Arc<dyn Repo>, user: Id) -> PagedList<LikedVideosSource> {
    PagedList::new(LikedVideosSource { repo, user }, LIKED_PAGE_SIZE)
}

pub fn trending_list(repo: Arc<dyn Repo>, period: TimePeriod, sort: TrendingSort) -> PagedList<TrendingSource> {
    PagedList::new(TrendingSource { repo, period, sort }, TRENDING_PAGE_SIZE)
}
