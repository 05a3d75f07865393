use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::json;
use uuid::Uuid;
use videome::pagination::{liked_list, PageLoad, PageSource, PagedList, LIKED_PAGE_SIZE};
use videome::repo::{RepoError, RepoResult};

/// `total` numbered rows; fails while `fail` is set.
struct Numbers {
    total: usize,
    fail: AtomicBool,
    fetches: AtomicUsize,
}

impl Numbers {
    fn new(total: usize) -> Self {
        Self { total, fail: AtomicBool::new(false), fetches: AtomicUsize::new(0) }
    }
}

struct Source(Arc<Numbers>);

#[async_trait::async_trait]
impl PageSource for Source {
    type Item = usize;

    fn name(&self) -> &'static str {
        "numbers"
    }

    async fn fetch(&self, offset: usize, limit: usize) -> RepoResult<Vec<usize>> {
        let n = &self.0;
        n.fetches.fetch_add(1, Ordering::SeqCst);
        if n.fail.load(Ordering::SeqCst) {
            return Err(RepoError::Remote("offline".into()));
        }
        Ok((offset..(offset + limit).min(n.total)).collect())
    }
}

#[tokio::test]
async fn full_page_means_more_short_page_means_done() {
    let src = Arc::new(Numbers::new(12 + 11));
    let mut list = PagedList::new(Source(src.clone()), LIKED_PAGE_SIZE);

    assert_eq!(list.load_next().await, PageLoad::Appended(12));
    assert!(list.has_more());
    assert_eq!(list.load_next().await, PageLoad::Appended(11));
    assert!(!list.has_more());
    assert_eq!(list.items().len(), 23);

    assert_eq!(list.load_next().await, PageLoad::Exhausted);
    assert_eq!(src.fetches.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn exact_multiple_needs_one_empty_probe() {
    let src = Arc::new(Numbers::new(12));
    let mut list = PagedList::new(Source(src), 12);
    list.load_next().await;
    assert!(list.has_more());
    assert_eq!(list.load_next().await, PageLoad::Appended(0));
    assert!(!list.has_more());
}

#[tokio::test]
async fn failed_page_keeps_rows_and_retries_same_offset() {
    let src = Arc::new(Numbers::new(30));
    let mut list = PagedList::new(Source(src.clone()), 12);
    list.load_next().await;

    src.fail.store(true, Ordering::SeqCst);
    assert!(matches!(list.load_next().await, PageLoad::Failed(_)));
    assert_eq!(list.items().len(), 12);
    assert_eq!(list.offset(), 12);
    assert!(list.last_error().is_some());
    assert!(list.has_more());

    src.fail.store(false, Ordering::SeqCst);
    assert_eq!(list.load_next().await, PageLoad::Appended(12));
    assert_eq!(list.items()[12], 12);
    assert!(list.last_error().is_none());
}

#[tokio::test]
async fn local_removal_and_reset() {
    let src = Arc::new(Numbers::new(30));
    let mut list = PagedList::new(Source(src), 12);
    list.load_next().await;

    assert_eq!(list.remove_where(|n| n % 2 == 0), 6);
    assert_eq!(list.offset(), 6);
    list.reset();
    assert!(list.items().is_empty());
    assert_eq!(list.offset(), 0);
}

#[cfg(feature = "inmem-store")]
#[tokio::test]
async fn liked_videos_come_from_the_procedure() {
    use videome::gateway::inmem::InMemGateway;
    use videome::repo::{GatewayRepo, Repo};

    let gw = InMemGateway::new();
    let user = Uuid::new_v4();
    gw.register_rpc("get_liked_videos", move |params| {
        assert_eq!(params["page_limit"], 12);
        let offset = params["page_offset"].as_u64().unwrap_or(0) as usize;
        let rows: Vec<_> = (offset..(offset + 12).min(14))
            .map(|i| {
                json!({
                    "id": Uuid::new_v4(),
                    "title": format!("clip {i}"),
                    "user_id": Uuid::new_v4(),
                    "created_at": "2024-02-01T00:00:00Z",
                })
            })
            .collect();
        Ok(json!(rows))
    });
    let repo: Arc<dyn Repo> = Arc::new(GatewayRepo::new(Arc::new(gw.clone())));
    let mut list = liked_list(repo, user);

    assert_eq!(list.load_next().await, PageLoad::Appended(12));
    assert_eq!(list.load_next().await, PageLoad::Appended(2));
    assert!(!list.has_more());
    assert_eq!(list.items()[13].title, "clip 13");
    assert_eq!(gw.calls(), vec!["rpc:get_liked_videos", "rpc:get_liked_videos"]);
}
