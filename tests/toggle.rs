use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use uuid::Uuid;
use videome::models::Id;
use videome::notify::{ToastQueue, Variant};
use videome::repo::{RepoError, RepoResult};
use videome::toggle::{
    RelationBackend, RelationKind, RelationRegistry, RelationState, Rejection, ToggleControl, ToggleOutcome,
};

struct MockRelation {
    kind: RelationKind,
    value: Mutex<bool>,
    fail: AtomicBool,
    reads: AtomicUsize,
    writes: AtomicUsize,
    gate: Option<Arc<Notify>>,
}

impl MockRelation {
    fn new(kind: RelationKind, value: bool) -> Self {
        Self {
            kind,
            value: Mutex::new(value),
            fail: AtomicBool::new(false),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
            gate: None,
        }
    }

    fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    fn remote_calls(&self) -> usize {
        self.reads.load(Ordering::SeqCst) + self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl RelationBackend for MockRelation {
    fn kind(&self) -> RelationKind {
        self.kind
    }

    async fn current(&self, _subject: Id, _target: Id) -> RepoResult<bool> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(*self.value.lock().unwrap())
    }

    async fn set(&self, _subject: Id, _target: Id, on: bool) -> RepoResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(RepoError::Remote("boom".into()));
        }
        *self.value.lock().unwrap() = on;
        Ok(())
    }
}

fn control(backend: Arc<MockRelation>, target: Id, viewer: Option<Id>, toasts: &ToastQueue) -> Arc<ToggleControl> {
    Arc::new(ToggleControl::new(backend, target, viewer, Arc::new(toasts.clone())))
}

#[tokio::test]
async fn like_is_confirmed_and_count_moves() {
    let backend = Arc::new(MockRelation::new(RelationKind::Like, false));
    let toasts = ToastQueue::new();
    let like = Arc::new(
        ToggleControl::new(backend.clone(), Uuid::new_v4(), Some(Uuid::new_v4()), Arc::new(toasts.clone())).with_count(10),
    );

    assert_eq!(like.load().await.unwrap(), Some(false));
    assert_eq!(like.toggle().await, ToggleOutcome::Confirmed(true));
    assert_eq!(like.displayed(), Some(true));
    assert_eq!(like.count(), Some(11));
    assert!(toasts.is_empty());

    assert_eq!(like.toggle().await, ToggleOutcome::Confirmed(false));
    assert_eq!(like.count(), Some(10));
}

#[tokio::test]
async fn failed_like_rolls_back_and_notifies() {
    let backend = Arc::new(MockRelation::new(RelationKind::Like, false));
    backend.fail.store(true, Ordering::SeqCst);
    let toasts = ToastQueue::new();
    let like = Arc::new(
        ToggleControl::new(backend.clone(), Uuid::new_v4(), Some(Uuid::new_v4()), Arc::new(toasts.clone())).with_count(10),
    );
    like.load().await.unwrap();

    assert_eq!(like.toggle().await, ToggleOutcome::RolledBack);
    assert_eq!(like.state(), RelationState::Known { value: false });
    assert_eq!(like.count(), Some(10));
    let shown = toasts.snapshot();
    assert_eq!(shown.len(), 1);
    assert_eq!(shown[0].variant, Variant::Destructive);
}

#[tokio::test]
async fn rollback_restores_a_stale_zero_count() {
    let backend = Arc::new(MockRelation::new(RelationKind::Like, true));
    backend.fail.store(true, Ordering::SeqCst);
    let toasts = ToastQueue::new();
    let like = ToggleControl::new(backend.clone(), Uuid::new_v4(), Some(Uuid::new_v4()), Arc::new(toasts.clone()))
        .with_count(0)
        .with_state(true);

    assert_eq!(like.toggle().await, ToggleOutcome::RolledBack);
    assert_eq!(like.displayed(), Some(true));
    assert_eq!(like.count(), Some(0));
    assert_eq!(toasts.len(), 1);
}

#[tokio::test]
async fn second_toggle_while_pending_is_ignored() {
    let gate = Arc::new(Notify::new());
    let backend = Arc::new(MockRelation::new(RelationKind::Like, false).gated(gate.clone()));
    let toasts = ToastQueue::new();
    let like = Arc::new(
        ToggleControl::new(backend.clone(), Uuid::new_v4(), Some(Uuid::new_v4()), Arc::new(toasts.clone())).with_count(3),
    );
    like.load().await.unwrap();

    let pending = like.clone();
    let first = tokio::spawn(async move { pending.toggle().await });
    while !matches!(like.state(), RelationState::Pending { .. }) {
        tokio::task::yield_now().await;
    }
    // optimistic view while the call is in flight
    assert_eq!(like.displayed(), Some(true));
    assert_eq!(like.count(), Some(4));
    assert!(!like.is_enabled());

    assert_eq!(like.toggle().await, ToggleOutcome::Ignored);
    gate.notify_one();
    assert_eq!(first.await.unwrap(), ToggleOutcome::Confirmed(true));
    assert_eq!(backend.writes.load(Ordering::SeqCst), 1);
    assert_eq!(like.count(), Some(4));
}

#[tokio::test]
async fn self_subscribe_is_rejected_without_remote_call() {
    let me = Uuid::new_v4();
    let backend = Arc::new(MockRelation::new(RelationKind::Subscribe, false));
    let toasts = ToastQueue::new();
    let sub = control(backend.clone(), me, Some(me), &toasts);

    assert_eq!(sub.toggle().await, ToggleOutcome::Rejected(Rejection::SelfTarget));
    assert_eq!(backend.remote_calls(), 0);
    assert_eq!(toasts.len(), 1);
}

#[tokio::test]
async fn anonymous_toggle_requires_sign_in() {
    let backend = Arc::new(MockRelation::new(RelationKind::WatchLater, false));
    let toasts = ToastQueue::new();
    let saved = control(backend.clone(), Uuid::new_v4(), None, &toasts);

    assert_eq!(saved.toggle().await, ToggleOutcome::Rejected(Rejection::SignInRequired));
    assert_eq!(backend.remote_calls(), 0);
    assert_eq!(toasts.snapshot()[0].title, "Sign in required");
}

#[tokio::test]
async fn toggle_before_load_is_ignored() {
    let backend = Arc::new(MockRelation::new(RelationKind::Like, false));
    let toasts = ToastQueue::new();
    let like = control(backend.clone(), Uuid::new_v4(), Some(Uuid::new_v4()), &toasts);

    assert_eq!(like.toggle().await, ToggleOutcome::Ignored);
    assert_eq!(backend.remote_calls(), 0);
}

#[tokio::test]
async fn seeded_state_skips_the_mount_query() {
    let backend = Arc::new(MockRelation::new(RelationKind::WatchLater, true));
    let toasts = ToastQueue::new();
    let saved = ToggleControl::new(backend.clone(), Uuid::new_v4(), Some(Uuid::new_v4()), Arc::new(toasts.clone()))
        .with_state(true);

    assert_eq!(saved.displayed(), Some(true));
    assert_eq!(saved.toggle().await, ToggleOutcome::Confirmed(false));
    assert_eq!(backend.reads.load(Ordering::SeqCst), 0);
    assert_eq!(backend.writes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn confirming_like_clears_dislike() {
    let viewer = Uuid::new_v4();
    let video = Uuid::new_v4();
    let toasts = ToastQueue::new();
    let registry = RelationRegistry::new(Some(viewer), Arc::new(toasts.clone()));
    let (like, dislike) = registry.reactions(
        Arc::new(MockRelation::new(RelationKind::Like, false)),
        Arc::new(MockRelation::new(RelationKind::Dislike, true)),
        video,
    );
    like.load().await.unwrap();
    dislike.load().await.unwrap();
    assert_eq!(dislike.displayed(), Some(true));

    assert_eq!(like.toggle().await, ToggleOutcome::Confirmed(true));
    assert_eq!(dislike.displayed(), Some(false));
}

#[tokio::test]
async fn registry_shares_one_control_per_target() {
    let video = Uuid::new_v4();
    let registry = RelationRegistry::new(Some(Uuid::new_v4()), Arc::new(ToastQueue::new()));
    let backend = Arc::new(MockRelation::new(RelationKind::WatchLater, false));

    let a = registry.control(backend.clone(), video);
    let b = registry.control(backend.clone(), video);
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(registry.len(), 1);

    a.load().await.unwrap();
    a.toggle().await;
    assert_eq!(b.displayed(), Some(true));
}
