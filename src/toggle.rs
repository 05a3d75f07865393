//! Optimistic toggles for per-viewer relations (like, dislike, subscribe, watch-later).
//!
//! A [`ToggleControl`] flips what it displays the moment the user acts, sends the
//! mutation, and either keeps the flip or restores the previous value when the
//! backend refuses it. While a mutation is in flight the control ignores further
//! toggles, so at most one remote call per control is outstanding.

use std::sync::{Arc, Mutex, PoisonError, Weak};

use async_trait::async_trait;
use dashmap::DashMap;
use metrics::increment_counter;
use serde::Serialize;
use tracing::{debug, warn};
use utoipa::ToSchema;

use crate::models::Id;
use crate::notify::{Notification, Notifier};
use crate::repo::RepoResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    Like,
    Dislike,
    Subscribe,
    WatchLater,
}

impl RelationKind {
    pub fn label(self) -> &'static str {
        match self {
            RelationKind::Like => "like",
            RelationKind::Dislike => "dislike",
            RelationKind::Subscribe => "subscribe",
            RelationKind::WatchLater => "watch_later",
        }
    }

    /// Subscribing to your own channel is refused before any remote call.
    pub fn forbids_self_target(self) -> bool {
        matches!(self, RelationKind::Subscribe)
    }

    fn sign_in_action(self) -> &'static str {
        match self {
            RelationKind::Like | RelationKind::Dislike => "like videos",
            RelationKind::Subscribe => "subscribe to channels",
            RelationKind::WatchLater => "save videos to watch later",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RelationState {
    Unknown,
    Known { value: bool },
    Pending { from: bool, to: bool },
}

impl RelationState {
    pub fn displayed(self) -> Option<bool> {
        match self {
            RelationState::Unknown => None,
            RelationState::Known { value } => Some(value),
            RelationState::Pending { to, .. } => Some(to),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    SignInRequired,
    SelfTarget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleOutcome {
    /// Remote call succeeded; the control now shows the new value.
    Confirmed(bool),
    /// Remote call failed; previous value and count restored.
    RolledBack,
    /// Not loaded yet, or a call is already in flight.
    Ignored,
    Rejected(Rejection),
}

/// Reads and writes one relation kind between a subject and a target.
#[async_trait]
pub trait RelationBackend: Send + Sync {
    fn kind(&self) -> RelationKind;
    async fn current(&self, subject: Id, target: Id) -> RepoResult<bool>;
    async fn set(&self, subject: Id, target: Id, on: bool) -> RepoResult<()>;
}

struct Inner {
    state: RelationState,
    count: Option<i64>,
}

pub struct ToggleControl {
    kind: RelationKind,
    target: Id,
    viewer: Option<Id>,
    backend: Arc<dyn RelationBackend>,
    notifier: Arc<dyn Notifier>,
    inner: Mutex<Inner>,
    companion: Mutex<Option<Weak<ToggleControl>>>,
}

impl ToggleControl {
    pub fn new(backend: Arc<dyn RelationBackend>, target: Id, viewer: Option<Id>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            kind: backend.kind(),
            target,
            viewer,
            backend,
            notifier,
            inner: Mutex::new(Inner { state: RelationState::Unknown, count: None }),
            companion: Mutex::new(None),
        }
    }

    /// Displayed counter that follows the relation (e.g. like count).
    pub fn with_count(self, count: i64) -> Self {
        self.lock().count = Some(count.max(0));
        self
    }

    /// Seed the truth when a page loader already fetched it.
    pub fn with_state(self, value: bool) -> Self {
        self.lock().state = RelationState::Known { value };
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn kind(&self) -> RelationKind {
        self.kind
    }

    pub fn target(&self) -> Id {
        self.target
    }

    pub fn state(&self) -> RelationState {
        self.lock().state
    }

    pub fn displayed(&self) -> Option<bool> {
        self.state().displayed()
    }

    pub fn count(&self) -> Option<i64> {
        self.lock().count
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self.state(), RelationState::Known { .. })
    }

    /// Fetch the current truth once. Later calls return the known value without a remote call.
    pub async fn load(&self) -> RepoResult<Option<bool>> {
        if let RelationState::Known { value } = self.state() {
            return Ok(Some(value));
        }
        let Some(viewer) = self.viewer else {
            let mut inner = self.lock();
            if inner.state == RelationState::Unknown {
                inner.state = RelationState::Known { value: false };
            }
            return Ok(inner.state.displayed());
        };
        match self.backend.current(viewer, self.target).await {
            Ok(value) => {
                let mut inner = self.lock();
                if inner.state == RelationState::Unknown {
                    inner.state = RelationState::Known { value };
                }
                Ok(inner.state.displayed())
            }
            Err(e) => {
                warn!(kind = self.kind.label(), target = %self.target, error = %e, "relation load failed");
                Err(e)
            }
        }
    }

    pub async fn toggle(&self) -> ToggleOutcome {
        let Some(viewer) = self.viewer else {
            self.notifier.notify(Notification::sign_in_required(self.kind.sign_in_action()));
            return self.finish(ToggleOutcome::Rejected(Rejection::SignInRequired));
        };
        if self.kind.forbids_self_target() && viewer == self.target {
            self.notifier.notify(Notification::error("Error", "You cannot subscribe to yourself"));
            return self.finish(ToggleOutcome::Rejected(Rejection::SelfTarget));
        }

        let (from, to, prior) = {
            let mut inner = self.lock();
            let RelationState::Known { value: from } = inner.state else {
                debug!(kind = self.kind.label(), state = ?inner.state, "toggle ignored");
                return ToggleOutcome::Ignored;
            };
            let to = !from;
            let prior = inner.count;
            inner.state = RelationState::Pending { from, to };
            if let Some(c) = inner.count.as_mut() {
                *c = if to { *c + 1 } else { (*c - 1).max(0) };
            }
            (from, to, prior)
        };

        match self.backend.set(viewer, self.target, to).await {
            Ok(()) => {
                self.lock().state = RelationState::Known { value: to };
                if to {
                    self.clear_companion();
                }
                self.finish(ToggleOutcome::Confirmed(to))
            }
            Err(e) => {
                {
                    let mut inner = self.lock();
                    inner.state = RelationState::Known { value: from };
                    inner.count = prior;
                }
                warn!(kind = self.kind.label(), target = %self.target, error = %e, "toggle rolled back");
                self.notifier.notify(Notification::error(
                    "Error",
                    format!("Failed to update {}. Please try again.", self.kind.label().replace('_', " ")),
                ));
                self.finish(ToggleOutcome::RolledBack)
            }
        }
    }

    fn finish(&self, outcome: ToggleOutcome) -> ToggleOutcome {
        let label = match outcome {
            ToggleOutcome::Confirmed(_) => "confirmed",
            ToggleOutcome::RolledBack => "rolled_back",
            ToggleOutcome::Ignored => "ignored",
            ToggleOutcome::Rejected(_) => "rejected",
        };
        increment_counter!("videome_toggle_total", "kind" => self.kind.label(), "outcome" => label);
        outcome
    }

    /// The opposing relation was replaced remotely by our write; mirror that locally.
    fn clear_companion(&self) {
        let companion = self
            .companion
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(Weak::upgrade);
        let Some(other) = companion else { return };
        let mut inner = other.lock();
        if inner.state == (RelationState::Known { value: true }) {
            inner.state = RelationState::Known { value: false };
            if let Some(c) = inner.count.as_mut() {
                *c = (*c - 1).max(0);
            }
        }
    }
}

/// Wire two controls (like and dislike) so confirming one clears the other.
pub fn pair_exclusive(a: &Arc<ToggleControl>, b: &Arc<ToggleControl>) {
    *a.companion.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::downgrade(b));
    *b.companion.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::downgrade(a));
}

/// Per-viewer cache so every widget showing the same (kind, target) shares one control.
pub struct RelationRegistry {
    viewer: Option<Id>,
    notifier: Arc<dyn Notifier>,
    controls: DashMap<(RelationKind, Id), Arc<ToggleControl>>,
}

impl RelationRegistry {
    pub fn new(viewer: Option<Id>, notifier: Arc<dyn Notifier>) -> Self {
        Self { viewer, notifier, controls: DashMap::new() }
    }

    pub fn viewer(&self) -> Option<Id> {
        self.viewer
    }

    pub fn control(&self, backend: Arc<dyn RelationBackend>, target: Id) -> Arc<ToggleControl> {
        let key = (backend.kind(), target);
        self.controls
            .entry(key)
            .or_insert_with(|| Arc::new(ToggleControl::new(backend, target, self.viewer, self.notifier.clone())))
            .value()
            .clone()
    }

    /// Like and dislike controls for one video, paired.
    pub fn reactions(
        &self,
        like: Arc<dyn RelationBackend>,
        dislike: Arc<dyn RelationBackend>,
        video: Id,
    ) -> (Arc<ToggleControl>, Arc<ToggleControl>) {
        let l = self.control(like, video);
        let d = self.control(dislike, video);
        pair_exclusive(&l, &d);
        (l, d)
    }

    pub fn len(&self) -> usize {
        self.controls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controls.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_displays_target_value() {
        assert_eq!(RelationState::Unknown.displayed(), None);
        assert_eq!(RelationState::Known { value: true }.displayed(), Some(true));
        assert_eq!(RelationState::Pending { from: false, to: true }.displayed(), Some(true));
    }

    #[test]
    fn only_subscribe_forbids_self_target() {
        assert!(RelationKind::Subscribe.forbids_self_target());
        assert!(!RelationKind::Like.forbids_self_target());
        assert!(!RelationKind::WatchLater.forbids_self_target());
    }
}
