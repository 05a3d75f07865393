use std::sync::Arc;

use async_trait::async_trait;

use crate::models::Id;
use crate::repo::{Repo, RepoResult};
use crate::toggle::{RelationBackend, RelationKind};

/// [`RelationBackend`] over the repository tables.
///
/// Like and dislike share one `video_likes` row per (user, video): writing one
/// replaces the other, and clearing deletes the row only if it still holds
/// this reaction.
pub struct RepoRelation {
    kind: RelationKind,
    repo: Arc<dyn Repo>,
}

impl RepoRelation {
    pub fn new(kind: RelationKind, repo: Arc<dyn Repo>) -> Self {
        Self { kind, repo }
    }

    pub fn shared(kind: RelationKind, repo: Arc<dyn Repo>) -> Arc<dyn RelationBackend> {
        Arc::new(Self::new(kind, repo))
    }
}

#[async_trait]
impl RelationBackend for RepoRelation {
    fn kind(&self) -> RelationKind {
        self.kind
    }

    async fn current(&self, subject: Id, target: Id) -> RepoResult<bool> {
        match self.kind {
            RelationKind::Like => Ok(self.repo.reaction(subject, target).await? == Some(true)),
            RelationKind::Dislike => Ok(self.repo.reaction(subject, target).await? == Some(false)),
            RelationKind::Subscribe => self.repo.is_subscribed(subject, target).await,
            RelationKind::WatchLater => self.repo.in_watch_later(subject, target).await,
        }
    }

    async fn set(&self, subject: Id, target: Id, on: bool) -> RepoResult<()> {
        match (self.kind, on) {
            (RelationKind::Like, true) => self.repo.set_reaction(subject, target, true).await,
            (RelationKind::Dislike, true) => self.repo.set_reaction(subject, target, false).await,
            (RelationKind::Like, false) | (RelationKind::Dislike, false) => {
                let mine = self.kind == RelationKind::Like;
                match self.repo.reaction(subject, target).await? {
                    Some(v) if v == mine => self.repo.clear_reaction(subject, target).await,
                    _ => Ok(()),
                }
            }
            (RelationKind::Subscribe, true) => self.repo.subscribe(subject, target).await,
            (RelationKind::Subscribe, false) => self.repo.unsubscribe(subject, target).await,
            (RelationKind::WatchLater, true) => self.repo.add_watch_later(subject, target).await,
            (RelationKind::WatchLater, false) => self.repo.remove_watch_later(subject, target).await,
        }
    }
}

#[cfg(all(test, feature = "inmem-store"))]
mod tests {
    use super::*;
    use crate::gateway::inmem::InMemGateway;
    use crate::repo::GatewayRepo;
    use uuid::Uuid;

    #[tokio::test]
    async fn clearing_like_leaves_dislike_row_alone() {
        let repo: Arc<dyn Repo> = Arc::new(GatewayRepo::new(Arc::new(InMemGateway::new())));
        let like = RepoRelation::new(RelationKind::Like, repo.clone());
        let dislike = RepoRelation::new(RelationKind::Dislike, repo.clone());
        let (u, v) = (Uuid::new_v4(), Uuid::new_v4());

        dislike.set(u, v, true).await.unwrap();
        like.set(u, v, false).await.unwrap();
        assert!(dislike.current(u, v).await.unwrap());

        like.set(u, v, true).await.unwrap();
        assert!(like.current(u, v).await.unwrap());
        assert!(!dislike.current(u, v).await.unwrap());
    }
}
