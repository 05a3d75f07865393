use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::gateway::{first_as, insert_as, rpc_rows, select_as, Gateway, GatewayError, Query};
use crate::models::*;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum RepoError {
    #[error("not found")] NotFound,
    #[error("conflict")] Conflict,
    #[error("backend not configured")] NotConfigured,
    #[error("unauthorized: {0}")] Unauthorized(String),
    #[error("remote: {0}")] Remote(String),
}

pub type RepoResult<T> = Result<T, RepoError>;

impl From<GatewayError> for RepoError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::NotFound => RepoError::NotFound,
            GatewayError::Conflict(_) => RepoError::Conflict,
            GatewayError::NotConfigured => RepoError::NotConfigured,
            GatewayError::Unauthorized(m) => RepoError::Unauthorized(m),
            other => RepoError::Remote(other.to_string()),
        }
    }
}

pub const VIDEO_COLUMNS: &str = "id, user_id, title, description, video_url, thumbnail_url, duration, views, likes, comment_count, is_public, tags, created_at, profiles ( id, username, full_name, avatar_url )";
const COMMENT_COLUMNS: &str = "id, video_id, user_id, content, created_at, parent_id, profiles ( id, username, full_name, avatar_url )";

#[async_trait]
pub trait VideoRepo: Send + Sync {
    /// Public videos, newest first.
    async fn public_videos(&self, limit: Option<usize>) -> RepoResult<Vec<Video>>;
    async fn get_video(&self, id: Id) -> RepoResult<Video>;
    async fn related_videos(&self, exclude: Id, limit: usize) -> RepoResult<Vec<Video>>;
    /// Every video of `owner`, private ones included.
    async fn videos_by_owner(&self, owner: Id) -> RepoResult<Vec<Video>>;
    async fn public_videos_by_owner(&self, owner: Id) -> RepoResult<Vec<Video>>;
    /// Newest public videos of any of `owners`.
    async fn recent_videos_from(&self, owners: &[Id], limit: usize) -> RepoResult<Vec<Video>>;
    async fn search_videos(&self, term: &str, limit: usize) -> RepoResult<Vec<Video>>;
    async fn insert_video(&self, new: NewVideo) -> RepoResult<Video>;
    async fn delete_video(&self, id: Id) -> RepoResult<()>;
    async fn delete_videos_of(&self, owner: Id) -> RepoResult<()>;
    async fn increment_views(&self, id: Id) -> RepoResult<()>;
}

#[async_trait]
pub trait ProfileRepo: Send + Sync {
    async fn get_profile(&self, id: Id) -> RepoResult<Profile>;
    async fn profile_by_username(&self, username: &str) -> RepoResult<Profile>;
    async fn profiles_by_ids(&self, ids: &[Id]) -> RepoResult<Vec<Profile>>;
    async fn search_channels(&self, term: &str, limit: usize) -> RepoResult<Vec<Profile>>;
    async fn insert_profile(&self, new: NewProfile) -> RepoResult<()>;
    async fn update_profile(&self, id: Id, upd: ProfileUpdate) -> RepoResult<()>;
    async fn delete_profile(&self, id: Id) -> RepoResult<()>;
}

#[async_trait]
pub trait RelationRepo: Send + Sync {
    /// `Some(true)` liked, `Some(false)` disliked, `None` neither.
    async fn reaction(&self, user: Id, video: Id) -> RepoResult<Option<bool>>;
    async fn set_reaction(&self, user: Id, video: Id, is_like: bool) -> RepoResult<()>;
    async fn clear_reaction(&self, user: Id, video: Id) -> RepoResult<()>;
    /// Server-side like toggle; returns the procedure's payload untouched.
    async fn toggle_like(&self, user: Id, video: Id) -> RepoResult<serde_json::Value>;

    async fn is_subscribed(&self, subscriber: Id, channel: Id) -> RepoResult<bool>;
    async fn subscribe(&self, subscriber: Id, channel: Id) -> RepoResult<()>;
    async fn unsubscribe(&self, subscriber: Id, channel: Id) -> RepoResult<()>;
    async fn subscriber_count(&self, channel: Id) -> RepoResult<u64>;
    async fn subscription_count(&self, subscriber: Id) -> RepoResult<u64>;
    async fn subscriptions_of(&self, subscriber: Id) -> RepoResult<Vec<Subscription>>;
    async fn delete_subscriptions_of(&self, user: Id) -> RepoResult<()>;

    async fn in_watch_later(&self, user: Id, video: Id) -> RepoResult<bool>;
    async fn add_watch_later(&self, user: Id, video: Id) -> RepoResult<()>;
    async fn remove_watch_later(&self, user: Id, video: Id) -> RepoResult<()>;
    async fn watch_later_entries(&self, user: Id) -> RepoResult<Vec<WatchLaterEntry>>;
}

#[async_trait]
pub trait CommentRepo: Send + Sync {
    /// Top-level comments, newest first.
    async fn top_level_comments(&self, video: Id) -> RepoResult<Vec<Comment>>;
    async fn insert_comment(&self, new: NewComment) -> RepoResult<Comment>;
}

/// Stored procedures whose ranking logic lives server side.
#[async_trait]
pub trait FeedRepo: Send + Sync {
    async fn liked_videos(&self, user: Id, limit: usize, offset: usize) -> RepoResult<Vec<LikedVideo>>;
    async fn trending_videos(&self, period: TimePeriod, sort: TrendingSort, limit: usize, offset: usize) -> RepoResult<Vec<TrendingVideo>>;
    async fn trending_stats(&self, period: TimePeriod) -> RepoResult<Option<TrendingStats>>;
}

pub trait Repo: VideoRepo + ProfileRepo + RelationRepo + CommentRepo + FeedRepo {}

impl<T> Repo for T where T: VideoRepo + ProfileRepo + RelationRepo + CommentRepo + FeedRepo {}

/// All repositories backed by one gateway client.
#[derive(Clone)]
pub struct GatewayRepo {
    gateway: Arc<dyn Gateway>,
}

impl GatewayRepo {
    pub fn new(gateway: Arc<dyn Gateway>) -> Self {
        Self { gateway }
    }

    /// Same repository acting with the caller's access token.
    pub fn authorized(&self, access_token: &str) -> Self {
        Self { gateway: self.gateway.authorized(access_token) }
    }

    pub fn gateway(&self) -> &Arc<dyn Gateway> {
        &self.gateway
    }

    fn gw(&self) -> &dyn Gateway {
        self.gateway.as_ref()
    }
}

fn s(id: Id) -> String {
    id.to_string()
}

#[async_trait]
impl VideoRepo for GatewayRepo {
    async fn public_videos(&self, limit: Option<usize>) -> RepoResult<Vec<Video>> {
        let mut q = Query::select(VIDEO_COLUMNS).eq("is_public", true).order("created_at", false);
        if let Some(l) = limit {
            q = q.limit(l);
        }
        Ok(select_as(self.gw(), "videos", &q).await?)
    }

    async fn get_video(&self, id: Id) -> RepoResult<Video> {
        let q = Query::select(VIDEO_COLUMNS).eq("id", s(id));
        first_as(self.gw(), "videos", &q).await?.ok_or(RepoError::NotFound)
    }

    async fn related_videos(&self, exclude: Id, limit: usize) -> RepoResult<Vec<Video>> {
        let q = Query::select(VIDEO_COLUMNS)
            .eq("is_public", true)
            .neq("id", s(exclude))
            .order("created_at", false)
            .limit(limit);
        Ok(select_as(self.gw(), "videos", &q).await?)
    }

    async fn videos_by_owner(&self, owner: Id) -> RepoResult<Vec<Video>> {
        let q = Query::select(VIDEO_COLUMNS).eq("user_id", s(owner)).order("created_at", false);
        Ok(select_as(self.gw(), "videos", &q).await?)
    }

    async fn public_videos_by_owner(&self, owner: Id) -> RepoResult<Vec<Video>> {
        let q = Query::select(VIDEO_COLUMNS)
            .eq("user_id", s(owner))
            .eq("is_public", true)
            .order("created_at", false);
        Ok(select_as(self.gw(), "videos", &q).await?)
    }

    async fn recent_videos_from(&self, owners: &[Id], limit: usize) -> RepoResult<Vec<Video>> {
        if owners.is_empty() {
            return Ok(Vec::new());
        }
        let q = Query::select(VIDEO_COLUMNS)
            .eq("is_public", true)
            .any_of("user_id", owners.iter().map(|id| s(*id)))
            .order("created_at", false)
            .limit(limit);
        Ok(select_as(self.gw(), "videos", &q).await?)
    }

    async fn search_videos(&self, term: &str, limit: usize) -> RepoResult<Vec<Video>> {
        let q = Query::select(VIDEO_COLUMNS)
            .eq("is_public", true)
            .ilike("title", term)
            .order("created_at", false)
            .limit(limit);
        Ok(select_as(self.gw(), "videos", &q).await?)
    }

    async fn insert_video(&self, new: NewVideo) -> RepoResult<Video> {
        let row = serde_json::to_value(&new).map_err(|e| RepoError::Remote(e.to_string()))?;
        Ok(insert_as(self.gw(), "videos", row).await?)
    }

    async fn delete_video(&self, id: Id) -> RepoResult<()> {
        Ok(self.gw().delete("videos", &Query::matching().eq("id", s(id))).await?)
    }

    async fn delete_videos_of(&self, owner: Id) -> RepoResult<()> {
        Ok(self.gw().delete("videos", &Query::matching().eq("user_id", s(owner))).await?)
    }

    async fn increment_views(&self, id: Id) -> RepoResult<()> {
        self.gw().rpc("increment_video_views", json!({ "video_id": id })).await?;
        Ok(())
    }
}

#[async_trait]
impl ProfileRepo for GatewayRepo {
    async fn get_profile(&self, id: Id) -> RepoResult<Profile> {
        first_as(self.gw(), "profiles", &Query::select("*").eq("id", s(id)))
            .await?
            .ok_or(RepoError::NotFound)
    }

    async fn profile_by_username(&self, username: &str) -> RepoResult<Profile> {
        first_as(self.gw(), "profiles", &Query::select("*").eq("username", username))
            .await?
            .ok_or(RepoError::NotFound)
    }

    async fn profiles_by_ids(&self, ids: &[Id]) -> RepoResult<Vec<Profile>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let q = Query::select("*").any_of("id", ids.iter().map(|id| s(*id)));
        Ok(select_as(self.gw(), "profiles", &q).await?)
    }

    async fn search_channels(&self, term: &str, limit: usize) -> RepoResult<Vec<Profile>> {
        let q = Query::select("*").ilike("username", term).order("username", true).limit(limit);
        Ok(select_as(self.gw(), "profiles", &q).await?)
    }

    async fn insert_profile(&self, new: NewProfile) -> RepoResult<()> {
        let row = serde_json::to_value(&new).map_err(|e| RepoError::Remote(e.to_string()))?;
        self.gw().insert("profiles", row).await?;
        Ok(())
    }

    async fn update_profile(&self, id: Id, upd: ProfileUpdate) -> RepoResult<()> {
        let patch = serde_json::to_value(&upd).map_err(|e| RepoError::Remote(e.to_string()))?;
        Ok(self.gw().update("profiles", &Query::matching().eq("id", s(id)), patch).await?)
    }

    async fn delete_profile(&self, id: Id) -> RepoResult<()> {
        Ok(self.gw().delete("profiles", &Query::matching().eq("id", s(id))).await?)
    }
}

#[async_trait]
impl RelationRepo for GatewayRepo {
    async fn reaction(&self, user: Id, video: Id) -> RepoResult<Option<bool>> {
        let q = Query::select("is_like").eq("user_id", s(user)).eq("video_id", s(video));
        let row = self.gw().select("video_likes", &q.limit(1)).await?.into_iter().next();
        Ok(row.and_then(|r| r.get("is_like").and_then(|v| v.as_bool())))
    }

    async fn set_reaction(&self, user: Id, video: Id, is_like: bool) -> RepoResult<()> {
        let row = json!({ "user_id": user, "video_id": video, "is_like": is_like });
        Ok(self.gw().upsert("video_likes", row, "user_id,video_id").await?)
    }

    async fn clear_reaction(&self, user: Id, video: Id) -> RepoResult<()> {
        let q = Query::matching().eq("user_id", s(user)).eq("video_id", s(video));
        Ok(self.gw().delete("video_likes", &q).await?)
    }

    async fn toggle_like(&self, user: Id, video: Id) -> RepoResult<serde_json::Value> {
        let params = json!({ "user_uuid": user, "video_uuid": video });
        Ok(self.gw().rpc("toggle_video_like", params).await?)
    }

    async fn is_subscribed(&self, subscriber: Id, channel: Id) -> RepoResult<bool> {
        let q = Query::select("subscriber_id")
            .eq("subscriber_id", s(subscriber))
            .eq("channel_id", s(channel))
            .limit(1);
        Ok(!self.gw().select("subscriptions", &q).await?.is_empty())
    }

    async fn subscribe(&self, subscriber: Id, channel: Id) -> RepoResult<()> {
        let row = json!({ "subscriber_id": subscriber, "channel_id": channel });
        Ok(self.gw().upsert("subscriptions", row, "subscriber_id,channel_id").await?)
    }

    async fn unsubscribe(&self, subscriber: Id, channel: Id) -> RepoResult<()> {
        let q = Query::matching().eq("subscriber_id", s(subscriber)).eq("channel_id", s(channel));
        Ok(self.gw().delete("subscriptions", &q).await?)
    }

    async fn subscriber_count(&self, channel: Id) -> RepoResult<u64> {
        Ok(self.gw().count("subscriptions", &Query::matching().eq("channel_id", s(channel))).await?)
    }

    async fn subscription_count(&self, subscriber: Id) -> RepoResult<u64> {
        Ok(self.gw().count("subscriptions", &Query::matching().eq("subscriber_id", s(subscriber))).await?)
    }

    async fn subscriptions_of(&self, subscriber: Id) -> RepoResult<Vec<Subscription>> {
        let q = Query::select("*").eq("subscriber_id", s(subscriber)).order("created_at", false);
        Ok(select_as(self.gw(), "subscriptions", &q).await?)
    }

    async fn delete_subscriptions_of(&self, user: Id) -> RepoResult<()> {
        self.gw().delete("subscriptions", &Query::matching().eq("subscriber_id", s(user))).await?;
        self.gw().delete("subscriptions", &Query::matching().eq("channel_id", s(user))).await?;
        Ok(())
    }

    async fn in_watch_later(&self, user: Id, video: Id) -> RepoResult<bool> {
        let q = Query::select("video_id").eq("user_id", s(user)).eq("video_id", s(video)).limit(1);
        Ok(!self.gw().select("watch_later", &q).await?.is_empty())
    }

    async fn add_watch_later(&self, user: Id, video: Id) -> RepoResult<()> {
        let row = json!({ "user_id": user, "video_id": video });
        Ok(self.gw().upsert("watch_later", row, "user_id,video_id").await?)
    }

    async fn remove_watch_later(&self, user: Id, video: Id) -> RepoResult<()> {
        let q = Query::matching().eq("user_id", s(user)).eq("video_id", s(video));
        Ok(self.gw().delete("watch_later", &q).await?)
    }

    async fn watch_later_entries(&self, user: Id) -> RepoResult<Vec<WatchLaterEntry>> {
        let columns = format!("user_id, video_id, created_at, videos ( {VIDEO_COLUMNS} )");
        let q = Query::select(&columns).eq("user_id", s(user)).order("created_at", false);
        Ok(select_as(self.gw(), "watch_later", &q).await?)
    }
}

#[async_trait]
impl CommentRepo for GatewayRepo {
    async fn top_level_comments(&self, video: Id) -> RepoResult<Vec<Comment>> {
        let q = Query::select(COMMENT_COLUMNS)
            .eq("video_id", s(video))
            .is_null("parent_id")
            .order("created_at", false);
        Ok(select_as(self.gw(), "comments", &q).await?)
    }

    async fn insert_comment(&self, new: NewComment) -> RepoResult<Comment> {
        let row = serde_json::to_value(&new).map_err(|e| RepoError::Remote(e.to_string()))?;
        Ok(insert_as(self.gw(), "comments", row).await?)
    }
}

#[async_trait]
impl FeedRepo for GatewayRepo {
    async fn liked_videos(&self, user: Id, limit: usize, offset: usize) -> RepoResult<Vec<LikedVideo>> {
        let params = json!({ "user_uuid": user, "page_limit": limit, "page_offset": offset });
        Ok(rpc_rows(self.gw(), "get_liked_videos", params).await?)
    }

    async fn trending_videos(&self, period: TimePeriod, sort: TrendingSort, limit: usize, offset: usize) -> RepoResult<Vec<TrendingVideo>> {
        let params = json!({
            "time_period": period.as_param(),
            "sort_by": sort.as_param(),
            "limit_count": limit,
            "offset_count": offset,
        });
        Ok(rpc_rows(self.gw(), "get_trending_videos", params).await?)
    }

    async fn trending_stats(&self, period: TimePeriod) -> RepoResult<Option<TrendingStats>> {
        let params = json!({ "time_period": period.as_param() });
        let rows: Vec<TrendingStats> = rpc_rows(self.gw(), "get_trending_stats", params).await?;
        Ok(rows.into_iter().next())
    }
}

#[cfg(all(test, feature = "inmem-store"))]
mod tests {
    use super::*;
    use crate::gateway::inmem::InMemGateway;
    use uuid::Uuid;

    fn seeded() -> (GatewayRepo, InMemGateway, Id) {
        let gw = InMemGateway::new();
        let owner = Uuid::new_v4();
        gw.seed("profiles", json!({"id": owner, "username": "maker", "created_at": "2024-01-01T00:00:00Z"}));
        (GatewayRepo::new(Arc::new(gw.clone())), gw, owner)
    }

    #[tokio::test]
    async fn private_videos_excluded_from_public_listing() {
        let (repo, gw, owner) = seeded();
        gw.seed("videos", json!({"id": Uuid::new_v4(), "user_id": owner, "title": "a", "is_public": true, "created_at": "2024-01-02T00:00:00Z"}));
        gw.seed("videos", json!({"id": Uuid::new_v4(), "user_id": owner, "title": "b", "is_public": false, "created_at": "2024-01-03T00:00:00Z"}));
        let public = repo.public_videos(None).await.unwrap();
        assert_eq!(public.len(), 1);
        assert_eq!(public[0].owner.as_ref().unwrap().username, "maker");
        assert_eq!(repo.videos_by_owner(owner).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn reaction_is_single_row_per_pair() {
        let (repo, gw, owner) = seeded();
        let video = Uuid::new_v4();
        assert_eq!(repo.reaction(owner, video).await.unwrap(), None);
        repo.set_reaction(owner, video, true).await.unwrap();
        repo.set_reaction(owner, video, false).await.unwrap();
        assert_eq!(gw.rows("video_likes").len(), 1);
        assert_eq!(repo.reaction(owner, video).await.unwrap(), Some(false));
        repo.clear_reaction(owner, video).await.unwrap();
        assert_eq!(repo.reaction(owner, video).await.unwrap(), None);
    }

    #[tokio::test]
    async fn subscription_counts_both_directions() {
        let (repo, _gw, owner) = seeded();
        let fan = Uuid::new_v4();
        repo.subscribe(fan, owner).await.unwrap();
        repo.subscribe(fan, owner).await.unwrap();
        assert!(repo.is_subscribed(fan, owner).await.unwrap());
        assert_eq!(repo.subscriber_count(owner).await.unwrap(), 1);
        assert_eq!(repo.subscription_count(fan).await.unwrap(), 1);
        repo.delete_subscriptions_of(owner).await.unwrap();
        assert_eq!(repo.subscriber_count(owner).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn missing_profile_is_not_found() {
        let (repo, _gw, _owner) = seeded();
        assert_eq!(repo.profile_by_username("ghost").await.unwrap_err(), RepoError::NotFound);
    }
}
