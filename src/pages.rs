//! One loader per route. Every loader checks configuration first and returns
//! [`Page::SetupRequired`] without touching the backend when credentials are missing.

use std::cmp::Reverse;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::increment_counter;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};
use utoipa::ToSchema;

use crate::account::{self, AccountCounts, StorageUsage};
use crate::config::SetupGuide;
use crate::format::{format_count, format_duration};
use crate::models::*;
use crate::pagination::{liked_list, trending_list, PageLoad};
use crate::repo::{Repo, RepoError};
use crate::storage::MediaStore;
use crate::upload::{MAX_TITLE_CHARS, MAX_VIDEO_BYTES, THUMBNAIL_AT_SECONDS};

pub const RELATED_LIMIT: usize = 10;
pub const SEARCH_LIMIT: usize = 50;
pub const SUBSCRIPTION_FEED_LIMIT: usize = 24;

#[derive(Debug, Clone, PartialEq)]
pub enum Page<T> {
    Ready(T),
    RedirectToSignIn,
    NotFound,
    SetupRequired(SetupGuide),
}

impl<T> Page<T> {
    pub fn ready(self) -> Option<T> {
        match self {
            Page::Ready(t) => Some(t),
            _ => None,
        }
    }
}

/// Compact video tile used by every listing.
#[derive(Debug, Clone, Serialize, ToSchema, PartialEq)]
pub struct VideoCard {
    pub id: Id,
    pub title: String,
    pub thumbnail_url: Option<String>,
    pub duration: i64,
    pub duration_label: String,
    pub views: i64,
    pub views_label: String,
    pub likes: i64,
    pub is_public: bool,
    pub created_at: DateTime<Utc>,
    pub channel: Option<ChannelSummary>,
}

impl From<&Video> for VideoCard {
    fn from(v: &Video) -> Self {
        Self {
            id: v.id,
            title: v.title.clone(),
            thumbnail_url: v.thumbnail_url.clone(),
            duration: v.duration,
            duration_label: format_duration(v.duration),
            views: v.views,
            views_label: format_count(v.views),
            likes: v.likes,
            is_public: v.is_public,
            created_at: v.created_at,
            channel: v.owner.clone(),
        }
    }
}

fn flat_channel(user_id: Id, username: &Option<String>, avatar_url: &Option<String>) -> Option<ChannelSummary> {
    username.as_ref().map(|u| ChannelSummary {
        id: Some(user_id),
        username: u.clone(),
        full_name: None,
        avatar_url: avatar_url.clone(),
    })
}

impl From<&LikedVideo> for VideoCard {
    fn from(v: &LikedVideo) -> Self {
        Self {
            id: v.id,
            title: v.title.clone(),
            thumbnail_url: v.thumbnail_url.clone(),
            duration: v.duration,
            duration_label: format_duration(v.duration),
            views: v.views,
            views_label: format_count(v.views),
            likes: v.likes,
            is_public: true,
            created_at: v.created_at,
            channel: flat_channel(v.user_id, &v.username, &v.avatar_url),
        }
    }
}

impl From<&TrendingVideo> for VideoCard {
    fn from(v: &TrendingVideo) -> Self {
        Self {
            id: v.id,
            title: v.title.clone(),
            thumbnail_url: v.thumbnail_url.clone(),
            duration: v.duration,
            duration_label: format_duration(v.duration),
            views: v.view_count,
            views_label: format_count(v.view_count),
            likes: v.like_count,
            is_public: true,
            created_at: v.created_at,
            channel: flat_channel(v.user_id, &v.username, &v.avatar_url),
        }
    }
}

fn cards(videos: &[Video]) -> Vec<VideoCard> {
    videos.iter().map(VideoCard::from).collect()
}

#[derive(Debug, Clone, Serialize, ToSchema, PartialEq)]
pub struct ChannelCard {
    pub id: Id,
    pub username: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

impl From<&Profile> for ChannelCard {
    fn from(p: &Profile) -> Self {
        Self { id: p.id, username: p.username.clone(), display_name: p.display_name().to_string(), avatar_url: p.avatar_url.clone() }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct HomePage {
    pub videos: Vec<VideoCard>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SearchFilter {
    #[default]
    All,
    Videos,
    Channels,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SearchSort {
    #[default]
    Relevance,
    Date,
    Views,
    Rating,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct SearchParams {
    #[serde(default)]
    pub q: String,
    #[serde(default)]
    pub filter: SearchFilter,
    #[serde(default)]
    pub sort: SearchSort,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SearchPage {
    pub query: String,
    pub filter: SearchFilter,
    pub sort: SearchSort,
    pub videos: Vec<VideoCard>,
    pub channels: Vec<ChannelCard>,
}

/// Viewer's relations to the watched video and its channel. `None` when the lookup failed.
#[derive(Debug, Clone, Serialize, ToSchema, PartialEq, Default)]
pub struct ViewerRelations {
    pub is_owner: bool,
    pub liked: Option<bool>,
    pub disliked: Option<bool>,
    pub subscribed: Option<bool>,
    pub saved: Option<bool>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct WatchPage {
    pub video: Video,
    pub views_label: String,
    pub likes_label: String,
    pub related: Vec<VideoCard>,
    pub comments: Vec<Comment>,
    pub viewer: ViewerRelations,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UploadPage {
    pub accepted_type: String,
    pub max_bytes: usize,
    pub max_title_chars: usize,
    pub thumbnail_at_seconds: f64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct MyVideosPage {
    pub videos: Vec<VideoCard>,
    pub public_count: usize,
    pub private_count: usize,
}

/// One window of a paged listing plus where the next one starts.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PagedVideos {
    pub videos: Vec<VideoCard>,
    pub has_more: bool,
    pub next_offset: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct WatchLaterPage {
    pub videos: Vec<VideoCard>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SubscriptionsPage {
    pub channels: Vec<ChannelCard>,
    pub videos: Vec<VideoCard>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TrendingPage {
    pub period: TimePeriod,
    pub sort: TrendingSort,
    pub stats: Option<TrendingStats>,
    #[serde(flatten)]
    pub page: PagedVideos,
}

#[derive(Debug, Clone, Serialize, ToSchema, PartialEq, Default)]
pub struct ChannelTotals {
    pub total_videos: usize,
    pub total_views: i64,
    pub total_likes: i64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ProfilePage {
    pub profile: Profile,
    pub videos: Vec<VideoCard>,
    pub totals: ChannelTotals,
    pub subscriber_count: u64,
    pub viewer_subscribed: bool,
    pub is_own: bool,
}

#[derive(Debug, Clone, Serialize, ToSchema, PartialEq, Default)]
pub struct OwnStats {
    pub total_videos: usize,
    pub public_videos: usize,
    pub private_videos: usize,
    pub total_views: i64,
    pub total_likes: i64,
    pub total_comments: i64,
    pub subscribers: u64,
    pub subscriptions: u64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OwnProfilePage {
    pub identity: Identity,
    pub profile: Option<Profile>,
    pub stats: OwnStats,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SettingsPage {
    pub identity: Identity,
    pub profile: Option<Profile>,
    pub counts: AccountCounts,
    pub storage: Option<StorageUsage>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct FaqEntry {
    pub question: &'static str,
    pub answer: &'static str,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct HelpTopic {
    pub title: &'static str,
    pub entries: Vec<FaqEntry>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct HelpPage {
    pub topics: Vec<HelpTopic>,
}

static HELP: Lazy<HelpPage> = Lazy::new(|| {
    let topic = |title, entries: &[(&'static str, &'static str)]| HelpTopic {
        title,
        entries: entries.iter().map(|(question, answer)| FaqEntry { question, answer }).collect(),
    };
    HelpPage {
        topics: vec![
            topic("Getting Started", &[
                ("How do I create an account?", "Choose Sign up, enter your email, a username and a password of at least 6 characters, then confirm your email."),
                ("What video formats are supported?", "Any video format your browser can play, such as MP4, MOV, AVI or WMV."),
                ("Is there a file size limit?", "Each video can be up to 100MB."),
            ]),
            topic("Uploading Videos", &[
                ("How do I upload a video?", "Open Upload, pick or drop a file, add a title, description and tags, then publish."),
                ("How are thumbnails created?", "A frame one second into the video is captured automatically."),
            ]),
            topic("Watching Videos", &[
                ("How do I use the watch later feature?", "Use the clock button on any video; saved videos appear under Watch Later."),
            ]),
            topic("Account & Profile", &[
                ("How do I change my profile information?", "Go to Settings > Account to edit your name, bio, website and avatar."),
                ("How do I change my password?", "Go to Settings > Security and enter a new password of at least 6 characters."),
                ("How do I delete my account?", "Settings > Data lets you permanently delete your profile, videos and subscriptions."),
            ]),
            topic("Privacy & Security", &[
                ("How do I make my videos private?", "Turn off Public when uploading. Private videos are visible only to you."),
            ]),
            topic("Troubleshooting", &[
                ("Upload keeps failing", "Check that the file is a video under 100MB and that you are signed in."),
                ("I can't sign in to my account", "Confirm your email address first, then try again."),
            ]),
        ],
    }
});

/// Route loaders over one repository and media store.
#[derive(Clone)]
pub struct Pages {
    repo: Arc<dyn Repo>,
    store: Arc<dyn MediaStore>,
    setup: Option<SetupGuide>,
}

macro_rules! guard {
    ($self:ident) => {
        if let Some(guide) = &$self.setup {
            return Page::SetupRequired(guide.clone());
        }
    };
    // signed-in check only; the identity itself is not needed
    ($self:ident, signed_in $viewer:ident) => {
        guard!($self);
        if $viewer.is_none() {
            return Page::RedirectToSignIn;
        }
    };
    ($self:ident, $viewer:ident) => {
        guard!($self);
        let Some($viewer) = $viewer else {
            return Page::RedirectToSignIn;
        };
    };
}

fn logged<T: Default>(source: &'static str, r: Result<T, RepoError>) -> T {
    r.unwrap_or_else(|e| {
        warn!(source, error = %e, "page query failed");
        increment_counter!("videome_page_fetch_failures_total", "source" => source);
        T::default()
    })
}

impl Pages {
    pub fn new(repo: Arc<dyn Repo>, store: Arc<dyn MediaStore>, setup: Option<SetupGuide>) -> Self {
        Self { repo, store, setup }
    }

    pub fn repo(&self) -> &Arc<dyn Repo> {
        &self.repo
    }

    pub async fn home(&self, viewer: Option<&Identity>) -> Page<HomePage> {
        guard!(self, signed_in viewer);
        let videos = logged("home", self.repo.public_videos(None).await);
        Page::Ready(HomePage { videos: cards(&videos) })
    }

    pub async fn search(&self, params: &SearchParams) -> Page<SearchPage> {
        guard!(self);
        let query = params.q.trim().to_string();
        let mut page = SearchPage { query: query.clone(), filter: params.filter, sort: params.sort, videos: vec![], channels: vec![] };
        if query.is_empty() {
            return Page::Ready(page);
        }
        if params.filter != SearchFilter::Channels {
            let mut videos = logged("search", self.repo.search_videos(&query, SEARCH_LIMIT).await);
            sort_results(&mut videos, &query, params.sort);
            page.videos = cards(&videos);
        }
        if params.filter != SearchFilter::Videos {
            let channels = logged("search", self.repo.search_channels(&query, SEARCH_LIMIT).await);
            page.channels = channels.iter().map(ChannelCard::from).collect();
        }
        Page::Ready(page)
    }

    pub async fn watch(&self, viewer: Option<&Identity>, id: Id) -> Page<WatchPage> {
        guard!(self, viewer);
        let video = match self.repo.get_video(id).await {
            Ok(v) => v,
            Err(RepoError::NotFound) => return Page::NotFound,
            Err(e) => {
                error!(video = %id, error = %e, "loading video failed");
                return Page::NotFound;
            }
        };
        if !video.visible_to(Some(viewer.id)) {
            return Page::NotFound;
        }
        let is_owner = video.is_owned_by(viewer.id);
        if !is_owner {
            if let Err(e) = self.repo.increment_views(id).await {
                warn!(video = %id, error = %e, "view count increment failed");
            }
        }
        let related = logged("watch", self.repo.related_videos(id, RELATED_LIMIT).await);
        let comments = logged("watch", self.repo.top_level_comments(id).await);

        let reaction = self.repo.reaction(viewer.id, id).await.map_err(|e| warn!(error = %e, "reaction lookup failed")).ok();
        let subscribed = if is_owner {
            Some(false)
        } else {
            self.repo.is_subscribed(viewer.id, video.user_id).await.map_err(|e| warn!(error = %e, "subscription lookup failed")).ok()
        };
        let saved = self.repo.in_watch_later(viewer.id, id).await.map_err(|e| warn!(error = %e, "watch later lookup failed")).ok();

        Page::Ready(WatchPage {
            views_label: format_count(video.views),
            likes_label: format_count(video.likes),
            related: cards(&related),
            comments,
            viewer: ViewerRelations {
                is_owner,
                liked: reaction.map(|r| r == Some(true)),
                disliked: reaction.map(|r| r == Some(false)),
                subscribed,
                saved,
            },
            video,
        })
    }

    pub async fn upload(&self, viewer: Option<&Identity>) -> Page<UploadPage> {
        guard!(self, signed_in viewer);
        Page::Ready(UploadPage {
            accepted_type: "video/*".into(),
            max_bytes: MAX_VIDEO_BYTES,
            max_title_chars: MAX_TITLE_CHARS,
            thumbnail_at_seconds: THUMBNAIL_AT_SECONDS,
        })
    }

    pub async fn my_videos(&self, viewer: Option<&Identity>) -> Page<MyVideosPage> {
        guard!(self, viewer);
        let videos = logged("my_videos", self.repo.videos_by_owner(viewer.id).await);
        let public_count = videos.iter().filter(|v| v.is_public).count();
        Page::Ready(MyVideosPage { public_count, private_count: videos.len() - public_count, videos: cards(&videos) })
    }

    pub async fn liked(&self, viewer: Option<&Identity>, offset: usize) -> Page<PagedVideos> {
        guard!(self, viewer);
        let mut list = liked_list(self.repo.clone(), viewer.id).starting_at(offset);
        let error = match list.load_next().await {
            PageLoad::Failed(e) => Some(e.to_string()),
            _ => None,
        };
        Page::Ready(PagedVideos {
            videos: list.items().iter().map(VideoCard::from).collect(),
            has_more: list.has_more(),
            next_offset: list.offset(),
            error,
        })
    }

    pub async fn watch_later(&self, viewer: Option<&Identity>) -> Page<WatchLaterPage> {
        guard!(self, viewer);
        let entries = logged("watch_later", self.repo.watch_later_entries(viewer.id).await);
        let videos = entries.iter().filter_map(|e| e.video.as_ref()).map(VideoCard::from).collect();
        Page::Ready(WatchLaterPage { videos })
    }

    pub async fn subscriptions(&self, viewer: Option<&Identity>) -> Page<SubscriptionsPage> {
        guard!(self, viewer);
        let subs = logged("subscriptions", self.repo.subscriptions_of(viewer.id).await);
        let ids: Vec<Id> = subs.iter().map(|s| s.channel_id).collect();
        let channels = logged("subscriptions", self.repo.profiles_by_ids(&ids).await);
        let videos = logged("subscriptions", self.repo.recent_videos_from(&ids, SUBSCRIPTION_FEED_LIMIT).await);
        Page::Ready(SubscriptionsPage { channels: channels.iter().map(ChannelCard::from).collect(), videos: cards(&videos) })
    }

    pub async fn trending(&self, period: TimePeriod, sort: TrendingSort, offset: usize) -> Page<TrendingPage> {
        guard!(self);
        let stats = logged("trending_stats", self.repo.trending_stats(period).await);
        let mut list = trending_list(self.repo.clone(), period, sort).starting_at(offset);
        let error = match list.load_next().await {
            PageLoad::Failed(e) => Some(e.to_string()),
            _ => None,
        };
        Page::Ready(TrendingPage {
            period,
            sort,
            stats,
            page: PagedVideos {
                videos: list.items().iter().map(VideoCard::from).collect(),
                has_more: list.has_more(),
                next_offset: list.offset(),
                error,
            },
        })
    }

    pub async fn public_profile(&self, viewer: Option<&Identity>, username: &str) -> Page<ProfilePage> {
        guard!(self);
        let profile = match self.repo.profile_by_username(username).await {
            Ok(p) => p,
            Err(e) => {
                if e != RepoError::NotFound {
                    error!(username, error = %e, "loading profile failed");
                }
                return Page::NotFound;
            }
        };
        let videos = logged("profile", self.repo.public_videos_by_owner(profile.id).await);
        let subscriber_count = logged("profile", self.repo.subscriber_count(profile.id).await);
        let is_own = viewer.map(|v| v.id == profile.id).unwrap_or(false);
        let viewer_subscribed = match viewer {
            Some(v) if !is_own => logged("profile", self.repo.is_subscribed(v.id, profile.id).await),
            _ => false,
        };
        Page::Ready(ProfilePage {
            totals: ChannelTotals {
                total_videos: videos.len(),
                total_views: videos.iter().map(|v| v.views).sum(),
                total_likes: videos.iter().map(|v| v.likes).sum(),
            },
            videos: cards(&videos),
            subscriber_count,
            viewer_subscribed,
            is_own,
            profile,
        })
    }

    pub async fn own_profile(&self, viewer: Option<&Identity>) -> Page<OwnProfilePage> {
        guard!(self, viewer);
        let profile = match self.repo.get_profile(viewer.id).await {
            Ok(p) => Some(p),
            Err(e) => {
                warn!(user = %viewer.id, error = %e, "profile fetch failed");
                None
            }
        };
        let videos = logged("own_profile", self.repo.videos_by_owner(viewer.id).await);
        let public_videos = videos.iter().filter(|v| v.is_public).count();
        let stats = OwnStats {
            total_videos: videos.len(),
            public_videos,
            private_videos: videos.len() - public_videos,
            total_views: videos.iter().map(|v| v.views).sum(),
            total_likes: videos.iter().map(|v| v.likes).sum(),
            total_comments: videos.iter().map(|v| v.comment_count).sum(),
            subscribers: logged("own_profile", self.repo.subscriber_count(viewer.id).await),
            subscriptions: logged("own_profile", self.repo.subscription_count(viewer.id).await),
        };
        Page::Ready(OwnProfilePage { identity: viewer.clone(), profile, stats })
    }

    pub async fn settings(&self, viewer: Option<&Identity>) -> Page<SettingsPage> {
        guard!(self, viewer);
        let profile = self.repo.get_profile(viewer.id).await.ok();
        let counts = account::counts(self.repo.as_ref(), viewer.id).await.unwrap_or_else(|e| {
            warn!(error = %e, "account counts failed");
            AccountCounts::default()
        });
        let storage = account::storage_usage(self.store.as_ref(), viewer.id)
            .await
            .map_err(|e| warn!(error = %e, "storage usage failed"))
            .ok();
        Page::Ready(SettingsPage { identity: viewer.clone(), profile, counts, storage })
    }

    pub fn help(&self) -> Page<HelpPage> {
        guard!(self);
        Page::Ready(HELP.clone())
    }
}

fn sort_results(videos: &mut [Video], query: &str, sort: SearchSort) {
    match sort {
        SearchSort::Relevance => {
            let q = query.to_lowercase();
            // titles starting with the query first; stable, so recency is kept within each group
            videos.sort_by_key(|v| !v.title.to_lowercase().starts_with(&q));
        }
        SearchSort::Date => videos.sort_by_key(|v| Reverse(v.created_at)),
        SearchSort::Views => videos.sort_by_key(|v| Reverse(v.views)),
        SearchSort::Rating => videos.sort_by_key(|v| Reverse(v.likes)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn video(title: &str, views: i64, likes: i64, day: u32) -> Video {
        serde_json::from_value(json!({
            "id": uuid::Uuid::new_v4(),
            "user_id": uuid::Uuid::new_v4(),
            "title": title,
            "views": views,
            "likes": likes,
            "created_at": format!("2024-01-{day:02}T00:00:00Z"),
        }))
        .unwrap()
    }

    #[test]
    fn search_sorts() {
        let mut v = vec![video("learn rust", 5, 9, 1), video("rust tips", 50, 1, 3), video("more rust", 10, 3, 2)];
        sort_results(&mut v, "rust", SearchSort::Relevance);
        assert_eq!(v[0].title, "rust tips");
        sort_results(&mut v, "rust", SearchSort::Date);
        assert_eq!(v[0].title, "rust tips");
        sort_results(&mut v, "rust", SearchSort::Views);
        assert_eq!(v.iter().map(|x| x.views).collect::<Vec<_>>(), vec![50, 10, 5]);
        sort_results(&mut v, "rust", SearchSort::Rating);
        assert_eq!(v[0].likes, 9);
    }

    #[test]
    fn card_labels() {
        let card = VideoCard::from(&video("x", 1_500, 0, 1));
        assert_eq!(card.views_label, "1.5K");
        assert_eq!(card.duration_label, "0:00");
    }
}
