use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

// Every row id in the hosted backend is a UUID
pub type Id = Uuid;

/// Treats an explicit JSON `null` the same as a missing field.
fn null_as_default<'de, D, T>(d: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(d)?.unwrap_or_default())
}

/// Signed-in account as reported by the auth service.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct Identity {
    pub id: Id,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub email_confirmed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct Profile {
    pub id: Id,
    pub username: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Profile {
    pub fn display_name(&self) -> &str {
        match self.full_name.as_deref() {
            Some(name) if !name.trim().is_empty() => name,
            _ => &self.username,
        }
    }
}

/// Owner columns embedded into video and comment rows.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct ChannelSummary {
    #[serde(default)]
    pub id: Option<Id>,
    pub username: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct Video {
    pub id: Id,
    pub user_id: Id,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub video_url: Option<String>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub duration: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub views: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub likes: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub comment_count: i64,
    #[serde(default = "default_true")]
    pub is_public: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    /// Embedded owner profile (`profiles` relation).
    #[serde(default, rename = "profiles")]
    pub owner: Option<ChannelSummary>,
}

fn default_true() -> bool {
    true
}

impl Video {
    pub fn is_owned_by(&self, user: Id) -> bool {
        self.user_id == user
    }

    /// Private videos are visible to their owner only.
    pub fn visible_to(&self, viewer: Option<Id>) -> bool {
        self.is_public || viewer.map(|v| self.is_owned_by(v)).unwrap_or(false)
    }
}

/// Metadata row inserted at the end of an upload.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewVideo {
    pub user_id: Id,
    pub title: String,
    pub description: Option<String>,
    pub video_url: String,
    pub thumbnail_url: Option<String>,
    pub duration: i64,
    pub tags: Option<Vec<String>>,
    pub is_public: bool,
    pub views: i64,
    pub likes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct VideoLike {
    pub user_id: Id,
    pub video_id: Id,
    pub is_like: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct Subscription {
    pub subscriber_id: Id,
    pub channel_id: Id,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct WatchLaterEntry {
    pub user_id: Id,
    pub video_id: Id,
    pub created_at: DateTime<Utc>,
    #[serde(default, rename = "videos")]
    pub video: Option<Video>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct Comment {
    pub id: Id,
    pub video_id: Id,
    pub user_id: Id,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub parent_id: Option<Id>,
    #[serde(default, rename = "profiles")]
    pub author: Option<ChannelSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewComment {
    pub video_id: Id,
    pub user_id: Id,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Id>,
}

/// Row inserted right after the auth account is created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProfile {
    pub id: Id,
    pub username: String,
    pub email: String,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProfileUpdate {
    pub username: String,
    pub full_name: String,
    pub bio: String,
    pub website: String,
    pub avatar_url: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Row shape returned by `get_liked_videos`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct LikedVideo {
    pub id: Id,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub video_url: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub duration: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub views: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub likes: i64,
    pub created_at: DateTime<Utc>,
    pub user_id: Id,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub liked_at: Option<DateTime<Utc>>,
}

/// Row shape returned by `get_trending_videos`. Scores are computed server side.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct TrendingVideo {
    pub id: Id,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub video_url: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub duration: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub view_count: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub like_count: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub comment_count: i64,
    pub created_at: DateTime<Utc>,
    pub user_id: Id,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub trending_score: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub engagement_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct TrendingStats {
    #[serde(default, deserialize_with = "null_as_default")]
    pub total_videos: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub total_views: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub total_likes: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub total_comments: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub avg_engagement_rate: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema, PartialEq, Eq, Default)]
pub enum TimePeriod {
    #[serde(rename = "1h")]
    LastHour,
    #[serde(rename = "6h")]
    LastSixHours,
    #[default]
    #[serde(rename = "24h")]
    LastDay,
    #[serde(rename = "7d")]
    LastWeek,
    #[serde(rename = "30d")]
    LastMonth,
}

impl TimePeriod {
    pub fn as_param(self) -> &'static str {
        match self {
            TimePeriod::LastHour => "1h",
            TimePeriod::LastSixHours => "6h",
            TimePeriod::LastDay => "24h",
            TimePeriod::LastWeek => "7d",
            TimePeriod::LastMonth => "30d",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TrendingSort {
    #[default]
    Trending,
    Views,
    Likes,
    Comments,
    Recent,
}

impl TrendingSort {
    pub fn as_param(self) -> &'static str {
        match self {
            TrendingSort::Trending => "trending",
            TrendingSort::Views => "views",
            TrendingSort::Likes => "likes",
            TrendingSort::Comments => "comments",
            TrendingSort::Recent => "recent",
        }
    }
}
