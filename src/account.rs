use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use utoipa::ToSchema;

use crate::auth::{AuthClient, AuthError};
use crate::models::{Id, Identity, ProfileUpdate};
use crate::repo::{Repo, RepoError};
use crate::session::MIN_PASSWORD_LEN;
use crate::storage::{object_path_from_public_url, MediaStore, StoreError, THUMBNAIL_BUCKET, VIDEO_BUCKET};

pub const MAX_BIO_CHARS: usize = 500;
pub const MAX_AVATAR_BYTES: usize = 5 * 1024 * 1024;
pub const STORAGE_QUOTA_BYTES: u64 = 5 * 1024 * 1024 * 1024;

#[derive(Debug, Error, PartialEq)]
pub enum AccountError {
    #[error("{0}")]
    Validation(String),
    #[error("not found")]
    NotFound,
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Auth(#[from] AuthError),
}

pub type AccountResult<T> = Result<T, AccountError>;

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ProfileForm {
    pub username: String,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub bio: String,
    #[serde(default)]
    pub website: String,
}

#[derive(Debug, Clone)]
pub struct AvatarFile {
    pub name: String,
    pub declared_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, ToSchema, PartialEq, Default)]
pub struct AccountCounts {
    pub videos: u64,
    pub subscriptions: u64,
    pub subscribers: u64,
}

#[derive(Debug, Clone, Serialize, ToSchema, PartialEq)]
pub struct StorageUsage {
    pub video_bytes: u64,
    pub thumbnail_bytes: u64,
    pub total_bytes: u64,
    pub quota_bytes: u64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ExportUser {
    pub id: Id,
    pub email: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DataExport {
    pub user: ExportUser,
    pub statistics: AccountCounts,
    #[serde(rename = "exportDate")]
    pub export_date: DateTime<Utc>,
}

pub async fn counts(repo: &dyn Repo, user: Id) -> AccountResult<AccountCounts> {
    Ok(AccountCounts {
        videos: repo.videos_by_owner(user).await?.len() as u64,
        subscriptions: repo.subscription_count(user).await?,
        subscribers: repo.subscriber_count(user).await?,
    })
}

/// Bytes stored under the user's folders in both buckets.
pub async fn storage_usage(store: &dyn MediaStore, user: Id) -> AccountResult<StorageUsage> {
    let root = user.to_string();
    let sum = |objs: Vec<crate::storage::ObjectInfo>| objs.iter().map(|o| o.size).sum::<u64>();
    let video_bytes = sum(store.list(VIDEO_BUCKET, &root).await?);
    let thumbnail_bytes = sum(store.list(THUMBNAIL_BUCKET, &root).await?)
        + sum(store.list(THUMBNAIL_BUCKET, &format!("{root}/thumbnails")).await?);
    Ok(StorageUsage {
        video_bytes,
        thumbnail_bytes,
        total_bytes: video_bytes + thumbnail_bytes,
        quota_bytes: STORAGE_QUOTA_BYTES,
    })
}

/// Settings-page mutations for the signed-in user.
pub struct AccountService {
    repo: Arc<dyn Repo>,
    store: Arc<dyn MediaStore>,
    auth: Arc<dyn AuthClient>,
}

impl AccountService {
    pub fn new(repo: Arc<dyn Repo>, store: Arc<dyn MediaStore>, auth: Arc<dyn AuthClient>) -> Self {
        Self { repo, store, auth }
    }

    pub async fn update_profile(&self, user: Id, form: ProfileForm, avatar: Option<AvatarFile>) -> AccountResult<()> {
        let username = form.username.trim();
        if username.is_empty() {
            return Err(AccountError::Validation("Username is required".into()));
        }
        if form.bio.chars().count() > MAX_BIO_CHARS {
            return Err(AccountError::Validation(format!("Bio must be at most {MAX_BIO_CHARS} characters")));
        }
        if let Some(a) = &avatar {
            if !a.declared_type.starts_with("image/") {
                return Err(AccountError::Validation("Please select an image file".into()));
            }
            if a.bytes.len() > MAX_AVATAR_BYTES {
                return Err(AccountError::Validation("Image must be less than 5MB".into()));
            }
        }

        let avatar_url = match avatar {
            Some(a) => {
                let ext = a.name.rsplit_once('.').map(|(_, e)| e).filter(|e| !e.is_empty()).unwrap_or("png");
                let path = format!("{user}/avatar.{ext}");
                self.store.upload(THUMBNAIL_BUCKET, &path, &a.bytes, &a.declared_type, true).await?;
                Some(self.store.public_url(THUMBNAIL_BUCKET, &path))
            }
            None => match self.repo.get_profile(user).await {
                Ok(p) => p.avatar_url,
                Err(RepoError::NotFound) => None,
                Err(e) => return Err(e.into()),
            },
        };

        let update = ProfileUpdate {
            username: username.to_string(),
            full_name: form.full_name.trim().to_string(),
            bio: form.bio.trim().to_string(),
            website: form.website.trim().to_string(),
            avatar_url,
            updated_at: Utc::now(),
        };
        self.repo.update_profile(user, update).await?;
        info!(%user, "profile updated");
        Ok(())
    }

    pub async fn change_password(&self, access_token: &str, new_password: &str, confirm: &str) -> AccountResult<()> {
        if new_password != confirm {
            return Err(AccountError::Validation("New passwords do not match".into()));
        }
        if new_password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AccountError::Validation("Password must be at least 6 characters long".into()));
        }
        self.auth.update_password(access_token, new_password).await?;
        Ok(())
    }

    pub async fn export(&self, identity: &Identity) -> AccountResult<DataExport> {
        Ok(DataExport {
            user: ExportUser { id: identity.id, email: identity.email.clone(), created_at: identity.created_at },
            statistics: counts(self.repo.as_ref(), identity.id).await?,
            export_date: Utc::now(),
        })
    }

    /// Profile, then videos, then subscriptions. Stops at the first failure.
    pub async fn delete_account(&self, user: Id) -> AccountResult<()> {
        self.repo.delete_profile(user).await?;
        self.repo.delete_videos_of(user).await?;
        self.repo.delete_subscriptions_of(user).await?;
        info!(%user, "account data deleted");
        Ok(())
    }

    /// Owner-only. The row goes first; blob removal afterwards is best effort.
    pub async fn delete_video(&self, user: Id, video: Id) -> AccountResult<()> {
        let v = match self.repo.get_video(video).await {
            Ok(v) if v.is_owned_by(user) => v,
            Ok(_) | Err(RepoError::NotFound) => return Err(AccountError::NotFound),
            Err(e) => return Err(e.into()),
        };
        self.repo.delete_video(video).await?;

        let blobs = [
            (VIDEO_BUCKET, v.video_url.as_deref()),
            (THUMBNAIL_BUCKET, v.thumbnail_url.as_deref()),
        ];
        for (bucket, url) in blobs {
            let Some(path) = url.and_then(|u| object_path_from_public_url(u, bucket)) else { continue };
            if let Err(e) = self.store.remove(bucket, &[path.clone()]).await {
                warn!(%video, bucket, %path, error = %e, "blob removal failed after row delete");
            }
        }
        info!(%user, %video, "video deleted");
        Ok(())
    }
}
