use std::sync::Arc;

use async_trait::async_trait;
use metrics::increment_counter;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};
use utoipa::ToSchema;

use crate::models::{Id, NewVideo, Video};
use crate::repo::{Repo, RepoError};
use crate::storage::{MediaStore, StoreError, THUMBNAIL_BUCKET, VIDEO_BUCKET};

pub const MAX_VIDEO_BYTES: usize = 100 * 1024 * 1024;
pub const THUMBNAIL_AT_SECONDS: f64 = 1.0;
pub const MAX_TITLE_CHARS: usize = 100;

#[derive(Debug, Error, PartialEq)]
pub enum UploadError {
    #[error("You must be signed in to upload videos")]
    NotAuthenticated,
    #[error("Please select a valid video file (got {0})")]
    InvalidType(String),
    #[error("File size must be less than 100MB")]
    TooLarge { size: usize },
    #[error("Please select a video file and provide a title")]
    MissingTitle,
    #[error("video upload failed: {0}")]
    VideoUpload(StoreError),
    #[error("saving video details failed: {0}")]
    Metadata(RepoError),
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Tool(String),
}

/// A file picked by the user, as received.
#[derive(Debug, Clone)]
pub struct SelectedFile {
    pub name: String,
    pub declared_type: String,
    pub bytes: Vec<u8>,
}

impl SelectedFile {
    pub fn extension(&self) -> &str {
        match self.name.rsplit_once('.') {
            Some((_, ext)) if !ext.is_empty() => ext,
            _ => "mp4",
        }
    }

    /// File name without its extension.
    pub fn stem(&self) -> &str {
        match self.name.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem,
            _ => &self.name,
        }
    }

    /// Type and size checks; runs before any network call.
    pub fn validate(&self) -> Result<(), UploadError> {
        if !self.declared_type.starts_with("video/") {
            return Err(UploadError::InvalidType(self.declared_type.clone()));
        }
        if self.bytes.len() > MAX_VIDEO_BYTES {
            return Err(UploadError::TooLarge { size: self.bytes.len() });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct VideoMetadata {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "public_by_default")]
    pub is_public: bool,
}

fn public_by_default() -> bool {
    true
}

impl Default for VideoMetadata {
    fn default() -> Self {
        Self { title: String::new(), description: String::new(), tags: Vec::new(), is_public: true }
    }
}

impl VideoMetadata {
    /// Fill an empty title from the file name.
    pub fn default_title_from(&mut self, file: &SelectedFile) {
        if self.title.trim().is_empty() {
            self.title = file.stem().chars().take(MAX_TITLE_CHARS).collect();
        }
    }

    /// Adds a trimmed, non-empty tag once. Returns whether it was added.
    pub fn add_tag(&mut self, tag: &str) -> bool {
        let tag = tag.trim();
        if tag.is_empty() || self.tags.iter().any(|t| t == tag) {
            return false;
        }
        self.tags.push(tag.to_string());
        true
    }

    pub fn remove_tag(&mut self, tag: &str) {
        self.tags.retain(|t| t != tag);
    }
}

/// Reads duration and still frames out of a video.
#[async_trait]
pub trait FrameGrabber: Send + Sync {
    async fn duration_secs(&self, video: &[u8]) -> Result<i64, FrameError>;
    /// JPEG of the frame at `at_secs`.
    async fn frame_at(&self, video: &[u8], at_secs: f64) -> Result<Vec<u8>, FrameError>;
}

pub struct FfmpegFrameGrabber {
    ffmpeg: String,
    ffprobe: String,
}

impl FfmpegFrameGrabber {
    pub fn new(ffmpeg: impl Into<String>, ffprobe: impl Into<String>) -> Self {
        Self { ffmpeg: ffmpeg.into(), ffprobe: ffprobe.into() }
    }

    async fn scratch(video: &[u8]) -> Result<tempfile::NamedTempFile, FrameError> {
        let file = tempfile::Builder::new().prefix("videome-").tempfile()?;
        tokio::fs::write(file.path(), video).await?;
        Ok(file)
    }

    async fn run(program: &str, args: &[&str]) -> Result<Vec<u8>, FrameError> {
        let out = tokio::process::Command::new(program).args(args).output().await?;
        if !out.status.success() {
            return Err(FrameError::Tool(format!(
                "{program} exited with {}: {}",
                out.status,
                String::from_utf8_lossy(&out.stderr).trim()
            )));
        }
        Ok(out.stdout)
    }
}

#[async_trait]
impl FrameGrabber for FfmpegFrameGrabber {
    async fn duration_secs(&self, video: &[u8]) -> Result<i64, FrameError> {
        let file = Self::scratch(video).await?;
        let input = file.path().to_string_lossy().into_owned();
        let args = ["-v", "error", "-show_entries", "format=duration", "-of", "default=noprint_wrappers=1:nokey=1", input.as_str()];
        let out = Self::run(&self.ffprobe, &args).await?;
        let text = String::from_utf8_lossy(&out);
        text.trim()
            .parse::<f64>()
            .map(|d| d.floor() as i64)
            .map_err(|e| FrameError::Tool(format!("unreadable duration {text:?}: {e}")))
    }

    async fn frame_at(&self, video: &[u8], at_secs: f64) -> Result<Vec<u8>, FrameError> {
        let file = Self::scratch(video).await?;
        let input = file.path().to_string_lossy().into_owned();
        let at = format!("{at_secs}");
        let args = [
            "-hide_banner", "-loglevel", "error", "-ss", at.as_str(), "-i", input.as_str(),
            "-frames:v", "1", "-q:v", "3", "-f", "image2", "-c:v", "mjpeg", "pipe:1",
        ];
        let jpeg = Self::run(&self.ffmpeg, &args).await?;
        if jpeg.is_empty() {
            return Err(FrameError::Tool("no frame produced".into()));
        }
        Ok(jpeg)
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UploadReport {
    pub video: Video,
    /// Set when the row was saved without a thumbnail.
    pub thumbnail_error: Option<String>,
}

pub struct UploadPipeline {
    repo: Arc<dyn Repo>,
    store: Arc<dyn MediaStore>,
    frames: Arc<dyn FrameGrabber>,
}

impl UploadPipeline {
    pub fn new(repo: Arc<dyn Repo>, store: Arc<dyn MediaStore>, frames: Arc<dyn FrameGrabber>) -> Self {
        Self { repo, store, frames }
    }

    pub async fn run(&self, user: Option<Id>, file: SelectedFile, mut meta: VideoMetadata) -> Result<UploadReport, UploadError> {
        let result = self.run_inner(user, &file, &mut meta).await;
        let outcome = match &result {
            Ok(r) if r.thumbnail_error.is_some() => "ok_without_thumbnail",
            Ok(_) => "ok",
            Err(UploadError::VideoUpload(_)) => "video_upload_failed",
            Err(UploadError::Metadata(_)) => "metadata_failed",
            Err(_) => "rejected",
        };
        increment_counter!("videome_upload_total", "outcome" => outcome);
        result
    }

    async fn run_inner(&self, user: Option<Id>, file: &SelectedFile, meta: &mut VideoMetadata) -> Result<UploadReport, UploadError> {
        let user = user.ok_or(UploadError::NotAuthenticated)?;
        file.validate()?;
        meta.default_title_from(file);
        let title = meta.title.trim();
        if title.is_empty() {
            return Err(UploadError::MissingTitle);
        }

        let duration = match self.frames.duration_secs(&file.bytes).await {
            Ok(d) => d,
            Err(e) => {
                warn!(error = %e, file = %file.name, "duration probe failed; storing 0");
                0
            }
        };
        let frame = self.frames.frame_at(&file.bytes, THUMBNAIL_AT_SECONDS).await;

        let video_path = format!("{}/{}.{}", user, chrono::Utc::now().timestamp_millis(), file.extension());
        self.store
            .upload(VIDEO_BUCKET, &video_path, &file.bytes, &file.declared_type, false)
            .await
            .map_err(|e| {
                error!(error = %e, path = %video_path, "video upload failed");
                UploadError::VideoUpload(e)
            })?;
        let video_url = self.store.public_url(VIDEO_BUCKET, &video_path);

        let (thumbnail_url, thumbnail_path, thumbnail_error) = match frame {
            Ok(jpeg) => {
                let path = format!("{}/thumbnails/{}.jpg", user, chrono::Utc::now().timestamp_millis());
                let mime = infer::get(&jpeg).map(|t| t.mime_type()).unwrap_or("image/jpeg");
                match self.store.upload(THUMBNAIL_BUCKET, &path, &jpeg, mime, false).await {
                    Ok(()) => (Some(self.store.public_url(THUMBNAIL_BUCKET, &path)), Some(path), None),
                    Err(e) => {
                        warn!(error = %e, "thumbnail upload failed; continuing without thumbnail");
                        (None, None, Some(e.to_string()))
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "thumbnail capture failed; continuing without thumbnail");
                (None, None, Some(e.to_string()))
            }
        };

        let description = meta.description.trim();
        let row = NewVideo {
            user_id: user,
            title: title.to_string(),
            description: (!description.is_empty()).then(|| description.to_string()),
            video_url,
            thumbnail_url,
            duration,
            tags: (!meta.tags.is_empty()).then(|| meta.tags.clone()),
            is_public: meta.is_public,
            views: 0,
            likes: 0,
        };
        let video = self.repo.insert_video(row).await.map_err(|e| {
            error!(
                error = %e,
                video = %video_path,
                thumbnail = ?thumbnail_path,
                "metadata insert failed; uploaded objects are orphaned"
            );
            UploadError::Metadata(e)
        })?;
        info!(video_id = %video.id, user = %user, "video uploaded");
        Ok(UploadReport { video, thumbnail_error })
    }
}
