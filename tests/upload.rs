#![cfg(feature = "inmem-store")]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use uuid::Uuid;
use videome::gateway::inmem::InMemGateway;
use videome::repo::{GatewayRepo, Repo};
use videome::storage::inmem::MemoryStore;
use videome::storage::{THUMBNAIL_BUCKET, VIDEO_BUCKET};
use videome::upload::{
    FrameError, FrameGrabber, SelectedFile, UploadError, UploadPipeline, VideoMetadata, MAX_VIDEO_BYTES,
};

// smallest JPEG header `infer` recognises
const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F'];

struct StubFrames {
    broken: bool,
    calls: AtomicUsize,
}

impl StubFrames {
    fn working() -> Arc<Self> {
        Arc::new(Self { broken: false, calls: AtomicUsize::new(0) })
    }

    fn broken() -> Arc<Self> {
        Arc::new(Self { broken: true, calls: AtomicUsize::new(0) })
    }
}

#[async_trait::async_trait]
impl FrameGrabber for StubFrames {
    async fn duration_secs(&self, _video: &[u8]) -> Result<i64, FrameError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(42)
    }

    async fn frame_at(&self, _video: &[u8], at_secs: f64) -> Result<Vec<u8>, FrameError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert_eq!(at_secs, 1.0);
        if self.broken {
            return Err(FrameError::Tool("cannot seek".into()));
        }
        Ok(JPEG.to_vec())
    }
}

struct Fixture {
    gw: InMemGateway,
    store: MemoryStore,
    frames: Arc<StubFrames>,
    pipeline: UploadPipeline,
}

fn fixture(frames: Arc<StubFrames>) -> Fixture {
    let gw = InMemGateway::new();
    let store = MemoryStore::new();
    let repo: Arc<dyn Repo> = Arc::new(GatewayRepo::new(Arc::new(gw.clone())));
    let pipeline = UploadPipeline::new(repo, Arc::new(store.clone()), frames.clone());
    Fixture { gw, store, frames, pipeline }
}

fn video(name: &str, len: usize) -> SelectedFile {
    SelectedFile { name: name.into(), declared_type: "video/mp4".into(), bytes: vec![7; len] }
}

fn meta(title: &str) -> VideoMetadata {
    VideoMetadata { title: title.into(), ..VideoMetadata::default() }
}

#[tokio::test]
async fn uploads_video_thumbnail_then_row() {
    let f = fixture(StubFrames::working());
    let user = Uuid::new_v4();
    let mut m = meta("My trip");
    m.add_tag("travel");

    let report = f.pipeline.run(Some(user), video("trip.mov", 64), m).await.unwrap();

    assert!(report.thumbnail_error.is_none());
    assert_eq!(report.video.title, "My trip");
    assert_eq!(report.video.duration, 42);
    assert_eq!(report.video.tags, vec!["travel".to_string()]);

    let videos = f.store.paths(VIDEO_BUCKET);
    assert_eq!(videos.len(), 1);
    assert!(videos[0].starts_with(&format!("{user}/")) && videos[0].ends_with(".mov"));
    let thumbs = f.store.paths(THUMBNAIL_BUCKET);
    assert!(thumbs[0].starts_with(&format!("{user}/thumbnails/")) && thumbs[0].ends_with(".jpg"));
    let (_, mime) = f.store.object(THUMBNAIL_BUCKET, &thumbs[0]).unwrap();
    assert_eq!(mime, "image/jpeg");

    assert!(report.video.video_url.as_deref().unwrap().ends_with(&videos[0]));
    assert_eq!(f.gw.rows("videos").len(), 1);
}

#[tokio::test]
async fn invalid_files_never_reach_the_network() {
    let f = fixture(StubFrames::working());
    let user = Uuid::new_v4();

    let image = SelectedFile { name: "cat.png".into(), declared_type: "image/png".into(), bytes: vec![1; 8] };
    let err = f.pipeline.run(Some(user), image, meta("cat")).await.unwrap_err();
    assert_eq!(err, UploadError::InvalidType("image/png".into()));

    let err = f.pipeline.run(Some(user), video("big.mp4", MAX_VIDEO_BYTES + 1), meta("big")).await.unwrap_err();
    assert!(matches!(err, UploadError::TooLarge { .. }));

    let err = f.pipeline.run(None, video("a.mp4", 8), meta("a")).await.unwrap_err();
    assert_eq!(err, UploadError::NotAuthenticated);

    assert!(f.gw.calls().is_empty());
    assert!(f.store.paths(VIDEO_BUCKET).is_empty());
    assert_eq!(f.frames.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn failed_video_upload_inserts_nothing() {
    let f = fixture(StubFrames::working());
    f.store.fail_bucket(VIDEO_BUCKET);

    let err = f.pipeline.run(Some(Uuid::new_v4()), video("a.mp4", 8), meta("a")).await.unwrap_err();
    assert!(matches!(err, UploadError::VideoUpload(_)));
    assert!(f.gw.calls().is_empty());
    assert!(f.store.paths(THUMBNAIL_BUCKET).is_empty());
}

#[tokio::test]
async fn thumbnail_failures_are_not_fatal() {
    let f = fixture(StubFrames::broken());
    let report = f.pipeline.run(Some(Uuid::new_v4()), video("a.mp4", 8), meta("a")).await.unwrap();
    assert!(report.thumbnail_error.is_some());
    assert!(report.video.thumbnail_url.is_none());

    let f = fixture(StubFrames::working());
    f.store.fail_bucket(THUMBNAIL_BUCKET);
    let report = f.pipeline.run(Some(Uuid::new_v4()), video("b.mp4", 8), meta("b")).await.unwrap();
    assert!(report.thumbnail_error.is_some());
    assert_eq!(f.gw.rows("videos").len(), 1);
    assert_eq!(f.store.paths(VIDEO_BUCKET).len(), 1);
}

#[tokio::test]
async fn metadata_failure_leaves_uploaded_objects() {
    let f = fixture(StubFrames::working());
    f.gw.fail_on("insert", "videos");

    let err = f.pipeline.run(Some(Uuid::new_v4()), video("a.mp4", 8), meta("a")).await.unwrap_err();
    assert!(matches!(err, UploadError::Metadata(_)));
    assert_eq!(f.store.paths(VIDEO_BUCKET).len(), 1);
    assert_eq!(f.store.paths(THUMBNAIL_BUCKET).len(), 1);
    assert!(f.gw.rows("videos").is_empty());
}

#[tokio::test]
async fn empty_title_falls_back_to_file_name() {
    let f = fixture(StubFrames::working());
    let report = f.pipeline.run(Some(Uuid::new_v4()), video("sunset.mp4", 8), meta("  ")).await.unwrap();
    assert_eq!(report.video.title, "sunset");
}
