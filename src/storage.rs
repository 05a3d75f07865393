use async_trait::async_trait;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::config::AppConfig;

pub const VIDEO_BUCKET: &str = "videos";
pub const THUMBNAIL_BUCKET: &str = "thumbnails";

#[derive(Debug, Error, Clone, PartialEq)]
pub enum StoreError {
    #[error("duplicate")]
    Duplicate,
    #[error("not_found")]
    NotFound,
    #[error("storage not configured")]
    NotConfigured,
    #[error("other: {0}")]
    Other(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObjectInfo {
    pub name: String,
    pub size: u64,
}

/// Object storage buckets of the hosted backend.
#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Store `bytes` at `path`; fails with `Duplicate` when the object exists and `upsert` is false.
    async fn upload(&self, bucket: &str, path: &str, bytes: &[u8], content_type: &str, upsert: bool) -> StoreResult<()>;
    /// Objects directly under `prefix`.
    async fn list(&self, bucket: &str, prefix: &str) -> StoreResult<Vec<ObjectInfo>>;
    /// Best-effort removal; missing objects are not an error.
    async fn remove(&self, bucket: &str, paths: &[String]) -> StoreResult<()>;
    fn public_url(&self, bucket: &str, path: &str) -> String;
    fn authorized(&self, access_token: &str) -> Arc<dyn MediaStore>;
}

pub fn public_object_url(base: &str, bucket: &str, path: &str) -> String {
    format!("{}/storage/v1/object/public/{}/{}", base.trim_end_matches('/'), bucket, path)
}

/// Inverse of [`public_object_url`]: the object path inside `bucket`, if the URL points there.
pub fn object_path_from_public_url(url: &str, bucket: &str) -> Option<String> {
    let marker = format!("/object/public/{bucket}/");
    let start = url.find(&marker)? + marker.len();
    let path = url[start..].split(['?', '#']).next().unwrap_or_default();
    (!path.is_empty()).then(|| path.to_string())
}

fn encode_path(path: &str) -> String {
    path.split('/').map(|seg| urlencoding::encode(seg).into_owned()).collect::<Vec<_>>().join("/")
}

// ---------------- REST implementation (storage API) ----------------
#[derive(Clone)]
pub struct RestMediaStore {
    http: reqwest::Client,
    base: String,
    anon_key: String,
    access_token: Option<String>,
}

#[derive(Deserialize)]
struct ListedObject {
    name: String,
    #[serde(default)]
    metadata: Option<ListedMetadata>,
}

#[derive(Deserialize)]
struct ListedMetadata {
    #[serde(default)]
    size: Option<u64>,
}

impl RestMediaStore {
    pub fn new(base: &str, anon_key: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: base.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            access_token: None,
        }
    }

    fn request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        let bearer = self.access_token.as_deref().unwrap_or(&self.anon_key);
        self.http.request(method, url).header("apikey", &self.anon_key).bearer_auth(bearer)
    }

    async fn check(resp: reqwest::Response) -> StoreResult<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        if status.as_u16() == 409 || body.contains("Duplicate") || body.contains("already exists") {
            return Err(StoreError::Duplicate);
        }
        if status.as_u16() == 404 {
            return Err(StoreError::NotFound);
        }
        error!("storage request failed status={status} body={body}");
        Err(StoreError::Other(format!("{status}: {body}")))
    }
}

#[async_trait]
impl MediaStore for RestMediaStore {
    async fn upload(&self, bucket: &str, path: &str, bytes: &[u8], content_type: &str, upsert: bool) -> StoreResult<()> {
        let url = format!("{}/storage/v1/object/{}/{}", self.base, bucket, encode_path(path));
        let resp = self
            .request(reqwest::Method::POST, url)
            .header("content-type", content_type)
            .header("x-upsert", if upsert { "true" } else { "false" })
            .header("cache-control", "3600")
            .body(bytes.to_vec())
            .send()
            .await
            .map_err(|e| StoreError::Other(e.to_string()))?;
        Self::check(resp).await.map(|_| ())
    }

    async fn list(&self, bucket: &str, prefix: &str) -> StoreResult<Vec<ObjectInfo>> {
        let url = format!("{}/storage/v1/object/list/{}", self.base, bucket);
        let body = serde_json::json!({ "prefix": prefix, "limit": 1000, "offset": 0 });
        let resp = self
            .request(reqwest::Method::POST, url)
            .json(&body)
            .send()
            .await
            .map_err(|e| StoreError::Other(e.to_string()))?;
        let listed: Vec<ListedObject> = Self::check(resp)
            .await?
            .json()
            .await
            .map_err(|e| StoreError::Other(e.to_string()))?;
        // folders come back without metadata
        Ok(listed
            .into_iter()
            .filter_map(|o| {
                let size = o.metadata?.size?;
                Some(ObjectInfo { name: o.name, size })
            })
            .collect())
    }

    async fn remove(&self, bucket: &str, paths: &[String]) -> StoreResult<()> {
        if paths.is_empty() {
            return Ok(());
        }
        let url = format!("{}/storage/v1/object/{}", self.base, bucket);
        let resp = self
            .request(reqwest::Method::DELETE, url)
            .json(&serde_json::json!({ "prefixes": paths }))
            .send()
            .await
            .map_err(|e| StoreError::Other(e.to_string()))?;
        match Self::check(resp).await {
            Ok(_) | Err(StoreError::NotFound) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        public_object_url(&self.base, bucket, path)
    }

    fn authorized(&self, access_token: &str) -> Arc<dyn MediaStore> {
        let mut scoped = self.clone();
        scoped.access_token = Some(access_token.to_string());
        Arc::new(scoped)
    }
}

// ---------------- S3 protocol implementation ----------------
#[derive(Clone)]
pub struct S3MediaStore {
    client: aws_sdk_s3::Client,
    public_base: String,
}

impl S3MediaStore {
    pub async fn new(config: &AppConfig) -> anyhow::Result<Self> {
        use aws_credential_types::provider::SharedCredentialsProvider;
        use aws_credential_types::Credentials;

        let backend = config
            .backend
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("SUPABASE_URL must be set for S3 storage"))?;
        let s3 = config
            .s3
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("SUPABASE_S3_ACCESS_KEY/SUPABASE_S3_SECRET_KEY must be set"))?;
        let endpoint = format!("{}/storage/v1/s3", backend.url);

        let creds = Credentials::new(s3.access_key.clone(), s3.secret_key.clone(), None, None, "static");
        let conf = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new(s3.region.clone()))
            .endpoint_url(&endpoint)
            .credentials_provider(SharedCredentialsProvider::new(creds))
            .load()
            .await;
        // the storage gateway only understands path-style addressing
        let s3_conf = aws_sdk_s3::config::Builder::from(&conf).force_path_style(true).build();
        let client = aws_sdk_s3::Client::from_conf(s3_conf);
        info!("Initialized S3 storage client endpoint={endpoint}");

        for bucket in [VIDEO_BUCKET, THUMBNAIL_BUCKET] {
            if let Err(e) = client.head_bucket().bucket(bucket).send().await {
                warn!("head_bucket failed for '{bucket}': {e:?}; uploads to it will fail until it exists");
            }
        }

        Ok(Self { client, public_base: backend.url.clone() })
    }
}

#[async_trait]
impl MediaStore for S3MediaStore {
    async fn upload(&self, bucket: &str, path: &str, bytes: &[u8], content_type: &str, upsert: bool) -> StoreResult<()> {
        use aws_sdk_s3::primitives::ByteStream;
        if !upsert && self.client.head_object().bucket(bucket).key(path).send().await.is_ok() {
            return Err(StoreError::Duplicate);
        }
        let put = self
            .client
            .put_object()
            .bucket(bucket)
            .key(path)
            .body(ByteStream::from(bytes.to_vec()))
            .content_type(content_type);
        if let Err(e) = put.send().await {
            error!("put_object failed bucket={bucket} key={path} err={e:?}");
            let hint = if e.to_string().contains("NoSuchBucket") {
                " (bucket missing)"
            } else if e.to_string().contains("AccessDenied") {
                " (check SUPABASE_S3_ACCESS_KEY/SUPABASE_S3_SECRET_KEY)"
            } else {
                ""
            };
            return Err(StoreError::Other(format!("{e}{hint}")));
        }
        Ok(())
    }

    async fn list(&self, bucket: &str, prefix: &str) -> StoreResult<Vec<ObjectInfo>> {
        let prefix = format!("{}/", prefix.trim_end_matches('/'));
        let out = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(&prefix)
            .delimiter("/")
            .send()
            .await
            .map_err(|e| StoreError::Other(e.to_string()))?;
        Ok(out
            .contents()
            .iter()
            .filter_map(|o| {
                let key = o.key()?;
                Some(ObjectInfo {
                    name: key.strip_prefix(&prefix).unwrap_or(key).to_string(),
                    size: o.size().unwrap_or(0).max(0) as u64,
                })
            })
            .collect())
    }

    async fn remove(&self, bucket: &str, paths: &[String]) -> StoreResult<()> {
        for path in paths {
            // not-found counts as removed
            if let Err(e) = self.client.delete_object().bucket(bucket).key(path).send().await {
                warn!("delete_object failed bucket={bucket} key={path} err={e:?}");
            }
        }
        Ok(())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        public_object_url(&self.public_base, bucket, path)
    }

    fn authorized(&self, _access_token: &str) -> Arc<dyn MediaStore> {
        Arc::new(self.clone())
    }
}

// ---------------- Stub used while credentials are missing ----------------
#[derive(Clone, Default)]
pub struct UnconfiguredStore;

#[async_trait]
impl MediaStore for UnconfiguredStore {
    async fn upload(&self, _bucket: &str, _path: &str, _bytes: &[u8], _content_type: &str, _upsert: bool) -> StoreResult<()> {
        Err(StoreError::NotConfigured)
    }
    async fn list(&self, _bucket: &str, _prefix: &str) -> StoreResult<Vec<ObjectInfo>> {
        Ok(Vec::new())
    }
    async fn remove(&self, _bucket: &str, _paths: &[String]) -> StoreResult<()> {
        Err(StoreError::NotConfigured)
    }
    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("/{bucket}/{path}")
    }
    fn authorized(&self, _access_token: &str) -> Arc<dyn MediaStore> {
        Arc::new(self.clone())
    }
}

// Factory helper used in main: S3 protocol when keys are present, storage REST API otherwise
pub async fn build_media_store(config: &AppConfig) -> Arc<dyn MediaStore> {
    let Some(backend) = config.backend.as_ref() else {
        warn!("storage disabled: backend not configured");
        return Arc::new(UnconfiguredStore);
    };
    if config.s3.is_some() {
        match S3MediaStore::new(config).await {
            Ok(store) => return Arc::new(store),
            Err(e) => error!("S3 storage init failed, falling back to storage REST API: {e}"),
        }
    }
    Arc::new(RestMediaStore::new(&backend.url, &backend.anon_key))
}

#[cfg(feature = "inmem-store")]
pub mod inmem {
    use super::*;
    use std::collections::{BTreeMap, HashSet};
    use std::sync::{Mutex, PoisonError};

    #[derive(Default)]
    struct State {
        objects: BTreeMap<(String, String), (Vec<u8>, String)>,
        failing_buckets: HashSet<String>,
    }

    /// Process-local buckets; `fail_bucket` makes every upload to a bucket fail.
    #[derive(Clone, Default)]
    pub struct MemoryStore {
        state: Arc<Mutex<State>>,
    }

    impl MemoryStore {
        pub fn new() -> Self {
            Self::default()
        }

        fn lock(&self) -> std::sync::MutexGuard<'_, State> {
            self.state.lock().unwrap_or_else(PoisonError::into_inner)
        }

        pub fn fail_bucket(&self, bucket: &str) {
            self.lock().failing_buckets.insert(bucket.to_string());
        }

        pub fn object(&self, bucket: &str, path: &str) -> Option<(Vec<u8>, String)> {
            self.lock().objects.get(&(bucket.to_string(), path.to_string())).cloned()
        }

        pub fn paths(&self, bucket: &str) -> Vec<String> {
            self.lock()
                .objects
                .keys()
                .filter(|(b, _)| b == bucket)
                .map(|(_, p)| p.clone())
                .collect()
        }
    }

    #[async_trait]
    impl MediaStore for MemoryStore {
        async fn upload(&self, bucket: &str, path: &str, bytes: &[u8], content_type: &str, upsert: bool) -> StoreResult<()> {
            let mut s = self.lock();
            if s.failing_buckets.contains(bucket) {
                return Err(StoreError::Other(format!("bucket {bucket} unavailable")));
            }
            let key = (bucket.to_string(), path.to_string());
            if !upsert && s.objects.contains_key(&key) {
                return Err(StoreError::Duplicate);
            }
            s.objects.insert(key, (bytes.to_vec(), content_type.to_string()));
            Ok(())
        }

        async fn list(&self, bucket: &str, prefix: &str) -> StoreResult<Vec<ObjectInfo>> {
            let dir = format!("{}/", prefix.trim_end_matches('/'));
            Ok(self
                .lock()
                .objects
                .iter()
                .filter(|((b, p), _)| b == bucket && p.starts_with(&dir) && !p[dir.len()..].contains('/'))
                .map(|((_, p), (bytes, _))| ObjectInfo { name: p[dir.len()..].to_string(), size: bytes.len() as u64 })
                .collect())
        }

        async fn remove(&self, bucket: &str, paths: &[String]) -> StoreResult<()> {
            let mut s = self.lock();
            for p in paths {
                s.objects.remove(&(bucket.to_string(), p.clone()));
            }
            Ok(())
        }

        fn public_url(&self, bucket: &str, path: &str) -> String {
            public_object_url("http://storage.local", bucket, path)
        }

        fn authorized(&self, _access_token: &str) -> Arc<dyn MediaStore> {
            Arc::new(self.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_url_round_trip() {
        let url = public_object_url("https://x.supabase.co/", VIDEO_BUCKET, "u1/123.mp4");
        assert_eq!(url, "https://x.supabase.co/storage/v1/object/public/videos/u1/123.mp4");
        assert_eq!(object_path_from_public_url(&url, VIDEO_BUCKET).as_deref(), Some("u1/123.mp4"));
        assert_eq!(object_path_from_public_url(&url, THUMBNAIL_BUCKET), None);
    }

    #[test]
    fn path_segments_are_encoded_individually() {
        assert_eq!(encode_path("u1/my clip.mp4"), "u1/my%20clip.mp4");
    }
}
