//! S3-compatible object storage client.
//!
//! Speaks to MinIO or any S3 endpoint with static credentials and
//! path-style addressing. Keys are plain strings; the git key layout
//! lives in the storage adapter, not here.

use crate::config::ObjectStoreConfig;
use aws_sdk_s3::config::{BehaviorVersion, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("object store error: {0}")]
    Backend(String),
}

pub type ObjectResult<T> = Result<T, ObjectStoreError>;

const ENSURE_BUCKET_ATTEMPTS: u32 = 30;
const ENSURE_BUCKET_DELAY: Duration = Duration::from_secs(1);

#[derive(Clone)]
pub struct ObjectStore {
    client: Client,
    bucket: String,
}

impl ObjectStore {
    pub fn new(config: &ObjectStoreConfig) -> Self {
        let credentials = aws_credential_types::Credentials::new(
            config.access_key.clone(),
            config.secret_key.clone(),
            None,
            None,
            "gitvault-config",
        );
        let s3_config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .endpoint_url(&config.endpoint)
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();
        Self {
            client: Client::from_conf(s3_config),
            bucket: config.bucket.clone(),
        }
    }

    pub async fn ping(&self) -> ObjectResult<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map(|_| ())
            .map_err(|err| ObjectStoreError::Backend(DisplayErrorContext(&err).to_string()))
    }

    /// Head-or-create loop until the bucket exists. The backend may
    /// still be starting up, so this retries on a fixed cadence.
    pub async fn ensure_bucket(&self) -> ObjectResult<()> {
        let mut last = ObjectStoreError::Backend("bucket was never checked".into());
        for attempt in 0..ENSURE_BUCKET_ATTEMPTS {
            match self.ping().await {
                Ok(()) => return Ok(()),
                Err(err) => last = err,
            }
            match self
                .client
                .create_bucket()
                .bucket(&self.bucket)
                .send()
                .await
            {
                Ok(_) => return Ok(()),
                Err(err) => {
                    last = ObjectStoreError::Backend(DisplayErrorContext(&err).to_string());
                }
            }
            if attempt + 1 < ENSURE_BUCKET_ATTEMPTS {
                tokio::time::sleep(ENSURE_BUCKET_DELAY).await;
            }
        }
        Err(last)
    }

    pub async fn head(&self, key: &str) -> ObjectResult<()> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(()),
            Err(err) => {
                let service = err.into_service_error();
                if service.is_not_found() {
                    Err(ObjectStoreError::NotFound(key.to_string()))
                } else {
                    Err(ObjectStoreError::Backend(service.to_string()))
                }
            }
        }
    }

    pub async fn get(&self, key: &str) -> ObjectResult<Vec<u8>> {
        let out = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(out) => out,
            Err(err) => {
                let service = err.into_service_error();
                return if service.is_no_such_key() {
                    Err(ObjectStoreError::NotFound(key.to_string()))
                } else {
                    Err(ObjectStoreError::Backend(service.to_string()))
                };
            }
        };
        let data = out
            .body
            .collect()
            .await
            .map_err(|err| ObjectStoreError::Backend(err.to_string()))?;
        Ok(data.into_bytes().to_vec())
    }

    /// Last-writer-wins; content-addressed keys make rewrites benign.
    pub async fn put(&self, key: &str, data: Vec<u8>) -> ObjectResult<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(Bytes::from(data)))
            .send()
            .await
            .map(|_| ())
            .map_err(|err| ObjectStoreError::Backend(DisplayErrorContext(&err).to_string()))
    }

    /// All keys under a prefix. Pagination is exhausted before
    /// returning so callers always see a complete listing.
    pub async fn list(&self, prefix: &str) -> ObjectResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix);
            if let Some(token) = &continuation {
                request = request.continuation_token(token);
            }
            let page = request
                .send()
                .await
                .map_err(|err| ObjectStoreError::Backend(DisplayErrorContext(&err).to_string()))?;
            for object in page.contents() {
                if let Some(key) = object.key() {
                    keys.push(key.to_string());
                }
            }
            match page.next_continuation_token() {
                Some(token) if page.is_truncated() == Some(true) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }
        Ok(keys)
    }
}
