//! Remote sources for the traffic-split policy document

use async_trait::async_trait;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::{ClientOptions, ObjectStore, RetryConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config_loader::PolicyConfig;
use crate::errors::{GatewayError, GatewayResult, PolicyError};

/// Where a policy document comes from.
///
/// Implementations return the raw document bytes; parsing is left to the
/// policy store so every source shares the same validation.
#[async_trait]
pub trait PolicySource: Send + Sync {
    /// Human-readable address used in logs and errors
    fn address(&self) -> String;

    async fn fetch(&self) -> Result<Vec<u8>, PolicyError>;
}

/// Object addressed by bucket and key in an object store
pub struct ObjectStoreSource {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    key: ObjectPath,
}

impl ObjectStoreSource {
    pub fn new(store: Arc<dyn ObjectStore>, bucket: impl Into<String>, key: &str) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            key: ObjectPath::from(key.trim_start_matches('/')),
        }
    }

    /// S3 or an S3-compatible endpoint, with SigV4-signed path-style requests.
    ///
    /// Static credentials from `config` win; otherwise the standard `AWS_*`
    /// environment variables and instance credentials are used. Failed
    /// fetches are not retried here, the refresh loop polls again anyway.
    pub fn s3(config: &PolicyConfig, timeout: Duration) -> GatewayResult<Self> {
        let client = ClientOptions::new()
            .with_allow_http(config.endpoint.starts_with("http://"))
            .with_timeout(timeout);

        let mut builder = AmazonS3Builder::from_env()
            .with_bucket_name(&config.bucket)
            .with_region(&config.region)
            .with_virtual_hosted_style_request(false)
            .with_client_options(client)
            .with_retry(RetryConfig {
                max_retries: 0,
                ..RetryConfig::default()
            });
        if !config.endpoint.trim().is_empty() {
            builder = builder.with_endpoint(&config.endpoint);
        }
        if let (Some(id), Some(secret)) = (&config.access_key_id, &config.secret_access_key) {
            builder = builder
                .with_access_key_id(id)
                .with_secret_access_key(secret);
        }
        if let Some(token) = &config.session_token {
            builder = builder.with_token(token);
        }

        let store = builder
            .build()
            .map_err(|e| GatewayError::config(format!("invalid object store settings: {e}")))?;
        Ok(Self::new(Arc::new(store), &config.bucket, &config.key))
    }

    fn classify(&self, err: object_store::Error) -> PolicyError {
        let address = self.address();
        match err {
            object_store::Error::NotFound { .. } => PolicyError::NotFound { address },
            source @ (object_store::Error::PermissionDenied { .. }
            | object_store::Error::Unauthenticated { .. }) => {
                PolicyError::Unauthorized { address, source }
            }
            source => PolicyError::Store { address, source },
        }
    }
}

#[async_trait]
impl PolicySource for ObjectStoreSource {
    fn address(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.key)
    }

    async fn fetch(&self) -> Result<Vec<u8>, PolicyError> {
        let object = self
            .store
            .get(&self.key)
            .await
            .map_err(|e| self.classify(e))?;
        let body = object.bytes().await.map_err(|e| self.classify(e))?;
        Ok(body.to_vec())
    }
}

/// Policy document on the local filesystem
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl PolicySource for FileSource {
    fn address(&self) -> String {
        format!("file://{}", self.path.display())
    }

    async fn fetch(&self) -> Result<Vec<u8>, PolicyError> {
        tokio::fs::read(&self.path).await.map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                PolicyError::NotFound {
                    address: self.address(),
                }
            } else {
                PolicyError::Io {
                    address: self.address(),
                    source,
                }
            }
        })
    }
}
