use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::azure::MicrosoftAzureBuilder;
use object_store::local::LocalFileSystem;
use object_store::ObjectStore;
use tracing::{info, warn};

use skusync_core::config::{AwsConfig, AzureConfig, RemoteConfig, RemoteProvider};
use skusync_core::{ObjectKey, RemoteObject};

use crate::azure::AzureConnectionString;
use crate::error::StorageError;

/// Read side of a remote blob namespace (one container or bucket).
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// List every object under the configured prefix.
    async fn list_objects(&self) -> Result<Vec<RemoteObject>, StorageError>;

    /// Fetch the full contents of one object.
    async fn get_object_bytes(&self, key: &ObjectKey) -> Result<Bytes, StorageError>;

    /// Human-readable location (container, bucket, directory) for logs.
    fn location(&self) -> &str;
}

/// [`RemoteStore`] over any `object_store` implementation.
pub struct ObjectStoreRemote {
    store: Arc<dyn ObjectStore>,
    prefix: String,
    location: String,
}

impl ObjectStoreRemote {
    /// Wrap an existing store. `prefix` limits listing; keys keep the prefix.
    pub fn new(store: Arc<dyn ObjectStore>, prefix: Option<&str>, location: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.unwrap_or("").trim_matches('/').to_string(),
            location: location.into(),
        }
    }

    /// Build the remote selected by `config.provider`.
    pub fn from_config(config: &RemoteConfig) -> Result<Self, StorageError> {
        let prefix = config.prefix.as_deref();
        match config.provider {
            RemoteProvider::Azure => Self::azure(&config.azure, prefix),
            RemoteProvider::S3 => Self::s3(&config.aws, prefix),
            RemoteProvider::Local => {
                let root = config.local_root.as_deref().ok_or_else(|| {
                    StorageError::NotConfigured("REMOTE_LOCAL_ROOT not set".into())
                })?;
                Self::local(root, prefix)
            }
        }
    }

    pub fn local(root: &Path, prefix: Option<&str>) -> Result<Self, StorageError> {
        let canonical = std::fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
        let store = LocalFileSystem::new_with_prefix(&canonical)
            .map_err(|e| StorageError::Other(format!("local filesystem error: {e}")))?;
        info!("Remote: local directory {}", canonical.display());
        Ok(Self::new(Arc::new(store), prefix, canonical.display().to_string()))
    }

    pub fn azure(azure: &AzureConfig, prefix: Option<&str>) -> Result<Self, StorageError> {
        let mut builder = MicrosoftAzureBuilder::new().with_container_name(&azure.container);

        let mut account = azure.account.clone();
        let mut access_key = azure.access_key.clone();
        let mut use_emulator = azure.use_emulator;
        let mut endpoint = None;

        if let Some(ref raw) = azure.connection_string {
            let parsed = AzureConnectionString::parse(raw)?;
            account = parsed.account.or(account);
            access_key = parsed.access_key.or(access_key);
            use_emulator |= parsed.use_emulator;
            endpoint = parsed.blob_endpoint;
        }

        if use_emulator {
            builder = builder.with_use_emulator(true);
        } else if account.is_none() {
            return Err(StorageError::NotConfigured(
                "AZURE_STORAGE_ACCOUNT or connection string not set".into(),
            ));
        }

        if let Some(ref account) = account {
            builder = builder.with_account(account);
        }
        if let Some(ref key) = access_key {
            builder = builder.with_access_key(key);
        }
        if let Some(endpoint) = endpoint {
            builder = builder
                .with_allow_http(endpoint.starts_with("http://"))
                .with_endpoint(endpoint);
        }

        let store = builder.build()?;

        info!(
            "Remote: azure container {} (account: {})",
            azure.container,
            account.as_deref().unwrap_or("emulator")
        );

        Ok(Self::new(Arc::new(store), prefix, azure.container.clone()))
    }

    pub fn s3(aws: &AwsConfig, prefix: Option<&str>) -> Result<Self, StorageError> {
        let bucket = aws
            .s3_bucket
            .as_deref()
            .ok_or_else(|| StorageError::NotConfigured("S3_BUCKET not set".into()))?;

        let mut builder = AmazonS3Builder::new().with_region(&aws.region);

        if let Some(ref key) = aws.access_key_id {
            builder = builder.with_access_key_id(key);
        }
        if let Some(ref secret) = aws.secret_access_key {
            builder = builder.with_secret_access_key(secret);
        }
        if let Some(ref token) = aws.session_token {
            builder = builder.with_token(token);
        }

        match aws.endpoint_url.as_deref() {
            Some(endpoint) if !endpoint.is_empty() => {
                // object_store requires absolute URLs
                let endpoint_url = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
                    endpoint.to_string()
                } else {
                    format!("https://{}", endpoint)
                };
                builder = builder
                    .with_bucket_name(bucket)
                    .with_allow_http(endpoint_url.starts_with("http://"))
                    .with_endpoint(&endpoint_url);
            }
            _ => {
                builder = builder.with_url(format!("s3://{}", bucket));
            }
        }

        let store = builder.build()?;
        info!("Remote: s3 bucket {} (region: {})", bucket, aws.region);
        Ok(Self::new(Arc::new(store), prefix, bucket.to_string()))
    }
}

#[async_trait]
impl RemoteStore for ObjectStoreRemote {
    async fn list_objects(&self) -> Result<Vec<RemoteObject>, StorageError> {
        let prefix = (!self.prefix.is_empty())
            .then(|| object_store::path::Path::from(self.prefix.as_str()));
        let mut stream = self.store.list(prefix.as_ref());

        let mut objects = Vec::new();
        while let Some(meta) = stream.try_next().await? {
            let raw = meta.location.to_string();
            match ObjectKey::new(raw.clone()) {
                Ok(key) => objects.push(RemoteObject {
                    key,
                    last_modified: meta.last_modified,
                    size: Some(meta.size as u64),
                }),
                Err(e) => warn!(key = %raw, error = %e, "skipping unusable object key"),
            }
        }

        objects.sort_by(|a, b| a.key.cmp(&b.key));
        info!(location = %self.location, count = objects.len(), "listed remote objects");
        Ok(objects)
    }

    async fn get_object_bytes(&self, key: &ObjectKey) -> Result<Bytes, StorageError> {
        let path = object_store::path::Path::from(key.as_str());
        let result = self.store.get(&path).await?;
        Ok(result.bytes().await?)
    }

    fn location(&self) -> &str {
        &self.location
    }
}
