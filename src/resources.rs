//! Scoped ownership of the buckets a check creates.
//!
//! [`ResourceScope::run`] hands a scope to the check body and removes every
//! bucket the scope owns once the body has finished, whether it returned
//! `Ok`, returned an error or panicked.

use std::future::Future;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::HarnessConfig;
use crate::storage::Storage;
use crate::types::VersioningState;
use crate::versioning::VersionedBucketLifecycleManager;

/// `<prefix>-<uuid v4>`, at most 63 characters for a prefix of up to 26.
pub fn generate_bucket_name(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4())
}

/// Buckets owned by one check.
///
/// Clones share the same ownership list.
#[derive(Clone)]
pub struct ResourceScope {
    storage: Storage,
    config: HarnessConfig,
    buckets: Arc<Mutex<Vec<String>>>,
}

impl ResourceScope {
    pub fn new(storage: Storage, config: HarnessConfig) -> Self {
        ResourceScope {
            storage,
            config,
            buckets: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Run `body` as its own task with a fresh scope, then clean up.
    ///
    /// Cleanup failures are logged and never replace the body's result. A
    /// panic of the body is resumed after cleanup.
    pub async fn run<F, Fut, T>(storage: Storage, config: &HarnessConfig, body: F) -> Result<T>
    where
        F: FnOnce(ResourceScope) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let scope = ResourceScope::new(storage, config.clone());
        let joined = tokio::spawn(body(scope.clone())).await;
        scope.cleanup().await;

        match joined {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => Err(anyhow!(e).context("check task was cancelled")),
        }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Create a bucket with a fresh name and take ownership of it.
    pub async fn create_bucket(&self) -> Result<String> {
        let bucket = generate_bucket_name(&self.config.bucket_prefix);
        self.storage
            .create_bucket(&bucket)
            .await
            .with_context(|| format!("failed to create bucket {bucket}"))?;
        self.adopt_bucket(&bucket);

        debug!(bucket = bucket.as_str(), "bucket created.");
        Ok(bucket)
    }

    /// Create a bucket and enable versioning on it.
    pub async fn create_versioned_bucket(&self) -> Result<String> {
        let bucket = self.create_bucket().await?;
        self.versioning_manager()
            .set_versioning(&bucket, VersioningState::Enabled)
            .await?;
        Ok(bucket)
    }

    /// Take ownership of a bucket created outside the scope.
    pub fn adopt_bucket(&self, bucket: &str) {
        if let Ok(mut buckets) = self.buckets.lock() {
            buckets.push(bucket.to_string());
        }
    }

    pub fn buckets(&self) -> Vec<String> {
        self.buckets
            .lock()
            .map(|buckets| buckets.clone())
            .unwrap_or_default()
    }

    pub fn versioning_manager(&self) -> VersionedBucketLifecycleManager {
        VersionedBucketLifecycleManager::from_config(self.storage.clone(), &self.config)
    }

    /// Remove every owned bucket, newest first.
    pub async fn cleanup(&self) {
        let buckets = match self.buckets.lock() {
            Ok(mut buckets) => std::mem::take(&mut *buckets),
            Err(_) => return,
        };
        for bucket in buckets.iter().rev() {
            self.remove_bucket(bucket).await;
        }
    }

    async fn remove_bucket(&self, bucket: &str) {
        match self.storage.list_multipart_uploads(bucket).await {
            Ok(uploads) => {
                for upload in uploads {
                    if let Err(e) = self
                        .storage
                        .abort_multipart_upload(bucket, &upload.key, &upload.upload_id)
                        .await
                    {
                        warn!(
                            bucket = bucket,
                            key = upload.key.as_str(),
                            upload_id = upload.upload_id.as_str(),
                            error = %e,
                            "cleanup could not abort upload."
                        );
                    }
                }
            }
            Err(e) => warn!(bucket = bucket, error = %e, "cleanup could not list uploads."),
        }

        match self.storage.list_object_versions(bucket, "").await {
            Ok(versions) => {
                for version in versions {
                    if let Err(e) = self
                        .storage
                        .delete_object(bucket, &version.key, Some(&version.version_id))
                        .await
                    {
                        warn!(
                            bucket = bucket,
                            key = version.key.as_str(),
                            version_id = version.version_id.as_str(),
                            error = %e,
                            "cleanup could not delete version."
                        );
                    }
                }
            }
            Err(e) => warn!(bucket = bucket, error = %e, "cleanup could not list versions."),
        }

        match self.storage.list_objects(bucket, "").await {
            Ok(keys) => {
                for key in keys {
                    if let Err(e) = self.storage.delete_object(bucket, &key, None).await {
                        warn!(bucket = bucket, key = key.as_str(), error = %e, "cleanup could not delete object.");
                    }
                }
            }
            Err(e) => warn!(bucket = bucket, error = %e, "cleanup could not list objects."),
        }

        match self.storage.delete_bucket(bucket).await {
            Ok(()) => debug!(bucket = bucket, "bucket removed."),
            Err(e) => warn!(bucket = bucket, error = %e, "cleanup could not delete bucket."),
        }
    }
}
