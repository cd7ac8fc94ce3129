//! Versioned-bucket lifecycle management.
//!
//! [`VersionedBucketLifecycleManager`] toggles bucket versioning (polling the
//! read-back until it matches), keeps a local record of the versions a check
//! wrote, validates that record against the store's version listing and
//! drives the concurrent version stress.

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::{
    DEFAULT_VERSIONING_POLL_ATTEMPTS, DEFAULT_VERSIONING_POLL_INTERVAL_MILLISECONDS, HarnessConfig,
};
use crate::storage::Storage;
use crate::types::error::HarnessError;
use crate::types::{VersionEntry, VersionRecord, VersioningState};

/// Outcome of one [`VersionedBucketLifecycleManager::concurrent_stress`] round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StressReport {
    pub writers: usize,
    pub deleters: usize,
    /// Versions and delete markers removed by the final clear.
    pub cleared: usize,
}

#[derive(Clone)]
pub struct VersionedBucketLifecycleManager {
    storage: Storage,
    poll_attempts: u32,
    poll_interval: Duration,
}

impl VersionedBucketLifecycleManager {
    pub fn new(storage: Storage) -> Self {
        Self::with_polling(
            storage,
            DEFAULT_VERSIONING_POLL_ATTEMPTS,
            Duration::from_millis(DEFAULT_VERSIONING_POLL_INTERVAL_MILLISECONDS),
        )
    }

    pub fn with_polling(storage: Storage, poll_attempts: u32, poll_interval: Duration) -> Self {
        VersionedBucketLifecycleManager {
            storage,
            poll_attempts: poll_attempts.max(1),
            poll_interval,
        }
    }

    pub fn from_config(storage: Storage, config: &HarnessConfig) -> Self {
        Self::with_polling(
            storage,
            config.versioning_poll_attempts,
            Duration::from_millis(config.versioning_poll_interval_milliseconds),
        )
    }

    /// Request `state` and poll the read-back until it matches.
    pub async fn set_versioning(&self, bucket: &str, state: VersioningState) -> Result<()> {
        self.storage
            .put_bucket_versioning(bucket, state)
            .await
            .with_context(|| format!("failed to set versioning of {bucket} to {state}"))?;

        let mut actual = VersioningState::Unversioned;
        for attempt in 1..=self.poll_attempts {
            actual = self.versioning_state(bucket).await?;
            if actual == state {
                debug!(
                    bucket = bucket,
                    state = %state,
                    attempt = attempt,
                    "versioning applied."
                );
                return Ok(());
            }

            debug!(
                bucket = bucket,
                requested = %state,
                actual = %actual,
                attempt = attempt,
                "versioning read-back does not match yet."
            );
            if attempt < self.poll_attempts {
                tokio::time::sleep(self.poll_interval).await;
            }
        }

        Err(anyhow!(HarnessError::VersioningNotApplied {
            bucket: bucket.to_string(),
            requested: state.to_string(),
            actual: actual.to_string(),
            attempts: self.poll_attempts,
        }))
    }

    pub async fn versioning_state(&self, bucket: &str) -> Result<VersioningState> {
        self.storage
            .get_bucket_versioning(bucket)
            .await
            .with_context(|| format!("failed to read versioning of {bucket}"))
    }

    /// Write `count` versions of `key` with contents `content-0`, `content-1`, ...
    ///
    /// When versioning is enabled the listing must reproduce the records.
    pub async fn create_versions(
        &self,
        bucket: &str,
        key: &str,
        count: usize,
    ) -> Result<Vec<VersionRecord>> {
        let mut versions = Vec::with_capacity(count);
        for i in 0..count {
            let content = format!("content-{i}").into_bytes();
            let result = self
                .storage
                .put_object(bucket, key, content.clone(), None)
                .await
                .with_context(|| format!("failed to write version {i} of s3://{bucket}/{key}"))?;
            versions.push(VersionRecord::object(
                key,
                result.version_id.as_deref(),
                content,
            ));
        }

        if self.versioning_state(bucket).await? == VersioningState::Enabled {
            self.validate_listing(bucket, key, &versions).await?;
        }

        info!(
            bucket = bucket,
            key = key,
            count = count,
            "versions created."
        );
        Ok(versions)
    }

    /// Delete the version at `index` after checking its content, then
    /// validate the remaining records against the listing.
    pub async fn remove_version(
        &self,
        bucket: &str,
        key: &str,
        versions: &mut Vec<VersionRecord>,
        index: usize,
    ) -> Result<VersionRecord> {
        let Some(record) = versions.get(index).cloned() else {
            return Err(anyhow!(HarnessError::InvalidInput(format!(
                "version index {index} out of range for {} recorded versions",
                versions.len()
            ))));
        };

        if !record.is_delete_marker {
            self.check_version_content(bucket, &record).await?;
        }
        self.storage
            .delete_object(bucket, key, Some(&record.version_id))
            .await
            .with_context(|| {
                format!(
                    "failed to delete version {} of s3://{bucket}/{key}",
                    record.version_id
                )
            })?;
        versions.remove(index);

        debug!(
            bucket = bucket,
            key = key,
            version_id = record.version_id.as_str(),
            remaining = versions.len(),
            "version removed."
        );

        if !versions.is_empty() {
            self.validate_listing(bucket, key, versions).await?;
        }
        Ok(record)
    }

    /// Overwrite `key` while versioning is suspended. The new write replaces
    /// any recorded null version.
    pub async fn overwrite_while_suspended(
        &self,
        bucket: &str,
        key: &str,
        versions: &mut Vec<VersionRecord>,
        content: Vec<u8>,
    ) -> Result<()> {
        let result = self
            .storage
            .put_object(bucket, key, content.clone(), None)
            .await
            .with_context(|| format!("failed to overwrite s3://{bucket}/{key}"))?;

        versions.retain(|v| !v.is_null_version());
        versions.push(VersionRecord::object(
            key,
            result.version_id.as_deref(),
            content,
        ));
        self.validate_listing(bucket, key, versions).await
    }

    /// Delete `key` while versioning is suspended. The resulting delete
    /// marker replaces any recorded null version.
    pub async fn delete_while_suspended(
        &self,
        bucket: &str,
        key: &str,
        versions: &mut Vec<VersionRecord>,
    ) -> Result<()> {
        let result = self
            .storage
            .delete_object(bucket, key, None)
            .await
            .with_context(|| format!("failed to delete s3://{bucket}/{key}"))?;

        versions.retain(|v| !v.is_null_version());
        versions.push(VersionRecord::delete_marker(key, result.version_id.as_deref()));
        self.validate_listing(bucket, key, versions).await
    }

    /// The version listing of `key`, reversed into chronological order, must
    /// equal `versions`: same version ids, same delete markers, same content.
    pub async fn validate_listing(
        &self,
        bucket: &str,
        key: &str,
        versions: &[VersionRecord],
    ) -> Result<()> {
        let mut listed = self.list_versions(bucket, key).await?;
        listed.reverse();

        let mismatch = |detail: String| {
            anyhow!(HarnessError::VersionMismatch {
                bucket: bucket.to_string(),
                key: key.to_string(),
                detail,
            })
        };

        if listed.len() != versions.len() {
            return Err(mismatch(format!(
                "listing has {} entries, {} recorded",
                listed.len(),
                versions.len()
            )));
        }

        for (i, (entry, record)) in listed.iter().zip(versions).enumerate() {
            if entry.version_id != record.version_id {
                return Err(mismatch(format!(
                    "entry {i} is version {}, recorded {}",
                    entry.version_id, record.version_id
                )));
            }
            if entry.is_delete_marker != record.is_delete_marker {
                return Err(mismatch(format!(
                    "entry {i} ({}) delete marker is {}, recorded {}",
                    entry.version_id, entry.is_delete_marker, record.is_delete_marker
                )));
            }
            if !record.is_delete_marker {
                self.check_version_content(bucket, record).await?;
            }
        }
        Ok(())
    }

    /// Versions and delete markers of exactly `key`, newest first.
    pub async fn list_versions(&self, bucket: &str, key: &str) -> Result<Vec<VersionEntry>> {
        let entries = self
            .storage
            .list_object_versions(bucket, key)
            .await
            .with_context(|| format!("failed to list versions of s3://{bucket}/{key}"))?;
        Ok(entries.into_iter().filter(|e| e.key == key).collect())
    }

    /// Delete every version and delete marker of `key`, returning how many
    /// were removed.
    pub async fn clear_versions(&self, bucket: &str, key: &str) -> Result<usize> {
        let entries = self.list_versions(bucket, key).await?;
        for entry in &entries {
            self.storage
                .delete_object(bucket, key, Some(&entry.version_id))
                .await
                .with_context(|| {
                    format!(
                        "failed to delete version {} of s3://{bucket}/{key}",
                        entry.version_id
                    )
                })?;
        }
        Ok(entries.len())
    }

    /// One round of concurrent writes and deletes on `key`.
    ///
    /// `worker_count` writers each put one version while up to `worker_count`
    /// deleters each remove one version of a listing snapshot taken first.
    /// Every task is joined before anything is checked; only convergence to
    /// zero versions after a final clear is asserted.
    pub async fn concurrent_stress(
        &self,
        bucket: &str,
        key: &str,
        worker_count: usize,
    ) -> Result<StressReport> {
        if worker_count == 0 {
            return Err(anyhow!(HarnessError::InvalidInput(
                "concurrent stress needs at least one worker".to_string()
            )));
        }

        let snapshot = self.list_versions(bucket, key).await?;
        let mut workers = JoinSet::new();

        for i in 0..worker_count {
            let storage = self.storage.clone();
            let (bucket, key) = (bucket.to_string(), key.to_string());
            workers.spawn(async move {
                storage
                    .put_object(&bucket, &key, format!("stress-{i}").into_bytes(), None)
                    .await
                    .map(|_| ())
                    .with_context(|| format!("writer {i} failed on s3://{bucket}/{key}"))
            });
        }

        let deleters = snapshot.len().min(worker_count);
        for entry in snapshot.into_iter().take(deleters) {
            let storage = self.storage.clone();
            let (bucket, key) = (bucket.to_string(), key.to_string());
            workers.spawn(async move {
                storage
                    .delete_object(&bucket, &key, Some(&entry.version_id))
                    .await
                    .map(|_| ())
                    .with_context(|| {
                        format!(
                            "deleter of version {} failed on s3://{bucket}/{key}",
                            entry.version_id
                        )
                    })
            });
        }

        let mut first_error = None;
        while let Some(joined) = workers.join_next().await {
            let result = match joined {
                Ok(result) => result,
                Err(e) => Err(anyhow!(e).context("stress worker did not finish")),
            };
            if let Err(e) = result {
                warn!(bucket = bucket, key = key, error = %e, "stress worker failed.");
                first_error.get_or_insert(e);
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        let cleared = self.clear_versions(bucket, key).await?;
        let remaining = self.list_versions(bucket, key).await?.len();
        if remaining != 0 {
            return Err(anyhow!(HarnessError::StressConvergence {
                bucket: bucket.to_string(),
                key: key.to_string(),
                remaining,
            }));
        }

        info!(
            bucket = bucket,
            key = key,
            writers = worker_count,
            deleters = deleters,
            cleared = cleared,
            "concurrent stress converged."
        );
        Ok(StressReport {
            writers: worker_count,
            deleters,
            cleared,
        })
    }

    async fn check_version_content(&self, bucket: &str, record: &VersionRecord) -> Result<()> {
        let content = self
            .storage
            .get_object(bucket, &record.key, None, Some(&record.version_id), None)
            .await
            .with_context(|| {
                format!(
                    "failed to read version {} of s3://{bucket}/{}",
                    record.version_id, record.key
                )
            })?;
        if content.body != record.content {
            return Err(anyhow!(HarnessError::VersionMismatch {
                bucket: bucket.to_string(),
                key: record.key.clone(),
                detail: format!(
                    "version {} holds {} bytes that differ from the {} recorded",
                    record.version_id,
                    content.body.len(),
                    record.content.len()
                ),
            }));
        }
        Ok(())
    }
}
