use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use dyn_clone::DynClone;

use crate::config::ClientConfig;
use crate::types::{
    CompletedPartInfo, CompletedUpload, CopySource, DeleteObjectResult, ObjectContent, PartInfo,
    PutObjectResult, RangeSpec, SseCustomerKey, UploadInfo, VersionEntry, VersioningState,
};

pub mod s3;

/// Type alias for a boxed Storage trait object.
pub type Storage = Box<dyn StorageTrait + Send + Sync>;

/// Narrow capability interface over an S3-compatible store.
///
/// The harness components depend only on this trait, never on a concrete SDK
/// client, so the same checks run against any implementation. Every method
/// maps to exactly one store request; no method retries.
///
/// Failures reported by the store are returned as
/// [`HarnessError::Store`](crate::types::error::HarnessError::Store) wrapped in
/// `anyhow::Error`.
#[async_trait]
pub trait StorageTrait: DynClone {
    async fn create_bucket(&self, bucket: &str) -> Result<()>;

    async fn delete_bucket(&self, bucket: &str) -> Result<()>;

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        customer_key: Option<&SseCustomerKey>,
    ) -> Result<PutObjectResult>;

    /// Read an object, or the `range` of it when given.
    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        range: Option<RangeSpec>,
        version_id: Option<&str>,
        customer_key: Option<&SseCustomerKey>,
    ) -> Result<ObjectContent>;

    /// Delete an object. Without `version_id` a versioned bucket records a
    /// delete marker instead of removing data.
    async fn delete_object(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> Result<DeleteObjectResult>;

    /// List current object keys under `prefix`, following continuation tokens.
    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<String>>;

    /// List object versions and delete markers under `prefix`, newest first
    /// within each key, following key/version-id markers.
    async fn list_object_versions(&self, bucket: &str, prefix: &str) -> Result<Vec<VersionEntry>>;

    /// Enable or suspend versioning. `VersioningState::Unversioned` cannot be requested.
    async fn put_bucket_versioning(&self, bucket: &str, state: VersioningState) -> Result<()>;

    async fn get_bucket_versioning(&self, bucket: &str) -> Result<VersioningState>;

    /// Initiate a multipart upload and return its upload id.
    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        metadata: &HashMap<String, String>,
        customer_key: Option<&SseCustomerKey>,
    ) -> Result<String>;

    /// Upload one part and return its ETag.
    #[allow(clippy::too_many_arguments)]
    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Vec<u8>,
        customer_key: Option<&SseCustomerKey>,
    ) -> Result<String>;

    /// Populate one part by server-side copy of `range` of `source` and return its ETag.
    #[allow(clippy::too_many_arguments)]
    async fn upload_part_copy(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        source: &CopySource,
        range: RangeSpec,
    ) -> Result<String>;

    /// Complete an upload with exactly the given part list, in the given order.
    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPartInfo],
    ) -> Result<CompletedUpload>;

    async fn abort_multipart_upload(&self, bucket: &str, key: &str, upload_id: &str)
    -> Result<()>;

    async fn list_parts(&self, bucket: &str, key: &str, upload_id: &str) -> Result<Vec<PartInfo>>;

    async fn list_multipart_uploads(&self, bucket: &str) -> Result<Vec<UploadInfo>>;
}

dyn_clone::clone_trait_object!(StorageTrait);

/// Create the production storage backed by `aws_sdk_s3::Client`.
pub async fn create_storage(client_config: &ClientConfig) -> Storage {
    Box::new(s3::S3Storage::new(client_config.create_client().await))
}
