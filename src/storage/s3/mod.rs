pub mod client_builder;

use std::collections::HashMap;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    BucketLocationConstraint, BucketVersioningStatus, CompletedMultipartUpload, CompletedPart,
    CreateBucketConfiguration, VersioningConfiguration,
};
use aws_smithy_runtime_api::http::Response;
use aws_smithy_types::error::metadata::ProvideErrorMetadata;
use tracing::{debug, error};

use crate::storage::StorageTrait;
use crate::types::error::HarnessError;
use crate::types::{
    CompletedPartInfo, CompletedUpload, CopySource, DeleteObjectResult, NULL_VERSION_ID,
    ObjectContent, PartInfo, PutObjectResult, RangeSpec, SseCustomerKey, UploadInfo, VersionEntry,
    VersioningState,
};

const DEFAULT_REGION: &str = "us-east-1";

/// Extracts the S3 error code and message from an AWS SDK error.
///
/// For service errors (S3 API responses), returns the S3 error code
/// (e.g. "NoSuchKey", "InvalidPart") and the human-readable error
/// message from the response. For other error types (network, timeout,
/// construction failure), returns "N/A" as the code and the full error
/// description as the message.
fn extract_sdk_error_details<E: std::fmt::Display + ProvideErrorMetadata>(
    e: &SdkError<E, Response>,
) -> (String, String) {
    if let Some(service_err) = e.as_service_error() {
        (
            service_err.code().unwrap_or("unknown").to_string(),
            service_err.message().unwrap_or("no message").to_string(),
        )
    } else {
        ("N/A".to_string(), e.to_string())
    }
}

/// Converts an SDK failure into [`HarnessError::Store`] and logs it.
fn store_error<E: std::fmt::Display + ProvideErrorMetadata>(
    operation: &str,
    bucket: &str,
    key: &str,
    e: SdkError<E, Response>,
) -> anyhow::Error {
    let (s3_error_code, s3_error_message) = extract_sdk_error_details(&e);
    let status = e.raw_response().map(|response| response.status().as_u16());
    error!(
        bucket = bucket,
        key = key,
        status = status,
        s3_error_code = s3_error_code,
        s3_error_message = s3_error_message,
        "S3 {} API call failed for s3://{}/{}: {} ({}).",
        operation,
        bucket,
        key,
        s3_error_code,
        s3_error_message,
    );
    anyhow!(HarnessError::Store {
        operation: operation.to_string(),
        status,
        code: s3_error_code,
        message: s3_error_message,
    })
}

fn missing_field(operation: &str, field: &str) -> anyhow::Error {
    anyhow!(HarnessError::Store {
        operation: operation.to_string(),
        status: None,
        code: "MissingField".to_string(),
        message: format!("response did not contain {field}"),
    })
}

/// Merge versions and delete markers into one newest-first list per key.
///
/// Listing timestamps often have one-second resolution. Within one second a
/// delete marker is ordered before versions, and otherwise the store's own
/// order is kept.
fn interleave_newest_first(mut entries: Vec<((i64, u32), VersionEntry)>) -> Vec<VersionEntry> {
    entries.sort_by(|(ta, a), (tb, b)| {
        a.key
            .cmp(&b.key)
            .then(b.is_latest.cmp(&a.is_latest))
            .then(tb.cmp(ta))
            .then(b.is_delete_marker.cmp(&a.is_delete_marker))
    });
    entries.into_iter().map(|(_, entry)| entry).collect()
}

fn range_header(range: RangeSpec) -> Result<String> {
    range.to_header().ok_or_else(|| {
        anyhow!(HarnessError::InvalidInput(format!(
            "empty range {range} cannot be sent to the store"
        )))
    })
}

/// [`StorageTrait`] implementation over `aws_sdk_s3::Client`.
#[derive(Clone)]
pub struct S3Storage {
    client: Client,
    region: String,
}

impl S3Storage {
    pub fn new(client: Client) -> Self {
        let region = client
            .config()
            .region()
            .map(|r| r.to_string())
            .unwrap_or_else(|| DEFAULT_REGION.to_string());
        S3Storage { client, region }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl StorageTrait for S3Storage {
    async fn create_bucket(&self, bucket: &str) -> Result<()> {
        let mut builder = self.client.create_bucket().bucket(bucket);

        // us-east-1 must NOT specify a location constraint
        if self.region != DEFAULT_REGION {
            let constraint = BucketLocationConstraint::from(self.region.as_str());
            let config = CreateBucketConfiguration::builder()
                .location_constraint(constraint)
                .build();
            builder = builder.create_bucket_configuration(config);
        }

        builder
            .send()
            .await
            .map_err(|e| store_error("CreateBucket", bucket, "", e))?;
        debug!(bucket = bucket, "bucket created.");
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<()> {
        self.client
            .delete_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(|e| store_error("DeleteBucket", bucket, "", e))?;
        debug!(bucket = bucket, "bucket deleted.");
        Ok(())
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        customer_key: Option<&SseCustomerKey>,
    ) -> Result<PutObjectResult> {
        let mut builder = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body));
        if let Some(customer_key) = customer_key {
            builder = builder
                .sse_customer_algorithm(customer_key.algorithm())
                .sse_customer_key(&customer_key.key_base64)
                .sse_customer_key_md5(&customer_key.key_md5_base64);
        }

        let output = builder
            .send()
            .await
            .map_err(|e| store_error("PutObject", bucket, key, e))?;
        debug!(
            bucket = bucket,
            key = key,
            version_id = output.version_id(),
            "object uploaded."
        );
        Ok(PutObjectResult {
            e_tag: output.e_tag().map(String::from),
            version_id: output.version_id().map(String::from),
        })
    }

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        range: Option<RangeSpec>,
        version_id: Option<&str>,
        customer_key: Option<&SseCustomerKey>,
    ) -> Result<ObjectContent> {
        let mut builder = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .set_range(range.map(range_header).transpose()?)
            .set_version_id(version_id.map(String::from));
        if let Some(customer_key) = customer_key {
            builder = builder
                .sse_customer_algorithm(customer_key.algorithm())
                .sse_customer_key(&customer_key.key_base64)
                .sse_customer_key_md5(&customer_key.key_md5_base64);
        }

        let output = builder
            .send()
            .await
            .map_err(|e| store_error("GetObject", bucket, key, e))?;

        let content_length = output.content_length().map(|length| length as u64);
        let returned_version_id = output.version_id().map(String::from);
        let body = output
            .body
            .collect()
            .await
            .with_context(|| format!("failed to read body of s3://{bucket}/{key}"))?
            .into_bytes()
            .to_vec();

        Ok(ObjectContent {
            content_length,
            version_id: returned_version_id,
            body,
        })
    }

    async fn delete_object(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> Result<DeleteObjectResult> {
        let output = self
            .client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .set_version_id(version_id.map(String::from))
            .send()
            .await
            .map_err(|e| store_error("DeleteObject", bucket, key, e))?;
        debug!(
            bucket = bucket,
            key = key,
            version_id = version_id,
            delete_marker = output.delete_marker(),
            "object deleted."
        );
        Ok(DeleteObjectResult {
            version_id: output.version_id().map(String::from),
            delete_marker: output.delete_marker().unwrap_or(false),
        })
    }

    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let output = self
                .client
                .list_objects_v2()
                .bucket(bucket)
                .prefix(prefix)
                .set_continuation_token(continuation_token.clone())
                .send()
                .await
                .map_err(|e| store_error("ListObjectsV2", bucket, prefix, e))?;

            keys.extend(
                output
                    .contents()
                    .iter()
                    .filter_map(|object| object.key().map(String::from)),
            );

            if output.is_truncated() == Some(true) {
                continuation_token = output.next_continuation_token().map(String::from);
            } else {
                break;
            }
        }

        Ok(keys)
    }

    async fn list_object_versions(&self, bucket: &str, prefix: &str) -> Result<Vec<VersionEntry>> {
        // The SDK splits versions and delete markers into two lists, so the
        // store's interleaving is rebuilt from is_latest and last_modified.
        let mut entries: Vec<((i64, u32), VersionEntry)> = Vec::new();
        let mut key_marker: Option<String> = None;
        let mut version_id_marker: Option<String> = None;

        loop {
            let output = self
                .client
                .list_object_versions()
                .bucket(bucket)
                .prefix(prefix)
                .set_key_marker(key_marker.clone())
                .set_version_id_marker(version_id_marker.clone())
                .send()
                .await
                .map_err(|e| store_error("ListObjectVersions", bucket, prefix, e))?;

            for version in output.versions() {
                let timestamp = version
                    .last_modified()
                    .map_or((0, 0), |t| (t.secs(), t.subsec_nanos()));
                entries.push((
                    timestamp,
                    VersionEntry {
                        key: version.key().unwrap_or_default().to_string(),
                        version_id: version.version_id().unwrap_or(NULL_VERSION_ID).to_string(),
                        is_latest: version.is_latest().unwrap_or(false),
                        is_delete_marker: false,
                        e_tag: version.e_tag().map(String::from),
                        size: version.size().unwrap_or(0) as u64,
                    },
                ));
            }

            for marker in output.delete_markers() {
                let timestamp = marker
                    .last_modified()
                    .map_or((0, 0), |t| (t.secs(), t.subsec_nanos()));
                entries.push((
                    timestamp,
                    VersionEntry {
                        key: marker.key().unwrap_or_default().to_string(),
                        version_id: marker.version_id().unwrap_or(NULL_VERSION_ID).to_string(),
                        is_latest: marker.is_latest().unwrap_or(false),
                        is_delete_marker: true,
                        e_tag: None,
                        size: 0,
                    },
                ));
            }

            if output.is_truncated() == Some(true) {
                key_marker = output.next_key_marker().map(String::from);
                version_id_marker = output.next_version_id_marker().map(String::from);
            } else {
                break;
            }
        }

        Ok(interleave_newest_first(entries))
    }

    async fn put_bucket_versioning(&self, bucket: &str, state: VersioningState) -> Result<()> {
        let status = match state {
            VersioningState::Enabled => BucketVersioningStatus::Enabled,
            VersioningState::Suspended => BucketVersioningStatus::Suspended,
            VersioningState::Unversioned => {
                return Err(anyhow!(HarnessError::InvalidInput(
                    "a bucket cannot be returned to the unversioned state".to_string()
                )));
            }
        };

        self.client
            .put_bucket_versioning()
            .bucket(bucket)
            .versioning_configuration(VersioningConfiguration::builder().status(status).build())
            .send()
            .await
            .map_err(|e| store_error("PutBucketVersioning", bucket, "", e))?;
        Ok(())
    }

    async fn get_bucket_versioning(&self, bucket: &str) -> Result<VersioningState> {
        let output = self
            .client
            .get_bucket_versioning()
            .bucket(bucket)
            .send()
            .await
            .map_err(|e| store_error("GetBucketVersioning", bucket, "", e))?;

        Ok(match output.status() {
            Some(BucketVersioningStatus::Enabled) => VersioningState::Enabled,
            Some(BucketVersioningStatus::Suspended) => VersioningState::Suspended,
            _ => VersioningState::Unversioned,
        })
    }

    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        metadata: &HashMap<String, String>,
        customer_key: Option<&SseCustomerKey>,
    ) -> Result<String> {
        let metadata = if metadata.is_empty() {
            None
        } else {
            Some(metadata.clone())
        };
        let mut builder = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .set_metadata(metadata);
        if let Some(customer_key) = customer_key {
            builder = builder
                .sse_customer_algorithm(customer_key.algorithm())
                .sse_customer_key(&customer_key.key_base64)
                .sse_customer_key_md5(&customer_key.key_md5_base64);
        }

        let output = builder
            .send()
            .await
            .map_err(|e| store_error("CreateMultipartUpload", bucket, key, e))?;
        let upload_id = output
            .upload_id()
            .ok_or_else(|| missing_field("CreateMultipartUpload", "UploadId"))?;
        debug!(
            bucket = bucket,
            key = key,
            upload_id = upload_id,
            "multipart upload initiated."
        );
        Ok(upload_id.to_string())
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Vec<u8>,
        customer_key: Option<&SseCustomerKey>,
    ) -> Result<String> {
        let content_length = body.len() as i64;
        let mut builder = self
            .client
            .upload_part()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .content_length(content_length)
            .body(ByteStream::from(body));
        if let Some(customer_key) = customer_key {
            builder = builder
                .sse_customer_algorithm(customer_key.algorithm())
                .sse_customer_key(&customer_key.key_base64)
                .sse_customer_key_md5(&customer_key.key_md5_base64);
        }

        let output = builder
            .send()
            .await
            .map_err(|e| store_error("UploadPart", bucket, key, e))?;
        let e_tag = output
            .e_tag()
            .ok_or_else(|| missing_field("UploadPart", "ETag"))?;
        debug!(
            bucket = bucket,
            key = key,
            upload_id = upload_id,
            part_number = part_number,
            e_tag = e_tag,
            "part uploaded."
        );
        Ok(e_tag.to_string())
    }

    async fn upload_part_copy(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        source: &CopySource,
        range: RangeSpec,
    ) -> Result<String> {
        let output = self
            .client
            .upload_part_copy()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .copy_source(source.to_header())
            .copy_source_range(range_header(range)?)
            .send()
            .await
            .map_err(|e| store_error("UploadPartCopy", bucket, key, e))?;
        let e_tag = output
            .copy_part_result()
            .and_then(|result| result.e_tag())
            .ok_or_else(|| missing_field("UploadPartCopy", "CopyPartResult.ETag"))?;
        debug!(
            bucket = bucket,
            key = key,
            upload_id = upload_id,
            part_number = part_number,
            copy_source = source.to_header(),
            range = %range,
            "part copied."
        );
        Ok(e_tag.to_string())
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPartInfo],
    ) -> Result<CompletedUpload> {
        let completed_parts = parts
            .iter()
            .map(|part| {
                CompletedPart::builder()
                    .part_number(part.part_number)
                    .e_tag(&part.e_tag)
                    .build()
            })
            .collect();
        let multipart_upload = CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts))
            .build();

        let output = self
            .client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(multipart_upload)
            .send()
            .await
            .map_err(|e| store_error("CompleteMultipartUpload", bucket, key, e))?;
        debug!(
            bucket = bucket,
            key = key,
            upload_id = upload_id,
            parts = parts.len(),
            "multipart upload completed."
        );
        Ok(CompletedUpload {
            e_tag: output.e_tag().map(String::from),
            version_id: output.version_id().map(String::from),
        })
    }

    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<()> {
        self.client
            .abort_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| store_error("AbortMultipartUpload", bucket, key, e))?;
        debug!(
            bucket = bucket,
            key = key,
            upload_id = upload_id,
            "multipart upload aborted."
        );
        Ok(())
    }

    async fn list_parts(&self, bucket: &str, key: &str, upload_id: &str) -> Result<Vec<PartInfo>> {
        let mut parts = Vec::new();
        let mut part_number_marker: Option<String> = None;

        loop {
            let output = self
                .client
                .list_parts()
                .bucket(bucket)
                .key(key)
                .upload_id(upload_id)
                .set_part_number_marker(part_number_marker.clone())
                .send()
                .await
                .map_err(|e| store_error("ListParts", bucket, key, e))?;

            parts.extend(output.parts().iter().map(|part| PartInfo {
                part_number: part.part_number().unwrap_or_default(),
                e_tag: part.e_tag().unwrap_or_default().to_string(),
                size: part.size().unwrap_or_default() as u64,
            }));

            if output.is_truncated() == Some(true) {
                part_number_marker = output.next_part_number_marker().map(String::from);
            } else {
                break;
            }
        }

        Ok(parts)
    }

    async fn list_multipart_uploads(&self, bucket: &str) -> Result<Vec<UploadInfo>> {
        let mut uploads = Vec::new();
        let mut key_marker: Option<String> = None;
        let mut upload_id_marker: Option<String> = None;

        loop {
            let output = self
                .client
                .list_multipart_uploads()
                .bucket(bucket)
                .set_key_marker(key_marker.clone())
                .set_upload_id_marker(upload_id_marker.clone())
                .send()
                .await
                .map_err(|e| store_error("ListMultipartUploads", bucket, "", e))?;

            uploads.extend(output.uploads().iter().filter_map(|upload| {
                Some(UploadInfo {
                    key: upload.key()?.to_string(),
                    upload_id: upload.upload_id()?.to_string(),
                })
            }));

            if output.is_truncated() == Some(true) {
                key_marker = output.next_key_marker().map(String::from);
                upload_id_marker = output.next_upload_id_marker().map(String::from);
            } else {
                break;
            }
        }

        Ok(uploads)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};

    fn make_client(region: &str) -> Client {
        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .credentials_provider(Credentials::new("test", "test", None, None, "test"))
            .build();
        Client::from_conf(config)
    }

    #[test]
    fn s3_storage_takes_region_from_client() {
        let storage = S3Storage::new(make_client("eu-west-1"));
        assert_eq!(storage.region, "eu-west-1");
    }

    #[test]
    fn missing_field_is_store_error() {
        let e = missing_field("UploadPart", "ETag");
        assert_eq!(
            crate::types::error::store_error_code(&e),
            Some("MissingField")
        );
    }

    #[test]
    fn empty_range_is_rejected_before_sending() {
        let e = range_header(RangeSpec::new(0, 0)).unwrap_err();
        assert!(crate::types::error::is_invalid_input_error(&e));

        assert_eq!(range_header(RangeSpec::new(0, 1)).unwrap(), "bytes=0-0");
    }

    fn entry(version_id: &str, is_latest: bool, is_delete_marker: bool) -> VersionEntry {
        VersionEntry {
            key: "k".to_string(),
            version_id: version_id.to_string(),
            is_latest,
            is_delete_marker,
            e_tag: None,
            size: 0,
        }
    }

    #[test]
    fn delete_marker_in_the_same_second_sorts_as_newer() {
        let entries = vec![
            ((100, 0), entry("latest", true, false)),
            ((90, 0), entry("old", false, false)),
            ((90, 0), entry("marker", false, true)),
            ((95, 0), entry("middle", false, false)),
        ];

        let ids: Vec<String> = interleave_newest_first(entries)
            .into_iter()
            .map(|e| e.version_id)
            .collect();
        assert_eq!(ids, vec!["latest", "middle", "marker", "old"]);
    }
}
