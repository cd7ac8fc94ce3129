//! Shared test utilities for the s3compat library crate.
//!
//! [`InMemoryStorage`] is a [`StorageTrait`] implementation that keeps every
//! bucket in process memory and follows the S3 rules the harness checks:
//! the multipart minimum part size, inclusive byte ranges, SSE-C key matching
//! and the unversioned / enabled / suspended versioning states. Knobs on the
//! store inject the faults the harness must detect.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use md5::{Digest, Md5};

use crate::config::{Config, HarnessConfig};
use crate::generator::MIN_PART_SIZE;
use crate::storage::{Storage, StorageTrait};
use crate::types::error::HarnessError;
use crate::types::{
    CompletedPartInfo, CompletedUpload, CopySource, DeleteObjectResult, NULL_VERSION_ID,
    ObjectContent, PartInfo, PutObjectResult, RangeSpec, SseCustomerKey, UploadInfo, VersionEntry,
    VersioningState,
};

/// Initialise a dummy tracing subscriber for tests.
///
/// Uses `try_init` so that only the first call in a process actually
/// installs the subscriber; subsequent calls are silently ignored.
pub(crate) fn init_dummy_tracing_subscriber() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("dummy=trace")
        .try_init();
}

/// Create a [`Config`] with short polling intervals for tests against
/// [`InMemoryStorage`].
pub(crate) fn make_test_config() -> Config {
    Config {
        harness: HarnessConfig {
            bucket_prefix: "test".to_string(),
            part_size: MIN_PART_SIZE,
            random_range_iterations: 20,
            versioning_poll_attempts: 5,
            versioning_poll_interval_milliseconds: 1,
            stress_workers: 4,
            post_connect_timeout_milliseconds: 1000,
        },
        ..Config::default()
    }
}

fn store_error(operation: &str, status: u16, code: &str, message: &str) -> anyhow::Error {
    anyhow!(HarnessError::Store {
        operation: operation.to_string(),
        status: Some(status),
        code: code.to_string(),
        message: message.to_string(),
    })
}

fn no_such_bucket(operation: &str) -> anyhow::Error {
    store_error(
        operation,
        404,
        "NoSuchBucket",
        "The specified bucket does not exist",
    )
}

fn no_such_key(operation: &str) -> anyhow::Error {
    store_error(operation, 404, "NoSuchKey", "The specified key does not exist.")
}

fn no_such_upload(operation: &str) -> anyhow::Error {
    store_error(
        operation,
        404,
        "NoSuchUpload",
        "The specified upload does not exist.",
    )
}

fn md5_hex(body: &[u8]) -> String {
    format!("{:x}", Md5::digest(body))
}

fn check_customer_key(
    operation: &str,
    stored_key_md5: Option<&str>,
    provided: Option<&SseCustomerKey>,
) -> Result<()> {
    match (stored_key_md5, provided) {
        (None, None) => Ok(()),
        (Some(_), None) => Err(store_error(
            operation,
            400,
            "InvalidRequest",
            "The object was stored using a form of Server Side Encryption. The correct parameters must be provided to retrieve the object.",
        )),
        (None, Some(_)) => Err(store_error(
            operation,
            400,
            "InvalidRequest",
            "The encryption parameters are not applicable to this object.",
        )),
        (Some(stored), Some(key)) if stored == key.key_md5_base64 => Ok(()),
        (Some(_), Some(_)) => Err(store_error(
            operation,
            403,
            "AccessDenied",
            "The calculated MD5 hash of the key did not match the hash that was provided.",
        )),
    }
}

#[derive(Clone)]
struct StoredVersion {
    version_id: String,
    body: Vec<u8>,
    e_tag: String,
    is_delete_marker: bool,
    customer_key_md5: Option<String>,
}

impl StoredVersion {
    fn object(body: Vec<u8>, e_tag: String, customer_key_md5: Option<String>) -> Self {
        StoredVersion {
            version_id: String::new(),
            body,
            e_tag,
            is_delete_marker: false,
            customer_key_md5,
        }
    }

    fn delete_marker() -> Self {
        StoredVersion {
            version_id: String::new(),
            body: Vec::new(),
            e_tag: String::new(),
            is_delete_marker: true,
            customer_key_md5: None,
        }
    }
}

struct StoredPart {
    e_tag: String,
    body: Vec<u8>,
}

struct PendingUpload {
    key: String,
    customer_key_md5: Option<String>,
    parts: BTreeMap<i32, StoredPart>,
}

struct BucketState {
    versioning: VersioningState,
    stale_versioning: VersioningState,
    stale_reads_remaining: u32,
    // oldest first
    objects: BTreeMap<String, Vec<StoredVersion>>,
    uploads: BTreeMap<String, PendingUpload>,
}

impl BucketState {
    fn new() -> Self {
        BucketState {
            versioning: VersioningState::Unversioned,
            stale_versioning: VersioningState::Unversioned,
            stale_reads_remaining: 0,
            objects: BTreeMap::new(),
            uploads: BTreeMap::new(),
        }
    }

    /// Appends a version following the bucket's versioning state and returns
    /// the version id the store reports for it.
    fn write_version(
        &mut self,
        key: &str,
        mut version: StoredVersion,
        new_version_id: impl FnOnce() -> String,
    ) -> Option<String> {
        let history = self.objects.entry(key.to_string()).or_default();
        match self.versioning {
            VersioningState::Enabled => {
                let version_id = new_version_id();
                version.version_id = version_id.clone();
                history.push(version);
                Some(version_id)
            }
            VersioningState::Unversioned | VersioningState::Suspended => {
                history.retain(|v| v.version_id != NULL_VERSION_ID);
                version.version_id = NULL_VERSION_ID.to_string();
                history.push(version);
                None
            }
        }
    }

    fn upload_mut(
        &mut self,
        operation: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<&mut PendingUpload> {
        self.uploads
            .get_mut(upload_id)
            .filter(|upload| upload.key == key)
            .ok_or_else(|| no_such_upload(operation))
    }
}

/// In-memory S3-compatible store.
///
/// Clones share the same buckets, so a test keeps one handle for inspection
/// while the harness owns a boxed clone.
#[derive(Clone)]
pub(crate) struct InMemoryStorage {
    buckets: Arc<Mutex<HashMap<String, BucketState>>>,
    min_part_size: u64,
    next_id: Arc<AtomicU64>,
    calls: Arc<Mutex<Vec<String>>>,
    /// Operations that always fail, mapped to (status, error code).
    failures: Arc<Mutex<HashMap<String, (u16, String)>>>,
    /// Absolute object offset whose byte is flipped in every read covering it.
    corrupt_byte_at: Arc<Mutex<Option<u64>>>,
    truncate_reads: Arc<AtomicBool>,
    unstable_part_etags: Arc<AtomicBool>,
    versioning_read_lag: Arc<AtomicU32>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::with_min_part_size(MIN_PART_SIZE)
    }

    pub fn with_min_part_size(min_part_size: u64) -> Self {
        InMemoryStorage {
            buckets: Arc::new(Mutex::new(HashMap::new())),
            min_part_size,
            next_id: Arc::new(AtomicU64::new(1)),
            calls: Arc::new(Mutex::new(Vec::new())),
            failures: Arc::new(Mutex::new(HashMap::new())),
            corrupt_byte_at: Arc::new(Mutex::new(None)),
            truncate_reads: Arc::new(AtomicBool::new(false)),
            unstable_part_etags: Arc::new(AtomicBool::new(false)),
            versioning_read_lag: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn boxed(&self) -> Storage {
        Box::new(self.clone())
    }

    pub fn fail_operation(&self, operation: &str, status: u16, code: &str) {
        self.failures
            .lock()
            .unwrap()
            .insert(operation.to_string(), (status, code.to_string()));
    }

    pub fn corrupt_byte_at(&self, offset: u64) {
        *self.corrupt_byte_at.lock().unwrap() = Some(offset);
    }

    pub fn truncate_reads(&self) {
        self.truncate_reads.store(true, Ordering::SeqCst);
    }

    pub fn make_part_etags_unstable(&self) {
        self.unstable_part_etags.store(true, Ordering::SeqCst);
    }

    /// Makes the next `reads` versioning read-backs after each change report
    /// the previous state.
    pub fn lag_versioning_reads(&self, reads: u32) {
        self.versioning_read_lag.store(reads, Ordering::SeqCst);
    }

    pub fn call_count(&self, operation: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| *call == operation)
            .count()
    }

    pub fn bucket_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.buckets.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn bucket_exists(&self, bucket: &str) -> bool {
        self.buckets.lock().unwrap().contains_key(bucket)
    }

    /// Number of stored versions and delete markers of `key`.
    pub fn version_count(&self, bucket: &str, key: &str) -> usize {
        self.buckets
            .lock()
            .unwrap()
            .get(bucket)
            .and_then(|b| b.objects.get(key))
            .map_or(0, Vec::len)
    }

    fn new_version_id(&self) -> String {
        format!("v{:06}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn record(&self, operation: &str) -> Result<()> {
        self.calls.lock().unwrap().push(operation.to_string());
        if let Some((status, code)) = self.failures.lock().unwrap().get(operation) {
            return Err(store_error(operation, *status, code, "injected failure"));
        }
        Ok(())
    }

    fn with_bucket<T>(
        &self,
        operation: &str,
        bucket: &str,
        f: impl FnOnce(&mut BucketState) -> Result<T>,
    ) -> Result<T> {
        self.record(operation)?;
        let mut buckets = self.buckets.lock().unwrap();
        let bucket_state = buckets
            .get_mut(bucket)
            .ok_or_else(|| no_such_bucket(operation))?;
        f(bucket_state)
    }

    fn part_e_tag(&self, body: &[u8]) -> String {
        if self.unstable_part_etags.load(Ordering::SeqCst) {
            format!("\"{}-{}\"", md5_hex(body), self.new_version_id())
        } else {
            format!("\"{}\"", md5_hex(body))
        }
    }
}

#[async_trait]
impl StorageTrait for InMemoryStorage {
    async fn create_bucket(&self, bucket: &str) -> Result<()> {
        const OPERATION: &str = "CreateBucket";
        self.record(OPERATION)?;
        let mut buckets = self.buckets.lock().unwrap();
        if buckets.contains_key(bucket) {
            return Err(store_error(
                OPERATION,
                409,
                "BucketAlreadyOwnedByYou",
                "Your previous request to create the named bucket succeeded and you already own it.",
            ));
        }
        buckets.insert(bucket.to_string(), BucketState::new());
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<()> {
        const OPERATION: &str = "DeleteBucket";
        self.record(OPERATION)?;
        let mut buckets = self.buckets.lock().unwrap();
        let bucket_state = buckets
            .get(bucket)
            .ok_or_else(|| no_such_bucket(OPERATION))?;
        if !bucket_state.objects.is_empty() || !bucket_state.uploads.is_empty() {
            return Err(store_error(
                OPERATION,
                409,
                "BucketNotEmpty",
                "The bucket you tried to delete is not empty",
            ));
        }
        buckets.remove(bucket);
        Ok(())
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        customer_key: Option<&SseCustomerKey>,
    ) -> Result<PutObjectResult> {
        self.with_bucket("PutObject", bucket, |b| {
            let e_tag = format!("\"{}\"", md5_hex(&body));
            let version = StoredVersion::object(
                body,
                e_tag.clone(),
                customer_key.map(|k| k.key_md5_base64.clone()),
            );
            let version_id = b.write_version(key, version, || self.new_version_id());
            Ok(PutObjectResult {
                e_tag: Some(e_tag),
                version_id,
            })
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
        const OPERATION: &str = "GetObject";
        let stored = self.with_bucket(OPERATION, bucket, |b| {
            let history = b.objects.get(key);
            let version = match version_id {
                Some(id) => history
                    .and_then(|h| h.iter().find(|v| v.version_id == id))
                    .ok_or_else(|| {
                        store_error(
                            OPERATION,
                            404,
                            "NoSuchVersion",
                            "The specified version does not exist.",
                        )
                    })?,
                None => history
                    .and_then(|h| h.last())
                    .ok_or_else(|| no_such_key(OPERATION))?,
            };
            if version.is_delete_marker {
                return Err(match version_id {
                    Some(_) => store_error(
                        OPERATION,
                        405,
                        "MethodNotAllowed",
                        "The specified method is not allowed against this resource.",
                    ),
                    None => no_such_key(OPERATION),
                });
            }
            Ok(version.clone())
        })?;

        check_customer_key(OPERATION, stored.customer_key_md5.as_deref(), customer_key)?;

        let size = stored.body.len() as u64;
        let (offset, mut body) = match range {
            Some(range) => {
                if range.length == 0 || range.offset >= size {
                    return Err(store_error(
                        OPERATION,
                        416,
                        "InvalidRange",
                        "The requested range is not satisfiable",
                    ));
                }
                let end = range.end().min(size);
                (
                    range.offset,
                    stored.body[range.offset as usize..end as usize].to_vec(),
                )
            }
            None => (0, stored.body),
        };

        if let Some(corrupt) = *self.corrupt_byte_at.lock().unwrap() {
            if corrupt >= offset && corrupt < offset + body.len() as u64 {
                body[(corrupt - offset) as usize] ^= 0x01;
            }
        }
        if self.truncate_reads.load(Ordering::SeqCst) {
            body.pop();
        }

        Ok(ObjectContent {
            content_length: Some(body.len() as u64),
            version_id: Some(stored.version_id),
            body,
        })
    }

    async fn delete_object(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> Result<DeleteObjectResult> {
        self.with_bucket("DeleteObject", bucket, |b| {
            if let Some(id) = version_id {
                let mut delete_marker = false;
                if let Some(history) = b.objects.get_mut(key) {
                    if let Some(position) = history.iter().position(|v| v.version_id == id) {
                        delete_marker = history.remove(position).is_delete_marker;
                    }
                    if history.is_empty() {
                        b.objects.remove(key);
                    }
                }
                return Ok(DeleteObjectResult {
                    version_id: Some(id.to_string()),
                    delete_marker,
                });
            }

            match b.versioning {
                VersioningState::Unversioned => {
                    b.objects.remove(key);
                    Ok(DeleteObjectResult {
                        version_id: None,
                        delete_marker: false,
                    })
                }
                VersioningState::Enabled | VersioningState::Suspended => {
                    let marker_id = b
                        .write_version(key, StoredVersion::delete_marker(), || {
                            self.new_version_id()
                        })
                        .unwrap_or_else(|| NULL_VERSION_ID.to_string());
                    Ok(DeleteObjectResult {
                        version_id: Some(marker_id),
                        delete_marker: true,
                    })
                }
            }
        })
    }

    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        self.with_bucket("ListObjectsV2", bucket, |b| {
            Ok(b.objects
                .iter()
                .filter(|(key, history)| {
                    key.starts_with(prefix)
                        && history.last().is_some_and(|v| !v.is_delete_marker)
                })
                .map(|(key, _)| key.clone())
                .collect())
        })
    }

    async fn list_object_versions(&self, bucket: &str, prefix: &str) -> Result<Vec<VersionEntry>> {
        self.with_bucket("ListObjectVersions", bucket, |b| {
            Ok(b.objects
                .iter()
                .filter(|(key, _)| key.starts_with(prefix))
                .flat_map(|(key, history)| {
                    history
                        .iter()
                        .rev()
                        .enumerate()
                        .map(move |(i, version)| VersionEntry {
                            key: key.clone(),
                            version_id: version.version_id.clone(),
                            is_latest: i == 0,
                            is_delete_marker: version.is_delete_marker,
                            e_tag: (!version.is_delete_marker).then(|| version.e_tag.clone()),
                            size: version.body.len() as u64,
                        })
                })
                .collect())
        })
    }

    async fn put_bucket_versioning(&self, bucket: &str, state: VersioningState) -> Result<()> {
        const OPERATION: &str = "PutBucketVersioning";
        let lag = self.versioning_read_lag.load(Ordering::SeqCst);
        self.with_bucket(OPERATION, bucket, |b| {
            if state == VersioningState::Unversioned {
                return Err(anyhow!(HarnessError::InvalidInput(
                    "a bucket cannot be returned to the unversioned state".to_string()
                )));
            }
            b.stale_versioning = b.versioning;
            b.versioning = state;
            b.stale_reads_remaining = lag;
            Ok(())
        })
    }

    async fn get_bucket_versioning(&self, bucket: &str) -> Result<VersioningState> {
        self.with_bucket("GetBucketVersioning", bucket, |b| {
            if b.stale_reads_remaining > 0 {
                b.stale_reads_remaining -= 1;
                return Ok(b.stale_versioning);
            }
            Ok(b.versioning)
        })
    }

    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        _metadata: &HashMap<String, String>,
        customer_key: Option<&SseCustomerKey>,
    ) -> Result<String> {
        self.with_bucket("CreateMultipartUpload", bucket, |b| {
            let upload_id = format!("upload-{:06}", self.next_id.fetch_add(1, Ordering::SeqCst));
            b.uploads.insert(
                upload_id.clone(),
                PendingUpload {
                    key: key.to_string(),
                    customer_key_md5: customer_key.map(|k| k.key_md5_base64.clone()),
                    parts: BTreeMap::new(),
                },
            );
            Ok(upload_id)
        })
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
        const OPERATION: &str = "UploadPart";
        self.with_bucket(OPERATION, bucket, |b| {
            let upload = b.upload_mut(OPERATION, key, upload_id)?;
            if !(1..=10_000).contains(&part_number) {
                return Err(store_error(
                    OPERATION,
                    400,
                    "InvalidArgument",
                    "Part number must be an integer between 1 and 10000, inclusive",
                ));
            }
            check_customer_key(OPERATION, upload.customer_key_md5.as_deref(), customer_key)?;

            let e_tag = self.part_e_tag(&body);
            upload.parts.insert(
                part_number,
                StoredPart {
                    e_tag: e_tag.clone(),
                    body,
                },
            );
            Ok(e_tag)
        })
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
        const OPERATION: &str = "UploadPartCopy";
        self.record(OPERATION)?;
        let mut buckets = self.buckets.lock().unwrap();

        let source_body = {
            let source_bucket = buckets
                .get(&source.bucket)
                .ok_or_else(|| no_such_bucket(OPERATION))?;
            let history = source_bucket.objects.get(&source.key);
            let version = match &source.version_id {
                Some(id) => history.and_then(|h| h.iter().find(|v| &v.version_id == id)),
                None => history.and_then(|h| h.last()),
            }
            .filter(|v| !v.is_delete_marker)
            .ok_or_else(|| no_such_key(OPERATION))?;
            if version.customer_key_md5.is_some() {
                return Err(store_error(
                    OPERATION,
                    400,
                    "InvalidRequest",
                    "The source object was stored using a form of Server Side Encryption.",
                ));
            }
            version.body.clone()
        };

        if !range.fits_within(source_body.len() as u64) {
            return Err(store_error(
                OPERATION,
                400,
                "InvalidArgument",
                "Range specified is not valid for source object",
            ));
        }
        let body = range.slice(&source_body).to_vec();

        let e_tag = self.part_e_tag(&body);
        let upload = buckets
            .get_mut(bucket)
            .ok_or_else(|| no_such_bucket(OPERATION))?
            .upload_mut(OPERATION, key, upload_id)?;
        upload.parts.insert(
            part_number,
            StoredPart {
                e_tag: e_tag.clone(),
                body,
            },
        );
        Ok(e_tag)
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPartInfo],
    ) -> Result<CompletedUpload> {
        const OPERATION: &str = "CompleteMultipartUpload";
        self.with_bucket(OPERATION, bucket, |b| {
            let upload = b.upload_mut(OPERATION, key, upload_id)?;
            if parts.is_empty() {
                return Err(store_error(
                    OPERATION,
                    400,
                    "MalformedXML",
                    "The XML you provided was not well-formed or did not validate against our published schema.",
                ));
            }
            if !parts
                .windows(2)
                .all(|pair| pair[0].part_number < pair[1].part_number)
            {
                return Err(store_error(
                    OPERATION,
                    400,
                    "InvalidPartOrder",
                    "The list of parts was not in ascending order.",
                ));
            }

            let mut body = Vec::new();
            for (i, part) in parts.iter().enumerate() {
                let stored = upload
                    .parts
                    .get(&part.part_number)
                    .filter(|stored| stored.e_tag == part.e_tag)
                    .ok_or_else(|| {
                        store_error(
                            OPERATION,
                            400,
                            "InvalidPart",
                            "One or more of the specified parts could not be found.",
                        )
                    })?;
                if i + 1 < parts.len() && (stored.body.len() as u64) < self.min_part_size {
                    return Err(store_error(
                        OPERATION,
                        400,
                        "EntityTooSmall",
                        "Your proposed upload is smaller than the minimum allowed object size.",
                    ));
                }
                body.extend_from_slice(&stored.body);
            }
            let customer_key_md5 = upload.customer_key_md5.clone();
            b.uploads.remove(upload_id);

            let e_tag = format!("\"{}-{}\"", md5_hex(&body), parts.len());
            let version = StoredVersion::object(body, e_tag.clone(), customer_key_md5);
            let version_id = b.write_version(key, version, || self.new_version_id());
            Ok(CompletedUpload {
                e_tag: Some(e_tag),
                version_id,
            })
        })
    }

    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<()> {
        const OPERATION: &str = "AbortMultipartUpload";
        self.with_bucket(OPERATION, bucket, |b| {
            b.upload_mut(OPERATION, key, upload_id)?;
            b.uploads.remove(upload_id);
            Ok(())
        })
    }

    async fn list_parts(&self, bucket: &str, key: &str, upload_id: &str) -> Result<Vec<PartInfo>> {
        const OPERATION: &str = "ListParts";
        self.with_bucket(OPERATION, bucket, |b| {
            let upload = b.upload_mut(OPERATION, key, upload_id)?;
            Ok(upload
                .parts
                .iter()
                .map(|(part_number, part)| PartInfo {
                    part_number: *part_number,
                    e_tag: part.e_tag.clone(),
                    size: part.body.len() as u64,
                })
                .collect())
        })
    }

    async fn list_multipart_uploads(&self, bucket: &str) -> Result<Vec<UploadInfo>> {
        self.with_bucket("ListMultipartUploads", bucket, |b| {
            let mut uploads: Vec<UploadInfo> = b
                .uploads
                .iter()
                .map(|(upload_id, upload)| UploadInfo {
                    key: upload.key.clone(),
                    upload_id: upload_id.clone(),
                })
                .collect();
            uploads.sort_by(|a, b| a.key.cmp(&b.key).then(a.upload_id.cmp(&b.upload_id)));
            Ok(uploads)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::error::{store_error_code, store_error_status};

    #[tokio::test]
    async fn suspended_writes_keep_a_single_null_version() {
        let storage = InMemoryStorage::new();
        storage.create_bucket("bucket").await.unwrap();
        storage
            .put_bucket_versioning("bucket", VersioningState::Enabled)
            .await
            .unwrap();
        storage.put_object("bucket", "k", b"a".to_vec(), None).await.unwrap();
        storage
            .put_bucket_versioning("bucket", VersioningState::Suspended)
            .await
            .unwrap();
        storage.put_object("bucket", "k", b"b".to_vec(), None).await.unwrap();
        storage.put_object("bucket", "k", b"c".to_vec(), None).await.unwrap();

        let versions = storage.list_object_versions("bucket", "k").await.unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0].version_id, NULL_VERSION_ID);
        assert!(versions[0].is_latest);
        assert_ne!(versions[1].version_id, NULL_VERSION_ID);
    }

    #[tokio::test]
    async fn range_past_end_is_invalid_range() {
        let storage = InMemoryStorage::new();
        storage.create_bucket("bucket").await.unwrap();
        storage.put_object("bucket", "k", vec![b'x'; 10], None).await.unwrap();

        let e = storage
            .get_object("bucket", "k", Some(RangeSpec::new(10, 1)), None, None)
            .await
            .unwrap_err();
        assert_eq!(store_error_status(&e), Some(416));

        let content = storage
            .get_object("bucket", "k", Some(RangeSpec::new(8, 5)), None, None)
            .await
            .unwrap();
        assert_eq!(content.body.len(), 2);
    }

    #[tokio::test]
    async fn wrong_customer_key_is_access_denied() {
        let storage = InMemoryStorage::new();
        storage.create_bucket("bucket").await.unwrap();
        let key = SseCustomerKey::from_bytes(&[1u8; 32]);
        storage
            .put_object("bucket", "k", b"secret".to_vec(), Some(&key))
            .await
            .unwrap();

        let e = storage
            .get_object("bucket", "k", None, None, None)
            .await
            .unwrap_err();
        assert_eq!(store_error_status(&e), Some(400));

        let wrong = SseCustomerKey::from_bytes(&[2u8; 32]);
        let e = storage
            .get_object("bucket", "k", None, None, Some(&wrong))
            .await
            .unwrap_err();
        assert_eq!(store_error_status(&e), Some(403));
    }

    #[tokio::test]
    async fn non_empty_bucket_cannot_be_deleted() {
        let storage = InMemoryStorage::new();
        storage.create_bucket("bucket").await.unwrap();
        storage.put_object("bucket", "k", b"a".to_vec(), None).await.unwrap();

        let e = storage.delete_bucket("bucket").await.unwrap_err();
        assert_eq!(store_error_code(&e), Some("BucketNotEmpty"));
    }

    #[tokio::test]
    async fn injected_failures_are_store_errors() {
        let storage = InMemoryStorage::new();
        storage.fail_operation("CreateBucket", 503, "SlowDown");

        let e = storage.create_bucket("bucket").await.unwrap_err();
        assert_eq!(store_error_code(&e), Some("SlowDown"));
        assert_eq!(storage.call_count("CreateBucket"), 1);
        assert!(!storage.bucket_exists("bucket"));
    }
}
