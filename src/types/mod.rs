use std::fmt;
use std::fmt::{Debug, Formatter};
use std::path::PathBuf;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use md5::{Digest, Md5};
use zeroize_derive::{Zeroize, ZeroizeOnDrop};

pub mod error;

/// Version id the store reports for writes made while versioning is not enabled.
pub const NULL_VERSION_ID: &str = "null";

/// Algorithm name sent with every SSE-C request.
pub const SSE_CUSTOMER_ALGORITHM: &str = "AES256";

/// Half-open byte interval `[offset, offset + length)`.
///
/// On the wire the interval is expressed as an inclusive HTTP range
/// (`bytes=first-last`), see [`RangeSpec::to_header`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RangeSpec {
    pub offset: u64,
    pub length: u64,
}

impl RangeSpec {
    pub fn new(offset: u64, length: u64) -> Self {
        RangeSpec { offset, length }
    }

    /// Exclusive end of the interval.
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }

    /// Inclusive index of the last byte in the interval, `None` when empty.
    pub fn last_byte(&self) -> Option<u64> {
        if self.length == 0 {
            None
        } else {
            Some(self.end() - 1)
        }
    }

    /// Renders the interval as an HTTP `Range` / `x-amz-copy-source-range` value.
    ///
    /// ```
    /// use s3compat_rs::types::RangeSpec;
    ///
    /// assert_eq!(RangeSpec::new(0, 1024).to_header().as_deref(), Some("bytes=0-1023"));
    /// assert_eq!(RangeSpec::new(10, 1).to_header().as_deref(), Some("bytes=10-10"));
    /// assert_eq!(RangeSpec::new(0, 0).to_header(), None);
    /// ```
    pub fn to_header(&self) -> Option<String> {
        self.last_byte()
            .map(|last_byte| format!("bytes={}-{last_byte}", self.offset))
    }

    /// Returns true if the interval is non-empty and fits inside an object of `size` bytes.
    pub fn fits_within(&self, size: u64) -> bool {
        self.length >= 1 && self.end() <= size
    }

    /// Returns the bytes of `data` covered by this interval.
    ///
    /// The caller guarantees `self.fits_within(data.len())`.
    pub fn slice<'a>(&self, data: &'a [u8]) -> &'a [u8] {
        &data[self.offset as usize..self.end() as usize]
    }
}

impl fmt::Display for RangeSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.offset, self.end())
    }
}

/// Remote object a copy-part reads from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopySource {
    pub bucket: String,
    pub key: String,
    pub version_id: Option<String>,
}

impl CopySource {
    pub fn new(bucket: &str, key: &str) -> Self {
        CopySource {
            bucket: bucket.to_string(),
            key: key.to_string(),
            version_id: None,
        }
    }

    pub fn with_version_id(mut self, version_id: &str) -> Self {
        self.version_id = Some(version_id.to_string());
        self
    }

    /// Value of the `x-amz-copy-source` header.
    ///
    /// ```
    /// use s3compat_rs::types::CopySource;
    ///
    /// let source = CopySource::new("src-bucket", "dir/file.bin");
    /// assert_eq!(source.to_header(), "src-bucket/dir/file.bin");
    /// let source = source.with_version_id("v1");
    /// assert_eq!(source.to_header(), "src-bucket/dir/file.bin?versionId=v1");
    /// ```
    pub fn to_header(&self) -> String {
        let path = format!("{}/{}", self.bucket, urlencoding::encode(&self.key).replace("%2F", "/"));
        match &self.version_id {
            Some(version_id) => format!("{path}?versionId={}", urlencoding::encode(version_id)),
            None => path,
        }
    }
}

/// Where the bytes of one multipart part came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartSource {
    /// Slice of the locally generated payload.
    Payload(RangeSpec),
    /// Byte range of a remote object, populated with copy-part.
    Copy { source: CopySource, range: RangeSpec },
}

/// One part of an upload session, filled in once the store returned its ETag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartDescriptor {
    pub part_number: i32,
    pub source: PartSource,
    pub e_tag: String,
}

impl PartDescriptor {
    pub fn completed_part(&self) -> CompletedPartInfo {
        CompletedPartInfo {
            part_number: self.part_number,
            e_tag: self.e_tag.clone(),
        }
    }
}

/// State of one in-flight multipart upload.
///
/// Created by `begin_upload` and consumed by `complete` or `abort`, so a
/// terminated session cannot be reused.
#[derive(Debug)]
pub struct UploadSession {
    pub upload_id: String,
    pub bucket: String,
    pub key: String,
    pub parts: Vec<PartDescriptor>,
    /// Concatenation of every payload part uploaded so far. Stays empty for
    /// pure copy uploads.
    pub accumulated_plaintext: Vec<u8>,
    pub customer_key: Option<SseCustomerKey>,
}

impl UploadSession {
    pub fn next_part_number(&self) -> i32 {
        self.parts.last().map_or(1, |part| part.part_number + 1)
    }

    /// Parts in ascending part-number order, ready for completion.
    pub fn completed_parts(&self) -> Vec<CompletedPartInfo> {
        let mut parts: Vec<CompletedPartInfo> =
            self.parts.iter().map(PartDescriptor::completed_part).collect();
        parts.sort_by_key(|part| part.part_number);
        parts
    }
}

/// `(part number, ETag)` pair of a complete-multipart-upload request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPartInfo {
    pub part_number: i32,
    pub e_tag: String,
}

/// Result of complete-multipart-upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedUpload {
    pub e_tag: Option<String>,
    pub version_id: Option<String>,
}

/// One entry of a list-parts response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartInfo {
    pub part_number: i32,
    pub e_tag: String,
    pub size: u64,
}

/// One entry of a list-multipart-uploads response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadInfo {
    pub key: String,
    pub upload_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutObjectResult {
    pub e_tag: Option<String>,
    pub version_id: Option<String>,
}

/// Body and declared length of a (possibly ranged) read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectContent {
    pub content_length: Option<u64>,
    pub version_id: Option<String>,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteObjectResult {
    pub version_id: Option<String>,
    pub delete_marker: bool,
}

/// Versioning status of a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersioningState {
    Unversioned,
    Enabled,
    Suspended,
}

impl fmt::Display for VersioningState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = match self {
            VersioningState::Unversioned => "Unversioned",
            VersioningState::Enabled => "Enabled",
            VersioningState::Suspended => "Suspended",
        };
        f.write_str(s)
    }
}

/// A write or delete the harness made against one key, as it expects the
/// store to report it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRecord {
    pub version_id: String,
    pub key: String,
    pub content: Vec<u8>,
    pub is_delete_marker: bool,
}

impl VersionRecord {
    pub fn object(key: &str, version_id: Option<&str>, content: Vec<u8>) -> Self {
        VersionRecord {
            version_id: version_id.unwrap_or(NULL_VERSION_ID).to_string(),
            key: key.to_string(),
            content,
            is_delete_marker: false,
        }
    }

    pub fn delete_marker(key: &str, version_id: Option<&str>) -> Self {
        VersionRecord {
            version_id: version_id.unwrap_or(NULL_VERSION_ID).to_string(),
            key: key.to_string(),
            content: Vec::new(),
            is_delete_marker: true,
        }
    }

    pub fn is_null_version(&self) -> bool {
        self.version_id == NULL_VERSION_ID
    }
}

/// One row of a list-object-versions response (object version or delete marker).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionEntry {
    pub key: String,
    pub version_id: String,
    pub is_latest: bool,
    pub is_delete_marker: bool,
    pub e_tag: Option<String>,
    pub size: u64,
}

/// Customer-supplied key for SSE-C requests.
///
/// Holds the base64 key and its base64 MD5 digest, the two header values the
/// store requires next to the algorithm name.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SseCustomerKey {
    pub key_base64: String,
    pub key_md5_base64: String,
}

impl SseCustomerKey {
    pub fn from_bytes(key: &[u8; 32]) -> Self {
        SseCustomerKey {
            key_base64: STANDARD.encode(key),
            key_md5_base64: STANDARD.encode(Md5::digest(key)),
        }
    }

    pub fn algorithm(&self) -> &'static str {
        SSE_CUSTOMER_ALGORITHM
    }
}

impl Debug for SseCustomerKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("SseCustomerKey")
            .field("key_base64", &"** redacted **")
            .field("key_md5_base64", &self.key_md5_base64)
            .finish()
    }
}

/// AWS configuration file locations.
#[derive(Debug, Clone, Default)]
pub struct ClientConfigLocation {
    pub aws_config_file: Option<PathBuf>,
    pub aws_shared_credentials_file: Option<PathBuf>,
}

/// Where the harness takes its credentials from.
#[derive(Debug, Clone)]
pub enum S3Credentials {
    Profile(String),
    Credentials { access_keys: AccessKeys },
    FromEnvironment,
}

/// AWS access key pair with secure zeroization.
///
/// The secret_access_key and session_token are securely cleared from memory
/// when this struct is dropped, using the zeroize crate.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct AccessKeys {
    pub access_key: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl Debug for AccessKeys {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut keys = f.debug_struct("AccessKeys");
        let session_token = self
            .session_token
            .as_ref()
            .map_or("None", |_| "** redacted **");
        keys.field("access_key", &self.access_key)
            .field("secret_access_key", &"** redacted **")
            .field("session_token", &session_token);
        keys.finish()
    }
}
