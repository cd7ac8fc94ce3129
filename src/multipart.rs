//! Multipart upload orchestration.
//!
//! [`MultipartUploadOrchestrator`] drives initiate, upload-part or copy-part,
//! and complete or abort against a [`Storage`]. The [`UploadSession`] it
//! returns records every part in ascending part-number order together with
//! the concatenated plaintext of payload parts, so the upload can be verified
//! afterwards.

use std::collections::{BTreeSet, HashMap};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info};

use crate::generator::{generate_text, generate_text_with_seed, part_ranges};
use crate::storage::Storage;
use crate::types::error::HarnessError;
use crate::types::{
    CompletedPartInfo, CompletedUpload, CopySource, PartDescriptor, PartInfo, PartSource,
    RangeSpec, SseCustomerKey, UploadInfo, UploadSession,
};

/// Options of [`MultipartUploadOrchestrator::upload_from_payload`].
#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    /// Part numbers uploaded a second time with identical content. The second
    /// upload must return the same ETag as the first.
    pub resend_parts: BTreeSet<i32>,
    /// Seed of the generated payload. A fresh random payload is used when unset.
    pub seed: Option<u64>,
}

impl UploadOptions {
    pub fn with_resend_parts(parts: impl IntoIterator<Item = i32>) -> Self {
        UploadOptions {
            resend_parts: parts.into_iter().collect(),
            ..UploadOptions::default()
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        UploadOptions {
            seed: Some(seed),
            ..UploadOptions::default()
        }
    }
}

#[derive(Clone)]
pub struct MultipartUploadOrchestrator {
    storage: Storage,
}

impl MultipartUploadOrchestrator {
    pub fn new(storage: Storage) -> Self {
        MultipartUploadOrchestrator { storage }
    }

    /// Initiate a multipart upload of `bucket/key`.
    pub async fn begin_upload(
        &self,
        bucket: &str,
        key: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<UploadSession> {
        self.begin(bucket, key, metadata, None).await
    }

    /// Initiate a multipart upload encrypted with a customer-supplied key.
    /// The key is attached to every part uploaded through the session.
    pub async fn begin_encrypted_upload(
        &self,
        bucket: &str,
        key: &str,
        metadata: &HashMap<String, String>,
        customer_key: SseCustomerKey,
    ) -> Result<UploadSession> {
        self.begin(bucket, key, metadata, Some(customer_key)).await
    }

    async fn begin(
        &self,
        bucket: &str,
        key: &str,
        metadata: &HashMap<String, String>,
        customer_key: Option<SseCustomerKey>,
    ) -> Result<UploadSession> {
        let upload_id = self
            .storage
            .create_multipart_upload(bucket, key, metadata, customer_key.as_ref())
            .await
            .with_context(|| format!("failed to initiate multipart upload of s3://{bucket}/{key}"))?;

        debug!(
            bucket = bucket,
            key = key,
            upload_id = upload_id,
            encrypted = customer_key.is_some(),
            "upload session started."
        );

        Ok(UploadSession {
            upload_id,
            bucket: bucket.to_string(),
            key: key.to_string(),
            parts: Vec::new(),
            accumulated_plaintext: Vec::new(),
            customer_key,
        })
    }

    /// Generate `total_size` bytes of text and upload them as consecutive
    /// parts of at most `part_size` bytes.
    ///
    /// Parts are numbered after the parts already in the session, and every
    /// chunk is appended to `accumulated_plaintext` in upload order.
    pub async fn upload_from_payload(
        &self,
        session: &mut UploadSession,
        total_size: u64,
        part_size: u64,
        options: &UploadOptions,
    ) -> Result<()> {
        let ranges = part_ranges(total_size, part_size)?;
        let payload = match options.seed {
            Some(seed) => generate_text_with_seed(seed, total_size as usize),
            None => generate_text(&mut rand::thread_rng(), total_size as usize),
        };

        for range in ranges {
            let chunk = range.slice(&payload).to_vec();
            let part_number = session.next_part_number();
            let e_tag = self.send_part(session, part_number, chunk.clone()).await?;

            if options.resend_parts.contains(&part_number) {
                let resent_e_tag = self.send_part(session, part_number, chunk.clone()).await?;
                if resent_e_tag != e_tag {
                    return Err(anyhow!(HarnessError::ResendETagMismatch {
                        part_number,
                        first: e_tag,
                        second: resent_e_tag,
                    }));
                }
                debug!(
                    upload_id = session.upload_id.as_str(),
                    part_number = part_number,
                    "resent part returned the same ETag."
                );
            }

            self.push_payload_part(session, part_number, chunk, e_tag);
        }

        info!(
            bucket = session.bucket.as_str(),
            key = session.key.as_str(),
            upload_id = session.upload_id.as_str(),
            total_size = total_size,
            parts = session.parts.len(),
            "payload uploaded."
        );
        Ok(())
    }

    /// Upload `data` as the next part of the session and return its ETag.
    pub async fn upload_part(&self, session: &mut UploadSession, data: Vec<u8>) -> Result<String> {
        let part_number = session.next_part_number();
        let e_tag = self.send_part(session, part_number, data.clone()).await?;
        self.push_payload_part(session, part_number, data, e_tag.clone());
        Ok(e_tag)
    }

    /// Populate the session by server-side copy of `[0, total_size)` of
    /// `source`, in ranges of at most `part_size` bytes.
    ///
    /// `accumulated_plaintext` is not touched; compare source and destination
    /// with the verifier instead.
    pub async fn copy_from_source(
        &self,
        session: &mut UploadSession,
        source: &CopySource,
        total_size: u64,
        part_size: u64,
    ) -> Result<()> {
        if total_size == 0 {
            return Err(anyhow!(HarnessError::InvalidInput(format!(
                "cannot copy an empty range of s3://{}",
                source.to_header()
            ))));
        }

        for range in part_ranges(total_size, part_size)? {
            let part_number = session.next_part_number();
            let e_tag = self
                .storage
                .upload_part_copy(
                    &session.bucket,
                    &session.key,
                    &session.upload_id,
                    part_number,
                    source,
                    range,
                )
                .await
                .with_context(|| {
                    format!(
                        "failed to copy {range} of s3://{} into part {part_number}",
                        source.to_header()
                    )
                })?;

            session.parts.push(PartDescriptor {
                part_number,
                source: PartSource::Copy {
                    source: source.clone(),
                    range,
                },
                e_tag,
            });
        }

        info!(
            bucket = session.bucket.as_str(),
            key = session.key.as_str(),
            upload_id = session.upload_id.as_str(),
            copy_source = source.to_header(),
            parts = session.parts.len(),
            "source copied."
        );
        Ok(())
    }

    /// Complete the upload with every part of the session, sorted by part number.
    ///
    /// A session without parts is rejected before anything is sent.
    pub async fn complete(&self, session: UploadSession) -> Result<CompletedUpload> {
        if session.parts.is_empty() {
            return Err(anyhow!(HarnessError::InvalidInput(format!(
                "upload {} of s3://{}/{} has no parts to complete",
                session.upload_id, session.bucket, session.key
            ))));
        }
        let parts = session.completed_parts();
        self.send_complete(session, &parts).await
    }

    /// Complete the upload with exactly `parts`, which may be empty, out of
    /// order or carry wrong ETags, so store-side rejections can be observed.
    pub async fn complete_with_parts(
        &self,
        session: UploadSession,
        parts: &[CompletedPartInfo],
    ) -> Result<CompletedUpload> {
        self.send_complete(session, parts).await
    }

    /// Abort the upload. The target key must stay as it was.
    pub async fn abort(&self, session: UploadSession) -> Result<()> {
        self.storage
            .abort_multipart_upload(&session.bucket, &session.key, &session.upload_id)
            .await
            .with_context(|| {
                format!(
                    "failed to abort upload {} of s3://{}/{}",
                    session.upload_id, session.bucket, session.key
                )
            })?;
        debug!(
            bucket = session.bucket.as_str(),
            key = session.key.as_str(),
            upload_id = session.upload_id.as_str(),
            "upload session aborted."
        );
        Ok(())
    }

    /// Parts the store has recorded for the session.
    pub async fn list_parts(&self, session: &UploadSession) -> Result<Vec<PartInfo>> {
        self.storage
            .list_parts(&session.bucket, &session.key, &session.upload_id)
            .await
    }

    /// Multipart uploads in progress in `bucket`.
    pub async fn list_uploads(&self, bucket: &str) -> Result<Vec<UploadInfo>> {
        self.storage.list_multipart_uploads(bucket).await
    }

    async fn send_part(
        &self,
        session: &UploadSession,
        part_number: i32,
        data: Vec<u8>,
    ) -> Result<String> {
        self.storage
            .upload_part(
                &session.bucket,
                &session.key,
                &session.upload_id,
                part_number,
                data,
                session.customer_key.as_ref(),
            )
            .await
            .with_context(|| {
                format!(
                    "failed to upload part {part_number} of upload {}",
                    session.upload_id
                )
            })
    }

    fn push_payload_part(
        &self,
        session: &mut UploadSession,
        part_number: i32,
        data: Vec<u8>,
        e_tag: String,
    ) {
        let range = RangeSpec::new(
            session.accumulated_plaintext.len() as u64,
            data.len() as u64,
        );
        session.parts.push(PartDescriptor {
            part_number,
            source: PartSource::Payload(range),
            e_tag,
        });
        session.accumulated_plaintext.extend_from_slice(&data);
    }

    async fn send_complete(
        &self,
        session: UploadSession,
        parts: &[CompletedPartInfo],
    ) -> Result<CompletedUpload> {
        let completed = self
            .storage
            .complete_multipart_upload(&session.bucket, &session.key, &session.upload_id, parts)
            .await
            .with_context(|| {
                format!(
                    "failed to complete upload {} of s3://{}/{}",
                    session.upload_id, session.bucket, session.key
                )
            })?;

        info!(
            bucket = session.bucket.as_str(),
            key = session.key.as_str(),
            upload_id = session.upload_id.as_str(),
            parts = parts.len(),
            e_tag = completed.e_tag.as_deref(),
            version_id = completed.version_id.as_deref(),
            "multipart upload completed."
        );
        Ok(completed)
    }
}
