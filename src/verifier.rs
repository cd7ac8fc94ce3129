//! Range-based content-integrity verification.
//!
//! [`ContentIntegrityVerifier`] re-reads objects whole, in fixed-step windows
//! or in random ranges and compares the declared length and the returned
//! bytes with a locally held reference. Mismatches are reported as
//! [`HarnessError::ContentMismatch`] or [`HarnessError::LengthMismatch`] so
//! they never look like store errors.

use anyhow::{Context, Result, anyhow};
use rand::Rng;
use tracing::{debug, info, trace};

use crate::storage::Storage;
use crate::types::error::HarnessError;
use crate::types::{ObjectContent, RangeSpec, SseCustomerKey};

/// Smallest object size random ranges can be sampled from.
pub const MIN_RANDOM_RANGE_FILE_SIZE: u64 = 1000;

/// Windows of `step` bytes covering `[0, size)` exactly once, the last one
/// truncated at the object boundary.
///
/// ```
/// use s3compat_rs::verifier::sequential_windows;
///
/// let windows = sequential_windows(10, 4).unwrap();
/// let lengths: Vec<u64> = windows.iter().map(|w| w.length).collect();
/// assert_eq!(lengths, vec![4, 4, 2]);
/// ```
pub fn sequential_windows(size: u64, step: u64) -> Result<Vec<RangeSpec>> {
    if step == 0 {
        return Err(anyhow!(HarnessError::InvalidInput(
            "range step must be at least 1 byte".to_string()
        )));
    }

    let mut windows = Vec::with_capacity(size.div_ceil(step) as usize);
    let mut offset = 0;
    while offset < size {
        let length = step.min(size - offset);
        windows.push(RangeSpec::new(offset, length));
        offset += length;
    }
    Ok(windows)
}

/// Draw one range of an object of `file_size` bytes.
///
/// The offset is uniform in `[0, file_size - 1000)` and the length uniform in
/// `[1, file_size - offset)`. For an object of exactly 1000 bytes the offset
/// is always 0.
pub fn sample_random_range<R: Rng + ?Sized>(rng: &mut R, file_size: u64) -> Result<RangeSpec> {
    if file_size < MIN_RANDOM_RANGE_FILE_SIZE {
        return Err(anyhow!(HarnessError::InvalidInput(format!(
            "random ranges need an object of at least {MIN_RANDOM_RANGE_FILE_SIZE} bytes, got {file_size}"
        ))));
    }

    let offset_bound = (file_size - MIN_RANDOM_RANGE_FILE_SIZE).max(1);
    let offset = rng.gen_range(0..offset_bound);
    let length = rng.gen_range(1..file_size - offset);
    Ok(RangeSpec::new(offset, length))
}

#[derive(Clone)]
pub struct ContentIntegrityVerifier {
    storage: Storage,
    customer_key: Option<SseCustomerKey>,
}

impl ContentIntegrityVerifier {
    pub fn new(storage: Storage) -> Self {
        ContentIntegrityVerifier {
            storage,
            customer_key: None,
        }
    }

    /// Verifier that attaches `customer_key` to every read.
    pub fn with_customer_key(storage: Storage, customer_key: SseCustomerKey) -> Self {
        ContentIntegrityVerifier {
            storage,
            customer_key: Some(customer_key),
        }
    }

    /// One full read; the length and the bytes must equal `expected`.
    pub async fn verify_whole(&self, bucket: &str, key: &str, expected: &[u8]) -> Result<()> {
        let content = self.read(bucket, key, None).await?;
        let window = RangeSpec::new(0, expected.len() as u64);
        compare(bucket, key, window, expected, &content)?;

        debug!(
            bucket = bucket,
            key = key,
            size = expected.len(),
            "whole object verified."
        );
        Ok(())
    }

    /// One range read per window of `step` bytes, returning the windows read.
    ///
    /// A step of at least the object size is a single whole-object read.
    pub async fn verify_sequential_ranges(
        &self,
        bucket: &str,
        key: &str,
        expected: &[u8],
        step: u64,
    ) -> Result<Vec<RangeSpec>> {
        let size = expected.len() as u64;
        let windows = sequential_windows(size, step)?;
        if step >= size {
            self.verify_whole(bucket, key, expected).await?;
            return Ok(windows);
        }

        for window in &windows {
            let content = self.read(bucket, key, Some(*window)).await?;
            compare(bucket, key, *window, window.slice(expected), &content)?;
            trace!(bucket = bucket, key = key, range = %window, "window verified.");
        }

        info!(
            bucket = bucket,
            key = key,
            size = size,
            step = step,
            windows = windows.len(),
            "sequential ranges verified."
        );
        Ok(windows)
    }

    /// `iterations` reads of ranges drawn with [`sample_random_range`],
    /// returning the ranges read.
    pub async fn verify_random_ranges<R: Rng + Send + ?Sized>(
        &self,
        bucket: &str,
        key: &str,
        expected: &[u8],
        file_size: u64,
        iterations: usize,
        rng: &mut R,
    ) -> Result<Vec<RangeSpec>> {
        if file_size > expected.len() as u64 {
            return Err(anyhow!(HarnessError::InvalidInput(format!(
                "file size {file_size} exceeds the {} reference bytes",
                expected.len()
            ))));
        }

        let mut ranges = Vec::with_capacity(iterations);
        for _ in 0..iterations {
            let range = sample_random_range(rng, file_size)?;
            let content = self.read(bucket, key, Some(range)).await?;
            compare(bucket, key, range, range.slice(expected), &content)?;
            ranges.push(range);
        }

        info!(
            bucket = bucket,
            key = key,
            file_size = file_size,
            iterations = iterations,
            "random ranges verified."
        );
        Ok(ranges)
    }

    /// Read `source` whole and require `destination` to hold the same bytes.
    /// Returns the number of bytes compared.
    pub async fn verify_same_content(
        &self,
        source_bucket: &str,
        source_key: &str,
        destination_bucket: &str,
        destination_key: &str,
    ) -> Result<u64> {
        let source = self.read(source_bucket, source_key, None).await?;
        self.verify_whole(destination_bucket, destination_key, &source.body)
            .await?;
        Ok(source.body.len() as u64)
    }

    async fn read(&self, bucket: &str, key: &str, range: Option<RangeSpec>) -> Result<ObjectContent> {
        self.storage
            .get_object(bucket, key, range, None, self.customer_key.as_ref())
            .await
            .with_context(|| match range {
                Some(range) => format!("failed to read {range} of s3://{bucket}/{key}"),
                None => format!("failed to read s3://{bucket}/{key}"),
            })
    }
}

fn compare(
    bucket: &str,
    key: &str,
    range: RangeSpec,
    expected: &[u8],
    content: &ObjectContent,
) -> Result<()> {
    let length_mismatch = |actual: u64| {
        anyhow!(HarnessError::LengthMismatch {
            bucket: bucket.to_string(),
            key: key.to_string(),
            range,
            expected: expected.len() as u64,
            actual,
        })
    };

    if let Some(declared) = content.content_length {
        if declared != expected.len() as u64 {
            return Err(length_mismatch(declared));
        }
    }
    if content.body.len() != expected.len() {
        return Err(length_mismatch(content.body.len() as u64));
    }

    if let Some(i) = content
        .body
        .iter()
        .zip(expected)
        .position(|(actual, expected)| actual != expected)
    {
        return Err(anyhow!(HarnessError::ContentMismatch {
            bucket: bucket.to_string(),
            key: key.to_string(),
            range,
            first_difference: range.offset + i as u64,
        }));
    }
    Ok(())
}
