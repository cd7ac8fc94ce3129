//! Pseudo-random payload generation and size-driven part splitting.
//!
//! Every function here is pure: it is parameterized by a seed or a random
//! source and returns freshly allocated data, so concurrent checks never share
//! generator state.

use anyhow::{Result, anyhow};
use rand::distributions::Alphanumeric;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::types::RangeSpec;
use crate::types::error::HarnessError;

/// Smallest size a non-final multipart part may have on S3.
pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Part size used when the caller does not choose one.
pub const DEFAULT_PART_SIZE: u64 = MIN_PART_SIZE;

/// Generates `size` bytes of alphanumeric text from `rng`.
pub fn generate_text<R: Rng + ?Sized>(rng: &mut R, size: usize) -> Vec<u8> {
    rng.sample_iter(&Alphanumeric).take(size).collect()
}

/// Generates `size` bytes of alphanumeric text, reproducible for a given seed.
pub fn generate_text_with_seed(seed: u64, size: usize) -> Vec<u8> {
    generate_text(&mut StdRng::seed_from_u64(seed), size)
}

/// Splits `[0, total_size)` into consecutive ranges of at most `part_size` bytes.
///
/// A zero-byte payload still yields one empty part so that a multipart upload
/// of an empty object has something to complete with; every other range is
/// non-empty.
///
/// ```
/// use s3compat_rs::generator::part_ranges;
///
/// let ranges = part_ranges(12, 5).unwrap();
/// let lengths: Vec<u64> = ranges.iter().map(|r| r.length).collect();
/// assert_eq!(lengths, vec![5, 5, 2]);
/// ```
pub fn part_ranges(total_size: u64, part_size: u64) -> Result<Vec<RangeSpec>> {
    if part_size == 0 {
        return Err(anyhow!(HarnessError::InvalidInput(
            "part size must be at least 1 byte".to_string()
        )));
    }
    if total_size == 0 {
        return Ok(vec![RangeSpec::new(0, 0)]);
    }

    let mut ranges = Vec::with_capacity(total_size.div_ceil(part_size) as usize);
    let mut offset = 0;
    while offset < total_size {
        let length = part_size.min(total_size - offset);
        ranges.push(RangeSpec::new(offset, length));
        offset += length;
    }
    Ok(ranges)
}

/// Splits `data` into owned chunks of at most `part_size` bytes.
pub fn split_into_parts(data: &[u8], part_size: u64) -> Result<Vec<Vec<u8>>> {
    Ok(part_ranges(data.len() as u64, part_size)?
        .iter()
        .map(|range| data[range.offset as usize..range.end() as usize].to_vec())
        .collect())
}
