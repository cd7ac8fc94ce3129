use anyhow::Error;
use thiserror::Error;

use crate::types::RangeSpec;

/// Error types raised by the harness.
///
/// Three families are kept apart so a report never confuses them:
/// - local precondition failures (`InvalidInput`), raised before any request,
/// - store-reported failures (`Store`), carrying the HTTP status and S3 error code,
/// - harness assertion failures (every other variant), raised when the store
///   answered successfully but the answer is wrong.
///
/// ## Exit Codes
///
/// Each variant maps to an exit code (via `exit_code()`):
/// - 1: Store errors and assertion failures
/// - 2: Invalid input / configuration
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HarnessError {
    /// Local precondition violated; nothing was sent to the store.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The store rejected the request, or the request never reached it.
    #[error("{operation} failed: {code} ({message}), status: {}", .status.map_or("N/A".to_string(), |s| s.to_string()))]
    Store {
        operation: String,
        status: Option<u16>,
        code: String,
        message: String,
    },

    /// Returned bytes differ from the reference.
    #[error("Content mismatch for s3://{bucket}/{key} in range {range}: first difference at offset {first_difference}")]
    ContentMismatch {
        bucket: String,
        key: String,
        range: RangeSpec,
        first_difference: u64,
    },

    /// Declared or returned length disagrees with the requested window.
    #[error("Length mismatch for s3://{bucket}/{key} in range {range}: expected {expected} bytes, got {actual}")]
    LengthMismatch {
        bucket: String,
        key: String,
        range: RangeSpec,
        expected: u64,
        actual: u64,
    },

    /// Re-uploading an identical part produced a different ETag.
    #[error("Part {part_number} resend returned ETag {second}, first upload returned {first}")]
    ResendETagMismatch {
        part_number: i32,
        first: String,
        second: String,
    },

    /// A version listing or versioned read disagrees with the local record.
    #[error("Version mismatch for s3://{bucket}/{key}: {detail}")]
    VersionMismatch {
        bucket: String,
        key: String,
        detail: String,
    },

    /// The bucket versioning read-back never matched the requested status.
    #[error("Versioning of {bucket} is still {actual} after {attempts} attempts (requested {requested})")]
    VersioningNotApplied {
        bucket: String,
        requested: String,
        actual: String,
        attempts: u32,
    },

    /// Versions remained after the final clear of a concurrency stress round.
    #[error("{remaining} versions of s3://{bucket}/{key} remain after clearing")]
    StressConvergence {
        bucket: String,
        key: String,
        remaining: usize,
    },
}

impl HarnessError {
    /// Get the appropriate process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            HarnessError::InvalidInput(_) => 2,
            _ => 1,
        }
    }

    /// True for failures detected by the harness itself rather than reported by the store.
    pub fn is_integrity_failure(&self) -> bool {
        !matches!(
            self,
            HarnessError::InvalidInput(_) | HarnessError::Store { .. }
        )
    }
}

/// Returns the S3 error code if `e` wraps a store error.
pub fn store_error_code(e: &Error) -> Option<&str> {
    match e.downcast_ref::<HarnessError>() {
        Some(HarnessError::Store { code, .. }) => Some(code.as_str()),
        _ => None,
    }
}

/// Returns the HTTP status if `e` wraps a store error that reached the store.
pub fn store_error_status(e: &Error) -> Option<u16> {
    match e.downcast_ref::<HarnessError>() {
        Some(HarnessError::Store { status, .. }) => *status,
        _ => None,
    }
}

/// Check if an anyhow::Error wraps a store error.
pub fn is_store_error(e: &Error) -> bool {
    matches!(
        e.downcast_ref::<HarnessError>(),
        Some(HarnessError::Store { .. })
    )
}

/// Check if an anyhow::Error wraps an integrity or assertion failure.
pub fn is_integrity_error(e: &Error) -> bool {
    e.downcast_ref::<HarnessError>()
        .is_some_and(HarnessError::is_integrity_failure)
}

/// Check if an anyhow::Error is the store refusing a read for a missing or wrong SSE-C key.
pub fn is_customer_key_error(e: &Error) -> bool {
    matches!(store_error_status(e), Some(400) | Some(403))
}

/// Check if an anyhow::Error wraps a local precondition failure.
pub fn is_invalid_input_error(e: &Error) -> bool {
    matches!(
        e.downcast_ref::<HarnessError>(),
        Some(HarnessError::InvalidInput(_))
    )
}

/// Extract the exit code from an anyhow::Error, defaulting to 1.
pub fn exit_code_from_error(e: &Error) -> i32 {
    if let Some(err) = e.downcast_ref::<HarnessError>() {
        return err.exit_code();
    }
    1
}
