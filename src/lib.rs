/*!
# Overview
s3compat-rs is a black-box conformance harness for S3-compatible object stores.
Every check opens a client, issues operations against a live endpoint and
asserts on observed behavior: status codes, error codes, headers and bytes.

## Features
- **Multipart uploads**: size-driven part splitting, upload-part and copy-part,
  idempotent part resend, complete and abort
- **Content integrity**: whole-object, fixed-step and random range reads
  compared byte for byte with a local reference, with SSE-C aware variants
- **Versioning**: version history creation and removal, suspended-versioning
  null versions and a concurrent writer/deleter stress
- **POST policy**: canonical policy JSON, HMAC-SHA1 signatures and
  browser-form uploads
- **Library-First**: the s3compat CLI is a thin wrapper over this crate

## As a Library
All harness components depend only on the [`storage::StorageTrait`]
capability interface, so they run against any implementation of it.

```toml
[dependencies]
s3compat-rs = "0.1"
tokio = { version = "1", features = ["full"] }
```

```no_run
use s3compat_rs::Config;
use s3compat_rs::scenarios::{Scenario, run_scenarios};
use s3compat_rs::storage::create_storage;

#[tokio::main]
async fn main() {
    let mut config = Config::for_endpoint("http://localhost:9000", "minioadmin", "minioadmin");
    config.scenarios = vec![Scenario::SmallMultipart, Scenario::OversizedCopy];

    let client_config = config.client_config.clone().unwrap();
    let storage = create_storage(&client_config).await;

    for report in run_scenarios(&storage, &config).await {
        println!("{}: {:?}", report.name(), report.outcome);
    }
}
```
*/

#![allow(clippy::collapsible_if)]

pub mod config;
pub mod generator;
pub mod multipart;
pub mod post_policy;
pub mod resources;
pub mod scenarios;
pub mod storage;
pub mod types;
pub mod verifier;
pub mod versioning;

#[cfg(test)]
pub(crate) mod test_utils;

pub use config::Config;
pub use config::args::{CLIArgs, build_config_from_args, parse_from_args};
pub use multipart::{MultipartUploadOrchestrator, UploadOptions};
pub use post_policy::{PostObjectClient, PostPolicyDocument, SignedPostPolicy};
pub use resources::ResourceScope;
pub use scenarios::{Scenario, ScenarioOutcome, ScenarioReport, run_scenarios};
pub use types::error::{HarnessError, exit_code_from_error};
pub use verifier::ContentIntegrityVerifier;
pub use versioning::{StressReport, VersionedBucketLifecycleManager};
