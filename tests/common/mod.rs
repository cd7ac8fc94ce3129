//! Shared E2E test infrastructure for s3compat-rs.
//!
//! Every test talks to a live S3-compatible endpoint. The endpoint and the
//! credentials are read from the environment:
//!
//! - `S3COMPAT_E2E_ENDPOINT` (default `http://localhost:9000`)
//! - `S3COMPAT_E2E_ACCESS_KEY` (default `minioadmin`)
//! - `S3COMPAT_E2E_SECRET_KEY` (default `minioadmin`)
//! - `S3COMPAT_E2E_REGION` (default `us-east-1`)

#![allow(dead_code)]

use std::env;
use std::time::Duration;

use s3compat_rs::Config;
use s3compat_rs::scenarios::{PostPolicyTarget, Scenario, ScenarioReport, run_scenario};
use s3compat_rs::storage::{Storage, StorageTrait, create_storage};

const ENDPOINT_ENV_VAR: &str = "S3COMPAT_E2E_ENDPOINT";
const ACCESS_KEY_ENV_VAR: &str = "S3COMPAT_E2E_ACCESS_KEY";
const SECRET_KEY_ENV_VAR: &str = "S3COMPAT_E2E_SECRET_KEY";
const REGION_ENV_VAR: &str = "S3COMPAT_E2E_REGION";

const DEFAULT_ENDPOINT: &str = "http://localhost:9000";
const DEFAULT_ACCESS_KEY: &str = "minioadmin";
const DEFAULT_SECRET_KEY: &str = "minioadmin";

/// Bucket prefix of every bucket created by the E2E tests.
pub const E2E_BUCKET_PREFIX: &str = "s3compat-e2e";

/// Shared test helper for E2E tests.
pub struct TestHelper {
    config: Config,
    storage: Storage,
}

impl TestHelper {
    pub async fn new() -> Self {
        let mut config = Config::for_endpoint(
            &env_or(ENDPOINT_ENV_VAR, DEFAULT_ENDPOINT),
            &env_or(ACCESS_KEY_ENV_VAR, DEFAULT_ACCESS_KEY),
            &env_or(SECRET_KEY_ENV_VAR, DEFAULT_SECRET_KEY),
        );
        if let Ok(region) = env::var(REGION_ENV_VAR) {
            if let Some(client_config) = config.client_config.as_mut() {
                client_config.region = Some(region);
            }
        }
        config.harness.bucket_prefix = E2E_BUCKET_PREFIX.to_string();
        config.harness.versioning_poll_interval_milliseconds = 200;

        let storage = create_storage(config.client_config.as_ref().unwrap()).await;
        TestHelper { config, storage }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn storage(&self) -> Storage {
        self.storage.clone()
    }

    pub fn access_key(&self) -> String {
        env_or(ACCESS_KEY_ENV_VAR, DEFAULT_ACCESS_KEY)
    }

    pub fn secret_key(&self) -> String {
        env_or(SECRET_KEY_ENV_VAR, DEFAULT_SECRET_KEY)
    }

    pub fn endpoint(&self) -> String {
        env_or(ENDPOINT_ENV_VAR, DEFAULT_ENDPOINT)
    }

    /// Run one built-in scenario exactly as the CLI would.
    pub async fn run_scenario(&self, scenario: Scenario) -> ScenarioReport {
        let post_target = match &self.config.client_config {
            Some(client_config) if scenario == Scenario::PostPolicy => {
                PostPolicyTarget::resolve(client_config).await
            }
            _ => None,
        };
        run_scenario(&self.storage, &self.config, scenario, post_target.as_ref()).await
    }

    /// Whether `bucket` can still be listed.
    pub async fn bucket_exists(&self, bucket: &str) -> bool {
        self.storage.list_objects(bucket, "").await.is_ok()
    }
}

fn env_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

/// Default timeout for E2E tests (5 minutes).
pub const E2E_TIMEOUT: Duration = Duration::from_secs(300);

/// Wraps an async E2E test body with a timeout.
///
/// Usage:
/// ```ignore
/// #[tokio::test]
/// async fn e2e_my_test() {
///     e2e_timeout!(async {
///         // test body here
///     });
/// }
/// ```
#[macro_export]
macro_rules! e2e_timeout {
    ($body:expr) => {
        tokio::time::timeout(common::E2E_TIMEOUT, $body)
            .await
            .expect("E2E test timed out")
    };
}
