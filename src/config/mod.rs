pub mod args;

use aws_smithy_types::checksum_config::RequestChecksumCalculation;

use crate::generator::{DEFAULT_PART_SIZE, MIN_PART_SIZE};
use crate::scenarios::Scenario;
use crate::types::{AccessKeys, ClientConfigLocation, S3Credentials};

pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_BUCKET_PREFIX: &str = "s3compat";
pub const DEFAULT_RANDOM_RANGE_ITERATIONS: usize = 100;
pub const DEFAULT_VERSIONING_POLL_ATTEMPTS: u32 = 5;
pub const DEFAULT_VERSIONING_POLL_INTERVAL_MILLISECONDS: u64 = 1000;
pub const DEFAULT_STRESS_WORKERS: usize = 5;
pub const DEFAULT_POST_CONNECT_TIMEOUT_MILLISECONDS: u64 = 10_000;

/// Main configuration for a conformance run.
///
/// Holds the connection settings for the store under test, the knobs of the
/// individual checks and the selection of scenarios to run.
///
/// # Quick Start
///
/// Use [`Config::for_endpoint`] to point the harness at a local
/// S3-compatible store with static credentials:
///
/// ```
/// use s3compat_rs::Config;
///
/// let config = Config::for_endpoint("http://localhost:9000", "minioadmin", "minioadmin");
/// assert_eq!(config.harness.versioning_poll_attempts, 5);
/// assert!(config.scenarios.is_empty()); // empty selects every scenario
/// ```
///
/// Then customize fields as needed:
///
/// ```
/// use s3compat_rs::Config;
/// use s3compat_rs::scenarios::Scenario;
///
/// let mut config = Config::for_endpoint("http://localhost:9000", "minioadmin", "minioadmin");
/// config.harness.stress_workers = 10;
/// config.scenarios = vec![Scenario::SmallMultipart, Scenario::PostPolicy];
/// ```
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub client_config: Option<ClientConfig>,
    pub tracing_config: Option<TracingConfig>,
    pub harness: HarnessConfig,
    pub scenarios: Vec<Scenario>,
    pub list_scenarios: bool,
}

impl Config {
    /// Create a `Config` for an S3-compatible endpoint reached with static
    /// access keys and path-style addressing.
    pub fn for_endpoint(endpoint_url: &str, access_key: &str, secret_access_key: &str) -> Self {
        Config {
            client_config: Some(ClientConfig {
                credential: S3Credentials::Credentials {
                    access_keys: AccessKeys {
                        access_key: access_key.to_string(),
                        secret_access_key: secret_access_key.to_string(),
                        session_token: None,
                    },
                },
                region: Some(DEFAULT_REGION.to_string()),
                endpoint_url: Some(endpoint_url.to_string()),
                force_path_style: true,
                ..ClientConfig::default()
            }),
            ..Config::default()
        }
    }

    /// Scenarios selected for this run, every scenario when none was chosen.
    pub fn selected_scenarios(&self) -> Vec<Scenario> {
        if self.scenarios.is_empty() {
            Scenario::all().to_vec()
        } else {
            self.scenarios.clone()
        }
    }
}

/// Knobs of the individual checks.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub bucket_prefix: String,
    pub part_size: u64,
    pub random_range_iterations: usize,
    pub versioning_poll_attempts: u32,
    pub versioning_poll_interval_milliseconds: u64,
    pub stress_workers: usize,
    pub post_connect_timeout_milliseconds: u64,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        HarnessConfig {
            bucket_prefix: DEFAULT_BUCKET_PREFIX.to_string(),
            part_size: DEFAULT_PART_SIZE,
            random_range_iterations: DEFAULT_RANDOM_RANGE_ITERATIONS,
            versioning_poll_attempts: DEFAULT_VERSIONING_POLL_ATTEMPTS,
            versioning_poll_interval_milliseconds: DEFAULT_VERSIONING_POLL_INTERVAL_MILLISECONDS,
            stress_workers: DEFAULT_STRESS_WORKERS,
            post_connect_timeout_milliseconds: DEFAULT_POST_CONNECT_TIMEOUT_MILLISECONDS,
        }
    }
}

impl HarnessConfig {
    /// Multi-part completion on a conforming store fails with
    /// `EntityTooSmall` for non-final parts below 5 MiB.
    pub fn part_size_below_minimum(&self) -> bool {
        self.part_size < MIN_PART_SIZE
    }
}

/// AWS S3 client configuration.
///
/// Credential loading, region, endpoint, retry and timeout settings used to
/// build the `aws_sdk_s3::Client` (see `storage::s3::client_builder`).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub client_config_location: ClientConfigLocation,
    pub credential: S3Credentials,
    pub region: Option<String>,
    pub endpoint_url: Option<String>,
    pub force_path_style: bool,
    pub retry_config: RetryConfig,
    pub cli_timeout_config: CLITimeoutConfig,
    pub disable_stalled_stream_protection: bool,
    pub request_checksum_calculation: RequestChecksumCalculation,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            client_config_location: ClientConfigLocation::default(),
            credential: S3Credentials::FromEnvironment,
            region: None,
            endpoint_url: None,
            force_path_style: false,
            retry_config: RetryConfig::default(),
            cli_timeout_config: CLITimeoutConfig::default(),
            disable_stalled_stream_protection: false,
            request_checksum_calculation: RequestChecksumCalculation::WhenRequired,
        }
    }
}

/// Retry configuration for AWS SDK operations.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub aws_max_attempts: u32,
    pub initial_backoff_milliseconds: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            aws_max_attempts: 3,
            initial_backoff_milliseconds: 100,
        }
    }
}

/// Timeout configuration for AWS SDK operations.
#[derive(Debug, Clone, Default)]
pub struct CLITimeoutConfig {
    pub operation_timeout_milliseconds: Option<u64>,
    pub operation_attempt_timeout_milliseconds: Option<u64>,
    pub connect_timeout_milliseconds: Option<u64>,
    pub read_timeout_milliseconds: Option<u64>,
}

/// Tracing (logging) configuration.
#[derive(Debug, Clone, Copy)]
pub struct TracingConfig {
    pub tracing_level: log::Level,
    pub json_tracing: bool,
    pub aws_sdk_tracing: bool,
    pub span_events_tracing: bool,
    pub disable_color_tracing: bool,
}
