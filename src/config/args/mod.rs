use crate::config::{
    CLITimeoutConfig, ClientConfig, Config, DEFAULT_BUCKET_PREFIX,
    DEFAULT_POST_CONNECT_TIMEOUT_MILLISECONDS, DEFAULT_RANDOM_RANGE_ITERATIONS,
    DEFAULT_STRESS_WORKERS, DEFAULT_VERSIONING_POLL_ATTEMPTS,
    DEFAULT_VERSIONING_POLL_INTERVAL_MILLISECONDS, HarnessConfig, RetryConfig, TracingConfig,
};
use crate::scenarios::Scenario;
use crate::types::{AccessKeys, ClientConfigLocation, S3Credentials};
use aws_smithy_types::checksum_config::RequestChecksumCalculation;
use clap::Parser;
use clap::builder::NonEmptyStringValueParser;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use std::ffi::OsString;
use std::path::PathBuf;

mod value_parser;

use value_parser::human_bytes::{check_human_bytes, parse_human_bytes};
use value_parser::url::check_scheme;


// ---------------------------------------------------------------------------
// Default constants
// ---------------------------------------------------------------------------

const DEFAULT_PART_SIZE: &str = "5MiB";
const DEFAULT_AWS_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_INITIAL_BACKOFF_MILLISECONDS: u64 = 100;
const DEFAULT_JSON_TRACING: bool = false;
const DEFAULT_AWS_SDK_TRACING: bool = false;
const DEFAULT_SPAN_EVENTS_TRACING: bool = false;
const DEFAULT_DISABLE_COLOR_TRACING: bool = false;
const DEFAULT_FORCE_PATH_STYLE: bool = false;
const DEFAULT_DISABLE_STALLED_STREAM_PROTECTION: bool = false;
const DEFAULT_LIST_SCENARIOS: bool = false;

const MAX_BUCKET_NAME_LENGTH: usize = 63;
// '-' followed by a hyphenated v4 uuid
const BUCKET_SUFFIX_LENGTH: usize = 37;

// ---------------------------------------------------------------------------
// Error messages
// ---------------------------------------------------------------------------

const ERROR_MESSAGE_PART_SIZE_ZERO: &str = "Part size must be at least 1 byte.";
const ERROR_MESSAGE_RANDOM_RANGE_ITERATIONS_ZERO: &str =
    "Random range iterations must be at least 1.";
const ERROR_MESSAGE_VERSIONING_POLL_ATTEMPTS_ZERO: &str =
    "Versioning poll attempts must be at least 1.";
const ERROR_MESSAGE_STRESS_WORKERS_ZERO: &str = "Stress workers must be at least 1.";
const ERROR_MESSAGE_INVALID_BUCKET_PREFIX: &str = "Bucket prefix must be 1-26 characters of lowercase letters, digits and hyphens, starting with a letter or digit.";
const ERROR_MESSAGE_SECRET_KEY_REQUIRED: &str =
    "--secret-key is required when --access-key is given.";

// ---------------------------------------------------------------------------
// CLIArgs (clap-derived argument struct)
// ---------------------------------------------------------------------------

/// s3compat - Conformance harness for S3-compatible object stores.
///
/// Runs multipart, range-read, versioning and POST-policy checks against a
/// live endpoint. Every check creates its own buckets and removes them
/// afterwards.
///
/// Example:
///   s3compat --endpoint-url http://localhost:9000 --force-path-style
///   s3compat small-multipart random-ranges -vv
///   s3compat --list-scenarios
#[derive(Parser, Clone, Debug)]
#[command(name = "s3compat", version, about, long_about = None)]
pub struct CLIArgs {
    /// Scenarios to run. Every scenario runs when none is given.
    #[arg(value_enum)]
    pub scenarios: Vec<Scenario>,

    // -----------------------------------------------------------------------
    // General options
    // -----------------------------------------------------------------------
    /// List the available scenarios and exit.
    #[arg(long, env, default_value_t = DEFAULT_LIST_SCENARIOS, help_heading = "General")]
    pub list_scenarios: bool,

    /// Prefix of the bucket names created by the checks.
    #[arg(long, env, default_value = DEFAULT_BUCKET_PREFIX, help_heading = "General")]
    pub bucket_prefix: String,

    // -----------------------------------------------------------------------
    // Harness options
    // -----------------------------------------------------------------------
    /// Part size of the multipart checks.
    #[arg(
        long,
        env,
        default_value = DEFAULT_PART_SIZE,
        value_parser = check_human_bytes,
        help_heading = "Harness",
        long_help = r#"Part size of the multipart checks.
Parts below 5MiB are rejected by S3 for every part except the last.
Allow suffixes: KB, KiB, MB, MiB, GB, GiB"#
    )]
    pub part_size: String,

    /// Number of random range reads per object.
    #[arg(long, env, default_value_t = DEFAULT_RANDOM_RANGE_ITERATIONS, help_heading = "Harness")]
    pub random_range_iterations: usize,

    /// Read-backs of the bucket versioning status before giving up.
    #[arg(long, env, default_value_t = DEFAULT_VERSIONING_POLL_ATTEMPTS, help_heading = "Harness")]
    pub versioning_poll_attempts: u32,

    /// Interval in ms between versioning status read-backs.
    #[arg(long, env, default_value_t = DEFAULT_VERSIONING_POLL_INTERVAL_MILLISECONDS, help_heading = "Harness")]
    pub versioning_poll_interval_milliseconds: u64,

    /// Number of concurrent writers (and deleters) in the versioning stress check.
    #[arg(long, env, default_value_t = DEFAULT_STRESS_WORKERS, help_heading = "Harness")]
    pub stress_workers: usize,

    /// Connect timeout in ms of the browser-style POST upload.
    #[arg(long, env, default_value_t = DEFAULT_POST_CONNECT_TIMEOUT_MILLISECONDS, help_heading = "Harness")]
    pub post_connect_timeout_milliseconds: u64,

    // -----------------------------------------------------------------------
    // Logging options
    // -----------------------------------------------------------------------
    /// Verbosity level. -q (quiet), default (normal), -v, -vv, -vvv.
    #[command(flatten)]
    pub verbosity: Verbosity<InfoLevel>,

    /// Output logs in JSON format.
    #[arg(long, env, default_value_t = DEFAULT_JSON_TRACING, help_heading = "Logging")]
    pub json_tracing: bool,

    /// Enable AWS SDK tracing.
    #[arg(long, env, default_value_t = DEFAULT_AWS_SDK_TRACING, help_heading = "Logging")]
    pub aws_sdk_tracing: bool,

    /// Enable tracing span events.
    #[arg(long, env, default_value_t = DEFAULT_SPAN_EVENTS_TRACING, help_heading = "Logging")]
    pub span_events_tracing: bool,

    /// Disable colored output in logs.
    #[arg(long, env, default_value_t = DEFAULT_DISABLE_COLOR_TRACING, help_heading = "Logging")]
    pub disable_color_tracing: bool,

    // -----------------------------------------------------------------------
    // Retry options
    // -----------------------------------------------------------------------
    /// Maximum attempts for AWS SDK operations. Default: 3.
    #[arg(long, env, default_value_t = DEFAULT_AWS_MAX_ATTEMPTS, help_heading = "Retry")]
    pub aws_max_attempts: u32,

    /// Initial backoff in milliseconds for retries. Default: 100.
    #[arg(long, env, default_value_t = DEFAULT_INITIAL_BACKOFF_MILLISECONDS, help_heading = "Retry")]
    pub initial_backoff_milliseconds: u64,

    // -----------------------------------------------------------------------
    // Timeout options
    // -----------------------------------------------------------------------
    /// Overall operation timeout in milliseconds.
    #[arg(long, env, help_heading = "Timeout")]
    pub operation_timeout_milliseconds: Option<u64>,

    /// Per-attempt operation timeout in milliseconds.
    #[arg(long, env, help_heading = "Timeout")]
    pub operation_attempt_timeout_milliseconds: Option<u64>,

    /// Connection timeout in milliseconds.
    #[arg(long, env, help_heading = "Timeout")]
    pub connect_timeout_milliseconds: Option<u64>,

    /// Read timeout in milliseconds.
    #[arg(long, env, help_heading = "Timeout")]
    pub read_timeout_milliseconds: Option<u64>,

    // -----------------------------------------------------------------------
    // AWS configuration
    // -----------------------------------------------------------------------
    /// AWS config file path.
    #[arg(long, env, help_heading = "AWS")]
    pub aws_config_file: Option<PathBuf>,

    /// AWS shared credentials file path.
    #[arg(long, env, help_heading = "AWS")]
    pub aws_shared_credentials_file: Option<PathBuf>,

    /// AWS profile. If not set, the default credential chain is used.
    #[arg(long, env, conflicts_with_all = ["access_key", "secret_key", "session_token"], value_parser = NonEmptyStringValueParser::new(), help_heading = "AWS")]
    pub profile: Option<String>,

    /// AWS access key ID.
    #[arg(long, env, value_parser = NonEmptyStringValueParser::new(), help_heading = "AWS")]
    pub access_key: Option<String>,

    /// AWS secret access key.
    #[arg(long, env, value_parser = NonEmptyStringValueParser::new(), help_heading = "AWS")]
    pub secret_key: Option<String>,

    /// AWS session token.
    #[arg(long, env, value_parser = NonEmptyStringValueParser::new(), help_heading = "AWS")]
    pub session_token: Option<String>,

    /// AWS region.
    #[arg(long, env, value_parser = NonEmptyStringValueParser::new(), help_heading = "AWS")]
    pub region: Option<String>,

    /// Endpoint URL of the store under test (e.g. MinIO, Ceph RGW).
    #[arg(long, env, value_parser = check_scheme, help_heading = "AWS")]
    pub endpoint_url: Option<String>,

    /// Force path-style access (required by most S3-compatible stores).
    #[arg(long, env, default_value_t = DEFAULT_FORCE_PATH_STYLE, help_heading = "AWS")]
    pub force_path_style: bool,

    /// Disable stalled stream protection.
    #[arg(long, env, default_value_t = DEFAULT_DISABLE_STALLED_STREAM_PROTECTION, help_heading = "AWS")]
    pub disable_stalled_stream_protection: bool,
}

// ---------------------------------------------------------------------------
// parse_from_args (public API)
// ---------------------------------------------------------------------------

/// Parse command-line arguments into a `CLIArgs` struct.
///
/// # Example
///
/// ```
/// use s3compat_rs::config::args::parse_from_args;
///
/// let args = vec!["s3compat", "small-multipart", "--force-path-style"];
/// let cli_args = parse_from_args(args).unwrap();
/// assert!(cli_args.force_path_style);
/// assert_eq!(cli_args.scenarios.len(), 1);
/// ```
pub fn parse_from_args<I, T>(args: I) -> Result<CLIArgs, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    CLIArgs::try_parse_from(args)
}

/// Parse arguments and build a Config in one step.
pub fn build_config_from_args<I, T>(args: I) -> Result<Config, String>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli_args = CLIArgs::try_parse_from(args).map_err(|e| e.to_string())?;
    Config::try_from(cli_args)
}

// ---------------------------------------------------------------------------
// Validation and Config conversion
// ---------------------------------------------------------------------------

impl CLIArgs {
    fn validate(&self) -> Result<(), String> {
        if self.random_range_iterations == 0 {
            return Err(ERROR_MESSAGE_RANDOM_RANGE_ITERATIONS_ZERO.to_string());
        }
        if self.versioning_poll_attempts == 0 {
            return Err(ERROR_MESSAGE_VERSIONING_POLL_ATTEMPTS_ZERO.to_string());
        }
        if self.stress_workers == 0 {
            return Err(ERROR_MESSAGE_STRESS_WORKERS_ZERO.to_string());
        }
        if !is_valid_bucket_prefix(&self.bucket_prefix) {
            return Err(ERROR_MESSAGE_INVALID_BUCKET_PREFIX.to_string());
        }
        if self.access_key.is_some() && self.secret_key.is_none() {
            return Err(ERROR_MESSAGE_SECRET_KEY_REQUIRED.to_string());
        }
        Ok(())
    }

    fn build_harness_config(&self) -> Result<HarnessConfig, String> {
        let part_size = parse_human_bytes(&self.part_size)?;
        if part_size == 0 {
            return Err(ERROR_MESSAGE_PART_SIZE_ZERO.to_string());
        }

        Ok(HarnessConfig {
            bucket_prefix: self.bucket_prefix.clone(),
            part_size,
            random_range_iterations: self.random_range_iterations,
            versioning_poll_attempts: self.versioning_poll_attempts,
            versioning_poll_interval_milliseconds: self.versioning_poll_interval_milliseconds,
            stress_workers: self.stress_workers,
            post_connect_timeout_milliseconds: self.post_connect_timeout_milliseconds,
        })
    }

    fn build_client_config(&self) -> ClientConfig {
        let credential = if let Some(ref profile) = self.profile {
            S3Credentials::Profile(profile.clone())
        } else if let Some(ref access_key) = self.access_key {
            S3Credentials::Credentials {
                access_keys: AccessKeys {
                    access_key: access_key.clone(),
                    secret_access_key: self.secret_key.clone().unwrap_or_default(),
                    session_token: self.session_token.clone(),
                },
            }
        } else {
            S3Credentials::FromEnvironment
        };

        ClientConfig {
            client_config_location: ClientConfigLocation {
                aws_config_file: self.aws_config_file.clone(),
                aws_shared_credentials_file: self.aws_shared_credentials_file.clone(),
            },
            credential,
            region: self.region.clone(),
            endpoint_url: self.endpoint_url.clone(),
            force_path_style: self.force_path_style,
            retry_config: RetryConfig {
                aws_max_attempts: self.aws_max_attempts,
                initial_backoff_milliseconds: self.initial_backoff_milliseconds,
            },
            cli_timeout_config: CLITimeoutConfig {
                operation_timeout_milliseconds: self.operation_timeout_milliseconds,
                operation_attempt_timeout_milliseconds: self.operation_attempt_timeout_milliseconds,
                connect_timeout_milliseconds: self.connect_timeout_milliseconds,
                read_timeout_milliseconds: self.read_timeout_milliseconds,
            },
            disable_stalled_stream_protection: self.disable_stalled_stream_protection,
            request_checksum_calculation: RequestChecksumCalculation::WhenRequired,
        }
    }

    fn build_tracing_config(&self) -> Option<TracingConfig> {
        let log_level = self.verbosity.log_level()?;
        Some(TracingConfig {
            tracing_level: log_level,
            json_tracing: self.json_tracing,
            aws_sdk_tracing: self.aws_sdk_tracing,
            span_events_tracing: self.span_events_tracing,
            disable_color_tracing: self.disable_color_tracing,
        })
    }
}

impl TryFrom<CLIArgs> for Config {
    type Error = String;

    fn try_from(args: CLIArgs) -> Result<Self, Self::Error> {
        args.validate()?;

        let harness = args.build_harness_config()?;
        let client_config = args.build_client_config();
        let tracing_config = args.build_tracing_config();

        let mut scenarios = Vec::with_capacity(args.scenarios.len());
        for scenario in args.scenarios {
            if !scenarios.contains(&scenario) {
                scenarios.push(scenario);
            }
        }

        Ok(Config {
            client_config: Some(client_config),
            tracing_config,
            harness,
            scenarios,
            list_scenarios: args.list_scenarios,
        })
    }
}

fn is_valid_bucket_prefix(prefix: &str) -> bool {
    let max_length = MAX_BUCKET_NAME_LENGTH - BUCKET_SUFFIX_LENGTH;
    !prefix.is_empty()
        && prefix.len() <= max_length
        && prefix
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && prefix
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
}
