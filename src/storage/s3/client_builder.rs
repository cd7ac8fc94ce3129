use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use aws_config::meta::region::RegionProviderChain;
use aws_config::profile::profile_file::{ProfileFileKind, ProfileFiles};
use aws_config::retry::RetryConfig;
use aws_config::stalled_stream_protection::StalledStreamProtectionConfig;
use aws_config::timeout::TimeoutConfig;
use aws_config::{BehaviorVersion, ConfigLoader, SdkConfig};
use aws_credential_types::Credentials;
use aws_credential_types::provider::ProvideCredentials;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::Region;
use aws_smithy_types::checksum_config::ResponseChecksumValidation;

use crate::config::ClientConfig;
use crate::types::{AccessKeys, S3Credentials};

const CREDENTIALS_PROVIDER_NAME: &str = "s3compat";
const DEFAULT_REGION: &str = "us-east-1";

impl ClientConfig {
    /// Build an `aws_sdk_s3::Client` from this configuration.
    pub async fn create_client(&self) -> Client {
        let sdk_config = self.load_sdk_config().await;

        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(self.force_path_style)
            .request_checksum_calculation(self.request_checksum_calculation)
            .response_checksum_validation(ResponseChecksumValidation::WhenRequired)
            .build();

        Client::from_conf(s3_config)
    }

    /// Resolve the shared SDK configuration: region, endpoint, credentials,
    /// retry, timeouts and stalled stream protection.
    pub async fn load_sdk_config(&self) -> SdkConfig {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        loader = self.apply_profile_files(loader);

        let region_provider = RegionProviderChain::first_try(self.region.clone().map(Region::new))
            .or_default_provider()
            .or_else(Region::from_static(DEFAULT_REGION));
        loader = loader.region(region_provider);

        if let Some(endpoint_url) = &self.endpoint_url {
            loader = loader.endpoint_url(endpoint_url);
        }

        loader = match &self.credential {
            S3Credentials::Profile(profile_name) => loader.profile_name(profile_name),
            S3Credentials::Credentials { access_keys } => {
                loader.credentials_provider(Credentials::new(
                    &access_keys.access_key,
                    &access_keys.secret_access_key,
                    access_keys.session_token.clone(),
                    None,
                    CREDENTIALS_PROVIDER_NAME,
                ))
            }
            S3Credentials::FromEnvironment => loader,
        };

        loader = loader
            .retry_config(self.build_retry_config())
            .timeout_config(self.build_timeout_config());

        if self.disable_stalled_stream_protection {
            loader = loader.stalled_stream_protection(StalledStreamProtectionConfig::disabled());
        }

        loader.load().await
    }

    /// Resolve the access keys used to sign requests the SDK does not send,
    /// such as browser-style POST uploads.
    pub async fn resolve_access_keys(&self) -> Result<AccessKeys> {
        if let S3Credentials::Credentials { access_keys } = &self.credential {
            return Ok(access_keys.clone());
        }

        let sdk_config = self.load_sdk_config().await;
        let provider = sdk_config
            .credentials_provider()
            .ok_or_else(|| anyhow!("no credentials provider is configured"))?;
        let credentials = provider
            .provide_credentials()
            .await
            .context("failed to resolve credentials")?;

        Ok(AccessKeys {
            access_key: credentials.access_key_id().to_string(),
            secret_access_key: credentials.secret_access_key().to_string(),
            session_token: credentials.session_token().map(String::from),
        })
    }

    /// Base URL that browser-style POST uploads are sent to.
    pub fn post_endpoint(&self) -> String {
        match &self.endpoint_url {
            Some(endpoint_url) => endpoint_url.trim_end_matches('/').to_string(),
            None => format!(
                "https://s3.{}.amazonaws.com",
                self.region.as_deref().unwrap_or(DEFAULT_REGION)
            ),
        }
    }

    fn apply_profile_files(&self, loader: ConfigLoader) -> ConfigLoader {
        let location = &self.client_config_location;
        if location.aws_config_file.is_none() && location.aws_shared_credentials_file.is_none() {
            return loader;
        }

        let mut builder = ProfileFiles::builder();
        builder = match &location.aws_config_file {
            Some(path) => builder.with_file(ProfileFileKind::Config, path),
            None => builder.include_default_config_file(true),
        };
        builder = match &location.aws_shared_credentials_file {
            Some(path) => builder.with_file(ProfileFileKind::Credentials, path),
            None => builder.include_default_credentials_file(true),
        };
        loader.profile_files(builder.build())
    }

    fn build_retry_config(&self) -> RetryConfig {
        RetryConfig::standard()
            .with_max_attempts(self.retry_config.aws_max_attempts)
            .with_initial_backoff(Duration::from_millis(
                self.retry_config.initial_backoff_milliseconds,
            ))
    }

    fn build_timeout_config(&self) -> TimeoutConfig {
        let timeouts = &self.cli_timeout_config;
        let mut builder = TimeoutConfig::builder();
        builder
            .set_operation_timeout(timeouts.operation_timeout_milliseconds.map(Duration::from_millis))
            .set_operation_attempt_timeout(
                timeouts
                    .operation_attempt_timeout_milliseconds
                    .map(Duration::from_millis),
            )
            .set_connect_timeout(timeouts.connect_timeout_milliseconds.map(Duration::from_millis))
            .set_read_timeout(timeouts.read_timeout_milliseconds.map(Duration::from_millis));
        builder.build()
    }
}
