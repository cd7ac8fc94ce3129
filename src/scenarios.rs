//! Named conformance checks built on the harness components.
//!
//! Each [`Scenario`] runs in its own [`ResourceScope`], so the buckets it
//! creates are removed whatever the outcome. [`run_scenarios`] executes the
//! selected scenarios one after another and reports each of them.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow, bail, ensure};
use chrono::TimeDelta;
use clap::ValueEnum;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use tracing::{error, info, warn};

use crate::config::{ClientConfig, Config};
use crate::generator::generate_text;
use crate::multipart::{MultipartUploadOrchestrator, UploadOptions};
use crate::post_policy::{PolicyCondition, PostObjectClient, PostObjectForm, PostPolicyDocument};
use crate::resources::ResourceScope;
use crate::storage::Storage;
use crate::types::error::{exit_code_from_error, is_customer_key_error, store_error_code};
use crate::types::{AccessKeys, CopySource, NULL_VERSION_ID, SseCustomerKey, VersioningState};
use crate::verifier::ContentIntegrityVerifier;

const MIB: u64 = 1024 * 1024;
const OVERSIZED_SOURCE_SIZE: u64 = 12 * MIB;
const VERIFICATION_WINDOW: u64 = MIB;
const RANDOM_RANGE_OBJECT_SIZE: u64 = MIB;
const VERSION_COUNT: usize = 5;

/// A conformance check selectable on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum Scenario {
    SmallMultipart,
    MultipartResend,
    MultipartAbort,
    OversizedCopy,
    RandomRanges,
    EncryptedRanges,
    VersionHistory,
    SuspendedVersioning,
    SuspendedNullDelete,
    ConcurrentVersions,
    PostPolicy,
}

impl Scenario {
    pub fn all() -> &'static [Scenario] {
        &[
            Scenario::SmallMultipart,
            Scenario::MultipartResend,
            Scenario::MultipartAbort,
            Scenario::OversizedCopy,
            Scenario::RandomRanges,
            Scenario::EncryptedRanges,
            Scenario::VersionHistory,
            Scenario::SuspendedVersioning,
            Scenario::SuspendedNullDelete,
            Scenario::ConcurrentVersions,
            Scenario::PostPolicy,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            Scenario::SmallMultipart => "small-multipart",
            Scenario::MultipartResend => "multipart-resend",
            Scenario::MultipartAbort => "multipart-abort",
            Scenario::OversizedCopy => "oversized-copy",
            Scenario::RandomRanges => "random-ranges",
            Scenario::EncryptedRanges => "encrypted-ranges",
            Scenario::VersionHistory => "version-history",
            Scenario::SuspendedVersioning => "suspended-versioning",
            Scenario::SuspendedNullDelete => "suspended-null-delete",
            Scenario::ConcurrentVersions => "concurrent-versions",
            Scenario::PostPolicy => "post-policy",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Scenario::SmallMultipart => "1-byte multipart upload completes as a single part",
            Scenario::MultipartResend => "re-uploaded parts keep their ETag and the object bytes",
            Scenario::MultipartAbort => {
                "aborted uploads never replace the key; empty part lists are rejected"
            }
            Scenario::OversizedCopy => "12 MiB source copied by copy-part, verified in 1 MiB windows",
            Scenario::RandomRanges => "random byte ranges return the exact slice",
            Scenario::EncryptedRanges => "SSE-C multipart object verified by ranges with its key",
            Scenario::VersionHistory => "versions listed in order and removed one at a time",
            Scenario::SuspendedVersioning => "suspended versioning keeps a single null version",
            Scenario::SuspendedNullDelete => "deleting the null version after enabling versioning",
            Scenario::ConcurrentVersions => "concurrent writers and deleters converge to zero versions",
            Scenario::PostPolicy => "browser-form upload with a signed POST policy",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScenarioOutcome {
    Passed,
    Skipped { reason: String },
    Failed { error: String, exit_code: i32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioReport {
    pub scenario: Scenario,
    pub outcome: ScenarioOutcome,
    pub duration: Duration,
}

impl ScenarioReport {
    pub fn name(&self) -> &'static str {
        self.scenario.name()
    }

    /// Skipped scenarios count as passed.
    pub fn passed(&self) -> bool {
        !matches!(self.outcome, ScenarioOutcome::Failed { .. })
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            ScenarioOutcome::Failed { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// Credentials and endpoint needed to send browser-form uploads.
#[derive(Debug, Clone)]
pub struct PostPolicyTarget {
    pub endpoint: String,
    pub force_path_style: bool,
    pub access_keys: AccessKeys,
}

impl PostPolicyTarget {
    /// Resolve the target from the client configuration; `None` when no
    /// access keys are available.
    pub async fn resolve(client_config: &ClientConfig) -> Option<Self> {
        match client_config.resolve_access_keys().await {
            Ok(access_keys) => Some(PostPolicyTarget {
                endpoint: client_config.post_endpoint(),
                force_path_style: client_config.force_path_style,
                access_keys,
            }),
            Err(e) => {
                warn!(error = %e, "access keys are not available.");
                None
            }
        }
    }
}

/// Run the selected scenarios sequentially and report each of them.
pub async fn run_scenarios(storage: &Storage, config: &Config) -> Vec<ScenarioReport> {
    let selected = config.selected_scenarios();
    let post_target = match &config.client_config {
        Some(client_config) if selected.contains(&Scenario::PostPolicy) => {
            PostPolicyTarget::resolve(client_config).await
        }
        _ => None,
    };

    let mut reports = Vec::with_capacity(selected.len());
    for scenario in selected {
        let report = run_scenario(storage, config, scenario, post_target.as_ref()).await;
        reports.push(report);
    }
    reports
}

/// Run one scenario in its own resource scope.
pub async fn run_scenario(
    storage: &Storage,
    config: &Config,
    scenario: Scenario,
    post_target: Option<&PostPolicyTarget>,
) -> ScenarioReport {
    info!(scenario = scenario.name(), "scenario started.");
    let start = Instant::now();

    let harness = &config.harness;
    let storage = storage.clone();
    let result = match scenario {
        Scenario::SmallMultipart => ResourceScope::run(storage, harness, small_multipart).await,
        Scenario::MultipartResend => ResourceScope::run(storage, harness, multipart_resend).await,
        Scenario::MultipartAbort => ResourceScope::run(storage, harness, multipart_abort).await,
        Scenario::OversizedCopy => ResourceScope::run(storage, harness, oversized_copy).await,
        Scenario::RandomRanges => ResourceScope::run(storage, harness, random_ranges).await,
        Scenario::EncryptedRanges => ResourceScope::run(storage, harness, encrypted_ranges).await,
        Scenario::VersionHistory => ResourceScope::run(storage, harness, version_history).await,
        Scenario::SuspendedVersioning => {
            ResourceScope::run(storage, harness, suspended_versioning).await
        }
        Scenario::SuspendedNullDelete => {
            ResourceScope::run(storage, harness, suspended_null_delete).await
        }
        Scenario::ConcurrentVersions => {
            ResourceScope::run(storage, harness, concurrent_versions).await
        }
        Scenario::PostPolicy => match post_target {
            Some(target) => {
                let target = target.clone();
                ResourceScope::run(storage, harness, move |scope| post_policy(scope, target)).await
            }
            None => {
                let reason = "access keys and an endpoint are required".to_string();
                info!(scenario = scenario.name(), reason = reason.as_str(), "scenario skipped.");
                return ScenarioReport {
                    scenario,
                    outcome: ScenarioOutcome::Skipped { reason },
                    duration: start.elapsed(),
                };
            }
        },
    };

    let duration = start.elapsed();
    let outcome = match result {
        Ok(()) => {
            info!(
                scenario = scenario.name(),
                duration_milliseconds = duration.as_millis() as u64,
                "scenario passed."
            );
            ScenarioOutcome::Passed
        }
        Err(e) => {
            let error = format!("{e:#}");
            error!(scenario = scenario.name(), error = error.as_str(), "scenario failed.");
            ScenarioOutcome::Failed {
                error,
                exit_code: exit_code_from_error(&e),
            }
        }
    };

    ScenarioReport {
        scenario,
        outcome,
        duration,
    }
}

async fn small_multipart(scope: ResourceScope) -> Result<()> {
    let bucket = scope.create_bucket().await?;
    let orchestrator = MultipartUploadOrchestrator::new(scope.storage().clone());
    let verifier = ContentIntegrityVerifier::new(scope.storage().clone());
    let key = "mymultipart";

    let mut session = orchestrator
        .begin_upload(&bucket, key, &HashMap::new())
        .await?;
    orchestrator
        .upload_from_payload(
            &mut session,
            1,
            scope.config().part_size,
            &UploadOptions::default(),
        )
        .await?;
    ensure!(
        session.parts.len() == 1,
        "1-byte upload produced {} parts",
        session.parts.len()
    );

    let expected = session.accumulated_plaintext.clone();
    orchestrator.complete(session).await?;
    verifier.verify_whole(&bucket, key, &expected).await
}

async fn multipart_resend(scope: ResourceScope) -> Result<()> {
    let bucket = scope.create_bucket().await?;
    let orchestrator = MultipartUploadOrchestrator::new(scope.storage().clone());
    let verifier = ContentIntegrityVerifier::new(scope.storage().clone());
    let part_size = scope.config().part_size;
    let key = "mymultipart";

    let mut session = orchestrator
        .begin_upload(&bucket, key, &HashMap::new())
        .await?;
    orchestrator
        .upload_from_payload(
            &mut session,
            part_size * 2 + part_size / 2,
            part_size,
            &UploadOptions::with_resend_parts([1, 3]),
        )
        .await?;

    let listed = orchestrator.list_parts(&session).await?;
    let recorded: Vec<(i32, &str)> = session
        .parts
        .iter()
        .map(|part| (part.part_number, part.e_tag.as_str()))
        .collect();
    let reported: Vec<(i32, &str)> = listed
        .iter()
        .map(|part| (part.part_number, part.e_tag.as_str()))
        .collect();
    ensure!(
        recorded == reported,
        "list-parts reported {reported:?}, uploads returned {recorded:?}"
    );

    let expected = session.accumulated_plaintext.clone();
    orchestrator.complete(session).await?;
    verifier
        .verify_sequential_ranges(&bucket, key, &expected, part_size)
        .await?;
    Ok(())
}

async fn multipart_abort(scope: ResourceScope) -> Result<()> {
    let bucket = scope.create_bucket().await?;
    let storage = scope.storage().clone();
    let orchestrator = MultipartUploadOrchestrator::new(storage.clone());
    let verifier = ContentIntegrityVerifier::new(storage.clone());
    let key = "atomic";

    let original = b"original content".to_vec();
    storage
        .put_object(&bucket, key, original.clone(), None)
        .await?;

    let mut session = orchestrator
        .begin_upload(&bucket, key, &HashMap::new())
        .await?;
    orchestrator
        .upload_from_payload(
            &mut session,
            scope.config().part_size,
            scope.config().part_size,
            &UploadOptions::default(),
        )
        .await?;
    verifier.verify_whole(&bucket, key, &original).await?;

    orchestrator.abort(session).await?;
    let pending = orchestrator.list_uploads(&bucket).await?;
    ensure!(
        pending.is_empty(),
        "{} uploads still pending after abort",
        pending.len()
    );
    verifier.verify_whole(&bucket, key, &original).await?;

    let mut session = orchestrator
        .begin_upload(&bucket, "empty-complete", &HashMap::new())
        .await?;
    orchestrator
        .upload_part(&mut session, b"part".to_vec())
        .await?;
    match orchestrator.complete_with_parts(session, &[]).await {
        Ok(_) => bail!("completing with an empty part list succeeded"),
        Err(e) => match store_error_code(&e) {
            Some("MalformedXML") | Some("InvalidRequest") => Ok(()),
            _ => Err(e.context("unexpected error for an empty part list")),
        },
    }
}

async fn oversized_copy(scope: ResourceScope) -> Result<()> {
    let bucket = scope.create_bucket().await?;
    let storage = scope.storage().clone();
    let orchestrator = MultipartUploadOrchestrator::new(storage.clone());
    let verifier = ContentIntegrityVerifier::new(storage.clone());

    let source_body = generate_text(&mut StdRng::from_entropy(), OVERSIZED_SOURCE_SIZE as usize);
    storage
        .put_object(&bucket, "source", source_body.clone(), None)
        .await?;

    let mut session = orchestrator
        .begin_upload(&bucket, "copy", &HashMap::new())
        .await?;
    orchestrator
        .copy_from_source(
            &mut session,
            &CopySource::new(&bucket, "source"),
            OVERSIZED_SOURCE_SIZE,
            scope.config().part_size,
        )
        .await?;
    orchestrator.complete(session).await?;

    verifier
        .verify_sequential_ranges(&bucket, "copy", &source_body, VERIFICATION_WINDOW)
        .await?;
    verifier
        .verify_same_content(&bucket, "source", &bucket, "copy")
        .await?;
    Ok(())
}

async fn random_ranges(scope: ResourceScope) -> Result<()> {
    let bucket = scope.create_bucket().await?;
    let storage = scope.storage().clone();
    let verifier = ContentIntegrityVerifier::new(storage.clone());
    let key = "random-ranges";

    let mut rng = StdRng::from_entropy();
    let body = generate_text(&mut rng, RANDOM_RANGE_OBJECT_SIZE as usize);
    storage.put_object(&bucket, key, body.clone(), None).await?;

    verifier
        .verify_random_ranges(
            &bucket,
            key,
            &body,
            RANDOM_RANGE_OBJECT_SIZE,
            scope.config().random_range_iterations,
            &mut rng,
        )
        .await?;
    Ok(())
}

async fn encrypted_ranges(scope: ResourceScope) -> Result<()> {
    let bucket = scope.create_bucket().await?;
    let storage = scope.storage().clone();
    let orchestrator = MultipartUploadOrchestrator::new(storage.clone());
    let part_size = scope.config().part_size;
    let key = "encrypted";

    let mut rng = StdRng::from_entropy();
    let customer_key = random_customer_key(&mut rng);
    let mut session = orchestrator
        .begin_encrypted_upload(&bucket, key, &HashMap::new(), customer_key.clone())
        .await?;
    orchestrator
        .upload_from_payload(
            &mut session,
            part_size + part_size / 2,
            part_size,
            &UploadOptions::default(),
        )
        .await?;
    let expected = session.accumulated_plaintext.clone();
    orchestrator.complete(session).await?;

    let verifier = ContentIntegrityVerifier::with_customer_key(storage.clone(), customer_key);
    verifier
        .verify_sequential_ranges(&bucket, key, &expected, VERIFICATION_WINDOW)
        .await?;
    verifier
        .verify_random_ranges(
            &bucket,
            key,
            &expected,
            expected.len() as u64,
            scope.config().random_range_iterations,
            &mut rng,
        )
        .await?;

    let other_key = random_customer_key(&mut rng);
    for (label, reader) in [
        ("without a key", ContentIntegrityVerifier::new(storage.clone())),
        (
            "with the wrong key",
            ContentIntegrityVerifier::with_customer_key(storage.clone(), other_key),
        ),
    ] {
        match reader.verify_whole(&bucket, key, &expected).await {
            Ok(()) => bail!("encrypted object was readable {label}"),
            Err(e) if is_customer_key_error(&e) => {}
            Err(e) => return Err(e.context(format!("unexpected error reading {label}"))),
        }
    }
    Ok(())
}

fn random_customer_key(rng: &mut StdRng) -> SseCustomerKey {
    let mut key = [0u8; 32];
    rng.fill_bytes(&mut key);
    SseCustomerKey::from_bytes(&key)
}

async fn version_history(scope: ResourceScope) -> Result<()> {
    let bucket = scope.create_versioned_bucket().await?;
    let manager = scope.versioning_manager();
    let key = "testobj";

    let mut versions = manager.create_versions(&bucket, key, VERSION_COUNT).await?;
    manager
        .remove_version(&bucket, key, &mut versions, VERSION_COUNT / 2)
        .await?;
    while !versions.is_empty() {
        manager.remove_version(&bucket, key, &mut versions, 0).await?;
    }

    let remaining = manager.list_versions(&bucket, key).await?;
    ensure!(
        remaining.is_empty(),
        "{} versions remain after removing every recorded version",
        remaining.len()
    );
    Ok(())
}

async fn suspended_versioning(scope: ResourceScope) -> Result<()> {
    let bucket = scope.create_versioned_bucket().await?;
    let manager = scope.versioning_manager();
    let key = "testobj";

    let mut versions = manager.create_versions(&bucket, key, 3).await?;
    manager
        .set_versioning(&bucket, VersioningState::Suspended)
        .await?;

    manager
        .overwrite_while_suspended(&bucket, key, &mut versions, b"null content 1".to_vec())
        .await?;
    manager
        .overwrite_while_suspended(&bucket, key, &mut versions, b"null content 2".to_vec())
        .await?;
    manager
        .delete_while_suspended(&bucket, key, &mut versions)
        .await?;
    manager
        .overwrite_while_suspended(&bucket, key, &mut versions, b"null content 3".to_vec())
        .await?;

    let nulls = versions.iter().filter(|v| v.is_null_version()).count();
    ensure!(nulls == 1, "{nulls} null versions recorded while suspended");

    while !versions.is_empty() {
        manager.remove_version(&bucket, key, &mut versions, 0).await?;
    }
    Ok(())
}

async fn suspended_null_delete(scope: ResourceScope) -> Result<()> {
    let bucket = scope.create_bucket().await?;
    let storage = scope.storage().clone();
    let manager = scope.versioning_manager();
    let key = "testobjfoo";

    storage
        .put_object(&bucket, key, b"fooz".to_vec(), None)
        .await?;
    manager
        .set_versioning(&bucket, VersioningState::Enabled)
        .await?;
    storage
        .delete_object(&bucket, key, Some(NULL_VERSION_ID))
        .await?;

    match storage.get_object(&bucket, key, None, None, None).await {
        Ok(_) => bail!("s3://{bucket}/{key} is still readable after deleting its null version"),
        Err(e) if store_error_code(&e) == Some("NoSuchKey") => {}
        Err(e) => return Err(e.context("unexpected error reading a deleted key")),
    }

    let remaining = manager.list_versions(&bucket, key).await?;
    ensure!(
        remaining.is_empty(),
        "{} versions listed after deleting the null version",
        remaining.len()
    );
    Ok(())
}

async fn concurrent_versions(scope: ResourceScope) -> Result<()> {
    let bucket = scope.create_versioned_bucket().await?;
    let manager = scope.versioning_manager();
    let key = "testobj";

    manager.create_versions(&bucket, key, VERSION_COUNT).await?;
    manager
        .concurrent_stress(&bucket, key, scope.config().stress_workers)
        .await?;
    Ok(())
}

async fn post_policy(scope: ResourceScope, target: PostPolicyTarget) -> Result<()> {
    let bucket = scope.create_bucket().await?;
    let client = PostObjectClient::new(
        &target.endpoint,
        target.force_path_style,
        Duration::from_millis(scope.config().post_connect_timeout_milliseconds),
    )?;
    let verifier = ContentIntegrityVerifier::new(scope.storage().clone());

    let mut conditions = vec![
        PolicyCondition::exact("bucket", &bucket),
        PolicyCondition::starts_with("key", "foo"),
        PolicyCondition::exact("acl", "private"),
        PolicyCondition::starts_with("Content-Type", "text/plain"),
        PolicyCondition::exact("success_action_status", "201"),
        PolicyCondition::ContentLengthRange { min: 0, max: 1024 },
    ];
    if let Some(token) = &target.access_keys.session_token {
        conditions.push(PolicyCondition::exact("x-amz-security-token", token));
    }
    let signed = PostPolicyDocument::expiring_in(TimeDelta::hours(1), conditions)
        .sign(&target.access_keys.secret_access_key);

    let form = |key: &str, signature: &str| {
        let mut signed = signed.clone();
        signed.signature = signature.to_string();
        let mut form = PostObjectForm::signed(key, &target.access_keys.access_key, &signed);
        if let Some(token) = &target.access_keys.session_token {
            form = form.field("x-amz-security-token", token);
        }
        form.acl("private")
            .content_type("text/plain")
            .success_action_status(201)
            .file(b"bar".to_vec())
    };

    let response = client.post(&bucket, form("foo.txt", &signed.signature)).await?;
    ensure!(
        response.status == 201,
        "signed form upload answered {}: {}",
        response.status,
        response.body
    );
    verifier.verify_whole(&bucket, "foo.txt", b"bar").await?;

    let truncated = &signed.signature[..signed.signature.len().saturating_sub(1)];
    let response = client.post(&bucket, form("foo2.txt", truncated)).await?;
    if response.status != 403 {
        return Err(anyhow!(
            "form upload with a truncated signature answered {}, expected 403",
            response.status
        ));
    }
    Ok(())
}
