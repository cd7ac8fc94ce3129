//! Browser-form upload (POST policy) signing and submission.
//!
//! A policy document is serialized to canonical JSON, base64-encoded, and the
//! base64 text is signed with HMAC-SHA1. The policy and signature travel as
//! form fields of a `multipart/form-data` POST to the bucket endpoint.

use std::time::Duration;

use anyhow::{Result, anyhow};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, TimeDelta, Utc};
use hmac::{Hmac, Mac};
use serde_json::{Map, Value, json};
use sha1::Sha1;
use tracing::{debug, error};
use url::Url;

use crate::types::error::HarnessError;

type HmacSha1 = Hmac<Sha1>;

const EXPIRATION_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";
const POST_OBJECT_OPERATION: &str = "PostObject";

/// One clause of a policy's `conditions` array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyCondition {
    /// `{"field": "value"}`
    Exact { field: String, value: String },
    /// `["eq", "$field", "value"]`
    Eq { field: String, value: String },
    /// `["starts-with", "$field", "prefix"]`
    StartsWith { field: String, prefix: String },
    /// `["content-length-range", min, max]`
    ContentLengthRange { min: u64, max: u64 },
}

impl PolicyCondition {
    pub fn exact(field: &str, value: &str) -> Self {
        PolicyCondition::Exact {
            field: field.to_string(),
            value: value.to_string(),
        }
    }

    pub fn eq(field: &str, value: &str) -> Self {
        PolicyCondition::Eq {
            field: field.to_string(),
            value: value.to_string(),
        }
    }

    pub fn starts_with(field: &str, prefix: &str) -> Self {
        PolicyCondition::StartsWith {
            field: field.to_string(),
            prefix: prefix.to_string(),
        }
    }

    fn to_value(&self) -> Value {
        match self {
            PolicyCondition::Exact { field, value } => {
                let mut object = Map::new();
                object.insert(field.clone(), Value::String(value.clone()));
                Value::Object(object)
            }
            PolicyCondition::Eq { field, value } => json!(["eq", format!("${field}"), value]),
            PolicyCondition::StartsWith { field, prefix } => {
                json!(["starts-with", format!("${field}"), prefix])
            }
            PolicyCondition::ContentLengthRange { min, max } => {
                json!(["content-length-range", min, max])
            }
        }
    }
}

/// Expiration and ordered conditions of a POST policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostPolicyDocument {
    pub expiration: DateTime<Utc>,
    pub conditions: Vec<PolicyCondition>,
}

impl PostPolicyDocument {
    pub fn new(expiration: DateTime<Utc>, conditions: Vec<PolicyCondition>) -> Self {
        PostPolicyDocument {
            expiration,
            conditions,
        }
    }

    /// Policy that expires `lifetime` from now.
    pub fn expiring_in(lifetime: TimeDelta, conditions: Vec<PolicyCondition>) -> Self {
        Self::new(Utc::now() + lifetime, conditions)
    }

    /// Canonical JSON: `expiration` first, then `conditions` in the order given.
    pub fn to_json(&self) -> String {
        let conditions: Vec<Value> = self.conditions.iter().map(PolicyCondition::to_value).collect();
        json!({
            "expiration": self.expiration.format(EXPIRATION_FORMAT).to_string(),
            "conditions": conditions,
        })
        .to_string()
    }

    pub fn sign(&self, secret_key: &str) -> SignedPostPolicy {
        sign(&self.to_json(), secret_key)
    }
}

/// Base64 policy text and its signature, ready for the `policy` and
/// `signature` form fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedPostPolicy {
    pub policy: String,
    pub signature: String,
}

pub fn build_policy(expiration: DateTime<Utc>, conditions: Vec<PolicyCondition>) -> String {
    PostPolicyDocument::new(expiration, conditions).to_json()
}

/// `base64(HMAC-SHA1(secret_key, base64(policy_json)))`.
///
/// The signature covers the base64 text, not the raw JSON.
///
/// ```
/// use s3compat_rs::post_policy::sign;
///
/// let signed = sign("{}", "key");
/// assert_eq!(signed.policy, "e30=");
/// assert_eq!(signed.signature, "6IQ2GnMTXeA7xFHgR7DAcL0KYjw=");
/// ```
pub fn sign(policy_json: &str, secret_key: &str) -> SignedPostPolicy {
    let policy = STANDARD.encode(policy_json);
    let signature = STANDARD.encode(hmac_sha1(secret_key.as_bytes(), policy.as_bytes()));

    SignedPostPolicy { policy, signature }
}

fn hmac_sha1(key: &[u8], data: &[u8]) -> [u8; 20] {
    let mut mac = HmacSha1::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// Ordered fields of a form upload, followed by the `file` part.
#[derive(Debug, Clone, Default)]
pub struct PostObjectForm {
    fields: Vec<(String, String)>,
    file: Vec<u8>,
}

impl PostObjectForm {
    /// Anonymous form carrying only the object key.
    pub fn new(key: &str) -> Self {
        PostObjectForm::default().field("key", key)
    }

    /// Form authenticated with `signed` and the access key it was signed for.
    pub fn signed(key: &str, access_key: &str, signed: &SignedPostPolicy) -> Self {
        Self::new(key)
            .field("AWSAccessKeyId", access_key)
            .field("policy", &signed.policy)
            .field("signature", &signed.signature)
    }

    pub fn field(mut self, name: &str, value: &str) -> Self {
        self.fields.push((name.to_string(), value.to_string()));
        self
    }

    pub fn acl(self, acl: &str) -> Self {
        self.field("acl", acl)
    }

    pub fn content_type(self, content_type: &str) -> Self {
        self.field("Content-Type", content_type)
    }

    pub fn success_action_status(self, status: u16) -> Self {
        self.field("success_action_status", &status.to_string())
    }

    pub fn success_action_redirect(self, url: &str) -> Self {
        self.field("success_action_redirect", url)
    }

    pub fn metadata(self, name: &str, value: &str) -> Self {
        self.field(&format!("x-amz-meta-{name}"), value)
    }

    pub fn file(mut self, content: Vec<u8>) -> Self {
        self.file = content;
        self
    }

    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    fn into_multipart(self) -> reqwest::multipart::Form {
        let form = self
            .fields
            .into_iter()
            .fold(reqwest::multipart::Form::new(), |form, (name, value)| {
                form.text(name, value)
            });
        form.part("file", reqwest::multipart::Part::bytes(self.file))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostObjectResponse {
    pub status: u16,
    pub location: Option<String>,
    pub body: String,
}

/// Raw HTTP client for form uploads. Redirects are returned, not followed.
#[derive(Debug, Clone)]
pub struct PostObjectClient {
    client: reqwest::Client,
    endpoint: Url,
    force_path_style: bool,
}

impl PostObjectClient {
    pub fn new(endpoint: &str, force_path_style: bool, connect_timeout: Duration) -> Result<Self> {
        let endpoint = Url::parse(endpoint).map_err(|e| {
            anyhow!(HarnessError::InvalidInput(format!(
                "invalid POST endpoint {endpoint}: {e}"
            )))
        })?;
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| transport_error(&e))?;

        Ok(PostObjectClient {
            client,
            endpoint,
            force_path_style,
        })
    }

    /// `endpoint/bucket` for path-style addressing, `bucket.endpoint/` otherwise.
    pub fn bucket_url(&self, bucket: &str) -> Result<Url> {
        let mut url = self.endpoint.clone();
        let invalid = || {
            anyhow!(HarnessError::InvalidInput(format!(
                "cannot address bucket {bucket} at {}",
                self.endpoint
            )))
        };

        if self.force_path_style {
            url.path_segments_mut()
                .map_err(|_| invalid())?
                .pop_if_empty()
                .push(bucket);
        } else {
            let host = url.host_str().ok_or_else(invalid)?;
            let virtual_host = format!("{bucket}.{host}");
            url.set_host(Some(&virtual_host)).map_err(|_| invalid())?;
        }
        Ok(url)
    }

    /// Submit `form` to `bucket`. Any HTTP status is returned to the caller;
    /// only transport failures are errors.
    pub async fn post(&self, bucket: &str, form: PostObjectForm) -> Result<PostObjectResponse> {
        let url = self.bucket_url(bucket)?;
        debug!(
            bucket = bucket,
            url = url.as_str(),
            fields = form.fields().len(),
            "posting form upload."
        );

        let response = self
            .client
            .post(url)
            .multipart(form.into_multipart())
            .send()
            .await
            .map_err(|e| transport_error(&e))?;

        let status = response.status().as_u16();
        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response.text().await.map_err(|e| transport_error(&e))?;

        debug!(bucket = bucket, status = status, "form upload answered.");
        Ok(PostObjectResponse {
            status,
            location,
            body,
        })
    }
}

fn transport_error(e: &reqwest::Error) -> anyhow::Error {
    error!(
        operation = POST_OBJECT_OPERATION,
        error = %e,
        "form upload request failed."
    );
    anyhow!(HarnessError::Store {
        operation: POST_OBJECT_OPERATION.to_string(),
        status: None,
        code: "N/A".to_string(),
        message: e.to_string(),
    })
}
