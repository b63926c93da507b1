//! DNS provider configuration model
//!
//! Each supported provider stores an opaque JSON credential document. The
//! document is only ever interpreted through [`ProviderCredential::decode`],
//! which validates it against the provider kind and yields the environment
//! the ACME client expects for that provider's DNS-01 solver.
//!
//! | Kind           | Client `--dns` | Environment                                         |
//! |----------------|----------------|-----------------------------------------------------|
//! | `alidns`       | `alidns`       | `ALICLOUD_ACCESS_KEY`, `ALICLOUD_SECRET_KEY`, `ALICLOUD_REGION_ID`? |
//! | `tencentcloud` | `tencentcloud` | `TENCENTCLOUD_SECRET_ID`, `TENCENTCLOUD_SECRET_KEY` |
//! | `cloudflare`   | `cloudflare`   | `CF_DNS_API_TOKEN`, or `CF_API_EMAIL` + `CF_API_KEY` |

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use hop_common::DnsProviderId;

/// Errors raised while decoding a provider credential document
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Unsupported DNS provider type: {0}")]
    UnsupportedKind(String),

    #[error("Invalid {kind} credentials: {source}")]
    InvalidJson {
        kind: ProviderKind,
        source: serde_json::Error,
    },

    #[error("Missing required {kind} credential field '{field}'")]
    MissingField {
        kind: ProviderKind,
        field: &'static str,
    },

    #[error("Cloudflare credentials require either 'apiToken' or both 'email' and 'apiKey'")]
    IncompleteCloudflare,
}

/// Supported DNS provider kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    AliDns,
    TencentCloud,
    Cloudflare,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 3] = [Self::AliDns, Self::TencentCloud, Self::Cloudflare];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AliDns => "alidns",
            Self::TencentCloud => "tencentcloud",
            Self::Cloudflare => "cloudflare",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| DecodeError::UnsupportedKind(s.to_string()))
    }
}

/// Persisted DNS provider record
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DnsProvider {
    pub id: DnsProviderId,
    /// Display name
    pub name: String,
    pub kind: ProviderKind,
    /// Provider-specific JSON credential document
    pub credential_blob: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DnsProvider {
    /// Decode this record's credentials against its kind
    pub fn credential(&self) -> Result<ProviderCredential, DecodeError> {
        ProviderCredential::decode(self.kind, &self.credential_blob)
    }
}

impl fmt::Debug for DnsProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DnsProvider")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("credential_blob", &"<redacted>")
            .field("created_at", &self.created_at)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

/// Alibaba Cloud DNS credentials
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AliDnsCredential {
    #[serde(default)]
    pub access_key_id: String,
    #[serde(default)]
    pub access_key_secret: String,
    /// Optional; the client defaults to cn-hangzhou
    #[serde(default)]
    pub region_id: Option<String>,
}

/// Tencent Cloud DNSPod credentials
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TencentCloudCredential {
    #[serde(default)]
    pub secret_id: String,
    #[serde(default)]
    pub secret_key: String,
}

/// Cloudflare credentials
///
/// A scoped API token is preferred. The legacy global API key requires the
/// account email alongside it.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudflareCredential {
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
}

/// Validated credentials for one provider kind
#[derive(Clone)]
pub enum ProviderCredential {
    AliDns(AliDnsCredential),
    TencentCloud(TencentCloudCredential),
    Cloudflare(CloudflareCredential),
}

impl ProviderCredential {
    /// Decode and validate a credential document for the given kind
    pub fn decode(kind: ProviderKind, blob: &str) -> Result<Self, DecodeError> {
        let invalid = |source| DecodeError::InvalidJson { kind, source };

        match kind {
            ProviderKind::AliDns => {
                let cred: AliDnsCredential = serde_json::from_str(blob).map_err(invalid)?;
                require(kind, "accessKeyId", &cred.access_key_id)?;
                require(kind, "accessKeySecret", &cred.access_key_secret)?;
                Ok(Self::AliDns(cred))
            }
            ProviderKind::TencentCloud => {
                let cred: TencentCloudCredential = serde_json::from_str(blob).map_err(invalid)?;
                require(kind, "secretId", &cred.secret_id)?;
                require(kind, "secretKey", &cred.secret_key)?;
                Ok(Self::TencentCloud(cred))
            }
            ProviderKind::Cloudflare => {
                let cred: CloudflareCredential = serde_json::from_str(blob).map_err(invalid)?;
                let has_token = non_empty(&cred.api_token);
                let has_global_key = non_empty(&cred.email) && non_empty(&cred.api_key);
                if !has_token && !has_global_key {
                    return Err(DecodeError::IncompleteCloudflare);
                }
                Ok(Self::Cloudflare(cred))
            }
        }
    }

    pub fn kind(&self) -> ProviderKind {
        match self {
            Self::AliDns(_) => ProviderKind::AliDns,
            Self::TencentCloud(_) => ProviderKind::TencentCloud,
            Self::Cloudflare(_) => ProviderKind::Cloudflare,
        }
    }

    /// Identifier passed to the ACME client's `--dns` flag
    pub fn client_provider_name(&self) -> &'static str {
        self.kind().as_str()
    }

    /// Environment variables the ACME client reads for this provider
    pub fn environment_variables(&self) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        match self {
            Self::AliDns(cred) => {
                env.insert("ALICLOUD_ACCESS_KEY".into(), cred.access_key_id.clone());
                env.insert("ALICLOUD_SECRET_KEY".into(), cred.access_key_secret.clone());
                if let Some(region) = cred.region_id.as_ref().filter(|r| !r.is_empty()) {
                    env.insert("ALICLOUD_REGION_ID".into(), region.clone());
                }
            }
            Self::TencentCloud(cred) => {
                env.insert("TENCENTCLOUD_SECRET_ID".into(), cred.secret_id.clone());
                env.insert("TENCENTCLOUD_SECRET_KEY".into(), cred.secret_key.clone());
            }
            Self::Cloudflare(cred) => {
                // Token wins when both forms are present
                if let Some(token) = cred.api_token.as_ref().filter(|t| !t.trim().is_empty()) {
                    env.insert("CF_DNS_API_TOKEN".into(), token.clone());
                } else if let (Some(email), Some(key)) = (&cred.email, &cred.api_key) {
                    env.insert("CF_API_EMAIL".into(), email.clone());
                    env.insert("CF_API_KEY".into(), key.clone());
                }
            }
        }
        env
    }
}

impl fmt::Debug for ProviderCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<String> = self.environment_variables().into_keys().collect();
        f.debug_struct("ProviderCredential")
            .field("kind", &self.kind())
            .field("variables", &keys)
            .finish_non_exhaustive()
    }
}

fn require(kind: ProviderKind, field: &'static str, value: &str) -> Result<(), DecodeError> {
    if value.trim().is_empty() {
        return Err(DecodeError::MissingField { kind, field });
    }
    Ok(())
}

fn non_empty(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}
