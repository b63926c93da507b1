//! Certificate and DNS provider records
//!
//! [`CertificateStore`] is the persistence seam consumed by the issuer, the
//! renewal scheduler and the service facade. [`JsonStore`] is the bundled
//! implementation.

mod json;

pub use json::JsonStore;

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use hop_common::{CertificateId, DnsProviderId, LogEntryId};

use crate::provider::DnsProvider;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by a certificate store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("{entity} already exists: {id}")]
    Duplicate { entity: &'static str, id: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// Certificate lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CertificateStatus {
    Pending,
    Active,
    Expired,
    Error,
}

impl fmt::Display for CertificateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Expired => "expired",
            Self::Error => "error",
        };
        f.pad(s)
    }
}

/// Persisted certificate record
///
/// `cert_path`/`key_path` are stored relative to the data directory when
/// possible so the record survives relocation of the data root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Certificate {
    pub id: CertificateId,
    pub primary_domain: String,
    /// All covered domains, primary domain first
    pub domains: Vec<String>,
    pub dns_provider_id: DnsProviderId,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    /// Issuer common name
    pub issuer: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub auto_renew: bool,
    #[serde(default)]
    pub last_renewed_at: Option<DateTime<Utc>>,
    pub status: CertificateStatus,
    #[serde(default)]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Certificate {
    /// Flag the record as failed, keeping its last good material
    pub fn mark_error(&mut self, message: impl Into<String>) {
        self.status = CertificateStatus::Error;
        self.error_message = Some(message.into());
    }

    /// Whole days until expiry, never negative
    pub fn days_remaining(&self, now: DateTime<Utc>) -> i64 {
        (self.not_after - now).num_days().max(0)
    }

    /// Status as presented to operators
    ///
    /// An `active` record past its `not_after` is reported as `expired`.
    pub fn effective_status(&self, now: DateTime<Utc>) -> CertificateStatus {
        if self.status == CertificateStatus::Active && self.not_after < now {
            CertificateStatus::Expired
        } else {
            self.status
        }
    }
}

/// Certificate audit action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogAction {
    Create,
    Renew,
    Error,
    Cleanup,
}

impl fmt::Display for LogAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Renew => "renew",
            Self::Error => "error",
            Self::Cleanup => "cleanup",
        };
        f.pad(s)
    }
}

/// Append-only certificate audit entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateLog {
    pub id: LogEntryId,
    pub certificate_id: CertificateId,
    pub action: LogAction,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl CertificateLog {
    pub fn new(certificate_id: &CertificateId, action: LogAction, message: impl Into<String>) -> Self {
        Self {
            id: LogEntryId::generate(),
            certificate_id: certificate_id.clone(),
            action,
            message: message.into(),
            created_at: Utc::now(),
        }
    }
}

/// Persistence operations for certificates, DNS providers and audit logs
///
/// Calls are synchronous and expected to be short; implementations must be
/// safe to share across tasks.
pub trait CertificateStore: Send + Sync {
    fn create_dns_provider(&self, provider: &DnsProvider) -> StoreResult<()>;

    fn update_dns_provider(&self, provider: &DnsProvider) -> StoreResult<()>;

    fn get_dns_provider(&self, id: &DnsProviderId) -> StoreResult<DnsProvider>;

    /// Newest first
    fn list_dns_providers(&self) -> StoreResult<Vec<DnsProvider>>;

    /// Certificates referencing the provider are left untouched
    fn delete_dns_provider(&self, id: &DnsProviderId) -> StoreResult<()>;

    fn create_certificate(&self, cert: &Certificate) -> StoreResult<()>;

    fn update_certificate(&self, cert: &Certificate) -> StoreResult<()>;

    fn get_certificate(&self, id: &CertificateId) -> StoreResult<Certificate>;

    /// Look up by primary domain
    fn get_certificate_by_domain(&self, domain: &str) -> StoreResult<Option<Certificate>>;

    /// Newest first
    fn list_certificates(&self) -> StoreResult<Vec<Certificate>>;

    /// Removes the record and its log entries
    fn delete_certificate(&self, id: &CertificateId) -> StoreResult<()>;

    fn create_certificate_log(&self, entry: &CertificateLog) -> StoreResult<()>;

    /// Newest first, at most `limit` entries
    fn get_certificate_logs(
        &self,
        certificate_id: &CertificateId,
        limit: usize,
    ) -> StoreResult<Vec<CertificateLog>>;

    /// Active, auto-renewing certificates expiring within `days`, soonest first
    fn list_certificates_expiring_soon(&self, days: u32) -> StoreResult<Vec<Certificate>> {
        Ok(expiring_soon(self.list_certificates()?, Utc::now(), days))
    }
}

/// Select renewal candidates from a set of certificates
///
/// Keeps `active` records with auto-renew enabled whose `not_after` falls on
/// or before `now + days`, ordered by `not_after` ascending.
pub fn expiring_soon(
    certs: impl IntoIterator<Item = Certificate>,
    now: DateTime<Utc>,
    days: u32,
) -> Vec<Certificate> {
    let threshold = now + Duration::days(i64::from(days));

    let mut selected: Vec<Certificate> = certs
        .into_iter()
        .filter(|c| c.status == CertificateStatus::Active && c.auto_renew)
        .filter(|c| c.not_after <= threshold)
        .collect();

    selected.sort_by_key(|c| c.not_after);
    selected
}
