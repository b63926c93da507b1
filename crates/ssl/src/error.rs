//! Certificate issuance and renewal errors

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use hop_common::{CertificateId, DnsProviderId};

use crate::parse::ParseError;
use crate::provider::DecodeError;
use crate::store::StoreError;

/// Errors raised by issuance, renewal and the operations around them
#[derive(Debug, Error)]
pub enum AcmeError {
    /// Issue called with an empty domain list
    #[error("At least one domain is required")]
    NoDomains,

    /// Issue or renew called without a contact email
    #[error("A contact email is required")]
    MissingEmail,

    /// Rejected caller input
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("DNS provider not found: {0}")]
    ProviderNotFound(DnsProviderId),

    #[error("Certificate not found: {0}")]
    CertificateNotFound(CertificateId),

    /// Stored provider credentials do not decode
    #[error("Invalid DNS provider credentials: {0}")]
    Decode(#[from] DecodeError),

    /// A DNS-01 challenge record for the domain is still present
    #[error("DNS validation record already exists for '{domain}', retry later")]
    ValidationConflict { domain: String },

    /// DNS API rejected the provider credentials
    #[error("DNS API authentication failed for '{domain}', check the DNS provider credentials")]
    Credential { domain: String },

    /// CA or DNS provider rate limit hit
    #[error("Rate limited while obtaining certificate for '{domain}', retry later")]
    Throttled { domain: String },

    /// Any other ACME client failure, with its raw output
    #[error("Certificate request for '{domain}' failed: {output}")]
    Issuance { domain: String, output: String },

    /// ACME client binary could not be started
    #[error("ACME client '{client}' is not available: {reason}")]
    ClientUnavailable { client: String, reason: String },

    /// ACME client ran longer than the configured bound and was killed
    #[error("ACME client timed out after {0:?}")]
    Timeout(Duration),

    /// ACME client exited successfully but an expected file is absent
    #[error("ACME client did not produce {0:?}")]
    MissingArtifact(PathBuf),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AcmeError {
    /// Map a failed certificate lookup, turning a miss into `CertificateNotFound`
    pub fn certificate_lookup(id: &CertificateId, e: StoreError) -> Self {
        match e {
            StoreError::NotFound { .. } => AcmeError::CertificateNotFound(id.clone()),
            other => AcmeError::Store(other),
        }
    }

    /// Map a failed provider lookup, turning a miss into `ProviderNotFound`
    pub fn provider_lookup(id: &DnsProviderId, e: StoreError) -> Self {
        match e {
            StoreError::NotFound { .. } => AcmeError::ProviderNotFound(id.clone()),
            other => AcmeError::Store(other),
        }
    }

    /// Failures that leave the record untouched and clear on a later attempt
    ///
    /// Throttling is not transient: renewal marks the record `error` and an
    /// operator has to retry it.
    pub fn is_transient(&self) -> bool {
        matches!(self, AcmeError::ValidationConflict { .. } | AcmeError::Timeout(_))
    }
}
