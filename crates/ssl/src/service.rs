//! Certificate management facade
//!
//! [`CertificateService`] is what the HTTP layer and the CLI talk to. It
//! validates requests, forwards issuance work to the shared
//! [`CertificateIssuer`] and answers read-only queries straight from the
//! store without taking the issuance lock.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use hop_common::{CertificateId, DnsProviderId};

use crate::error::AcmeError;
use crate::issuer::{CertificateIssuer, RenewOutcome};
use crate::provider::{DnsProvider, ProviderCredential, ProviderKind};
use crate::store::{Certificate, CertificateLog, CertificateStatus, CertificateStore, LogAction};

/// Log entries returned when no limit is given
pub const DEFAULT_LOG_LIMIT: usize = 50;

/// DNS provider as listed to operators, without credentials
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DnsProviderSummary {
    pub id: DnsProviderId,
    pub name: String,
    pub kind: ProviderKind,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&DnsProvider> for DnsProviderSummary {
    fn from(provider: &DnsProvider) -> Self {
        Self {
            id: provider.id.clone(),
            name: provider.name.clone(),
            kind: provider.kind,
            created_at: provider.created_at,
            updated_at: provider.updated_at,
        }
    }
}

/// Partial update of a DNS provider
#[derive(Debug, Clone, Default)]
pub struct DnsProviderUpdate {
    pub name: Option<String>,
    pub kind: Option<ProviderKind>,
    pub credential_blob: Option<String>,
}

/// Absolute certificate and key paths of an active certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificatePaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// Operations exposed to the HTTP layer and the CLI
#[derive(Debug, Clone)]
pub struct CertificateService {
    issuer: Arc<CertificateIssuer>,
}

impl CertificateService {
    pub fn new(issuer: Arc<CertificateIssuer>) -> Self {
        Self { issuer }
    }

    pub fn issuer(&self) -> &Arc<CertificateIssuer> {
        &self.issuer
    }

    fn store(&self) -> &Arc<dyn CertificateStore> {
        self.issuer.store()
    }

    /// Issue a certificate; refuses when the ACME client is missing
    pub async fn issue(
        &self,
        domains: &[String],
        provider_id: &DnsProviderId,
        email: &str,
    ) -> Result<Certificate, AcmeError> {
        if domains.iter().all(|d| d.trim().is_empty()) {
            return Err(AcmeError::NoDomains);
        }
        if email.trim().is_empty() {
            return Err(AcmeError::MissingEmail);
        }
        if !self.issuer.check_client_installed() {
            return Err(AcmeError::ClientUnavailable {
                client: self.issuer.client_name().to_string(),
                reason: "not installed".to_string(),
            });
        }

        self.issuer.issue(domains, provider_id, email).await
    }

    pub async fn renew(
        &self,
        certificate_id: &CertificateId,
        email: &str,
    ) -> Result<RenewOutcome, AcmeError> {
        self.issuer.renew(certificate_id, email).await
    }

    /// Remove the ACME client's artifacts for a certificate's primary domain
    ///
    /// Appends a `cleanup` log entry. Returns the number of files removed.
    pub fn cleanup(&self, certificate_id: &CertificateId) -> Result<usize, AcmeError> {
        let cert = self.get_certificate(certificate_id)?;
        let removed = self.issuer.force_cleanup(&cert.primary_domain);

        self.store().create_certificate_log(&CertificateLog::new(
            &cert.id,
            LogAction::Cleanup,
            format!("Removed {removed} ACME client file(s); the certificate can be requested again"),
        ))?;

        Ok(removed)
    }

    /// Remove the ACME client's artifacts for any domain
    ///
    /// When a certificate exists for the domain a `cleanup` log entry is
    /// appended to it.
    pub fn cleanup_domain(&self, domain: &str) -> Result<usize, AcmeError> {
        let removed = self.issuer.force_cleanup(domain);

        if let Some(cert) = self.store().get_certificate_by_domain(domain)? {
            self.store().create_certificate_log(&CertificateLog::new(
                &cert.id,
                LogAction::Cleanup,
                format!("Removed {removed} ACME client file(s)"),
            ))?;
        }

        Ok(removed)
    }

    /// Delete a certificate record and its logs
    ///
    /// Installed files are left in place and nothing is revoked at the CA.
    pub fn delete(&self, certificate_id: &CertificateId) -> Result<(), AcmeError> {
        self.store()
            .delete_certificate(certificate_id)
            .map_err(|e| AcmeError::certificate_lookup(certificate_id, e))?;
        info!(certificate_id = %certificate_id, "Deleted certificate");
        Ok(())
    }

    /// Newest first, [`DEFAULT_LOG_LIMIT`] entries when `limit` is `None`
    pub fn get_logs(
        &self,
        certificate_id: &CertificateId,
        limit: Option<usize>,
    ) -> Result<Vec<CertificateLog>, AcmeError> {
        Ok(self
            .store()
            .get_certificate_logs(certificate_id, limit.unwrap_or(DEFAULT_LOG_LIMIT))?)
    }

    pub fn list_expiring_soon(&self, days: u32) -> Result<Vec<Certificate>, AcmeError> {
        Ok(self.store().list_certificates_expiring_soon(days)?)
    }

    pub fn list_certificates(&self) -> Result<Vec<Certificate>, AcmeError> {
        Ok(self.store().list_certificates()?)
    }

    pub fn get_certificate(&self, certificate_id: &CertificateId) -> Result<Certificate, AcmeError> {
        self.store()
            .get_certificate(certificate_id)
            .map_err(|e| AcmeError::certificate_lookup(certificate_id, e))
    }

    /// Files the nginx layer should reference for `domain`
    ///
    /// Only `active` certificates are returned.
    pub fn active_certificate_paths(&self, domain: &str) -> Result<Option<CertificatePaths>, AcmeError> {
        let paths = self
            .store()
            .get_certificate_by_domain(domain)?
            .filter(|c| c.status == CertificateStatus::Active)
            .map(|c| CertificatePaths {
                cert: self.issuer.resolve(&c.cert_path),
                key: self.issuer.resolve(&c.key_path),
            });
        Ok(paths)
    }

    pub fn check_client_installed(&self) -> bool {
        self.issuer.check_client_installed()
    }

    /// Empty when the client is not installed
    pub async fn client_version(&self) -> String {
        if !self.issuer.check_client_installed() {
            return String::new();
        }
        self.issuer.client_version().await
    }

    /// Best-effort revoke of stale client certificates, see
    /// [`CertificateIssuer::revoke_stale`]
    pub async fn revoke_stale(
        &self,
        domains: &[String],
        provider_id: &DnsProviderId,
        email: &str,
    ) -> Result<usize, AcmeError> {
        self.issuer.revoke_stale(domains, provider_id, email).await
    }

    /// Register a DNS provider after validating its credentials
    pub fn create_dns_provider(
        &self,
        name: &str,
        kind: ProviderKind,
        credential_blob: &str,
    ) -> Result<DnsProvider, AcmeError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AcmeError::InvalidRequest("provider name must not be empty".into()));
        }
        ProviderCredential::decode(kind, credential_blob)?;

        let now = Utc::now();
        let provider = DnsProvider {
            id: DnsProviderId::generate(),
            name: name.to_string(),
            kind,
            credential_blob: credential_blob.to_string(),
            created_at: now,
            updated_at: now,
        };
        self.store().create_dns_provider(&provider)?;

        info!(provider_id = %provider.id, kind = %kind, name = %provider.name, "Created DNS provider");
        Ok(self.store().get_dns_provider(&provider.id)?)
    }

    /// Apply a partial update
    ///
    /// The resulting kind/credential pair is always re-validated, so changing
    /// the kind without new credentials fails unless the stored blob also
    /// decodes for the new kind.
    pub fn update_dns_provider(
        &self,
        provider_id: &DnsProviderId,
        update: DnsProviderUpdate,
    ) -> Result<DnsProvider, AcmeError> {
        let mut provider = self
            .store()
            .get_dns_provider(provider_id)
            .map_err(|e| AcmeError::provider_lookup(provider_id, e))?;

        if let Some(name) = update.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
            provider.name = name.to_string();
        }
        let revalidate = update.kind.is_some() || update.credential_blob.is_some();
        if let Some(kind) = update.kind {
            provider.kind = kind;
        }
        if let Some(blob) = update.credential_blob {
            provider.credential_blob = blob;
        }
        if revalidate {
            provider.credential()?;
        }

        self.store().update_dns_provider(&provider)?;
        info!(provider_id = %provider.id, kind = %provider.kind, "Updated DNS provider");
        Ok(self.store().get_dns_provider(provider_id)?)
    }

    /// Delete a provider; certificates referencing it are kept
    pub fn delete_dns_provider(&self, provider_id: &DnsProviderId) -> Result<(), AcmeError> {
        self.store()
            .delete_dns_provider(provider_id)
            .map_err(|e| AcmeError::provider_lookup(provider_id, e))?;
        info!(provider_id = %provider_id, "Deleted DNS provider");
        Ok(())
    }

    pub fn list_dns_providers(&self) -> Result<Vec<DnsProviderSummary>, AcmeError> {
        Ok(self
            .store()
            .list_dns_providers()?
            .iter()
            .map(DnsProviderSummary::from)
            .collect())
    }
}
