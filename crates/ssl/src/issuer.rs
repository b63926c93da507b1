//! Certificate issuance and renewal
//!
//! [`CertificateIssuer`] drives one issuance or renewal end to end: it
//! resolves the DNS provider, runs the ACME client, classifies failures,
//! installs the resulting PEM material into the managed SSL directory and
//! records the outcome in the store.
//!
//! Every client invocation is serialized on the issuer's own lock. The client
//! shares account and certificate state under one working directory, so two
//! concurrent runs could corrupt it or race on DNS challenge records. The lock
//! is held across the client run, the parse and the file installs.
//!
//! Fresh material is parsed from the client's working directory before the
//! installed files are touched. It is staged next to its destination and
//! renamed into place, so a bad deposit never replaces a working pair.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use hop_common::{CertificateId, DnsProviderId};
use hop_config::DataLayout;

use crate::cleanup::{self, domain_token, ClientArtifacts};
use crate::client::{self, classify_failure, AcmeClientRunner, ClientFailure};
use crate::error::AcmeError;
use crate::parse::{parse_certificate, CertificateInfo};
use crate::provider::DnsProvider;
use crate::store::{Certificate, CertificateLog, CertificateStatus, CertificateStore, LogAction};

/// Result of a renewal attempt that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewOutcome {
    /// New material installed and the record refreshed
    Renewed,
    /// The client reported the certificate is not yet due; nothing changed
    NotDue,
}

/// Issues and renews certificates through the external ACME client
pub struct CertificateIssuer {
    store: Arc<dyn CertificateStore>,
    runner: Arc<dyn AcmeClientRunner>,
    layout: DataLayout,
    /// Held for the full duration of every client invocation
    lock: Mutex<()>,
}

impl CertificateIssuer {
    pub fn new(
        store: Arc<dyn CertificateStore>,
        runner: Arc<dyn AcmeClientRunner>,
        layout: DataLayout,
    ) -> Self {
        Self {
            store,
            runner,
            layout,
            lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<dyn CertificateStore> {
        &self.store
    }

    pub fn layout(&self) -> &DataLayout {
        &self.layout
    }

    /// Obtain a new certificate for `domains`
    ///
    /// The first domain is the primary domain. An existing record for it is
    /// deleted, together with the client's artifacts, before the client runs.
    /// Nothing is written to the store when issuance fails.
    pub async fn issue(
        &self,
        domains: &[String],
        provider_id: &DnsProviderId,
        email: &str,
    ) -> Result<Certificate, AcmeError> {
        let domains = dedup_domains(domains);
        let Some(primary) = domains.first().cloned() else {
            return Err(AcmeError::NoDomains);
        };
        require_email(email)?;

        let _guard = self.lock.lock().await;
        let started = Instant::now();

        let provider = self.provider(provider_id)?;
        let credential = provider.credential()?;

        fs::create_dir_all(&self.layout.ssl_dir)?;
        fs::create_dir_all(&self.layout.work_dir)?;

        info!(
            domain = %primary,
            domains = ?domains,
            provider = %provider.kind,
            "Requesting certificate"
        );

        if let Some(existing) = self.store.get_certificate_by_domain(&primary)? {
            info!(
                domain = %primary,
                certificate_id = %existing.id,
                "Replacing existing certificate record"
            );
            self.store.delete_certificate(&existing.id)?;
            cleanup::remove_artifacts(&self.layout.work_dir, &primary);
        }

        let args = client::issue_args(
            email,
            credential.client_provider_name(),
            &self.layout.work_dir,
            &domains,
        );
        let output = self
            .runner
            .run(&args, &credential.environment_variables())
            .await?;

        if !output.success() {
            let combined = output.combined();
            let failure = classify_failure(&combined);
            error!(
                domain = %primary,
                status = ?output.status,
                failure = ?failure,
                output = %combined,
                "Certificate issuance failed"
            );
            return Err(failure.into_error(&primary, &combined));
        }

        let token = domain_token(&primary);
        let cert_path = self.layout.ssl_dir.join(format!("{token}.crt"));
        let key_path = self.layout.ssl_dir.join(format!("{token}.key"));
        let info = self.install_material(&primary, &cert_path, &key_path)?;
        let now = Utc::now();

        let cert = Certificate {
            id: CertificateId::generate(),
            primary_domain: primary.clone(),
            domains,
            dns_provider_id: provider.id.clone(),
            cert_path: self.relative_to_data(&cert_path),
            key_path: self.relative_to_data(&key_path),
            issuer: info.issuer_common_name,
            not_before: info.not_before,
            not_after: info.not_after,
            auto_renew: true,
            last_renewed_at: Some(now),
            status: CertificateStatus::Active,
            error_message: None,
            created_at: now,
            updated_at: now,
        };

        self.store.create_certificate(&cert)?;
        self.append_log(CertificateLog::new(
            &cert.id,
            LogAction::Create,
            format!(
                "Issued certificate, valid until {}",
                cert.not_after.format("%Y-%m-%d")
            ),
        ));

        info!(
            domain = %primary,
            certificate_id = %cert.id,
            not_after = %cert.not_after,
            elapsed_secs = started.elapsed().as_secs(),
            "Certificate issued"
        );

        Ok(self.store.get_certificate(&cert.id)?)
    }

    /// Renew an existing certificate
    ///
    /// Credential, throttling and generic failures mark the record `error`
    /// and append an `error` log entry while keeping its last good material.
    /// A validation-record conflict leaves the record untouched.
    pub async fn renew(
        &self,
        certificate_id: &CertificateId,
        email: &str,
    ) -> Result<RenewOutcome, AcmeError> {
        require_email(email)?;

        let _guard = self.lock.lock().await;

        let mut cert = self
            .store
            .get_certificate(certificate_id)
            .map_err(|e| AcmeError::certificate_lookup(certificate_id, e))?;
        let provider = self.provider(&cert.dns_provider_id)?;
        let credential = provider.credential()?;

        let domains = if cert.domains.is_empty() {
            vec![cert.primary_domain.clone()]
        } else {
            cert.domains.clone()
        };

        info!(
            domain = %cert.primary_domain,
            certificate_id = %cert.id,
            provider = %provider.kind,
            "Renewing certificate"
        );

        let args = client::renew_args(
            email,
            credential.client_provider_name(),
            &self.layout.work_dir,
            &domains,
        );
        let output = self
            .runner
            .run(&args, &credential.environment_variables())
            .await?;

        if client::is_no_renewal(&output) {
            info!(domain = %cert.primary_domain, "Certificate not yet due for renewal");
            return Ok(RenewOutcome::NotDue);
        }

        if !output.success() {
            let combined = output.combined();
            let failure = classify_failure(&combined);
            let err = failure.into_error(&cert.primary_domain, &combined);

            if failure == ClientFailure::ValidationConflict {
                warn!(
                    domain = %cert.primary_domain,
                    "DNS validation record already exists, renewal will be retried"
                );
                return Err(err);
            }

            error!(
                domain = %cert.primary_domain,
                certificate_id = %cert.id,
                failure = ?failure,
                output = %combined,
                "Certificate renewal failed"
            );
            self.record_failure(&mut cert, &err);
            return Err(err);
        }

        let cert_path = self.resolve(&cert.cert_path);
        let key_path = self.resolve(&cert.key_path);
        let info = self.install_material(&cert.primary_domain, &cert_path, &key_path)?;

        cert.issuer = info.issuer_common_name;
        cert.not_before = info.not_before;
        cert.not_after = info.not_after;
        cert.last_renewed_at = Some(Utc::now());
        cert.status = CertificateStatus::Active;
        cert.error_message = None;

        self.store.update_certificate(&cert)?;
        self.append_log(CertificateLog::new(
            &cert.id,
            LogAction::Renew,
            format!(
                "Renewed certificate, valid until {}",
                cert.not_after.format("%Y-%m-%d")
            ),
        ));

        info!(
            domain = %cert.primary_domain,
            certificate_id = %cert.id,
            not_after = %cert.not_after,
            "Certificate renewed"
        );

        Ok(RenewOutcome::Renewed)
    }

    /// Remove the client's artifacts for a domain
    ///
    /// Does not take the issuance lock and never fails. Returns the number of
    /// files removed.
    pub fn force_cleanup(&self, domain: &str) -> usize {
        cleanup::remove_artifacts(&self.layout.work_dir, domain)
    }

    /// Best-effort revoke of client certificates left behind for `domains`
    ///
    /// Revoking makes the client clean up its DNS challenge records. Only
    /// provider resolution can fail; revoke failures are logged and ignored.
    /// Returns the number of revoke runs attempted.
    pub async fn revoke_stale(
        &self,
        domains: &[String],
        provider_id: &DnsProviderId,
        email: &str,
    ) -> Result<usize, AcmeError> {
        let _guard = self.lock.lock().await;

        let provider = self.provider(provider_id)?;
        let credential = provider.credential()?;
        let env = credential.environment_variables();

        let mut attempted = 0;
        for domain in domains {
            let artifacts = ClientArtifacts::new(&self.layout.work_dir, domain);
            if !artifacts.cert.is_file() {
                debug!(domain = %domain, "No client certificate to revoke");
                continue;
            }

            attempted += 1;
            let args = client::revoke_args(
                email,
                credential.client_provider_name(),
                &self.layout.work_dir,
                &artifacts.cert,
            );
            match self.runner.run(&args, &env).await {
                Ok(output) if output.success() => {
                    info!(domain = %domain, "Revoked stale client certificate");
                }
                Ok(output) => {
                    debug!(domain = %domain, output = %output.combined(), "Ignoring revoke failure");
                }
                Err(e) => {
                    debug!(domain = %domain, error = %e, "Ignoring revoke failure");
                }
            }
        }

        Ok(attempted)
    }

    pub fn client_name(&self) -> &str {
        self.runner.name()
    }

    pub fn check_client_installed(&self) -> bool {
        self.runner.is_installed()
    }

    /// Client version line, empty when the client cannot be run
    pub async fn client_version(&self) -> String {
        self.runner.version().await.unwrap_or_default()
    }

    /// Stored path resolved against the data directory
    pub fn resolve(&self, stored: &Path) -> PathBuf {
        if stored.is_absolute() {
            stored.to_path_buf()
        } else {
            self.layout.data_dir.join(stored)
        }
    }

    /// Path relative to the data directory, or unchanged when outside it
    fn relative_to_data(&self, path: &Path) -> PathBuf {
        path.strip_prefix(&self.layout.data_dir)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| path.to_path_buf())
    }

    fn provider(&self, id: &DnsProviderId) -> Result<DnsProvider, AcmeError> {
        self.store
            .get_dns_provider(id)
            .map_err(|e| AcmeError::provider_lookup(id, e))
    }

    /// Validate the client's certificate and key for `domain`, then install them
    ///
    /// Returns the parsed certificate. On any error the installed pair is left
    /// as it was.
    fn install_material(
        &self,
        domain: &str,
        cert_dest: &Path,
        key_dest: &Path,
    ) -> Result<CertificateInfo, AcmeError> {
        let artifacts = ClientArtifacts::new(&self.layout.work_dir, domain);
        for src in [&artifacts.cert, &artifacts.key] {
            if !src.is_file() {
                return Err(AcmeError::MissingArtifact(src.clone()));
            }
        }

        let info = parse_certificate(&artifacts.cert)?;

        let cert_staged = staging_path(cert_dest);
        let key_staged = staging_path(key_dest);
        let staged = copy_file(&artifacts.cert, &cert_staged, false)
            .and_then(|()| copy_file(&artifacts.key, &key_staged, true));
        if let Err(e) = staged {
            let _ = fs::remove_file(&cert_staged);
            let _ = fs::remove_file(&key_staged);
            return Err(e.into());
        }

        fs::rename(&key_staged, key_dest)?;
        fs::rename(&cert_staged, cert_dest)?;

        debug!(
            domain = %domain,
            cert = %cert_dest.display(),
            key = %key_dest.display(),
            not_after = %info.not_after,
            "Installed certificate material"
        );
        Ok(info)
    }

    fn record_failure(&self, cert: &mut Certificate, err: &AcmeError) {
        let message = err.to_string();
        cert.mark_error(message.clone());

        if let Err(e) = self.store.update_certificate(cert) {
            warn!(certificate_id = %cert.id, error = %e, "Failed to record renewal failure");
            return;
        }
        self.append_log(CertificateLog::new(&cert.id, LogAction::Error, message));
    }

    fn append_log(&self, entry: CertificateLog) {
        if let Err(e) = self.store.create_certificate_log(&entry) {
            warn!(
                certificate_id = %entry.certificate_id,
                action = %entry.action,
                error = %e,
                "Failed to append certificate log"
            );
        }
    }
}

impl std::fmt::Debug for CertificateIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateIssuer")
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}

/// Trim, drop empties and duplicates, keep first-seen order
fn dedup_domains(domains: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(domains.len());
    for domain in domains {
        let domain = domain.trim();
        if !domain.is_empty() && !out.iter().any(|d| d == domain) {
            out.push(domain.to_string());
        }
    }
    out
}

fn require_email(email: &str) -> Result<(), AcmeError> {
    if email.trim().is_empty() {
        return Err(AcmeError::MissingEmail);
    }
    Ok(())
}

/// Sibling of `dest` used while its replacement is written
fn staging_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Copy `src` to a fresh file at `dest`
///
/// Private files are created with mode 0600 so their content is never
/// readable by others.
fn copy_file(src: &Path, dest: &Path, private: bool) -> io::Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    match fs::remove_file(dest) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e),
        _ => {}
    }

    let data = fs::read(src)?;
    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        if private {
            options.mode(0o600);
        }
    }
    #[cfg(not(unix))]
    let _ = private;

    let mut file = options.open(dest)?;
    file.write_all(&data)?;
    file.sync_all()
}
