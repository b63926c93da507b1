//! JSON file backed certificate store
//!
//! Holds every record in memory behind a read-write lock and, when opened
//! with a path, rewrites the whole document on each mutation. The document is
//! written to a temporary sibling and renamed into place so a crash never
//! leaves a truncated store.
//!
//! ```text
//! data/
//! └── hop-ssl.json    # {"dnsProviders": [...], "certificates": [...], "logs": [...]}
//! ```

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

use hop_common::{CertificateId, DnsProviderId};

use super::{Certificate, CertificateLog, CertificateStore, StoreError, StoreResult};
use crate::provider::DnsProvider;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoreState {
    #[serde(default)]
    dns_providers: Vec<DnsProvider>,
    #[serde(default)]
    certificates: Vec<Certificate>,
    /// Insertion order
    #[serde(default)]
    logs: Vec<CertificateLog>,
}

/// Certificate store persisted as a single JSON document
#[derive(Debug)]
pub struct JsonStore {
    path: Option<PathBuf>,
    state: RwLock<StoreState>,
}

impl JsonStore {
    /// Open or create a store file
    ///
    /// Creates the parent directory if needed. A missing file yields an
    /// empty store; the file is written on the first mutation.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let state = if path.exists() {
            let content = fs::read_to_string(path)?;
            serde_json::from_str(&content)?
        } else {
            trace!(path = %path.display(), "No store file yet, starting empty");
            StoreState::default()
        };

        info!(
            path = %path.display(),
            certificates = state.certificates.len(),
            dns_providers = state.dns_providers.len(),
            "Opened certificate store"
        );

        Ok(Self {
            path: Some(path.to_path_buf()),
            state: RwLock::new(state),
        })
    }

    /// Create a store that is never written to disk
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: RwLock::new(StoreState::default()),
        }
    }

    /// Path of the backing file, if any
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Apply a mutation and persist it
    ///
    /// The in-memory state only changes once the new document is on disk.
    fn mutate<T>(&self, f: impl FnOnce(&mut StoreState) -> StoreResult<T>) -> StoreResult<T> {
        let mut state = self.state.write();
        let mut next = state.clone();
        let out = f(&mut next)?;
        self.persist(&next)?;
        *state = next;
        Ok(out)
    }

    fn persist(&self, state: &StoreState) -> StoreResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let content = serde_json::to_string_pretty(state)?;
        let tmp_path = path.with_extension("json.tmp");

        // A leftover temp file would keep its old mode
        match fs::remove_file(&tmp_path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e.into()),
            _ => {}
        }

        let mut options = fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(&tmp_path)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
        drop(file);

        fs::rename(&tmp_path, path)?;
        trace!(path = %path.display(), "Persisted certificate store");
        Ok(())
    }
}

fn provider_not_found(id: &DnsProviderId) -> StoreError {
    StoreError::NotFound {
        entity: "DNS provider",
        id: id.to_string(),
    }
}

fn certificate_not_found(id: &CertificateId) -> StoreError {
    StoreError::NotFound {
        entity: "certificate",
        id: id.to_string(),
    }
}

impl CertificateStore for JsonStore {
    fn create_dns_provider(&self, provider: &DnsProvider) -> StoreResult<()> {
        self.mutate(|state| {
            if state.dns_providers.iter().any(|p| p.id == provider.id) {
                return Err(StoreError::Duplicate {
                    entity: "DNS provider",
                    id: provider.id.to_string(),
                });
            }
            let now = Utc::now();
            let mut record = provider.clone();
            record.created_at = now;
            record.updated_at = now;
            state.dns_providers.push(record);
            Ok(())
        })?;

        debug!(provider_id = %provider.id, kind = %provider.kind, "Created DNS provider");
        Ok(())
    }

    fn update_dns_provider(&self, provider: &DnsProvider) -> StoreResult<()> {
        self.mutate(|state| {
            let existing = state
                .dns_providers
                .iter_mut()
                .find(|p| p.id == provider.id)
                .ok_or_else(|| provider_not_found(&provider.id))?;
            let created_at = existing.created_at;
            *existing = provider.clone();
            existing.created_at = created_at;
            existing.updated_at = Utc::now();
            Ok(())
        })
    }

    fn get_dns_provider(&self, id: &DnsProviderId) -> StoreResult<DnsProvider> {
        self.state
            .read()
            .dns_providers
            .iter()
            .find(|p| &p.id == id)
            .cloned()
            .ok_or_else(|| provider_not_found(id))
    }

    fn list_dns_providers(&self) -> StoreResult<Vec<DnsProvider>> {
        let mut providers = self.state.read().dns_providers.clone();
        providers.reverse();
        providers.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(providers)
    }

    fn delete_dns_provider(&self, id: &DnsProviderId) -> StoreResult<()> {
        self.mutate(|state| {
            let before = state.dns_providers.len();
            state.dns_providers.retain(|p| &p.id != id);
            if state.dns_providers.len() == before {
                return Err(provider_not_found(id));
            }
            Ok(())
        })?;

        debug!(provider_id = %id, "Deleted DNS provider");
        Ok(())
    }

    fn create_certificate(&self, cert: &Certificate) -> StoreResult<()> {
        self.mutate(|state| {
            if state.certificates.iter().any(|c| c.id == cert.id) {
                return Err(StoreError::Duplicate {
                    entity: "certificate",
                    id: cert.id.to_string(),
                });
            }
            let now = Utc::now();
            let mut record = cert.clone();
            record.created_at = now;
            record.updated_at = now;
            state.certificates.push(record);
            Ok(())
        })?;

        debug!(
            certificate_id = %cert.id,
            domain = %cert.primary_domain,
            "Created certificate record"
        );
        Ok(())
    }

    fn update_certificate(&self, cert: &Certificate) -> StoreResult<()> {
        self.mutate(|state| {
            let existing = state
                .certificates
                .iter_mut()
                .find(|c| c.id == cert.id)
                .ok_or_else(|| certificate_not_found(&cert.id))?;
            let created_at = existing.created_at;
            *existing = cert.clone();
            existing.created_at = created_at;
            existing.updated_at = Utc::now();
            Ok(())
        })?;

        trace!(certificate_id = %cert.id, status = %cert.status, "Updated certificate record");
        Ok(())
    }

    fn get_certificate(&self, id: &CertificateId) -> StoreResult<Certificate> {
        self.state
            .read()
            .certificates
            .iter()
            .find(|c| &c.id == id)
            .cloned()
            .ok_or_else(|| certificate_not_found(id))
    }

    fn get_certificate_by_domain(&self, domain: &str) -> StoreResult<Option<Certificate>> {
        Ok(self
            .state
            .read()
            .certificates
            .iter()
            .find(|c| c.primary_domain == domain)
            .cloned())
    }

    fn list_certificates(&self) -> StoreResult<Vec<Certificate>> {
        let mut certs = self.state.read().certificates.clone();
        certs.reverse();
        certs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(certs)
    }

    fn delete_certificate(&self, id: &CertificateId) -> StoreResult<()> {
        let removed_logs = self.mutate(|state| {
            let before = state.certificates.len();
            state.certificates.retain(|c| &c.id != id);
            if state.certificates.len() == before {
                return Err(certificate_not_found(id));
            }
            let logs_before = state.logs.len();
            state.logs.retain(|l| &l.certificate_id != id);
            Ok(logs_before - state.logs.len())
        })?;

        debug!(certificate_id = %id, removed_logs, "Deleted certificate record");
        Ok(())
    }

    fn create_certificate_log(&self, entry: &CertificateLog) -> StoreResult<()> {
        self.mutate(|state| {
            if !state.certificates.iter().any(|c| c.id == entry.certificate_id) {
                return Err(certificate_not_found(&entry.certificate_id));
            }
            state.logs.push(entry.clone());
            Ok(())
        })?;

        trace!(
            certificate_id = %entry.certificate_id,
            action = %entry.action,
            "Appended certificate log entry"
        );
        Ok(())
    }

    fn get_certificate_logs(
        &self,
        certificate_id: &CertificateId,
        limit: usize,
    ) -> StoreResult<Vec<CertificateLog>> {
        let state = self.state.read();

        // Reverse insertion order first so the stable sort keeps the newest
        // of equal timestamps on top.
        let mut logs: Vec<CertificateLog> = state
            .logs
            .iter()
            .rev()
            .filter(|l| &l.certificate_id == certificate_id)
            .cloned()
            .collect();
        logs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        logs.truncate(limit);
        Ok(logs)
    }
}
