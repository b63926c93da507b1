//! ACME client artifact naming and forced cleanup
//!
//! The client keeps four files per certificate under
//! `<work_dir>/certificates/`, named after the domain token:
//!
//! ```text
//! lego/certificates/
//! ├── _.example.com.crt          # Leaf + chain
//! ├── _.example.com.key          # Private key
//! ├── _.example.com.json         # Client resource metadata
//! └── _.example.com.issuer.crt   # Issuer chain
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

/// Filesystem-safe name the ACME client uses for a domain
///
/// Wildcard labels are stored with `*` replaced by `_`.
pub fn domain_token(domain: &str) -> String {
    domain.replace('*', "_")
}

/// Locations of the ACME client's files for one domain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientArtifacts {
    pub cert: PathBuf,
    pub key: PathBuf,
    pub metadata: PathBuf,
    pub issuer: PathBuf,
}

impl ClientArtifacts {
    pub fn new(work_dir: &Path, domain: &str) -> Self {
        let dir = work_dir.join("certificates");
        let token = domain_token(domain);
        Self {
            cert: dir.join(format!("{token}.crt")),
            key: dir.join(format!("{token}.key")),
            metadata: dir.join(format!("{token}.json")),
            issuer: dir.join(format!("{token}.issuer.crt")),
        }
    }

    pub fn all(&self) -> [&Path; 4] {
        [&self.cert, &self.key, &self.metadata, &self.issuer]
    }
}

/// Remove the ACME client's artifacts for a domain
///
/// Missing files are ignored and other removal errors are logged, so this
/// never fails. Returns the number of files actually removed.
pub fn remove_artifacts(work_dir: &Path, domain: &str) -> usize {
    let artifacts = ClientArtifacts::new(work_dir, domain);
    let mut removed = 0;

    for file in artifacts.all() {
        match fs::remove_file(file) {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(file = %file.display(), error = %e, "Failed to remove ACME client artifact");
            }
        }
    }

    info!(
        domain = %domain,
        token = %domain_token(domain),
        removed,
        "Cleaned up ACME client artifacts"
    );

    removed
}
