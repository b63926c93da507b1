//! External ACME client invocation
//!
//! The ACME protocol itself is delegated to an external client (lego). This
//! module builds its command lines, runs it behind the [`AcmeClientRunner`]
//! seam and classifies failed runs from their output.
//!
//! ```text
//! issue:  lego --accept-tos --email E --dns P --path W --dns.disable-cp --domains D... run
//! renew:  lego --accept-tos --email E --dns P --path W --domains D... renew --days 30 --renew-hook true
//! revoke: lego --email E --dns P --path W revoke --cert F
//! ```

use std::collections::BTreeMap;
use std::env;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, trace, warn};

use crate::error::AcmeError;

/// Renewal threshold handed to the client's `renew --days`
pub const RENEW_DAYS: u32 = 30;

/// Renew hook that does nothing; the issuer copies material itself
const RENEW_HOOK: &str = "true";

/// Default bound on a single client run
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(900);

/// Captured result of one client run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientOutput {
    /// Exit code, `None` when killed by a signal
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ClientOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Stderr followed by stdout, trimmed
    pub fn combined(&self) -> String {
        let stderr = self.stderr.trim();
        let stdout = self.stdout.trim();
        match (stderr.is_empty(), stdout.is_empty()) {
            (true, _) => stdout.to_string(),
            (false, true) => stderr.to_string(),
            (false, false) => format!("{stderr}\n{stdout}"),
        }
    }
}

/// Runs the external ACME client
///
/// Implementations inherit the current process environment and add `env` on
/// top of it.
#[async_trait]
pub trait AcmeClientRunner: Send + Sync {
    async fn run(
        &self,
        args: &[String],
        env: &BTreeMap<String, String>,
    ) -> Result<ClientOutput, AcmeError>;

    /// Client name for messages
    fn name(&self) -> &str {
        "acme-client"
    }

    /// Whether the client can be started
    fn is_installed(&self) -> bool {
        true
    }

    /// First non-empty line of `--version`, if the client answers
    async fn version(&self) -> Option<String> {
        let output = self
            .run(&["--version".to_string()], &BTreeMap::new())
            .await
            .ok()?;
        if !output.success() {
            return None;
        }
        output
            .stdout
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string)
    }
}

/// Runner for a real client binary
#[derive(Debug, Clone)]
pub struct LegoRunner {
    binary: String,
    timeout: Duration,
}

impl LegoRunner {
    /// `binary` is either an absolute path or a name looked up on `PATH`
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Kill the client when a run exceeds `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl AcmeClientRunner for LegoRunner {
    async fn run(
        &self,
        args: &[String],
        env: &BTreeMap<String, String>,
    ) -> Result<ClientOutput, AcmeError> {
        debug!(
            client = %self.binary,
            args = ?args,
            env_keys = ?env.keys().collect::<Vec<_>>(),
            "Invoking ACME client"
        );

        let child = Command::new(&self.binary)
            .args(args)
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AcmeError::ClientUnavailable {
                client: self.binary.clone(),
                reason: e.to_string(),
            })?;

        // Dropping the wait future on timeout kills the child
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(
                    client = %self.binary,
                    timeout_secs = self.timeout.as_secs(),
                    "ACME client timed out, killing process"
                );
                return Err(AcmeError::Timeout(self.timeout));
            }
        };

        let output = ClientOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        trace!(status = ?output.status, "ACME client exited");
        Ok(output)
    }

    fn name(&self) -> &str {
        &self.binary
    }

    fn is_installed(&self) -> bool {
        let binary = Path::new(&self.binary);
        if binary.components().count() > 1 {
            return binary.is_file();
        }

        env::var_os("PATH")
            .map(|paths| env::split_paths(&paths).any(|dir| dir.join(binary).is_file()))
            .unwrap_or(false)
    }
}

fn common_args(email: &str, provider: &str, work_dir: &Path) -> Vec<String> {
    vec![
        "--email".to_string(),
        email.to_string(),
        "--dns".to_string(),
        provider.to_string(),
        "--path".to_string(),
        work_dir.display().to_string(),
    ]
}

fn push_domains(args: &mut Vec<String>, domains: &[String]) {
    for domain in domains {
        args.push("--domains".to_string());
        args.push(domain.clone());
    }
}

/// Arguments for a fresh issuance
///
/// Propagation checks are disabled to keep turnaround short.
pub fn issue_args(email: &str, provider: &str, work_dir: &Path, domains: &[String]) -> Vec<String> {
    let mut args = vec!["--accept-tos".to_string()];
    args.extend(common_args(email, provider, work_dir));
    args.push("--dns.disable-cp".to_string());
    push_domains(&mut args, domains);
    args.push("run".to_string());
    args
}

/// Arguments for a renewal
pub fn renew_args(email: &str, provider: &str, work_dir: &Path, domains: &[String]) -> Vec<String> {
    let mut args = vec!["--accept-tos".to_string()];
    args.extend(common_args(email, provider, work_dir));
    push_domains(&mut args, domains);
    args.extend([
        "renew".to_string(),
        "--days".to_string(),
        RENEW_DAYS.to_string(),
        "--renew-hook".to_string(),
        RENEW_HOOK.to_string(),
    ]);
    args
}

/// Arguments for revoking a previously issued certificate
pub fn revoke_args(email: &str, provider: &str, work_dir: &Path, cert_file: &Path) -> Vec<String> {
    let mut args = common_args(email, provider, work_dir);
    args.extend([
        "revoke".to_string(),
        "--cert".to_string(),
        cert_file.display().to_string(),
    ]);
    args
}

/// Failure class of an unsuccessful client run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientFailure {
    /// A challenge TXT record from an earlier attempt is still published
    ValidationConflict,
    /// DNS provider API refused the credentials
    Credential,
    /// CA or DNS API rate limiting
    Throttled,
    Other,
}

/// Substring rules, checked in order against lowercased output
const FAILURE_RULES: &[(&str, ClientFailure)] = &[
    ("already exists", ClientFailure::ValidationConflict),
    ("已存在", ClientFailure::ValidationConflict),
    ("authentication", ClientFailure::Credential),
    ("unauthorized", ClientFailure::Credential),
    ("rate limit", ClientFailure::Throttled),
    ("too many", ClientFailure::Throttled),
];

/// Classify the combined output of a failed client run
pub fn classify_failure(output: &str) -> ClientFailure {
    let output = output.to_lowercase();
    FAILURE_RULES
        .iter()
        .find(|(needle, _)| output.contains(needle))
        .map(|(_, class)| *class)
        .unwrap_or(ClientFailure::Other)
}

impl ClientFailure {
    pub fn into_error(self, domain: &str, output: &str) -> AcmeError {
        let domain = domain.to_string();
        match self {
            Self::ValidationConflict => AcmeError::ValidationConflict { domain },
            Self::Credential => AcmeError::Credential { domain },
            Self::Throttled => AcmeError::Throttled { domain },
            Self::Other => AcmeError::Issuance {
                domain,
                output: output.to_string(),
            },
        }
    }
}

/// Whether a renew run reported the certificate is not yet due
pub fn is_no_renewal(output: &ClientOutput) -> bool {
    output.combined().to_lowercase().contains("no renewal")
}
