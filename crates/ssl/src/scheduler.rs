//! Background certificate renewal scheduler
//!
//! Sweeps the store for active, auto-renewing certificates inside the renewal
//! window and renews them one at a time. The first sweep runs as soon as the
//! scheduler starts.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::issuer::{CertificateIssuer, RenewOutcome};

/// Default check interval (24 hours)
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(24 * 3600);

/// Minimum check interval (1 hour)
pub const MIN_CHECK_INTERVAL: Duration = Duration::from_secs(3600);

/// Counts from one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub candidates: usize,
    pub renewed: usize,
    pub not_due: usize,
    pub failed: usize,
}

/// Periodic renewal of expiring certificates
pub struct RenewalScheduler {
    issuer: Arc<CertificateIssuer>,
    /// Contact email, replaceable while running
    email: Arc<ArcSwap<String>>,
    renew_before_days: u32,
    check_interval: Duration,
}

impl RenewalScheduler {
    pub fn new(issuer: Arc<CertificateIssuer>, email: impl Into<String>, renew_before_days: u32) -> Self {
        Self {
            issuer,
            email: Arc::new(ArcSwap::from_pointee(email.into())),
            renew_before_days,
            check_interval: DEFAULT_CHECK_INTERVAL,
        }
    }

    /// Set the check interval
    ///
    /// The interval is clamped to a minimum of 1 hour.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval.max(MIN_CHECK_INTERVAL);
        self
    }

    pub fn check_interval(&self) -> Duration {
        self.check_interval
    }

    /// Spawn the sweep loop
    ///
    /// Consumes the scheduler; once stopped it cannot be restarted.
    pub fn start(self) -> SchedulerHandle {
        let (stop_tx, stop_rx) = oneshot::channel();
        let email = Arc::clone(&self.email);
        let task = tokio::spawn(self.run(stop_rx));

        SchedulerHandle {
            stop_tx: Some(stop_tx),
            task,
            email,
        }
    }

    async fn run(self, mut stop_rx: oneshot::Receiver<()>) {
        info!(
            check_interval_secs = self.check_interval.as_secs(),
            renew_before_days = self.renew_before_days,
            "Starting certificate renewal scheduler"
        );

        let mut ticker = interval(self.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = &mut stop_rx => break,
                _ = ticker.tick() => {
                    self.sweep().await;
                }
            }
        }

        info!("Certificate renewal scheduler stopped");
    }

    /// Renew every certificate currently inside the renewal window
    ///
    /// Failures are logged per certificate and never stop the sweep.
    pub async fn sweep(&self) -> SweepSummary {
        let mut summary = SweepSummary::default();

        let email = self.email.load_full();
        if email.trim().is_empty() {
            warn!("No contact email configured, skipping renewal sweep");
            return summary;
        }

        let candidates = match self
            .issuer
            .store()
            .list_certificates_expiring_soon(self.renew_before_days)
        {
            Ok(certs) => certs,
            Err(e) => {
                error!(error = %e, "Failed to list certificates due for renewal");
                return summary;
            }
        };

        summary.candidates = candidates.len();
        if candidates.is_empty() {
            debug!("No certificates due for renewal");
            return summary;
        }

        info!(count = candidates.len(), "Found certificates due for renewal");
        let started = Instant::now();

        for cert in &candidates {
            match self.issuer.renew(&cert.id, &email).await {
                Ok(RenewOutcome::Renewed) => summary.renewed += 1,
                Ok(RenewOutcome::NotDue) => summary.not_due += 1,
                Err(e) if e.is_transient() => {
                    summary.failed += 1;
                    warn!(domain = %cert.primary_domain, error = %e, "Certificate renewal deferred");
                }
                Err(e) => {
                    summary.failed += 1;
                    error!(domain = %cert.primary_domain, error = %e, "Certificate renewal failed");
                }
            }
        }

        info!(
            renewed = summary.renewed,
            not_due = summary.not_due,
            failed = summary.failed,
            elapsed_secs = started.elapsed().as_secs(),
            "Renewal sweep completed"
        );

        summary
    }
}

impl std::fmt::Debug for RenewalScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenewalScheduler")
            .field("check_interval", &self.check_interval)
            .field("renew_before_days", &self.renew_before_days)
            .finish()
    }
}

/// Handle to a running scheduler
#[derive(Debug)]
pub struct SchedulerHandle {
    stop_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
    email: Arc<ArcSwap<String>>,
}

impl SchedulerHandle {
    /// Replace the contact email used by subsequent renewals
    pub fn set_email(&self, email: impl Into<String>) {
        self.email.store(Arc::new(email.into()));
    }

    pub fn email(&self) -> String {
        String::clone(&self.email.load())
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Signal the loop to stop and wait for it to exit
    ///
    /// A sweep in progress finishes first.
    pub async fn stop(mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.task).await {
            warn!(error = %e, "Renewal scheduler task ended abnormally");
        }
    }
}
