//! Hop SSL - certificate manager entry point
//!
//! Issues, renews and cleans up DNS-01 certificates for the Hop reverse proxy
//! and runs the background renewal scheduler.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use hop_common::{CertificateId, DnsProviderId};
use hop_config::{generate_default, HopConfig, LogFormat};
use hop_ssl::{
    CertificateIssuer, CertificateService, JsonStore, LegoRunner, ProviderKind, RenewOutcome,
    RenewalScheduler,
};

/// Hop SSL - DNS-01 certificate management for the Hop reverse proxy
#[derive(Parser, Debug)]
#[command(name = "hop-ssl")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short = 'c', long = "config", env = "HOP_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (debug level)
    #[arg(long = "verbose", global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a default configuration file
    Init {
        /// Destination file
        #[arg(default_value = "hop.toml")]
        file: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Run the renewal scheduler until interrupted
    Run,
    /// Show ACME client and certificate status
    Status,
    /// Manage DNS providers
    Provider {
        #[command(subcommand)]
        command: ProviderCommands,
    },
    /// Request a new certificate
    Issue {
        /// DNS provider id
        #[arg(short = 'p', long = "provider")]
        provider: String,

        /// Contact email (defaults to acme.email)
        #[arg(short = 'e', long = "email")]
        email: Option<String>,

        /// Domains, primary first
        #[arg(required = true)]
        domains: Vec<String>,
    },
    /// Renew a certificate now
    Renew {
        id: String,

        /// Contact email (defaults to acme.email)
        #[arg(short = 'e', long = "email")]
        email: Option<String>,
    },
    /// Remove the ACME client's stale files for a certificate
    Cleanup { id: String },
    /// Delete a certificate record
    Delete { id: String },
    /// Show a certificate's action log
    Logs {
        id: String,

        #[arg(short = 'n', long = "limit")]
        limit: Option<usize>,
    },
    /// List certificates due for renewal
    Expiring {
        /// Window in days (defaults to acme.renew_before_days)
        #[arg(short = 'd', long = "days")]
        days: Option<u32>,
    },
    /// List all certificates
    List,
}

#[derive(Subcommand, Debug)]
enum ProviderCommands {
    /// Register a DNS provider
    Add {
        #[arg(long)]
        name: String,

        /// alidns, tencentcloud or cloudflare
        #[arg(long)]
        kind: ProviderKind,

        /// Credential JSON, e.g. '{"apiToken": "..."}'
        #[arg(long)]
        credentials: String,
    },
    /// List DNS providers
    List,
    /// Remove a DNS provider
    Remove { id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Init { file, force } = &cli.command {
        init_tracing("info", LogFormat::Text, cli.verbose);
        return init_config(file, *force);
    }

    let config = load_config(cli.config.as_deref())?;
    init_tracing(&config.logging.level, config.logging.format, cli.verbose);

    let layout = config.layout();
    let store = Arc::new(
        JsonStore::open(&layout.store_file)
            .with_context(|| format!("Failed to open store {}", layout.store_file.display()))?,
    );
    let runner = Arc::new(
        LegoRunner::new(config.acme.client.clone())
            .with_timeout(Duration::from_secs(config.acme.timeout_secs)),
    );
    let issuer = Arc::new(CertificateIssuer::new(store, runner, layout));
    let service = CertificateService::new(Arc::clone(&issuer));

    match cli.command {
        Commands::Init { .. } => Ok(()),
        Commands::Run => run(&config, issuer).await,
        Commands::Status => status(&service).await,
        Commands::Provider { command } => provider(&service, command),
        Commands::Issue {
            provider,
            email,
            domains,
        } => {
            let email = contact_email(email, &config)?;
            let cert = service
                .issue(&domains, &DnsProviderId::new(provider), &email)
                .await
                .context("Certificate issuance failed")?;
            println!(
                "Issued {} ({}), valid until {}",
                cert.primary_domain,
                cert.id,
                cert.not_after.format("%Y-%m-%d")
            );
            Ok(())
        }
        Commands::Renew { id, email } => {
            let email = contact_email(email, &config)?;
            match service
                .renew(&CertificateId::new(id), &email)
                .await
                .context("Certificate renewal failed")?
            {
                RenewOutcome::Renewed => println!("Certificate renewed"),
                RenewOutcome::NotDue => println!("Certificate is not due for renewal"),
            }
            Ok(())
        }
        Commands::Cleanup { id } => {
            let removed = service.cleanup(&CertificateId::new(id))?;
            println!("Removed {removed} ACME client file(s)");
            Ok(())
        }
        Commands::Delete { id } => {
            service.delete(&CertificateId::new(id))?;
            println!("Certificate deleted");
            Ok(())
        }
        Commands::Logs { id, limit } => {
            for entry in service.get_logs(&CertificateId::new(id), limit)? {
                println!(
                    "{}  {:<8} {}",
                    entry.created_at.format("%Y-%m-%d %H:%M:%S"),
                    entry.action,
                    entry.message
                );
            }
            Ok(())
        }
        Commands::Expiring { days } => {
            let days = days.unwrap_or(config.acme.renew_before_days);
            print_certificates(&service.list_expiring_soon(days)?);
            Ok(())
        }
        Commands::List => {
            print_certificates(&service.list_certificates()?);
            Ok(())
        }
    }
}

fn init_tracing(level: &str, format: LogFormat, verbose: bool) {
    let level = if verbose { "debug" } else { level };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

fn init_config(file: &Path, force: bool) -> Result<()> {
    if file.exists() && !force {
        bail!("{} already exists, use --force to overwrite", file.display());
    }
    fs::write(file, generate_default())
        .with_context(|| format!("Failed to write {}", file.display()))?;
    println!("Wrote default configuration to {}", file.display());
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<HopConfig> {
    match path {
        Some(path) => HopConfig::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display())),
        None => {
            let mut config = HopConfig::default();
            config
                .prepare_data_dir(None)
                .context("Failed to prepare default data directory")?;
            Ok(config)
        }
    }
}

fn contact_email(explicit: Option<String>, config: &HopConfig) -> Result<String> {
    explicit
        .or_else(|| config.acme.email.clone())
        .context("No contact email: pass --email or set acme.email")
}

async fn run(config: &HopConfig, issuer: Arc<CertificateIssuer>) -> Result<()> {
    if !issuer.check_client_installed() {
        warn!(client = %config.acme.client, "ACME client not found, renewals will fail");
    }

    let handle = if config.acme.auto_renew {
        let email = config.acme.email.clone().unwrap_or_default();
        if email.is_empty() {
            warn!("acme.email is not set, renewal sweeps will be skipped");
        }
        let scheduler = RenewalScheduler::new(issuer, email, config.acme.renew_before_days)
            .with_interval(Duration::from_secs(config.acme.check_interval_hours * 3600));
        Some(scheduler.start())
    } else {
        info!("Automatic renewal disabled");
        None
    };

    info!("hop-ssl running, press Ctrl+C to stop");
    shutdown_signal().await?;

    if let Some(handle) = handle {
        handle.stop().await;
    }
    info!("hop-ssl stopped");
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM"),
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl+C")?;
            info!("Received SIGINT");
        }
    }
    Ok(())
}

#[cfg(not(unix))]
async fn shutdown_signal() -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    info!("Received Ctrl+C");
    Ok(())
}

async fn status(service: &CertificateService) -> Result<()> {
    let installed = service.check_client_installed();
    let version = service.client_version().await;
    let certs = service.list_certificates()?;
    let now = Utc::now();

    println!(
        "ACME client: {}",
        match (installed, version.is_empty()) {
            (false, _) => "not installed".to_string(),
            (true, true) => "installed".to_string(),
            (true, false) => version,
        }
    );
    println!("Certificates: {}", certs.len());
    for status in ["active", "expired", "error", "pending"] {
        let count = certs
            .iter()
            .filter(|c| c.effective_status(now).to_string() == status)
            .count();
        if count > 0 {
            println!("  {status}: {count}");
        }
    }
    Ok(())
}

fn provider(service: &CertificateService, command: ProviderCommands) -> Result<()> {
    match command {
        ProviderCommands::Add {
            name,
            kind,
            credentials,
        } => {
            let provider = service.create_dns_provider(&name, kind, &credentials)?;
            println!("Created DNS provider {} ({})", provider.name, provider.id);
        }
        ProviderCommands::List => {
            for p in service.list_dns_providers()? {
                println!("{}  {:<12} {}", p.id, p.kind, p.name);
            }
        }
        ProviderCommands::Remove { id } => {
            service.delete_dns_provider(&DnsProviderId::new(id))?;
            println!("DNS provider removed");
        }
    }
    Ok(())
}

fn print_certificates(certs: &[hop_ssl::Certificate]) {
    let now = Utc::now();
    for cert in certs {
        println!(
            "{}  {:<30} {:<8} {:>4}d  {}",
            cert.id,
            cert.primary_domain,
            cert.effective_status(now),
            cert.days_remaining(now),
            cert.error_message.as_deref().unwrap_or("")
        );
    }
}
