//! Hop SSL Library
//!
//! Certificate lifecycle management for the Hop reverse proxy. Certificates
//! are obtained through DNS-01 challenges by an external ACME client (lego),
//! installed into the managed SSL directory and renewed in the background.
//!
//! - **DNS Providers**: Typed credentials for AliDNS, Tencent Cloud and Cloudflare
//! - **Issuance**: Serialized client runs, failure classification, PEM install
//! - **Renewal**: Periodic sweep of certificates inside the renewal window
//! - **Cleanup**: Forced removal of stale client artifacts
//! - **Persistence**: Certificate, provider and audit log records
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────┐     ┌───────────────────┐     ┌──────────────────┐
//! │ CertificateService │────▶│ CertificateIssuer │────▶│ AcmeClientRunner │──▶ lego
//! └────────────────────┘     └─────────┬─────────┘     └──────────────────┘
//!                              ▲       │
//! ┌────────────────────┐       │       ▼
//! │  RenewalScheduler  │───────┘  ┌──────────────────┐
//! └────────────────────┘          │ CertificateStore │
//!                                 └──────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use hop_config::DataLayout;
//! use hop_ssl::{CertificateIssuer, CertificateService, JsonStore, LegoRunner};
//!
//! let layout = DataLayout::new("/var/lib/hop");
//! let store = Arc::new(JsonStore::open(&layout.store_file)?);
//! let issuer = Arc::new(CertificateIssuer::new(store, Arc::new(LegoRunner::new("lego")), layout));
//! let service = CertificateService::new(issuer);
//!
//! let cert = service
//!     .issue(&["example.com".into()], &provider_id, "ops@example.com")
//!     .await?;
//! ```

// ============================================================================
// Module Declarations
// ============================================================================

pub mod cleanup;
pub mod client;
pub mod error;
pub mod issuer;
pub mod parse;
pub mod provider;
pub mod scheduler;
pub mod service;
pub mod store;

// ============================================================================
// Public API Re-exports
// ============================================================================

// Errors
pub use error::AcmeError;

// DNS providers
pub use provider::{DecodeError, DnsProvider, ProviderCredential, ProviderKind};

// Persistence
pub use store::{
    Certificate, CertificateLog, CertificateStatus, CertificateStore, JsonStore, LogAction,
    StoreError,
};

// ACME client
pub use client::{classify_failure, AcmeClientRunner, ClientFailure, ClientOutput, LegoRunner};

// Issuance and renewal
pub use issuer::{CertificateIssuer, RenewOutcome};
pub use scheduler::{RenewalScheduler, SchedulerHandle, SweepSummary};

// Parsing and cleanup
pub use cleanup::domain_token;
pub use parse::{parse_certificate, CertificateInfo, ParseError};

// Facade
pub use service::{CertificatePaths, CertificateService, DnsProviderSummary, DnsProviderUpdate};
