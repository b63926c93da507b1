//! Shared types for the Hop certificate manager crates.

pub mod ids;

pub use ids::{CertificateId, DnsProviderId, LogEntryId};
