//! PEM/X.509 certificate parsing
//!
//! Extracts the fields the certificate record needs after an issuance or
//! renewal. Only the first PEM block is read, which for a chain file written
//! by the ACME client is the leaf certificate.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use thiserror::Error;
use x509_parser::extensions::GeneralName;
use x509_parser::time::ASN1Time;

/// Errors raised while parsing certificate material
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Failed to read certificate {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse PEM in {path:?}: {message}")]
    Pem { path: PathBuf, message: String },

    #[error("Unexpected PEM block '{tag}' in {path:?}, expected CERTIFICATE")]
    NotACertificate { path: PathBuf, tag: String },

    #[error("Invalid X509 certificate {path:?}: {message}")]
    X509 { path: PathBuf, message: String },

    #[error("Certificate {path:?} has an out-of-range validity timestamp")]
    InvalidTimestamp { path: PathBuf },
}

/// Fields extracted from an issued certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateInfo {
    /// Issuer common name, empty when the issuer has none
    pub issuer_common_name: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    /// DNS names from the subject alternative name extension
    pub subject_alt_names: Vec<String>,
}

/// Parse the first certificate of a PEM file
pub fn parse_certificate(path: impl AsRef<Path>) -> Result<CertificateInfo, ParseError> {
    let path = path.as_ref();

    let data = fs::read(path).map_err(|source| ParseError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    parse_certificate_pem(&data).map_err(|e| e.at(path))
}

/// Parse the first certificate of in-memory PEM data
pub fn parse_certificate_pem(data: &[u8]) -> Result<CertificateInfo, ParseError> {
    let pem = pem::parse(data).map_err(|e| ParseError::Pem {
        path: PathBuf::new(),
        message: e.to_string(),
    })?;

    if pem.tag() != "CERTIFICATE" {
        return Err(ParseError::NotACertificate {
            path: PathBuf::new(),
            tag: pem.tag().to_string(),
        });
    }

    let (_, cert) = x509_parser::parse_x509_certificate(pem.contents()).map_err(|e| {
        ParseError::X509 {
            path: PathBuf::new(),
            message: e.to_string(),
        }
    })?;

    let validity = cert.validity();
    let not_before = to_utc(&validity.not_before)?;
    let not_after = to_utc(&validity.not_after)?;

    let issuer_common_name = cert
        .issuer()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .unwrap_or_default()
        .to_string();

    let subject_alt_names = match cert.subject_alternative_name() {
        Ok(Some(san)) => san
            .value
            .general_names
            .iter()
            .filter_map(|name| match name {
                GeneralName::DNSName(dns) => Some(dns.to_string()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    };

    Ok(CertificateInfo {
        issuer_common_name,
        not_before,
        not_after,
        subject_alt_names,
    })
}

fn to_utc(time: &ASN1Time) -> Result<DateTime<Utc>, ParseError> {
    DateTime::from_timestamp(time.timestamp(), 0).ok_or(ParseError::InvalidTimestamp {
        path: PathBuf::new(),
    })
}

impl ParseError {
    /// Attach the source file to an error raised on in-memory data
    fn at(self, file: &Path) -> Self {
        let file = file.to_path_buf();
        match self {
            Self::Read { source, .. } => Self::Read { path: file, source },
            Self::Pem { message, .. } => Self::Pem { path: file, message },
            Self::NotACertificate { tag, .. } => Self::NotACertificate { path: file, tag },
            Self::X509 { message, .. } => Self::X509 { path: file, message },
            Self::InvalidTimestamp { .. } => Self::InvalidTimestamp { path: file },
        }
    }
}
