//! Type-safe identifier newtypes for Hop records.
//!
//! Certificates, DNS providers and certificate log entries are all keyed by
//! opaque UUID strings. Wrapping them prevents passing a provider id where a
//! certificate id is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Generate a new random identifier
            pub fn generate() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            /// Wrap an existing identifier string
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_string(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

define_id!(
    /// Certificate record identifier.
    CertificateId
);

define_id!(
    /// DNS provider record identifier.
    ///
    /// Certificates reference the provider that validated them; the provider
    /// may be deleted independently, leaving the reference dangling.
    DnsProviderId
);

define_id!(
    /// Certificate action log entry identifier.
    LogEntryId
);
