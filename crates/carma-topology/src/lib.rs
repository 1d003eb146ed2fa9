//! # carma-topology
//!
//! Topology derivation for the CARMA overlay.
//!
//! Every node holds the same global parameters and phonebook and derives,
//! independently and deterministically, the same buckets, multicast
//! groups, layers and neighbor sets as every other node. Derived values
//! are computed lazily on first use, cached, and dropped again by
//! `clear_deducible` whenever their inputs change.
//!
//! ## Modules
//!
//! - [`global`]: network-wide parameters and their validation
//! - [`rangegen`]: topology-shape tables indexed by server count
//! - [`store`]: the byte store seam and its filesystem/in-memory backends
//! - [`memo`]: install-once cells for derived values
//! - [`entry`]: public phonebook entries and their role-gated state
//! - [`phonebook`]: the lazily loaded phonebook
//! - [`local`]: the owning node's private view and neighbor sets
//! - [`bootstrap`]: bootstrap handoff parameters
//! - [`config`]: the per-node configuration directory as a whole

pub mod bootstrap;
pub mod config;
pub mod entry;
pub mod global;
mod json;
pub mod local;
pub mod memo;
pub mod phonebook;
pub mod rangegen;
pub mod store;

use carma_crypto::CryptoError;
use carma_types::{Psn, PsnHash, PsnSet, Role, TypesError};

pub use bootstrap::BootstrapConfig;
pub use config::Config;
pub use entry::{BucketSets, EntryRole, MailboxRole, McPosition, PhonebookEntry};
pub use global::GlobalConfig;
pub use local::{LocalConfig, LocalRole};
pub use phonebook::Phonebook;
pub use store::{ByteStore, FsStore, MemoryStore};

/// Error types for topology configuration and derivation.
#[derive(Debug, thiserror::Error)]
pub enum TopologyError {
    /// Parameters are individually well formed but do not fit together.
    #[error("configuration error: {0}")]
    Config(String),

    /// Malformed input, annotated with the file and key it came from.
    #[error("{context}: {reason}")]
    Parse { context: String, reason: String },

    /// Stored data contradicts itself.
    #[error("corruption detected: {0}")]
    Corruption(String),

    /// A PSN was referenced that the phonebook does not know.
    #[error("PSN not in phonebook: \"{0}\"")]
    NotFound(Psn),

    /// No phonebook PSN hashes to the given value.
    #[error("PSN hash not in phonebook: {0}")]
    HashNotFound(PsnHash),

    /// A role-gated value was requested from a node of another role.
    #[error("node \"{psn}\" has role {role}, which has no {field}")]
    WrongRole {
        psn: Psn,
        role: Role,
        field: &'static str,
    },

    /// The byte store failed.
    #[error("byte store error at {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Types(#[from] TypesError),
}

impl TopologyError {
    pub(crate) fn parse(context: impl Into<String>, reason: impl ToString) -> Self {
        TopologyError::Parse {
            context: context.into(),
            reason: reason.to_string(),
        }
    }

    /// Prefix the error with the file or object it was raised inside.
    ///
    /// Type and crypto errors raised while parsing become parse errors so
    /// that the caller always learns where the bad input lives.
    pub fn within(self, outer: &str) -> Self {
        match self {
            TopologyError::Parse { context, reason } => TopologyError::Parse {
                context: format!("{outer}: {context}"),
                reason,
            },
            TopologyError::Types(e) => TopologyError::parse(outer, e),
            TopologyError::Crypto(e) => TopologyError::parse(outer, e),
            TopologyError::NotFound(psn) => {
                TopologyError::parse(outer, format!("PSN not in phonebook: \"{psn}\""))
            }
            other => other,
        }
    }
}

/// Result type alias for topology operations.
pub type Result<T> = std::result::Result<T, TopologyError>;

/// Read-only inputs every derivation needs.
///
/// Passed explicitly into derivations instead of entries pointing back at
/// their phonebook.
#[derive(Clone, Copy)]
pub struct Topology<'a> {
    pub global: &'a GlobalConfig,
    pub phonebook: &'a Phonebook,
}

impl<'a> Topology<'a> {
    pub fn new(global: &'a GlobalConfig, phonebook: &'a Phonebook) -> Self {
        Self { global, phonebook }
    }

    /// Full scan: every phonebook entry for which `keep` holds.
    pub(crate) fn scan(&self, keep: impl Fn(&PhonebookEntry) -> Result<bool>) -> Result<PsnSet> {
        let mut found = PsnSet::new();
        for entry in self.phonebook.entries(self.global)? {
            if keep(&entry)? {
                found.insert(entry.psn().clone());
            }
        }
        Ok(found)
    }

    /// Full scan by role.
    pub(crate) fn scan_role(&self, role: Role) -> Result<PsnSet> {
        self.scan(|entry| Ok(entry.role() == role))
    }
}
