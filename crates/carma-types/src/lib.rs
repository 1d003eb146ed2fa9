//! # carma-types
//!
//! Identity and role types shared by every CARMA crate.
//!
//! ## Modules
//!
//! - [`psn`]: persona identifiers and their filesystem-safe slugs
//! - [`hash`]: short persona hashes used to address nodes
//! - [`role`]: the closed set of node roles

pub mod hash;
pub mod psn;
pub mod role;

pub use hash::PsnHash;
pub use psn::{slugify, unslugify, Psn, PsnSet};
pub use role::Role;

/// Count or index of nodes in a deployment.
pub type NodeCount = u32;

/// Error types for identity and role parsing.
#[derive(Debug, thiserror::Error)]
pub enum TypesError {
    /// A slug decoded to bytes that are not valid UTF-8.
    #[error("invalid slug: {0:?}")]
    InvalidSlug(String),

    /// A role string outside the closed role set.
    #[error("unknown role: {0:?}")]
    UnknownRole(String),

    /// Bytes that do not decode as a PSN hash.
    #[error("invalid PSN hash: {0}")]
    InvalidHash(String),
}

/// Result type alias for type-level parsing.
pub type Result<T> = std::result::Result<T, TypesError>;
