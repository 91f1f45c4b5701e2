//! Compiled object archive surgery.
//!
//! Go object files are Unix `ar` archives. This crate reads and appends
//! archive members (the supplemental obfuscation metadata travels as extra
//! members), extracts the per-compilation action ID from the embedded build
//! ID string, and performs the link-time rewrite of private package paths.

pub mod archive;
pub mod imports;

pub use archive::{
    action_id_of, append_member, decode_hash, extract_member, split_action_id, write_archive,
};
pub use imports::rewrite_import_paths;

/// Errors from object archive surgery.
#[derive(Debug, thiserror::Error)]
pub enum ArxError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{path}: not an archive file")]
    NotAnArchive { path: String },
    #[error("{path}: malformed archive member header")]
    MalformedHeader { path: String },
    #[error("{path}: could not find build id")]
    MissingBuildId { path: String },
    #[error("replacement for {0:?} changes its length")]
    LengthMismatch(String),
}
