//! Shared foundation for the garble toolchain wrapper.
//!
//! Three concerns live here because both the driver process and every
//! tool-hook child process need them:
//! - [`hash`]: deterministic identifier renaming keyed by action IDs.
//! - [`private`]: the privacy predicate deciding which package paths are
//!   subject to obfuscation.
//! - [`cache`]: the options/listed-packages blob persisted by the driver and
//!   re-loaded by each hook.

pub mod cache;
pub mod hash;
pub mod private;

pub use cache::{CacheError, ListedPackage, Options, SharedCache};
pub use hash::{hash_with, hash_with_len, rename_key, rng_seed};
pub use private::{is_private, matching_pattern, PrivateError};

/// Name of the archive member holding the compressed obfuscated sources.
/// Archive member names are capped at 16 bytes; this literal is 15.
pub const HEADER_DEBUG_SOURCE: &str = "garble/debugSrc";

/// Name of the archive member holding the obfuscated-name index that
/// importers consult for cross-package rename consistency.
pub const HEADER_NAME_INDEX: &str = "garble/nameIdx";

/// Environment variable pointing hook processes at the shared scratch
/// directory owned by the driver.
pub const ENV_SHARED: &str = "GARBLE_SHARED";
