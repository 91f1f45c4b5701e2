//! Garble obfuscates Go builds by wrapping the Go toolchain.
//!
//! The `garble` binary (in `crates/cli`) is the user-facing entry point.
//! This facade re-exports the engine pieces for embedding and for
//! integration tests: the name hasher and privacy predicate ([`common`]),
//! the source transformer ([`scribe`]), and the object-archive codec
//! ([`arx`]).

pub use arx;
pub use common;
pub use scribe;

pub use common::{hash_with, is_private, SharedCache};
pub use scribe::{PackageModel, ParserHost, Transformer};
