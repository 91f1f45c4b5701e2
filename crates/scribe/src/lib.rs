//! Go source transformation: parsing, package modelling, protection
//! scanning, and the identifier rewriter.
//!
//! The pipeline for one compiled package runs parse → model → scan →
//! rewrite. Renames are byte-range splices into the original text, applied
//! bottom-to-top so earlier offsets stay valid; nothing else about the file
//! is reformatted.

pub mod index;
pub mod literals;
pub mod model;
pub mod parser;
pub mod rewrite;
pub mod scan;
pub mod scope;
pub mod strip;

pub use index::NameIndex;
pub use model::{FileImports, PackageModel, TypeRef};
pub use parser::{ParserHost, SourceFile};
pub use rewrite::{apply_edits, shuffle_decls, strip_comments, Edit, Transformer};
pub use scan::{scan_package, IgnoreSet};

/// Errors produced while transforming a package.
#[derive(Debug, thiserror::Error)]
pub enum ScribeError {
    /// Tree-sitter could not produce a syntax tree.
    #[error("parse failure: {0}")]
    ParseFailure(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A post-list invariant did not hold. Indicates a bug; the hook
    /// process aborts with this diagnostic.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Verdict on whether a dependency still exposes a name after obfuscation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepLookup {
    /// The name survived (the package was out of scope, assembly, or the
    /// name was protected there).
    Kept,
    /// The name was renamed in its defining package.
    Renamed,
    /// The package view could not be loaded; leave the reference alone.
    Unknown,
}

/// Answers cross-package questions during a rewrite. Implemented by the
/// compile hook on top of the import config and the dependency archives.
pub trait DepResolver {
    /// Privacy predicate for a package path.
    fn is_private(&mut self, path: &str) -> Result<bool, ScribeError>;

    /// Action ID of the package defining a symbol. `None` when the package
    /// cannot be resolved at all.
    fn action_id(&mut self, path: &str) -> Result<Option<Vec<u8>>, ScribeError>;

    /// Whether a package-scope `name` survived obfuscation in `path`.
    fn lookup(&mut self, path: &str, name: &str) -> Result<DepLookup, ScribeError>;

    /// Whether `field` survived under `type_name` (given pre-obfuscation)
    /// in `path`.
    fn lookup_field(
        &mut self,
        path: &str,
        type_name: &str,
        field: &str,
    ) -> Result<DepLookup, ScribeError>;
}

/// A resolver for tests and for packages compiled without dependencies:
/// nothing is private, nothing resolves.
#[derive(Debug, Default)]
pub struct NoDeps;

impl DepResolver for NoDeps {
    fn is_private(&mut self, _path: &str) -> Result<bool, ScribeError> {
        Ok(false)
    }
    fn action_id(&mut self, _path: &str) -> Result<Option<Vec<u8>>, ScribeError> {
        Ok(None)
    }
    fn lookup(&mut self, _path: &str, _name: &str) -> Result<DepLookup, ScribeError> {
        Ok(DepLookup::Unknown)
    }
    fn lookup_field(
        &mut self,
        _path: &str,
        _type_name: &str,
        _field: &str,
    ) -> Result<DepLookup, ScribeError> {
        Ok(DepLookup::Unknown)
    }
}
