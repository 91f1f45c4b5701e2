//! The shared options blob passed from the driver to its hook children.
//!
//! The driver writes this file once, before re-invoking the build
//! orchestrator with `-toolexec`; every hook process mmaps and validates it
//! read-only. Children never write, so the orchestrator's internal
//! parallelism needs no locking on our side.

use memmap2::Mmap;
use rkyv::{Archive, Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// File name of the blob inside the shared scratch directory.
pub const CACHE_FILE: &str = "main-cache.bin";

/// Errors from blob persistence.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("shared cache decode error: {0}")]
    Decode(String),
}

/// Engine options resolved by the driver.
#[derive(Debug, Clone, Default, Archive, Deserialize, Serialize)]
#[rkyv(derive(Debug))]
pub struct Options {
    /// Obfuscate string literals.
    pub literals: bool,
    /// Trade reversibility for binary size.
    pub tiny: bool,
    /// Mirror obfuscated sources into this directory; empty = off.
    pub debug_dir: String,
    /// Decoded seed bytes; empty = key on action IDs alone.
    pub seed: Vec<u8>,
    /// Set when the seed came from `-seed=random`, so errors echo it.
    pub seed_random: bool,
    /// Directory the driver was invoked from; list subprocesses run here.
    pub work_dir: String,
}

/// One package from the driver's `go list -json -deps -export` enumeration.
#[derive(Debug, Clone, Default, Archive, Deserialize, Serialize)]
#[rkyv(derive(Debug))]
pub struct ListedPackage {
    pub import_path: String,
    /// Package clause name; resolves bare imports whose path tail differs
    /// from the package name.
    pub name: String,
    /// Compiled export/archive file, when the orchestrator produced one.
    pub export: String,
    pub dir: String,
    pub go_files: Vec<String>,
    pub deps: Vec<String>,
    /// Vendored remappings: (before, after) pairs.
    pub import_map: Vec<(String, String)>,
    pub standard: bool,
    /// True for packages listed only as dependencies, not build targets.
    pub dep_only: bool,
    /// Cached verdict of the privacy predicate.
    pub private: bool,
}

/// Everything a hook process needs to rebuild its context.
#[derive(Debug, Clone, Default, Archive, Deserialize, Serialize)]
#[rkyv(derive(Debug))]
pub struct SharedCache {
    pub options: Options,
    /// Build flags worth forwarding to nested `go list` calls.
    pub build_flags: Vec<String>,
    /// Absolute path of this binary, for `-toolexec` in nested calls.
    pub exec_path: String,
    /// Resolved private-packages pattern.
    pub go_private: String,
    /// Sorted by import path.
    pub listed: Vec<ListedPackage>,
}

impl SharedCache {
    /// Looks up a listed package by import path (binary search; `save`
    /// sorts the slice).
    pub fn package(&self, import_path: &str) -> Option<&ListedPackage> {
        self.listed
            .binary_search_by(|p| p.import_path.as_str().cmp(import_path))
            .ok()
            .map(|i| &self.listed[i])
    }

    /// Serializes and writes the blob into `dir`, sorting packages first.
    pub fn save(&mut self, dir: &Path) -> Result<(), CacheError> {
        std::fs::create_dir_all(dir)?;
        self.listed.sort_by(|a, b| a.import_path.cmp(&b.import_path));
        let bytes = rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map_err(|e| CacheError::Decode(e.to_string()))?;
        let mut file = File::create(dir.join(CACHE_FILE))?;
        file.write_all(&bytes)?;
        Ok(())
    }

    /// Loads and validates the blob from `dir` via mmap.
    pub fn load(dir: &Path) -> Result<Self, CacheError> {
        let file = File::open(dir.join(CACHE_FILE))?;
        // SAFETY: read-only map; the file handle outlives the mmap.
        let mmap = unsafe { Mmap::map(&file)? };
        let archived = rkyv::access::<ArchivedSharedCache, rkyv::rancor::Error>(&mmap)
            .map_err(|e| CacheError::Decode(e.to_string()))?;
        rkyv::deserialize::<SharedCache, rkyv::rancor::Error>(archived)
            .map_err(|e| CacheError::Decode(e.to_string()))
    }
}
