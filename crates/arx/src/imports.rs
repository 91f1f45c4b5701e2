//! Link-time rewriting of private package paths inside object files.
//!
//! Cross-package symbol references embed the defining package's import path
//! (`corp.example/lib.zAbc12x3`). Replacements are required to be exactly as
//! long as the originals so that every offset recorded elsewhere in the
//! archive stays valid; callers produce them with `hash_with_len`.

use crate::ArxError;
use aho_corasick::{AhoCorasick, MatchKind};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Rewrites every occurrence of the given package paths in `obj`, writing
/// the result next to the input and returning the new path. The input file
/// is left untouched; the orchestrator may still cache it.
///
/// `renames` maps original import paths to same-length replacements,
/// longest path first so nested module paths cannot partially shadow each
/// other.
pub fn rewrite_import_paths(
    obj: &Path,
    renames: &[(String, String)],
) -> Result<PathBuf, ArxError> {
    for (from, to) in renames {
        if from.len() != to.len() {
            return Err(ArxError::LengthMismatch(from.clone()));
        }
    }

    let mut ordered: Vec<&(String, String)> = renames.iter().collect();
    ordered.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then(a.0.cmp(&b.0)));
    let patterns: Vec<&str> = ordered.iter().map(|(from, _)| from.as_str()).collect();

    let data = std::fs::read(obj)?;
    let mut out = Vec::with_capacity(data.len());

    if patterns.is_empty() {
        out = data;
    } else {
        let ac = AhoCorasick::builder()
            .match_kind(MatchKind::LeftmostLongest)
            .build(&patterns)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()))?;
        let mut last = 0usize;
        let mut hits = 0usize;
        for m in ac.find_iter(&data) {
            out.extend_from_slice(&data[last..m.start()]);
            out.extend_from_slice(ordered[m.pattern().as_usize()].1.as_bytes());
            last = m.end();
            hits += 1;
        }
        out.extend_from_slice(&data[last..]);
        debug!(object = %obj.display(), hits, "rewrote import paths");
    }

    debug_assert_eq!(out.len(), std::fs::metadata(obj)?.len() as usize);

    let garbled = obj.with_extension("garbled");
    std::fs::write(&garbled, &out)?;
    Ok(garbled)
}
