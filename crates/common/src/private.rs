//! The privacy predicate: which package paths are in scope for obfuscation.

use thiserror::Error;

/// Errors from the privacy predicate.
#[derive(Debug, Error)]
pub enum PrivateError {
    /// One of our own package paths failed module-path validation. This can
    /// only happen through corruption of internal state, so callers abort
    /// the hook process.
    #[error("invalid package path {path:?}: {reason}")]
    InvalidImportPath { path: String, reason: &'static str },
}

/// Packages the runtime depends on, or reaches via go:linkname. These must
/// never be renamed, or the runtime stops recognising its own symbols.
///
/// Snapshot of `go list -deps runtime` plus linkname targets; keep sorted.
const RUNTIME_RELATED: &[&str] = &[
    "bufio",
    "bytes",
    "compress/flate",
    "compress/gzip",
    "context",
    "encoding/binary",
    "errors",
    "fmt",
    "hash",
    "hash/crc32",
    "internal/abi",
    "internal/bisect",
    "internal/bytealg",
    "internal/coverage/rtcov",
    "internal/cpu",
    "internal/fmtsort",
    "internal/goarch",
    "internal/godebug",
    "internal/godebugs",
    "internal/goexperiment",
    "internal/goos",
    "internal/itoa",
    "internal/oserror",
    "internal/poll",
    "internal/race",
    "internal/reflectlite",
    "internal/safefilepath",
    "internal/syscall/execenv",
    "internal/syscall/unix",
    "internal/syscall/windows",
    "internal/syscall/windows/registry",
    "internal/syscall/windows/sysdll",
    "internal/testlog",
    "internal/unsafeheader",
    "io",
    "io/fs",
    "io/ioutil",
    "math",
    "math/bits",
    "os",
    "os/signal",
    "path",
    "path/filepath",
    "plugin",
    "reflect",
    "runtime",
    "runtime/cgo",
    "runtime/debug",
    "runtime/internal/atomic",
    "runtime/internal/math",
    "runtime/internal/sys",
    "runtime/metrics",
    "runtime/pprof",
    "runtime/trace",
    "sort",
    "strconv",
    "strings",
    "sync",
    "sync/atomic",
    "syscall",
    "text/tabwriter",
    "time",
    "unicode",
    "unicode/utf16",
    "unicode/utf8",
    "unsafe",
];

/// Decides whether `path` is subject to obfuscation under the comma-separated
/// private pattern. Rules are evaluated in order; first match wins.
///
/// Synthetic test packages stay public — their import paths are confusing
/// ("test/bar.test", "test/bar [test/bar.test]") and renaming them buys
/// nothing.
///
/// # Errors
/// [`PrivateError::InvalidImportPath`] when the path fails validation; the
/// caller treats this as an internal corruption error.
pub fn is_private(path: &str, patterns: &str) -> Result<bool, PrivateError> {
    if path.ends_with(".test") || path.ends_with(".test]") {
        return Ok(false);
    }
    check_import_path(path)?;
    if RUNTIME_RELATED.contains(&path) {
        return Ok(false);
    }
    if path == "main" || path == "command-line-arguments" || path.starts_with("plugin/unnamed") {
        return Ok(true);
    }
    Ok(matching_pattern(patterns, path).is_some())
}

/// Returns the first comma-separated pattern element that matches `path`,
/// used both by the predicate and by configuration error messages.
pub fn matching_pattern<'p>(patterns: &'p str, path: &str) -> Option<&'p str> {
    patterns
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .find(|p| match_prefix_pattern(p, path))
}

/// A pattern matches when its path elements glob-match a leading run of the
/// path's elements: "corp/*" matches "corp/x" and "corp/x/y" but not "corp".
fn match_prefix_pattern(pattern: &str, path: &str) -> bool {
    let pat_elems: Vec<&str> = pattern.split('/').collect();
    let path_elems: Vec<&str> = path.split('/').collect();
    if pat_elems.len() > path_elems.len() {
        return false;
    }
    pat_elems
        .iter()
        .zip(path_elems.iter())
        .all(|(p, e)| match_glob(p.as_bytes(), e.as_bytes()))
}

/// Single-element glob match supporting `*` (any run) and `?` (one byte).
fn match_glob(pattern: &[u8], s: &[u8]) -> bool {
    if pattern.is_empty() {
        return s.is_empty();
    }
    match pattern[0] {
        b'*' => match_glob(&pattern[1..], s) || (!s.is_empty() && match_glob(pattern, &s[1..])),
        b'?' => !s.is_empty() && match_glob(&pattern[1..], &s[1..]),
        c => !s.is_empty() && s[0] == c && match_glob(&pattern[1..], &s[1..]),
    }
}

/// Validates an import path the way the module system does: no empty or
/// relative elements, no doubled slashes, only path-safe ASCII.
fn check_import_path(path: &str) -> Result<(), PrivateError> {
    let fail = |reason| {
        Err(PrivateError::InvalidImportPath {
            path: path.to_string(),
            reason,
        })
    };
    if path.is_empty() {
        return fail("empty path");
    }
    if path.starts_with('/') || path.ends_with('/') {
        return fail("leading or trailing slash");
    }
    if path.contains("//") {
        return fail("double slash");
    }
    for elem in path.split('/') {
        if elem == "." || elem == ".." {
            return fail("relative path element");
        }
    }
    // The bracketed " [pkg.test]" forms were already filtered out above, so
    // only module-path characters remain legal here.
    let ok = |c: char| c.is_ascii_alphanumeric() || "-._~+/ []".contains(c);
    if !path.chars().all(ok) {
        return fail("invalid character");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_test_packages_never_private() {
        assert!(!is_private("test/bar.test", "test/...").unwrap());
        assert!(!is_private("test/bar [test/bar.test]", "*").unwrap());
    }

    #[test]
    fn test_runtime_related_never_private() {
        assert!(!is_private("runtime", "*").unwrap());
        assert!(!is_private("reflect", "*").unwrap());
        assert!(!is_private("sync/atomic", "*").unwrap());
    }

    #[test]
    fn test_main_always_private() {
        assert!(is_private("main", "").unwrap());
        assert!(is_private("command-line-arguments", "").unwrap());
        assert!(is_private("plugin/unnamed-1234", "").unwrap());
    }

    #[test]
    fn test_pattern_match() {
        assert!(is_private("corp.example/app/server", "corp.example").unwrap());
        assert!(is_private("corp.example/app", "other,corp.example/*").unwrap());
        assert!(!is_private("golang.org/x/mod", "corp.example").unwrap());
        assert!(!is_private("corp.example/app", "").unwrap());
    }

    #[test]
    fn test_matching_pattern_reports_element() {
        assert_eq!(
            matching_pattern("a,test/main/imported", "test/main/imported"),
            Some("test/main/imported")
        );
        assert_eq!(matching_pattern("a,b", "c"), None);
    }

    #[test]
    fn test_glob_elements() {
        assert!(match_prefix_pattern("corp/*/internal", "corp/x/internal"));
        assert!(!match_prefix_pattern("corp/*/internal", "corp/x/public"));
        assert!(match_prefix_pattern("corp/ap?", "corp/app/sub"));
    }

    #[test]
    fn test_prefix_semantics() {
        assert!(match_prefix_pattern("corp", "corp/deep/pkg"));
        assert!(!match_prefix_pattern("corp/deep/pkg/extra", "corp/deep/pkg"));
    }

    #[test]
    fn test_corrupt_path_is_error() {
        assert!(is_private("", "*").is_err());
        assert!(is_private("a//b", "*").is_err());
        assert!(is_private("a/../b", "*").is_err());
        assert!(is_private("bad\npath", "*").is_err());
    }
}
