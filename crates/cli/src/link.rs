//! The link hook: rewrites the final object's cross-package references,
//! duplicates `-X` injections for renamed targets, and strips identifying
//! information from the produced binary.

use crate::buildinfo::fill_build_info;
use crate::flags::{flag_set_value, flag_values, split_flags_from_args};
use anyhow::bail;
use common::hash::{hash_with, hash_with_len, rename_key};
use common::SharedCache;
use std::collections::HashSet;
use std::path::Path;
use tracing::debug;

/// Transforms a `link` invocation; returns the argv for the real linker.
pub fn transform_link(cache: &SharedCache, args: &[String]) -> anyhow::Result<Vec<String>> {
    let (mut flags, paths) = split_flags_from_args(args);

    // Cached object files may lack any extension, so the split above keyed
    // on flags alone; the linker receives the main package's archive only.
    if paths.len() != 1 {
        bail!("expected exactly one link argument");
    }

    let (build, _) = fill_build_info(&flags)?;
    let seed = &cache.options.seed;

    // Same-length replacements for every private package path, so archive
    // offsets survive the rewrite.
    let mut renames = Vec::new();
    let mut seen = HashSet::new();
    for (path, pkg) in &build.imports {
        if !common::is_private(path, &cache.go_private)? {
            continue;
        }
        if !seen.insert(path.clone()) {
            continue;
        }
        let key = rename_key(seed, &pkg.action_id);
        renames.push((path.clone(), hash_with_len(&key, path, path.len())));
    }
    debug!(renames = renames.len(), "link hook");
    let garbled = arx::rewrite_import_paths(Path::new(&paths[0]), &renames)?;

    // Keep -X working for renamed targets: the original flag stays (it
    // still binds un-garbled packages), a garbled duplicate is added.
    for val in flag_values(&flags, "-X") {
        let Some((target, value)) = val.split_once('=') else {
            continue;
        };
        let Some((pkg, name)) = target.rsplit_once('.') else {
            continue;
        };
        // The main package is known under its import path in the config.
        let pkg_path = if pkg == "main" {
            build.first_import.clone()
        } else {
            pkg.to_string()
        };
        if !common::is_private(&pkg_path, &cache.go_private)? {
            continue;
        }
        let Some(ipkg) = build.imports.get(&pkg_path) else {
            continue;
        };
        let key = rename_key(seed, &ipkg.action_id);
        // The symbol prefix is the -p value the compiler used: the literal
        // "main" for the main package (untouched by the path rewrite), the
        // import path otherwise (rewritten same-length above).
        let obf_pkg = if pkg == "main" {
            pkg.to_string()
        } else {
            hash_with_len(&key, pkg, pkg.len())
        };
        flags.push(format!(
            "-X={}.{}={}",
            obf_pkg,
            hash_with(&key, name),
            value
        ));
    }

    // No build IDs in the final binary, no symbol table, no DWARF.
    flags = flag_set_value(flags, "-buildid", "");
    flags.push("-w".to_string());
    flags.push("-s".to_string());

    let mut out = flags;
    out.push(garbled.to_string_lossy().into_owned());
    Ok(out)
}
