//! The reverse command: translates obfuscated names in panic traces (or
//! any text) back to their originals.
//!
//! The mapping is recomputed rather than stored: hashing is deterministic,
//! so listing the private packages, reading each action ID, and re-hashing
//! every declared name reproduces exactly the replacements the build made.

use crate::driver::{parse_seed, EngineFlags};
use crate::flags::{filter_build_flags, split_flags_from_args};
use crate::gotool;
use aho_corasick::{AhoCorasick, MatchKind};
use anyhow::Context;
use common::hash::{hash_with, hash_with_len, rename_key};
use common::{ListedPackage, Options, SharedCache, ENV_SHARED};
use rand::rngs::OsRng;
use rand::RngCore;
use scribe::{FileImports, PackageModel, ParserHost};
use std::io::{Read, Write};
use std::path::Path;

pub fn run_reverse(rest: &[String], engine: &EngineFlags) -> anyhow::Result<i32> {
    let (flags, args) = split_flags_from_args(rest);
    let (seed, _) = parse_seed(engine.seed.as_deref())?;
    let build_flags = filter_build_flags(&flags);

    // Positional arguments naming existing files are inputs to filter;
    // the rest are package patterns.
    let (inputs, patterns): (Vec<String>, Vec<String>) =
        args.into_iter().partition(|a| Path::new(a).is_file());
    let patterns = if patterns.is_empty() {
        vec!["./...".to_string()]
    } else {
        patterns
    };

    let go_private = match std::env::var("GOPRIVATE") {
        Ok(env) if !env.trim().is_empty() => env,
        _ => {
            let configured = gotool::go_env("GOPRIVATE")?;
            if !configured.is_empty() {
                configured
            } else {
                gotool::module_path()
                    .map(|m| format!("{m},{m}_test"))
                    .unwrap_or_default()
            }
        }
    };

    // The renaming keys are the action IDs of the obfuscated build, so the
    // export listing below must run through the tool hooks. Enumerate
    // cheaply first, persist the shared blob the hooks load, then list
    // again with -export and -toolexec.
    let plain: Vec<String> = ["-deps"]
        .iter()
        .map(|s| s.to_string())
        .chain(build_flags.iter().cloned())
        .collect();
    let enumerated = gotool::go_list(&plain, &patterns, None)?;

    let work_dir = dunce::canonicalize(std::env::current_dir()?)?;
    let exec_path = std::env::current_exe()?;
    let mut cache = SharedCache {
        options: Options {
            seed: seed.clone(),
            work_dir: work_dir.to_string_lossy().into_owned(),
            ..Options::default()
        },
        build_flags: build_flags.clone(),
        exec_path: exec_path.to_string_lossy().into_owned(),
        go_private: go_private.clone(),
        listed: enumerated
            .into_iter()
            .map(|pkg| {
                let private = common::is_private(&pkg.import_path, &go_private)?;
                Ok(ListedPackage {
                    import_path: pkg.import_path,
                    name: pkg.name,
                    export: String::new(),
                    dir: pkg.dir,
                    go_files: pkg.go_files,
                    deps: pkg.deps,
                    import_map: pkg.import_map.into_iter().collect(),
                    standard: pkg.standard,
                    dep_only: pkg.dep_only,
                    private,
                })
            })
            .collect::<anyhow::Result<Vec<_>>>()?,
    };
    let shared_dir = std::env::temp_dir().join(format!("garble-shared{:08x}", OsRng.next_u32()));
    cache.save(&shared_dir)?;
    std::env::set_var(ENV_SHARED, &shared_dir);

    let extra: Vec<String> = ["-deps", "-export", "-trimpath"]
        .iter()
        .map(|s| s.to_string())
        .chain([format!("-toolexec={}", exec_path.display())])
        .chain(build_flags)
        .collect();
    let listed = gotool::go_list(&extra, &patterns, None);
    std::fs::remove_dir_all(&shared_dir).ok();
    let listed = listed?;

    let mut host = ParserHost::new()?;
    let mut pairs: Vec<(String, String)> = Vec::new();
    for pkg in &listed {
        if pkg.export.is_empty() || !common::is_private(&pkg.import_path, &go_private)? {
            continue;
        }
        let Ok(action_id) = arx::action_id_of(Path::new(&pkg.export)) else {
            continue;
        };
        let key = rename_key(&seed, &action_id);

        let mut files = Vec::new();
        for name in &pkg.go_files {
            let path = Path::new(&pkg.dir).join(name);
            let Ok(source) = std::fs::read_to_string(&path) else {
                continue;
            };
            let file = host.parse(name, source)?;
            let imports = FileImports::collect(&file, &|_| None);
            files.push((file, imports));
        }
        let model = PackageModel::build(&pkg.import_path, &files);
        pairs.extend(replacement_pairs(&model, &pkg.go_files, &key, &pkg.import_path));
    }

    let mut text = String::new();
    if inputs.is_empty() {
        std::io::stdin()
            .read_to_string(&mut text)
            .context("reading stdin")?;
    } else {
        for input in &inputs {
            text.push_str(&std::fs::read_to_string(input)?);
        }
    }

    let out = reverse_text(&text, &pairs);
    std::io::stdout().write_all(out.as_bytes())?;
    Ok(0)
}

/// All `obfuscated → original` pairs one package contributes: the
/// link-rewritten package path, every package-scope name, every struct
/// member, and every file name.
pub fn replacement_pairs(
    model: &PackageModel,
    go_files: &[String],
    key: &[u8],
    import_path: &str,
) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    pairs.push((
        hash_with_len(key, import_path, import_path.len()),
        import_path.to_string(),
    ));
    for name in model.scope.keys() {
        pairs.push((hash_with(key, name), name.clone()));
    }
    for info in model.structs.values() {
        for field in &info.fields {
            pairs.push((hash_with(key, &field.name), field.name.clone()));
        }
    }
    for method in &model.methods {
        pairs.push((hash_with(key, &method.name), method.name.clone()));
    }
    for file in go_files {
        let stem = file.trim_end_matches(".go");
        pairs.push((format!("{}.go", hash_with(key, stem)), file.clone()));
    }
    pairs.sort();
    pairs.dedup();
    pairs
}

/// Applies the replacement pairs, longest pattern first.
pub fn reverse_text(text: &str, pairs: &[(String, String)]) -> String {
    if pairs.is_empty() {
        return text.to_string();
    }
    let mut ordered: Vec<&(String, String)> = pairs.iter().collect();
    ordered.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then(a.0.cmp(&b.0)));
    let patterns: Vec<&str> = ordered.iter().map(|(from, _)| from.as_str()).collect();
    let replacements: Vec<&str> = ordered.iter().map(|(_, to)| to.as_str()).collect();
    let ac = AhoCorasick::builder()
        .match_kind(MatchKind::LeftmostLongest)
        .build(&patterns)
        .expect("patterns are plain hashed names");
    ac.replace_all(text, &replacements)
}
