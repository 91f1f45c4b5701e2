//! The driver: validates the toolchain, resolves options, enumerates the
//! packages to be built, persists the shared blob, and re-invokes the
//! build orchestrator with every tool routed back through this binary.

use crate::flags::{filter_build_flags, split_flags_from_args};
use crate::gotool;
use crate::version;
use anyhow::{anyhow, bail, Context};
use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use common::{ListedPackage, Options, SharedCache, ENV_SHARED};
use rand::rngs::OsRng;
use rand::RngCore;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Command;
use std::sync::OnceLock;
use tracing::debug;

/// Engine flags parsed off the wrapper's own command line.
#[derive(Debug, Default, Clone)]
pub struct EngineFlags {
    pub literals: bool,
    pub tiny: bool,
    pub debugdir: Option<PathBuf>,
    pub seed: Option<String>,
}

/// Stop without printing anything further; the reason was already shown.
#[derive(Debug, thiserror::Error)]
#[error("")]
pub struct JustExit;

/// Print usage and exit with status 2.
#[derive(Debug, thiserror::Error)]
#[error("help requested")]
pub struct WantHelp;

/// A randomly generated seed, kept for the error path: reproducing a
/// failed `-seed=random` build needs the seed echoed back.
static RANDOM_SEED: OnceLock<Vec<u8>> = OnceLock::new();

pub fn generated_seed() -> Option<&'static Vec<u8>> {
    RANDOM_SEED.get()
}

/// Decodes `-seed`. `random` draws fresh seed material from the OS.
pub fn parse_seed(flag: Option<&str>) -> anyhow::Result<(Vec<u8>, bool)> {
    match flag {
        None | Some("") => Ok((Vec::new(), false)),
        Some("random") => {
            let mut seed = vec![0u8; 16];
            OsRng.fill_bytes(&mut seed);
            RANDOM_SEED.set(seed.clone()).ok();
            Ok((seed, true))
        }
        Some(encoded) => {
            let seed = STANDARD_NO_PAD
                .decode(encoded.trim_end_matches('='))
                .map_err(|err| anyhow!("error decoding seed: {err}"))?;
            if seed.len() < 8 {
                bail!("the seed needs at least 8 bytes, have {}", seed.len());
            }
            Ok((seed, false))
        }
    }
}

/// Runs `build`, `test` or `list` through the orchestrator with this
/// binary as the tool hook. Returns the orchestrator's exit status.
pub fn run_toolexec(command: &str, rest: &[String], engine: &EngineFlags) -> anyhow::Result<i32> {
    if !version::go_version_ok() {
        return Err(JustExit.into());
    }

    let (flags, args) = split_flags_from_args(rest);
    for flag in &flags {
        if matches!(flag.as_str(), "-h" | "-help" | "--help") {
            return Err(WantHelp.into());
        }
    }

    let (seed, seed_random) = parse_seed(engine.seed.as_deref())?;
    let work_dir = dunce::canonicalize(std::env::current_dir()?)?;
    let options = Options {
        literals: engine.literals,
        tiny: engine.tiny,
        // Hooks run in their own working directories, so a relative
        // -debugdir must be anchored here.
        debug_dir: engine
            .debugdir
            .as_ref()
            .map(|d| {
                let dir = if d.is_absolute() { d.clone() } else { work_dir.join(d) };
                dir.to_string_lossy().into_owned()
            })
            .unwrap_or_default(),
        seed,
        seed_random,
        work_dir: work_dir.to_string_lossy().into_owned(),
    };

    let mut build_flags = filter_build_flags(&flags);
    if command == "test" {
        // The nested list calls must see the test variants too.
        build_flags.push("-test".to_string());
    }

    let go_private = resolve_go_private()?;
    // Future hook processes must not query the environment again.
    std::env::set_var("GOPRIVATE", &go_private);

    let exec_path = std::env::current_exe()?;

    let listed = list_packages(&build_flags, &args, &go_private)?;
    validate_listed(&listed, &go_private)?;

    let mut cache = SharedCache {
        options,
        build_flags,
        exec_path: exec_path.to_string_lossy().into_owned(),
        go_private,
        listed,
    };

    let shared_dir = std::env::temp_dir().join(format!("garble-shared{:08x}", OsRng.next_u32()));
    cache.save(&shared_dir)?;
    std::env::set_var(ENV_SHARED, &shared_dir);
    debug!(dir = %shared_dir.display(), "shared state saved");

    let mut go_args: Vec<String> = vec![
        command.to_string(),
        "-trimpath".to_string(),
        format!("-toolexec={}", exec_path.display()),
    ];
    if command == "test" {
        // vet is generally not useful on garbled code.
        go_args.push("-vet=off".to_string());
    }
    go_args.extend(flags);
    go_args.extend(args);

    let status = Command::new("go")
        .args(&go_args)
        .status()
        .context("failed to run go")?;

    std::fs::remove_dir_all(&shared_dir).ok();
    Ok(status.code().unwrap_or(1))
}

/// Resolves the private-packages pattern: the environment, then the
/// orchestrator's configured value, then the current module path.
fn resolve_go_private() -> anyhow::Result<String> {
    if let Ok(env) = std::env::var("GOPRIVATE") {
        if !env.trim().is_empty() {
            return Ok(env);
        }
    }
    let configured = gotool::go_env("GOPRIVATE")?;
    if !configured.is_empty() {
        return Ok(configured);
    }
    if let Some(module) = gotool::module_path() {
        return Ok(format!("{module},{module}_test"));
    }
    Ok(String::new())
}

fn list_packages(
    build_flags: &[String],
    patterns: &[String],
    go_private: &str,
) -> anyhow::Result<Vec<ListedPackage>> {
    // No -export here: export data from a plain listing would carry the
    // un-obfuscated action IDs. Hooks that need a dependency's object run
    // their own nested list through -toolexec.
    let extra: Vec<String> = ["-deps"]
        .iter()
        .map(|s| s.to_string())
        .chain(build_flags.iter().cloned())
        .collect();
    let raw = gotool::go_list(&extra, patterns, None)?;

    let mut listed = Vec::with_capacity(raw.len());
    for pkg in raw {
        let private = common::is_private(&pkg.import_path, go_private)?;
        listed.push(ListedPackage {
            import_path: pkg.import_path,
            name: pkg.name,
            export: pkg.export,
            dir: pkg.dir,
            go_files: pkg.go_files,
            deps: pkg.deps,
            import_map: pkg.import_map.into_iter().collect(),
            standard: pkg.standard,
            dep_only: pkg.dep_only,
            private,
        });
    }
    Ok(listed)
}

/// The two configuration errors with stable, greppable messages: a pattern
/// matching nothing, and a public package depending on an obfuscated one.
pub fn validate_listed(listed: &[ListedPackage], pattern: &str) -> anyhow::Result<()> {
    if !listed.iter().any(|p| !p.dep_only && p.private) {
        bail!("{pattern:?} does not match any packages to be built");
    }

    let by_path: HashMap<&str, &ListedPackage> = listed
        .iter()
        .map(|p| (p.import_path.as_str(), p))
        .collect();
    for pkg in listed.iter().filter(|p| !p.private) {
        for dep in &pkg.deps {
            let Some(dep_pkg) = by_path.get(dep.as_str()) else {
                continue;
            };
            if !dep_pkg.private {
                continue;
            }
            let matched = common::matching_pattern(pattern, dep).unwrap_or(pattern);
            bail!(
                "public package {:?} can't depend on obfuscated package {:?} (matched via {matched:?})",
                pkg.import_path,
                dep_pkg.import_path,
            );
        }
    }
    Ok(())
}
