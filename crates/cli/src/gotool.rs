//! Subprocess plumbing for the build orchestrator.

use anyhow::{anyhow, Context};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::process::Command;
use tracing::debug;

/// One package record from `go list -json`.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct GoListPackage {
    pub import_path: String,
    pub name: String,
    pub export: String,
    pub dir: String,
    pub standard: bool,
    pub dep_only: bool,
    pub go_files: Vec<String>,
    pub deps: Vec<String>,
    pub import_map: HashMap<String, String>,
}

/// Runs `go list -json` with the given extra arguments and decodes the
/// concatenated JSON stream.
pub fn go_list(
    extra: &[String],
    patterns: &[String],
    work_dir: Option<&Path>,
) -> anyhow::Result<Vec<GoListPackage>> {
    let mut cmd = Command::new("go");
    cmd.arg("list").arg("-json").args(extra).args(patterns);
    if let Some(dir) = work_dir {
        cmd.current_dir(dir);
    }
    debug!(?extra, ?patterns, "running go list");

    let out = cmd.output().context("failed to run go list")?;
    if !out.status.success() {
        return Err(anyhow!(
            "go list error: {}",
            String::from_utf8_lossy(&out.stderr).trim()
        ));
    }

    let mut packages = Vec::new();
    let stream = serde_json::Deserializer::from_slice(&out.stdout).into_iter::<GoListPackage>();
    for pkg in stream {
        packages.push(pkg.context("unexpected go list output")?);
    }
    Ok(packages)
}

/// Queries one `go env` value.
pub fn go_env(key: &str) -> anyhow::Result<String> {
    let out = Command::new("go")
        .args(["env", key])
        .output()
        .context("failed to run go env")?;
    if !out.status.success() {
        return Err(anyhow!(
            "go env error: {}",
            String::from_utf8_lossy(&out.stderr).trim()
        ));
    }
    Ok(String::from_utf8_lossy(&out.stdout).trim().to_string())
}

/// Current module path, or `None` outside a module.
pub fn module_path() -> Option<String> {
    let out = Command::new("go").args(["list", "-m"]).output().ok()?;
    if !out.status.success() {
        return None;
    }
    let path = String::from_utf8_lossy(&out.stdout).trim().to_string();
    (!path.is_empty() && path != "command-line-arguments").then_some(path)
}
