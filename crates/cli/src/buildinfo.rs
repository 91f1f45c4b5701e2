//! Per-hook build info: the parsed import config and the cross-package
//! resolver built on top of it.

use crate::flags::flag_value;
use crate::gotool;
use anyhow::{anyhow, Context};
use common::{hash::rename_key, SharedCache, HEADER_NAME_INDEX};
use scribe::{DepLookup, DepResolver, NameIndex, ScribeError};
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

/// One dependency from the import config.
#[derive(Debug)]
pub struct ImportedPkg {
    pub packagefile: String,
    pub action_id: Vec<u8>,
    /// Lazily loaded obfuscated view: outer None = not loaded yet, inner
    /// None = the archive carries no index (the package was not garbled).
    view: Option<Option<NameIndex>>,
}

/// Build info for the current tool invocation, rebuilt per hook process.
#[derive(Debug, Default)]
pub struct BuildInfo {
    pub imports: HashMap<String, ImportedPkg>,
    /// First import listed in the config; at link time this names the main
    /// package.
    pub first_import: String,
}

/// Parses `-importcfg` and extracts each dependency's action ID from its
/// compiled object. Also returns the current compilation's action ID taken
/// from `-buildid`.
pub fn fill_build_info(flags: &[String]) -> anyhow::Result<(BuildInfo, Vec<u8>)> {
    let build_id = match flag_value(flags, "-buildid") {
        Some(v) if !v.is_empty() && v != "true" => v,
        _ => return Err(anyhow!("could not find -buildid argument")),
    };
    let cur_action_id = arx::decode_hash(arx::split_action_id(&build_id));

    let importcfg = flag_value(flags, "-importcfg")
        .ok_or_else(|| anyhow!("could not find -importcfg argument"))?;
    let data = std::fs::read_to_string(&importcfg)
        .with_context(|| format!("could not read {importcfg}"))?;

    let mut info = BuildInfo::default();
    let mut import_map: HashMap<String, String> = HashMap::new();
    for line in data.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((verb, args)) = line.split_once(' ') else {
            continue;
        };
        match verb {
            "importmap" => {
                if let Some((before, after)) = args.trim().split_once('=') {
                    import_map.insert(after.to_string(), before.to_string());
                }
            }
            "packagefile" => {
                let Some((import_path, object_path)) = args.trim().split_once('=') else {
                    continue;
                };
                let action_id = arx::action_id_of(Path::new(object_path))
                    .with_context(|| format!("bad object for {import_path}"))?;
                if info.imports.is_empty() {
                    info.first_import = import_path.to_string();
                }
                info.imports.insert(
                    import_path.to_string(),
                    ImportedPkg {
                        packagefile: object_path.to_string(),
                        action_id: action_id.clone(),
                        view: None,
                    },
                );
                // Vendored remap: both names must resolve to this record.
                if let Some(other) = import_map.get(import_path) {
                    info.imports.insert(
                        other.clone(),
                        ImportedPkg {
                            packagefile: object_path.to_string(),
                            action_id,
                            view: None,
                        },
                    );
                }
            }
            _ => {}
        }
    }
    debug!(imports = info.imports.len(), first = %info.first_import, "import config parsed");
    Ok((info, cur_action_id))
}

/// Cross-package resolver for one compile: answers privacy, action-ID and
/// obfuscated-view questions from the import config, the listed-packages
/// cache, and (for indirect dependencies) a nested list call.
pub struct Resolver<'a> {
    pub cache: &'a SharedCache,
    pub build: &'a mut BuildInfo,
    pub cur_path: String,
    /// The current package is standard-library with vendored imports; its
    /// dependency objects resolve through the listed data rather than the
    /// import config keys.
    pub std_vendored: bool,
}

impl<'a> Resolver<'a> {
    pub fn new(cache: &'a SharedCache, build: &'a mut BuildInfo, cur_path: &str) -> Self {
        let std_vendored = cache
            .package(cur_path)
            .map(|p| p.standard && !p.import_map.is_empty())
            .unwrap_or(false);
        Resolver {
            cache,
            build,
            cur_path: cur_path.to_string(),
            std_vendored,
        }
    }

    /// Makes sure `path` has an import record. Paths missing from the
    /// import config — vendored standard-library imports and indirect
    /// dependencies — resolve through a nested toolexec list call, which
    /// plays the role of the orchestrator's default lookup. A listed export
    /// path, when present, must already point at an obfuscated archive;
    /// the driver never records plain ones.
    fn ensure_imported(&mut self, path: &str) -> Result<bool, ScribeError> {
        if self.build.imports.contains_key(path) {
            return Ok(true);
        }
        debug!(path, std_vendored = self.std_vendored, "resolving outside the import config");
        // Only packages known to this build are worth chasing; anything
        // else is a made-up symbol (common with linkname).
        let Some(listed) = self.cache.package(path) else {
            return Ok(false);
        };
        let object_path = if listed.export.is_empty() {
            let extra: Vec<String> = ["-export", "-trimpath", "-deps"]
                .iter()
                .map(|s| s.to_string())
                .chain([format!("-toolexec={}", self.cache.exec_path)])
                .chain(self.cache.build_flags.iter().cloned())
                .collect();
            let pkgs = gotool::go_list(
                &extra,
                &[path.to_string()],
                Some(Path::new(&self.cache.options.work_dir)),
            )
            .map_err(|e| ScribeError::Internal(format!("list of {path} failed: {e}")))?;
            let pkg = pkgs
                .iter()
                .find(|p| p.import_path == path)
                .ok_or_else(|| {
                    ScribeError::Internal(format!("unexpected list output: {path} missing"))
                })?;
            pkg.export.clone()
        } else {
            listed.export.clone()
        };
        if object_path.is_empty() {
            return Ok(false);
        }
        let action_id = arx::action_id_of(Path::new(&object_path))
            .map_err(|e| ScribeError::Internal(format!("{path}: {e}")))?;
        self.build.imports.insert(
            path.to_string(),
            ImportedPkg {
                packagefile: object_path,
                action_id,
                view: None,
            },
        );
        Ok(true)
    }

    /// Loads (and caches) the obfuscated view of a dependency.
    fn view(&mut self, path: &str) -> Result<Option<&NameIndex>, ScribeError> {
        if !self.ensure_imported(path)? {
            return Ok(None);
        }
        let pkg = self.build.imports.get_mut(path).unwrap();
        if pkg.view.is_none() {
            let loaded = arx::extract_member(Path::new(&pkg.packagefile), HEADER_NAME_INDEX)
                .ok()
                .flatten()
                .map(|data| NameIndex::from_text(&String::from_utf8_lossy(&data)));
            pkg.view = Some(loaded);
        }
        Ok(pkg.view.as_ref().unwrap().as_ref())
    }

    fn dep_key(&mut self, path: &str) -> Result<Option<Vec<u8>>, ScribeError> {
        Ok(self
            .action_id(path)?
            .map(|id| rename_key(&self.cache.options.seed, &id)))
    }
}

impl DepResolver for Resolver<'_> {
    fn is_private(&mut self, path: &str) -> Result<bool, ScribeError> {
        common::is_private(path, &self.cache.go_private)
            .map_err(|e| ScribeError::Internal(e.to_string()))
    }

    fn action_id(&mut self, path: &str) -> Result<Option<Vec<u8>>, ScribeError> {
        if !self.ensure_imported(path)? {
            return Ok(None);
        }
        Ok(self.build.imports.get(path).map(|p| p.action_id.clone()))
    }

    fn lookup(&mut self, path: &str, name: &str) -> Result<DepLookup, ScribeError> {
        match self.view(path)? {
            None => Ok(DepLookup::Unknown),
            Some(view) if view.has_name(name) => Ok(DepLookup::Kept),
            Some(_) => Ok(DepLookup::Renamed),
        }
    }

    fn lookup_field(
        &mut self,
        path: &str,
        type_name: &str,
        field: &str,
    ) -> Result<DepLookup, ScribeError> {
        let Some(key) = self.dep_key(path)? else {
            return Ok(DepLookup::Unknown);
        };
        let hashed_type = common::hash_with(&key, type_name);
        let Some(view) = self.view(path)? else {
            return Ok(DepLookup::Unknown);
        };
        let obf_type = if view.has_name(type_name) {
            type_name.to_string()
        } else {
            hashed_type
        };
        if !view.fields.contains_key(&obf_type) {
            return Ok(DepLookup::Unknown);
        }
        if view.has_field(&obf_type, field) {
            Ok(DepLookup::Kept)
        } else {
            Ok(DepLookup::Renamed)
        }
    }
}
