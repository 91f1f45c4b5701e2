//! The compile hook: rewrites one package's sources before handing them to
//! the real compiler, then augments the produced archive.

use crate::buildinfo::{fill_build_info, Resolver};
use crate::flags::{flag_set_value, flag_value, split_flags_from_files};
use anyhow::{anyhow, bail, Context};
use common::{
    hash::rng_seed, SharedCache, HEADER_DEBUG_SOURCE, HEADER_NAME_INDEX,
};
use flate2::write::GzEncoder;
use flate2::Compression;
use rand::rngs::{OsRng, StdRng};
use rand::{RngCore, SeedableRng};
use scribe::rewrite::{apply_edits, shuffle_decls, strip_comments};
use scribe::{
    literals, strip, FileImports, PackageModel, ParserHost, SourceFile, Transformer,
};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Archive members to append to the produced object once the real compiler
/// has succeeded.
#[derive(Debug)]
pub struct PostAppend {
    pub object: PathBuf,
    pub members: Vec<(&'static str, Vec<u8>)>,
}

/// Transforms a `compile` invocation. Returns the argv for the real
/// compiler and the archive members to append afterwards.
pub fn transform_compile(
    cache: &SharedCache,
    shared_dir: &Path,
    args: &[String],
) -> anyhow::Result<(Vec<String>, Option<PostAppend>)> {
    let (mut flags, mut paths) = split_flags_from_files(args, ".go");

    // DWARF is dropped at link time anyway; don't spend time producing it.
    flags.push("-dwarf=false".to_string());

    let cur_pkg = flag_value(&flags, "-p").ok_or_else(|| anyhow!("could not find -p argument"))?;

    let mut opts = cache.options.clone();
    let tiny_runtime = cur_pkg == "runtime" && opts.tiny;
    let version_pkg = cur_pkg == "runtime/internal/sys";
    if tiny_runtime || version_pkg {
        // Processed for stripping only; engine flags apply to private
        // packages alone.
        opts.literals = false;
        opts.debug_dir.clear();
    } else if !common::is_private(&cur_pkg, &cache.go_private)? {
        return Ok(([flags, paths].concat(), None));
    }

    paths.retain(|p| base_name(p) != "_gomod_.go");
    if paths.is_empty() || (paths.len() == 1 && base_name(&paths[0]) == "_testmain.go") {
        return Ok(([flags, paths].concat(), None));
    }

    // Without -trimpath the binary would carry original source paths.
    let trimpath = flag_value(&flags, "-trimpath").unwrap_or_default();
    if !trimpath.contains(';') {
        bail!("-toolexec=garble should be used alongside -trimpath");
    }

    let (mut build, cur_action_id) = fill_build_info(&flags)?;

    // The shuffle and literal keys follow the seed, or this compilation's
    // action ID when no seed was given.
    let stream_seed = if opts.seed.is_empty() {
        rng_seed(&cur_action_id)
    } else {
        rng_seed(&opts.seed)
    };
    let mut rng = StdRng::seed_from_u64(stream_seed);
    debug!(package = %cur_pkg, files = paths.len(), "compile hook");

    let mut host = ParserHost::new()?;
    let mut files: Vec<(SourceFile, FileImports)> = Vec::with_capacity(paths.len());
    for path in &paths {
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("could not read {path}"))?;
        let file = host.parse(&base_name(path), source)?;
        let imports = FileImports::collect(&file, &|p| {
            cache.package(p).map(|l| l.name.clone()).filter(|n| !n.is_empty())
        });
        files.push((file, imports));
    }

    let model = PackageModel::build(&cur_pkg, &files);
    let mut ignore = scribe::scan_package(&files, &model);
    if opts.literals {
        literals::record_used_as_constants(&files, &model, &mut ignore.scope);
    }

    let mut resolver = Resolver::new(cache, &mut build, &cur_pkg);
    let mut tf = Transformer::new(&model, &ignore, &opts.seed, &cur_action_id, &mut resolver);

    let gz = GzEncoder::new(Vec::new(), Compression::default());
    let mut tar = tar::Builder::new(gz);
    let build_time = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();

    let mut new_paths = Vec::with_capacity(paths.len());
    for (i, (file, imports)) in files.iter().enumerate() {
        let name = base_name(&paths[i]);

        let edits = if tiny_runtime {
            strip::strip_runtime(&name, file)
        } else if version_pkg {
            if name == "zversion.go" {
                strip::rewrite_version_constant(file)
            } else {
                Vec::new()
            }
        } else if name.starts_with("_cgo_") {
            Vec::new() // generated interop code; renaming it only breaks it
        } else {
            let mut edits = tf.ident_edits(file, imports)?;
            edits.extend(tf.linkname_edits(file)?);
            if opts.literals {
                edits.extend(literals::obfuscate_strings(file, &mut rng));
            }
            edits
        };
        let rewritten = apply_edits(&file.source, edits);

        // Directive comments survive in place; everything else is dropped.
        let body = strip_comments(&mut host, &name, rewritten)?;

        let full_rewrite = !tiny_runtime && !version_pkg && !name.starts_with("_cgo_");
        let body = if full_rewrite {
            shuffle_decls(&mut host, &name, body, &mut rng)?
        } else {
            body
        };

        let obf_name = tf.hashed_file_name(&name);
        let content = format!("//line {obf_name}:1\n{body}");

        let temp_path = shared_dir.join(format!(
            "{}.{:08x}.go",
            name.trim_end_matches(".go"),
            OsRng.next_u32()
        ));
        std::fs::write(&temp_path, &content)
            .with_context(|| format!("could not write {}", temp_path.display()))?;
        new_paths.push(temp_path.to_string_lossy().into_owned());

        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o755);
        header.set_mtime(build_time);
        header.set_cksum();
        tar.append_data(&mut header, &name, content.as_bytes())?;

        if !opts.debug_dir.is_empty() {
            let dir = Path::new(&opts.debug_dir).join(&cur_pkg);
            std::fs::create_dir_all(&dir)?;
            std::fs::write(dir.join(&name), &content)?;
        }
    }

    let tar_bytes = tar.into_inner()?.finish()?;

    // Our scratch dir must be trimmed first; there may be shorter prefixes
    // later in the list.
    flags = flag_set_value(
        flags,
        "-trimpath",
        &format!("{}=>;{}", shared_dir.display(), trimpath),
    );

    let object = flag_value(&flags, "-o").ok_or_else(|| anyhow!("could not find -o argument"))?;
    let mut members: Vec<(&'static str, Vec<u8>)> = Vec::new();
    if !tiny_runtime && !version_pkg {
        members.push((HEADER_NAME_INDEX, tf.name_index()?.to_text().into_bytes()));
    }
    if !opts.tiny {
        members.push((HEADER_DEBUG_SOURCE, tar_bytes));
    }

    let post = (!members.is_empty()).then_some(PostAppend {
        object: PathBuf::from(object),
        members,
    });
    Ok(([flags, new_paths].concat(), post))
}

fn base_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}
