//! Flag and argument splitting for tool invocations.
//!
//! Tool argv cannot be parsed with an ordinary flag parser: flags and
//! positional arguments interleave, values may be attached (`-p=x`) or
//! separate (`-p x`), and boolean flags take no value at all. One shared
//! boolean-flag table decides how a bare flag is consumed everywhere.

use std::collections::HashMap;

/// Boolean flags of the orchestrator's build/test surface and of the
/// underlying tools. A flag listed here never consumes the next argument.
const BOOLEAN_FLAGS: &[&str] = &[
    // Shared build flags.
    "-a",
    "-i",
    "-n",
    "-v",
    "-x",
    "-race",
    "-msan",
    "-asan",
    "-linkshared",
    "-modcacherw",
    "-trimpath",
    "-work",
    // Test flags.
    "-c",
    "-json",
    "-cover",
    "-failfast",
    "-short",
    "-benchmem",
    // Compiler/linker bare flags seen through -toolexec.
    "-std",
    "-complete",
    "-pack",
    "-shared",
    "-dynlink",
    "-nolocalimports",
    "-w",
    "-s",
];

/// Build flags worth forwarding to nested `list` calls.
const BUILD_FLAGS: &[&str] = &[
    "-a",
    "-n",
    "-p",
    "-race",
    "-msan",
    "-asan",
    "-v",
    "-work",
    "-x",
    "-asmflags",
    "-buildmode",
    "-compiler",
    "-gccgoflags",
    "-gcflags",
    "-installsuffix",
    "-ldflags",
    "-linkshared",
    "-mod",
    "-modcacherw",
    "-modfile",
    "-overlay",
    "-pkgdir",
    "-tags",
    "-trimpath",
    "-toolexec",
];

pub fn is_boolean_flag(name: &str) -> bool {
    BOOLEAN_FLAGS.contains(&name)
}

/// Splits flags from positional arguments: everything up to the first
/// non-flag argument is a flag, with boolean and `-name=value` flags
/// consuming one element and others consuming two.
pub fn split_flags_from_args(all: &[String]) -> (Vec<String>, Vec<String>) {
    let mut i = 0;
    while i < all.len() {
        let arg = &all[i];
        if !arg.starts_with('-') {
            return (all[..i].to_vec(), all[i..].to_vec());
        }
        if is_boolean_flag(arg) || arg.contains('=') {
            i += 1;
        } else {
            i += 2;
        }
    }
    (all.to_vec(), Vec::new())
}

/// Splits tool argv into flags and trailing source files with the given
/// extension. Tool commands put all files last, so the first match wins.
pub fn split_flags_from_files(all: &[String], ext: &str) -> (Vec<String>, Vec<String>) {
    for (i, arg) in all.iter().enumerate() {
        if !arg.starts_with('-') && arg.ends_with(ext) {
            return (all[..i].to_vec(), all[i..].to_vec());
        }
    }
    (all.to_vec(), Vec::new())
}

/// Last value of a flag, from `-name=value` or `-name value` forms.
pub fn flag_value(flags: &[String], name: &str) -> Option<String> {
    flag_values(flags, name).pop()
}

/// All values of a repeatable flag, in order.
pub fn flag_values(flags: &[String], name: &str) -> Vec<String> {
    let mut values = Vec::new();
    let prefix = format!("{name}=");
    let mut i = 0;
    while i < flags.len() {
        if let Some(value) = flags[i].strip_prefix(&prefix) {
            values.push(value.to_string());
        } else if flags[i] == name {
            if let Some(next) = flags.get(i + 1) {
                values.push(next.clone());
                i += 1;
            }
        }
        i += 1;
    }
    values
}

/// Replaces the value of `name` in place, or appends `-name=value`.
pub fn flag_set_value(mut flags: Vec<String>, name: &str, value: &str) -> Vec<String> {
    let prefix = format!("{name}=");
    let mut i = 0;
    while i < flags.len() {
        if flags[i].starts_with(&prefix) {
            flags[i] = format!("{name}={value}");
            return flags;
        }
        if flags[i] == name {
            if i + 1 < flags.len() {
                flags[i + 1] = value.to_string();
            }
            return flags;
        }
        i += 1;
    }
    flags.push(format!("{name}={value}"));
    flags
}

/// Keeps only flags the orchestrator's `list` subcommand understands.
pub fn filter_build_flags(flags: &[String]) -> Vec<String> {
    let known: HashMap<&str, ()> = BUILD_FLAGS.iter().map(|f| (*f, ())).collect();
    let mut filtered = Vec::new();
    let mut i = 0;
    while i < flags.len() {
        let arg = &flags[i];
        let name = arg.split('=').next().unwrap_or(arg);
        let keep = known.contains_key(name);
        if keep {
            filtered.push(arg.clone());
        }
        if !is_boolean_flag(arg) && !arg.contains('=') {
            // "-name value": the next element belongs to this flag.
            i += 1;
            if keep {
                if let Some(value) = flags.get(i) {
                    filtered.push(value.clone());
                }
            }
        }
        i += 1;
    }
    filtered
}
