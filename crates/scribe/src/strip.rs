//! Targeted edits for the runtime family of packages.
//!
//! These packages are never renamed; they only lose build-time
//! identification and, in tiny mode, debug-print scaffolding.

use crate::parser::{is_top_level, walk_tree, SourceFile};
use crate::rewrite::Edit;
use tracing::debug;

/// Functions stripped from the runtime in tiny mode, by file. Only
/// resultless functions are listed; their bodies become empty blocks.
const STRIP_PREFIXES: &[(&str, &[&str])] = &[
    ("print.go", &["print", "gwrite", "hexdumpWords"]),
    (
        "traceback.go",
        &["traceback", "printcreatedby", "goroutineheader", "printAncestorTraceback"],
    ),
    ("mprof.go", &["tracealloc", "tracefree", "tracegc"]),
];

/// Empties the bodies of debug-print functions in the named runtime file.
/// Functions with results are left alone; an empty body would not compile.
pub fn strip_runtime(file_name: &str, file: &SourceFile) -> Vec<Edit> {
    let Some((_, prefixes)) = STRIP_PREFIXES.iter().find(|(f, _)| *f == file_name) else {
        return Vec::new();
    };

    let mut edits = Vec::new();
    walk_tree(file.root(), &mut |node| {
        if node.kind() != "function_declaration" || !is_top_level(node) {
            return;
        }
        let Some(name) = node.child_by_field_name("name") else {
            return;
        };
        let name = file.text(name);
        if !prefixes.iter().any(|p| name.starts_with(p)) {
            return;
        }
        if node.child_by_field_name("result").is_some() {
            return;
        }
        if let Some(body) = node.child_by_field_name("body") {
            edits.push(Edit {
                start: body.start_byte(),
                end: body.end_byte(),
                replacement: "{}".to_string(),
            });
        }
    });
    debug!(file = file_name, stripped = edits.len(), "stripped runtime scaffolding");
    edits
}

/// Replaces the toolchain version constant in `zversion.go` with `unknown`.
/// The linker's `-X` only works on vars, so the constant is edited here.
pub fn rewrite_version_constant(file: &SourceFile) -> Vec<Edit> {
    let mut edits = Vec::new();
    walk_tree(file.root(), &mut |node| {
        if node.kind() != "const_spec" || !edits.is_empty() {
            return;
        }
        let Some(name) = node.child_by_field_name("name") else {
            return;
        };
        if file.text(name) != "TheVersion" {
            return;
        }
        if let Some(value) = node.child_by_field_name("value") {
            edits.push(Edit {
                start: value.start_byte(),
                end: value.end_byte(),
                replacement: "`unknown`".to_string(),
            });
        }
    });
    edits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ParserHost;
    use crate::rewrite::apply_edits;

    fn parse(src: &str) -> SourceFile {
        let mut host = ParserHost::new().unwrap();
        host.parse("t.go", src.to_string()).unwrap()
    }

    #[test]
    fn test_print_bodies_emptied() {
        let file = parse(
            "package runtime\n\
             func printlock() { lock(&debuglock) }\n\
             func printstring(s string) { gwrite(bytes(s)) }\n\
             func printersDoNotMatch() int { return 1 }\n\
             func unrelated() { x() }\n",
        );
        let out = apply_edits(&file.source, strip_runtime("print.go", &file));
        assert!(out.contains("func printlock() {}"));
        assert!(out.contains("func printstring(s string) {}"));
        // Has a result: left alone.
        assert!(out.contains("return 1"));
        assert!(out.contains("func unrelated() { x() }"));
    }

    #[test]
    fn test_other_files_untouched() {
        let file = parse("package runtime\nfunc printthing() { x() }\n");
        assert!(strip_runtime("proc.go", &file).is_empty());
    }

    #[test]
    fn test_version_constant_rewritten() {
        let file = parse(
            "package sys\n\
             const TheVersion = `go1.22.1`\n\
             const other = `keep`\n",
        );
        let out = apply_edits(&file.source, rewrite_version_constant(&file));
        assert!(out.contains("const TheVersion = `unknown`"));
        assert!(out.contains("`keep`"));
    }
}
