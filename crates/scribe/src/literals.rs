//! String literal obfuscation.
//!
//! Each eligible string literal becomes an immediately invoked decoder over
//! XOR-masked bytes, keyed by the package's seeded random stream. Literals
//! in constant positions (const declarations, array lengths, struct tags,
//! import paths) are left alone: the replacement expression is not constant.

use crate::model::{FileImports, PackageModel};
use crate::parser::{walk_tree, SourceFile};
use crate::rewrite::Edit;
use rand::rngs::StdRng;
use rand::Rng;
use std::collections::HashSet;
use std::fmt::Write;
use tree_sitter::Node;

/// Records identifiers that must keep their names because they are used in
/// constant contexts the literal pass cannot rewrite: array lengths and
/// constant initializers referencing other constants.
pub fn record_used_as_constants(
    files: &[(SourceFile, FileImports)],
    model: &PackageModel,
    ignore: &mut HashSet<String>,
) {
    for (file, _) in files {
        walk_tree(file.root(), &mut |node| {
            let in_const_context = match node.kind() {
                "array_type" => node.child_by_field_name("length"),
                "const_spec" => node.child_by_field_name("value"),
                _ => None,
            };
            if let Some(expr) = in_const_context {
                walk_tree(expr, &mut |inner| {
                    if inner.kind() == "identifier" {
                        let name = file.text(inner);
                        if model.consts.contains(name) {
                            ignore.insert(name.to_string());
                        }
                    }
                });
            }
        });
    }
}

/// Produces splices replacing eligible string literals in one file.
pub fn obfuscate_strings(file: &SourceFile, rng: &mut StdRng) -> Vec<Edit> {
    let mut edits = Vec::new();
    walk_tree(file.root(), &mut |node| {
        if !matches!(
            node.kind(),
            "interpreted_string_literal" | "raw_string_literal"
        ) {
            return;
        }
        if in_constant_position(node) {
            return;
        }
        let Some(content) = unquote(file.text(node), node.kind()) else {
            return;
        };
        if content.is_empty() {
            return;
        }
        edits.push(Edit {
            start: node.start_byte(),
            end: node.end_byte(),
            replacement: decoder_expr(&content, rng),
        });
    });
    edits
}

/// Positions where a string must remain a constant literal.
fn in_constant_position(node: Node<'_>) -> bool {
    let mut cur = node.parent();
    while let Some(parent) = cur {
        match parent.kind() {
            "import_declaration" | "const_declaration" | "field_declaration" | "array_type" => {
                return true
            }
            "function_declaration" | "method_declaration" | "func_literal" => return false,
            _ => {}
        }
        cur = parent.parent();
    }
    false
}

/// Builds the replacement expression: a func literal XOR-decoding the
/// masked bytes with a short random key, invoked in place.
fn decoder_expr(content: &[u8], rng: &mut StdRng) -> String {
    let key_len = rng.gen_range(4..=8usize);
    let key: Vec<u8> = (0..key_len).map(|_| rng.gen::<u8>()).collect();
    let masked: Vec<u8> = content
        .iter()
        .enumerate()
        .map(|(i, b)| b ^ key[i % key.len()])
        .collect();

    let mut out = String::from("(func() string { k := []byte{");
    write_bytes(&mut out, &key);
    out.push_str("}; d := []byte{");
    write_bytes(&mut out, &masked);
    out.push_str("}; for i := range d { d[i] = d[i] ^ k[i%len(k)] }; return string(d) }())");
    out
}

fn write_bytes(out: &mut String, bytes: &[u8]) {
    for (i, b) in bytes.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        let _ = write!(out, "{b}");
    }
}

/// Interprets a Go string literal, returning its byte content. `None` means
/// the literal uses an escape this pass does not handle; it is then skipped
/// rather than corrupted.
fn unquote(text: &str, kind: &str) -> Option<Vec<u8>> {
    if kind == "raw_string_literal" {
        return Some(
            text.strip_prefix('`')?
                .strip_suffix('`')?
                .bytes()
                .filter(|&b| b != b'\r')
                .collect(),
        );
    }
    let inner = text.strip_prefix('"')?.strip_suffix('"')?;
    let mut out = Vec::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            let mut buf = [0u8; 4];
            out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            continue;
        }
        match chars.next()? {
            'a' => out.push(0x07),
            'b' => out.push(0x08),
            'f' => out.push(0x0c),
            'n' => out.push(b'\n'),
            'r' => out.push(b'\r'),
            't' => out.push(b'\t'),
            'v' => out.push(0x0b),
            '\\' => out.push(b'\\'),
            '\'' => out.push(b'\''),
            '"' => out.push(b'"'),
            'x' => {
                let hi = chars.next()?.to_digit(16)?;
                let lo = chars.next()?.to_digit(16)?;
                out.push((hi * 16 + lo) as u8);
            }
            'u' => {
                let mut v = 0u32;
                for _ in 0..4 {
                    v = v * 16 + chars.next()?.to_digit(16)?;
                }
                let c = char::from_u32(v)?;
                let mut buf = [0u8; 4];
                out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            }
            c @ '0'..='7' => {
                let mut v = c.to_digit(8)?;
                for _ in 0..2 {
                    v = v * 8 + chars.next()?.to_digit(8)?;
                }
                out.push(u8::try_from(v).ok()?);
            }
            _ => return None,
        }
    }
    Some(out)
}
