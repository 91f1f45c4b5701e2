//! The obfuscated package view shipped inside each object archive.
//!
//! Importers load this index from a dependency's archive to answer "does
//! this package still expose name X after obfuscation?". The format is a
//! sorted line-oriented text: `name <ident>` for package-scope names and
//! `field <type> <field>` for struct members, all post-obfuscation.

use std::collections::{HashMap, HashSet};

#[derive(Debug, Default, Clone)]
pub struct NameIndex {
    /// Package-scope names as they appear after obfuscation.
    pub scope: HashSet<String>,
    /// Struct fields keyed by their (post-obfuscation) type name.
    pub fields: HashMap<String, HashSet<String>>,
}

impl NameIndex {
    /// Serializes deterministically (sorted lines).
    pub fn to_text(&self) -> String {
        let mut lines: Vec<String> = self.scope.iter().map(|n| format!("name {n}")).collect();
        for (ty, fields) in &self.fields {
            for field in fields {
                lines.push(format!("field {ty} {field}"));
            }
        }
        lines.sort();
        let mut out = lines.join("\n");
        out.push('\n');
        out
    }

    /// Parses the index back. Unknown lines are skipped so the format can
    /// grow without breaking older importers.
    pub fn from_text(text: &str) -> Self {
        let mut index = NameIndex::default();
        for line in text.lines() {
            let mut parts = line.split_whitespace();
            match parts.next() {
                Some("name") => {
                    if let Some(name) = parts.next() {
                        index.scope.insert(name.to_string());
                    }
                }
                Some("field") => {
                    if let (Some(ty), Some(field)) = (parts.next(), parts.next()) {
                        index
                            .fields
                            .entry(ty.to_string())
                            .or_default()
                            .insert(field.to_string());
                    }
                }
                _ => {}
            }
        }
        index
    }

    pub fn has_name(&self, name: &str) -> bool {
        self.scope.contains(name)
    }

    pub fn has_field(&self, type_name: &str, field: &str) -> bool {
        self.fields
            .get(type_name)
            .is_some_and(|fields| fields.contains(field))
    }
}
