//! The identifier rewriter.
//!
//! Renaming decisions are made once per package (building the rename sets),
//! then every identifier occurrence is classified against them and spliced
//! in place. Splices apply bottom-to-top so earlier byte offsets stay valid.
//!
//! Two namespaces exist: package-scope names (funcs, types, vars, consts)
//! and selector names (fields, methods). They are decided independently;
//! the hash depends only on the defining package's key and the name, so
//! same-named entities in both namespaces agree on their replacement.

use crate::index::NameIndex;
use crate::model::{is_exported, FileImports, PackageModel, TypeRef};
use crate::parser::{is_top_level, walk_tree, ParserHost, SourceFile};
use crate::scan::IgnoreSet;
use crate::scope::{self, infer_expr};
use crate::{DepLookup, DepResolver, ScribeError};
use common::hash::{hash_with, rename_key};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::collections::{HashMap, HashSet};
use tracing::debug;
use tree_sitter::Node;

/// One byte-range splice. `replacement` substitutes `[start, end)`.
#[derive(Debug, Clone)]
pub struct Edit {
    pub start: usize,
    pub end: usize,
    pub replacement: String,
}

/// Applies edits bottom-to-top (descending start offset).
pub fn apply_edits(src: &str, mut edits: Vec<Edit>) -> String {
    edits.sort_by(|a, b| b.start.cmp(&a.start));
    let mut out = src.to_string();
    for edit in edits {
        if edit.start <= edit.end && edit.end <= out.len() {
            out.replace_range(edit.start..edit.end, &edit.replacement);
        }
    }
    out
}

fn cgo_name(name: &str) -> bool {
    name.starts_with("_C") || name.contains("_cgo")
}

/// Per-package rewriter state.
pub struct Transformer<'a> {
    model: &'a PackageModel,
    ignore: &'a IgnoreSet,
    seed: Vec<u8>,
    cur_key: Vec<u8>,
    resolver: &'a mut dyn DepResolver,
    rename_scope: HashSet<String>,
    rename_sel: HashSet<String>,
    foreign_cache: HashMap<(String, String), Option<String>>,
}

impl<'a> Transformer<'a> {
    pub fn new(
        model: &'a PackageModel,
        ignore: &'a IgnoreSet,
        seed: &[u8],
        cur_action_id: &[u8],
        resolver: &'a mut dyn DepResolver,
    ) -> Self {
        let mut tf = Transformer {
            model,
            ignore,
            seed: seed.to_vec(),
            cur_key: rename_key(seed, cur_action_id),
            resolver,
            rename_scope: HashSet::new(),
            rename_sel: HashSet::new(),
            foreign_cache: HashMap::new(),
        };
        tf.decide();
        tf
    }

    /// Builds the rename sets from the package model and the ignore set.
    fn decide(&mut self) {
        for (name, kind) in &self.model.scope {
            if self.ignore.scope.contains(name) || cgo_name(name) {
                continue;
            }
            // Exported package-scope names of main may be a plugin API.
            if self.model.name == "main" && is_exported(name) {
                continue;
            }
            if *kind == crate::model::ScopeKind::Func {
                let Some(f) = self.model.funcs.get(name) else {
                    continue;
                };
                if !f.has_body {
                    continue; // implemented in assembly, or linknamed
                }
                if matches!(name.as_str(), "main" | "init" | "TestMain") {
                    continue;
                }
                if name.starts_with("Test") && f.is_test_sig {
                    continue;
                }
            }
            self.rename_scope.insert(name.clone());
        }

        // Selector namespace: a name is renameable only when every field and
        // method carrying it is, since occurrences cannot always be told
        // apart at the syntax level.
        let mut votes: HashMap<String, bool> = HashMap::new();
        for s in self.model.structs.values() {
            for f in &s.fields {
                if f.embedded {
                    continue; // follows its type's decision
                }
                let ok = !self.ignore.selectors.contains(&f.name) && !cgo_name(&f.name);
                votes.entry(f.name.clone()).and_modify(|v| *v &= ok).or_insert(ok);
            }
        }
        for (name, unexported_everywhere) in self.model.method_names() {
            let ok = unexported_everywhere
                && !self.ignore.selectors.contains(name)
                && !cgo_name(name)
                && !matches!(name, "main" | "init" | "TestMain");
            votes.entry(name.to_string()).and_modify(|v| *v &= ok).or_insert(ok);
        }
        for (name, ok) in votes {
            if ok {
                self.rename_sel.insert(name);
            }
        }
        debug!(
            package = %self.model.path,
            scope = self.rename_scope.len(),
            selectors = self.rename_sel.len(),
            "rename sets decided"
        );
    }

    fn hash_cur(&self, name: &str) -> String {
        hash_with(&self.cur_key, name)
    }

    /// Obfuscated basename for an emitted file.
    pub fn hashed_file_name(&self, name: &str) -> String {
        format!("{}.go", hash_with(&self.cur_key, name.trim_end_matches(".go")))
    }

    /// Collects the rename splices for one file.
    pub fn ident_edits(
        &mut self,
        file: &SourceFile,
        imports: &FileImports,
    ) -> Result<Vec<Edit>, ScribeError> {
        let mut nodes = Vec::new();
        walk_tree(file.root(), &mut |node| {
            if matches!(
                node.kind(),
                "identifier" | "type_identifier" | "field_identifier"
            ) {
                nodes.push(node);
            }
        });

        let mut edits = Vec::new();
        for node in nodes {
            let name = file.text(node).to_string();
            if name == "_" || cgo_name(&name) {
                continue;
            }
            if let Some(new_name) = self.classify(node, &name, file, imports)? {
                edits.push(Edit {
                    start: node.start_byte(),
                    end: node.end_byte(),
                    replacement: new_name,
                });
            }
        }
        Ok(edits)
    }

    fn classify(
        &mut self,
        node: Node<'_>,
        name: &str,
        file: &SourceFile,
        imports: &FileImports,
    ) -> Result<Option<String>, ScribeError> {
        let Some(parent) = node.parent() else {
            return Ok(None);
        };

        match node.kind() {
            "type_identifier" => {
                if parent.kind() == "qualified_type" {
                    let Some(pkg) = parent.child_by_field_name("package") else {
                        return Ok(None);
                    };
                    if let Some(path) = imports.resolve(file.text(pkg)) {
                        return self.foreign_name(&path.to_string(), name);
                    }
                    return Ok(None);
                }
                if self.rename_scope.contains(name) {
                    return Ok(Some(self.hash_cur(name)));
                }
                Ok(None)
            }
            "field_identifier" => match parent.kind() {
                "method_declaration" | "method_elem" | "method_spec" => {
                    Ok(self
                        .rename_sel
                        .contains(name)
                        .then(|| self.hash_cur(name)))
                }
                "field_declaration" => Ok(self.classify_field_decl(node, name)),
                "selector_expression" => self.classify_selector(parent, name, file, imports),
                _ => {
                    if let Some(verdict) = self.classify_composite_key(node, name, file, imports)? {
                        return Ok(verdict);
                    }
                    Ok(None)
                }
            },
            "identifier" => {
                if let Some(verdict) = self.classify_composite_key(node, name, file, imports)? {
                    return Ok(verdict);
                }
                if self.rename_scope.contains(name) && !scope::is_local(node, name, file) {
                    return Ok(Some(self.hash_cur(name)));
                }
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    /// Field declaration inside a package-scope struct type.
    fn classify_field_decl(&self, node: Node<'_>, name: &str) -> Option<String> {
        let mut cur = node.parent();
        while let Some(parent) = cur {
            if matches!(parent.kind(), "type_spec" | "type_alias") {
                if !is_top_level(parent) {
                    return None;
                }
                return self.rename_sel.contains(name).then(|| self.hash_cur(name));
            }
            if matches!(
                parent.kind(),
                "function_declaration" | "method_declaration" | "func_literal"
            ) {
                return None; // anonymous or local struct
            }
            cur = parent.parent();
        }
        None
    }

    /// The `sel` of `expr.sel`: a package-qualified name, or a field/method
    /// access resolved through receiver-type inference.
    fn classify_selector(
        &mut self,
        selector: Node<'_>,
        name: &str,
        file: &SourceFile,
        imports: &FileImports,
    ) -> Result<Option<String>, ScribeError> {
        let Some(operand) = selector.child_by_field_name("operand") else {
            return Ok(None);
        };

        if operand.kind() == "identifier" {
            let alias = file.text(operand);
            if let Some(path) = imports.resolve(alias) {
                if !self.model.scope.contains_key(alias) && !scope::is_local(operand, alias, file) {
                    return self.foreign_name(&path.to_string(), name);
                }
            }
        }

        match infer_expr(operand, file, self.model, imports) {
            Some(TypeRef::Local(type_name)) => {
                if let Some(field) = self
                    .model
                    .structs
                    .get(&type_name)
                    .and_then(|s| s.field(name))
                {
                    if field.embedded {
                        return self.embedded_name(field.ty.clone());
                    }
                }
                Ok(self.rename_sel.contains(name).then(|| self.hash_cur(name)))
            }
            Some(TypeRef::Foreign { path, name: type_name }) => {
                self.foreign_member(&path, &type_name, name)
            }
            None => Ok(None),
        }
    }

    /// Composite literal keys: `T{Field: v}`, including elided element
    /// types like `[]T{{Field: v}}`. Non-struct literals (maps, arrays of
    /// scalars) fall through to plain classification.
    fn classify_composite_key(
        &mut self,
        node: Node<'_>,
        name: &str,
        file: &SourceFile,
        imports: &FileImports,
    ) -> Result<Option<Option<String>>, ScribeError> {
        let Some(parent) = node.parent() else {
            return Ok(None);
        };
        let keyed = if parent.kind() == "keyed_element" {
            parent
        } else if parent.kind() == "literal_element"
            && parent.parent().is_some_and(|g| g.kind() == "keyed_element")
        {
            parent.parent().unwrap()
        } else {
            return Ok(None);
        };
        if node.start_byte() != keyed.start_byte() {
            return Ok(None); // value position
        }

        // Climb nested literal values up to the typed composite literal,
        // counting how many levels of element elision sit in between.
        let mut depth = 0usize;
        let Some(mut cur) = keyed.parent() else {
            return Ok(None);
        };
        let ty_node = loop {
            if cur.kind() != "literal_value" {
                return Ok(None);
            }
            depth += 1;
            let Some(p) = cur.parent() else {
                return Ok(None);
            };
            match p.kind() {
                "composite_literal" => match p.child_by_field_name("type") {
                    Some(ty) => break ty,
                    None => return Ok(None),
                },
                "literal_element" | "keyed_element" => {
                    let mut up = p;
                    while matches!(up.kind(), "literal_element" | "keyed_element") {
                        match up.parent() {
                            Some(n) => up = n,
                            None => return Ok(None),
                        }
                    }
                    cur = up;
                }
                _ => return Ok(None),
            }
        };

        // Peel one container layer per elided level; pointers are free.
        let mut ty_node = ty_node;
        for _ in 1..depth {
            while ty_node.kind() == "pointer_type" || ty_node.kind() == "parenthesized_type" {
                match ty_node.named_child(0) {
                    Some(inner) => ty_node = inner,
                    None => return Ok(None),
                }
            }
            let next = match ty_node.kind() {
                "slice_type" | "array_type" => ty_node.child_by_field_name("element"),
                "map_type" => ty_node.child_by_field_name("value"),
                _ => None,
            };
            match next {
                Some(n) => ty_node = n,
                None => return Ok(None),
            }
        }

        let ty = crate::model::type_node_to_ref(ty_node, file, imports, &self.model.types);

        match ty {
            Some(TypeRef::Local(type_name)) => {
                let Some(field) = self
                    .model
                    .structs
                    .get(&type_name)
                    .and_then(|s| s.field(name))
                else {
                    return Ok(Some(None));
                };
                if field.embedded {
                    return Ok(Some(self.embedded_name(field.ty.clone())?));
                }
                Ok(Some(
                    self.rename_sel.contains(name).then(|| self.hash_cur(name)),
                ))
            }
            Some(TypeRef::Foreign { path, name: type_name }) => {
                Ok(Some(self.foreign_member(&path, &type_name, name)?))
            }
            None => Ok(None), // map/array literal: key is an expression
        }
    }

    /// An embedded field's selector name follows the embedded type.
    fn embedded_name(&mut self, ty: Option<TypeRef>) -> Result<Option<String>, ScribeError> {
        match ty {
            Some(TypeRef::Local(base)) => Ok(self
                .rename_scope
                .contains(&base)
                .then(|| self.hash_cur(&base))),
            Some(TypeRef::Foreign { path, name: base }) => self.foreign_name(&path, &base),
            None => Ok(None),
        }
    }

    /// Cross-package rename of a package-scope name: rename exactly when
    /// the defining package renamed it, keyed by that package's action ID.
    fn foreign_name(&mut self, path: &str, name: &str) -> Result<Option<String>, ScribeError> {
        let cache_key = (path.to_string(), name.to_string());
        if let Some(cached) = self.foreign_cache.get(&cache_key) {
            return Ok(cached.clone());
        }
        let result = self.foreign_name_uncached(path, name)?;
        self.foreign_cache.insert(cache_key, result.clone());
        Ok(result)
    }

    fn foreign_name_uncached(
        &mut self,
        path: &str,
        name: &str,
    ) -> Result<Option<String>, ScribeError> {
        if cgo_name(name) || !self.resolver.is_private(path)? {
            return Ok(None);
        }
        match self.resolver.lookup(path, name)? {
            DepLookup::Kept | DepLookup::Unknown => Ok(None),
            DepLookup::Renamed => Ok(self.foreign_hash(path, name)?),
        }
    }

    /// Cross-package struct member, consistent with the defining package's
    /// obfuscated view: untouched there means untouched here.
    fn foreign_member(
        &mut self,
        path: &str,
        type_name: &str,
        field: &str,
    ) -> Result<Option<String>, ScribeError> {
        if cgo_name(type_name) || !self.resolver.is_private(path)? {
            return Ok(None);
        }
        match self.resolver.lookup_field(path, type_name, field)? {
            DepLookup::Kept | DepLookup::Unknown => Ok(None),
            DepLookup::Renamed => Ok(self.foreign_hash(path, field)?),
        }
    }

    fn foreign_hash(&mut self, path: &str, name: &str) -> Result<Option<String>, ScribeError> {
        let Some(action_id) = self.resolver.action_id(path)? else {
            return Ok(None);
        };
        let key = rename_key(&self.seed, &action_id);
        Ok(Some(hash_with(&key, name)))
    }

    /// Splices rewritten `//go:linkname` directives whose remote symbol was
    /// renamed in its defining package. The directive stays where it is;
    /// synthetic cgo linknames are left alone.
    pub fn linkname_edits(&mut self, file: &SourceFile) -> Result<Vec<Edit>, ScribeError> {
        let mut comments = Vec::new();
        walk_tree(file.root(), &mut |node| {
            if node.kind() == "comment" {
                comments.push(node);
            }
        });

        let mut edits = Vec::new();
        for node in comments {
            if let Some(rewritten) = self.rewrite_linkname(file.text(node))? {
                edits.push(Edit {
                    start: node.start_byte(),
                    end: node.end_byte(),
                    replacement: rewritten,
                });
            }
        }
        Ok(edits)
    }

    fn rewrite_linkname(&mut self, directive: &str) -> Result<Option<String>, ScribeError> {
        let Some(rest) = directive.strip_prefix("//go:linkname ") else {
            return Ok(None);
        };
        let fields: Vec<&str> = rest.split_whitespace().collect();
        if fields.len() != 2 {
            return Ok(None);
        }
        let (local, remote) = (fields[0], fields[1]);
        let Some((pkg, name)) = remote.rsplit_once('.') else {
            return Ok(None);
        };
        if pkg == "runtime" && name.starts_with("cgo") {
            return Ok(None);
        }
        if !self.resolver.is_private(pkg)? {
            return Ok(None);
        }
        if self.resolver.lookup(pkg, name)? != DepLookup::Renamed {
            return Ok(None);
        }
        Ok(self
            .foreign_hash(pkg, name)?
            .map(|obf| format!("//go:linkname {local} {pkg}.{obf}")))
    }

    /// The obfuscated package view importers will consult, rendered from
    /// the decisions just made. Embedded fields go through the same
    /// resolution as their use sites, so a field embedding a renamed
    /// foreign type is indexed under that type's hash.
    pub fn name_index(&mut self) -> Result<NameIndex, ScribeError> {
        let model = self.model;
        let mut index = NameIndex::default();
        for name in model.scope.keys() {
            let obf = if self.rename_scope.contains(name) {
                self.hash_cur(name)
            } else {
                name.clone()
            };
            index.scope.insert(obf);
        }
        for (type_name, info) in &model.structs {
            let obf_type = if self.rename_scope.contains(type_name) {
                self.hash_cur(type_name)
            } else {
                type_name.clone()
            };
            let fields = index.fields.entry(obf_type).or_default();
            for f in &info.fields {
                let obf_field = if f.embedded {
                    self.embedded_name(f.ty.clone())?
                } else {
                    self.rename_sel.contains(&f.name).then(|| self.hash_cur(&f.name))
                };
                fields.insert(obf_field.unwrap_or_else(|| f.name.clone()));
            }
        }
        Ok(index)
    }
}

// ---------------------------------------------------------------------------
// Comment stripping and declaration shuffling
// ---------------------------------------------------------------------------

/// Drops every non-directive comment from a rewritten file. Directive
/// comments (`//go:`, `//export`) stay where they are: most of them
/// (`//go:nosplit`, `//go:embed`, `//export`) apply only to the declaration
/// that follows them. Doc comments would leak original names into the
/// emitted sources, and pre-existing line directives would leak original
/// paths, so neither survives.
pub fn strip_comments(
    host: &mut ParserHost,
    name: &str,
    src: String,
) -> Result<String, ScribeError> {
    let file = host.parse(name, src)?;
    let mut edits = Vec::new();
    walk_tree(file.root(), &mut |node| {
        if node.kind() != "comment" {
            return;
        }
        let text = file.text(node);
        if text.starts_with("//go:") || text.starts_with("//export") {
            return;
        }
        edits.push(Edit {
            start: node.start_byte(),
            end: node.end_byte(),
            replacement: String::new(),
        });
    });
    Ok(apply_edits(&file.source, edits))
}

/// Randomly permutes top-level declarations. The package clause and imports
/// stay at the top; declarations named `init` keep their positions so
/// initialization order is preserved.
pub fn shuffle_decls(
    host: &mut ParserHost,
    name: &str,
    src: String,
    rng: &mut StdRng,
) -> Result<String, ScribeError> {
    let file = host.parse(name, src)?;
    let root = file.root();

    struct Group {
        start: usize,
        end: usize,
        pinned: bool,
    }

    let mut groups: Vec<Group> = Vec::new();
    let mut pending_comment_start: Option<usize> = None;
    let mut cursor = root.walk();
    for child in root.children(&mut cursor) {
        match child.kind() {
            "package_clause" | "import_declaration" => {
                pending_comment_start = None;
                continue;
            }
            "comment" => {
                // Attach to the following declaration.
                pending_comment_start.get_or_insert(child.start_byte());
                continue;
            }
            "function_declaration"
            | "method_declaration"
            | "type_declaration"
            | "var_declaration"
            | "const_declaration" => {
                let pinned = matches!(
                    child.kind(),
                    "function_declaration" | "method_declaration"
                ) && child
                    .child_by_field_name("name")
                    .is_some_and(|n| file.text(n) == "init");
                groups.push(Group {
                    start: pending_comment_start.take().unwrap_or(child.start_byte()),
                    end: child.end_byte(),
                    pinned,
                });
            }
            _ => {
                pending_comment_start = None;
            }
        }
    }
    drop(cursor);

    if groups.len() < 2 {
        return Ok(file.source);
    }

    let src = &file.source;
    let prefix_end = groups[0].start;
    let suffix_start = groups.last().unwrap().end;

    // Shuffle the movable groups among themselves; pinned ones keep their
    // slots.
    let movable: Vec<usize> = (0..groups.len()).filter(|&i| !groups[i].pinned).collect();
    let mut order = movable.clone();
    order.shuffle(rng);
    let mut slots: Vec<usize> = (0..groups.len()).collect();
    for (slot, &from) in movable.iter().zip(order.iter()) {
        slots[*slot] = from;
    }

    let mut out = String::with_capacity(src.len());
    out.push_str(&src[..prefix_end]);
    for (i, &from) in slots.iter().enumerate() {
        if i > 0 {
            out.push_str("\n\n");
        }
        out.push_str(src[groups[from].start..groups[from].end].trim_end());
    }
    out.push_str(&src[suffix_start..]);
    Ok(out)
}
