//! Lexical resolution and lightweight receiver-type inference.
//!
//! Only package-scope names ever survive into the binary, so the rewriter
//! needs two answers from this module: "does this identifier resolve to a
//! local binding?" and "what named type does this receiver expression
//! have?". Both are computed directly off the syntax tree.

use crate::model::{type_node_to_ref, FileImports, PackageModel, TypeRef};
use crate::parser::{walk_tree, SourceFile};
use std::collections::HashSet;
use tree_sitter::Node;

/// Maximum recursion while chasing `x := y` chains.
const INFER_DEPTH: usize = 8;

/// True when `name` is bound by a scope enclosing `node`: parameters,
/// receivers, type parameters, short declarations, local var/const/type
/// declarations, or range/type-switch bindings.
pub fn is_local(node: Node<'_>, name: &str, file: &SourceFile) -> bool {
    let mut cur = node;
    while let Some(parent) = cur.parent() {
        if parent.kind() == "source_file" {
            return false;
        }
        if binds_name(parent, name, file) {
            return true;
        }
        cur = parent;
    }
    false
}

/// Collects every locally bound name in the package. Package-scope names
/// that appear here are shadowed somewhere; the scanner retires them from
/// renaming so declaration and use sites cannot drift apart.
pub fn bound_names(files: &[(SourceFile, FileImports)]) -> HashSet<String> {
    let mut bound = HashSet::new();
    for (file, _) in files {
        walk_tree(file.root(), &mut |node| {
            collect_bindings(node, file, &mut |name| {
                bound.insert(name.to_string());
            });
        });
    }
    bound
}

/// Direct bindings introduced by one node, fed to `found`.
fn collect_bindings(node: Node<'_>, file: &SourceFile, found: &mut dyn FnMut(&str)) {
    match node.kind() {
        "short_var_declaration" => {
            if let Some(left) = node.child_by_field_name("left") {
                expression_list_idents(left, file, found);
            }
        }
        "range_clause" => {
            if let Some(left) = node.child_by_field_name("left") {
                expression_list_idents(left, file, found);
            }
        }
        "type_switch_statement" => {
            if let Some(alias) = node.child_by_field_name("alias") {
                expression_list_idents(alias, file, found);
            }
        }
        "parameter_declaration" | "variadic_parameter_declaration" => {
            let mut cursor = node.walk();
            for child in node.named_children(&mut cursor) {
                if child.kind() == "identifier" {
                    found(file.text(child));
                }
            }
        }
        "type_parameter_declaration" => {
            let mut cursor = node.walk();
            for child in node.named_children(&mut cursor) {
                if child.kind() == "identifier" {
                    found(file.text(child));
                }
            }
        }
        // var/const/type declarations inside a function body.
        "var_spec" | "const_spec" | "type_spec" | "type_alias"
            if !crate::parser::is_top_level(node) =>
        {
            if let Some(name) = node.child_by_field_name("name") {
                found(file.text(name));
            }
            let mut cursor = node.walk();
            for child in node.named_children(&mut cursor) {
                if child.kind() == "identifier" {
                    found(file.text(child));
                }
            }
        }
        _ => {}
    }
}

fn expression_list_idents(list: Node<'_>, file: &SourceFile, found: &mut dyn FnMut(&str)) {
    if list.kind() == "identifier" {
        found(file.text(list));
        return;
    }
    let mut cursor = list.walk();
    for child in list.named_children(&mut cursor) {
        if child.kind() == "identifier" {
            found(file.text(child));
        }
    }
}

/// Whether `scope_node` (one ancestor level) binds `name`. Checks the
/// node's direct children only; nested blocks declare into their own
/// scopes and are visited by the caller's ancestor walk.
fn binds_name(scope_node: Node<'_>, name: &str, file: &SourceFile) -> bool {
    let mut hit = false;
    let mut cursor = scope_node.walk();
    for child in scope_node.children(&mut cursor) {
        match child.kind() {
            "parameter_list" | "type_parameter_list" => {
                let mut inner = child.walk();
                for decl in child.named_children(&mut inner) {
                    collect_bindings(decl, file, &mut |n| hit |= n == name);
                }
            }
            "short_var_declaration" | "range_clause" => {
                collect_bindings(child, file, &mut |n| hit |= n == name);
            }
            "var_declaration" | "const_declaration" | "type_declaration" => {
                let mut inner = child.walk();
                for spec in child.named_children(&mut inner) {
                    collect_bindings(spec, file, &mut |n| hit |= n == name);
                }
            }
            _ => {}
        }
        if hit {
            return true;
        }
    }
    if scope_node.kind() == "type_switch_statement" {
        collect_bindings(scope_node, file, &mut |n| hit |= n == name);
    }
    hit
}

/// Infers the named type of an expression, good enough for receiver
/// resolution: composite literals, address-of, conversions, declared
/// variables, known function results, and field chains.
pub fn infer_expr(
    node: Node<'_>,
    file: &SourceFile,
    model: &PackageModel,
    imports: &FileImports,
) -> Option<TypeRef> {
    infer_expr_depth(node, file, model, imports, INFER_DEPTH)
}

fn infer_expr_depth(
    node: Node<'_>,
    file: &SourceFile,
    model: &PackageModel,
    imports: &FileImports,
    depth: usize,
) -> Option<TypeRef> {
    if depth == 0 {
        return None;
    }
    let depth = depth - 1;
    match node.kind() {
        "composite_literal" => {
            let ty = node.child_by_field_name("type")?;
            type_node_to_ref(ty, file, imports, &model.types)
        }
        "unary_expression" => {
            // &T{...} and *p both resolve to the base named type.
            infer_expr_depth(node.child_by_field_name("operand")?, file, model, imports, depth)
        }
        "parenthesized_expression" => {
            infer_expr_depth(node.named_child(0)?, file, model, imports, depth)
        }
        "call_expression" => {
            let function = node.child_by_field_name("function")?;
            match function.kind() {
                "identifier" => {
                    let name = file.text(function);
                    if model.types.contains(name) {
                        // Conversion: T(x).
                        return Some(TypeRef::Local(name.to_string()));
                    }
                    model.funcs.get(name).and_then(|f| f.result.clone())
                }
                _ => None,
            }
        }
        "selector_expression" => {
            let operand = node.child_by_field_name("operand")?;
            let field = node.child_by_field_name("field")?;
            let base = infer_expr_depth(operand, file, model, imports, depth)?;
            match base {
                TypeRef::Local(t) => model
                    .structs
                    .get(&t)
                    .and_then(|s| s.field(file.text(field)))
                    .and_then(|f| f.ty.clone()),
                TypeRef::Foreign { .. } => None,
            }
        }
        "identifier" => {
            let name = file.text(node);
            if let Some(found) = local_var_type(node, name, file, model, imports, depth) {
                return found;
            }
            model.var_types.get(name).cloned().flatten()
        }
        _ => None,
    }
}

/// Walks outward from a variable use looking for its local declaration.
/// Returns `Some(verdict)` once a binding is found (even an untypeable
/// one), `None` when the name is not locally bound.
fn local_var_type(
    node: Node<'_>,
    name: &str,
    file: &SourceFile,
    model: &PackageModel,
    imports: &FileImports,
    depth: usize,
) -> Option<Option<TypeRef>> {
    let mut cur = node;
    while let Some(parent) = cur.parent() {
        if parent.kind() == "source_file" {
            return None;
        }
        let mut cursor = parent.walk();
        for child in parent.children(&mut cursor) {
            if let Some(verdict) = binding_type(child, name, file, model, imports, depth) {
                return Some(verdict);
            }
        }
        cur = parent;
    }
    None
}

/// If `child` binds `name`, returns its inferred type (possibly unknown).
fn binding_type(
    child: Node<'_>,
    name: &str,
    file: &SourceFile,
    model: &PackageModel,
    imports: &FileImports,
    depth: usize,
) -> Option<Option<TypeRef>> {
    match child.kind() {
        "short_var_declaration" => {
            let left = child.child_by_field_name("left")?;
            let right = child.child_by_field_name("right")?;
            let mut lhs = Vec::new();
            expression_list_idents(left, file, &mut |n| lhs.push(n.to_string()));
            let idx = lhs.iter().position(|n| n == name)?;
            let mut cursor = right.walk();
            let rhs: Vec<Node> = right.named_children(&mut cursor).collect();
            if rhs.len() == lhs.len() {
                Some(infer_expr_depth(rhs[idx], file, model, imports, depth))
            } else {
                Some(None)
            }
        }
        "var_declaration" | "const_declaration" => {
            let mut cursor = child.walk();
            for spec in child.named_children(&mut cursor) {
                let mut bound = false;
                collect_bindings(spec, file, &mut |n| bound |= n == name);
                if bound {
                    let ty = spec
                        .child_by_field_name("type")
                        .and_then(|t| type_node_to_ref(t, file, imports, &model.types));
                    return Some(ty);
                }
            }
            None
        }
        "parameter_list" => {
            let mut cursor = child.walk();
            for decl in child.named_children(&mut cursor) {
                let mut bound = false;
                collect_bindings(decl, file, &mut |n| bound |= n == name);
                if bound {
                    let ty = decl
                        .child_by_field_name("type")
                        .and_then(|t| type_node_to_ref(t, file, imports, &model.types));
                    return Some(ty);
                }
            }
            None
        }
        "range_clause" => {
            let mut bound = false;
            collect_bindings(child, file, &mut |n| bound |= n == name);
            bound.then_some(None)
        }
        _ => None,
    }
}
