//! Assembles the set of names that must not be renamed.
//!
//! Four sub-scans feed it:
//! - reflection operands: types inspected via `reflect.TypeOf`/`ValueOf`
//!   keep their names and field names, since consumers look them up as
//!   strings at runtime;
//! - linkname directives and `//export`ed functions: those local symbols
//!   keep their names so the directive (or the C caller) still binds;
//! - shadowed package-scope names: a name also bound locally somewhere in
//!   the package is retired from renaming, keeping declaration and use
//!   sites consistent without a full type checker;
//! - uninferable selectors: a selector whose receiver type cannot be
//!   inferred retires that member name from the selector namespace.

use crate::model::{FileImports, PackageModel};
use crate::parser::{walk_tree, SourceFile};
use crate::scope::{self, infer_expr};
use std::collections::HashSet;
use tracing::debug;
use tree_sitter::Node;

/// Names protected from renaming, split by namespace: `scope` matches
/// package-scope identifiers, `selectors` matches field and method names.
#[derive(Debug, Default)]
pub struct IgnoreSet {
    pub scope: HashSet<String>,
    pub selectors: HashSet<String>,
}

impl IgnoreSet {
    /// Protects a named type together with all of its fields.
    pub fn ignore_struct(&mut self, model: &PackageModel, type_name: &str) {
        self.scope.insert(type_name.to_string());
        if let Some(info) = model.structs.get(type_name) {
            for field in &info.fields {
                self.selectors.insert(field.name.clone());
            }
        }
    }
}

/// Runs all sub-scans over the package.
pub fn scan_package(files: &[(SourceFile, FileImports)], model: &PackageModel) -> IgnoreSet {
    let mut ignore = IgnoreSet::default();

    record_reflect_args(files, model, &mut ignore);
    record_linkname_locals(files, &mut ignore);
    close_shadowed_names(files, model, &mut ignore);
    close_uninferable_selectors(files, model, &mut ignore);

    debug!(
        scope = ignore.scope.len(),
        selectors = ignore.selectors.len(),
        "ignore set assembled"
    );
    ignore
}

/// Finds arguments of `reflect.TypeOf` and `reflect.ValueOf` whose static
/// type is a named type of this package. The type and its fields are
/// protected; renaming one package at a time means only same-package
/// reflection is visible here.
fn record_reflect_args(
    files: &[(SourceFile, FileImports)],
    model: &PackageModel,
    ignore: &mut IgnoreSet,
) {
    for (file, imports) in files {
        walk_tree(file.root(), &mut |node| {
            if node.kind() != "call_expression" {
                return;
            }
            if !is_reflect_entry_point(node, file, imports) {
                return;
            }
            let Some(args) = node.child_by_field_name("arguments") else {
                return;
            };
            let mut cursor = args.walk();
            for arg in args.named_children(&mut cursor) {
                record_reflect_operand(arg, file, model, imports, ignore);
            }
        });
    }
}

fn record_reflect_operand(
    arg: Node<'_>,
    file: &SourceFile,
    model: &PackageModel,
    imports: &FileImports,
    ignore: &mut IgnoreSet,
) {
    // The argument itself, plus nested expressions: reflect.TypeOf(w.inner)
    // protects the type of the whole operand expression tree.
    walk_tree(arg, &mut |node| {
        if let Some(crate::model::TypeRef::Local(name)) = infer_expr(node, file, model, imports) {
            ignore.ignore_struct(model, &name);
        }
    });
}

fn is_reflect_entry_point(call: Node<'_>, file: &SourceFile, imports: &FileImports) -> bool {
    let Some(function) = call.child_by_field_name("function") else {
        return false;
    };
    if function.kind() != "selector_expression" {
        return false;
    }
    let (Some(operand), Some(field)) = (
        function.child_by_field_name("operand"),
        function.child_by_field_name("field"),
    ) else {
        return false;
    };
    if operand.kind() != "identifier" {
        return false;
    }
    let alias = file.text(operand);
    if imports.resolve(alias) != Some("reflect") || scope::is_local(operand, alias, file) {
        return false;
    }
    matches!(file.text(field), "TypeOf" | "ValueOf")
}

/// Protects the local name of every linkname directive (the remote side is
/// rewritten in place later) and every `//export`ed function, which C code
/// references by its declared name.
fn record_linkname_locals(files: &[(SourceFile, FileImports)], ignore: &mut IgnoreSet) {
    for (file, _) in files {
        walk_tree(file.root(), &mut |node| {
            if node.kind() != "comment" {
                return;
            }
            let text = file.text(node);
            let anchored = text
                .strip_prefix("//go:linkname ")
                .or_else(|| text.strip_prefix("//export "));
            let Some(rest) = anchored else {
                return;
            };
            if let Some(local) = rest.split_whitespace().next() {
                ignore.scope.insert(local.to_string());
                ignore.selectors.insert(local.to_string());
            }
        });
    }
}

/// Retires package-scope names that are also bound locally anywhere.
fn close_shadowed_names(
    files: &[(SourceFile, FileImports)],
    model: &PackageModel,
    ignore: &mut IgnoreSet,
) {
    let bound = scope::bound_names(files);
    for name in model.scope.keys() {
        if bound.contains(name) {
            ignore.scope.insert(name.clone());
        }
    }
}

/// Retires selector-namespace names used through receivers whose type the
/// inference cannot determine. A member whose use sites cannot all be
/// rewritten must keep its declared name.
fn close_uninferable_selectors(
    files: &[(SourceFile, FileImports)],
    model: &PackageModel,
    ignore: &mut IgnoreSet,
) {
    let member_names: HashSet<&str> = model
        .structs
        .values()
        .flat_map(|s| s.fields.iter().map(|f| f.name.as_str()))
        .chain(model.methods.iter().map(|m| m.name.as_str()))
        .collect();

    for (file, imports) in files {
        walk_tree(file.root(), &mut |node| {
            if node.kind() != "selector_expression" {
                return;
            }
            let (Some(operand), Some(field)) = (
                node.child_by_field_name("operand"),
                node.child_by_field_name("field"),
            ) else {
                return;
            };
            let name = file.text(field);
            if !member_names.contains(name) {
                return;
            }
            // Package-qualified references resolve without inference.
            if operand.kind() == "identifier" {
                let alias = file.text(operand);
                if imports.resolve(alias).is_some()
                    && !model.scope.contains_key(alias)
                    && !scope::is_local(operand, alias, file)
                {
                    return;
                }
            }
            if infer_expr(operand, file, model, imports).is_none() {
                ignore.selectors.insert(name.to_string());
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PackageModel;
    use crate::parser::ParserHost;

    fn parse_pkg(srcs: &[&str]) -> (Vec<(SourceFile, FileImports)>, PackageModel) {
        let mut host = ParserHost::new().unwrap();
        let files: Vec<(SourceFile, FileImports)> = srcs
            .iter()
            .enumerate()
            .map(|(i, src)| {
                let file = host.parse(&format!("f{i}.go"), src.to_string()).unwrap();
                let imports = FileImports::collect(&file, &|_| None);
                (file, imports)
            })
            .collect();
        let model = PackageModel::build("corp.example/p", &files);
        (files, model)
    }

    #[test]
    fn test_reflect_operand_protected() {
        let (files, model) = parse_pkg(&[
            "package p\n\
             import \"reflect\"\n\
             type Inspected struct{ FieldA int; fieldB string }\n\
             type Plain struct{ C int }\n\
             func f() {\n\
             \t_ = reflect.TypeOf(Inspected{})\n\
             }\n",
        ]);
        let ignore = scan_package(&files, &model);
        assert!(ignore.scope.contains("Inspected"));
        assert!(ignore.selectors.contains("FieldA"));
        assert!(ignore.selectors.contains("fieldB"));
        assert!(!ignore.scope.contains("Plain"));
    }

    #[test]
    fn test_reflect_value_of_pointer_operand() {
        let (files, model) = parse_pkg(&[
            "package p\n\
             import \"reflect\"\n\
             type Inner struct{ X int }\n\
             func f() {\n\
             \tv := &Inner{}\n\
             \t_ = reflect.ValueOf(v)\n\
             }\n",
        ]);
        let ignore = scan_package(&files, &model);
        assert!(ignore.scope.contains("Inner"));
        assert!(ignore.selectors.contains("X"));
    }

    #[test]
    fn test_reflect_requires_reflect_import() {
        let (files, model) = parse_pkg(&[
            "package p\n\
             import reflect \"corp.example/fake\"\n\
             type T struct{ F int }\n\
             func f() { _ = reflect.TypeOf(T{}) }\n",
        ]);
        let ignore = scan_package(&files, &model);
        assert!(!ignore.scope.contains("T"));
    }

    #[test]
    fn test_linkname_local_protected() {
        let (files, model) = parse_pkg(&[
            "package p\n\
             import _ \"unsafe\"\n\
             //go:linkname fastHash runtime.memhash\n\
             func fastHash(p uintptr, h, s uintptr) uintptr\n",
        ]);
        let ignore = scan_package(&files, &model);
        assert!(ignore.scope.contains("fastHash"));
    }

    #[test]
    fn test_exported_cgo_function_protected() {
        let (files, model) = parse_pkg(&[
            "package p\n\
             //export Callback\n\
             func Callback(n int) int { return n }\n\
             func plain() {}\n",
        ]);
        let ignore = scan_package(&files, &model);
        assert!(ignore.scope.contains("Callback"));
        assert!(!ignore.scope.contains("plain"));
    }

    #[test]
    fn test_shadowed_package_name_retired() {
        let (files, model) = parse_pkg(&[
            "package p\n\
             var counter int\n\
             var free int\n\
             func f() {\n\
             \tcounter := 9\n\
             \t_ = counter\n\
             \t_ = free\n\
             }\n",
        ]);
        let ignore = scan_package(&files, &model);
        assert!(ignore.scope.contains("counter"));
        assert!(!ignore.scope.contains("free"));
    }

    #[test]
    fn test_uninferable_selector_retires_member() {
        let (files, model) = parse_pkg(&[
            "package p\n\
             type T struct{ Known int; Mystery int }\n\
             func f(ch chan T) {\n\
             \tx := T{}\n\
             \t_ = x.Known\n\
             \tv := <-ch\n\
             \t_ = v.Mystery\n\
             }\n",
        ]);
        let ignore = scan_package(&files, &model);
        assert!(ignore.selectors.contains("Mystery"));
        assert!(!ignore.selectors.contains("Known"));
    }

    #[test]
    fn test_qualified_selector_not_retired() {
        let (files, model) = parse_pkg(&[
            "package p\n\
             import \"corp.example/dep\"\n\
             type Local struct{ Fetch int }\n\
             func f() { dep.Fetch() }\n",
        ]);
        let ignore = scan_package(&files, &model);
        // dep.Fetch resolves as a package-qualified name, not a member use.
        assert!(!ignore.selectors.contains("Fetch"));
    }
}
