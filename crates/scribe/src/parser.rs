//! Tree-sitter host for Go sources.

use crate::ScribeError;
use tree_sitter::{Node, Parser, Tree};

/// Owns a configured Go parser. One host is enough per hook process; the
/// transform pipeline is sequential.
pub struct ParserHost {
    parser: Parser,
}

impl ParserHost {
    /// Creates a parser with the Go grammar loaded.
    pub fn new() -> Result<Self, ScribeError> {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_go::LANGUAGE.into())
            .map_err(|e| ScribeError::ParseFailure(format!("failed to load Go grammar: {e}")))?;
        Ok(Self { parser })
    }

    /// Parses one source file. Tree-sitter recovers from localized syntax
    /// errors, which is fine here: the real compiler re-checks the emitted
    /// sources and reports anything we glossed over.
    pub fn parse(&mut self, name: &str, source: String) -> Result<SourceFile, ScribeError> {
        let tree = self
            .parser
            .parse(source.as_bytes(), None)
            .ok_or_else(|| ScribeError::ParseFailure(format!("{name}: parse returned no tree")))?;
        Ok(SourceFile {
            name: name.to_string(),
            source,
            tree,
        })
    }
}

/// One parsed source file: the raw text plus its syntax tree.
pub struct SourceFile {
    pub name: String,
    pub source: String,
    pub tree: Tree,
}

impl SourceFile {
    pub fn root(&self) -> Node<'_> {
        self.tree.root_node()
    }

    /// Source text of a node.
    pub fn text(&self, node: Node<'_>) -> &str {
        node.utf8_text(self.source.as_bytes()).unwrap_or("")
    }
}

/// Pre-order walk over every node (named and anonymous).
pub fn walk_tree<'t>(root: Node<'t>, f: &mut dyn FnMut(Node<'t>)) {
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        f(node);
        for i in (0..node.child_count()).rev() {
            if let Some(child) = node.child(i) {
                stack.push(child);
            }
        }
    }
}

/// True when the node has no function-like ancestor, i.e. it sits at
/// package scope.
pub fn is_top_level(node: Node<'_>) -> bool {
    let mut cur = node.parent();
    while let Some(parent) = cur {
        match parent.kind() {
            "function_declaration" | "method_declaration" | "func_literal" | "block" => {
                return false
            }
            _ => {}
        }
        cur = parent.parent();
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_walk() {
        let mut host = ParserHost::new().unwrap();
        let file = host
            .parse("a.go", "package a\n\nfunc f() int { return 1 }\n".into())
            .unwrap();

        let mut kinds = Vec::new();
        walk_tree(file.root(), &mut |n| kinds.push(n.kind()));
        assert!(kinds.contains(&"function_declaration"));
        assert!(kinds.contains(&"package_clause"));
    }

    #[test]
    fn test_top_level_detection() {
        let mut host = ParserHost::new().unwrap();
        let file = host
            .parse(
                "a.go",
                "package a\n\nvar global int\n\nfunc f() { local := 1; _ = local }\n".into(),
            )
            .unwrap();

        let mut saw_global = false;
        let mut saw_local = false;
        walk_tree(file.root(), &mut |n| {
            if n.kind() == "identifier" {
                match file.text(n) {
                    "global" => saw_global = is_top_level(n),
                    "local" if !saw_local => saw_local = !is_top_level(n),
                    _ => {}
                }
            }
        });
        assert!(saw_global);
        assert!(saw_local);
    }
}
