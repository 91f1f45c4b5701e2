//! The package-scope model: every named entity the rewriter may touch.
//!
//! Built once per compiled package from all of its files. The model is a
//! name-level view — rich enough to answer "is this identifier a
//! package-scope object, a struct field, a method, an import alias?"
//! without a full type checker.

use crate::parser::{is_top_level, walk_tree, SourceFile};
use std::collections::{HashMap, HashSet};
use tree_sitter::Node;

/// A resolved reference to a named type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeRef {
    /// Declared in the package being compiled.
    Local(String),
    /// Declared in an imported package.
    Foreign { path: String, name: String },
}

/// Per-file import table.
#[derive(Debug, Default, Clone)]
pub struct FileImports {
    by_alias: HashMap<String, String>,
    /// Paths imported with a `.` alias. Their names land in file scope;
    /// references to them cannot be resolved at this level, so the caller
    /// refuses to obfuscate across dot imports of private packages.
    pub dot_paths: Vec<String>,
}

impl FileImports {
    /// Collects the import table of one file. `package_name` maps an import
    /// path to its package clause name (from the listed-packages data); the
    /// fallback is the last path element with any version suffix dropped.
    pub fn collect(file: &SourceFile, package_name: &dyn Fn(&str) -> Option<String>) -> Self {
        let mut imports = FileImports::default();
        walk_tree(file.root(), &mut |node| {
            if node.kind() != "import_spec" {
                return;
            }
            let Some(path_node) = node.child_by_field_name("path") else {
                return;
            };
            let path = file.text(path_node).trim_matches(['"', '`']).to_string();

            match node.child_by_field_name("name") {
                Some(name) if name.kind() == "dot" => imports.dot_paths.push(path),
                Some(name) if name.kind() == "blank_identifier" => {}
                Some(name) => {
                    imports.by_alias.insert(file.text(name).to_string(), path);
                }
                None => {
                    let alias = package_name(&path).unwrap_or_else(|| default_alias(&path));
                    imports.by_alias.insert(alias, path);
                }
            }
        });
        imports
    }

    /// Import path for a package qualifier, when this file imports it.
    pub fn resolve(&self, alias: &str) -> Option<&str> {
        self.by_alias.get(alias).map(String::as_str)
    }
}

/// Last path element, minus a ".vN"-style suffix: "gopkg.in/yaml.v2" → "yaml".
fn default_alias(path: &str) -> String {
    let tail = path.rsplit('/').next().unwrap_or(path);
    tail.split('.').next().unwrap_or(tail).to_string()
}

/// One struct field.
#[derive(Debug, Clone)]
pub struct FieldInfo {
    pub name: String,
    pub ty: Option<TypeRef>,
    pub embedded: bool,
}

/// One package-scope struct type.
#[derive(Debug, Clone, Default)]
pub struct StructInfo {
    pub fields: Vec<FieldInfo>,
}

impl StructInfo {
    pub fn field(&self, name: &str) -> Option<&FieldInfo> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// One function or method declaration.
#[derive(Debug, Clone)]
pub struct FuncInfo {
    pub name: String,
    /// Base type name of the receiver, for methods.
    pub receiver: Option<String>,
    /// False for assembly or linknamed functions declared without a body.
    pub has_body: bool,
    /// Signature is `func(*testing.T)`.
    pub is_test_sig: bool,
    /// Named result type, when the signature is simple enough to read off.
    pub result: Option<TypeRef>,
}

/// Category of a package-scope name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Func,
    Type,
    Var,
    Const,
}

/// The assembled package-scope view.
#[derive(Debug, Default)]
pub struct PackageModel {
    /// Import path of the package under compilation.
    pub path: String,
    /// Package clause name.
    pub name: String,
    /// All package-scope names (receiverless funcs, types, vars, consts).
    pub scope: HashMap<String, ScopeKind>,
    /// All declared type names (also present in `scope`).
    pub types: HashSet<String>,
    /// Struct layouts by type name.
    pub structs: HashMap<String, StructInfo>,
    /// Receiverless functions by name.
    pub funcs: HashMap<String, FuncInfo>,
    /// Methods, interface methods included (receiver = interface name).
    pub methods: Vec<FuncInfo>,
    /// Declared types of package-scope vars, where stated.
    pub var_types: HashMap<String, Option<TypeRef>>,
    /// Package-scope constant names.
    pub consts: HashSet<String>,
}

impl PackageModel {
    pub fn build(path: &str, files: &[(SourceFile, FileImports)]) -> Self {
        let mut model = PackageModel {
            path: path.to_string(),
            ..PackageModel::default()
        };

        // Pass 1: type names, so later type references resolve to Local.
        for (file, _) in files {
            if model.name.is_empty() {
                if let Some(clause) = file
                    .root()
                    .children(&mut file.root().walk())
                    .find(|n| n.kind() == "package_clause")
                {
                    if let Some(ident) = clause.named_child(0) {
                        model.name = file.text(ident).to_string();
                    }
                }
            }
            walk_tree(file.root(), &mut |node| {
                if matches!(node.kind(), "type_spec" | "type_alias") && is_top_level(node) {
                    if let Some(name) = node.child_by_field_name("name") {
                        model.types.insert(file.text(name).to_string());
                    }
                }
            });
        }

        // Pass 2: everything else, with type references resolved.
        for (file, imports) in files {
            let types = model.types.clone();
            walk_tree(file.root(), &mut |node| {
                model.collect_decl(file, imports, &types, node)
            });
        }
        model
    }

    fn collect_decl(
        &mut self,
        file: &SourceFile,
        imports: &FileImports,
        types: &HashSet<String>,
        node: Node<'_>,
    ) {
        match node.kind() {
            "function_declaration" if is_top_level(node) => {
                let Some(name) = node.child_by_field_name("name") else {
                    return;
                };
                let info = FuncInfo {
                    name: file.text(name).to_string(),
                    receiver: None,
                    has_body: node.child_by_field_name("body").is_some(),
                    is_test_sig: is_test_signature(node, file, imports),
                    result: result_type(node, file, imports, types),
                };
                self.scope.insert(info.name.clone(), ScopeKind::Func);
                self.funcs.insert(info.name.clone(), info);
            }
            "method_declaration" => {
                let Some(name) = node.child_by_field_name("name") else {
                    return;
                };
                let receiver = node
                    .child_by_field_name("receiver")
                    .and_then(|r| first_param_base_type(r, file));
                self.methods.push(FuncInfo {
                    name: file.text(name).to_string(),
                    receiver,
                    has_body: node.child_by_field_name("body").is_some(),
                    is_test_sig: false,
                    result: result_type(node, file, imports, types),
                });
            }
            "type_spec" | "type_alias" if is_top_level(node) => {
                let Some(name) = node.child_by_field_name("name") else {
                    return;
                };
                let type_name = file.text(name).to_string();
                self.scope.insert(type_name.clone(), ScopeKind::Type);

                if let Some(ty) = node.child_by_field_name("type") {
                    if ty.kind() == "struct_type" {
                        self.structs
                            .insert(type_name.clone(), collect_struct(ty, file, imports, types));
                    }
                    if ty.kind() == "interface_type" {
                        for m in interface_methods(ty, file) {
                            self.methods.push(FuncInfo {
                                name: m,
                                receiver: Some(type_name.clone()),
                                has_body: false,
                                is_test_sig: false,
                                result: None,
                            });
                        }
                    }
                }
            }
            "var_spec" if is_top_level(node) => {
                let declared = node
                    .child_by_field_name("type")
                    .and_then(|t| type_node_to_ref(t, file, imports, types));
                for name in spec_names(node, file) {
                    self.scope.insert(name.clone(), ScopeKind::Var);
                    self.var_types.insert(name, declared.clone());
                }
            }
            "const_spec" if is_top_level(node) => {
                for name in spec_names(node, file) {
                    self.scope.insert(name.clone(), ScopeKind::Const);
                    self.consts.insert(name);
                }
            }
            _ => {}
        }
    }

    /// All method names, with whether every same-named method is renameable.
    pub fn method_names(&self) -> HashMap<&str, bool> {
        let mut verdicts: HashMap<&str, bool> = HashMap::new();
        for m in &self.methods {
            let renameable = !is_exported(&m.name);
            verdicts
                .entry(m.name.as_str())
                .and_modify(|v| *v &= renameable)
                .or_insert(renameable);
        }
        verdicts
    }
}

pub(crate) fn is_exported(name: &str) -> bool {
    name.chars().next().is_some_and(|c| c.is_uppercase())
}

fn spec_names(spec: Node<'_>, file: &SourceFile) -> Vec<String> {
    let mut names = Vec::new();
    let mut cursor = spec.walk();
    for child in spec.named_children(&mut cursor) {
        if child.kind() == "identifier" {
            // Only `name` fields are bare identifiers in var/const specs;
            // value expressions sit under an expression_list.
            names.push(file.text(child).to_string());
        }
    }
    names
}

fn collect_struct(
    struct_type: Node<'_>,
    file: &SourceFile,
    imports: &FileImports,
    types: &HashSet<String>,
) -> StructInfo {
    let mut info = StructInfo::default();
    let Some(list) = struct_type
        .named_children(&mut struct_type.walk())
        .find(|n| n.kind() == "field_declaration_list")
    else {
        return info;
    };

    let mut cursor = list.walk();
    for decl in list.named_children(&mut cursor) {
        if decl.kind() != "field_declaration" {
            continue;
        }
        let ty = decl
            .child_by_field_name("type")
            .and_then(|t| type_node_to_ref(t, file, imports, types));

        let mut named = false;
        let mut decl_cursor = decl.walk();
        for child in decl.named_children(&mut decl_cursor) {
            if child.kind() == "field_identifier" {
                named = true;
                info.fields.push(FieldInfo {
                    name: file.text(child).to_string(),
                    ty: ty.clone(),
                    embedded: false,
                });
            }
        }
        if !named {
            // Embedded field: its selector name is the base type name.
            if let Some(type_node) = decl.child_by_field_name("type") {
                let base = embedded_base(type_node, file);
                if !base.is_empty() {
                    let ty = ty.clone().or_else(|| {
                        type_node_to_ref(type_node, file, imports, types)
                    });
                    info.fields.push(FieldInfo {
                        name: base,
                        ty,
                        embedded: true,
                    });
                }
            }
        }
    }
    info
}

fn embedded_base(type_node: Node<'_>, file: &SourceFile) -> String {
    match type_node.kind() {
        "type_identifier" => file.text(type_node).to_string(),
        "qualified_type" => type_node
            .child_by_field_name("name")
            .map(|n| file.text(n).to_string())
            .unwrap_or_default(),
        "pointer_type" | "generic_type" => type_node
            .named_child(0)
            .map(|n| embedded_base(n, file))
            .unwrap_or_default(),
        _ => String::new(),
    }
}

fn interface_methods(iface: Node<'_>, file: &SourceFile) -> Vec<String> {
    let mut names = Vec::new();
    walk_tree(iface, &mut |node| {
        if matches!(node.kind(), "method_elem" | "method_spec") {
            if let Some(name) = node.child_by_field_name("name") {
                names.push(file.text(name).to_string());
            }
        }
    });
    names
}

/// Base type name of the first parameter in a parameter list (receivers).
fn first_param_base_type(params: Node<'_>, file: &SourceFile) -> Option<String> {
    let mut cursor = params.walk();
    let param = params
        .named_children(&mut cursor)
        .find(|n| n.kind() == "parameter_declaration")?;
    let ty = param.child_by_field_name("type")?;
    let base = embedded_base(ty, file);
    (!base.is_empty()).then_some(base)
}

/// Resolves a type node to a reference, unwrapping pointers and generics.
/// Returns `None` for builtins, anonymous types, and dot-imported names.
pub fn type_node_to_ref(
    node: Node<'_>,
    file: &SourceFile,
    imports: &FileImports,
    types: &HashSet<String>,
) -> Option<TypeRef> {
    match node.kind() {
        "type_identifier" => {
            let name = file.text(node);
            types.contains(name).then(|| TypeRef::Local(name.to_string()))
        }
        "qualified_type" => {
            let pkg = node.child_by_field_name("package")?;
            let name = node.child_by_field_name("name")?;
            let path = imports.resolve(file.text(pkg))?;
            Some(TypeRef::Foreign {
                path: path.to_string(),
                name: file.text(name).to_string(),
            })
        }
        "pointer_type" | "parenthesized_type" => {
            type_node_to_ref(node.named_child(0)?, file, imports, types)
        }
        "generic_type" => {
            type_node_to_ref(node.child_by_field_name("type")?, file, imports, types)
        }
        _ => None,
    }
}

/// Reads a function's declared result type when it is a single named type.
fn result_type(
    func: Node<'_>,
    file: &SourceFile,
    imports: &FileImports,
    types: &HashSet<String>,
) -> Option<TypeRef> {
    let result = func.child_by_field_name("result")?;
    match result.kind() {
        "parameter_list" => {
            let mut cursor = result.walk();
            let mut params = result
                .named_children(&mut cursor)
                .filter(|n| n.kind() == "parameter_declaration");
            let only = params.next()?;
            if params.next().is_some() {
                return None;
            }
            type_node_to_ref(only.child_by_field_name("type")?, file, imports, types)
        }
        _ => type_node_to_ref(result, file, imports, types),
    }
}

/// True for `func(*testing.T)` signatures, which the test harness looks up
/// by name.
fn is_test_signature(func: Node<'_>, file: &SourceFile, imports: &FileImports) -> bool {
    let Some(params) = func.child_by_field_name("parameters") else {
        return false;
    };
    let mut cursor = params.walk();
    let mut decls = params
        .named_children(&mut cursor)
        .filter(|n| n.kind() == "parameter_declaration");
    let Some(only) = decls.next() else {
        return false;
    };
    if decls.next().is_some() {
        return false;
    }
    let Some(ty) = only.child_by_field_name("type") else {
        return false;
    };
    if ty.kind() != "pointer_type" {
        return false;
    }
    let Some(inner) = ty.named_child(0) else {
        return false;
    };
    if inner.kind() != "qualified_type" {
        return false;
    }
    let pkg = inner.child_by_field_name("package");
    let name = inner.child_by_field_name("name");
    match (pkg, name) {
        (Some(pkg), Some(name)) => {
            imports.resolve(file.text(pkg)) == Some("testing") && file.text(name) == "T"
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ParserHost;

    fn parse_one(src: &str) -> (SourceFile, FileImports) {
        let mut host = ParserHost::new().unwrap();
        let file = host.parse("test.go", src.to_string()).unwrap();
        let imports = FileImports::collect(&file, &|_| None);
        (file, imports)
    }

    #[test]
    fn test_scope_collection() {
        let parsed = parse_one(
            "package demo\n\
             \n\
             const answer = 42\n\
             var counter int\n\
             type Thing struct{ Field int; hidden string }\n\
             func Run() {}\n\
             func (t Thing) Method() {}\n",
        );
        let model = PackageModel::build("corp.example/demo", std::slice::from_ref(&parsed));

        assert_eq!(model.name, "demo");
        assert_eq!(model.scope.get("answer"), Some(&ScopeKind::Const));
        assert_eq!(model.scope.get("counter"), Some(&ScopeKind::Var));
        assert_eq!(model.scope.get("Thing"), Some(&ScopeKind::Type));
        assert_eq!(model.scope.get("Run"), Some(&ScopeKind::Func));
        assert!(!model.scope.contains_key("Method"));

        let thing = model.structs.get("Thing").unwrap();
        assert!(thing.field("Field").is_some());
        assert!(thing.field("hidden").is_some());
        assert_eq!(model.methods.len(), 1);
        assert_eq!(model.methods[0].receiver.as_deref(), Some("Thing"));
    }

    #[test]
    fn test_local_declarations_not_in_scope() {
        let parsed = parse_one(
            "package demo\n\
             func f() {\n\
             \tlocal := 1\n\
             \tvar typed string\n\
             \t_ = local\n\
             \t_ = typed\n\
             }\n",
        );
        let model = PackageModel::build("p", std::slice::from_ref(&parsed));
        assert!(!model.scope.contains_key("local"));
        assert!(!model.scope.contains_key("typed"));
    }

    #[test]
    fn test_embedded_field_names() {
        let parsed = parse_one(
            "package demo\n\
             import \"corp.example/dep\"\n\
             type Base struct{}\n\
             type Wrapper struct {\n\
             \tBase\n\
             \t*dep.Remote\n\
             \tValue int\n\
             }\n",
        );
        let model = PackageModel::build("p", std::slice::from_ref(&parsed));
        let wrapper = model.structs.get("Wrapper").unwrap();

        let base = wrapper.field("Base").unwrap();
        assert!(base.embedded);
        assert_eq!(base.ty, Some(TypeRef::Local("Base".into())));

        let remote = wrapper.field("Remote").unwrap();
        assert!(remote.embedded);
        assert_eq!(
            remote.ty,
            Some(TypeRef::Foreign {
                path: "corp.example/dep".into(),
                name: "Remote".into()
            })
        );

        assert!(!wrapper.field("Value").unwrap().embedded);
    }

    #[test]
    fn test_bodyless_function() {
        let parsed = parse_one("package demo\n\nfunc asmImpl(x uint64) uint64\n");
        let model = PackageModel::build("p", std::slice::from_ref(&parsed));
        assert!(!model.funcs.get("asmImpl").unwrap().has_body);
    }

    #[test]
    fn test_test_signature_detection() {
        let parsed = parse_one(
            "package demo\n\
             import \"testing\"\n\
             func TestThing(t *testing.T) {}\n\
             func TestHelper(s string) {}\n",
        );
        let model = PackageModel::build("p", std::slice::from_ref(&parsed));
        assert!(model.funcs.get("TestThing").unwrap().is_test_sig);
        assert!(!model.funcs.get("TestHelper").unwrap().is_test_sig);
    }

    #[test]
    fn test_import_aliases() {
        let parsed = parse_one(
            "package demo\n\
             import (\n\
             \t\"fmt\"\n\
             \tcustom \"corp.example/lib\"\n\
             \t. \"strings\"\n\
             \t_ \"embed\"\n\
             \t\"gopkg.in/yaml.v2\"\n\
             )\n",
        );
        let imports = &parsed.1;
        assert_eq!(imports.resolve("fmt"), Some("fmt"));
        assert_eq!(imports.resolve("custom"), Some("corp.example/lib"));
        assert_eq!(imports.resolve("yaml"), Some("gopkg.in/yaml.v2"));
        assert_eq!(imports.resolve("strings"), None);
        assert_eq!(imports.dot_paths, vec!["strings".to_string()]);
    }

    #[test]
    fn test_interface_methods_recorded() {
        let parsed = parse_one(
            "package demo\n\
             type Store interface {\n\
             \tGet(key string) string\n\
             \tput(key, value string)\n\
             }\n",
        );
        let model = PackageModel::build("p", std::slice::from_ref(&parsed));
        let verdicts = model.method_names();
        assert_eq!(verdicts.get("Get"), Some(&false));
        assert_eq!(verdicts.get("put"), Some(&true));
    }

    #[test]
    fn test_method_name_unanimity() {
        let parsed = parse_one(
            "package demo\n\
             type A struct{}\n\
             type B struct{}\n\
             func (A) size() int { return 0 }\n\
             func (B) Size() int { return 1 }\n\
             func (B) size() int { return 2 }\n",
        );
        let model = PackageModel::build("p", std::slice::from_ref(&parsed));
        let verdicts = model.method_names();
        // Lowercase "size" appears twice, both unexported: renameable.
        assert_eq!(verdicts.get("size"), Some(&true));
        assert_eq!(verdicts.get("Size"), Some(&false));
    }
}
