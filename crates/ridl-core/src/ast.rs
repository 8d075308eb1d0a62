//! One parsed source file
//!
//! An [`Ast`] ties a file's root scope to its package identity and to the
//! bookkeeping the resolution passes maintain: which files and single
//! types it imports, and which fully-qualified names its declarations end
//! up depending on.

use std::collections::{BTreeMap, BTreeSet};

use crate::arena::{Arena, AstId, TypeId};
use crate::fqname::FqName;
use crate::types::TypeKind;

#[derive(Debug)]
pub struct Ast {
    /// Identity of the file: `pkg@M.m::IFoo` or `pkg@M.m::types`.
    fqname: FqName,
    /// Filename carried by every location in this file.
    path: String,
    root_scope: TypeId,
    /// Whole-file imports, in import order.
    imported_asts: Vec<AstId>,
    /// Single-type imports, restricting lookup into the keyed file.
    imported_types: BTreeMap<AstId, BTreeSet<TypeId>>,
    /// Files the generated code will depend on.
    imported_names: BTreeSet<FqName>,
    /// Import statements as written, for package-level dependency walks.
    imported_names_granular: BTreeSet<FqName>,
    /// Fully-qualified names of every type this file's declarations use.
    referenced_types: BTreeSet<FqName>,
    /// Hex digest of the source file contents.
    file_hash: Option<String>,
}

impl Ast {
    pub fn new(fqname: FqName, path: impl Into<String>, root_scope: TypeId) -> Self {
        Self {
            fqname,
            path: path.into(),
            root_scope,
            imported_asts: Vec::new(),
            imported_types: BTreeMap::new(),
            imported_names: BTreeSet::new(),
            imported_names_granular: BTreeSet::new(),
            referenced_types: BTreeSet::new(),
            file_hash: None,
        }
    }

    pub fn fqname(&self) -> &FqName {
        &self.fqname
    }

    pub fn package(&self) -> FqName {
        self.fqname.package_and_version()
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn root_scope(&self) -> TypeId {
        self.root_scope
    }

    pub fn is_types_file(&self) -> bool {
        self.fqname.name() == "types"
    }

    pub fn imported_asts(&self) -> &[AstId] {
        &self.imported_asts
    }

    pub fn add_imported_ast(&mut self, ast: AstId) {
        if !self.imported_asts.contains(&ast) {
            self.imported_asts.push(ast);
        }
    }

    pub fn imported_types(&self) -> &BTreeMap<AstId, BTreeSet<TypeId>> {
        &self.imported_types
    }

    pub fn add_imported_type(&mut self, ast: AstId, ty: TypeId) {
        self.imported_types.entry(ast).or_default().insert(ty);
    }

    /// A whole-file import supersedes any single-type imports from it.
    pub fn clear_imported_types(&mut self, ast: AstId) {
        self.imported_types.remove(&ast);
    }

    pub fn imported_names(&self) -> &BTreeSet<FqName> {
        &self.imported_names
    }

    pub fn add_imported_name(&mut self, name: FqName) {
        self.imported_names.insert(name);
    }

    pub fn imported_names_granular(&self) -> &BTreeSet<FqName> {
        &self.imported_names_granular
    }

    /// Record an import statement; our own names are defined, not imported.
    pub fn add_imported_name_granular(&mut self, name: FqName) {
        if name.package_and_version() != self.package() {
            self.imported_names_granular.insert(name);
        }
    }

    pub fn referenced_types(&self) -> &BTreeSet<FqName> {
        &self.referenced_types
    }

    pub fn add_referenced_type(&mut self, name: FqName) {
        self.referenced_types.insert(name);
    }

    pub fn file_hash(&self) -> Option<&str> {
        self.file_hash.as_deref()
    }

    pub fn set_file_hash(&mut self, hash: String) {
        self.file_hash = Some(hash);
    }
}

impl Arena {
    /// Full name for a declaration about to be added under `scope`.
    pub fn make_full_name(&self, ast: AstId, scope: TypeId, local: &str) -> FqName {
        let root = self.ast(ast).root_scope();
        let mut components = vec![local.to_string()];
        let mut current = scope;
        while current != root {
            components.push(self.ty(current).local_name().to_string());
            current = self.ty(current).parent.expect("scope chain reaches root");
        }
        components.reverse();
        self.ast(ast).fqname().with_name(components.join("."))
    }

    /// Every named declaration in the file, outermost first.
    pub fn defined_types(&self, ast: AstId) -> Vec<TypeId> {
        let mut out = Vec::new();
        self.collect_defined(self.ast(ast).root_scope(), &mut out);
        out
    }

    fn collect_defined(&self, scope: TypeId, out: &mut Vec<TypeId>) {
        for &child in self.scope(scope).children() {
            if self.ty(child).kind.is_named_decl() {
                out.push(child);
            }
            if self.ty(child).scope.is_some() {
                self.collect_defined(child, out);
            }
        }
    }

    /// First declaration in the file whose full name ends with `partial`,
    /// in declaration order.
    pub fn find_defined_type(&self, ast: AstId, partial: &FqName) -> Option<(TypeId, FqName)> {
        self.defined_types(ast).into_iter().find_map(|id| {
            let fq = self.ty(id).fqname()?;
            fq.ends_with(partial).then(|| (id, fq.clone()))
        })
    }

    /// The interface a file declares at top level, if any.
    pub fn ast_interface(&self, ast: AstId) -> Option<TypeId> {
        self.scope(self.ast(ast).root_scope())
            .children()
            .iter()
            .copied()
            .find(|&id| self.ty(id).kind.is_interface())
    }

    pub fn defines_interfaces(&self, ast: AstId) -> bool {
        self.defined_types(ast)
            .iter()
            .any(|&id| self.ty(id).kind.is_interface())
    }

    /// Does the file directly or transitively declare anything but
    /// typedefs? Used when deciding whether an import is meaningful.
    pub fn defines_only_typedefs(&self, ast: AstId) -> bool {
        self.defined_types(ast)
            .iter()
            .all(|&id| matches!(self.ty(id).kind, TypeKind::TypeDef { .. }))
    }
}
