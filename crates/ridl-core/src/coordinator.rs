//! Cross-file parsing and the import graph
//!
//! The coordinator owns the file cache and drives parsing across package
//! boundaries. It is generic over a [`SourceParser`], which locates files
//! and builds their declarations into the arena; the coordinator handles
//! caching, circular-import detection, the implicit types-file import,
//! content hashing and the congruence checks between a file's name and
//! what it declares.

use std::collections::HashMap;

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::arena::{Arena, AstId, TypeId};
use crate::ast::Ast;
use crate::error::{CoreError, Result};
use crate::fqname::FqName;
use crate::types::{TypeKind, TypeNode};

/// Locates and builds source files for the coordinator.
pub trait SourceParser {
    /// Does a file for this fully-qualified file name exist?
    fn exists(&self, file: &FqName) -> bool;

    /// Raw file contents, used for content hashing.
    fn content(&self, file: &FqName) -> Option<String>;

    /// Filename carried by locations in this file.
    fn path(&self, file: &FqName) -> String {
        format!("{}.ridl", file)
    }

    /// The interface files a package provides, for whole-package imports.
    fn package_interfaces(&self, package: &FqName) -> Result<Vec<FqName>>;

    /// Build the file's declarations into `ast`. Implementations call back
    /// into the coordinator to register their imports.
    fn populate(
        &self,
        coordinator: &mut Coordinator,
        arena: &mut Arena,
        ast: AstId,
        file: &FqName,
    ) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CacheEntry {
    /// Still being parsed further up the call stack.
    InProgress,
    Ready(AstId),
    Failed,
}

/// Parse cache and import driver. One coordinator serves one arena.
#[derive(Default)]
pub struct Coordinator {
    cache: HashMap<FqName, CacheEntry>,
}

impl Coordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a file that must exist.
    pub fn parse<P: SourceParser>(
        &mut self,
        arena: &mut Arena,
        parser: &P,
        file: &FqName,
    ) -> Result<AstId> {
        self.parse_optional(arena, parser, file)?
            .ok_or_else(|| CoreError::Invalid(format!("could not find source for '{}'", file)))
    }

    /// Parse a file if its source exists. A file already on the parse
    /// stack is a circular import; a file that failed before stays failed.
    pub fn parse_optional<P: SourceParser>(
        &mut self,
        arena: &mut Arena,
        parser: &P,
        file: &FqName,
    ) -> Result<Option<AstId>> {
        match self.cache.get(file) {
            Some(CacheEntry::Ready(id)) => return Ok(Some(*id)),
            Some(CacheEntry::InProgress) => {
                return Err(CoreError::CircularImport(file.to_string()))
            }
            Some(CacheEntry::Failed) => return Err(CoreError::FailedImport(file.to_string())),
            None => {}
        }
        self.cache.insert(file.clone(), CacheEntry::InProgress);

        match self.parse_uncached(arena, parser, file) {
            Ok(Some(id)) => {
                self.cache.insert(file.clone(), CacheEntry::Ready(id));
                Ok(Some(id))
            }
            Ok(None) => {
                // a missing file is not an error to remember
                self.cache.remove(file);
                Ok(None)
            }
            Err(e) => {
                self.cache.insert(file.clone(), CacheEntry::Failed);
                Err(e)
            }
        }
    }

    fn parse_uncached<P: SourceParser>(
        &mut self,
        arena: &mut Arena,
        parser: &P,
        file: &FqName,
    ) -> Result<Option<AstId>> {
        // every interface file implicitly imports its package's types file
        let types_ast = if !is_types_file(file) {
            self.parse_optional(arena, parser, &file.types_for_package())?
        } else {
            None
        };

        if !parser.exists(file) {
            return Ok(None);
        }
        debug!(file = %file, "parsing");

        let root = arena.alloc_type(TypeNode::new(TypeKind::RootScope));
        let ast = arena.alloc_ast(Ast::new(file.clone(), parser.path(file), root));
        if let Some(types_ast) = types_ast {
            arena.ast_mut(ast).add_imported_ast(types_ast);
            arena
                .ast_mut(ast)
                .add_imported_name_granular(file.types_for_package());
        }
        if let Some(content) = parser.content(file) {
            let mut hasher = Sha256::new();
            hasher.update(content.as_bytes());
            arena
                .ast_mut(ast)
                .set_file_hash(format!("{:x}", hasher.finalize()));
        }

        parser.populate(self, arena, ast, file)?;
        arena.post_parse(ast)?;
        self.enforce_congruence(arena, ast, file)?;
        Ok(Some(ast))
    }

    // A file must declare what its name promises: an interface file
    // exactly its one interface, a types file no interfaces at all.
    fn enforce_congruence(&self, arena: &Arena, ast: AstId, file: &FqName) -> Result<()> {
        let interfaces: Vec<TypeId> = arena
            .defined_types(ast)
            .into_iter()
            .filter(|&id| arena.ty(id).kind.is_interface())
            .collect();

        if is_types_file(file) {
            if let Some(&first) = interfaces.first() {
                return Err(CoreError::Incongruent(format!(
                    "types file '{}' declares interface '{}'",
                    file,
                    arena.ty(first).describe()
                )));
            }
            return Ok(());
        }

        let top_level: Vec<TypeId> = interfaces
            .iter()
            .copied()
            .filter(|&id| Some(arena.ast(ast).root_scope()) == arena.ty(id).parent)
            .collect();
        match top_level.as_slice() {
            [one] if arena.ty(*one).local_name() == file.name() => Ok(()),
            [] => Err(CoreError::Incongruent(format!(
                "file '{}' does not declare interface '{}'",
                file,
                file.name()
            ))),
            _ => Err(CoreError::Incongruent(format!(
                "file '{}' must declare exactly the interface '{}'",
                file,
                file.name()
            ))),
        }
    }

    /// Register an import statement of `ast`: a whole package, a whole
    /// file, or a single type out of a file.
    pub fn add_import<P: SourceParser>(
        &mut self,
        arena: &mut Arena,
        parser: &P,
        ast: AstId,
        import: &FqName,
    ) -> Result<()> {
        let own = arena.ast(ast).fqname().clone();
        let fq = import.with_defaults(
            own.package(),
            own.version().expect("file names carry a version"),
        );

        if fq.name().is_empty() {
            // whole package: its types file, if any, plus each of its
            // interface files
            let types_file = fq.types_for_package();
            if let Some(imported) = self.parse_optional(arena, parser, &types_file)? {
                arena.ast_mut(ast).add_imported_name_granular(types_file);
                arena.ast_mut(ast).add_imported_ast(imported);
                arena.ast_mut(ast).clear_imported_types(imported);
            }
            for interface in parser.package_interfaces(&fq.package_and_version())? {
                arena.ast_mut(ast).add_imported_name_granular(interface.clone());
                let imported = self.parse(arena, parser, &interface)?;
                arena.ast_mut(ast).add_imported_ast(imported);
                arena.ast_mut(ast).clear_imported_types(imported);
            }
            return Ok(());
        }

        arena.ast_mut(ast).add_imported_name_granular(fq.clone());

        // the top-level component may name an interface file
        let interface_file = fq.top_level_type();
        if let Some(imported) = self.parse_optional(arena, parser, &interface_file)? {
            arena.ast_mut(ast).add_imported_ast(imported);
            if fq == interface_file {
                // whole-file import supersedes single-type ones
                arena.ast_mut(ast).clear_imported_types(imported);
                return Ok(());
            }
            // single type from that file
            let (found, _) = arena.find_defined_type(imported, &fq).ok_or_else(|| {
                CoreError::Invalid(format!("'{}' is not defined in '{}'", fq, interface_file))
            })?;
            arena.ast_mut(ast).add_imported_type(imported, found);
            return Ok(());
        }

        // otherwise it must live in the package's types file
        let types_file = fq.types_for_package();
        let imported = self.parse(arena, parser, &types_file)?;
        arena.ast_mut(ast).add_imported_ast(imported);
        let (found, _) = arena.find_defined_type(imported, &fq).ok_or_else(|| {
            CoreError::Invalid(format!("'{}' is not defined in '{}'", fq, types_file))
        })?;
        arena.ast_mut(ast).add_imported_type(imported, found);
        Ok(())
    }
}

fn is_types_file(file: &FqName) -> bool {
    file.name() == "types"
}
