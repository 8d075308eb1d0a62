//! The closed type model
//!
//! Every declared or builtin type is a [`TypeNode`] stored in the arena,
//! with its variant data in [`TypeKind`]. Nodes advance through the
//! [`ParseStage`] machine: freshly parsed nodes sit at `Parse`, the
//! resolution pipeline moves a whole file to `PostParse` and finally to
//! `Completed`. Passes refuse to touch nodes at the wrong stage.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::arena::{Arena, ExprId, TypeId, TypeRefId};
use crate::fqname::FqName;
use crate::location::Location;
use crate::scalar::ScalarKind;
use crate::scope::ScopeData;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ParseStage {
    Parse,
    PostParse,
    Completed,
}

/// Name and declaration site of a named type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeName {
    pub local: String,
    pub fqname: FqName,
    pub location: Location,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeNode {
    pub kind: TypeKind,
    pub stage: ParseStage,
    pub name: Option<TypeName>,
    pub parent: Option<TypeId>,
    pub scope: Option<ScopeData>,
}

impl TypeNode {
    pub fn new(kind: TypeKind) -> Self {
        let scope = kind.is_scope().then(ScopeData::default);
        Self {
            kind,
            stage: ParseStage::Parse,
            name: None,
            parent: None,
            scope,
        }
    }

    pub fn named(kind: TypeKind, name: TypeName, parent: TypeId) -> Self {
        let mut node = Self::new(kind);
        node.name = Some(name);
        node.parent = Some(parent);
        node
    }

    pub fn local_name(&self) -> &str {
        self.name.as_ref().map(|n| n.local.as_str()).unwrap_or("")
    }

    pub fn fqname(&self) -> Option<&FqName> {
        self.name.as_ref().map(|n| &n.fqname)
    }

    pub fn location(&self) -> Location {
        self.name
            .as_ref()
            .map(|n| n.location.clone())
            .unwrap_or_else(Location::none)
    }

    /// Human-readable identity for diagnostics.
    pub fn describe(&self) -> String {
        match self.fqname() {
            Some(fq) => fq.to_string(),
            None => self.kind.type_name().to_string(),
        }
    }

    /// References held directly by this node, in declaration order.
    pub fn local_type_refs(&self) -> Vec<TypeRefId> {
        match &self.kind {
            TypeKind::Enum(data) => vec![data.storage],
            TypeKind::Array(data) => vec![data.element],
            TypeKind::Vector { element }
            | TypeKind::Fmq { element, .. }
            | TypeKind::Ref { element }
            | TypeKind::Bitfield { element } => vec![*element],
            TypeKind::TypeDef { referenced } => vec![*referenced],
            TypeKind::Compound(data) => data.fields.iter().map(|f| f.ty).collect(),
            TypeKind::Interface(data) => {
                let mut refs = vec![data.super_ref];
                for method in &data.methods {
                    refs.extend(method.args.iter().map(|f| f.ty));
                    refs.extend(method.results.iter().map(|f| f.ty));
                }
                refs
            }
            _ => Vec::new(),
        }
    }

    /// Constant expressions held directly by this node.
    pub fn local_exprs(&self) -> Vec<ExprId> {
        match &self.kind {
            TypeKind::Enum(data) => data.values.iter().filter_map(|v| v.expr).collect(),
            TypeKind::Array(data) => data.dims.clone(),
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TypeKind {
    Scalar(ScalarKind),
    String,
    Enum(EnumData),
    Array(ArrayData),
    Vector { element: TypeRefId },
    Fmq { flavor: FmqFlavor, element: TypeRefId },
    Compound(CompoundData),
    Interface(InterfaceData),
    TypeDef { referenced: TypeRefId },
    Handle,
    Memory,
    Pointer,
    Ref { element: TypeRefId },
    /// `bitfield<E>`; carried on the wire as E's storage scalar.
    Bitfield { element: TypeRefId },
    DeathRecipient,
    /// The anonymous scope holding a file's top-level declarations.
    RootScope,
}

impl TypeKind {
    pub fn is_scope(&self) -> bool {
        matches!(
            self,
            TypeKind::Enum(_)
                | TypeKind::Compound(_)
                | TypeKind::Interface(_)
                | TypeKind::RootScope
        )
    }

    pub fn is_interface(&self) -> bool {
        matches!(self, TypeKind::Interface(_))
    }

    pub fn is_enum(&self) -> bool {
        matches!(self, TypeKind::Enum(_))
    }

    /// May a declaration of this kind appear named inside a scope?
    pub fn is_named_decl(&self) -> bool {
        matches!(
            self,
            TypeKind::Enum(_)
                | TypeKind::Compound(_)
                | TypeKind::Interface(_)
                | TypeKind::TypeDef { .. }
        )
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            TypeKind::Scalar(_) => "scalar",
            TypeKind::String => "string",
            TypeKind::Enum(_) => "enum",
            TypeKind::Array(_) => "array",
            TypeKind::Vector { .. } => "vec",
            TypeKind::Fmq { flavor: FmqFlavor::Sync, .. } => "fmq_sync",
            TypeKind::Fmq { flavor: FmqFlavor::Unsync, .. } => "fmq_unsync",
            TypeKind::Compound(data) => data.style.keyword(),
            TypeKind::Interface(_) => "interface",
            TypeKind::TypeDef { .. } => "typedef",
            TypeKind::Handle => "handle",
            TypeKind::Memory => "memory",
            TypeKind::Pointer => "pointer",
            TypeKind::Ref { .. } => "ref",
            TypeKind::Bitfield { .. } => "bitfield",
            TypeKind::DeathRecipient => "death_recipient",
            TypeKind::RootScope => "(root scope)",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FmqFlavor {
    Sync,
    Unsync,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompoundStyle {
    Struct,
    Union,
    SafeUnion,
}

impl CompoundStyle {
    pub fn keyword(self) -> &'static str {
        match self {
            CompoundStyle::Struct => "struct",
            CompoundStyle::Union => "union",
            CompoundStyle::SafeUnion => "safe_union",
        }
    }
}

/// A named, typed slot: a compound field, a method argument or a method
/// result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub ty: TypeRefId,
    pub location: Location,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompoundData {
    pub style: CompoundStyle,
    pub fields: Vec<Field>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnumData {
    pub storage: TypeRefId,
    pub values: Vec<EnumValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnumValue {
    pub name: String,
    pub expr: Option<ExprId>,
    pub location: Location,
    /// Expression synthesized by inheritance resolution, not written in
    /// the source.
    pub auto: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArrayData {
    pub element: TypeRefId,
    /// Outermost dimension first.
    pub dims: Vec<ExprId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceData {
    /// Empty reference on the root interface.
    pub super_ref: TypeRefId,
    pub methods: Vec<Method>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Method {
    pub name: String,
    pub args: Vec<Field>,
    pub results: Vec<Field>,
    pub oneway: bool,
    pub annotations: Vec<Annotation>,
    /// Transaction id, assigned during inheritance resolution (fixed at
    /// construction for reserved methods).
    pub serial: Option<u32>,
    pub reserved: bool,
    pub location: Location,
}

impl Method {
    pub fn user(name: impl Into<String>, location: Location) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
            results: Vec::new(),
            oneway: false,
            annotations: Vec::new(),
            serial: None,
            reserved: false,
            location,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Annotation {
    pub name: String,
    pub params: Vec<(String, Vec<String>)>,
}

impl Arena {
    /// Follow typedef chains to the underlying type. Unresolved references
    /// stop the walk.
    pub fn strip_typedefs(&self, mut id: TypeId) -> TypeId {
        loop {
            match &self.ty(id).kind {
                TypeKind::TypeDef { referenced } => match self.type_ref(*referenced).target() {
                    Some(next) => id = next,
                    None => return id,
                },
                _ => return id,
            }
        }
    }

    /// Does a resolved reference reach an interface, through typedefs?
    pub fn ref_targets_interface(&self, r: TypeRefId) -> bool {
        match self.type_ref(r).target() {
            Some(t) => self.ty(self.strip_typedefs(t)).kind.is_interface(),
            None => false,
        }
    }

    /// Wire alignment and size in bytes.
    pub fn alignment_and_size(&self, id: TypeId) -> (usize, usize) {
        match &self.ty(id).kind {
            TypeKind::Scalar(k) => (k.size_bytes(), k.size_bytes()),
            TypeKind::String => (8, 16),
            TypeKind::Vector { .. } => (8, 16),
            TypeKind::Handle => (8, 16),
            TypeKind::Memory => (8, 40),
            TypeKind::Fmq { .. } => (8, 40),
            TypeKind::Pointer | TypeKind::Ref { .. } => (8, 8),
            TypeKind::Interface(_) | TypeKind::DeathRecipient => (8, 8),
            TypeKind::Enum(data) => {
                let storage = self
                    .type_ref(data.storage)
                    .target()
                    .expect("enum storage resolved");
                self.alignment_and_size(storage)
            }
            TypeKind::TypeDef { referenced } => {
                let target = self
                    .type_ref(*referenced)
                    .target()
                    .expect("typedef resolved");
                self.alignment_and_size(target)
            }
            TypeKind::Array(data) => {
                let element = self
                    .type_ref(data.element)
                    .target()
                    .expect("array element resolved");
                let (align, size) = self.alignment_and_size(element);
                let count: usize = data
                    .dims
                    .iter()
                    .map(|d| self.expr_value_usize(*d))
                    .product();
                (align, size * count)
            }
            TypeKind::Bitfield { element } => {
                let element = self
                    .type_ref(*element)
                    .target()
                    .expect("bitfield element resolved");
                self.alignment_and_size(element)
            }
            TypeKind::Compound(_) => {
                let layout = self.compound_layout(id);
                (layout.overall.align, layout.overall.size)
            }
            TypeKind::RootScope => unreachable!("root scope has no layout"),
        }
    }

    /// The scalar kind behind enums, typedefs and plain scalars, if any.
    pub fn underlying_scalar(&self, id: TypeId) -> Option<ScalarKind> {
        match &self.ty(self.strip_typedefs(id)).kind {
            TypeKind::Scalar(k) => Some(*k),
            TypeKind::Enum(data) => {
                let storage = self.type_ref(data.storage).target()?;
                self.underlying_scalar(storage)
            }
            TypeKind::Bitfield { element } => {
                let element = self.type_ref(*element).target()?;
                self.underlying_scalar(element)
            }
            _ => None,
        }
    }

    /// Usable directly as an enum value or constant without wrapping.
    pub fn is_elidable(&self, id: TypeId) -> bool {
        match &self.ty(id).kind {
            TypeKind::Scalar(_)
            | TypeKind::String
            | TypeKind::Enum(_)
            | TypeKind::Interface(_)
            | TypeKind::Pointer => true,
            TypeKind::TypeDef { referenced } => self
                .type_ref(*referenced)
                .target()
                .is_some_and(|t| self.is_elidable(t)),
            TypeKind::Bitfield { element } => self
                .type_ref(*element)
                .target()
                .is_some_and(|t| self.is_elidable(t)),
            _ => false,
        }
    }

    /// Serialization needs a second pass to embed this type's out-of-line
    /// data.
    pub fn needs_embedded_read_write(&self, id: TypeId) -> bool {
        self.deep_query(id, &mut HashSet::new(), &|kind| match kind {
            TypeKind::String
            | TypeKind::Vector { .. }
            | TypeKind::Handle
            | TypeKind::Memory
            | TypeKind::Fmq { .. } => Query::Yes,
            TypeKind::Interface(_) => Query::No,
            TypeKind::Compound(_) | TypeKind::Array(_) | TypeKind::TypeDef { .. } => {
                Query::Recurse
            }
            _ => Query::No,
        })
    }

    /// Contains a `ref<T>` that must be patched after embedding.
    pub fn needs_resolve_references(&self, id: TypeId) -> bool {
        self.deep_query(id, &mut HashSet::new(), &|kind| match kind {
            TypeKind::Ref { .. } => Query::Yes,
            TypeKind::Compound(_)
            | TypeKind::Array(_)
            | TypeKind::Vector { .. }
            | TypeKind::TypeDef { .. } => Query::Recurse,
            _ => Query::No,
        })
    }

    pub fn contains_pointer(&self, id: TypeId) -> bool {
        self.deep_query(id, &mut HashSet::new(), &|kind| match kind {
            TypeKind::Pointer | TypeKind::Ref { .. } => Query::Yes,
            TypeKind::Compound(_)
            | TypeKind::Array(_)
            | TypeKind::Vector { .. }
            | TypeKind::TypeDef { .. } => Query::Recurse,
            _ => Query::No,
        })
    }

    /// Representable in the Java backend.
    pub fn is_java_compatible(&self, id: TypeId) -> bool {
        !self.deep_query(id, &mut HashSet::new(), &|kind| match kind {
            TypeKind::Pointer | TypeKind::Ref { .. } => Query::Yes,
            TypeKind::Compound(data) if data.style == CompoundStyle::Union => Query::Yes,
            TypeKind::Compound(_)
            | TypeKind::Array(_)
            | TypeKind::Vector { .. }
            | TypeKind::Fmq { .. }
            | TypeKind::TypeDef { .. }
            | TypeKind::Interface(_) => Query::Recurse,
            _ => Query::No,
        })
    }

    /// Deep equality is meaningful for values of this type.
    pub fn can_check_equality(&self, id: TypeId) -> bool {
        !self.deep_query(id, &mut HashSet::new(), &|kind| match kind {
            TypeKind::Interface(_)
            | TypeKind::Handle
            | TypeKind::Pointer
            | TypeKind::Ref { .. }
            | TypeKind::Memory
            | TypeKind::Fmq { .. }
            | TypeKind::DeathRecipient => Query::Yes,
            TypeKind::Compound(data) if data.style == CompoundStyle::Union => Query::Yes,
            TypeKind::Compound(_)
            | TypeKind::Array(_)
            | TypeKind::Vector { .. }
            | TypeKind::TypeDef { .. } => Query::Recurse,
            _ => Query::No,
        })
    }

    // Shared driver for the deep predicates. Cycles terminate through the
    // visited set; an already-visited node contributes nothing new.
    fn deep_query(
        &self,
        id: TypeId,
        visited: &mut HashSet<TypeId>,
        judge: &impl Fn(&TypeKind) -> Query,
    ) -> bool {
        if !visited.insert(id) {
            return false;
        }
        let node = self.ty(id);
        match judge(&node.kind) {
            Query::Yes => true,
            Query::No => false,
            Query::Recurse => {
                if let TypeKind::Interface(data) = &node.kind {
                    // only the inheritance chain matters, not methods
                    return match self.type_ref(data.super_ref).target() {
                        Some(s) => self.deep_query(s, visited, judge),
                        None => false,
                    };
                }
                node.local_type_refs()
                    .into_iter()
                    .filter_map(|r| self.type_ref(r).target())
                    .any(|t| self.deep_query(t, visited, judge))
            }
        }
    }

    /// References that force dependency ordering in the declaration graph.
    /// References to interfaces are always weak; containers other than
    /// arrays hold their elements out of line and are weak too.
    pub fn strong_refs(&self, id: TypeId) -> Vec<TypeRefId> {
        match &self.ty(id).kind {
            TypeKind::Enum(data) => vec![data.storage],
            TypeKind::Array(data) => vec![data.element],
            TypeKind::TypeDef { referenced } => vec![*referenced],
            TypeKind::Bitfield { element } => vec![*element],
            TypeKind::Compound(data) => data
                .fields
                .iter()
                .map(|f| f.ty)
                .filter(|r| !self.ref_targets_interface(*r))
                .collect(),
            TypeKind::Interface(data) => {
                let mut refs = Vec::new();
                if !self.type_ref(data.super_ref).is_empty() {
                    refs.push(data.super_ref);
                }
                for method in &data.methods {
                    refs.extend(
                        method
                            .args
                            .iter()
                            .chain(method.results.iter())
                            .map(|f| f.ty)
                            .filter(|r| !self.ref_targets_interface(*r)),
                    );
                }
                refs
            }
            _ => Vec::new(),
        }
    }
}

enum Query {
    Yes,
    No,
    Recurse,
}
