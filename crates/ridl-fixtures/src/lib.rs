//! Test fixtures for the ridl resolution engine
//!
//! Provides an in-memory [`SourceParser`] whose files are described with a
//! small builder DSL instead of surface syntax, so resolution tests can
//! construct packages without a text parser. Every fixture set carries the
//! base package `ridl.base@1.0` with its root interface `IBase`, which
//! interfaces extend implicitly.

use std::collections::BTreeMap;

use ridl_core::arena::{Arena, AstId, ExprId, TypeId, TypeRefId};
use ridl_core::coordinator::{Coordinator, SourceParser};
use ridl_core::error::Result;
use ridl_core::expr::{BinaryOp, ExprNode, UnaryOp};
use ridl_core::fqname::FqName;
use ridl_core::location::{Location, Position};
use ridl_core::refs::{IdentRef, TypeRef};
use ridl_core::types::{
    Annotation, ArrayData, CompoundData, CompoundStyle, EnumData, EnumValue, Field, FmqFlavor,
    InterfaceData, Method, TypeKind, TypeName, TypeNode,
};

/// The interface every fixture interface implicitly extends.
pub const BASE_INTERFACE: &str = "ridl.base@1.0::IBase";

/// A type use, by name or as an anonymous container.
#[derive(Debug, Clone)]
pub enum TySpec {
    Name(String),
    Vec(Box<TySpec>),
    Array(Box<TySpec>, Vec<ExprSpec>),
    Fmq(FmqFlavor, Box<TySpec>),
    RefOf(Box<TySpec>),
    Bitfield(Box<TySpec>),
}

pub fn named(name: &str) -> TySpec {
    TySpec::Name(name.to_string())
}

pub fn vec_of(element: TySpec) -> TySpec {
    TySpec::Vec(Box::new(element))
}

pub fn array_of(element: TySpec, dims: &[ExprSpec]) -> TySpec {
    TySpec::Array(Box::new(element), dims.to_vec())
}

pub fn bitfield_of(element: TySpec) -> TySpec {
    TySpec::Bitfield(Box::new(element))
}

/// A constant expression, mirroring the expression grammar.
#[derive(Debug, Clone)]
pub enum ExprSpec {
    Lit(String),
    Ref(String),
    Un(UnaryOp, Box<ExprSpec>),
    Bin(BinaryOp, Box<ExprSpec>, Box<ExprSpec>),
    Tern(Box<ExprSpec>, Box<ExprSpec>, Box<ExprSpec>),
    Attr(String, String),
}

pub fn lit(text: &str) -> ExprSpec {
    ExprSpec::Lit(text.to_string())
}

pub fn refv(name: &str) -> ExprSpec {
    ExprSpec::Ref(name.to_string())
}

pub fn bin(op: BinaryOp, lhs: ExprSpec, rhs: ExprSpec) -> ExprSpec {
    ExprSpec::Bin(op, Box::new(lhs), Box::new(rhs))
}

pub fn un(op: UnaryOp, operand: ExprSpec) -> ExprSpec {
    ExprSpec::Un(op, Box::new(operand))
}

pub fn attr(type_name: &str, tag: &str) -> ExprSpec {
    ExprSpec::Attr(type_name.to_string(), tag.to_string())
}

type BuildFn = Box<dyn Fn(&mut FileBuilder<'_, '_>) -> Result<()> + Send + Sync>;

struct FileFixture {
    source: String,
    build: BuildFn,
}

/// A set of in-memory files keyed by fully-qualified file name.
pub struct FixtureSet {
    files: BTreeMap<FqName, FileFixture>,
}

impl Default for FixtureSet {
    fn default() -> Self {
        Self::new()
    }
}

impl FixtureSet {
    pub fn new() -> Self {
        let mut set = Self {
            files: BTreeMap::new(),
        };
        set.file(BASE_INTERFACE, |b| {
            b.root_interface_def("IBase", |_| Ok(()))?;
            Ok(())
        });
        set
    }

    /// Register a file under a name like `demo@1.0::IFoo` or
    /// `demo@1.0::types`.
    pub fn file(
        &mut self,
        name: &str,
        build: impl Fn(&mut FileBuilder<'_, '_>) -> Result<()> + Send + Sync + 'static,
    ) -> &mut Self {
        let fq = FqName::parse(name).expect("valid fixture file name");
        self.files.insert(
            fq,
            FileFixture {
                source: format!("// fixture {}\n", name),
                build: Box::new(build),
            },
        );
        self
    }

    /// Parse one file with a fresh coordinator.
    pub fn parse(&self, arena: &mut Arena, file: &str) -> Result<AstId> {
        let mut coordinator = Coordinator::new();
        self.parse_with(&mut coordinator, arena, file)
    }

    /// Parse one file, sharing the coordinator's cache with other calls.
    pub fn parse_with(
        &self,
        coordinator: &mut Coordinator,
        arena: &mut Arena,
        file: &str,
    ) -> Result<AstId> {
        coordinator.parse(arena, self, &FqName::parse(file)?)
    }
}

impl SourceParser for FixtureSet {
    fn exists(&self, file: &FqName) -> bool {
        self.files.contains_key(file)
    }

    fn content(&self, file: &FqName) -> Option<String> {
        self.files.get(file).map(|f| f.source.clone())
    }

    fn package_interfaces(&self, package: &FqName) -> Result<Vec<FqName>> {
        Ok(self
            .files
            .keys()
            .filter(|fq| fq.package_and_version() == *package && fq.name() != "types")
            .cloned()
            .collect())
    }

    fn populate(
        &self,
        coordinator: &mut Coordinator,
        arena: &mut Arena,
        ast: AstId,
        file: &FqName,
    ) -> Result<()> {
        let fixture = self
            .files
            .get(file)
            .expect("populate called for an existing file");
        let mut builder = FileBuilder {
            fixtures: self,
            coordinator,
            arena,
            ast,
            scopes: vec![],
            line: 1,
        };
        builder.scopes.push(builder.arena.ast(ast).root_scope());
        (fixture.build)(&mut builder)
    }
}

/// Builds one file's declarations, tracking a current scope and handing
/// out one source line per declaration so location-sensitive checks see
/// realistic positions.
pub struct FileBuilder<'c, 'a> {
    fixtures: &'c FixtureSet,
    coordinator: &'c mut Coordinator,
    arena: &'a mut Arena,
    ast: AstId,
    scopes: Vec<TypeId>,
    line: usize,
}

impl FileBuilder<'_, '_> {
    pub fn arena(&mut self) -> &mut Arena {
        self.arena
    }

    fn path(&self) -> String {
        self.arena.ast(self.ast).path().to_string()
    }

    fn next_line(&mut self) -> Location {
        let line = self.line;
        self.line += 1;
        Location::new(self.path(), Position::new(line, 1), Position::new(line, 80))
    }

    /// Location of the declaration currently being built.
    fn here(&self) -> Location {
        let line = self.line.saturating_sub(1).max(1);
        Location::new(self.path(), Position::new(line, 1), Position::new(line, 80))
    }

    fn scope(&self) -> TypeId {
        *self.scopes.last().expect("scope stack is never empty")
    }

    pub fn import(&mut self, name: &str) -> Result<()> {
        let fq = FqName::parse(name)?;
        self.coordinator
            .add_import(self.arena, self.fixtures, self.ast, &fq)
    }

    pub fn type_ref(&mut self, spec: &TySpec) -> Result<TypeRefId> {
        let location = self.here();
        Ok(match spec {
            TySpec::Name(name) => self
                .arena
                .alloc_type_ref(TypeRef::new(FqName::parse(name)?, location)),
            TySpec::Vec(element) => {
                let element = self.type_ref(element)?;
                let node = self.anonymous(TypeNode::new(TypeKind::Vector { element }));
                self.arena.alloc_type_ref(TypeRef::bound(node, location))
            }
            TySpec::Array(element, dims) => {
                let element = self.type_ref(element)?;
                let dims = dims
                    .iter()
                    .map(|d| self.expr(d))
                    .collect::<Result<Vec<_>>>()?;
                let node = self.anonymous(TypeNode::new(TypeKind::Array(ArrayData { element, dims })));
                self.arena.alloc_type_ref(TypeRef::bound(node, location))
            }
            TySpec::Fmq(flavor, element) => {
                let element = self.type_ref(element)?;
                let node = self.anonymous(TypeNode::new(TypeKind::Fmq {
                    flavor: *flavor,
                    element,
                }));
                self.arena.alloc_type_ref(TypeRef::bound(node, location))
            }
            TySpec::RefOf(element) => {
                let element = self.type_ref(element)?;
                let node = self.anonymous(TypeNode::new(TypeKind::Ref { element }));
                self.arena.alloc_type_ref(TypeRef::bound(node, location))
            }
            TySpec::Bitfield(element) => {
                let element = self.type_ref(element)?;
                let node = self.anonymous(TypeNode::new(TypeKind::Bitfield { element }));
                self.arena.alloc_type_ref(TypeRef::bound(node, location))
            }
        })
    }

    /// Anonymous container types still resolve their element names from
    /// the scope they appear in.
    fn anonymous(&mut self, mut node: TypeNode) -> TypeId {
        node.parent = Some(self.scope());
        self.arena.alloc_type(node)
    }

    pub fn expr(&mut self, spec: &ExprSpec) -> Result<ExprId> {
        let location = self.here();
        Ok(match spec {
            ExprSpec::Lit(text) => self.arena.alloc_expr(ExprNode::literal(text.clone())),
            ExprSpec::Ref(name) => {
                let ident = self
                    .arena
                    .alloc_ident_ref(IdentRef::new(FqName::parse(name)?, location));
                self.arena.new_reference_expr(ident)
            }
            ExprSpec::Un(op, operand) => {
                let operand = self.expr(operand)?;
                self.arena.new_unary_expr(*op, operand)
            }
            ExprSpec::Bin(op, lhs, rhs) => {
                let lhs = self.expr(lhs)?;
                let rhs = self.expr(rhs)?;
                self.arena.new_binary_expr(*op, lhs, rhs)
            }
            ExprSpec::Tern(cond, then_val, else_val) => {
                let cond = self.expr(cond)?;
                let then_val = self.expr(then_val)?;
                let else_val = self.expr(else_val)?;
                self.arena.new_ternary_expr(cond, then_val, else_val)
            }
            ExprSpec::Attr(type_name, tag) => {
                let target = self
                    .arena
                    .alloc_type_ref(TypeRef::new(FqName::parse(type_name)?, location));
                self.arena.new_attribute_expr(target, tag.clone())
            }
        })
    }

    fn add_named(&mut self, mut node: TypeNode, local: &str, location: Location) -> Result<TypeId> {
        let scope = self.scope();
        let fqname = self.arena.make_full_name(self.ast, scope, local);
        node.name = Some(TypeName {
            local: local.to_string(),
            fqname,
            location,
        });
        node.parent = Some(scope);
        let id = self.arena.alloc_type(node);
        self.arena.add_to_scope(scope, id)?;
        Ok(id)
    }

    fn close_location(&mut self, id: TypeId, open: &Location) {
        let end_line = self.line.saturating_sub(1).max(1);
        let location = Location::new(self.path(), open.begin(), Position::new(end_line, 80));
        if let Some(name) = &mut self.arena.ty_mut(id).name {
            name.location = location;
        }
    }

    pub fn typedef(&mut self, name: &str, target: TySpec) -> Result<TypeId> {
        let location = self.next_line();
        let referenced = self.type_ref(&target)?;
        self.add_named(TypeNode::new(TypeKind::TypeDef { referenced }), name, location)
    }

    pub fn enum_def(
        &mut self,
        name: &str,
        storage: TySpec,
        values: &[(&str, Option<ExprSpec>)],
    ) -> Result<TypeId> {
        let location = self.next_line();
        let storage = self.type_ref(&storage)?;
        let mut built = Vec::new();
        for (value_name, spec) in values {
            let value_location = self.next_line();
            let expr = spec.as_ref().map(|s| self.expr(s)).transpose()?;
            built.push(EnumValue {
                name: value_name.to_string(),
                expr,
                location: value_location,
                auto: false,
            });
        }
        let id = self.add_named(
            TypeNode::new(TypeKind::Enum(EnumData {
                storage,
                values: built,
            })),
            name,
            location.clone(),
        )?;
        self.next_line(); // closing brace
        self.close_location(id, &location);
        Ok(id)
    }

    pub fn struct_def(&mut self, name: &str, fields: &[(&str, TySpec)]) -> Result<TypeId> {
        self.compound_def(name, CompoundStyle::Struct, fields, |_| Ok(()))
    }

    pub fn union_def(&mut self, name: &str, fields: &[(&str, TySpec)]) -> Result<TypeId> {
        self.compound_def(name, CompoundStyle::Union, fields, |_| Ok(()))
    }

    pub fn safe_union_def(&mut self, name: &str, fields: &[(&str, TySpec)]) -> Result<TypeId> {
        self.compound_def(name, CompoundStyle::SafeUnion, fields, |_| Ok(()))
    }

    /// A compound with nested declarations built by `nested` inside its
    /// scope.
    pub fn compound_def(
        &mut self,
        name: &str,
        style: CompoundStyle,
        fields: &[(&str, TySpec)],
        nested: impl FnOnce(&mut Self) -> Result<()>,
    ) -> Result<TypeId> {
        let location = self.next_line();
        let id = self.add_named(
            TypeNode::new(TypeKind::Compound(CompoundData {
                style,
                fields: Vec::new(),
            })),
            name,
            location.clone(),
        )?;

        self.scopes.push(id);
        nested(self)?;
        let mut built = Vec::new();
        for (field_name, spec) in fields {
            let field_location = self.next_line();
            let ty = self.type_ref(spec)?;
            built.push(Field {
                name: field_name.to_string(),
                ty,
                location: field_location,
            });
        }
        self.scopes.pop();

        if let TypeKind::Compound(data) = &mut self.arena.ty_mut(id).kind {
            data.fields = built;
        }
        self.next_line();
        self.close_location(id, &location);
        Ok(id)
    }

    /// An interface extending `extends`, or the base interface when
    /// `None`. The base package is imported automatically.
    pub fn interface_def(
        &mut self,
        name: &str,
        extends: Option<&str>,
        body: impl FnOnce(&mut Self) -> Result<()>,
    ) -> Result<TypeId> {
        let super_name = extends.unwrap_or(BASE_INTERFACE).to_string();
        if extends.is_none() {
            self.import(BASE_INTERFACE)?;
        }
        let location = self.next_line();
        let super_location = self.here();
        let super_ref = self
            .arena
            .alloc_type_ref(TypeRef::new(FqName::parse(&super_name)?, super_location));
        self.finish_interface(name, super_ref, location, body)
    }

    /// An interface with no super at all; only the base interface itself
    /// uses this.
    pub fn root_interface_def(
        &mut self,
        name: &str,
        body: impl FnOnce(&mut Self) -> Result<()>,
    ) -> Result<TypeId> {
        let location = self.next_line();
        let super_location = self.here();
        let super_ref = self.arena.alloc_type_ref(TypeRef::empty(super_location));
        self.finish_interface(name, super_ref, location, body)
    }

    fn finish_interface(
        &mut self,
        name: &str,
        super_ref: TypeRefId,
        location: Location,
        body: impl FnOnce(&mut Self) -> Result<()>,
    ) -> Result<TypeId> {
        let id = self.add_named(
            TypeNode::new(TypeKind::Interface(InterfaceData {
                super_ref,
                methods: Vec::new(),
            })),
            name,
            location.clone(),
        )?;
        self.scopes.push(id);
        body(self)?;
        self.scopes.pop();
        self.next_line();
        self.close_location(id, &location);
        Ok(id)
    }

    /// A two-way method on the innermost interface scope.
    pub fn method(
        &mut self,
        name: &str,
        args: &[(&str, TySpec)],
        results: &[(&str, TySpec)],
    ) -> Result<()> {
        self.method_full(name, args, results, false, &[])
    }

    pub fn oneway_method(&mut self, name: &str, args: &[(&str, TySpec)]) -> Result<()> {
        self.method_full(name, args, &[], true, &[])
    }

    pub fn method_full(
        &mut self,
        name: &str,
        args: &[(&str, TySpec)],
        results: &[(&str, TySpec)],
        oneway: bool,
        annotations: &[&str],
    ) -> Result<()> {
        let location = self.next_line();
        let mut method = Method::user(name, location);
        method.oneway = oneway;
        method.annotations = annotations
            .iter()
            .map(|a| Annotation {
                name: a.to_string(),
                params: Vec::new(),
            })
            .collect();
        for (arg_name, spec) in args {
            let field_location = self.here();
            let ty = self.type_ref(spec)?;
            method.args.push(Field {
                name: arg_name.to_string(),
                ty,
                location: field_location,
            });
        }
        for (result_name, spec) in results {
            let field_location = self.here();
            let ty = self.type_ref(spec)?;
            method.results.push(Field {
                name: result_name.to_string(),
                ty,
                location: field_location,
            });
        }

        let iface = self.scope();
        match &mut self.arena.ty_mut(iface).kind {
            TypeKind::Interface(data) => {
                data.methods.push(method);
                Ok(())
            }
            _ => Err(ridl_core::error::CoreError::Internal(
                "method outside an interface scope".into(),
            )),
        }
    }
}

/// A ready-made package exercising most of the type system, used by the
/// integration tests.
pub fn demo_package() -> FixtureSet {
    use BinaryOp::Shl;

    let mut set = FixtureSet::new();
    set.file("demo.graphics@1.0::types", |b| {
        b.enum_def(
            "PixelFormat",
            named("uint32_t"),
            &[
                ("UNKNOWN", None),
                ("RGBA", Some(lit("0x1"))),
                ("BGRA", None),
                ("YCBCR", Some(bin(Shl, lit("1"), lit("4")))),
            ],
        )?;
        b.struct_def(
            "Rect",
            &[
                ("left", named("int32_t")),
                ("top", named("int32_t")),
                ("width", named("uint32_t")),
                ("height", named("uint32_t")),
            ],
        )?;
        b.struct_def(
            "Frame",
            &[
                ("bounds", named("Rect")),
                ("format", named("PixelFormat")),
                ("planes", array_of(named("uint64_t"), &[lit("3")])),
            ],
        )?;
        b.struct_def("Usage", &[("formats", bitfield_of(named("PixelFormat")))])?;
        Ok(())
    });
    set.file("demo.graphics@1.0::IComposer", |b| {
        b.interface_def("IComposer", None, |b| {
            b.enum_def(
                "Capability",
                named("uint8_t"),
                &[("NONE", None), ("SIDEBAND", None)],
            )?;
            b.method(
                "getCapabilities",
                &[],
                &[("capabilities", vec_of(named("Capability")))],
            )?;
            b.method(
                "present",
                &[("frame", named("Frame"))],
                &[("status", named("int32_t"))],
            )?;
            b.oneway_method("invalidate", &[])?;
            Ok(())
        })?;
        Ok(())
    });
    set
}
