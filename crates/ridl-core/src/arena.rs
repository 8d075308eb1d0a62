//! Per-run storage for every node the front end creates
//!
//! The arena owns all type nodes, constant expressions, reference slots
//! and parsed files for one run, handed around as plain `u32` ids. There
//! is no global state: builtin types and the reserved method table are
//! rebuilt for each arena.

use serde::{Deserialize, Serialize};

use crate::ast::Ast;
use crate::expr::ExprNode;
use crate::fqname::{FqName, Version};
use crate::location::Location;
use crate::refs::{IdentRef, TypeRef};
use crate::scalar::ScalarKind;
use crate::types::{
    CompoundData, CompoundStyle, EnumData, EnumValue, Field, Method, ParseStage, TypeKind,
    TypeName, TypeNode,
};

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        pub struct $name(u32);

        impl $name {
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

define_id!(/// Handle to a [`TypeNode`].
    TypeId);
define_id!(/// Handle to an [`ExprNode`].
    ExprId);
define_id!(/// Handle to a [`TypeRef`] slot.
    TypeRefId);
define_id!(/// Handle to an [`IdentRef`] slot.
    IdentRefId);
define_id!(/// Handle to a parsed [`Ast`].
    AstId);

/// Every transaction id is tagged with this byte in the top octet.
const RESERVED_ID_TAG: u32 = 0x0f;

/// First transaction id available to user methods.
pub const FIRST_CALL_TRANSACTION: u32 = 1;
/// Last transaction id available to user methods.
pub const LAST_CALL_TRANSACTION: u32 = 0x0eff_ffff;

fn pack_chars(c2: char, c3: char, c4: char) -> u32 {
    (RESERVED_ID_TAG << 24) | ((c2 as u32) << 16) | ((c3 as u32) << 8) | (c4 as u32)
}

const INTERNAL_PACKAGE: &str = "ridl.internal";

pub struct Arena {
    types: Vec<TypeNode>,
    exprs: Vec<ExprNode>,
    type_refs: Vec<TypeRef>,
    ident_refs: Vec<IdentRef>,
    asts: Vec<Ast>,
    builtins: Builtins,
    reserved_methods: Vec<Method>,
}

/// Ids of the types every run gets for free.
pub struct Builtins {
    scalars: Vec<TypeId>,
    pub string: TypeId,
    pub handle: TypeId,
    pub memory: TypeId,
    pub pointer: TypeId,
    pub death_recipient: TypeId,
    /// `struct DebugInfo { pid, ptr, arch }`, returned by `getDebugInfo`.
    pub debug_info: TypeId,
    vec_string: TypeId,
    vec_hash: TypeId,
}

impl Default for Arena {
    fn default() -> Self {
        Self::new()
    }
}

impl Arena {
    pub fn new() -> Self {
        let mut arena = Arena {
            types: Vec::new(),
            exprs: Vec::new(),
            type_refs: Vec::new(),
            ident_refs: Vec::new(),
            asts: Vec::new(),
            builtins: Builtins {
                scalars: Vec::new(),
                string: TypeId(0),
                handle: TypeId(0),
                memory: TypeId(0),
                pointer: TypeId(0),
                death_recipient: TypeId(0),
                debug_info: TypeId(0),
                vec_string: TypeId(0),
                vec_hash: TypeId(0),
            },
            reserved_methods: Vec::new(),
        };
        arena.install_builtins();
        arena.install_reserved_methods();
        arena
    }

    pub fn ty(&self, id: TypeId) -> &TypeNode {
        &self.types[id.index()]
    }

    pub fn ty_mut(&mut self, id: TypeId) -> &mut TypeNode {
        &mut self.types[id.index()]
    }

    pub fn expr(&self, id: ExprId) -> &ExprNode {
        &self.exprs[id.index()]
    }

    pub fn expr_mut(&mut self, id: ExprId) -> &mut ExprNode {
        &mut self.exprs[id.index()]
    }

    pub fn type_ref(&self, id: TypeRefId) -> &TypeRef {
        &self.type_refs[id.index()]
    }

    pub fn type_ref_mut(&mut self, id: TypeRefId) -> &mut TypeRef {
        &mut self.type_refs[id.index()]
    }

    pub fn ident_ref(&self, id: IdentRefId) -> &IdentRef {
        &self.ident_refs[id.index()]
    }

    pub fn ident_ref_mut(&mut self, id: IdentRefId) -> &mut IdentRef {
        &mut self.ident_refs[id.index()]
    }

    pub fn ast(&self, id: AstId) -> &Ast {
        &self.asts[id.index()]
    }

    pub fn ast_mut(&mut self, id: AstId) -> &mut Ast {
        &mut self.asts[id.index()]
    }

    pub fn ast_ids(&self) -> impl Iterator<Item = AstId> {
        (0..self.asts.len() as u32).map(AstId)
    }

    pub fn alloc_type(&mut self, node: TypeNode) -> TypeId {
        let id = TypeId(self.types.len() as u32);
        self.types.push(node);
        id
    }

    pub fn alloc_expr(&mut self, node: ExprNode) -> ExprId {
        let id = ExprId(self.exprs.len() as u32);
        self.exprs.push(node);
        id
    }

    pub fn alloc_type_ref(&mut self, r: TypeRef) -> TypeRefId {
        let id = TypeRefId(self.type_refs.len() as u32);
        self.type_refs.push(r);
        id
    }

    pub fn alloc_ident_ref(&mut self, r: IdentRef) -> IdentRefId {
        let id = IdentRefId(self.ident_refs.len() as u32);
        self.ident_refs.push(r);
        id
    }

    pub fn alloc_ast(&mut self, ast: Ast) -> AstId {
        let id = AstId(self.asts.len() as u32);
        self.asts.push(ast);
        id
    }

    pub fn scalar_type(&self, kind: ScalarKind) -> TypeId {
        self.builtins.scalars[kind as usize]
    }

    pub fn builtins(&self) -> &Builtins {
        &self.builtins
    }

    /// The methods every interface chain carries, with their fixed
    /// transaction ids.
    pub fn reserved_methods(&self) -> &[Method] {
        &self.reserved_methods
    }

    /// Look up a top-level builtin by source keyword, if any.
    pub fn builtin_by_name(&self, name: &str) -> Option<TypeId> {
        use ScalarKind::*;
        Some(match name {
            "bool" => self.scalar_type(Bool),
            "int8_t" => self.scalar_type(Int8),
            "uint8_t" => self.scalar_type(UInt8),
            "int16_t" => self.scalar_type(Int16),
            "uint16_t" => self.scalar_type(UInt16),
            "int32_t" => self.scalar_type(Int32),
            "uint32_t" => self.scalar_type(UInt32),
            "int64_t" => self.scalar_type(Int64),
            "uint64_t" => self.scalar_type(UInt64),
            "float" => self.scalar_type(Float),
            "double" => self.scalar_type(Double),
            "string" => self.builtins.string,
            "handle" => self.builtins.handle,
            "memory" => self.builtins.memory,
            "pointer" => self.builtins.pointer,
            "death_recipient" => self.builtins.death_recipient,
            _ => return None,
        })
    }

    fn completed(&mut self, kind: TypeKind) -> TypeId {
        let mut node = TypeNode::new(kind);
        node.stage = ParseStage::Completed;
        self.alloc_type(node)
    }

    fn bound_ref(&mut self, target: TypeId) -> TypeRefId {
        self.alloc_type_ref(TypeRef::bound(target, Location::none()))
    }

    fn install_builtins(&mut self) {
        use ScalarKind::*;
        for kind in [
            Bool, Int8, UInt8, Int16, UInt16, Int32, UInt32, Int64, UInt64, Float, Double,
        ] {
            let id = self.completed(TypeKind::Scalar(kind));
            self.builtins.scalars.push(id);
        }
        self.builtins.string = self.completed(TypeKind::String);
        self.builtins.handle = self.completed(TypeKind::Handle);
        self.builtins.memory = self.completed(TypeKind::Memory);
        self.builtins.pointer = self.completed(TypeKind::Pointer);
        self.builtins.death_recipient = self.completed(TypeKind::DeathRecipient);

        let string = self.builtins.string;
        let element = self.bound_ref(string);
        self.builtins.vec_string = self.completed(TypeKind::Vector { element });

        // vec<uint8_t[32]>, the element type of hashChain()
        let uint8 = self.scalar_type(UInt8);
        let element = self.bound_ref(uint8);
        let dim = self.alloc_expr(ExprNode::value_of(32, Int32));
        let hash = self.completed(TypeKind::Array(crate::types::ArrayData {
            element,
            dims: vec![dim],
        }));
        let element = self.bound_ref(hash);
        self.builtins.vec_hash = self.completed(TypeKind::Vector { element });

        self.builtins.debug_info = self.install_debug_info();
    }

    fn internal_name(&self, name: &str, local: &str) -> TypeName {
        TypeName {
            local: local.to_string(),
            fqname: FqName::new(INTERNAL_PACKAGE, Version::new(1, 0), name),
            location: Location::none(),
        }
    }

    fn install_debug_info(&mut self) -> TypeId {
        use ScalarKind::*;

        let int32 = self.scalar_type(Int32);
        let storage = self.bound_ref(int32);
        let values = ["UNKNOWN", "IS_64BIT", "IS_32BIT"]
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let expr = self.alloc_expr(ExprNode::value_of(i as u64, Int32));
                EnumValue {
                    name: name.to_string(),
                    expr: Some(expr),
                    location: Location::none(),
                    auto: false,
                }
            })
            .collect();
        let arch = self.completed(TypeKind::Enum(EnumData { storage, values }));

        let pid = self.bound_ref(int32);
        let uint64 = self.scalar_type(UInt64);
        let ptr = self.bound_ref(uint64);
        let arch_ref = self.bound_ref(arch);
        let fields = vec![
            Field {
                name: "pid".to_string(),
                ty: pid,
                location: Location::none(),
            },
            Field {
                name: "ptr".to_string(),
                ty: ptr,
                location: Location::none(),
            },
            Field {
                name: "arch".to_string(),
                ty: arch_ref,
                location: Location::none(),
            },
        ];
        let info = self.completed(TypeKind::Compound(CompoundData {
            style: CompoundStyle::Struct,
            fields,
        }));

        self.ty_mut(arch).name = Some(self.internal_name("DebugInfo.Architecture", "Architecture"));
        self.ty_mut(arch).parent = Some(info);
        self.ty_mut(info).name = Some(self.internal_name("DebugInfo", "DebugInfo"));
        self.add_to_scope(info, arch)
            .expect("fresh scope cannot clash");
        info
    }

    fn install_reserved_methods(&mut self) {
        let bool_ty = self.scalar_type(ScalarKind::Bool);
        let uint64 = self.scalar_type(ScalarKind::UInt64);
        let string = self.builtins.string;
        let handle = self.builtins.handle;
        let death_recipient = self.builtins.death_recipient;
        let vec_string = self.builtins.vec_string;
        let vec_hash = self.builtins.vec_hash;
        let debug_info = self.builtins.debug_info;

        let method = |arena: &mut Arena,
                          name: &str,
                          serial: u32,
                          oneway: bool,
                          args: &[(&str, TypeId)],
                          results: &[(&str, TypeId)]| {
            let field = |arena: &mut Arena, (name, ty): &(&str, TypeId)| Field {
                name: name.to_string(),
                ty: arena.bound_ref(*ty),
                location: Location::none(),
            };
            let args = args.iter().map(|a| field(arena, a)).collect();
            let results = results.iter().map(|r| field(arena, r)).collect();
            arena.reserved_methods.push(Method {
                name: name.to_string(),
                args,
                results,
                oneway,
                annotations: Vec::new(),
                serial: Some(serial),
                reserved: true,
                location: Location::none(),
            });
        };

        method(self, "ping", pack_chars('P', 'N', 'G'), false, &[], &[]);
        method(
            self,
            "interfaceChain",
            pack_chars('C', 'H', 'N'),
            false,
            &[],
            &[("descriptors", vec_string)],
        );
        method(
            self,
            "interfaceDescriptor",
            pack_chars('D', 'S', 'C'),
            false,
            &[],
            &[("descriptor", string)],
        );
        method(
            self,
            "notifySyspropsChanged",
            pack_chars('S', 'Y', 'S'),
            true,
            &[],
            &[],
        );
        method(
            self,
            "linkToDeath",
            pack_chars('L', 'T', 'D'),
            false,
            &[("recipient", death_recipient), ("cookie", uint64)],
            &[("success", bool_ty)],
        );
        method(
            self,
            "unlinkToDeath",
            pack_chars('U', 'T', 'D'),
            false,
            &[("recipient", death_recipient)],
            &[("success", bool_ty)],
        );
        method(
            self,
            "setHALInstrumentation",
            pack_chars('I', 'N', 'T'),
            true,
            &[],
            &[],
        );
        method(
            self,
            "getDebugInfo",
            pack_chars('R', 'E', 'F'),
            false,
            &[],
            &[("info", debug_info)],
        );
        method(
            self,
            "debug",
            pack_chars('D', 'B', 'G'),
            false,
            &[("fd", handle), ("options", vec_string)],
            &[],
        );
        method(
            self,
            "interfaceHashChain",
            pack_chars('H', 'S', 'H'),
            false,
            &[],
            &[("hashchain", vec_hash)],
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_serials_are_tagged_and_unique() {
        let arena = Arena::new();
        let serials: Vec<u32> = arena
            .reserved_methods()
            .iter()
            .map(|m| m.serial.unwrap())
            .collect();
        assert_eq!(serials.len(), 10);
        for &s in &serials {
            assert_eq!(s >> 24, RESERVED_ID_TAG);
            assert!(s > LAST_CALL_TRANSACTION);
        }
        let unique: std::collections::HashSet<_> = serials.iter().collect();
        assert_eq!(unique.len(), serials.len());
    }

    #[test]
    fn test_builtin_lookup() {
        let arena = Arena::new();
        let id = arena.builtin_by_name("uint32_t").unwrap();
        assert!(matches!(
            arena.ty(id).kind,
            TypeKind::Scalar(ScalarKind::UInt32)
        ));
        assert!(arena.builtin_by_name("frobnicator").is_none());
    }

    #[test]
    fn test_debug_info_shape() {
        let arena = Arena::new();
        let info = arena.builtins().debug_info;
        match &arena.ty(info).kind {
            TypeKind::Compound(data) => {
                assert_eq!(data.style, CompoundStyle::Struct);
                let names: Vec<_> = data.fields.iter().map(|f| f.name.as_str()).collect();
                assert_eq!(names, ["pid", "ptr", "arch"]);
            }
            other => panic!("unexpected kind {:?}", other.type_name()),
        }
        assert!(arena.scope(info).get("Architecture").is_some());
    }
}
