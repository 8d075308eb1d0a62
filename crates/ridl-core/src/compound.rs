//! Compound type layout and validation
//!
//! Layout follows the C++ ABI rules: each field is aligned to its own
//! requirement, the structure's alignment is the maximum of its fields',
//! and a safe union prepends a discriminator sized by the field count,
//! with the value storage following at its own alignment.

use std::collections::HashSet;

use crate::arena::{Arena, TypeId};
use crate::error::{CoreError, Result};
use crate::scalar::ScalarKind;
use crate::types::{CompoundData, CompoundStyle, TypeKind};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Layout {
    pub offset: usize,
    pub align: usize,
    pub size: usize,
}

impl Layout {
    /// Bytes needed to advance `offset` to the next multiple of `align`.
    pub fn pad(offset: usize, align: usize) -> usize {
        let remainder = offset % align;
        if remainder > 0 {
            align - remainder
        } else {
            0
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CompoundLayout {
    pub overall: Layout,
    /// The value storage; in a safe union it sits after the discriminator.
    pub inner: Layout,
    pub discriminator: Layout,
    /// Absolute offset of each field, in declaration order.
    pub field_offsets: Vec<usize>,
}

impl Arena {
    /// The unsigned scalar a safe union tags its active field with.
    pub fn discriminator_kind(&self, compound: TypeId) -> ScalarKind {
        let TypeKind::Compound(data) = &self.ty(compound).kind else {
            panic!("not a compound");
        };
        let fields = data.fields.len() as u64;
        if fields <= 1 << 8 {
            ScalarKind::UInt8
        } else if fields <= 1 << 16 {
            ScalarKind::UInt16
        } else if fields <= 1 << 32 {
            ScalarKind::UInt32
        } else {
            ScalarKind::UInt64
        }
    }

    pub fn compound_layout(&self, compound: TypeId) -> CompoundLayout {
        let TypeKind::Compound(data) = &self.ty(compound).kind else {
            panic!("not a compound");
        };
        let mut layout = CompoundLayout::default();
        layout.inner.align = 1;
        layout.discriminator.align = 1;

        if data.style == CompoundStyle::SafeUnion {
            let kind = self.discriminator_kind(compound);
            layout.discriminator.align = kind.size_bytes();
            layout.discriminator.size = kind.size_bytes();
            layout.inner.offset = layout.discriminator.size;
        }

        for field in &data.fields {
            let target = self
                .type_ref(field.ty)
                .target()
                .expect("field type resolved");
            let (field_align, field_size) = self.alignment_and_size(target);
            let pad = Layout::pad(layout.inner.size, field_align);

            if data.style == CompoundStyle::Struct {
                layout.field_offsets.push(layout.inner.size + pad);
                layout.inner.size += pad + field_size;
            } else {
                layout.field_offsets.push(0);
                layout.inner.size = layout.inner.size.max(field_size);
            }
            layout.inner.align = layout.inner.align.max(field_align);
        }

        layout.inner.size += Layout::pad(layout.inner.size, layout.inner.align);
        layout.inner.offset += Layout::pad(layout.inner.offset, layout.inner.align);

        // an empty struct or union still occupies one byte
        if layout.inner.size == 0 {
            layout.inner.size = 1;
        }

        layout.overall.size = layout.inner.offset + layout.inner.size;
        layout.overall.align = layout.inner.align.max(layout.discriminator.align);
        layout.overall.size += Layout::pad(layout.overall.size, layout.overall.align);

        // all fields share the storage slot after the discriminator
        for offset in &mut layout.field_offsets {
            *offset += layout.inner.offset;
        }
        layout
    }

    /// Is this a vector whose elements resolve to an interface?
    fn is_vector_of_interfaces(&self, id: TypeId) -> bool {
        match &self.ty(self.strip_typedefs(id)).kind {
            TypeKind::Vector { element } => self.ref_targets_interface(*element),
            _ => false,
        }
    }

    pub fn validate_compound(&self, compound: TypeId) -> Result<()> {
        let node = self.ty(compound);
        let TypeKind::Compound(data) = &node.kind else {
            panic!("not a compound");
        };

        for field in &data.fields {
            let target = self
                .type_ref(field.ty)
                .target()
                .ok_or_else(|| CoreError::Internal(format!("field '{}' not resolved", field.name)))?;

            if self.is_vector_of_interfaces(target) {
                return Err(CoreError::Invalid(format!(
                    "{} cannot contain vectors of interfaces at {}",
                    data.style.keyword(),
                    field.location
                )));
            }

            if data.style == CompoundStyle::Union {
                if self.ty(self.strip_typedefs(target)).kind.is_interface() {
                    return Err(CoreError::Invalid(format!(
                        "union cannot contain interfaces at {}",
                        field.location
                    )));
                }
                if self.needs_embedded_read_write(target) {
                    return Err(CoreError::Invalid(format!(
                        "union must not contain any types that need fixup at {}",
                        field.location
                    )));
                }
            }
        }

        if data.style == CompoundStyle::SafeUnion && data.fields.len() < 2 {
            return Err(CoreError::Invalid(format!(
                "safe_union must contain at least two types to be useful at {}",
                node.location()
            )));
        }

        let mut names = HashSet::new();
        for field in &data.fields {
            if !names.insert(field.name.as_str()) {
                return Err(CoreError::Invalid(format!(
                    "redefinition of field '{}' at {}",
                    field.name, field.location
                )));
            }
        }

        if data.style == CompoundStyle::SafeUnion {
            if let Some(scope) = &node.scope {
                for &child in scope.children() {
                    if self.ty(child).local_name() == "getDiscriminator" {
                        return Err(CoreError::Invalid(format!(
                            "type name 'getDiscriminator' defined at {} conflicts with a \
                             member function of safe_union {}",
                            self.ty(child).location(),
                            node.local_name()
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Merge `typedef`s to arrays into the referring array: the outer
    /// dimensions come first, then the aliased array's.
    pub fn flatten_array_typedefs(&mut self, array: TypeId) {
        loop {
            let TypeKind::Array(data) = &self.ty(array).kind else {
                panic!("not an array");
            };
            let Some(target) = self.type_ref(data.element).target() else {
                return;
            };
            let inner = self.strip_typedefs(target);
            let TypeKind::Array(inner_data) = &self.ty(inner).kind else {
                return;
            };
            let inner_element = inner_data.element;
            let inner_dims = inner_data.dims.clone();
            let TypeKind::Array(data) = &mut self.ty_mut(array).kind else {
                unreachable!();
            };
            data.element = inner_element;
            data.dims.extend(inner_dims);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::ExprNode;
    use crate::location::Location;
    use crate::refs::TypeRef;
    use crate::types::{ArrayData, Field, TypeNode};

    fn compound(arena: &mut Arena, style: CompoundStyle, fields: &[TypeId]) -> TypeId {
        let fields = fields
            .iter()
            .enumerate()
            .map(|(i, &ty)| Field {
                name: format!("f{}", i),
                ty: arena.alloc_type_ref(TypeRef::bound(ty, Location::none())),
                location: Location::none(),
            })
            .collect();
        arena.alloc_type(TypeNode::new(TypeKind::Compound(CompoundData {
            style,
            fields,
        })))
    }

    #[test]
    fn test_struct_layout_padding() {
        let mut arena = Arena::new();
        let u8t = arena.scalar_type(ScalarKind::UInt8);
        let u32t = arena.scalar_type(ScalarKind::UInt32);
        let c = compound(&mut arena, CompoundStyle::Struct, &[u8t, u32t, u8t]);
        let layout = arena.compound_layout(c);
        assert_eq!(layout.field_offsets, vec![0, 4, 8]);
        assert_eq!(layout.overall.align, 4);
        assert_eq!(layout.overall.size, 12);
    }

    #[test]
    fn test_union_layout_is_max() {
        let mut arena = Arena::new();
        let u16t = arena.scalar_type(ScalarKind::UInt16);
        let u64t = arena.scalar_type(ScalarKind::UInt64);
        let c = compound(&mut arena, CompoundStyle::Union, &[u16t, u64t]);
        let layout = arena.compound_layout(c);
        assert_eq!(layout.overall.size, 8);
        assert_eq!(layout.overall.align, 8);
        assert_eq!(layout.field_offsets, vec![0, 0]);
    }

    #[test]
    fn test_safe_union_discriminator_precedes_storage() {
        let mut arena = Arena::new();
        let u32t = arena.scalar_type(ScalarKind::UInt32);
        let u64t = arena.scalar_type(ScalarKind::UInt64);
        let c = compound(&mut arena, CompoundStyle::SafeUnion, &[u32t, u64t]);
        assert_eq!(arena.discriminator_kind(c), ScalarKind::UInt8);
        let layout = arena.compound_layout(c);
        assert_eq!(layout.discriminator.size, 1);
        // storage starts at the union's own alignment
        assert_eq!(layout.inner.offset, 8);
        assert_eq!(layout.overall.size, 16);
        assert_eq!(layout.field_offsets, vec![8, 8]);
    }

    #[test]
    fn test_discriminator_escalates_with_field_count() {
        let mut arena = Arena::new();
        let u8t = arena.scalar_type(ScalarKind::UInt8);
        for (count, kind) in [
            (2, ScalarKind::UInt8),
            (1 << 8, ScalarKind::UInt8),
            ((1 << 8) + 1, ScalarKind::UInt16),
            (1 << 16, ScalarKind::UInt16),
            ((1 << 16) + 1, ScalarKind::UInt32),
        ] {
            let fields = vec![u8t; count];
            let c = compound(&mut arena, CompoundStyle::SafeUnion, &fields);
            assert_eq!(arena.discriminator_kind(c), kind, "{count} fields");
        }
    }

    #[test]
    fn test_empty_struct_occupies_one_byte() {
        let mut arena = Arena::new();
        let c = compound(&mut arena, CompoundStyle::Struct, &[]);
        let layout = arena.compound_layout(c);
        assert_eq!(layout.overall.size, 1);
        assert_eq!(layout.overall.align, 1);
    }

    #[test]
    fn test_union_rejects_fixup_types() {
        let mut arena = Arena::new();
        let string = arena.builtins().string;
        let c = compound(&mut arena, CompoundStyle::Union, &[string]);
        assert!(arena.validate_compound(c).is_err());
    }

    #[test]
    fn test_safe_union_needs_two_fields() {
        let mut arena = Arena::new();
        let u32t = arena.scalar_type(ScalarKind::UInt32);
        let c = compound(&mut arena, CompoundStyle::SafeUnion, &[u32t]);
        assert!(arena.validate_compound(c).is_err());
    }

    #[test]
    fn test_duplicate_field_names_rejected() {
        let mut arena = Arena::new();
        let u32t = arena.scalar_type(ScalarKind::UInt32);
        let a = arena.alloc_type_ref(TypeRef::bound(u32t, Location::none()));
        let b = arena.alloc_type_ref(TypeRef::bound(u32t, Location::none()));
        let fields = vec![
            Field {
                name: "x".into(),
                ty: a,
                location: Location::none(),
            },
            Field {
                name: "x".into(),
                ty: b,
                location: Location::none(),
            },
        ];
        let c = arena.alloc_type(TypeNode::new(TypeKind::Compound(CompoundData {
            style: CompoundStyle::Struct,
            fields,
        })));
        assert!(arena.validate_compound(c).is_err());
    }

    #[test]
    fn test_array_of_typedefed_array_is_flattened() {
        let mut arena = Arena::new();
        let u8t = arena.scalar_type(ScalarKind::UInt8);
        let element = arena.alloc_type_ref(TypeRef::bound(u8t, Location::none()));
        let four = arena.alloc_expr(ExprNode::value_of(4, ScalarKind::Int32));
        let inner = arena.alloc_type(TypeNode::new(TypeKind::Array(ArrayData {
            element,
            dims: vec![four],
        })));
        let alias_ref = arena.alloc_type_ref(TypeRef::bound(inner, Location::none()));
        let alias = arena.alloc_type(TypeNode::new(TypeKind::TypeDef {
            referenced: alias_ref,
        }));
        let element = arena.alloc_type_ref(TypeRef::bound(alias, Location::none()));
        let two = arena.alloc_expr(ExprNode::value_of(2, ScalarKind::Int32));
        let outer = arena.alloc_type(TypeNode::new(TypeKind::Array(ArrayData {
            element,
            dims: vec![two],
        })));

        arena.flatten_array_typedefs(outer);
        let TypeKind::Array(data) = &arena.ty(outer).kind else {
            unreachable!();
        };
        assert_eq!(data.dims.len(), 2);
        assert_eq!(arena.type_ref(data.element).target(), Some(u8t));
        assert_eq!(arena.alignment_and_size(outer), (1, 8));
    }
}
