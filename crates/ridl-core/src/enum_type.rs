//! Enum inheritance, value autofill and validation
//!
//! An enum may use another enum as its storage type; the value space then
//! extends the base enum's. The type chain walks from an enum through its
//! storage enums, and unnamed values are autofilled as `previous + 1`
//! (or zero for the very first value of the chain).

use std::collections::HashMap;

use tracing::warn;

use crate::arena::{Arena, TypeId};
use crate::error::{CoreError, Result};
use crate::expr::{BinaryOp, ExprNode};
use crate::fqname::FqName;
use crate::location::Location;
use crate::refs::IdentRef;
use crate::scalar::{self, ScalarKind};
use crate::types::TypeKind;

impl Arena {
    /// The enum behind a storage reference, if the storage is itself an
    /// enum (possibly through typedefs).
    fn storage_enum(&self, enum_id: TypeId) -> Option<TypeId> {
        let TypeKind::Enum(data) = &self.ty(enum_id).kind else {
            panic!("not an enum");
        };
        let target = self.strip_typedefs(self.type_ref(data.storage).target()?);
        self.ty(target).kind.is_enum().then_some(target)
    }

    /// This enum followed by the enums it derives its storage from, most
    /// derived first.
    pub fn enum_type_chain(&self, enum_id: TypeId) -> Vec<TypeId> {
        let mut chain = vec![enum_id];
        let mut current = enum_id;
        while let Some(next) = self.storage_enum(current) {
            chain.push(next);
            current = next;
        }
        chain
    }

    /// Total number of value names along the whole chain.
    pub fn enum_value_count(&self, enum_id: TypeId) -> usize {
        self.enum_type_chain(enum_id)
            .iter()
            .map(|&id| match &self.ty(id).kind {
                TypeKind::Enum(data) => data.values.len(),
                _ => 0,
            })
            .sum()
    }

    /// The scalar kind values of this enum are stored as.
    pub fn enum_storage_kind(&self, enum_id: TypeId) -> Result<ScalarKind> {
        let TypeKind::Enum(data) = &self.ty(enum_id).kind else {
            panic!("not an enum");
        };
        let storage = self.type_ref(data.storage).target().ok_or_else(|| {
            CoreError::Internal(format!(
                "storage of {} not resolved",
                self.ty(enum_id).describe()
            ))
        })?;
        self.underlying_scalar(storage).ok_or_else(|| {
            CoreError::Invalid(format!(
                "invalid enum storage type specified at {}",
                self.type_ref(data.storage).location()
            ))
        })
    }

    /// Fill in missing value expressions: the first value of the chain is
    /// zero, every other one is its predecessor plus one.
    pub fn resolve_enum_inheritance(&mut self, enum_id: TypeId) -> Result<()> {
        let kind = self.enum_storage_kind(enum_id)?;

        // last value of the nearest ancestor that has any
        let mut prev: Option<(TypeId, usize)> = None;
        for ancestor in self.enum_type_chain(enum_id).into_iter().skip(1) {
            if let TypeKind::Enum(data) = &self.ty(ancestor).kind {
                if !data.values.is_empty() {
                    prev = Some((ancestor, data.values.len() - 1));
                    break;
                }
            }
        }

        let count = match &self.ty(enum_id).kind {
            TypeKind::Enum(data) => data.values.len(),
            _ => unreachable!(),
        };
        for index in 0..count {
            let needs_fill = match &self.ty(enum_id).kind {
                TypeKind::Enum(data) => data.values[index].expr.is_none(),
                _ => unreachable!(),
            };
            if needs_fill {
                let expr = match prev {
                    None => self.alloc_expr(ExprNode::value_of(0, kind)),
                    Some((prev_ty, prev_index)) => {
                        let prev_name = self.enum_value_fqname(prev_ty, prev_index);
                        let ident = self.alloc_ident_ref(IdentRef::bound(
                            prev_name,
                            (prev_ty, prev_index),
                            Location::none(),
                        ));
                        let reference = self.new_reference_expr(ident);
                        let one = self.alloc_expr(ExprNode::value_of(1, kind));
                        self.new_binary_expr(BinaryOp::Add, reference, one)
                    }
                };
                if let TypeKind::Enum(data) = &mut self.ty_mut(enum_id).kind {
                    data.values[index].expr = Some(expr);
                    data.values[index].auto = true;
                }
            }
            prev = Some((enum_id, index));
        }
        Ok(())
    }

    fn enum_value_fqname(&self, enum_id: TypeId, index: usize) -> FqName {
        let value_name = match &self.ty(enum_id).kind {
            TypeKind::Enum(data) => data.values[index].name.clone(),
            _ => unreachable!(),
        };
        match self.ty(enum_id).fqname() {
            Some(fq) => fq.child(&value_name),
            None => FqName::bare(value_name),
        }
    }

    /// Search the type chain for a value by name. Returns the defining
    /// enum and the value's index within it.
    pub fn find_enum_value(&self, enum_id: TypeId, name: &str) -> Option<(TypeId, usize)> {
        for ty in self.enum_type_chain(enum_id) {
            if let TypeKind::Enum(data) = &self.ty(ty).kind {
                if let Some(index) = data.values.iter().position(|v| v.name == name) {
                    return Some((ty, index));
                }
            }
        }
        None
    }

    pub fn validate_enum(&self, enum_id: TypeId) -> Result<()> {
        let node = self.ty(enum_id);
        let TypeKind::Enum(data) = &node.kind else {
            panic!("not an enum");
        };

        if !node.scope.as_ref().map_or(true, |s| s.children().is_empty()) {
            return Err(CoreError::Invalid(format!(
                "enum '{}' cannot contain nested type declarations",
                node.describe()
            )));
        }

        let storage = self.type_ref(data.storage).target().ok_or_else(|| {
            CoreError::Internal(format!("storage of {} not resolved", node.describe()))
        })?;
        let kind = self.underlying_scalar(storage);
        if !self.is_elidable(storage) || !kind.is_some_and(ScalarKind::is_valid_enum_storage) {
            return Err(CoreError::Invalid(format!(
                "invalid enum storage type ({}) specified at {}",
                self.ty(storage).kind.type_name(),
                self.type_ref(data.storage).location()
            )));
        }

        self.validate_enum_unique_names(enum_id, data)?;
        self.warn_on_truncated_values(enum_id, data, kind.unwrap_or(ScalarKind::Int64));
        Ok(())
    }

    fn validate_enum_unique_names(
        &self,
        enum_id: TypeId,
        data: &crate::types::EnumData,
    ) -> Result<()> {
        let mut registered: HashMap<&str, TypeId> = HashMap::new();
        for ancestor in self.enum_type_chain(enum_id).into_iter().skip(1) {
            if let TypeKind::Enum(super_data) = &self.ty(ancestor).kind {
                for value in &super_data.values {
                    // super chains were validated on their own
                    registered.insert(&value.name, ancestor);
                }
            }
        }
        for value in &data.values {
            if let Some(&defined_in) = registered.get(value.name.as_str()) {
                let message = if defined_in == enum_id {
                    format!("redefinition of value '{}' at {}", value.name, value.location)
                } else {
                    format!(
                        "redefinition of value '{}' defined in enum '{}' at {}",
                        value.name,
                        self.ty(defined_in).describe(),
                        value.location
                    )
                };
                return Err(CoreError::Invalid(message));
            }
            registered.insert(&value.name, enum_id);
        }
        Ok(())
    }

    // Values are stored at the natural kind of their expression; flag the
    // ones the storage type cannot represent.
    fn warn_on_truncated_values(
        &self,
        enum_id: TypeId,
        data: &crate::types::EnumData,
        kind: ScalarKind,
    ) {
        for value in &data.values {
            let Some(eval) = value.expr.and_then(|e| self.expr(e).eval) else {
                continue;
            };
            let stored = scalar::cast_value(eval.value, kind);
            if scalar::cast_value(stored, eval.kind) != eval.value {
                warn!(
                    enum_type = %self.ty(enum_id).describe(),
                    value = %value.name,
                    "enum value does not fit its storage type and will be truncated"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::Position;
    use crate::refs::TypeRef;
    use crate::types::{EnumData, EnumValue, TypeNode};

    fn loc(line: usize) -> Location {
        Location::new(
            "test.ridl",
            Position::new(line, 1),
            Position::new(line, 10),
        )
    }

    fn make_enum(
        arena: &mut Arena,
        storage: TypeId,
        values: &[(&str, Option<&str>)],
    ) -> TypeId {
        let storage = arena.alloc_type_ref(TypeRef::bound(storage, Location::none()));
        let values = values
            .iter()
            .enumerate()
            .map(|(i, (name, expr))| EnumValue {
                name: name.to_string(),
                expr: expr.map(|text| arena.alloc_expr(ExprNode::literal(text))),
                location: loc(i + 1),
                auto: false,
            })
            .collect();
        arena.alloc_type(TypeNode::new(TypeKind::Enum(EnumData { storage, values })))
    }

    fn value_of(arena: &mut Arena, enum_id: TypeId, name: &str) -> i64 {
        let (ty, index) = arena.find_enum_value(enum_id, name).unwrap();
        let expr = match &arena.ty(ty).kind {
            TypeKind::Enum(data) => data.values[index].expr.unwrap(),
            _ => unreachable!(),
        };
        arena.evaluate_expr(expr).unwrap();
        let eval = arena.expr(expr).evaluated();
        scalar::cast_value(eval.value, eval.kind) as i64
    }

    #[test]
    fn test_autofill_starts_at_zero() {
        let mut arena = Arena::new();
        let int32 = arena.scalar_type(ScalarKind::Int32);
        let e = make_enum(&mut arena, int32, &[("A", None), ("B", None), ("C", Some("10")), ("D", None)]);
        arena.resolve_enum_inheritance(e).unwrap();
        assert_eq!(value_of(&mut arena, e, "A"), 0);
        assert_eq!(value_of(&mut arena, e, "B"), 1);
        assert_eq!(value_of(&mut arena, e, "C"), 10);
        assert_eq!(value_of(&mut arena, e, "D"), 11);
    }

    #[test]
    fn test_autofill_continues_base_enum() {
        let mut arena = Arena::new();
        let int32 = arena.scalar_type(ScalarKind::Int32);
        let base = make_enum(&mut arena, int32, &[("A", None), ("B", None)]);
        let derived = make_enum(&mut arena, base, &[("C", None)]);
        arena.resolve_enum_inheritance(base).unwrap();
        arena.resolve_enum_inheritance(derived).unwrap();
        assert_eq!(value_of(&mut arena, derived, "C"), 2);
        // values of the base remain reachable through the chain
        assert_eq!(value_of(&mut arena, derived, "A"), 0);
        assert_eq!(arena.enum_value_count(derived), 3);
    }

    #[test]
    fn test_duplicate_value_rejected() {
        let mut arena = Arena::new();
        let int32 = arena.scalar_type(ScalarKind::Int32);
        let base = make_enum(&mut arena, int32, &[("A", None)]);
        let derived = make_enum(&mut arena, base, &[("A", None)]);
        arena.resolve_enum_inheritance(base).unwrap();
        arena.resolve_enum_inheritance(derived).unwrap();
        assert!(arena.validate_enum(base).is_ok());
        let err = arena.validate_enum(derived).unwrap_err();
        assert!(err.to_string().contains("redefinition of value 'A'"));
    }

    #[test]
    fn test_storage_must_be_integral() {
        let mut arena = Arena::new();
        let float = arena.scalar_type(ScalarKind::Float);
        let e = make_enum(&mut arena, float, &[("A", Some("0"))]);
        assert!(arena.validate_enum(e).is_err());
    }
}
