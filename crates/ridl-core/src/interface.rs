//! Interface inheritance, transaction ids and validation
//!
//! User methods get densely increasing transaction ids starting after the
//! whole super chain's; the reserved methods every interface carries keep
//! their fixed tagged ids from the arena table. An interface with an empty
//! super reference is the root of its hierarchy.

use std::collections::HashMap;

use crate::arena::{Arena, TypeId, FIRST_CALL_TRANSACTION, LAST_CALL_TRANSACTION};
use crate::error::{CoreError, Result};
use crate::types::{Field, InterfaceData, Method, TypeKind};

const METHOD_ANNOTATIONS: [&str; 3] = ["entry", "exit", "callflow"];

impl Arena {
    /// Interface with no super at all, the root of a hierarchy.
    pub fn is_root_interface(&self, id: TypeId) -> bool {
        match &self.ty(id).kind {
            TypeKind::Interface(data) => self.type_ref(data.super_ref).is_empty(),
            _ => false,
        }
    }

    /// The resolved super interface, if any.
    pub fn super_interface(&self, id: TypeId) -> Option<TypeId> {
        match &self.ty(id).kind {
            TypeKind::Interface(data) => {
                let target = self.type_ref(data.super_ref).target()?;
                let target = self.strip_typedefs(target);
                self.ty(target).kind.is_interface().then_some(target)
            }
            _ => None,
        }
    }

    /// This interface followed by its ancestors, most derived first.
    pub fn interface_chain(&self, id: TypeId) -> Vec<TypeId> {
        let mut chain = vec![id];
        let mut current = id;
        while let Some(next) = self.super_interface(current) {
            chain.push(next);
            current = next;
        }
        chain
    }

    fn user_method_count(&self, id: TypeId) -> usize {
        match &self.ty(id).kind {
            TypeKind::Interface(data) => data.methods.len(),
            _ => 0,
        }
    }

    /// Assign transaction ids to this interface's own methods, continuing
    /// where the super chain left off.
    pub fn resolve_interface_inheritance(&mut self, id: TypeId) -> Result<()> {
        let mut serial = FIRST_CALL_TRANSACTION as usize;
        for ancestor in self.interface_chain(id).into_iter().skip(1) {
            serial += self.user_method_count(ancestor);
        }

        let count = self.user_method_count(id);
        let location = self.ty(id).location();
        for index in 0..count {
            if serial > LAST_CALL_TRANSACTION as usize {
                return Err(CoreError::Invalid(format!(
                    "more than {} methods (including super and reserved) are not allowed at {}",
                    LAST_CALL_TRANSACTION, location
                )));
            }
            if let TypeKind::Interface(data) = &mut self.ty_mut(id).kind {
                data.methods[index].serial = Some(serial as u32);
            }
            serial += 1;
        }
        Ok(())
    }

    pub fn validate_interface(&self, id: TypeId) -> Result<()> {
        let node = self.ty(id);
        let TypeKind::Interface(data) = &node.kind else {
            panic!("not an interface");
        };

        if !self.type_ref(data.super_ref).is_empty() && self.super_interface(id).is_none() {
            return Err(CoreError::Invalid(format!(
                "you can only extend interfaces at {}",
                self.type_ref(data.super_ref).location()
            )));
        }

        self.validate_interface_unique_names(id, data)?;
        self.validate_method_annotations(data)?;
        Ok(())
    }

    fn validate_interface_unique_names(&self, id: TypeId, data: &InterfaceData) -> Result<()> {
        let mut registered: HashMap<&str, Option<TypeId>> = HashMap::new();
        for method in self.reserved_methods() {
            registered.insert(&method.name, None);
        }
        for ancestor in self.interface_chain(id).into_iter().skip(1) {
            if let TypeKind::Interface(super_data) = &self.ty(ancestor).kind {
                for method in &super_data.methods {
                    registered.insert(&method.name, Some(ancestor));
                }
            }
        }

        for method in &data.methods {
            if let Some(&defined_in) = registered.get(method.name.as_str()) {
                let message = match defined_in {
                    None => format!(
                        "redefinition of reserved method '{}' at {}",
                        method.name, method.location
                    ),
                    Some(ancestor) if ancestor == id => format!(
                        "redefinition of method '{}' at {}",
                        method.name, method.location
                    ),
                    Some(ancestor) => format!(
                        "redefinition of method '{}' defined in interface '{}' at {}",
                        method.name,
                        self.ty(ancestor).describe(),
                        method.location
                    ),
                };
                return Err(CoreError::Invalid(message));
            }
            registered.insert(&method.name, Some(id));
        }
        Ok(())
    }

    fn validate_method_annotations(&self, data: &InterfaceData) -> Result<()> {
        for method in &data.methods {
            for annotation in &method.annotations {
                if !METHOD_ANNOTATIONS.contains(&annotation.name.as_str()) {
                    return Err(CoreError::Invalid(format!(
                        "unrecognized annotation '{}' for method: {}. An annotation \
                         should be one of: entry, exit, callflow",
                        annotation.name, method.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// User methods of the whole chain plus the reserved ones, each with
    /// its defining interface, sorted by transaction id.
    pub fn methods_by_serial(&self, id: TypeId) -> Vec<(Option<TypeId>, Method)> {
        let mut out: Vec<(Option<TypeId>, Method)> = Vec::new();
        for iface in self.interface_chain(id) {
            if let TypeKind::Interface(data) = &self.ty(iface).kind {
                for method in &data.methods {
                    out.push((Some(iface), method.clone()));
                }
            }
        }
        for method in self.reserved_methods() {
            out.push((None, method.clone()));
        }
        out.sort_by_key(|(_, m)| m.serial.unwrap_or(u32::MAX));
        out
    }

    /// A method with exactly one result of an elidable type returns it
    /// directly instead of through a callback; the returned field is that
    /// single result.
    pub fn elided_callback<'a>(&self, method: &'a Method) -> Option<&'a Field> {
        match method.results.as_slice() {
            [only] => {
                let target = self.type_ref(only.ty).target()?;
                self.is_elidable(target).then_some(only)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::Location;
    use crate::refs::TypeRef;
    use crate::types::{Annotation, TypeNode};

    fn interface(arena: &mut Arena, super_of: Option<TypeId>, methods: &[&str]) -> TypeId {
        let super_ref = match super_of {
            Some(s) => arena.alloc_type_ref(TypeRef::bound(s, Location::none())),
            None => arena.alloc_type_ref(TypeRef::empty(Location::none())),
        };
        let methods = methods
            .iter()
            .map(|name| Method::user(*name, Location::none()))
            .collect();
        arena.alloc_type(TypeNode::new(TypeKind::Interface(InterfaceData {
            super_ref,
            methods,
        })))
    }

    fn serials(arena: &Arena, id: TypeId) -> Vec<u32> {
        match &arena.ty(id).kind {
            TypeKind::Interface(data) => {
                data.methods.iter().map(|m| m.serial.unwrap()).collect()
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_serials_continue_across_chain() {
        let mut arena = Arena::new();
        let base = interface(&mut arena, None, &["foo", "bar"]);
        let derived = interface(&mut arena, Some(base), &["baz"]);
        arena.resolve_interface_inheritance(base).unwrap();
        arena.resolve_interface_inheritance(derived).unwrap();
        assert_eq!(serials(&arena, base), vec![1, 2]);
        assert_eq!(serials(&arena, derived), vec![3]);
    }

    #[test]
    fn test_root_detection() {
        let mut arena = Arena::new();
        let base = interface(&mut arena, None, &[]);
        let derived = interface(&mut arena, Some(base), &[]);
        assert!(arena.is_root_interface(base));
        assert!(!arena.is_root_interface(derived));
        assert_eq!(arena.interface_chain(derived), vec![derived, base]);
    }

    #[test]
    fn test_method_name_clash_with_super() {
        let mut arena = Arena::new();
        let base = interface(&mut arena, None, &["foo"]);
        let derived = interface(&mut arena, Some(base), &["foo"]);
        assert!(arena.validate_interface(base).is_ok());
        let err = arena.validate_interface(derived).unwrap_err();
        assert!(err.to_string().contains("redefinition of method 'foo'"));
    }

    #[test]
    fn test_method_name_clash_with_reserved() {
        let mut arena = Arena::new();
        let iface = interface(&mut arena, None, &["ping"]);
        let err = arena.validate_interface(iface).unwrap_err();
        assert!(err.to_string().contains("reserved method 'ping'"));
    }

    #[test]
    fn test_annotation_whitelist() {
        let mut arena = Arena::new();
        let iface = interface(&mut arena, None, &["foo"]);
        if let TypeKind::Interface(data) = &mut arena.ty_mut(iface).kind {
            data.methods[0].annotations.push(Annotation {
                name: "sneaky".into(),
                params: Vec::new(),
            });
        }
        assert!(arena.validate_interface(iface).is_err());

        if let TypeKind::Interface(data) = &mut arena.ty_mut(iface).kind {
            data.methods[0].annotations[0].name = "callflow".into();
        }
        assert!(arena.validate_interface(iface).is_ok());
    }

    #[test]
    fn test_callback_elision_single_scalar_result() {
        let mut arena = Arena::new();
        let int32 = arena.scalar_type(crate::scalar::ScalarKind::Int32);
        let element = arena.alloc_type_ref(TypeRef::bound(int32, Location::none()));
        let vec_int32 = arena.alloc_type(TypeNode::new(TypeKind::Vector { element }));

        let result = |arena: &mut Arena, ty: TypeId| Field {
            name: "out".into(),
            ty: arena.alloc_type_ref(TypeRef::bound(ty, Location::none())),
            location: Location::none(),
        };

        let mut method = Method::user("get", Location::none());
        method.results = vec![result(&mut arena, int32)];
        assert!(arena.elided_callback(&method).is_some());

        // a vec goes out of line, so the callback stays
        method.results = vec![result(&mut arena, vec_int32)];
        assert!(arena.elided_callback(&method).is_none());

        // two results always need the callback
        method.results = vec![result(&mut arena, int32), result(&mut arena, int32)];
        assert!(arena.elided_callback(&method).is_none());

        method.results = Vec::new();
        assert!(arena.elided_callback(&method).is_none());
    }

    #[test]
    fn test_methods_by_serial_includes_reserved() {
        let mut arena = Arena::new();
        let base = interface(&mut arena, None, &["foo"]);
        arena.resolve_interface_inheritance(base).unwrap();
        let all = arena.methods_by_serial(base);
        assert_eq!(all.len(), 1 + arena.reserved_methods().len());
        assert_eq!(all[0].1.name, "foo");
        assert!(all[1..].iter().all(|(owner, m)| owner.is_none() && m.reserved));
    }
}
