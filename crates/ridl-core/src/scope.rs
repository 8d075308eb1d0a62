//! Nested declaration scopes
//!
//! Enums, compounds, interfaces and the file root scope hold named child
//! declarations. Local lookup walks the scope chain outward from the use
//! site; reordering may permute children but the name map is rebuilt to
//! stay consistent.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::arena::{Arena, TypeId};
use crate::error::{CoreError, Result};
use crate::types::Annotation;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScopeData {
    children: Vec<TypeId>,
    by_name: HashMap<String, usize>,
    pub annotations: Vec<Annotation>,
}

impl ScopeData {
    pub fn children(&self) -> &[TypeId] {
        &self.children
    }

    pub fn get(&self, name: &str) -> Option<TypeId> {
        self.by_name.get(name).map(|&i| self.children[i])
    }

    /// Duplicates are accepted here and rejected later by name validation,
    /// so that lookup errors do not mask the real problem.
    pub fn insert(&mut self, name: &str, id: TypeId) {
        self.by_name
            .entry(name.to_string())
            .or_insert(self.children.len());
        self.children.push(id);
    }
}

impl Arena {
    pub fn scope(&self, id: TypeId) -> &ScopeData {
        self.ty(id).scope.as_ref().expect("type is a scope")
    }

    pub fn scope_mut(&mut self, id: TypeId) -> &mut ScopeData {
        self.ty_mut(id).scope.as_mut().expect("type is a scope")
    }

    /// Add a named child declaration to a scope.
    pub fn add_to_scope(&mut self, scope: TypeId, child: TypeId) -> Result<()> {
        let name = self.ty(child).local_name().to_string();
        self.scope_mut(scope).insert(&name, child);
        Ok(())
    }

    /// Reject scopes that declare the same name twice.
    pub fn validate_scope_unique_names(&self, scope: TypeId) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for &child in self.scope(scope).children() {
            let name = self.ty(child).local_name();
            if !seen.insert(name) {
                return Err(CoreError::Invalid(format!(
                    "redefinition of type '{}' at {}",
                    name,
                    self.ty(child).location()
                )));
            }
        }
        Ok(())
    }

    /// The scope a node's own references resolve against: the node itself
    /// if it is a scope, otherwise its enclosing scope.
    pub fn enclosing_scope(&self, id: TypeId) -> Option<TypeId> {
        let node = self.ty(id);
        if node.scope.is_some() {
            Some(id)
        } else {
            node.parent
        }
    }

    /// Walk a scope chain outward looking for a local name.
    pub fn lookup_in_scope_chain(&self, mut scope: Option<TypeId>, name: &str) -> Option<TypeId> {
        while let Some(s) = scope {
            if let Some(data) = &self.ty(s).scope {
                if let Some(found) = data.get(name) {
                    return Some(found);
                }
            }
            scope = self.ty(s).parent;
        }
        None
    }

    /// Stable-sort a scope's children by a declaration-order key and
    /// rebuild the name map.
    pub fn reorder_scope(&mut self, scope: TypeId, order: &HashMap<TypeId, usize>) {
        let mut children = std::mem::take(&mut self.scope_mut(scope).children);
        children.sort_by_key(|id| order.get(id).copied().unwrap_or(usize::MAX));
        let by_name = children
            .iter()
            .enumerate()
            .map(|(i, &id)| (self.ty(id).local_name().to_string(), i))
            .collect();
        let data = self.scope_mut(scope);
        data.children = children;
        data.by_name = by_name;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TypeKind, TypeNode};

    #[test]
    fn test_duplicate_names_keep_first_mapping() {
        let mut data = ScopeData::default();
        let mut arena = Arena::new();
        let a = arena.alloc_type(TypeNode::new(TypeKind::Handle));
        let b = arena.alloc_type(TypeNode::new(TypeKind::Handle));
        data.insert("Foo", a);
        data.insert("Foo", b);
        assert_eq!(data.get("Foo"), Some(a));
        assert_eq!(data.children().len(), 2);
    }
}
