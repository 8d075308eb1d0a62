//! The post-parse resolution pipeline
//!
//! After a file is parsed its types sit at the `Parse` stage with every
//! reference unresolved. [`Arena::post_parse`] runs the passes in a fixed
//! order: name lookup, unique-name validation, topological reordering,
//! inheritance resolution, constant expression lookup, cycle checking,
//! validation and evaluation, type validation, forward-reference checks
//! and dependency gathering. Each pass walks the type graph through a
//! recursive driver that skips nodes from already-completed files and
//! refuses nodes at an unexpected stage.

use std::collections::{HashMap, HashSet};

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use tracing::debug;

use crate::arena::{Arena, AstId, ExprId, TypeId};
use crate::error::{CoreError, Result};
use crate::expr::ExprKind;
use crate::fqname::FqName;
use crate::types::{ParseStage, TypeKind};

type TypePassFn<'a> = &'a mut dyn FnMut(&mut Arena, TypeId) -> Result<()>;
type ExprPassFn<'a> = &'a mut dyn FnMut(&mut Arena, ExprId) -> Result<()>;

impl Arena {
    /// Run every resolution pass over one freshly parsed file.
    pub fn post_parse(&mut self, ast: AstId) -> Result<()> {
        debug!(file = %self.ast(ast).fqname(), "running post-parse passes");

        // references must resolve before anything else can be asked of the
        // type graph
        self.lookup_types(ast)?;
        self.set_stage(ast, ParseStage::Parse, ParseStage::PostParse)?;

        // name clashes first; later errors often only exist because the
        // user meant a different type than lookup picked
        self.validate_defined_types_unique_names(ast)?;
        // reordering precedes inheritance resolution so that walking a
        // super chain cannot loop
        self.topological_reorder(ast)?;
        self.resolve_inheritance(ast)?;
        self.lookup_constant_expressions(ast)?;
        // autofilled enum values exist only after inheritance resolution,
        // so the cycle check waits until here
        self.check_acyclic_constant_expressions(ast)?;
        self.validate_constant_expressions(ast)?;
        self.evaluate_constant_expressions(ast)?;
        self.validate_types(ast)?;
        self.check_forward_reference_restrictions(ast)?;
        self.gather_referenced_types(ast)?;

        // keep future files from revisiting this one's expressions
        self.expr_pass_over(ast, true, &mut |arena, id| {
            arena.expr_mut(id).post_parse_completed = true;
            Ok(())
        })?;
        self.set_stage(ast, ParseStage::PostParse, ParseStage::Completed)?;
        Ok(())
    }

    fn pass_children(&self, id: TypeId) -> Vec<TypeId> {
        let mut out: Vec<TypeId> = self
            .ty(id)
            .scope
            .as_ref()
            .map(|s| s.children().to_vec())
            .unwrap_or_default();
        out.extend(
            self.ty(id)
                .local_type_refs()
                .into_iter()
                .filter_map(|r| self.type_ref(r).target()),
        );
        out
    }

    /// Depth-first walk applying `f` once per node at the given stage.
    /// Nodes past the stage were handled by an earlier file and are
    /// skipped; nodes before it indicate a pipeline bug.
    fn type_pass(
        &mut self,
        id: TypeId,
        stage: ParseStage,
        before: bool,
        f: TypePassFn<'_>,
        visited: &mut HashSet<TypeId>,
    ) -> Result<()> {
        let node_stage = self.ty(id).stage;
        if node_stage > stage {
            return Ok(());
        }
        if node_stage < stage {
            return Err(CoreError::Internal(format!(
                "'{}' visited at stage {:?} while still at {:?}",
                self.ty(id).describe(),
                stage,
                node_stage
            )));
        }
        if !visited.insert(id) {
            return Ok(());
        }
        if before {
            f(self, id)?;
        }
        for child in self.pass_children(id) {
            self.type_pass(child, stage, before, &mut *f, visited)?;
        }
        if !before {
            f(self, id)?;
        }
        Ok(())
    }

    fn type_pass_over(
        &mut self,
        ast: AstId,
        stage: ParseStage,
        before: bool,
        f: TypePassFn<'_>,
    ) -> Result<()> {
        let root = self.ast(ast).root_scope();
        self.type_pass(root, stage, before, f, &mut HashSet::new())
    }

    fn expr_pass(
        &mut self,
        id: ExprId,
        before: bool,
        f: ExprPassFn<'_>,
        visited: &mut HashSet<ExprId>,
    ) -> Result<()> {
        if self.expr(id).post_parse_completed {
            return Ok(());
        }
        if !visited.insert(id) {
            return Ok(());
        }
        if before {
            f(self, id)?;
        }
        for child in self.expr_children(id) {
            self.expr_pass(child, before, &mut *f, visited)?;
        }
        if !before {
            f(self, id)?;
        }
        Ok(())
    }

    fn expr_pass_over(&mut self, ast: AstId, before: bool, f: ExprPassFn<'_>) -> Result<()> {
        let mut visited_exprs = HashSet::new();
        self.type_pass_over(ast, ParseStage::PostParse, true, &mut |arena, id| {
            for expr in arena.ty(id).local_exprs() {
                arena.expr_pass(expr, before, &mut *f, &mut visited_exprs)?;
            }
            Ok(())
        })
    }

    fn set_stage(&mut self, ast: AstId, old: ParseStage, new: ParseStage) -> Result<()> {
        self.type_pass_over(ast, old, true, &mut |arena, id| {
            arena.ty_mut(id).stage = new;
            Ok(())
        })
    }

    // ---- reference lookup ----

    fn lookup_types(&mut self, ast: AstId) -> Result<()> {
        self.type_pass_over(ast, ParseStage::Parse, true, &mut |arena, id| {
            let scope = arena.enclosing_scope(id);
            for r in arena.ty(id).local_type_refs() {
                if arena.type_ref(r).is_resolved() {
                    continue;
                }
                let Some(name) = arena.type_ref(r).lookup().cloned() else {
                    // the empty super reference of a root interface
                    continue;
                };
                let target = arena.lookup_type(ast, &name, scope)?.ok_or_else(|| {
                    CoreError::UnknownType {
                        name: name.to_string(),
                        location: arena.type_ref(r).location().clone(),
                    }
                })?;
                arena.type_ref_mut(r).bind(target);
            }
            Ok(())
        })
    }

    /// Resolve a type name against a use site. `Ok(None)` means nothing
    /// matched; ambiguity is an error, not a miss.
    pub fn lookup_type(
        &mut self,
        ast: AstId,
        name: &FqName,
        scope: Option<TypeId>,
    ) -> Result<Option<TypeId>> {
        if name.name().is_empty() {
            return Ok(None);
        }

        // rule 0: unqualified names try the lexical scope chain first
        if name.package().is_empty() && name.version().is_none() {
            if name.is_identifier() {
                if let Some(builtin) = self.builtin_by_name(name.name()) {
                    return Ok(Some(builtin));
                }
            }
            if let Some(found) = self.lookup_type_locally(name, scope) {
                return Ok(Some(found));
            }
        }

        // rule 1: autofill with the current package and try both our own
        // definitions and the imports
        let package = self.ast(ast).fqname().clone();
        let autofilled = name.with_defaults(
            package.package(),
            package.version().expect("file names carry a version"),
        );
        let local = self.find_defined_type(ast, &autofilled).map(|(id, _)| id);
        let imported = self.lookup_type_from_imports(ast, &autofilled)?;
        match (local, imported) {
            (Some(l), Some(i)) if l != i => {
                return Err(CoreError::AmbiguousReference {
                    name: name.to_string(),
                    first: self.ty(l).describe(),
                    second: self.ty(i).describe(),
                });
            }
            (Some(l), _) => return Ok(Some(l)),
            (None, Some(i)) => return Ok(Some(i)),
            (None, None) => {}
        }

        // rule 2: the imports, with the name as written
        self.lookup_type_from_imports(ast, name)
    }

    fn lookup_type_locally(&self, name: &FqName, scope: Option<TypeId>) -> Option<TypeId> {
        let components: Vec<&str> = name.name_components().collect();
        let (first, rest) = components.split_first()?;
        let mut scope = scope;
        while let Some(s) = scope {
            if let Some(data) = &self.ty(s).scope {
                if let Some(mut found) = data.get(first) {
                    let mut ok = true;
                    for component in rest {
                        match self
                            .ty(found)
                            .scope
                            .as_ref()
                            .and_then(|inner| inner.get(component))
                        {
                            Some(next) => found = next,
                            None => {
                                ok = false;
                                break;
                            }
                        }
                    }
                    if ok {
                        return Some(found);
                    }
                }
            }
            scope = self.ty(s).parent;
        }
        None
    }

    fn lookup_type_from_imports(&mut self, ast: AstId, name: &FqName) -> Result<Option<TypeId>> {
        let whole_files: Vec<AstId> = self
            .ast(ast)
            .imported_asts()
            .iter()
            .copied()
            .filter(|a| !self.ast(ast).imported_types().contains_key(a))
            .collect();
        let granular: Vec<(AstId, Vec<TypeId>)> = self
            .ast(ast)
            .imported_types()
            .iter()
            .map(|(a, set)| (*a, set.iter().copied().collect()))
            .collect();

        let mut resolved: Option<(TypeId, FqName)> = None;
        let mut consider = |found: (TypeId, FqName)| -> Result<()> {
            match &resolved {
                Some((prev, prev_name)) if *prev != found.0 => Err(CoreError::AmbiguousReference {
                    name: name.to_string(),
                    first: prev_name.to_string(),
                    second: found.1.to_string(),
                }),
                Some(_) => Ok(()),
                None => {
                    resolved = Some(found);
                    Ok(())
                }
            }
        };

        for imported in whole_files {
            if let Some(found) = self.find_defined_type(imported, name) {
                consider(found)?;
            }
        }
        for (imported, allowed) in granular {
            if let Some(found) = self.find_defined_type(imported, name) {
                if allowed.contains(&found.0) {
                    consider(found)?;
                }
            }
        }
        drop(consider);

        let Some((found, matching)) = resolved else {
            return Ok(None);
        };

        // Decide what the generated code must depend on. A non-interface
        // match may still live inside an interface file; if the top-level
        // name is an interface, the dependency is that interface, otherwise
        // it is the shared types file of the owning package.
        let mut dependency = found;
        if !self.ty(dependency).kind.is_interface() {
            let top = matching.top_level_type();
            let imported_asts: Vec<AstId> = self.ast(ast).imported_asts().to_vec();
            for imported in imported_asts {
                if let Some((candidate, _)) = self.find_defined_type(imported, &top) {
                    if self.ty(candidate).kind.is_interface() {
                        dependency = candidate;
                    }
                }
            }
        }
        let dependency_name = if self.ty(dependency).kind.is_interface() {
            self.ty(dependency)
                .fqname()
                .expect("interfaces are named")
                .clone()
        } else {
            matching.types_for_package()
        };
        self.ast_mut(ast).add_imported_name(dependency_name);
        Ok(Some(found))
    }

    // ---- constant expressions ----

    fn lookup_constant_expressions(&mut self, ast: AstId) -> Result<()> {
        let mut visited_exprs = HashSet::new();
        self.type_pass_over(ast, ParseStage::PostParse, true, &mut |arena, id| {
            let scope = arena.enclosing_scope(id);
            for expr in arena.ty(id).local_exprs() {
                arena.expr_pass(
                    expr,
                    true,
                    &mut |arena, e| arena.lookup_expr_names(ast, e, scope),
                    &mut visited_exprs,
                )?;
            }
            Ok(())
        })
    }

    fn lookup_expr_names(&mut self, ast: AstId, e: ExprId, scope: Option<TypeId>) -> Result<()> {
        match self.expr(e).kind.clone() {
            ExprKind::Reference { ident } => {
                if !self.ident_ref(ident).is_resolved() {
                    let name = self.ident_ref(ident).lookup().clone();
                    let location = self.ident_ref(ident).location().clone();
                    let target = self.lookup_local_identifier(ast, &name, scope, &location)?;
                    self.ident_ref_mut(ident).bind(target);
                }
            }
            ExprKind::Attribute { target, .. } => {
                if !self.type_ref(target).is_resolved() {
                    let name = self
                        .type_ref(target)
                        .lookup()
                        .cloned()
                        .ok_or_else(|| CoreError::Internal("attribute without a name".into()))?;
                    let found = self.lookup_type(ast, &name, scope)?.ok_or_else(|| {
                        CoreError::UnknownType {
                            name: name.to_string(),
                            location: self.type_ref(target).location().clone(),
                        }
                    })?;
                    self.type_ref_mut(target).bind(found);
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn lookup_local_identifier(
        &mut self,
        ast: AstId,
        name: &FqName,
        scope: Option<TypeId>,
        location: &crate::location::Location,
    ) -> Result<(TypeId, usize)> {
        if name.is_identifier() {
            // a bare name only means something inside an enum's own chain
            let mut current = scope;
            while let Some(s) = current {
                if self.ty(s).kind.is_enum() {
                    if let Some(found) = self.find_enum_value(s, name.name()) {
                        return Ok(found);
                    }
                }
                current = self.ty(s).parent;
            }
            return Err(CoreError::UnknownIdentifier {
                name: name.to_string(),
                location: location.clone(),
            });
        }

        let (type_name, value_name) = name
            .split_value()
            .ok_or_else(|| CoreError::UnknownIdentifier {
                name: name.to_string(),
                location: location.clone(),
            })?;
        let value_name = value_name.to_string();

        let ty = self
            .lookup_type(ast, &type_name, scope)?
            .ok_or_else(|| CoreError::Invalid(format!("cannot find type {}", type_name)))?;
        let ty = self.strip_typedefs(ty);
        if !self.ty(ty).kind.is_enum() {
            return Err(CoreError::Invalid(format!(
                "type {} is not an enum type",
                type_name
            )));
        }
        let found = self.find_enum_value(ty, &value_name).ok_or_else(|| {
            CoreError::Invalid(format!(
                "enum type {} does not have {}",
                type_name, value_name
            ))
        })?;
        if let Some(fq) = self.ty(found.0).fqname().cloned() {
            self.ast_mut(ast).add_referenced_type(fq);
        }
        Ok(found)
    }

    fn check_acyclic_constant_expressions(&mut self, ast: AstId) -> Result<()> {
        let mut visited = HashSet::new();
        let mut stack = HashSet::new();
        self.type_pass_over(ast, ParseStage::PostParse, true, &mut |arena, id| {
            for expr in arena.ty(id).local_exprs() {
                if arena.expr(expr).post_parse_completed {
                    continue;
                }
                arena.check_expr_acyclic(expr, &mut visited, &mut stack)?;
                debug_assert!(stack.is_empty());
            }
            Ok(())
        })
    }

    fn validate_constant_expressions(&mut self, ast: AstId) -> Result<()> {
        self.expr_pass_over(ast, true, &mut |arena, e| arena.validate_expr(e))
    }

    fn evaluate_constant_expressions(&mut self, ast: AstId) -> Result<()> {
        self.expr_pass_over(ast, false, &mut |arena, e| arena.evaluate_expr(e))
    }

    // ---- per-kind passes ----

    fn validate_defined_types_unique_names(&mut self, ast: AstId) -> Result<()> {
        self.type_pass_over(ast, ParseStage::PostParse, true, &mut |arena, id| {
            if arena.ty(id).scope.is_some() {
                arena.validate_scope_unique_names(id)?;
            }
            Ok(())
        })
    }

    fn resolve_inheritance(&mut self, ast: AstId) -> Result<()> {
        self.type_pass_over(ast, ParseStage::PostParse, false, &mut |arena, id| {
            match &arena.ty(id).kind {
                TypeKind::Enum(_) => arena.resolve_enum_inheritance(id),
                TypeKind::Interface(_) => arena.resolve_interface_inheritance(id),
                TypeKind::Array(_) => {
                    arena.flatten_array_typedefs(id);
                    Ok(())
                }
                _ => Ok(()),
            }
        })
    }

    fn validate_types(&mut self, ast: AstId) -> Result<()> {
        self.type_pass_over(ast, ParseStage::PostParse, true, &mut |arena, id| {
            match &arena.ty(id).kind {
                TypeKind::Enum(_) => arena.validate_enum(id),
                TypeKind::Compound(_) => arena.validate_compound(id),
                TypeKind::Interface(_) => arena.validate_interface(id),
                TypeKind::Bitfield { element } => {
                    let element = *element;
                    match arena.type_ref(element).target() {
                        Some(t) if arena.ty(arena.strip_typedefs(t)).kind.is_enum() => Ok(()),
                        _ => Err(CoreError::Invalid(format!(
                            "bitfield requires an enum element at {}",
                            arena.type_ref(element).location()
                        ))),
                    }
                }
                _ => Ok(()),
            }
        })
    }

    // ---- declaration order ----

    /// Reorder every scope in the file so declarations come after the
    /// types they depend on, detecting definition cycles.
    fn topological_reorder(&mut self, ast: AstId) -> Result<()> {
        let mut contained = Vec::new();
        let root = self.ast(ast).root_scope();
        self.collect_contained(root, &mut contained);

        let mut graph: DiGraph<TypeId, ()> = DiGraph::new();
        let mut nodes: HashMap<TypeId, NodeIndex> = HashMap::new();
        for &id in &contained {
            nodes.insert(id, graph.add_node(id));
        }
        for &id in &contained {
            let from = nodes[&id];
            if let Some(scope) = &self.ty(id).scope {
                for &child in scope.children() {
                    if let Some(&to) = nodes.get(&child) {
                        graph.add_edge(from, to, ());
                    }
                }
            }
            // anonymous containers pass their element dependencies through
            let mut stack = self.strong_refs(id);
            while let Some(r) = stack.pop() {
                let Some(target) = self.type_ref(r).target() else {
                    continue;
                };
                if let Some(&to) = nodes.get(&target) {
                    graph.add_edge(from, to, ());
                } else if self.ty(target).name.is_none() {
                    stack.extend(self.strong_refs(target));
                }
            }
        }

        let order = match toposort(&graph, None) {
            Ok(order) => order,
            Err(_) => {
                return Err(CoreError::CyclicDeclaration(
                    self.describe_declaration_cycle(&contained, &graph, &nodes),
                ))
            }
        };

        // dependencies come last in toposort order with our edge
        // direction; reverse so they sort first
        let mut indices: HashMap<TypeId, usize> = HashMap::new();
        for (i, node) in order.into_iter().rev().enumerate() {
            indices.insert(graph[node], i);
        }

        let scopes: Vec<TypeId> = std::iter::once(root)
            .chain(contained.iter().copied())
            .filter(|&id| self.ty(id).scope.is_some())
            .collect();
        for scope in scopes {
            self.reorder_scope(scope, &indices);
        }
        Ok(())
    }

    fn collect_contained(&self, scope: TypeId, out: &mut Vec<TypeId>) {
        for &child in self.scope(scope).children() {
            out.push(child);
            if self.ty(child).scope.is_some() {
                self.collect_contained(child, out);
            }
        }
    }

    // Walk the graph again with an explicit stack to name the cycle.
    fn describe_declaration_cycle(
        &self,
        contained: &[TypeId],
        graph: &DiGraph<TypeId, ()>,
        nodes: &HashMap<TypeId, NodeIndex>,
    ) -> String {
        fn dfs(
            graph: &DiGraph<TypeId, ()>,
            at: NodeIndex,
            visited: &mut HashSet<NodeIndex>,
            stack: &mut Vec<NodeIndex>,
            on_stack: &mut HashSet<NodeIndex>,
        ) -> Option<Vec<NodeIndex>> {
            if on_stack.contains(&at) {
                let start = stack.iter().position(|&n| n == at).unwrap_or(0);
                let mut cycle = stack[start..].to_vec();
                cycle.push(at);
                return Some(cycle);
            }
            if !visited.insert(at) {
                return None;
            }
            stack.push(at);
            on_stack.insert(at);
            for next in graph.neighbors(at) {
                if let Some(cycle) = dfs(graph, next, visited, stack, on_stack) {
                    return Some(cycle);
                }
            }
            stack.pop();
            on_stack.remove(&at);
            None
        }

        let mut visited = HashSet::new();
        for &id in contained {
            let mut stack = Vec::new();
            let mut on_stack = HashSet::new();
            if let Some(cycle) = dfs(graph, nodes[&id], &mut visited, &mut stack, &mut on_stack) {
                return cycle
                    .into_iter()
                    .map(|n| format!("'{}'", self.ty(graph[n]).describe()))
                    .collect::<Vec<_>>()
                    .join(" -> ");
            }
        }
        "(cycle could not be reconstructed)".to_string()
    }

    // ---- late checks ----

    /// A reference may point forward in its own file only when the use
    /// site sits inside the referenced type's own definition.
    fn check_forward_reference_restrictions(&mut self, ast: AstId) -> Result<()> {
        self.type_pass_over(ast, ParseStage::PostParse, true, &mut |arena, id| {
            for r in arena.ty(id).local_type_refs() {
                let slot = arena.type_ref(r);
                if slot.lookup().is_none() {
                    continue;
                }
                let Some(target) = slot.target() else {
                    continue;
                };
                let Some(target_name) = arena.ty(target).name.as_ref() else {
                    continue;
                };
                let ref_loc = slot.location();
                let type_loc = &target_name.location;
                if !ref_loc.is_valid()
                    || !type_loc.is_valid()
                    || !ref_loc.in_same_file(type_loc)
                {
                    continue;
                }
                if type_loc.is_before(ref_loc) || ref_loc.intersects(type_loc) {
                    continue;
                }
                return Err(CoreError::ForwardReference {
                    name: target_name.fqname.to_string(),
                    location: ref_loc.clone(),
                });
            }
            Ok(())
        })
    }

    fn gather_referenced_types(&mut self, ast: AstId) -> Result<()> {
        self.type_pass_over(ast, ParseStage::PostParse, true, &mut |arena, id| {
            for r in arena.ty(id).local_type_refs() {
                if let Some(target) = arena.type_ref(r).target() {
                    if let Some(fq) = arena.ty(target).fqname().cloned() {
                        arena.ast_mut(ast).add_referenced_type(fq);
                    }
                }
            }
            Ok(())
        })
    }
}
