//! Table graph - memoized transitions between tables.
//!
//! Each table owns an edge per id for "add this id" and "remove this id".
//! The first traversal computes the destination type, creates the table if
//! needed and caches the edge together with its [`TableDiff`]; later
//! traversals are a single map lookup. Creating an edge also caches the
//! reverse edge on the destination, so `remove` after `add` never recomputes.

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::{SmallVec, smallvec};
use tracing::{debug, trace};

use crate::{
    error::{Constraint, EcsError, EcsResult},
    id::{Entity, Id},
    store::Store,
    table::{Table, TableId, Type},
};

/// Ids added and removed along an edge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableDiff {
    pub added: SmallVec<[Id; 2]>,
    pub removed: SmallVec<[Id; 2]>,
}

impl TableDiff {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    /// The diff of the opposite transition.
    #[must_use]
    pub fn inverse(&self) -> Self {
        Self {
            added: self.removed.clone(),
            removed: self.added.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EdgeKind {
    Add,
    Remove,
}

impl EdgeKind {
    const fn reverse(self) -> Self {
        match self {
            Self::Add => Self::Remove,
            Self::Remove => Self::Add,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Edge {
    pub to: TableId,
    pub diff: TableDiff,
}

/// Outgoing and incoming edges of one table.
#[derive(Debug, Default)]
pub(crate) struct GraphNode {
    pub add: FxHashMap<Id, Edge>,
    pub remove: FxHashMap<Id, Edge>,
    /// Edges of other tables that lead here: `(from, id, kind)`.
    pub incoming: Vec<(TableId, Id, EdgeKind)>,
}

impl GraphNode {
    fn edges(&self, kind: EdgeKind) -> &FxHashMap<Id, Edge> {
        match kind {
            EdgeKind::Add => &self.add,
            EdgeKind::Remove => &self.remove,
        }
    }

    fn edges_mut(&mut self, kind: EdgeKind) -> &mut FxHashMap<Id, Edge> {
        match kind {
            EdgeKind::Add => &mut self.add,
            EdgeKind::Remove => &mut self.remove,
        }
    }
}

/// Reject ids that can never be part of a table type.
pub(crate) fn validate_id(id: Id) -> EcsResult<()> {
    match id {
        Id::Entity(entity) if entity.is_null() => {
            Err(EcsError::InvalidId("null id".to_string()))
        }
        Id::Pair { relation, target } if relation.is_null() || target.is_null() => {
            Err(EcsError::InvalidId(format!("pair with null element: {id}")))
        }
        _ if id.is_wildcard() => Err(EcsError::InvalidId(format!(
            "wildcard {id} cannot be stored in a table"
        ))),
        _ => Ok(()),
    }
}

impl Store {
    /// Table that results from adding `id` to `table`.
    ///
    /// Fails with `ConstraintViolation` if the id breaks an exclusive or
    /// one-of relation; no table or edge is created in that case.
    pub fn traverse_add(&mut self, table: TableId, id: Id) -> EcsResult<(TableId, TableDiff)> {
        self.traverse(table, id, EdgeKind::Add)
    }

    /// Table that results from removing `id` from `table`.
    pub fn traverse_remove(&mut self, table: TableId, id: Id) -> EcsResult<(TableId, TableDiff)> {
        self.traverse(table, id, EdgeKind::Remove)
    }

    fn traverse(
        &mut self,
        table: TableId,
        id: Id,
        kind: EdgeKind,
    ) -> EcsResult<(TableId, TableDiff)> {
        validate_id(id)?;

        let src = self
            .table(table)
            .ok_or_else(|| EcsError::InvalidId(format!("no table {table:?}")))?;

        if let Some(edge) = src.node.edges(kind).get(&id) {
            return Ok((edge.to, edge.diff.clone()));
        }

        let next: Option<(Type, TableDiff)> = match kind {
            EdgeKind::Add if !src.has(id) => {
                self.check_constraints(src, id)?;
                let mut ty: Type = src.ty().iter().copied().collect();
                let pos = ty.binary_search(&id).unwrap_or_else(|pos| pos);
                ty.insert(pos, id);
                Some((
                    ty,
                    TableDiff {
                        added: smallvec![id],
                        removed: SmallVec::new(),
                    },
                ))
            }
            EdgeKind::Remove if src.has(id) => {
                let ty: Type = src.ty().iter().copied().filter(|&t| t != id).collect();
                Some((
                    ty,
                    TableDiff {
                        added: SmallVec::new(),
                        removed: smallvec![id],
                    },
                ))
            }
            _ => None,
        };

        let (to, diff) = match next {
            Some((ty, diff)) => (self.find_or_create_table(ty), diff),
            None => (table, TableDiff::default()),
        };

        self.link(table, to, id, kind, diff.clone());
        Ok((to, diff))
    }

    /// Cache the edge `from -> to` and its reverse.
    fn link(&mut self, from: TableId, to: TableId, id: Id, kind: EdgeKind, diff: TableDiff) {
        trace!(?from, ?to, %id, ?kind, "created table edge");

        let inverse = diff.inverse();
        if let Some(table) = self.table_mut(from) {
            table.node.edges_mut(kind).insert(id, Edge { to, diff });
        }
        if from == to {
            return;
        }

        let reverse = kind.reverse();
        let mut linked_back = false;
        if let Some(table) = self.table_mut(to) {
            table.node.incoming.push((from, id, kind));
            if !table.node.edges(reverse).contains_key(&id) {
                table.node.edges_mut(reverse).insert(
                    id,
                    Edge {
                        to: from,
                        diff: inverse,
                    },
                );
                linked_back = true;
            }
        }
        if linked_back {
            if let Some(table) = self.table_mut(from) {
                table.node.incoming.push((to, id, reverse));
            }
        }
    }

    /// Check exclusive and one-of constraints for adding `id` to `table`.
    pub(crate) fn check_constraints(&self, table: &Table, id: Id) -> EcsResult<()> {
        let Id::Pair { relation, target } = id else {
            return Ok(());
        };
        let info = self.relation(relation);
        let violation = |kind| EcsError::ConstraintViolation {
            relation,
            target,
            kind,
        };

        if info.is_exclusive()
            && table
                .find_match(Id::pair(relation, Entity::WILDCARD), 0)
                .is_some()
        {
            return Err(violation(Constraint::Exclusive));
        }

        if let Some(scope) = info.one_of_scope() {
            let parent = Id::pair(Entity::CHILD_OF, scope);
            let in_scope = self
                .entity_index
                .get_alive(target)
                .and_then(|target| self.entity_index.try_get(target))
                .and_then(|record| self.table(record.table))
                .is_some_and(|table| table.has(parent));
            if !in_scope {
                return Err(violation(Constraint::OneOf));
            }
        }

        Ok(())
    }

    /// Check that adding `(R, t)` to `entity` does not close an `R` cycle.
    pub(crate) fn check_acyclic(&self, entity: Entity, id: Id) -> EcsResult<()> {
        let Id::Pair { relation, target } = id else {
            return Ok(());
        };
        if !self.relation(relation).is_acyclic() {
            return Ok(());
        }

        let pattern = Id::pair(relation, Entity::WILDCARD);
        let mut visited = FxHashSet::default();
        let mut stack = vec![target];

        while let Some(current) = stack.pop() {
            if current.index() == entity.index() {
                return Err(EcsError::ConstraintViolation {
                    relation,
                    target,
                    kind: Constraint::Acyclic,
                });
            }
            if !visited.insert(current.index()) {
                continue;
            }
            let Some(table) = self
                .entity_index
                .get_alive(current)
                .and_then(|current| self.entity_index.try_get(current))
                .and_then(|record| self.table(record.table))
            else {
                continue;
            };
            let mut index = 0;
            while let Some(found) = table.find_match(pattern, index) {
                stack.extend(table.ty()[found].second());
                index = found + 1;
            }
        }

        Ok(())
    }

    /// Get the table for a sorted type, creating it on first use.
    pub fn find_or_create_table(&mut self, ty: Type) -> TableId {
        if let Some(&id) = self.table_map.get(&ty) {
            return id;
        }

        let id = self
            .free_tables
            .pop()
            .unwrap_or_else(|| TableId::from_raw(self.tables.len() as u32));
        let mut table = Table::new(id, ty.clone(), &self.components, self.table_capacity);
        self.id_records.register_table(&mut table);

        debug!(?id, ty = %DisplayType(&ty), "created table");

        match self.tables.get_mut(id.index()) {
            Some(slot) => *slot = Some(table),
            None => self.tables.push(Some(table)),
        }
        self.table_map.insert(ty, id);
        id
    }

    /// Delete an empty, non-root table and every edge touching it.
    ///
    /// Returns `false` if the table is the root, missing, or not empty.
    pub fn delete_table(&mut self, id: TableId) -> bool {
        if id == TableId::ROOT || !self.table(id).is_some_and(Table::is_empty) {
            return false;
        }
        let Some(table) = self.tables.get_mut(id.index()).and_then(Option::take) else {
            return false;
        };

        for &(from, edge_id, kind) in &table.node.incoming {
            if let Some(other) = self.table_mut(from) {
                let edges = other.node.edges_mut(kind);
                if edges.get(&edge_id).is_some_and(|edge| edge.to == id) {
                    edges.remove(&edge_id);
                }
            }
        }
        for edge in table.node.add.values().chain(table.node.remove.values()) {
            if let Some(other) = self.table_mut(edge.to) {
                other.node.incoming.retain(|&(from, ..)| from != id);
            }
        }

        self.id_records.unregister_table(&table);
        self.table_map.remove(table.ty());
        self.free_tables.push(id);

        debug!(?id, ty = %DisplayType(table.ty()), "deleted table");
        true
    }

    /// Delete every empty table except the root. Returns how many were deleted.
    pub fn delete_empty_tables(&mut self) -> usize {
        let empty: Vec<TableId> = self
            .tables()
            .filter(|table| table.is_empty() && table.id() != TableId::ROOT)
            .map(Table::id)
            .collect();
        empty
            .into_iter()
            .filter(|&id| self.delete_table(id))
            .count()
    }
}

/// Formats a type as `[a, b, (r, t)]`.
pub(crate) struct DisplayType<'a>(pub &'a [Id]);

impl std::fmt::Display for DisplayType<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[")?;
        for (i, id) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{id}")?;
        }
        write!(f, "]")
    }
}
