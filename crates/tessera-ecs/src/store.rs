//! Store - tables, id records and the entity index of one world.
//!
//! All structural mutation funnels through here: every entity lives in
//! exactly one table, and its [`Record`] in the entity index always points
//! at the row holding it.

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::warn;

use crate::{
    component::ComponentRegistry,
    config::WorldConfig,
    entity_index::{EntityIndex, Record},
    error::{EcsError, EcsResult},
    graph::validate_id,
    id::{Entity, Id},
    id_record::IdRecords,
    relation::RelationInfo,
    table::{Table, TableId, Type, two_tables_mut},
};

/// Archetype storage: tables, the table graph, id records and entity index.
pub struct Store {
    pub(crate) entity_index: EntityIndex,
    pub(crate) tables: Vec<Option<Table>>,
    /// Slots of deleted tables, reused before `tables` grows.
    pub(crate) free_tables: Vec<TableId>,
    pub(crate) table_map: FxHashMap<Type, TableId>,
    pub(crate) id_records: IdRecords,
    pub(crate) components: ComponentRegistry,
    /// Relation traits keyed by relation index.
    pub(crate) relations: FxHashMap<u32, RelationInfo>,
    pub(crate) table_capacity: usize,
}

impl Store {
    pub(crate) fn new(config: &WorldConfig) -> Self {
        let components = ComponentRegistry::new();
        let root = Table::new(TableId::ROOT, Type::new(), &components, 0);

        let mut table_map = FxHashMap::default();
        table_map.insert(Type::new(), TableId::ROOT);

        let mut relations = FxHashMap::default();
        relations.insert(Entity::CHILD_OF.index(), RelationInfo::CHILD_OF);

        Self {
            entity_index: EntityIndex::with_capacity(config.entity_capacity),
            tables: vec![Some(root)],
            free_tables: Vec::new(),
            table_map,
            id_records: IdRecords::default(),
            components,
            relations,
            table_capacity: config.table_capacity,
        }
    }

    #[must_use]
    pub fn table(&self, id: TableId) -> Option<&Table> {
        self.tables.get(id.index())?.as_ref()
    }

    pub(crate) fn table_mut(&mut self, id: TableId) -> Option<&mut Table> {
        self.tables.get_mut(id.index())?.as_mut()
    }

    /// Iterate all live tables.
    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.iter().flatten()
    }

    #[must_use]
    pub fn table_count(&self) -> usize {
        self.tables().count()
    }

    #[must_use]
    pub fn id_records(&self) -> &IdRecords {
        &self.id_records
    }

    #[must_use]
    pub fn entity_index(&self) -> &EntityIndex {
        &self.entity_index
    }

    /// Location of a live entity.
    #[must_use]
    pub fn record(&self, entity: Entity) -> Option<Record> {
        self.entity_index.try_get(entity).copied()
    }

    fn live_record(&self, entity: Entity) -> EcsResult<Record> {
        self.record(entity).ok_or(EcsError::StaleReference(entity))
    }

    /// Traits of a relation. Relations without traits get the default.
    #[must_use]
    pub fn relation(&self, relation: Entity) -> RelationInfo {
        self.relations
            .get(&relation.index())
            .copied()
            .unwrap_or_default()
    }

    /// Create an entity in the root table.
    pub(crate) fn new_entity(&mut self) -> Entity {
        let entity = self.entity_index.new_id();
        let row = self.append(TableId::ROOT, entity);
        if let Some(record) = self.entity_index.get_mut(entity) {
            *record = Record {
                table: TableId::ROOT,
                row,
            };
        }
        entity
    }

    /// Make a specific id alive, placing it in the root table.
    pub(crate) fn ensure_entity(&mut self, entity: Entity) -> EcsResult<()> {
        if self.entity_index.is_alive(entity) {
            return Ok(());
        }
        self.entity_index.ensure(entity)?;
        let row = self.append(TableId::ROOT, entity);
        *self.entity_index.ensure(entity)? = Record {
            table: TableId::ROOT,
            row,
        };
        Ok(())
    }

    fn append(&mut self, table: TableId, entity: Entity) -> u32 {
        let Some(t) = self.tables.get_mut(table.index()).and_then(Option::as_mut) else {
            return 0;
        };
        let row = t.append(entity) as u32;
        if t.len() == 1 {
            self.id_records.set_table_active(t, true);
        }
        row
    }

    /// Check that an id refers to live entities before storing it.
    fn validate_live(&self, id: Id) -> EcsResult<()> {
        validate_id(id)?;
        let alive = match id {
            Id::Entity(entity) => self.entity_index.is_alive(entity),
            Id::Pair { relation, target } => {
                self.entity_index.get_alive(relation).is_some()
                    && self.entity_index.get_alive(target).is_some()
            }
        };
        if alive {
            Ok(())
        } else {
            Err(EcsError::InvalidId(format!("{id} refers to a dead entity")))
        }
    }

    /// Move an entity to `dst`, keeping the entity index in sync.
    fn commit(&mut self, entity: Entity, record: Record, dst: TableId) {
        if record.table == dst {
            return;
        }
        let Some((src_table, dst_table)) = two_tables_mut(&mut self.tables, record.table, dst)
        else {
            return;
        };

        let (row, swapped) = Table::move_entity(src_table, record.row as usize, dst_table);
        debug_assert!(src_table.is_consistent() && dst_table.is_consistent());

        if src_table.is_empty() {
            self.id_records.set_table_active(src_table, false);
        }
        if dst_table.len() == 1 {
            self.id_records.set_table_active(dst_table, true);
        }

        if let Some(moved) = self.entity_index.get_mut(entity) {
            *moved = Record {
                table: dst,
                row: row as u32,
            };
        }
        if let Some(swapped) = swapped
            && let Some(swapped) = self.entity_index.get_mut(swapped)
        {
            swapped.row = record.row;
        }
    }

    pub(crate) fn add_id(&mut self, entity: Entity, id: Id) -> EcsResult<()> {
        let record = self.live_record(entity)?;
        self.validate_live(id)?;
        self.check_acyclic(entity, id)?;
        let (dst, _) = self.traverse_add(record.table, id)?;
        self.commit(entity, record, dst);
        Ok(())
    }

    pub(crate) fn remove_id(&mut self, entity: Entity, id: Id) -> EcsResult<()> {
        let record = self.live_record(entity)?;
        let (dst, _) = self.traverse_remove(record.table, id)?;
        self.commit(entity, record, dst);
        Ok(())
    }

    /// Move an entity back to the root table.
    pub(crate) fn clear(&mut self, entity: Entity) -> EcsResult<()> {
        let record = self.live_record(entity)?;
        self.commit(entity, record, TableId::ROOT);
        Ok(())
    }

    #[must_use]
    pub fn has_id(&self, entity: Entity, id: Id) -> bool {
        let Some(table) = self.record(entity).and_then(|r| self.table(r.table)) else {
            return false;
        };
        if id.is_wildcard() {
            table.find_match(id.any_as_wildcard(), 0).is_some()
        } else {
            table.has(id)
        }
    }

    pub(crate) fn get<T: 'static>(&self, entity: Entity, id: Id) -> Option<&T> {
        let record = self.record(entity)?;
        self.table(record.table)?.get::<T>(id, record.row as usize)
    }

    pub(crate) fn get_mut<T: 'static>(&mut self, entity: Entity, id: Id) -> Option<&mut T> {
        let record = self.record(entity)?;
        self.table_mut(record.table)?
            .get_mut::<T>(id, record.row as usize)
    }

    /// Add `id` and move `value` into its column.
    pub(crate) fn set<T: 'static>(&mut self, entity: Entity, id: Id, value: T) -> EcsResult<()> {
        self.check_data_type::<T>(id)?;
        self.add_id(entity, id)?;
        if let Some(slot) = self.get_mut::<T>(entity, id) {
            *slot = value;
        }
        Ok(())
    }

    pub(crate) fn check_data_type<T: 'static>(&self, id: Id) -> EcsResult<()> {
        match self.components.data_info(id) {
            Some(info) if info.is::<T>() => Ok(()),
            _ => Err(EcsError::TypeMismatch {
                id,
                type_name: std::any::type_name::<T>(),
            }),
        }
    }

    /// Add `id` and move the value behind `value` into its column.
    ///
    /// # Safety
    ///
    /// `value` must point to an initialized value of the data type of `id`.
    /// Ownership moves into the table only if `Ok(true)` is returned.
    pub(crate) unsafe fn set_raw(
        &mut self,
        entity: Entity,
        id: Id,
        value: *const u8,
    ) -> EcsResult<bool> {
        self.add_id(entity, id)?;
        let record = self.live_record(entity)?;
        let Some(table) = self.table_mut(record.table) else {
            return Ok(false);
        };
        let Some(column) = table
            .type_index(id)
            .and_then(|index| table.column_index(index))
        else {
            return Ok(false);
        };
        let Some(column) = table.column_mut(column) else {
            return Ok(false);
        };
        // SAFETY: caller guarantees value matches the column type; row is live
        unsafe { column.replace_raw(record.row as usize, value) };
        Ok(true)
    }

    /// Remove an entity from its table and recycle its id.
    pub(crate) fn delete_entity(&mut self, entity: Entity) -> EcsResult<()> {
        let record = self.live_record(entity)?;

        if let Some(table) = self.tables.get_mut(record.table.index()).and_then(Option::as_mut) {
            let swapped = table.delete(record.row as usize);
            if table.is_empty() {
                self.id_records.set_table_active(table, false);
            }
            if let Some(swapped) = swapped
                && let Some(swapped) = self.entity_index.get_mut(swapped)
            {
                swapped.row = record.row;
            }
        }

        self.entity_index.remove(entity);
        Ok(())
    }

    /// Delete an entity and everything parented to it.
    ///
    /// Children (holders of `(ChildOf, e)`) are deleted recursively, deepest
    /// first. For every other reference the id is removed from its holder:
    /// `e`, `(e, *)` and `(*, e)`. Returns every entity that was deleted.
    pub(crate) fn delete_with_cleanup(&mut self, entity: Entity) -> EcsResult<Vec<Entity>> {
        self.live_record(entity)?;

        let doomed = self.child_of_tree(entity);
        for &child in doomed[1..].iter().rev() {
            if let Err(err) = self.delete_one(child) {
                warn!(?child, %err, "failed to delete child");
            }
        }
        self.delete_one(entity)?;
        Ok(doomed)
    }

    /// `root` followed by its descendants via `ChildOf`, parents before
    /// children.
    fn child_of_tree(&self, root: Entity) -> Vec<Entity> {
        let mut tree = vec![root];
        let mut next = 0;
        while let Some(&parent) = tree.get(next) {
            next += 1;
            let Some(record) = self.id_records.get(Id::pair(Entity::CHILD_OF, parent)) else {
                continue;
            };
            for tr in record.tables() {
                if let Some(table) = self.table(tr.table) {
                    tree.extend_from_slice(table.entities());
                }
            }
        }
        tree
    }

    /// Delete one entity, stripping ids that refer to it from other
    /// entities. Tables that contained those ids are deleted along with their
    /// id records.
    fn delete_one(&mut self, entity: Entity) -> EcsResult<()> {
        self.live_record(entity)?;

        let patterns = [
            Id::from(entity),
            Id::pair(entity, Entity::WILDCARD),
            Id::pair(Entity::WILDCARD, entity),
        ];

        let mut holders: Vec<Entity> = Vec::new();
        let mut doomed_tables: Vec<TableId> = Vec::new();
        for pattern in patterns {
            let Some(record) = self.id_records.get(pattern) else {
                continue;
            };
            for tr in record.each_table(true) {
                doomed_tables.push(tr.table);
                if let Some(table) = self.table(tr.table) {
                    holders.extend_from_slice(table.entities());
                }
            }
        }
        holders.sort_unstable();
        holders.dedup();

        let matches = |id: &Id| {
            patterns[1..]
                .iter()
                .any(|&pattern| id.matches(pattern))
                || *id == patterns[0]
        };

        let mut doomed_ids: FxHashSet<Id> = patterns.into_iter().collect();
        for holder in holders {
            if holder == entity {
                continue;
            }
            let Some(table) = self.record(holder).and_then(|r| self.table(r.table)) else {
                continue;
            };
            let ids: Vec<Id> = table.ty().iter().copied().filter(matches).collect();
            for id in ids {
                doomed_ids.insert(id);
                if let Err(err) = self.remove_id(holder, id) {
                    warn!(?holder, %id, %err, "failed to remove reference to deleted entity");
                }
            }
        }

        self.delete_entity(entity)?;

        doomed_tables.sort_unstable();
        doomed_tables.dedup();
        for table in doomed_tables {
            self.delete_table(table);
        }
        for id in doomed_ids {
            if self
                .id_records
                .get(id)
                .is_some_and(|record| record.table_count() == 0)
            {
                self.id_records.remove(id);
            }
        }

        self.relations.remove(&entity.index());
        self.components.unregister(entity);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::Constraint, relation::RelationTraits};

    #[derive(Debug, Default, PartialEq)]
    struct Health(u32);

    fn store() -> Store {
        let mut store = Store::new(&WorldConfig::default());
        // Builtins occupy the first indices
        for _ in 0..Entity::LAST_BUILTIN {
            store.new_entity();
        }
        store
    }

    fn check_records(store: &Store) {
        for entity in store.entity_index.iter() {
            let record = store.record(entity).unwrap();
            let table = store.table(record.table).unwrap();
            assert_eq!(table.entities()[record.row as usize], entity);
        }
        for table in store.tables() {
            assert!(table.is_consistent());
        }
    }

    #[test]
    fn test_add_moves_entity() {
        let mut store = store();
        let tag = store.new_entity();
        let e1 = store.new_entity();
        let e2 = store.new_entity();

        store.add_id(e1, Id::from(tag)).unwrap();
        assert!(store.has_id(e1, Id::from(tag)));
        assert!(!store.has_id(e2, Id::from(tag)));
        check_records(&store);

        store.add_id(e2, Id::from(tag)).unwrap();
        store.remove_id(e1, Id::from(tag)).unwrap();
        assert!(!store.has_id(e1, Id::from(tag)));
        assert!(store.has_id(e2, Id::from(tag)));
        check_records(&store);
    }

    #[test]
    fn test_empty_table_moves_to_empty_list() {
        let mut store = store();
        let tag = Id::from(store.new_entity());
        let e = store.new_entity();

        store.add_id(e, tag).unwrap();
        let table = store.record(e).unwrap().table;
        assert_eq!(store.id_records.get(tag).unwrap().tables().len(), 1);

        store.remove_id(e, tag).unwrap();
        let record = store.id_records.get(tag).unwrap();
        assert!(record.tables().is_empty());
        assert_eq!(record.empty_tables()[0].table, table);
    }

    #[test]
    fn test_set_and_get() {
        let mut store = store();
        let health = store.new_entity();
        store.components.register::<Health>(health);
        let e = store.new_entity();

        store.set(e, Id::from(health), Health(10)).unwrap();
        assert_eq!(store.get::<Health>(e, Id::from(health)), Some(&Health(10)));
        assert!(matches!(
            store.set(e, Id::from(health), 5u64),
            Err(EcsError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_stale_entity() {
        let mut store = store();
        let tag = Id::from(store.new_entity());
        let e = store.new_entity();
        store.delete_entity(e).unwrap();

        assert!(matches!(
            store.add_id(e, tag),
            Err(EcsError::StaleReference(_))
        ));
    }

    #[test]
    fn test_acyclic() {
        let mut store = store();
        let a = store.new_entity();
        let b = store.new_entity();
        let c = store.new_entity();

        store.add_id(b, Id::pair(Entity::CHILD_OF, a)).unwrap();
        store.add_id(c, Id::pair(Entity::CHILD_OF, b)).unwrap();

        let result = store.add_id(a, Id::pair(Entity::CHILD_OF, c));
        assert!(matches!(
            result,
            Err(EcsError::ConstraintViolation {
                kind: Constraint::Acyclic,
                ..
            })
        ));
        assert!(!store.has_id(a, Id::pair(Entity::CHILD_OF, Entity::WILDCARD)));
    }

    #[test]
    fn test_one_of() {
        let mut store = store();
        let color = store.new_entity();
        let red = store.new_entity();
        let tall = store.new_entity();
        let e = store.new_entity();
        store.add_id(red, Id::pair(Entity::CHILD_OF, color)).unwrap();
        store.relations.insert(
            color.index(),
            RelationInfo {
                traits: RelationTraits::ONE_OF,
                one_of: Some(color),
            },
        );

        store.add_id(e, Id::pair(color, red)).unwrap();
        assert!(matches!(
            store.add_id(e, Id::pair(color, tall)),
            Err(EcsError::ConstraintViolation {
                kind: Constraint::OneOf,
                ..
            })
        ));
    }

    #[test]
    fn test_delete_with_cleanup() {
        let mut store = store();
        let likes = store.new_entity();
        let bob = store.new_entity();
        let alice = store.new_entity();
        let tag = store.new_entity();

        store.add_id(alice, Id::pair(likes, bob)).unwrap();
        store.add_id(alice, Id::from(tag)).unwrap();
        store.add_id(bob, Id::pair(likes, alice)).unwrap();

        store.delete_with_cleanup(bob).unwrap();

        assert!(!store.entity_index.is_alive(bob));
        assert!(store.has_id(alice, Id::from(tag)));
        assert!(!store.has_id(alice, Id::pair(likes, Entity::WILDCARD)));
        assert!(store.id_records.get(Id::pair(likes, bob)).is_none());
        assert!(
            store
                .tables()
                .all(|t| !t.has(Id::pair(likes, bob)))
        );
        check_records(&store);
    }

    #[test]
    fn test_delete_cascades_to_children() {
        let mut store = store();
        let child_of = |parent| Id::pair(Entity::CHILD_OF, parent);
        let root = store.new_entity();
        let mid = store.new_entity();
        let leaf = store.new_entity();
        let sibling = store.new_entity();
        let other = store.new_entity();
        let likes = store.new_entity();
        store.add_id(mid, child_of(root)).unwrap();
        store.add_id(sibling, child_of(root)).unwrap();
        store.add_id(leaf, child_of(mid)).unwrap();
        store.add_id(other, Id::pair(likes, mid)).unwrap();

        let mut deleted = store.delete_with_cleanup(root).unwrap();
        deleted.sort_unstable();
        let mut expected = vec![root, mid, leaf, sibling];
        expected.sort_unstable();
        assert_eq!(deleted, expected);

        for e in expected {
            assert!(!store.entity_index.is_alive(e));
        }
        assert!(store.entity_index.is_alive(other));
        assert!(!store.has_id(other, Id::pair(likes, Entity::WILDCARD)));
        check_records(&store);
    }
}
