//! Id records - the reverse index from ids to tables.
//!
//! Every id that appears in a table type has a record listing the tables
//! that contain it, split into tables with entities (active) and without
//! (empty). Wildcard patterns `*`, `(R, *)`, `(*, T)` and `(*, *)` get their
//! own records, maintained eagerly whenever a table is created or deleted,
//! so a wildcard term only ever visits matching tables.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tracing::trace;

use crate::{
    id::{Entity, Id},
    table::{Table, TableId},
};

/// Where an id lives in one table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TableRecord {
    pub table: TableId,
    /// Type index of the first matching id.
    pub index: u16,
    /// Number of ids in the type matching the record's id.
    pub count: u16,
    /// Column of the first matching id, if it carries data.
    pub column: Option<u16>,
}

#[derive(Clone, Copy, Debug)]
struct Slot {
    active: bool,
    pos: u32,
}

/// Tables containing one id (or wildcard pattern).
#[derive(Debug)]
pub struct IdRecord {
    id: Id,
    slots: FxHashMap<TableId, Slot>,
    active: Vec<TableRecord>,
    empty: Vec<TableRecord>,
}

impl IdRecord {
    fn new(id: Id) -> Self {
        Self {
            id,
            slots: FxHashMap::default(),
            active: Vec::new(),
            empty: Vec::new(),
        }
    }

    #[must_use]
    pub const fn id(&self) -> Id {
        self.id
    }

    /// Tables that contain the id and at least one entity.
    #[must_use]
    pub fn tables(&self) -> &[TableRecord] {
        &self.active
    }

    /// Tables that contain the id but no entities.
    #[must_use]
    pub fn empty_tables(&self) -> &[TableRecord] {
        &self.empty
    }

    /// Iterate tables, optionally including empty ones.
    pub fn each_table(&self, include_empty: bool) -> impl Iterator<Item = &TableRecord> {
        let empty: &[TableRecord] = if include_empty { &self.empty } else { &[] };
        self.active.iter().chain(empty)
    }

    /// Number of tables, empty or not.
    #[must_use]
    pub fn table_count(&self) -> usize {
        self.slots.len()
    }

    /// Locate the id within `table` in O(1).
    #[must_use]
    pub fn table_record(&self, table: TableId) -> Option<&TableRecord> {
        let slot = self.slots.get(&table)?;
        let list = if slot.active { &self.active } else { &self.empty };
        list.get(slot.pos as usize)
    }

    fn insert(&mut self, record: TableRecord) {
        debug_assert!(!self.slots.contains_key(&record.table));
        self.slots.insert(
            record.table,
            Slot {
                active: false,
                pos: self.empty.len() as u32,
            },
        );
        self.empty.push(record);
    }

    /// Detach the record of `table` from whichever list holds it.
    fn take(&mut self, table: TableId) -> Option<TableRecord> {
        let slot = self.slots.remove(&table)?;
        let list = if slot.active {
            &mut self.active
        } else {
            &mut self.empty
        };
        let record = list.swap_remove(slot.pos as usize);
        if let Some(moved) = list.get(slot.pos as usize)
            && let Some(moved_slot) = self.slots.get_mut(&moved.table)
        {
            moved_slot.pos = slot.pos;
        }
        Some(record)
    }

    fn set_active(&mut self, table: TableId, active: bool) {
        match self.slots.get(&table) {
            Some(slot) if slot.active != active => {}
            _ => return,
        }
        let Some(record) = self.take(table) else {
            return;
        };
        let list = if active {
            &mut self.active
        } else {
            &mut self.empty
        };
        self.slots.insert(
            table,
            Slot {
                active,
                pos: list.len() as u32,
            },
        );
        list.push(record);
    }
}

/// All id records of a world.
#[derive(Debug, Default)]
pub struct IdRecords {
    records: FxHashMap<Id, IdRecord>,
}

impl IdRecords {
    #[must_use]
    pub fn get(&self, id: Id) -> Option<&IdRecord> {
        self.records.get(&id)
    }

    pub fn get_or_create(&mut self, id: Id) -> &mut IdRecord {
        self.records.entry(id).or_insert_with(|| {
            trace!(%id, "created id record");
            IdRecord::new(id)
        })
    }

    /// Drop a record. Only valid once no table references it.
    pub(crate) fn remove(&mut self, id: Id) -> Option<IdRecord> {
        let record = self.records.remove(&id)?;
        debug_assert_eq!(record.table_count(), 0, "removing id record still in use");
        Some(record)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &IdRecord> {
        self.records.values()
    }

    /// Register a new, empty table with the records of every id in its type
    /// and of the wildcard patterns those ids match.
    pub(crate) fn register_table(&mut self, table: &mut Table) {
        let mut keys: SmallVec<[TableRecord; 16]> = SmallVec::new();
        let mut ids: SmallVec<[Id; 16]> = SmallVec::new();

        for (index, &id) in table.ty().iter().enumerate() {
            for key in match_keys(id) {
                if let Some(pos) = ids.iter().position(|k| *k == key) {
                    keys[pos].count += 1;
                } else {
                    ids.push(key);
                    keys.push(TableRecord {
                        table: table.id(),
                        index: index as u16,
                        count: 1,
                        column: table.column_index(index).map(|c| c as u16),
                    });
                }
            }
        }

        for (&key, &record) in ids.iter().zip(&keys) {
            self.get_or_create(key).insert(record);
        }
        table.records = ids.into_iter().collect();
    }

    /// Remove a table from every record it was registered with.
    pub(crate) fn unregister_table(&mut self, table: &Table) {
        for key in &table.records {
            if let Some(record) = self.records.get_mut(key) {
                record.take(table.id());
            }
        }
    }

    /// Move a table between the active and empty lists of all its records.
    pub(crate) fn set_table_active(&mut self, table: &Table, active: bool) {
        for key in &table.records {
            if let Some(record) = self.records.get_mut(key) {
                record.set_active(table.id(), active);
            }
        }
    }
}

/// The record keys a concrete id is registered under.
fn match_keys(id: Id) -> SmallVec<[Id; 4]> {
    match id {
        Id::Entity(_) => SmallVec::from_slice(&[id, Id::WILDCARD]),
        Id::Pair { relation, target } => SmallVec::from_slice(&[
            id,
            Id::pair(relation, Entity::WILDCARD),
            Id::pair(Entity::WILDCARD, target),
            Id::pair(Entity::WILDCARD, Entity::WILDCARD),
        ]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::ComponentRegistry;

    fn table(id: u32, ty: &[Id]) -> Table {
        Table::new(
            TableId::from_raw(id),
            ty.iter().copied().collect(),
            &ComponentRegistry::new(),
            0,
        )
    }

    #[test]
    fn test_register_creates_wildcard_records() {
        let rel = Entity::new(10, 0);
        let tgt = Entity::new(11, 0);
        let tag = Id::from(Entity::new(12, 0));
        let pair = Id::pair(rel, tgt);

        let mut records = IdRecords::default();
        let mut t = table(1, &[tag, pair]);
        records.register_table(&mut t);

        for key in [
            tag,
            Id::WILDCARD,
            pair,
            Id::pair(rel, Entity::WILDCARD),
            Id::pair(Entity::WILDCARD, tgt),
            Id::pair(Entity::WILDCARD, Entity::WILDCARD),
        ] {
            let record = records.get(key).unwrap();
            assert_eq!(record.table_count(), 1, "{key}");
            assert!(record.tables().is_empty(), "new tables start empty");
        }
        assert_eq!(t.records.len(), 6);
    }

    #[test]
    fn test_wildcard_record_counts_matches() {
        let rel = Entity::new(10, 0);
        let a = Id::pair(rel, Entity::new(20, 0));
        let b = Id::pair(rel, Entity::new(21, 0));

        let mut records = IdRecords::default();
        let mut t = table(1, &[a, b]);
        records.register_table(&mut t);

        let wildcard = records.get(Id::pair(rel, Entity::WILDCARD)).unwrap();
        let tr = wildcard.table_record(t.id()).unwrap();
        assert_eq!(tr.index, 0);
        assert_eq!(tr.count, 2);

        let exact = records.get(b).unwrap().table_record(t.id()).unwrap();
        assert_eq!(exact.index, 1);
        assert_eq!(exact.count, 1);
    }

    #[test]
    fn test_active_empty_lists() {
        let tag = Id::from(Entity::new(12, 0));
        let mut records = IdRecords::default();
        let mut t1 = table(1, &[tag]);
        let mut t2 = table(2, &[tag]);
        records.register_table(&mut t1);
        records.register_table(&mut t2);

        records.set_table_active(&t1, true);
        let record = records.get(tag).unwrap();
        assert_eq!(record.tables().len(), 1);
        assert_eq!(record.tables()[0].table, t1.id());
        assert_eq!(record.empty_tables().len(), 1);
        assert_eq!(record.each_table(true).count(), 2);

        records.set_table_active(&t2, true);
        records.set_table_active(&t1, false);
        let record = records.get(tag).unwrap();
        assert_eq!(record.tables()[0].table, t2.id());
        assert_eq!(record.table_record(t1.id()).unwrap().table, t1.id());
        assert_eq!(record.table_record(t2.id()).unwrap().table, t2.id());

        records.unregister_table(&t1);
        let record = records.get(tag).unwrap();
        assert!(record.table_record(t1.id()).is_none());
        assert_eq!(record.table_count(), 1);
    }

    #[test]
    fn test_swap_remove_keeps_positions() {
        let tag = Id::from(Entity::new(12, 0));
        let mut records = IdRecords::default();
        let mut tables: Vec<Table> = (1..=4).map(|i| table(i, &[tag])).collect();
        for t in &mut tables {
            records.register_table(t);
            records.set_table_active(t, true);
        }

        records.set_table_active(&tables[0], false);
        let record = records.get(tag).unwrap();
        for t in &tables {
            assert_eq!(record.table_record(t.id()).unwrap().table, t.id());
        }
    }
}
