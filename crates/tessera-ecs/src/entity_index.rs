//! Paged sparse set mapping entities to their table location.
//!
//! The sparse side is split into fixed-size pages that are allocated the
//! first time an index in their range is touched. The dense side holds every
//! entity ever created: `dense[1..alive_count]` are alive, the rest are
//! recycled slots waiting to be handed out again with a bumped generation.

use crate::{
    error::{EcsError, EcsResult},
    id::Entity,
    table::TableId,
};

const PAGE_BITS: u32 = 12;
const PAGE_SIZE: usize = 1 << PAGE_BITS;
const PAGE_MASK: u32 = (1 << PAGE_BITS) - 1;

/// Location of an entity within the table storage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Record {
    /// The table containing this entity.
    pub table: TableId,
    /// Row index within the table.
    pub row: u32,
}

#[derive(Clone, Copy, Default)]
struct Slot {
    /// Position in `dense`. 0 means the slot was never used.
    dense: u32,
    record: Record,
}

/// Sparse set of entity records with generation tracking.
pub struct EntityIndex {
    pages: Vec<Option<Box<[Slot]>>>,
    /// `dense[0]` is a placeholder so that `Slot::dense == 0` means empty.
    dense: Vec<Entity>,
    alive_count: usize,
    max_index: u32,
}

impl Default for EntityIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityIndex {
    #[must_use]
    pub fn new() -> Self {
        Self {
            pages: Vec::new(),
            dense: vec![Entity::NULL],
            alive_count: 1,
            max_index: 0,
        }
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let mut dense = Vec::with_capacity(capacity + 1);
        dense.push(Entity::NULL);
        Self {
            pages: Vec::with_capacity(capacity.div_ceil(PAGE_SIZE)),
            dense,
            alive_count: 1,
            max_index: 0,
        }
    }

    fn slot(&self, index: u32) -> Option<&Slot> {
        let page = self.pages.get((index >> PAGE_BITS) as usize)?.as_ref()?;
        Some(&page[(index & PAGE_MASK) as usize])
    }

    fn slot_mut(&mut self, index: u32) -> Option<&mut Slot> {
        let page = self.pages.get_mut((index >> PAGE_BITS) as usize)?.as_mut()?;
        Some(&mut page[(index & PAGE_MASK) as usize])
    }

    fn ensure_slot(&mut self, index: u32) -> &mut Slot {
        let page_index = (index >> PAGE_BITS) as usize;
        if page_index >= self.pages.len() {
            self.pages.resize_with(page_index + 1, || None);
        }
        let page = self.pages[page_index]
            .get_or_insert_with(|| vec![Slot::default(); PAGE_SIZE].into_boxed_slice());
        &mut page[(index & PAGE_MASK) as usize]
    }

    /// Dense position of `entity` if it is alive with a matching generation.
    fn alive_dense(&self, entity: Entity) -> Option<usize> {
        let dense = self.slot(entity.index())?.dense as usize;
        (dense != 0 && dense < self.alive_count && self.dense[dense] == entity).then_some(dense)
    }

    /// Swap two dense positions, keeping the sparse side pointing at them.
    fn swap_dense(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        self.dense.swap(a, b);
        let (ea, eb) = (self.dense[a], self.dense[b]);
        if let Some(slot) = self.slot_mut(ea.index()) {
            slot.dense = a as u32;
        }
        if let Some(slot) = self.slot_mut(eb.index()) {
            slot.dense = b as u32;
        }
    }

    /// Get the record of `entity`, making it alive if needed.
    ///
    /// Fails with `StaleReference` if the slot exists with another generation.
    pub fn ensure(&mut self, entity: Entity) -> EcsResult<&mut Record> {
        if entity.is_null() {
            return Err(EcsError::InvalidId("null entity".to_string()));
        }

        let index = entity.index();
        let dense = self.ensure_slot(index).dense as usize;

        if dense == 0 {
            self.dense.push(entity);
            let pos = self.dense.len() - 1;
            self.ensure_slot(index).dense = pos as u32;
            let alive = self.alive_count;
            self.swap_dense(pos, alive);
            self.alive_count += 1;
            self.max_index = self.max_index.max(index);
        } else {
            if self.dense[dense] != entity {
                return Err(EcsError::StaleReference(entity));
            }
            if dense >= self.alive_count {
                let alive = self.alive_count;
                self.swap_dense(dense, alive);
                self.alive_count += 1;
            }
        }

        Ok(&mut self.ensure_slot(index).record)
    }

    /// Get the record of a live entity.
    #[must_use]
    pub fn try_get(&self, entity: Entity) -> Option<&Record> {
        self.alive_dense(entity)?;
        self.slot(entity.index()).map(|slot| &slot.record)
    }

    /// Get the record of a live entity for mutation.
    pub fn get_mut(&mut self, entity: Entity) -> Option<&mut Record> {
        self.alive_dense(entity)?;
        self.slot_mut(entity.index()).map(|slot| &mut slot.record)
    }

    /// Remove a live entity, recycling its index with the next generation.
    ///
    /// Returns `false` if the entity was not alive.
    pub fn remove(&mut self, entity: Entity) -> bool {
        let Some(dense) = self.alive_dense(entity) else {
            return false;
        };

        let last = self.alive_count - 1;
        self.swap_dense(dense, last);
        self.alive_count -= 1;
        self.dense[last] = entity.next_generation();
        if let Some(slot) = self.slot_mut(entity.index()) {
            slot.record = Record::default();
        }
        true
    }

    /// Allocate a new entity id, recycling a removed index if one is available.
    pub fn new_id(&mut self) -> Entity {
        if self.alive_count < self.dense.len() {
            let entity = self.dense[self.alive_count];
            self.alive_count += 1;
            return entity;
        }

        let mut index = self.max_index + 1;
        while self.slot(index).is_some_and(|slot| slot.dense != 0) {
            index += 1;
        }
        self.max_index = index;

        let entity = Entity::new(index, 0);
        self.dense.push(entity);
        let pos = self.dense.len() - 1;
        self.ensure_slot(index).dense = pos as u32;
        self.alive_count += 1;
        entity
    }

    /// Allocate `count` ids at once.
    pub fn new_ids(&mut self, count: usize) -> Vec<Entity> {
        self.dense.reserve(count.saturating_sub(self.dense.len() - self.alive_count));
        (0..count).map(|_| self.new_id()).collect()
    }

    #[must_use]
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.alive_dense(entity).is_some()
    }

    /// Get the live entity for an index, whatever generation `entity` carries.
    ///
    /// Used to repair ids that were stored without generation, such as pair
    /// targets.
    #[must_use]
    pub fn get_alive(&self, entity: Entity) -> Option<Entity> {
        let dense = self.slot(entity.index())?.dense as usize;
        (dense != 0 && dense < self.alive_count).then(|| self.dense[dense])
    }

    /// Check whether the index was ever handed out.
    #[must_use]
    pub fn exists(&self, entity: Entity) -> bool {
        self.slot(entity.index()).is_some_and(|slot| slot.dense != 0)
    }

    /// Number of live entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.alive_count - 1
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate live entities.
    pub fn iter(&self) -> impl Iterator<Item = Entity> + '_ {
        self.dense[1..self.alive_count].iter().copied()
    }
}
