//! Stages - deferred command queues.
//!
//! A stage records structural changes instead of applying them. Commands
//! for the same entity form a chain in submission order; redundant commands
//! are coalesced as they are queued. Values passed to `set` are moved into a
//! per-stage bump arena until the stage is merged.

use std::ptr::NonNull;

use bumpalo::Bump;
use hashbrown::HashMap;
use rustc_hash::FxBuildHasher;
use smallvec::SmallVec;
use tracing::{trace, warn};

use crate::{
    component::{Component, ComponentInfo},
    error::{EcsError, EcsResult},
    id::{Entity, Id},
    store::Store,
    world::World,
};

/// A queued structural change.
pub(crate) enum Command {
    Add(Id),
    Remove(Id),
    Set {
        id: Id,
        value: NonNull<u8>,
        info: ComponentInfo,
    },
    Clear,
    Delete,
}

impl Command {
    const fn id(&self) -> Option<Id> {
        match self {
            Self::Add(id) | Self::Remove(id) | Self::Set { id, .. } => Some(*id),
            Self::Clear | Self::Delete => None,
        }
    }
}

struct Entry {
    entity: Entity,
    command: Command,
    alive: bool,
}

/// Deferred command queue.
pub struct Stage {
    index: usize,
    entries: Vec<Entry>,
    /// Entry positions per entity, in submission order.
    chains: HashMap<Entity, SmallVec<[u32; 4]>, FxBuildHasher>,
    values: Bump,
}

// SAFETY: `Set` values are owned by the stage's arena and are only touched
// by whoever holds the stage; component types are `Send`.
unsafe impl Send for Stage {}

impl Stage {
    pub(crate) fn new(index: usize) -> Self {
        Self {
            index,
            entries: Vec::new(),
            chains: HashMap::default(),
            values: Bump::new(),
        }
    }

    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Number of queued commands that will be applied on merge.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|entry| entry.alive).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Latest live command of `entity` that decides the fate of `id`.
    fn last_relevant(&self, entity: Entity, id: Option<Id>) -> Option<&Command> {
        let chain = self.chains.get(&entity)?;
        chain.iter().rev().find_map(|&pos| {
            let entry = &self.entries[pos as usize];
            let relevant = entry.alive
                && match entry.command.id() {
                    None => true,
                    Some(other) => id == Some(other),
                };
            relevant.then_some(&entry.command)
        })
    }

    /// Kill earlier live commands of `entity` selected by `filter`.
    fn kill(&mut self, entity: Entity, filter: impl Fn(&Command) -> bool) {
        let Some(chain) = self.chains.get(&entity) else {
            return;
        };
        for &pos in chain {
            let entry = &mut self.entries[pos as usize];
            if entry.alive && filter(&entry.command) {
                entry.alive = false;
                drop_value(&entry.command);
                trace!(stage = self.index, ?entity, "coalesced command");
            }
        }
    }

    fn push(&mut self, entity: Entity, command: Command) {
        let id = command.id();
        let last = self.last_relevant(entity, id);

        match &command {
            Command::Add(_) => {
                if matches!(last, Some(Command::Add(_) | Command::Set { .. })) {
                    trace!(stage = self.index, ?entity, "dropped redundant add");
                    return;
                }
            }
            Command::Remove(_) => {
                if matches!(last, Some(Command::Remove(_))) {
                    trace!(stage = self.index, ?entity, "dropped redundant remove");
                    return;
                }
                self.kill(entity, |c| {
                    matches!(c, Command::Add(_) | Command::Set { .. }) && c.id() == id
                });
            }
            Command::Set { .. } => {
                self.kill(entity, |c| matches!(c, Command::Set { .. }) && c.id() == id);
            }
            Command::Clear => {
                self.kill(entity, |c| c.id().is_some());
            }
            Command::Delete => {
                if matches!(last, Some(Command::Delete)) {
                    return;
                }
                self.kill(entity, |_| true);
            }
        }

        let pos = self.entries.len() as u32;
        self.entries.push(Entry {
            entity,
            command,
            alive: true,
        });
        self.chains.entry(entity).or_default().push(pos);
    }

    pub(crate) fn add(&mut self, entity: Entity, id: Id) {
        self.push(entity, Command::Add(id));
    }

    pub(crate) fn remove(&mut self, entity: Entity, id: Id) {
        self.push(entity, Command::Remove(id));
    }

    pub(crate) fn set<T: Component>(&mut self, entity: Entity, id: Id, value: T) {
        let info = ComponentInfo::of::<T>();
        let value = NonNull::from(self.values.alloc(value)).cast::<u8>();
        self.push(entity, Command::Set { id, value, info });
    }

    pub(crate) fn clear(&mut self, entity: Entity) {
        self.push(entity, Command::Clear);
    }

    pub(crate) fn delete(&mut self, entity: Entity) {
        self.push(entity, Command::Delete);
    }

    /// Apply all live commands to `store` in submission order.
    ///
    /// Commands that fail are logged and skipped. Deleted entities are
    /// appended to `deleted`. Returns the number of commands applied.
    pub(crate) fn flush(&mut self, store: &mut Store, deleted: &mut Vec<Entity>) -> usize {
        let mut applied = 0;
        for entry in &mut self.entries {
            if !entry.alive {
                continue;
            }
            entry.alive = false;
            let entity = entry.entity;

            let result = match &entry.command {
                Command::Add(id) => store.add_id(entity, *id),
                Command::Remove(id) => store.remove_id(entity, *id),
                Command::Set { id, value, info } => {
                    // SAFETY: the value was written by `Stage::set` with the
                    // type described by `info`, which was checked against `id`
                    match unsafe { store.set_raw(entity, *id, value.as_ptr()) } {
                        Ok(true) => Ok(()),
                        Ok(false) => {
                            // SAFETY: ownership did not move into a table
                            unsafe { info.drop_in_place(value.as_ptr()) };
                            Ok(())
                        }
                        Err(err) => {
                            // SAFETY: as above
                            unsafe { info.drop_in_place(value.as_ptr()) };
                            Err(err)
                        }
                    }
                }
                Command::Clear => store.clear(entity),
                Command::Delete => store
                    .delete_with_cleanup(entity)
                    .map(|removed| deleted.extend(removed)),
            };

            match result {
                Ok(()) => applied += 1,
                Err(err) => warn!(stage = self.index, ?entity, %err, "deferred command failed"),
            }
        }

        self.entries.clear();
        self.chains.clear();
        self.values.reset();
        applied
    }
}

fn drop_value(command: &Command) {
    if let Command::Set { value, info, .. } = command {
        // SAFETY: live `Set` entries own an initialized value
        unsafe { info.drop_in_place(value.as_ptr()) };
    }
}

impl Drop for Stage {
    fn drop(&mut self) {
        for entry in &self.entries {
            if entry.alive {
                drop_value(&entry.command);
            }
        }
    }
}

impl std::fmt::Debug for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stage")
            .field("index", &self.index)
            .field("commands", &self.len())
            .finish()
    }
}

/// Shared handle to one stage of a world.
///
/// Obtained from [`World::stage`]. All operations are queued and take effect
/// at the next [`World::merge`].
#[derive(Clone, Copy)]
pub struct StageRef<'w> {
    world: &'w World,
    index: usize,
}

impl<'w> StageRef<'w> {
    pub(crate) const fn new(world: &'w World, index: usize) -> Self {
        Self { world, index }
    }

    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    fn with<R>(&self, f: impl FnOnce(&mut Stage) -> R) -> R {
        f(&mut self.world.stages[self.index].lock())
    }

    fn check_alive(&self, entity: Entity) -> EcsResult<()> {
        if self.world.is_alive(entity) {
            Ok(())
        } else {
            Err(EcsError::StaleReference(entity))
        }
    }

    pub fn add_id(&self, entity: Entity, id: impl Into<Id>) -> EcsResult<()> {
        self.check_alive(entity)?;
        self.with(|stage| stage.add(entity, id.into()));
        Ok(())
    }

    pub fn remove_id(&self, entity: Entity, id: impl Into<Id>) -> EcsResult<()> {
        self.check_alive(entity)?;
        self.with(|stage| stage.remove(entity, id.into()));
        Ok(())
    }

    pub fn add_pair(&self, entity: Entity, relation: Entity, target: Entity) -> EcsResult<()> {
        self.add_id(entity, Id::pair(relation, target))
    }

    pub fn remove_pair(&self, entity: Entity, relation: Entity, target: Entity) -> EcsResult<()> {
        self.remove_id(entity, Id::pair(relation, target))
    }

    /// Queue a component value. `T` must already be registered.
    pub fn set<T: Component>(&self, entity: Entity, value: T) -> EcsResult<()> {
        self.check_alive(entity)?;
        let component = self.world.component_id::<T>().ok_or_else(|| {
            EcsError::InvalidId(format!(
                "{} is not registered as a component",
                std::any::type_name::<T>()
            ))
        })?;
        let id = Id::from(component);
        self.world.store.check_data_type::<T>(id)?;
        self.with(|stage| stage.set(entity, id, value));
        Ok(())
    }

    pub fn clear(&self, entity: Entity) -> EcsResult<()> {
        self.check_alive(entity)?;
        self.with(|stage| stage.clear(entity));
        Ok(())
    }

    pub fn delete(&self, entity: Entity) -> EcsResult<()> {
        self.check_alive(entity)?;
        self.with(|stage| stage.delete(entity));
        Ok(())
    }

    /// Number of commands waiting in this stage.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.with(|stage| stage.len())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    fn id(index: u32) -> Id {
        Id::from(Entity::new(index, 0))
    }

    #[test]
    fn test_add_coalesces() {
        let mut stage = Stage::new(0);
        let e = Entity::new(10, 0);
        stage.add(e, id(20));
        stage.add(e, id(20));
        stage.add(e, id(21));
        assert_eq!(stage.len(), 2);
    }

    #[test]
    fn test_remove_cancels_add() {
        let mut stage = Stage::new(0);
        let e = Entity::new(10, 0);
        stage.add(e, id(20));
        stage.remove(e, id(20));
        stage.remove(e, id(20));
        assert_eq!(stage.len(), 1);
        assert!(matches!(
            stage.entries.iter().find(|entry| entry.alive).map(|e| &e.command),
            Some(Command::Remove(_))
        ));
    }

    #[test]
    fn test_set_keeps_latest() {
        let mut stage = Stage::new(0);
        let e = Entity::new(10, 0);
        stage.set(e, id(20), 1u32);
        stage.set(e, id(20), 2u32);
        stage.add(e, id(20));
        assert_eq!(stage.len(), 1);

        let value = stage.entries.iter().find_map(|entry| match &entry.command {
            Command::Set { value, .. } if entry.alive => {
                Some(unsafe { *value.cast::<u32>().as_ptr() })
            }
            _ => None,
        });
        assert_eq!(value, Some(2));
    }

    #[test]
    fn test_delete_supersedes_chain() {
        let mut stage = Stage::new(0);
        let e = Entity::new(10, 0);
        let other = Entity::new(11, 0);
        stage.add(e, id(20));
        stage.add(other, id(20));
        stage.delete(e);
        stage.delete(e);
        assert_eq!(stage.len(), 2);
    }

    #[derive(Default)]
    struct Counted(Option<Arc<AtomicUsize>>);

    impl Drop for Counted {
        fn drop(&mut self) {
            if let Some(drops) = &self.0 {
                drops.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[test]
    fn test_dropped_values_run_drop() {
        let drops = Arc::new(AtomicUsize::new(0));
        {
            let mut stage = Stage::new(0);
            let e = Entity::new(10, 0);
            stage.set(e, id(20), Counted(Some(drops.clone())));
            stage.set(e, id(20), Counted(Some(drops.clone())));
            assert_eq!(drops.load(Ordering::SeqCst), 1);
        }
        assert_eq!(drops.load(Ordering::SeqCst), 2);
    }
}
