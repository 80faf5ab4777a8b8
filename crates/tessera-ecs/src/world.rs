//! World - the main container for all ECS data.
//!
//! The world owns the [`Store`] (tables, id records, entity index), entity
//! names and the deferred command stages. Structural changes made through
//! `&mut World` apply immediately unless the world is deferring; changes
//! made through a [`StageRef`] are always queued until [`World::merge`].

use std::collections::BTreeMap;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tessera_dsl::{Ident, parse_query};
use tracing::debug;

use crate::{
    component::Component,
    config::WorldConfig,
    entity_index::Record,
    error::{EcsError, EcsResult},
    graph::{TableDiff, validate_id},
    id::{Entity, Id},
    id_record::IdRecord,
    relation::{RelationInfo, RelationTraits},
    rule::{Rule, Term, TermRef},
    stage::{Stage, StageRef},
    store::Store,
    table::{Table, TableId},
};

/// The ECS world.
pub struct World {
    pub(crate) store: Store,
    names: BTreeMap<String, Entity>,
    /// Reverse index: entity index -> name (for cleanup on delete).
    entity_names: FxHashMap<u32, String>,
    pub(crate) stages: Vec<Mutex<Stage>>,
    defer_depth: u32,
    readonly: bool,
    config: WorldConfig,
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(WorldConfig::default())
    }

    /// Create a world and its builtin entities.
    #[must_use]
    pub fn with_config(config: WorldConfig) -> Self {
        let stage_count = config.stage_count.max(1);
        let mut world = Self {
            store: Store::new(&config),
            names: BTreeMap::new(),
            entity_names: FxHashMap::default(),
            stages: (0..stage_count).map(|i| Mutex::new(Stage::new(i))).collect(),
            defer_depth: 0,
            readonly: false,
            config,
        };

        for builtin in [Entity::WORLD, Entity::WILDCARD, Entity::ANY, Entity::CHILD_OF] {
            let entity = world.store.new_entity();
            debug_assert_eq!(entity, builtin);
        }
        world.insert_name("World", Entity::WORLD);
        world.insert_name("ChildOf", Entity::CHILD_OF);

        world
    }

    #[must_use]
    pub const fn config(&self) -> &WorldConfig {
        &self.config
    }

    // ==================== Entity Operations ====================

    /// Create a new empty entity.
    pub fn entity(&mut self) -> Entity {
        self.store.new_entity()
    }

    /// Make a specific entity id alive.
    ///
    /// Fails with `StaleReference` if the index is alive with another
    /// generation.
    pub fn make_alive(&mut self, entity: Entity) -> EcsResult<()> {
        self.store.ensure_entity(entity)
    }

    #[must_use]
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.store.entity_index.is_alive(entity)
    }

    /// The live entity with the same index, whatever generation `entity` has.
    #[must_use]
    pub fn get_alive(&self, entity: Entity) -> Option<Entity> {
        self.store.entity_index.get_alive(entity)
    }

    /// Delete an entity and remove it from every id that refers to it.
    ///
    /// Children via `ChildOf` are deleted along with it.
    pub fn delete(&mut self, entity: Entity) -> EcsResult<()> {
        if entity.is_builtin() {
            return Err(EcsError::InvalidId(format!("cannot delete builtin {entity}")));
        }
        self.check_alive(entity)?;
        if let Some(stage) = self.deferred_stage()? {
            stage.delete(entity);
            return Ok(());
        }
        for deleted in self.store.delete_with_cleanup(entity)? {
            self.forget_name(deleted);
        }
        Ok(())
    }

    /// Remove all ids from an entity, moving it back to the root table.
    pub fn clear(&mut self, entity: Entity) -> EcsResult<()> {
        self.check_alive(entity)?;
        match self.deferred_stage()? {
            Some(stage) => {
                stage.clear(entity);
                Ok(())
            }
            None => self.store.clear(entity),
        }
    }

    fn check_alive(&self, entity: Entity) -> EcsResult<()> {
        if self.is_alive(entity) {
            Ok(())
        } else {
            Err(EcsError::StaleReference(entity))
        }
    }

    // ==================== Named Entity Operations ====================

    /// Get or create an entity by name.
    pub fn entity_named(&mut self, name: &str) -> Entity {
        if let Some(entity) = self.lookup(name) {
            return entity;
        }
        let entity = self.entity();
        self.insert_name(name, entity);
        entity
    }

    /// Lookup an entity by name without creating it.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<Entity> {
        let &entity = self.names.get(name)?;
        self.is_alive(entity).then_some(entity)
    }

    #[must_use]
    pub fn name(&self, entity: Entity) -> Option<&str> {
        if !self.is_alive(entity) {
            return None;
        }
        self.entity_names.get(&entity.index()).map(String::as_str)
    }

    /// Set or replace the name of an entity.
    ///
    /// Fails with `InvalidId` if another live entity already has the name.
    pub fn set_name(&mut self, entity: Entity, name: &str) -> EcsResult<()> {
        self.check_alive(entity)?;
        match self.lookup(name) {
            Some(owner) if owner == entity => return Ok(()),
            Some(owner) => {
                return Err(EcsError::InvalidId(format!(
                    "name '{name}' already belongs to {owner}"
                )));
            }
            None => {}
        }
        self.forget_name(entity);
        self.insert_name(name, entity);
        Ok(())
    }

    fn insert_name(&mut self, name: &str, entity: Entity) {
        self.names.insert(name.to_string(), entity);
        self.entity_names.insert(entity.index(), name.to_string());
    }

    fn forget_name(&mut self, entity: Entity) {
        if let Some(name) = self.entity_names.remove(&entity.index()) {
            self.names.remove(&name);
        }
    }

    // ==================== Component Operations ====================

    /// Register `T` as a component, returning its entity.
    ///
    /// The entity is named after the type unless the name is taken.
    pub fn component<T: Component>(&mut self) -> Entity {
        if let Some(entity) = self.component_id::<T>() {
            return entity;
        }
        let entity = self.entity();
        self.store.components.register::<T>(entity);

        let name = short_type_name::<T>();
        if self.lookup(name).is_none() {
            self.insert_name(name, entity);
        }
        debug!(?entity, name = std::any::type_name::<T>(), "registered component");
        entity
    }

    /// The entity registered for `T`, if any.
    #[must_use]
    pub fn component_id<T: Component>(&self) -> Option<Entity> {
        self.store
            .components
            .get::<T>()
            .filter(|&entity| self.is_alive(entity))
    }

    /// Set the value of component `T`, adding it if needed.
    pub fn set<T: Component>(&mut self, entity: Entity, value: T) -> EcsResult<()> {
        let component = self.component::<T>();
        self.set_id(entity, Id::from(component), value)
    }

    /// Set the value stored under `id`, which must carry data of type `T`.
    pub fn set_id<T: Component>(&mut self, entity: Entity, id: Id, value: T) -> EcsResult<()> {
        self.check_alive(entity)?;
        self.store.check_data_type::<T>(id)?;
        match self.deferred_stage()? {
            Some(stage) => {
                stage.set(entity, id, value);
                Ok(())
            }
            None => self.store.set(entity, id, value),
        }
    }

    /// Set the value of a pair. The pair takes the relation's type if the
    /// relation is a component, otherwise the target's.
    pub fn set_pair<T: Component>(
        &mut self,
        entity: Entity,
        relation: Entity,
        target: Entity,
        value: T,
    ) -> EcsResult<()> {
        self.set_id(entity, Id::pair(relation, target), value)
    }

    #[must_use]
    pub fn get<T: Component>(&self, entity: Entity) -> Option<&T> {
        self.get_id(entity, Id::from(self.component_id::<T>()?))
    }

    #[must_use]
    pub fn get_id<T: Component>(&self, entity: Entity, id: Id) -> Option<&T> {
        self.store.get::<T>(entity, id)
    }

    pub fn get_mut<T: Component>(&mut self, entity: Entity) -> Option<&mut T> {
        let id = Id::from(self.component_id::<T>()?);
        self.store.get_mut::<T>(entity, id)
    }

    #[must_use]
    pub fn has<T: Component>(&self, entity: Entity) -> bool {
        self.component_id::<T>()
            .is_some_and(|component| self.has_id(entity, component))
    }

    // ==================== Id Operations ====================

    /// Add an id (tag, component or pair) to an entity.
    pub fn add_id(&mut self, entity: Entity, id: impl Into<Id>) -> EcsResult<()> {
        let id = id.into();
        validate_id(id)?;
        self.check_alive(entity)?;
        match self.deferred_stage()? {
            Some(stage) => {
                stage.add(entity, id);
                Ok(())
            }
            None => self.store.add_id(entity, id),
        }
    }

    pub fn remove_id(&mut self, entity: Entity, id: impl Into<Id>) -> EcsResult<()> {
        let id = id.into();
        validate_id(id)?;
        self.check_alive(entity)?;
        match self.deferred_stage()? {
            Some(stage) => {
                stage.remove(entity, id);
                Ok(())
            }
            None => self.store.remove_id(entity, id),
        }
    }

    /// Check whether an entity has an id. Wildcard ids match any id.
    #[must_use]
    pub fn has_id(&self, entity: Entity, id: impl Into<Id>) -> bool {
        self.store.has_id(entity, id.into())
    }

    pub fn add_pair(&mut self, entity: Entity, relation: Entity, target: Entity) -> EcsResult<()> {
        self.add_id(entity, Id::pair(relation, target))
    }

    pub fn remove_pair(
        &mut self,
        entity: Entity,
        relation: Entity,
        target: Entity,
    ) -> EcsResult<()> {
        self.remove_id(entity, Id::pair(relation, target))
    }

    #[must_use]
    pub fn has_pair(&self, entity: Entity, relation: Entity, target: Entity) -> bool {
        self.has_id(entity, Id::pair(relation, target))
    }

    /// First target of `relation` on `entity`.
    #[must_use]
    pub fn target(&self, entity: Entity, relation: Entity) -> Option<Entity> {
        let table = self.table_of(entity)?;
        let index = table.find_match(Id::pair(relation, Entity::WILDCARD), 0)?;
        let target = table.ty()[index].second()?;
        self.get_alive(target)
    }

    // ==================== Relations ====================

    /// Replace the traits of a relation.
    pub fn set_traits(&mut self, relation: Entity, traits: RelationTraits) -> EcsResult<()> {
        self.check_alive(relation)?;
        let info = self.store.relation(relation);
        self.store
            .relations
            .insert(relation.index(), RelationInfo { traits, ..info });
        Ok(())
    }

    /// Require targets of `relation` to be children of `scope`.
    pub fn set_one_of(&mut self, relation: Entity, scope: Entity) -> EcsResult<()> {
        self.check_alive(relation)?;
        self.check_alive(scope)?;
        let info = self.store.relation(relation);
        self.store.relations.insert(
            relation.index(),
            RelationInfo {
                traits: info.traits | RelationTraits::ONE_OF,
                one_of: Some(scope),
            },
        );
        Ok(())
    }

    #[must_use]
    pub fn relation_info(&self, relation: Entity) -> RelationInfo {
        self.store.relation(relation)
    }

    // ==================== Deferred Operations ====================

    /// Queue target for `&mut World` mutations, if deferring.
    fn deferred_stage(&mut self) -> EcsResult<Option<&mut Stage>> {
        if self.defer_depth > 0 {
            return Ok(Some(self.stages[0].get_mut()));
        }
        if self.readonly {
            return Err(EcsError::ReadonlyViolation);
        }
        Ok(None)
    }

    /// Start queueing mutations. Calls nest.
    pub fn defer_begin(&mut self) {
        self.defer_depth += 1;
    }

    /// End a `defer_begin`. The outermost call merges all stages and returns
    /// the number of commands applied.
    pub fn defer_end(&mut self) -> usize {
        match self.defer_depth {
            0 => 0,
            1 => {
                self.defer_depth = 0;
                self.merge()
            }
            _ => {
                self.defer_depth -= 1;
                0
            }
        }
    }

    #[must_use]
    pub const fn is_deferred(&self) -> bool {
        self.defer_depth > 0
    }

    /// Enter readonly mode. Mutations through `&mut World` fail unless
    /// deferred; stages keep queueing.
    pub fn readonly_begin(&mut self) {
        self.readonly = true;
    }

    /// Leave readonly mode and merge all stages.
    pub fn readonly_end(&mut self) -> usize {
        self.readonly = false;
        self.merge()
    }

    #[must_use]
    pub const fn is_readonly(&self) -> bool {
        self.readonly
    }

    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Handle to a stage for queueing commands through `&World`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= stage_count()`.
    #[must_use]
    pub fn stage(&self, index: usize) -> StageRef<'_> {
        assert!(index < self.stages.len(), "stage {index} out of range");
        StageRef::new(self, index)
    }

    /// Apply queued commands of all stages, in stage order. Returns the
    /// number of commands applied.
    pub fn merge(&mut self) -> usize {
        let mut deleted = Vec::new();
        let mut applied = 0;
        for stage in &mut self.stages {
            applied += stage.get_mut().flush(&mut self.store, &mut deleted);
        }
        for entity in deleted {
            self.forget_name(entity);
        }
        debug!(applied, stages = self.stages.len(), "merged stages");
        applied
    }

    // ==================== Queries ====================

    /// Compile a rule from the query DSL, resolving names to entities.
    pub fn query(&self, expr: &str) -> EcsResult<Rule> {
        let query = parse_query(expr)?;
        let resolve = |ident: &Ident| -> EcsResult<TermRef> {
            Ok(match ident {
                Ident::Name(name) => TermRef::Entity(
                    self.lookup(name)
                        .ok_or_else(|| EcsError::Query(format!("unknown entity '{name}'")))?,
                ),
                Ident::Var(name) => TermRef::Var(name.clone()),
                Ident::Wildcard => TermRef::Wildcard,
                Ident::Any => TermRef::Any,
            })
        };

        let terms = query
            .terms
            .iter()
            .map(|term| {
                Ok(Term {
                    oper: term.operator,
                    first: resolve(&term.predicate)?,
                    src: resolve(&term.source)?,
                    second: term.target.as_ref().map(resolve).transpose()?,
                })
            })
            .collect::<EcsResult<Vec<_>>>()?;

        self.rule(&terms)
    }

    /// Compile a rule from terms.
    pub fn rule(&self, terms: &[Term]) -> EcsResult<Rule> {
        Rule::compile(&self.store, terms)
    }

    // ==================== Introspection ====================

    #[must_use]
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Number of live entities, builtins included.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.store.entity_index.len()
    }

    #[must_use]
    pub fn table_count(&self) -> usize {
        self.store.table_count()
    }

    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.store.tables()
    }

    /// The table currently holding `entity`.
    #[must_use]
    pub fn table_of(&self, entity: Entity) -> Option<&Table> {
        self.store.table(self.record(entity)?.table)
    }

    #[must_use]
    pub fn record(&self, entity: Entity) -> Option<Record> {
        self.store.record(entity)
    }

    #[must_use]
    pub fn id_record(&self, id: impl Into<Id>) -> Option<&IdRecord> {
        self.store.id_records.get(id.into())
    }

    /// Table reached by adding `id` to `table`, created on first use.
    pub fn traverse_add(&mut self, table: TableId, id: Id) -> EcsResult<(TableId, TableDiff)> {
        self.store.traverse_add(table, id)
    }

    /// Table reached by removing `id` from `table`.
    pub fn traverse_remove(&mut self, table: TableId, id: Id) -> EcsResult<(TableId, TableDiff)> {
        self.store.traverse_remove(table, id)
    }

    /// Delete all empty tables except the root. Returns how many were deleted.
    pub fn delete_empty_tables(&mut self) -> usize {
        self.store.delete_empty_tables()
    }
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("entities", &self.entity_count())
            .field("tables", &self.table_count())
            .field("stages", &self.stages.len())
            .finish()
    }
}

/// `a::b::Foo<c::Bar>` -> `Foo`
fn short_type_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}
