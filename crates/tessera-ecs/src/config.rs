//! World configuration.

/// Settings applied when a world is created.
///
/// ```
/// use tessera_ecs::{World, WorldConfig};
///
/// let world = World::with_config(WorldConfig::default().with_stage_count(4));
/// assert_eq!(world.stage_count(), 4);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorldConfig {
    /// Number of entities to reserve space for in the entity index.
    pub entity_capacity: usize,
    /// Number of deferred command stages. At least one.
    pub stage_count: usize,
    /// Initial row capacity of newly created tables.
    pub table_capacity: usize,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            entity_capacity: 0,
            stage_count: 1,
            table_capacity: 0,
        }
    }
}

impl WorldConfig {
    #[must_use]
    pub const fn with_entity_capacity(mut self, capacity: usize) -> Self {
        self.entity_capacity = capacity;
        self
    }

    /// Values below one are raised to one.
    #[must_use]
    pub const fn with_stage_count(mut self, count: usize) -> Self {
        self.stage_count = if count == 0 { 1 } else { count };
        self
    }

    #[must_use]
    pub const fn with_table_capacity(mut self, capacity: usize) -> Self {
        self.table_capacity = capacity;
        self
    }
}
