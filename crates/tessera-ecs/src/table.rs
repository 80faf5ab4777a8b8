//! Tables - storage for entities with identical types.
//!
//! A table is identified by its type: the sorted, deduplicated list of ids
//! its entities have. Data-carrying ids get a column; tags only appear in
//! the type. Row `i` of every column and of the entity list describe the
//! same entity.

use std::fmt;

use bitflags::bitflags;
use smallvec::SmallVec;

use crate::{
    component::ComponentRegistry,
    graph::GraphNode,
    id::{Entity, Id},
    storage::Column,
};

/// Sorted, deduplicated list of ids identifying a table.
pub type Type = SmallVec<[Id; 8]>;

/// Unique identifier for a table.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct TableId(u32);

impl TableId {
    /// The root table (empty type). Never deleted.
    pub const ROOT: Self = Self(0);

    /// Create a table ID from a raw value.
    #[must_use]
    pub const fn from_raw(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw ID value.
    #[must_use]
    pub const fn as_raw(self) -> u32 {
        self.0
    }

    pub(crate) const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TableId({})", self.0)
    }
}

bitflags! {
    /// Summary bits computed when a table is created.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TableFlags: u32 {
        /// Type contains at least one pair.
        const HAS_PAIRS = 1;
        /// Type contains a `(ChildOf, *)` pair.
        const HAS_CHILD_OF = 1 << 1;
        /// Table has at least one column.
        const HAS_DATA = 1 << 2;
    }
}

/// A table storing entities with the same type.
pub struct Table {
    id: TableId,
    ty: Type,
    /// Column index for each type index, `None` for tags.
    column_map: SmallVec<[Option<u16>; 8]>,
    columns: Vec<Column>,
    entities: Vec<Entity>,
    flags: TableFlags,
    /// Keys of the id records (including wildcards) this table is registered with.
    pub(crate) records: SmallVec<[Id; 8]>,
    pub(crate) node: GraphNode,
}

impl Table {
    /// Create a table for `ty`, which must already be sorted and deduplicated.
    pub(crate) fn new(
        id: TableId,
        ty: Type,
        registry: &ComponentRegistry,
        capacity: usize,
    ) -> Self {
        debug_assert!(ty.windows(2).all(|w| w[0] < w[1]), "unsorted type");

        let mut column_map = SmallVec::with_capacity(ty.len());
        let mut columns = Vec::new();
        let mut flags = TableFlags::empty();

        for &id in &ty {
            if let Some(info) = registry.data_info(id) {
                column_map.push(Some(columns.len() as u16));
                columns.push(Column::with_capacity(info.clone(), capacity));
            } else {
                column_map.push(None);
            }

            if id.is_pair() {
                flags |= TableFlags::HAS_PAIRS;
                if id.first() == Entity::CHILD_OF {
                    flags |= TableFlags::HAS_CHILD_OF;
                }
            }
        }

        if !columns.is_empty() {
            flags |= TableFlags::HAS_DATA;
        }

        Self {
            id,
            ty,
            column_map,
            columns,
            entities: Vec::with_capacity(capacity),
            flags,
            records: SmallVec::new(),
            node: GraphNode::default(),
        }
    }

    #[must_use]
    pub const fn id(&self) -> TableId {
        self.id
    }

    /// The ids of this table, sorted.
    #[must_use]
    pub fn ty(&self) -> &[Id] {
        &self.ty
    }

    #[must_use]
    pub const fn flags(&self) -> TableFlags {
        self.flags
    }

    /// Get the number of entities in this table.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Get the entities in this table.
    #[must_use]
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Position of `id` in the type.
    #[must_use]
    pub fn type_index(&self, id: Id) -> Option<usize> {
        self.ty.binary_search(&id).ok()
    }

    #[must_use]
    pub fn has(&self, id: Id) -> bool {
        self.type_index(id).is_some()
    }

    /// Column index for a type index. `None` for tags.
    #[must_use]
    pub fn column_index(&self, type_index: usize) -> Option<usize> {
        self.column_map.get(type_index).copied().flatten().map(usize::from)
    }

    /// Get a column by index.
    #[must_use]
    pub fn column(&self, index: usize) -> Option<&Column> {
        self.columns.get(index)
    }

    pub(crate) fn column_mut(&mut self, index: usize) -> Option<&mut Column> {
        self.columns.get_mut(index)
    }

    /// Get the column storing `id`.
    #[must_use]
    pub fn column_for(&self, id: Id) -> Option<&Column> {
        self.column_index(self.type_index(id)?)
            .map(|index| &self.columns[index])
    }

    /// First type index at or after `from` whose id matches `pattern`.
    #[must_use]
    pub fn find_match(&self, pattern: Id, from: usize) -> Option<usize> {
        let start = from.min(self.ty.len());
        self.ty[start..]
            .iter()
            .position(|id| id.matches(pattern))
            .map(|offset| start + offset)
    }

    /// Check that every column holds exactly one value per entity.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.columns.iter().all(|c| c.len() == self.entities.len())
    }

    /// Append an entity, default-constructing every column.
    pub(crate) fn append(&mut self, entity: Entity) -> usize {
        let row = self.entities.len();
        for column in &mut self.columns {
            column.push_default();
        }
        self.entities.push(entity);
        row
    }

    /// Drop the row and swap the last row into its place.
    ///
    /// Returns the entity now stored at `row`, if a swap happened.
    pub(crate) fn delete(&mut self, row: usize) -> Option<Entity> {
        debug_assert!(row < self.entities.len());

        for column in &mut self.columns {
            // SAFETY: row is within bounds and every column has len == entities.len()
            unsafe { column.swap_remove_drop(row) };
        }
        self.entities.swap_remove(row);
        self.entities.get(row).copied()
    }

    /// Move the entity at `src_row` of `src` to the end of `dst`.
    ///
    /// Shared columns are relocated, columns only in `dst` are
    /// default-constructed and columns only in `src` are dropped. Returns the
    /// new row and the entity that was swapped into `src_row`, if any.
    pub(crate) fn move_entity(
        src: &mut Table,
        src_row: usize,
        dst: &mut Table,
    ) -> (usize, Option<Entity>) {
        debug_assert!(src_row < src.entities.len());

        let entity = src.entities[src_row];
        let dst_row = dst.entities.len();

        for (type_index, &id) in dst.ty.iter().enumerate() {
            let Some(dst_column) = dst.column_index(type_index) else {
                continue;
            };
            let src_column = src
                .type_index(id)
                .and_then(|index| src.column_index(index));
            match src_column {
                // SAFETY: src_row is in bounds and both columns store `id`'s type
                Some(src_column) => unsafe {
                    dst.columns[dst_column].move_from(&mut src.columns[src_column], src_row);
                },
                None => dst.columns[dst_column].push_default(),
            }
        }

        for (type_index, &id) in src.ty.iter().enumerate() {
            let Some(src_column) = src.column_index(type_index) else {
                continue;
            };
            let moved = dst
                .type_index(id)
                .and_then(|index| dst.column_index(index))
                .is_some();
            if !moved {
                // SAFETY: src_row is in bounds for columns not yet swap-removed
                unsafe { src.columns[src_column].swap_remove_drop(src_row) };
            }
        }

        src.entities.swap_remove(src_row);
        dst.entities.push(entity);

        (dst_row, src.entities.get(src_row).copied())
    }

    /// Get a component value by id and row.
    #[must_use]
    pub fn get<T: 'static>(&self, id: Id, row: usize) -> Option<&T> {
        let column = self.column_for(id)?;
        column.as_slice::<T>()?.get(row)
    }

    pub(crate) fn get_mut<T: 'static>(&mut self, id: Id, row: usize) -> Option<&mut T> {
        let index = self.column_index(self.type_index(id)?)?;
        let column = &mut self.columns[index];
        if !column.info().is::<T>() || row >= column.len() {
            return None;
        }
        // SAFETY: type and bounds checked above
        Some(unsafe { column.get_unchecked_mut::<T>(row) })
    }
}

impl fmt::Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table")
            .field("id", &self.id)
            .field("type", &self.ty)
            .field("len", &self.entities.len())
            .finish()
    }
}

/// Get two distinct tables mutably.
pub(crate) fn two_tables_mut(
    tables: &mut [Option<Table>],
    a: TableId,
    b: TableId,
) -> Option<(&mut Table, &mut Table)> {
    let (a, b) = (a.index(), b.index());
    if a == b || a >= tables.len() || b >= tables.len() {
        return None;
    }
    if a < b {
        let (left, right) = tables.split_at_mut(b);
        Some((left[a].as_mut()?, right[0].as_mut()?))
    } else {
        let (left, right) = tables.split_at_mut(a);
        Some((right[0].as_mut()?, left[b].as_mut()?))
    }
}
