//! Rule results.

use smallvec::SmallVec;

use crate::{
    id::{Entity, Id},
    storage::Column,
};

/// Column slice backing a set field.
#[derive(Clone, Copy)]
pub(crate) struct FieldData<'w> {
    pub column: &'w Column,
    pub row: usize,
    pub len: usize,
}

/// One field of a result.
#[derive(Clone, Copy)]
pub struct RuleField<'w> {
    pub(crate) id: Id,
    pub(crate) src: Entity,
    pub(crate) is_set: bool,
    pub(crate) data: Option<FieldData<'w>>,
}

/// One result of a rule: a run of entities sharing the same bindings.
///
/// Borrows table storage directly; nothing is copied.
pub struct RuleMatch<'w> {
    pub(crate) entities: &'w [Entity],
    pub(crate) fields: SmallVec<[RuleField<'w>; 8]>,
    pub(crate) vars: SmallVec<[Entity; 8]>,
}

impl<'w> RuleMatch<'w> {
    /// Number of entities in this result. Zero if `$this` is not used.
    #[must_use]
    pub fn count(&self) -> usize {
        self.entities.len()
    }

    #[must_use]
    pub fn entities(&self) -> &'w [Entity] {
        self.entities
    }

    #[must_use]
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// The id that matched the field, or the pattern if it is not set.
    ///
    /// # Panics
    ///
    /// Panics if `field` is out of range.
    #[must_use]
    pub fn field_id(&self, field: usize) -> Id {
        self.fields[field].id
    }

    /// The entity the field was matched on. `Entity::NULL` means `$this`.
    ///
    /// # Panics
    ///
    /// Panics if `field` is out of range.
    #[must_use]
    pub fn field_src(&self, field: usize) -> Entity {
        self.fields[field].src
    }

    /// `false` for Not fields and Optional fields that did not match.
    ///
    /// # Panics
    ///
    /// Panics if `field` is out of range.
    #[must_use]
    pub fn field_is_set(&self, field: usize) -> bool {
        self.fields[field].is_set
    }

    /// Component values of a field, one per entity for `$this` fields and a
    /// single value for fields matched on another source.
    ///
    /// Returns `None` if the field is not set, carries no data, or does not
    /// hold a `T`.
    #[must_use]
    pub fn field<T: 'static>(&self, field: usize) -> Option<&'w [T]> {
        let data = self.fields.get(field)?.data?;
        data.column
            .as_slice::<T>()?
            .get(data.row..data.row + data.len)
    }

    /// Value of a variable. Unbound variables read as `Entity::WILDCARD`;
    /// `$this` bound to more than one entity reads as `Entity::NULL`.
    ///
    /// # Panics
    ///
    /// Panics if `var` is out of range.
    #[must_use]
    pub fn get_var(&self, var: usize) -> Entity {
        self.vars[var]
    }
}

impl std::fmt::Debug for RuleMatch<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let fields: Vec<_> = self
            .fields
            .iter()
            .map(|field| (field.id, field.src, field.is_set))
            .collect();
        f.debug_struct("RuleMatch")
            .field("entities", &self.entities)
            .field("fields", &fields)
            .field("vars", &self.vars)
            .finish()
    }
}
