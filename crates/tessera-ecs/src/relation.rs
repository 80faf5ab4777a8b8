//! Relationship traits.
//!
//! Relations are ordinary entities used as the first half of a pair. Traits
//! registered on a relation constrain which pairs an entity may hold; they
//! are enforced whenever a table transition adds a pair of that relation.

use bitflags::bitflags;

use crate::id::Entity;

bitflags! {
    /// Constraints on a relation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct RelationTraits: u8 {
        /// An entity may have at most one target for the relation.
        const EXCLUSIVE = 1;
        /// Following the relation from any entity never leads back to it.
        const ACYCLIC = 1 << 1;
        /// Targets must be children (via `ChildOf`) of a declared scope.
        const ONE_OF = 1 << 2;
    }
}

/// Traits of one relation, plus the scope for `ONE_OF`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RelationInfo {
    pub traits: RelationTraits,
    pub one_of: Option<Entity>,
}

impl RelationInfo {
    /// Traits of the builtin `ChildOf` relation.
    pub(crate) const CHILD_OF: Self = Self {
        traits: RelationTraits::EXCLUSIVE.union(RelationTraits::ACYCLIC),
        one_of: None,
    };

    #[must_use]
    pub const fn is_exclusive(&self) -> bool {
        self.traits.contains(RelationTraits::EXCLUSIVE)
    }

    #[must_use]
    pub const fn is_acyclic(&self) -> bool {
        self.traits.contains(RelationTraits::ACYCLIC)
    }

    /// Scope that targets must be children of, if `ONE_OF` is set.
    #[must_use]
    pub const fn one_of_scope(&self) -> Option<Entity> {
        if self.traits.contains(RelationTraits::ONE_OF) {
            self.one_of
        } else {
            None
        }
    }
}
