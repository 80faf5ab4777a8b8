//! Entity identifiers and the ids used to key tables.
//!
//! An [`Entity`] packs a 32-bit index and a 16-bit generation into a `u64`.
//! An [`Id`] is either a plain entity (component or tag) or a
//! `(relation, target)` pair. The packed 64-bit form of an `Id` only exists
//! at the storage edge, where it defines the canonical order of a table type.

use std::{cmp::Ordering, fmt};

const INDEX_MASK: u64 = 0xFFFF_FFFF;
const GENERATION_SHIFT: u32 = 32;
const GENERATION_MASK: u64 = 0xFFFF << GENERATION_SHIFT;
const PAIR_FLAG: u64 = 1 << 63;
const RELATION_MASK: u64 = 0x7FFF_FFFF;

/// A unique identifier for an entity in the world.
///
/// Bits 0..32 hold the index into the entity index, bits 32..48 the
/// generation of that slot. Recycling a slot bumps the generation, so an old
/// handle to a deleted entity is detectably stale.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Entity(u64);

impl Entity {
    /// The null entity. Never alive.
    pub const NULL: Self = Self(0);
    /// The world entity, for storing global state.
    pub const WORLD: Self = Self(1);
    /// `*`: matches any id and yields every match.
    pub const WILDCARD: Self = Self(2);
    /// `_`: matches any id and yields only the first match.
    pub const ANY: Self = Self(3);
    /// Builtin hierarchy relation. Acyclic and exclusive.
    pub const CHILD_OF: Self = Self(4);

    /// Highest index reserved for builtin entities.
    pub(crate) const LAST_BUILTIN: u32 = 4;

    /// Create an entity from an index and generation.
    #[must_use]
    pub const fn new(index: u32, generation: u16) -> Self {
        Self(((generation as u64) << GENERATION_SHIFT) | index as u64)
    }

    /// Get the entity's index.
    #[must_use]
    pub const fn index(self) -> u32 {
        (self.0 & INDEX_MASK) as u32
    }

    /// Get the entity's generation.
    #[must_use]
    pub const fn generation(self) -> u16 {
        ((self.0 & GENERATION_MASK) >> GENERATION_SHIFT) as u16
    }

    /// The same index with the next generation.
    #[must_use]
    pub const fn next_generation(self) -> Self {
        Self::new(self.index(), self.generation().wrapping_add(1))
    }

    /// The same index with generation 0, as stored inside pairs.
    #[must_use]
    pub const fn without_generation(self) -> Self {
        Self(self.0 & INDEX_MASK)
    }

    /// Pack entity into a single u64.
    #[must_use]
    pub const fn to_bits(self) -> u64 {
        self.0
    }

    /// Unpack entity from a u64. Bits above the generation are ignored.
    #[must_use]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits & (INDEX_MASK | GENERATION_MASK))
    }

    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Check whether this is `*` or `_`.
    #[must_use]
    pub const fn is_wildcard(self) -> bool {
        let index = self.index();
        index == Self::WILDCARD.index() || index == Self::ANY.index()
    }

    /// Check whether this is one of the builtin entities.
    #[must_use]
    pub const fn is_builtin(self) -> bool {
        self.index() <= Self::LAST_BUILTIN
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entity({}v{})", self.index(), self.generation())
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index() {
            2 => write!(f, "*"),
            3 => write!(f, "_"),
            4 => write!(f, "ChildOf"),
            index if self.generation() == 0 => write!(f, "#{index}"),
            index => write!(f, "#{index}v{}", self.generation()),
        }
    }
}

/// A component, tag or relationship pair.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub enum Id {
    /// A plain component or tag.
    Entity(Entity),
    /// A `(relation, target)` pair. Both halves are stored without their
    /// generation.
    Pair { relation: Entity, target: Entity },
}

impl Id {
    /// `*`, matching every plain id.
    pub const WILDCARD: Self = Self::Entity(Entity::WILDCARD);

    /// Create a pair id.
    #[must_use]
    pub const fn pair(relation: Entity, target: Entity) -> Self {
        Self::Pair {
            relation: relation.without_generation(),
            target: target.without_generation(),
        }
    }

    /// Pack into the 64-bit storage form.
    #[must_use]
    pub const fn to_bits(self) -> u64 {
        match self {
            Self::Entity(entity) => entity.to_bits(),
            Self::Pair { relation, target } => {
                PAIR_FLAG
                    | ((relation.index() as u64 & RELATION_MASK) << 32)
                    | target.index() as u64
            }
        }
    }

    /// Unpack from the 64-bit storage form.
    #[must_use]
    pub const fn from_bits(bits: u64) -> Self {
        if bits & PAIR_FLAG == 0 {
            Self::Entity(Entity::from_bits(bits))
        } else {
            Self::Pair {
                relation: Entity::new(((bits >> 32) & RELATION_MASK) as u32, 0),
                target: Entity::new((bits & INDEX_MASK) as u32, 0),
            }
        }
    }

    #[must_use]
    pub const fn is_pair(self) -> bool {
        matches!(self, Self::Pair { .. })
    }

    /// The entity, or the relation of a pair.
    #[must_use]
    pub const fn first(self) -> Entity {
        match self {
            Self::Entity(entity) => entity,
            Self::Pair { relation, .. } => relation,
        }
    }

    /// The target of a pair.
    #[must_use]
    pub const fn second(self) -> Option<Entity> {
        match self {
            Self::Entity(_) => None,
            Self::Pair { target, .. } => Some(target),
        }
    }

    /// Check whether any position holds `*` or `_`.
    #[must_use]
    pub const fn is_wildcard(self) -> bool {
        match self {
            Self::Entity(entity) => entity.is_wildcard(),
            Self::Pair { relation, target } => relation.is_wildcard() || target.is_wildcard(),
        }
    }

    /// Check whether this concrete id is matched by `pattern`.
    ///
    /// A plain wildcard matches plain ids only; pairs are matched by
    /// wildcard pairs.
    #[must_use]
    pub fn matches(self, pattern: Self) -> bool {
        match (self, pattern) {
            (Self::Entity(id), Self::Entity(pattern)) => pattern.is_wildcard() || id == pattern,
            (
                Self::Pair { relation, target },
                Self::Pair {
                    relation: pattern_relation,
                    target: pattern_target,
                },
            ) => {
                (pattern_relation.is_wildcard() || relation == pattern_relation)
                    && (pattern_target.is_wildcard() || target == pattern_target)
            }
            _ => false,
        }
    }

    /// The same pattern with `_` replaced by `*`.
    #[must_use]
    pub(crate) const fn any_as_wildcard(self) -> Self {
        const fn fix(entity: Entity) -> Entity {
            if entity.index() == Entity::ANY.index() {
                Entity::WILDCARD
            } else {
                entity
            }
        }
        match self {
            Self::Entity(entity) => Self::Entity(fix(entity)),
            Self::Pair { relation, target } => Self::Pair {
                relation: fix(relation),
                target: fix(target),
            },
        }
    }
}

impl From<Entity> for Id {
    fn from(entity: Entity) -> Self {
        Self::Entity(entity)
    }
}

impl PartialOrd for Id {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Id {
    fn cmp(&self, other: &Self) -> Ordering {
        self.to_bits().cmp(&other.to_bits())
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({self})")
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Entity(entity) => write!(f, "{entity}"),
            Self::Pair { relation, target } => write!(f, "({relation}, {target})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_bits() {
        let e = Entity::new(42, 7);
        assert_eq!(e.index(), 42);
        assert_eq!(e.generation(), 7);
        assert_eq!(Entity::from_bits(e.to_bits()), e);
        assert_eq!(e.next_generation().generation(), 8);
        assert_eq!(e.without_generation(), Entity::new(42, 0));
    }

    #[test]
    fn test_generation_wraps() {
        let e = Entity::new(1, u16::MAX);
        assert_eq!(e.next_generation().generation(), 0);
    }

    #[test]
    fn test_pair_decomposes() {
        let rel = Entity::new(10, 3);
        let tgt = Entity::new(20, 5);
        let id = Id::pair(rel, tgt);

        assert!(id.is_pair());
        assert_eq!(id.first(), Entity::new(10, 0));
        assert_eq!(id.second(), Some(Entity::new(20, 0)));
        assert_eq!(Id::from_bits(id.to_bits()), id);
        assert_ne!(id.to_bits() & PAIR_FLAG, 0);
    }

    #[test]
    fn test_plain_ids_sort_before_pairs() {
        let plain = Id::from(Entity::new(u32::MAX, 0));
        let pair = Id::pair(Entity::new(5, 0), Entity::new(6, 0));
        assert!(plain < pair);

        let a = Id::pair(Entity::new(5, 0), Entity::new(100, 0));
        let b = Id::pair(Entity::new(6, 0), Entity::new(1, 0));
        assert!(a < b, "pairs are grouped by relation");
    }

    #[test]
    fn test_matches() {
        let rel = Entity::new(10, 0);
        let tgt = Entity::new(20, 0);
        let id = Id::pair(rel, tgt);

        assert!(id.matches(Id::pair(rel, Entity::WILDCARD)));
        assert!(id.matches(Id::pair(Entity::WILDCARD, tgt)));
        assert!(id.matches(Id::pair(Entity::WILDCARD, Entity::ANY)));
        assert!(!id.matches(Id::pair(rel, Entity::new(21, 0))));
        assert!(!id.matches(Id::WILDCARD));

        let tag = Id::from(Entity::new(30, 0));
        assert!(tag.matches(Id::WILDCARD));
        assert!(tag.matches(tag));
        assert!(!tag.matches(Id::pair(Entity::WILDCARD, Entity::WILDCARD)));
    }
}
