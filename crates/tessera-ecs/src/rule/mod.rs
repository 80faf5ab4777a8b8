//! Rules - compiled multi-term queries.
//!
//! A rule is compiled once from a list of [`Term`]s and can be iterated any
//! number of times against a world:
//!
//! ```
//! use tessera_ecs::World;
//!
//! let mut world = World::new();
//! let likes = world.entity_named("Likes");
//! let apples = world.entity_named("Apples");
//! let bob = world.entity_named("Bob");
//! world.add_pair(bob, likes, apples).unwrap();
//!
//! let rule = world.query("Likes($this, $what)").unwrap();
//! let what = rule.find_var("what").unwrap();
//! let results: Vec<_> = rule.iter(&world).collect();
//! assert_eq!(results.len(), 1);
//! assert_eq!(results[0].entities(), &[bob]);
//! assert_eq!(results[0].get_var(what), apples);
//! ```

mod compile;
mod engine;
mod iter;
mod term;

pub use compile::Rule;
pub use engine::RuleIter;
pub use iter::{RuleField, RuleMatch};
pub use term::{Operator, Term, TermRef};

use crate::world::World;

impl Rule {
    /// Iterate the results of this rule.
    pub fn iter<'w>(&'w self, world: &'w World) -> RuleIter<'w> {
        RuleIter::new(self, world)
    }

    /// Total number of entities over all results.
    #[must_use]
    pub fn count(&self, world: &World) -> usize {
        self.iter(world).map(|result| result.count()).sum()
    }

    /// Check whether the rule has at least one result.
    #[must_use]
    pub fn is_true(&self, world: &World) -> bool {
        self.iter(world).next().is_some()
    }
}
