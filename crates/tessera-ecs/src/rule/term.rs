//! Resolved query terms.
//!
//! Terms reference entities directly; names from the DSL are resolved by
//! [`World::query`](crate::World::query) before a rule is compiled.

use std::fmt;

pub use tessera_dsl::Operator;
use tessera_dsl::THIS_VAR;

use crate::id::Entity;

/// What a term position refers to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TermRef {
    Entity(Entity),
    /// Variable name without the `$`.
    Var(String),
    /// `*`
    Wildcard,
    /// `_`
    Any,
}

impl TermRef {
    /// The implicit subject `$this`.
    #[must_use]
    pub fn this() -> Self {
        Self::Var(THIS_VAR.to_string())
    }

    #[must_use]
    pub fn var(name: impl Into<String>) -> Self {
        Self::Var(name.into())
    }

    #[must_use]
    pub fn is_this(&self) -> bool {
        matches!(self, Self::Var(name) if name.eq_ignore_ascii_case(THIS_VAR))
    }
}

impl From<Entity> for TermRef {
    fn from(entity: Entity) -> Self {
        Self::Entity(entity)
    }
}

impl fmt::Display for TermRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Entity(entity) => write!(f, "{entity}"),
            Self::Var(name) => write!(f, "${name}"),
            Self::Wildcard => f.write_str("*"),
            Self::Any => f.write_str("_"),
        }
    }
}

/// One predicate of a rule: `oper first(src, second)`.
///
/// ```
/// use tessera_ecs::{Entity, Term, TermRef};
///
/// let likes = Entity::new(100, 0);
/// let term = Term::pair(likes, TermRef::var("x")).not();
/// assert_eq!(term.to_string(), "!#100($this, $x)");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Term {
    pub oper: Operator,
    pub first: TermRef,
    pub src: TermRef,
    pub second: Option<TermRef>,
}

impl Term {
    /// `first($this)`
    #[must_use]
    pub fn new(first: impl Into<TermRef>) -> Self {
        Self {
            oper: Operator::And,
            first: first.into(),
            src: TermRef::this(),
            second: None,
        }
    }

    /// `first($this, second)`
    #[must_use]
    pub fn pair(first: impl Into<TermRef>, second: impl Into<TermRef>) -> Self {
        Self {
            second: Some(second.into()),
            ..Self::new(first)
        }
    }

    #[must_use]
    pub fn src(mut self, src: impl Into<TermRef>) -> Self {
        self.src = src.into();
        self
    }

    #[must_use]
    #[allow(clippy::should_implement_trait)]
    pub fn not(mut self) -> Self {
        self.oper = Operator::Not;
        self
    }

    #[must_use]
    pub fn optional(mut self) -> Self {
        self.oper = Operator::Optional;
        self
    }

    /// Make this term an alternative of the previous one.
    #[must_use]
    pub fn or(mut self) -> Self {
        self.oper = Operator::Or;
        self
    }

    /// Iterate the references of this term.
    pub fn refs(&self) -> impl Iterator<Item = &TermRef> {
        std::iter::once(&self.first)
            .chain(std::iter::once(&self.src))
            .chain(self.second.as_ref())
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.oper {
            Operator::Not => f.write_str("!")?,
            Operator::Optional => f.write_str("?")?,
            Operator::And | Operator::Or => {}
        }
        write!(f, "{}({}", self.first, self.src)?;
        if let Some(second) = &self.second {
            write!(f, ", {second}")?;
        }
        f.write_str(")")
    }
}
