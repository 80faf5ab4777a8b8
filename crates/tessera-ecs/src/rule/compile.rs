//! Rule compiler.
//!
//! Turns a list of terms into a linear program. Every variable gets a slot
//! (`$this` is always slot 0), Or chains collapse into one instruction, and
//! instructions are ordered so that each one runs after the instructions
//! that bind its source. Among terms that could start the program, the one
//! matching the fewest tables is picked.

use std::fmt;

use smallvec::SmallVec;
use tracing::debug;

use super::term::{Operator, Term, TermRef};
use crate::{
    error::{EcsError, EcsResult},
    id::{Entity, Id},
    store::Store,
};

pub(crate) type VarId = usize;

/// Slot of the `$this` variable.
pub(crate) const THIS: VarId = 0;

/// A resolved term position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Slot {
    Entity(Entity),
    Var(VarId),
    Wildcard,
    Any,
}

impl Slot {
    const fn var(self) -> Option<VarId> {
        match self {
            Self::Var(var) => Some(var),
            _ => None,
        }
    }
}

/// The id half of a term.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Pattern {
    pub first: Slot,
    pub second: Option<Slot>,
}

impl Pattern {
    pub fn vars(&self) -> impl Iterator<Item = VarId> {
        std::iter::once(self.first)
            .chain(self.second)
            .filter_map(Slot::var)
    }

    /// `_` anywhere in the pattern limits matching to the first id.
    pub fn has_any(&self) -> bool {
        self.first == Slot::Any || self.second == Some(Slot::Any)
    }

    /// The pattern with every variable replaced by `*`.
    fn loose(&self) -> Id {
        let entity = |slot: Slot| match slot {
            Slot::Entity(entity) => entity,
            _ => Entity::WILDCARD,
        };
        match self.second {
            None => Id::from(entity(self.first)),
            Some(second) => Id::pair(entity(self.first), entity(second)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OpKind {
    And,
    Or,
    Not,
    Optional,
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::And => "and",
            Self::Or => "or",
            Self::Not => "not",
            Self::Optional => "optional",
        })
    }
}

/// One instruction of a compiled rule.
#[derive(Debug, Clone)]
pub(crate) struct Op {
    pub kind: OpKind,
    pub src: Slot,
    /// One pattern, or the alternatives of an Or chain.
    pub alts: SmallVec<[Pattern; 1]>,
    pub field: usize,
    /// Source variable bound by this instruction.
    pub src_write: Option<VarId>,
    /// Pattern variables bound by this instruction.
    pub writes: SmallVec<[VarId; 2]>,
}

struct Group {
    kind: OpKind,
    src: Slot,
    alts: SmallVec<[Pattern; 1]>,
    term: usize,
}

/// A compiled query.
///
/// Rules hold no borrow of the world; iterate with [`Rule::iter`].
#[derive(Debug, Clone)]
pub struct Rule {
    pub(crate) ops: Vec<Op>,
    vars: Vec<String>,
    /// `$this` is bound to whole tables rather than single entities.
    pub(crate) this_is_table: bool,
    field_count: usize,
    terms: Vec<Term>,
}

impl Rule {
    pub(crate) fn compile(store: &Store, terms: &[Term]) -> EcsResult<Self> {
        if terms.is_empty() {
            return Err(EcsError::Query("rule has no terms".to_string()));
        }

        let mut vars = vec![tessera_dsl::THIS_VAR.to_string()];
        let mut groups: Vec<Group> = Vec::new();

        for (index, term) in terms.iter().enumerate() {
            let mut slot = |term_ref: &TermRef| -> EcsResult<Slot> {
                Ok(match term_ref {
                    TermRef::Entity(entity) if entity.is_null() => {
                        return Err(EcsError::Query(format!("null entity in term '{term}'")));
                    }
                    TermRef::Entity(entity) => Slot::Entity(*entity),
                    TermRef::Var(_) if term_ref.is_this() => Slot::Var(THIS),
                    TermRef::Var(name) if name.is_empty() => {
                        return Err(EcsError::Query(format!("unnamed variable in '{term}'")));
                    }
                    TermRef::Var(name) => {
                        let var = vars.iter().position(|v| v == name).unwrap_or_else(|| {
                            vars.push(name.clone());
                            vars.len() - 1
                        });
                        Slot::Var(var)
                    }
                    TermRef::Wildcard => Slot::Wildcard,
                    TermRef::Any => Slot::Any,
                })
            };

            let pattern = Pattern {
                first: slot(&term.first)?,
                second: term.second.as_ref().map(&mut slot).transpose()?,
            };
            let src = slot(&term.src)?;

            let kind = match term.oper {
                Operator::Or => {
                    let Some(group) = groups.last_mut() else {
                        return Err(EcsError::Query(format!(
                            "'{term}' is an alternative without a preceding term"
                        )));
                    };
                    if matches!(group.kind, OpKind::Not | OpKind::Optional) {
                        return Err(EcsError::Query(format!(
                            "'{}' cannot start an or chain",
                            terms[group.term]
                        )));
                    }
                    if group.src != src {
                        return Err(EcsError::Query(format!(
                            "alternatives of '{}' must share its source",
                            terms[group.term]
                        )));
                    }
                    group.kind = OpKind::Or;
                    group.alts.push(pattern);
                    continue;
                }
                Operator::And => OpKind::And,
                Operator::Not => OpKind::Not,
                Operator::Optional => OpKind::Optional,
            };

            groups.push(Group {
                kind,
                src,
                alts: SmallVec::from_elem(pattern, 1),
                term: index,
            });
        }

        let this_is_table = !groups.iter().any(|group| {
            group
                .alts
                .iter()
                .any(|alt| alt.vars().any(|var| var == THIS))
        });

        let field_count = groups.len();
        let ops = order(store, groups, terms, vars.len())?;

        let rule = Self {
            ops,
            vars,
            this_is_table,
            field_count,
            terms: terms.to_vec(),
        };
        debug!(program = %rule, "compiled rule");
        Ok(rule)
    }

    /// Index of a variable by name. `this` matches case-insensitively.
    #[must_use]
    pub fn find_var(&self, name: &str) -> Option<usize> {
        if TermRef::var(name).is_this() {
            return Some(THIS);
        }
        self.vars.iter().position(|var| var == name)
    }

    #[must_use]
    pub fn var_name(&self, index: usize) -> Option<&str> {
        self.vars.get(index).map(String::as_str)
    }

    #[must_use]
    pub fn var_count(&self) -> usize {
        self.vars.len()
    }

    /// Number of fields per result: one per term, one per Or chain.
    #[must_use]
    pub fn field_count(&self) -> usize {
        self.field_count
    }

    /// The terms this rule was compiled from.
    #[must_use]
    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    fn fmt_slot(&self, slot: Slot) -> String {
        match slot {
            Slot::Entity(entity) => entity.to_string(),
            Slot::Var(var) => format!("${}", self.vars[var]),
            Slot::Wildcard => "*".to_string(),
            Slot::Any => "_".to_string(),
        }
    }
}

/// Pick an execution order for the term groups and lower them to ops.
fn order(
    store: &Store,
    groups: Vec<Group>,
    terms: &[Term],
    var_count: usize,
) -> EcsResult<Vec<Op>> {
    // Variables that some And or Or instruction will eventually bind
    let mut bindable = vec![false; var_count];
    for group in &groups {
        if matches!(group.kind, OpKind::And | OpKind::Or) {
            let pattern_vars = group.alts.iter().flat_map(Pattern::vars);
            for var in group.src.var().into_iter().chain(pattern_vars) {
                bindable[var] = true;
            }
        }
    }

    let mut written = vec![false; var_count];
    let mut remaining = groups;
    let mut ops = Vec::with_capacity(remaining.len());

    while !remaining.is_empty() {
        let src_known = |group: &Group| group.src.var().is_none_or(|var| written[var]);
        let vars_written = |group: &Group| {
            group
                .alts
                .iter()
                .flat_map(Pattern::vars)
                .all(|var| written[var] || !bindable[var])
        };
        let pick = remaining
            .iter()
            .position(|g| g.kind == OpKind::And && src_known(g))
            .or_else(|| {
                remaining
                    .iter()
                    .position(|g| g.kind == OpKind::Or && src_known(g))
            })
            .or_else(|| {
                remaining.iter().position(|g| {
                    matches!(g.kind, OpKind::Not | OpKind::Optional)
                        && src_known(g)
                        && vars_written(g)
                })
            })
            .or_else(|| {
                remaining
                    .iter()
                    .enumerate()
                    .filter(|(_, g)| g.kind == OpKind::And)
                    .min_by_key(|(_, g)| estimate(store, &g.alts[0]))
                    .map(|(pos, _)| pos)
            })
            .or_else(|| remaining.iter().position(|g| g.kind == OpKind::Or));

        let Some(pick) = pick else {
            let group = &remaining[0];
            let reason = if src_known(group) {
                "uses a variable that is never bound"
            } else {
                "has a source that is never bound"
            };
            return Err(EcsError::Query(format!("'{}' {reason}", terms[group.term])));
        };

        let group = remaining.remove(pick);
        let src_write = group.src.var().filter(|&var| !written[var]);
        if let Some(var) = src_write {
            written[var] = true;
        }

        let mut writes = SmallVec::new();
        if group.kind != OpKind::Not {
            for var in group.alts.iter().flat_map(Pattern::vars) {
                if !written[var] {
                    written[var] = true;
                    writes.push(var);
                }
            }
        }

        ops.push(Op {
            kind: group.kind,
            src: group.src,
            alts: group.alts,
            field: field_index(terms, group.term),
            src_write,
            writes,
        });
    }

    Ok(ops)
}

/// Number of non-empty tables a pattern can match.
fn estimate(store: &Store, pattern: &Pattern) -> usize {
    store
        .id_records()
        .get(pattern.loose())
        .map_or(0, |record| record.tables().len())
}

/// Field index of the term group starting at `term`.
fn field_index(terms: &[Term], term: usize) -> usize {
    terms[..term]
        .iter()
        .filter(|t| t.oper != Operator::Or)
        .count()
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, op) in self.ops.iter().enumerate() {
            if index > 0 {
                writeln!(f)?;
            }
            write!(f, "{index:>2}: {:<8} {:<8} ", op.kind, self.fmt_slot(op.src))?;
            for (alt, pattern) in op.alts.iter().enumerate() {
                if alt > 0 {
                    f.write_str(" || ")?;
                }
                match pattern.second {
                    None => f.write_str(&self.fmt_slot(pattern.first))?,
                    Some(second) => write!(
                        f,
                        "({}, {})",
                        self.fmt_slot(pattern.first),
                        self.fmt_slot(second)
                    )?,
                }
            }
            write!(f, "  [field {}]", op.field)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::World;

    fn compile(world: &World, terms: &[Term]) -> EcsResult<Rule> {
        Rule::compile(&world.store, terms)
    }

    #[test]
    fn test_vars_get_slots() {
        let mut world = World::new();
        let likes = world.entity();
        let rule = compile(
            &world,
            &[
                Term::pair(likes, TermRef::var("x")),
                Term::pair(likes, TermRef::var("y")).src(TermRef::var("x")),
            ],
        )
        .unwrap();

        assert_eq!(rule.var_count(), 3);
        assert_eq!(rule.find_var("This"), Some(0));
        assert_eq!(rule.find_var("x"), Some(1));
        assert_eq!(rule.var_name(2), Some("y"));
        assert_eq!(rule.find_var("z"), None);
        assert!(rule.this_is_table);
    }

    #[test]
    fn test_pivot_is_most_selective() {
        let mut world = World::new();
        let common = world.entity();
        let rare = world.entity();
        for _ in 0..3 {
            let e = world.entity();
            world.add_id(e, common).unwrap();
            let other = world.entity();
            world.add_id(e, other).unwrap();
        }
        let e = world.entity();
        world.add_id(e, rare).unwrap();

        let rule = compile(&world, &[Term::new(common), Term::new(rare)]).unwrap();
        assert_eq!(rule.ops[0].alts[0].first, Slot::Entity(rare));
        assert_eq!(rule.ops[0].field, 1);
        assert_eq!(rule.ops[1].field, 0);
    }

    #[test]
    fn test_not_runs_after_binding() {
        let mut world = World::new();
        let tag = world.entity();
        let tgt = world.entity();
        let rule = compile(
            &world,
            &[
                Term::pair(TermRef::var("x"), tgt).not(),
                Term::pair(tag, TermRef::var("x")),
            ],
        )
        .unwrap();

        assert_eq!(rule.ops[0].kind, OpKind::And);
        assert_eq!(rule.ops[0].writes.as_slice(), &[1]);
        assert_eq!(rule.ops[1].kind, OpKind::Not);
        assert!(rule.ops[1].writes.is_empty());
    }

    #[test]
    fn test_or_chain_is_one_op() {
        let mut world = World::new();
        let (tag, a, b) = (world.entity(), world.entity(), world.entity());
        let rule = compile(&world, &[Term::new(tag), Term::new(a), Term::new(b).or()]).unwrap();

        assert_eq!(rule.ops.len(), 2);
        assert_eq!(rule.field_count(), 2);
        let or = rule.ops.iter().find(|op| op.kind == OpKind::Or).unwrap();
        assert_eq!(or.alts.len(), 2);
        assert_eq!(or.field, 1);
    }

    #[test]
    fn test_or_chain_binds_pattern_vars() {
        let mut world = World::new();
        let (tag, likes, loves) = (world.entity(), world.entity(), world.entity());
        let rule = compile(
            &world,
            &[
                Term::new(tag),
                Term::pair(likes, TermRef::var("x")),
                Term::pair(loves, TermRef::var("x")).or(),
            ],
        )
        .unwrap();

        let or = rule.ops.iter().find(|op| op.kind == OpKind::Or).unwrap();
        assert_eq!(or.writes.as_slice(), &[1]);
        assert_eq!(or.src_write, None);

        // with nothing else to bind the source, the chain starts the program
        let rule = compile(
            &world,
            &[
                Term::pair(likes, TermRef::var("x")),
                Term::pair(loves, TermRef::var("x")).or(),
            ],
        )
        .unwrap();
        assert_eq!(rule.ops[0].src_write, Some(THIS));
        assert_eq!(rule.ops[0].writes.as_slice(), &[1]);
    }

    #[test]
    fn test_this_in_pattern_binds_entities() {
        let mut world = World::new();
        let likes = world.entity();
        let rule = compile(
            &world,
            &[Term::pair(likes, TermRef::this()).src(TermRef::var("x"))],
        )
        .unwrap();
        assert!(!rule.this_is_table);
    }

    #[test]
    fn test_compile_errors() {
        let mut world = World::new();
        let (a, b) = (world.entity(), world.entity());

        let cases: &[&[Term]] = &[
            &[],
            &[Term::new(a).or()],
            &[Term::new(a).not(), Term::new(b).or()],
            &[Term::new(a), Term::new(b).src(TermRef::var("x")).or()],
            &[Term::new(a).not()],
            &[Term::new(a).optional().src(TermRef::var("x")), Term::new(b)],
            &[Term::new(Entity::NULL)],
        ];
        for terms in cases {
            assert!(
                matches!(compile(&world, terms), Err(EcsError::Query(_))),
                "{terms:?}"
            );
        }
    }

    #[test]
    fn test_display() {
        let mut world = World::new();
        let likes = world.entity();
        let rule = compile(
            &world,
            &[Term::pair(likes, TermRef::var("x")).not(), Term::new(likes)],
        )
        .unwrap();
        let text = rule.to_string();
        assert!(text.contains("and"), "{text}");
        assert!(text.contains("not"), "{text}");
        assert!(text.contains("$x"), "{text}");
    }
}
