//! Rule evaluation.
//!
//! A backtracking machine over the compiled program. Each instruction owns a
//! cursor that remembers how far it got, so a `redo` resumes the instruction
//! at its next candidate instead of starting over. Success moves to the next
//! instruction; failure redoes the previous one. Walking past the last
//! instruction yields a result.

use smallvec::SmallVec;

use super::{
    compile::{Op, OpKind, Pattern, Rule, Slot, THIS, VarId},
    iter::{FieldData, RuleField, RuleMatch},
};
use crate::{
    id::{Entity, Id},
    store::Store,
    table::{Table, TableId},
    world::World,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Binding {
    Unbound,
    Entity(Entity),
    /// Every row of a table. Only used for `$this`.
    Table(TableId),
}

/// Progress of one instruction.
#[derive(Debug, Clone, Copy, Default)]
struct Cursor {
    /// Or alternative being evaluated.
    alt: usize,
    /// Position in the id record's table list.
    table_pos: usize,
    table: Option<TableId>,
    row: usize,
    /// Next type index to test.
    column: usize,
    matched: bool,
}

#[derive(Debug, Clone, Copy)]
struct FieldState {
    id: Id,
    src: Slot,
    is_set: bool,
}

/// Where a term with a bound source looks for matches.
enum Source<'w> {
    Table(&'w Table),
    /// `*` or `_`: any entity will do.
    Exists,
    Missing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Start,
    Yielded,
    Done,
}

/// Iterator over the results of a [`Rule`].
pub struct RuleIter<'w> {
    rule: &'w Rule,
    store: &'w Store,
    vars: SmallVec<[Binding; 8]>,
    fields: SmallVec<[FieldState; 8]>,
    cursors: SmallVec<[Cursor; 8]>,
    state: State,
}

impl<'w> RuleIter<'w> {
    pub(crate) fn new(rule: &'w Rule, world: &'w World) -> Self {
        let mut fields: SmallVec<[FieldState; 8]> = SmallVec::from_elem(
            FieldState {
                id: Id::WILDCARD,
                src: Slot::Var(THIS),
                is_set: false,
            },
            rule.field_count(),
        );
        for op in &rule.ops {
            fields[op.field].src = op.src;
        }

        Self {
            rule,
            store: &world.store,
            vars: SmallVec::from_elem(Binding::Unbound, rule.var_count()),
            fields,
            cursors: SmallVec::from_elem(Cursor::default(), rule.ops.len()),
            state: State::Start,
        }
    }

    fn unbind(&mut self, op: &Op) {
        for &var in op.src_write.iter().chain(&op.writes) {
            self.vars[var] = Binding::Unbound;
        }
    }

    fn unbind_pattern(&mut self, op: &Op) {
        for &var in &op.writes {
            self.vars[var] = Binding::Unbound;
        }
    }

    fn var_entity(&self, var: VarId) -> Option<Entity> {
        match self.vars[var] {
            Binding::Entity(entity) => Some(entity),
            Binding::Table(_) | Binding::Unbound => None,
        }
    }

    /// The id pattern under the current bindings. Unbound variables, `*` and
    /// `_` all become `*`.
    fn resolve(&self, pattern: &Pattern) -> Id {
        let entity = |slot: Slot| match slot {
            Slot::Entity(entity) => entity,
            Slot::Var(var) => self.var_entity(var).unwrap_or(Entity::WILDCARD),
            Slot::Wildcard | Slot::Any => Entity::WILDCARD,
        };
        match pattern.second {
            None => Id::from(entity(pattern.first)),
            Some(second) => Id::pair(entity(pattern.first), entity(second)),
        }
    }

    /// Bind the variables an instruction writes from a matched id. Fails if
    /// one variable would get two values.
    fn bind(&mut self, op: &Op, pattern: &Pattern, id: Id) -> bool {
        let values = [
            (Some(pattern.first), Some(id.first())),
            (pattern.second, id.second()),
        ];
        for (slot, value) in values {
            let (Some(Slot::Var(var)), Some(value)) = (slot, value) else {
                continue;
            };
            if !op.writes.contains(&var) {
                continue;
            }
            // Pair elements are stored without generation
            let value = self.store.entity_index().get_alive(value).unwrap_or(value);
            match self.vars[var] {
                Binding::Entity(bound) if bound != value => return false,
                _ => self.vars[var] = Binding::Entity(value),
            }
        }
        true
    }

    fn set_field(&mut self, op: &Op, id: Id, is_set: bool) {
        self.fields[op.field] = FieldState {
            id,
            src: op.src,
            is_set,
        };
    }

    fn entity_source(&self, entity: Entity) -> Source<'w> {
        let store = self.store;
        store
            .record(entity)
            .and_then(|record| store.table(record.table))
            .map_or(Source::Missing, Source::Table)
    }

    fn known_source(&self, src: Slot) -> Source<'w> {
        match src {
            Slot::Entity(entity) => self.entity_source(entity),
            Slot::Var(var) => match self.vars[var] {
                Binding::Entity(entity) => self.entity_source(entity),
                Binding::Table(table) => self
                    .store
                    .table(table)
                    .map_or(Source::Missing, Source::Table),
                Binding::Unbound => Source::Missing,
            },
            Slot::Wildcard | Slot::Any => Source::Exists,
        }
    }

    fn eval(&mut self, ip: usize, redo: bool) -> bool {
        let rule = self.rule;
        let op = &rule.ops[ip];
        if !redo {
            self.cursors[ip] = Cursor::default();
            self.unbind(op);
        }
        match op.kind {
            OpKind::And => self.next_match(op, ip),
            OpKind::Or => self.eval_or(op, ip),
            OpKind::Not => !redo && self.eval_not(op),
            OpKind::Optional => self.eval_optional(op, ip, redo),
        }
    }

    fn eval_or(&mut self, op: &Op, ip: usize) -> bool {
        loop {
            let alt = self.cursors[ip].alt;
            if alt >= op.alts.len() {
                return false;
            }
            if self.next_match(op, ip) {
                return true;
            }
            self.cursors[ip] = Cursor {
                alt: alt + 1,
                ..Cursor::default()
            };
            self.unbind(op);
        }
    }

    fn eval_not(&mut self, op: &Op) -> bool {
        let pattern = self.resolve(&op.alts[0]);
        let found = match self.known_source(op.src) {
            Source::Table(table) => table.find_match(pattern, 0).is_some(),
            Source::Exists => self
                .store
                .id_records()
                .get(pattern)
                .is_some_and(|record| !record.tables().is_empty()),
            Source::Missing => false,
        };
        self.set_field(op, pattern, false);
        !found
    }

    fn eval_optional(&mut self, op: &Op, ip: usize, redo: bool) -> bool {
        if redo {
            return self.cursors[ip].matched && self.next_match(op, ip);
        }
        if self.next_match(op, ip) {
            self.cursors[ip].matched = true;
            return true;
        }
        for &var in &op.writes {
            self.vars[var] = Binding::Entity(Entity::WILDCARD);
        }
        let pattern = self.resolve(&op.alts[0]);
        self.set_field(op, pattern, false);
        true
    }

    /// Advance an And, Or or Optional instruction to its next match.
    fn next_match(&mut self, op: &Op, ip: usize) -> bool {
        let pattern = &op.alts[self.cursors[ip].alt];
        match op.src_write {
            Some(var) => self.select(op, ip, pattern, var),
            None => match self.known_source(op.src) {
                Source::Table(table) => self.match_in_table(op, ip, pattern, table),
                Source::Exists => self.match_exists(op, ip, pattern),
                Source::Missing => false,
            },
        }
    }

    /// Next id in `table` matching `pattern`, starting at the cursor.
    fn match_in_table(&mut self, op: &Op, ip: usize, pattern: &Pattern, table: &Table) -> bool {
        loop {
            self.unbind_pattern(op);
            let resolved = self.resolve(pattern);
            let Some(index) = table.find_match(resolved, self.cursors[ip].column) else {
                return false;
            };
            self.cursors[ip].column = if pattern.has_any() {
                usize::MAX
            } else {
                index + 1
            };

            let id = table.ty()[index];
            if self.bind(op, pattern, id) {
                self.set_field(op, id, true);
                return true;
            }
        }
    }

    /// Match against whatever entity has the id; succeeds at most once.
    fn match_exists(&mut self, op: &Op, ip: usize, pattern: &Pattern) -> bool {
        if self.cursors[ip].matched {
            return false;
        }
        self.cursors[ip].matched = true;

        let store = self.store;
        self.unbind_pattern(op);
        let resolved = self.resolve(pattern);
        let Some(record) = store.id_records().get(resolved) else {
            return false;
        };

        for tr in record.tables() {
            let Some(table) = store.table(tr.table) else {
                continue;
            };
            let mut from = usize::from(tr.index);
            while let Some(index) = table.find_match(resolved, from) {
                let id = table.ty()[index];
                if self.bind(op, pattern, id) {
                    self.set_field(op, id, true);
                    return true;
                }
                self.unbind_pattern(op);
                from = index + 1;
            }
        }
        false
    }

    /// Enumerate candidates for an unbound source variable.
    fn select(&mut self, op: &Op, ip: usize, pattern: &Pattern, var: VarId) -> bool {
        let store = self.store;
        let table_mode = var == THIS && self.rule.this_is_table;

        loop {
            if let Some(table) = self.cursors[ip].table.and_then(|id| store.table(id)) {
                if table_mode {
                    self.vars[THIS] = Binding::Table(table.id());
                    if self.match_in_table(op, ip, pattern, table) {
                        return true;
                    }
                } else {
                    while let Some(&entity) = table.entities().get(self.cursors[ip].row) {
                        self.vars[var] = Binding::Entity(entity);
                        if self.match_in_table(op, ip, pattern, table) {
                            return true;
                        }
                        self.cursors[ip].row += 1;
                        self.cursors[ip].column = 0;
                    }
                }
            }

            self.vars[var] = Binding::Unbound;
            self.unbind_pattern(op);
            let lookup = self.resolve(pattern);
            let Some(record) = store.id_records().get(lookup) else {
                return false;
            };
            let cursor = &mut self.cursors[ip];
            let Some(tr) = record.tables().get(cursor.table_pos) else {
                cursor.table = None;
                return false;
            };
            cursor.table_pos += 1;
            cursor.table = Some(tr.table);
            cursor.row = 0;
            cursor.column = 0;
        }
    }

    /// Locate the row of an entity.
    fn locate(&self, entity: Entity) -> Option<(&'w Table, usize)> {
        let store = self.store;
        let record = store.record(entity)?;
        Some((store.table(record.table)?, record.row as usize))
    }

    fn current(&self) -> RuleMatch<'w> {
        let empty: &'w [Entity] = &[];
        let this = match self.vars[THIS] {
            Binding::Table(table) => self.store.table(table).map(|table| (table, 0)),
            Binding::Entity(entity) => self.locate(entity),
            Binding::Unbound => None,
        };
        let entities: &'w [Entity] = match (self.vars[THIS], this) {
            (Binding::Table(_), Some((table, _))) => table.entities(),
            (_, Some((table, row))) => &table.entities()[row..=row],
            (_, None) => empty,
        };

        let fields = self
            .fields
            .iter()
            .map(|field| {
                let (src, location, len) = match field.src {
                    Slot::Var(THIS) => (Entity::NULL, this, entities.len()),
                    Slot::Var(var) => {
                        let entity = self.var_entity(var).unwrap_or(Entity::WILDCARD);
                        (entity, self.locate(entity), 1)
                    }
                    Slot::Entity(entity) => (entity, self.locate(entity), 1),
                    Slot::Wildcard => (Entity::WILDCARD, None, 0),
                    Slot::Any => (Entity::ANY, None, 0),
                };
                let data = location.filter(|_| field.is_set).and_then(|(table, row)| {
                    let column = table.column_for(field.id)?;
                    Some(FieldData { column, row, len })
                });
                RuleField {
                    id: field.id,
                    src,
                    is_set: field.is_set,
                    data,
                }
            })
            .collect();

        let vars = self
            .vars
            .iter()
            .map(|binding| match *binding {
                Binding::Entity(entity) => entity,
                Binding::Table(_) if entities.len() == 1 => entities[0],
                Binding::Table(_) => Entity::NULL,
                Binding::Unbound => Entity::WILDCARD,
            })
            .collect();

        RuleMatch {
            entities,
            fields,
            vars,
        }
    }
}

impl<'w> Iterator for RuleIter<'w> {
    type Item = RuleMatch<'w>;

    fn next(&mut self) -> Option<Self::Item> {
        let len = self.rule.ops.len();
        let (mut ip, mut redo) = match self.state {
            State::Done => return None,
            State::Start => (0, false),
            State::Yielded => (len - 1, true),
        };

        loop {
            if self.eval(ip, redo) {
                ip += 1;
                redo = false;
                if ip == len {
                    self.state = State::Yielded;
                    return Some(self.current());
                }
            } else if ip == 0 {
                self.state = State::Done;
                return None;
            } else {
                ip -= 1;
                redo = true;
            }
        }
    }
}

impl std::fmt::Debug for RuleIter<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleIter")
            .field("vars", &self.vars)
            .field("state", &self.state)
            .finish()
    }
}
