//! Query term parser
//!
//! Turns a term list such as `RelA($this, $x), !$x($this, TgtA)` into a
//! [`Query`] AST. Names are left unresolved; the ECS maps them to ids.

use std::fmt;

/// Name of the implicit subject variable.
pub const THIS_VAR: &str = "this";

/// A parsed query containing multiple terms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub terms: Vec<Term>,
}

impl Query {
    /// Names of all variables referenced by the query, in order of first use.
    ///
    /// `this` is included only when a term names it or relies on the default
    /// subject.
    pub fn variables(&self) -> Vec<&str> {
        let mut vars: Vec<&str> = Vec::new();
        for term in &self.terms {
            for ident in term.idents() {
                if let Ident::Var(name) = ident
                    && !vars.contains(&name.as_str())
                {
                    vars.push(name);
                }
            }
        }
        vars
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, term) in self.terms.iter().enumerate() {
            if i > 0 {
                if term.operator == Operator::Or {
                    write!(f, " || ")?;
                } else {
                    write!(f, ", ")?;
                }
            }
            write!(f, "{term}")?;
        }
        Ok(())
    }
}

/// A single term: `[op]Predicate(Source[, Target])`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Term {
    pub operator: Operator,
    /// Component, tag or relation.
    pub predicate: Ident,
    /// Entity the predicate is tested on. Defaults to `$this`.
    pub source: Ident,
    /// Pair target, if the predicate is used as a relation.
    pub target: Option<Ident>,
}

impl Term {
    /// Create an `And` term on the implicit subject.
    #[must_use]
    pub fn new(predicate: Ident) -> Self {
        Self {
            operator: Operator::And,
            predicate,
            source: Ident::this(),
            target: None,
        }
    }

    /// Get the predicate name if it is a plain name.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        match &self.predicate {
            Ident::Name(name) => Some(name),
            _ => None,
        }
    }

    /// Check whether this term is a pair term.
    #[must_use]
    pub const fn is_pair(&self) -> bool {
        self.target.is_some()
    }

    /// Iterate predicate, source and target.
    pub fn idents(&self) -> impl Iterator<Item = &Ident> {
        [Some(&self.predicate), Some(&self.source), self.target.as_ref()]
            .into_iter()
            .flatten()
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.operator {
            Operator::Not => write!(f, "!")?,
            Operator::Optional => write!(f, "?")?,
            Operator::And | Operator::Or => {}
        }
        write!(f, "{}({}", self.predicate, self.source)?;
        if let Some(target) = &self.target {
            write!(f, ", {target}")?;
        }
        write!(f, ")")
    }
}

/// A reference in predicate, source or target position.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Ident {
    /// An entity name like `Position`.
    Name(String),
    /// A variable like `$parent`. Stored without the `$`.
    Var(String),
    /// `*`: matches anything, yielding one result per match.
    Wildcard,
    /// `_`: matches anything, yielding only the first match.
    Any,
}

impl Ident {
    /// The implicit subject variable.
    #[must_use]
    pub fn this() -> Self {
        Self::Var(THIS_VAR.to_string())
    }

    /// Check whether this is the `$this` variable.
    #[must_use]
    pub fn is_this(&self) -> bool {
        matches!(self, Self::Var(name) if name == THIS_VAR)
    }

    #[must_use]
    pub fn var_name(&self) -> Option<&str> {
        match self {
            Self::Var(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => write!(f, "{name}"),
            Self::Var(name) => write!(f, "${name}"),
            Self::Wildcard => write!(f, "*"),
            Self::Any => write!(f, "_"),
        }
    }
}

/// Term operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Operator {
    /// Entity must have the predicate (default)
    #[default]
    And,
    /// Entity must NOT have the predicate
    Not,
    /// Predicate is optional (matched if present)
    Optional,
    /// Alternative of the previous term
    Or,
}

/// Parse error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub message: String,
    pub position: usize,
}

impl ParseError {
    fn new(message: impl Into<String>, position: usize) -> Self {
        Self {
            message: message.into(),
            position,
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "parse error at position {}: {}",
            self.position, self.message
        )
    }
}

impl std::error::Error for ParseError {}

/// Parse a query string into a Query AST.
///
/// # Syntax
///
/// - `Pred` - `Pred($this)`
/// - `Pred(Src)` / `Pred(Src, Tgt)` - explicit source and pair target
/// - `(Rel, Tgt)` - pair on `$this`
/// - `!Term` / `?Term` - not / optional
/// - `A || B` - or-chain
/// - `$name`, `*`, `_` - variable, wildcard, any
///
/// # Errors
///
/// Returns `ParseError` if the query string is malformed.
pub fn parse_query(input: &str) -> Result<Query, ParseError> {
    let mut parser = Parser::new(input);
    parser.parse()
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn parse(&mut self) -> Result<Query, ParseError> {
        let mut terms = Vec::new();

        self.skip_whitespace();
        if self.is_eof() {
            return Err(ParseError::new("empty query", 0));
        }

        let mut operator = None;
        loop {
            let mut term = self.parse_term()?;
            if let Some(op) = operator.take() {
                if term.operator != Operator::And {
                    return Err(ParseError::new(
                        "operators cannot be combined with '||'",
                        self.pos,
                    ));
                }
                term.operator = op;
            }
            terms.push(term);

            self.skip_whitespace();
            if self.is_eof() {
                break;
            }

            if self.peek() == Some(',') {
                self.advance();
            } else if self.check_str("||") {
                self.advance();
                self.advance();
                operator = Some(Operator::Or);
            } else {
                return Err(ParseError::new("expected ',' or '||'", self.pos));
            }

            self.skip_whitespace();
            if self.is_eof() {
                return Err(ParseError::new("expected term", self.pos));
            }
        }

        Ok(Query { terms })
    }

    fn parse_term(&mut self) -> Result<Term, ParseError> {
        self.skip_whitespace();

        let operator = match self.peek() {
            Some('!') => {
                self.advance();
                Operator::Not
            }
            Some('?') => {
                self.advance();
                Operator::Optional
            }
            _ => Operator::And,
        };

        self.skip_whitespace();

        // (Rel, Tgt) shorthand
        if self.peek() == Some('(') {
            self.advance();
            let predicate = self.parse_ref()?;
            self.expect(',', "expected ',' in pair")?;
            let target = self.parse_ref()?;
            self.expect(')', "expected ')' in pair")?;
            return Ok(Term {
                operator,
                predicate,
                source: Ident::this(),
                target: Some(target),
            });
        }

        let predicate = self.parse_ref()?;
        let mut term = Term {
            operator,
            predicate,
            source: Ident::this(),
            target: None,
        };

        if self.peek() == Some('(') {
            self.advance();
            term.source = self.parse_ref()?;
            self.skip_whitespace();
            if self.peek() == Some(',') {
                self.advance();
                term.target = Some(self.parse_ref()?);
            }
            self.expect(')', "expected ')' after term arguments")?;
        }

        Ok(term)
    }

    fn parse_ref(&mut self) -> Result<Ident, ParseError> {
        self.skip_whitespace();
        match self.peek() {
            Some('*') => {
                self.advance();
                Ok(Ident::Wildcard)
            }
            Some('$') => {
                self.advance();
                let name = self.parse_identifier()?;
                if name.eq_ignore_ascii_case(THIS_VAR) {
                    Ok(Ident::this())
                } else {
                    Ok(Ident::Var(name))
                }
            }
            _ => {
                let name = self.parse_identifier()?;
                if name == "_" {
                    Ok(Ident::Any)
                } else {
                    Ok(Ident::Name(name))
                }
            }
        }
    }

    fn parse_identifier(&mut self) -> Result<String, ParseError> {
        let mut ident = String::new();

        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' || c == '.' {
                ident.push(c);
                self.advance();
            } else {
                break;
            }
        }

        if ident.is_empty() {
            return Err(ParseError::new("expected identifier", self.pos));
        }

        Ok(ident)
    }

    fn expect(&mut self, c: char, message: &str) -> Result<(), ParseError> {
        self.skip_whitespace();
        if self.peek() != Some(c) {
            return Err(ParseError::new(message, self.pos));
        }
        self.advance();
        Ok(())
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn peek(&self) -> Option<char> {
        self.remaining().chars().next()
    }

    fn check_str(&self, s: &str) -> bool {
        self.remaining().starts_with(s)
    }

    fn remaining(&self) -> &str {
        self.input.get(self.pos..).unwrap_or("")
    }

    fn advance(&mut self) {
        if let Some(c) = self.peek() {
            self.pos += c.len_utf8();
        }
    }

    fn is_eof(&self) -> bool {
        self.pos >= self.input.len()
    }
}
