//! Query term DSL for the tessera ECS
//!
//! A string-based term language for matching entities by components and relations.
//!
//! # Syntax
//!
//! ```text
//! Position, Velocity           // Match entities with both components
//! Position, !Velocity          // Match entities with Position but NOT Velocity
//! Position, ?Velocity          // Match entities with Position, optionally Velocity
//! RelA || RelB                 // Match entities with RelA OR RelB
//! (ChildOf, $parent)           // Match pairs, binding the target to $parent
//! Likes($this, $x), Likes($x, $this)
//! ```
//!
//! # Examples
//!
//! ```
//! use tessera_dsl::{parse_query, Ident, Operator};
//!
//! let query = parse_query("Position, !Velocity, ?Health").unwrap();
//! assert_eq!(query.terms.len(), 3);
//! assert_eq!(query.terms[0].operator, Operator::And);
//! assert_eq!(query.terms[1].operator, Operator::Not);
//! assert_eq!(query.terms[2].operator, Operator::Optional);
//! assert_eq!(query.terms[0].source, Ident::this());
//! ```

mod parser;

pub use parser::{Ident, Operator, ParseError, Query, THIS_VAR, Term, parse_query};

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> Ident {
        Ident::Name(s.to_string())
    }

    fn var(s: &str) -> Ident {
        Ident::Var(s.to_string())
    }

    #[test]
    fn test_simple_query() {
        let query = parse_query("Position, Velocity").unwrap();
        assert_eq!(query.terms.len(), 2);
        assert_eq!(query.terms[0].name(), Some("Position"));
        assert_eq!(query.terms[1].name(), Some("Velocity"));
        assert!(query.terms.iter().all(|t| t.source.is_this()));
    }

    #[test]
    fn test_not_operator() {
        let query = parse_query("RelA($this), !RelB($this)").unwrap();
        assert_eq!(query.terms[0].operator, Operator::And);
        assert_eq!(query.terms[1].operator, Operator::Not);
        assert_eq!(query.terms[1].predicate, name("RelB"));
    }

    #[test]
    fn test_optional_operator() {
        let query = parse_query("Position, ?Health").unwrap();
        assert_eq!(query.terms[1].operator, Operator::Optional);
    }

    #[test]
    fn test_wildcard_and_any() {
        let query = parse_query("*").unwrap();
        assert_eq!(query.terms.len(), 1);
        assert_eq!(query.terms[0].predicate, Ident::Wildcard);

        let query = parse_query("Rel($this, _)").unwrap();
        assert_eq!(query.terms[0].target, Some(Ident::Any));
    }

    #[test]
    fn test_or_chain() {
        let query = parse_query("Tag($this), RelA($this) || RelB($this) || RelC").unwrap();
        assert_eq!(query.terms.len(), 4);
        assert_eq!(query.terms[0].operator, Operator::And);
        assert_eq!(query.terms[1].operator, Operator::And);
        assert_eq!(query.terms[2].operator, Operator::Or);
        assert_eq!(query.terms[3].operator, Operator::Or);
    }

    #[test]
    fn test_pair_shorthand() {
        let query = parse_query("(ChildOf, $parent)").unwrap();
        let term = &query.terms[0];
        assert_eq!(term.predicate, name("ChildOf"));
        assert!(term.source.is_this());
        assert_eq!(term.target, Some(var("parent")));
    }

    #[test]
    fn test_explicit_source_and_target() {
        let query = parse_query("Tag($this, $x), !$x($this, TgtA)").unwrap();
        assert_eq!(query.terms[0].target, Some(var("x")));
        assert_eq!(query.terms[1].predicate, var("x"));
        assert_eq!(query.terms[1].target, Some(name("TgtA")));
        assert_eq!(query.variables(), vec!["this", "x"]);
    }

    #[test]
    fn test_this_is_case_insensitive() {
        let query = parse_query("Foo($This)").unwrap();
        assert!(query.terms[0].source.is_this());
    }

    #[test]
    fn test_fixed_source() {
        let query = parse_query("Position(Game)").unwrap();
        assert_eq!(query.terms[0].source, name("Game"));
        assert!(query.variables().is_empty());
    }

    #[test]
    fn test_display_roundtrip() {
        let query = parse_query("A, !B($x), C || (R, *)").unwrap();
        assert_eq!(query.to_string(), "A($this), !B($x), C($this) || R($this, *)");
        assert_eq!(parse_query(&query.to_string()).unwrap(), query);
    }

    #[test]
    fn test_whitespace_handling() {
        let query = parse_query("  Position  ,  Velocity (  $this  )  ").unwrap();
        assert_eq!(query.terms.len(), 2);
        assert_eq!(query.terms[0].name(), Some("Position"));
        assert_eq!(query.terms[1].name(), Some("Velocity"));
    }

    #[test]
    fn test_errors() {
        assert_eq!(parse_query("").unwrap_err().message, "empty query");
        assert_eq!(parse_query("A,").unwrap_err().message, "expected term");
        assert_eq!(parse_query("A B").unwrap_err().position, 2);
        assert!(parse_query("A(").is_err());
        assert!(parse_query("(A B)").is_err());
        assert!(parse_query("A || !B").is_err());
    }
}
