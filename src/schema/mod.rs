//! Generator schema tokens.
//!
//! A generator-creation command carries a column specification such as
//!
//! ```text
//! age numerical, city categorical, income numerical
//! ```
//!
//! The host tokenizes it into a list of [`SchemaItem`]s, one per
//! comma-separated entry. Each item is a list of [`SchemaToken`]s: atoms for
//! whitespace-separated words and groups for parenthesized sublists. Commas
//! inside a group do not end the item; they stay in the group as the atom
//! `","`.
//!
//! Tokens are passed to the metamodel uninterpreted; only the metamodel
//! knows which words are column names, statistical types or options.

mod lexer;

pub use lexer::tokenize;

use std::fmt;

/// One comma-separated entry of a generator schema.
pub type SchemaItem = Vec<SchemaToken>;

/// A schema token: a word or a parenthesized list of tokens.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SchemaToken {
    Atom(String),
    Group(Vec<SchemaToken>),
}

impl SchemaToken {
    /// Create an atom token.
    pub fn atom(s: impl Into<String>) -> Self {
        Self::Atom(s.into())
    }

    /// The atom's text, or `None` for a group.
    pub fn as_atom(&self) -> Option<&str> {
        match self {
            Self::Atom(s) => Some(s),
            Self::Group(_) => None,
        }
    }

    /// The group's tokens, or `None` for an atom.
    pub fn as_group(&self) -> Option<&[SchemaToken]> {
        match self {
            Self::Atom(_) => None,
            Self::Group(tokens) => Some(tokens),
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(self, Self::Group(_))
    }
}

impl fmt::Display for SchemaToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Atom(s) if needs_quotes(s) => write!(f, "\"{}\"", s),
            Self::Atom(s) => write!(f, "{}", s),
            Self::Group(tokens) => {
                write!(f, "(")?;
                write_tokens(f, tokens)?;
                write!(f, ")")
            }
        }
    }
}

/// Render a schema back to its source form.
pub fn render(schema: &[SchemaItem]) -> String {
    schema
        .iter()
        .map(|item| {
            item.iter()
                .map(|t| t.to_string())
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn write_tokens(f: &mut fmt::Formatter<'_>, tokens: &[SchemaToken]) -> fmt::Result {
    let mut first = true;
    for token in tokens {
        if token.as_atom() == Some(",") {
            write!(f, ",")?;
            continue;
        }
        if !first {
            write!(f, " ")?;
        }
        write!(f, "{}", token)?;
        first = false;
    }
    Ok(())
}

fn needs_quotes(s: &str) -> bool {
    s != ","
        && (s.is_empty()
            || s.chars()
                .any(|c| c.is_whitespace() || matches!(c, '(' | ')' | ',' | '"')))
}
