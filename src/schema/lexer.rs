//! Tokenizer for generator column specifications.

use chumsky::prelude::*;

use super::{SchemaItem, SchemaToken};
use crate::error::{Error, Result};

/// Create a parser for a comma-separated, parenthesis-nested column
/// specification.
///
/// Words are runs of characters other than whitespace, parentheses, commas
/// and double quotes; `"..."` quotes a word verbatim. Inside parentheses a
/// comma is kept as the atom `","` rather than ending the item.
pub fn schema_parser<'src>(
) -> impl Parser<'src, &'src str, Vec<SchemaItem>, extra::Err<Rich<'src, char>>> {
    let word = any()
        .filter(|c: &char| !c.is_whitespace() && !matches!(c, '(' | ')' | ',' | '"'))
        .repeated()
        .at_least(1)
        .to_slice()
        .map(|s: &str| SchemaToken::Atom(s.to_string()));

    let quoted = just('"')
        .ignore_then(none_of('"').repeated().to_slice())
        .then_ignore(just('"'))
        .map(|s: &str| SchemaToken::Atom(s.to_string()));

    let token = recursive(|token| {
        let comma = just(',').to(SchemaToken::Atom(",".to_string()));

        let group = token
            .or(comma)
            .padded()
            .repeated()
            .collect::<Vec<_>>()
            .delimited_by(just('('), just(')'))
            .map(SchemaToken::Group);

        choice((group, quoted, word))
    });

    let item = token.padded().repeated().at_least(1).collect::<Vec<_>>();

    item.separated_by(just(','))
        .collect::<Vec<_>>()
        .padded()
        .then_ignore(end())
}

/// Tokenize a column specification into schema items.
///
/// An empty or all-whitespace specification yields no items; whether that
/// is acceptable is up to the metamodel.
pub fn tokenize(source: &str) -> Result<Vec<SchemaItem>> {
    let (items, errs) = schema_parser().parse(source).into_output_errors();

    if !errs.is_empty() {
        let message = errs
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        return Err(Error::schema(message));
    }

    Ok(items.unwrap_or_default())
}
