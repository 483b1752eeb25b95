//! Parser for output specification strings.
//!
//! A single output is written `id.property`, several outputs of one callback
//! as `..id1.prop1...id2.prop2..`. Object ids are JSON (`{"type":"row","index":["MATCH"]}.value`)
//! and `@tag` after the property marks an output that may also be set by other
//! callbacks.

use chumsky::prelude::*;

use crate::error::SpanMessage;

pub type Span = SimpleSpan;
pub type ParseError<'src> = Rich<'src, char, Span>;

#[derive(Debug, Clone, PartialEq)]
pub struct OutputTarget<'src> {
    pub id: &'src str,
    pub property: &'src str,
    pub duplicate_tag: Option<&'src str>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputSpec<'src> {
    /// Written in the `..a.b...c.d..` form, even with one target.
    pub multi: bool,
    pub targets: Vec<OutputTarget<'src>>,
}

pub fn output_spec<'src>() -> impl Parser<'src, &'src str, OutputSpec<'src>, extra::Err<ParseError<'src>>> {
    let object_id = none_of('}')
        .repeated()
        .delimited_by(just('{'), just('}'))
        .to_slice();

    let plain_id = none_of(".{@").repeated().at_least(1).to_slice();

    let property = any()
        .filter(|character: &char| {
            character.is_ascii_alphanumeric() || *character == '_' || *character == '-'
        })
        .repeated()
        .at_least(1)
        .to_slice();

    let duplicate_tag = just('@').ignore_then(none_of('.').repeated().at_least(1).to_slice());

    let target = choice((object_id, plain_id))
        .then_ignore(just('.'))
        .then(property)
        .then(duplicate_tag.or_not())
        .map_with(|((id, property), duplicate_tag), extra| OutputTarget {
            id,
            property,
            duplicate_tag,
            span: extra.span(),
        });

    let multi = target
        .clone()
        .separated_by(just("..."))
        .at_least(1)
        .collect::<Vec<_>>()
        .delimited_by(just(".."), just(".."))
        .map(|targets| OutputSpec { multi: true, targets });

    let single = target.map(|target| OutputSpec {
        multi: false,
        targets: vec![target],
    });

    choice((multi, single)).then_ignore(end())
}

pub fn parse_output_spec(text: &str) -> Result<OutputSpec<'_>, Vec<ParseError<'_>>> {
    output_spec().parse(text).into_result()
}

/// Owned form of parse errors, for storing in `GraphError`.
pub fn span_messages(errors: &[ParseError<'_>]) -> Vec<SpanMessage> {
    errors
        .iter()
        .map(|error| SpanMessage {
            span: error.span().into_range(),
            message: error.to_string(),
        })
        .collect()
}
