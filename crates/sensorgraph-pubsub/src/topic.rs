//! Topic compilation.
//!
//! Grammar (after an optional leading `/` and version prefix):
//!
//! ```text
//! topic    := segment ('/' segment)*
//! segment  := name ('(' key ')')?
//! key      := digits | "'" (char | "''")* "'"
//! ```
//!
//! The first segment must be an addressable entity set with a key. Every
//! following segment is resolved against the type reached so far:
//!
//! - a relation with a key moves the address to that entity (`Direct`);
//! - a relation without a key asks for every related entity (`Related`) and
//!   may only be followed by a property;
//! - a property must be the last segment and wraps the address (`Property`).
//!
//! Identifiers of key-addressed sets are numbers and are stored in canonical
//! form; external identifiers are kept as written.

use crate::error::TopicError;
use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::{alpha1, alphanumeric1, char, digit1, none_of},
    combinator::{all_consuming, map, opt, recognize, value},
    multi::{many0, separated_list1},
    sequence::{delimited, pair},
    IResult,
};
use sensorgraph_query::CompileError;
use sensorgraph_schema::{EntityType, IdentifierField, Registry};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Patterns
// ============================================================================

/// One addressed entity: `Things(52)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DirectAddress {
    pub entity_type: String,
    pub set_name: String,
    pub id: String,
}

/// Every `wanted_type` entity related to an addressed source:
/// `Things(52)/Locations`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelatedAddress {
    pub source_type: String,
    pub source_set: String,
    pub source_id: String,
    pub relation: String,
    pub wanted_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Address {
    Direct(DirectAddress),
    Related(RelatedAddress),
}

impl Address {
    pub fn wanted_type(&self) -> &str {
        match self {
            Address::Direct(d) => &d.entity_type,
            Address::Related(r) => &r.wanted_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TopicPattern {
    Direct(DirectAddress),
    Related(RelatedAddress),
    Property { address: Address, property: String },
}

impl TopicPattern {
    /// Entity type an event must have to match.
    pub fn wanted_type(&self) -> &str {
        match self {
            TopicPattern::Direct(d) => &d.entity_type,
            TopicPattern::Related(r) => &r.wanted_type,
            TopicPattern::Property { address, .. } => address.wanted_type(),
        }
    }

    /// The entity addressing part, without any property segment.
    pub fn address(&self) -> Address {
        match self {
            TopicPattern::Direct(d) => Address::Direct(d.clone()),
            TopicPattern::Related(r) => Address::Related(r.clone()),
            TopicPattern::Property { address, .. } => address.clone(),
        }
    }

    pub fn property(&self) -> Option<&str> {
        match self {
            TopicPattern::Property { property, .. } => Some(property),
            _ => None,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Direct(d) => write!(f, "{}({})", d.set_name, d.id),
            Address::Related(r) => write!(f, "{}({})/{}", r.source_set, r.source_id, r.relation),
        }
    }
}

impl fmt::Display for TopicPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopicPattern::Direct(d) => {
                write!(f, "direct {} {}", d.entity_type, Address::Direct(d.clone()))
            }
            TopicPattern::Related(r) => {
                write!(f, "related {} {}", r.wanted_type, Address::Related(r.clone()))
            }
            TopicPattern::Property { address, property } => write!(
                f,
                "property {}.{property} {address}",
                address.wanted_type()
            ),
        }
    }
}

// ============================================================================
// Segment parser
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
struct Segment {
    name: String,
    key: Option<String>,
}

fn name(input: &str) -> IResult<&str, &str> {
    recognize(pair(alpha1, many0(alt((alphanumeric1, tag("_"))))))(input)
}

fn quoted(input: &str) -> IResult<&str, String> {
    delimited(
        char('\''),
        map(
            many0(alt((value('\'', tag("''")), none_of("'")))),
            |chars: Vec<char>| chars.into_iter().collect(),
        ),
        char('\''),
    )(input)
}

fn key(input: &str) -> IResult<&str, String> {
    alt((map(digit1, str::to_string), quoted))(input)
}

fn segment(input: &str) -> IResult<&str, Segment> {
    map(
        pair(name, opt(delimited(char('('), key, char(')')))),
        |(name, key)| Segment {
            name: name.to_string(),
            key,
        },
    )(input)
}

fn segments(input: &str) -> IResult<&str, Vec<Segment>> {
    separated_list1(char('/'), segment)(input)
}

// ============================================================================
// Compiler
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct TopicCompiler<'a> {
    registry: &'a Registry,
    prefixes: &'a [String],
}

impl<'a> TopicCompiler<'a> {
    pub fn new(registry: &'a Registry, prefixes: &'a [String]) -> Self {
        Self { registry, prefixes }
    }

    pub fn compile(&self, topic: &str) -> Result<TopicPattern, TopicError> {
        if topic.contains('?') {
            return Err(TopicError::malformed(
                topic,
                "query options are not part of the topic path",
            ));
        }
        let body = self.strip_prefix(topic.strip_prefix('/').unwrap_or(topic));
        if body.is_empty() {
            return Err(TopicError::malformed(topic, "empty topic"));
        }
        let parsed = match all_consuming(segments)(body) {
            Ok((_, parsed)) => parsed,
            Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
                return Err(TopicError::malformed(
                    topic,
                    format!("unexpected input at `{}`", e.input),
                ))
            }
            Err(nom::Err::Incomplete(_)) => {
                return Err(TopicError::malformed(topic, "incomplete topic"))
            }
        };
        self.structure(topic, parsed)
    }

    fn strip_prefix<'t>(&self, path: &'t str) -> &'t str {
        for prefix in self.prefixes {
            if let Some(rest) = path.strip_prefix(prefix.as_str()) {
                if let Some(rest) = rest.strip_prefix('/') {
                    return rest;
                }
                if rest.is_empty() {
                    return rest;
                }
            }
        }
        path
    }

    fn structure(&self, topic: &str, parsed: Vec<Segment>) -> Result<TopicPattern, TopicError> {
        let mut iter = parsed.into_iter().peekable();
        let first = iter
            .next()
            .ok_or_else(|| TopicError::malformed(topic, "empty topic"))?;
        let root = self.registry.by_set(&first.name).ok_or_else(|| {
            TopicError::malformed(topic, format!("`{}` is not an entity set", first.name))
        })?;
        let id = first.key.ok_or_else(|| {
            TopicError::malformed(topic, format!("`{}` needs an identifier", first.name))
        })?;
        let id = identifier(topic, root, id)?;

        let mut current: &EntityType = root;
        let mut direct = DirectAddress {
            entity_type: root.name.clone(),
            set_name: root.set_name.clone(),
            id,
        };
        let mut related: Option<RelatedAddress> = None;

        while let Some(seg) = iter.next() {
            let is_last = iter.peek().is_none();
            let relation = current.relation(&seg.name);
            let attribute = current.attribute(&seg.name);
            match (relation, attribute) {
                (Some(_), Some(_)) => {
                    return Err(TopicError::Ambiguous {
                        topic: topic.to_string(),
                        segment: seg.name,
                    })
                }
                (Some(relation), None) => {
                    if related.is_some() {
                        return Err(TopicError::malformed(
                            topic,
                            format!("`{}` follows a segment without identifier", seg.name),
                        ));
                    }
                    let target = self.registry.entity(&relation.target).ok_or_else(|| {
                        CompileError::UnknownEntityType {
                            name: relation.target.clone(),
                        }
                    })?;
                    match seg.key {
                        Some(id) => {
                            direct = DirectAddress {
                                entity_type: target.name.clone(),
                                set_name: target.set_name.clone(),
                                id: identifier(topic, target, id)?,
                            };
                        }
                        None => {
                            related = Some(RelatedAddress {
                                source_type: direct.entity_type.clone(),
                                source_set: direct.set_name.clone(),
                                source_id: direct.id.clone(),
                                relation: relation.name.clone(),
                                wanted_type: target.name.clone(),
                            });
                        }
                    }
                    current = target;
                }
                (None, Some(attribute)) => {
                    if seg.key.is_some() {
                        return Err(TopicError::malformed(
                            topic,
                            format!("property `{}` cannot carry an identifier", seg.name),
                        ));
                    }
                    if !is_last {
                        return Err(TopicError::malformed(
                            topic,
                            format!("property `{}` must be the last segment", seg.name),
                        ));
                    }
                    let address = match related {
                        Some(r) => Address::Related(r),
                        None => Address::Direct(direct),
                    };
                    return Ok(TopicPattern::Property {
                        address,
                        property: attribute.name.clone(),
                    });
                }
                (None, None) => {
                    return Err(CompileError::UnknownProperty {
                        entity_type: current.name.clone(),
                        property: seg.name,
                    }
                    .into())
                }
            }
        }

        Ok(match related {
            Some(r) => TopicPattern::Related(r),
            None => TopicPattern::Direct(direct),
        })
    }
}

/// Canonical form of an addressed identifier. Storage keys compare as
/// numbers, so `Things(052)` and `Things(52)` address the same entity.
fn identifier(topic: &str, ty: &EntityType, raw: String) -> Result<String, TopicError> {
    match ty.identifier {
        IdentifierField::Key => raw.parse::<u32>().map(|key| key.to_string()).map_err(|_| {
            TopicError::malformed(
                topic,
                format!("`{}` is keyed by number, not `{raw}`", ty.set_name),
            )
        }),
        IdentifierField::External { .. } => Ok(raw),
    }
}
