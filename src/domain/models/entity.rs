//! Entity domain model.
//!
//! Entities are the characters, locations and props discovered in source
//! material. Extraction yields [`ExtractedEntity`] candidates; a reviewer
//! turns them into [`ConfirmedEntity`] values carrying a [`CanonicalTag`].

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;

use crate::domain::errors::{DomainError, DomainResult};

/// Closed set of entity classifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Character,
    Location,
    Prop,
}

impl EntityType {
    pub const ALL: [EntityType; 3] = [Self::Character, Self::Location, Self::Prop];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Character => "character",
            Self::Location => "location",
            Self::Prop => "prop",
        }
    }

    /// Prefix used in canonical tags.
    pub fn tag_prefix(&self) -> &'static str {
        match self {
            Self::Character => "CHAR",
            Self::Location => "LOC",
            Self::Prop => "PROP",
        }
    }

    pub fn from_tag_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "CHAR" => Some(Self::Character),
            "LOC" => Some(Self::Location),
            "PROP" => Some(Self::Prop),
            _ => None,
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "character" | "characters" | "char" => Some(Self::Character),
            "location" | "locations" | "loc" => Some(Self::Location),
            "prop" | "props" => Some(Self::Prop),
            _ => None,
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable `PREFIX_UPPER_SNAKE` identifier of a confirmed entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CanonicalTag {
    entity_type: EntityType,
    value: String,
}

impl CanonicalTag {
    /// Format a tag from a free-form name.
    ///
    /// Whitespace, `-` and `_` runs become one underscore; other punctuation
    /// and non-ASCII characters are dropped.
    pub fn from_name(entity_type: EntityType, name: &str) -> DomainResult<Self> {
        let mut body = String::with_capacity(name.len());
        for c in name.chars() {
            if c.is_ascii_alphanumeric() {
                body.push(c.to_ascii_uppercase());
            } else if (c.is_whitespace() || c == '-' || c == '_') && !body.is_empty() && !body.ends_with('_') {
                body.push('_');
            }
        }
        let body = body.trim_end_matches('_');
        if body.is_empty() {
            return Err(DomainError::InvalidTag(format!(
                "name {name:?} has no taggable characters"
            )));
        }
        Ok(Self {
            entity_type,
            value: format!("{}_{}", entity_type.tag_prefix(), body),
        })
    }

    /// Validate an existing tag string.
    pub fn parse(tag: &str) -> DomainResult<Self> {
        let invalid = || DomainError::InvalidTag(tag.to_string());
        let (prefix, body) = tag.split_once('_').ok_or_else(invalid)?;
        let entity_type = EntityType::from_tag_prefix(prefix).ok_or_else(invalid)?;

        let well_formed = !body.is_empty()
            && !body.starts_with('_')
            && !body.ends_with('_')
            && !body.contains("__")
            && body
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_');
        if !well_formed {
            return Err(invalid());
        }

        Ok(Self {
            entity_type,
            value: tag.to_string(),
        })
    }

    pub fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// `CHAR_WANG_JUN` renders as `Wang Jun`.
    pub fn display_name(&self) -> String {
        let body = &self.value[self.entity_type.tag_prefix().len() + 1..];
        body.split('_')
            .map(|word| {
                let mut chars = word.chars();
                chars.next().map_or_else(String::new, |first| {
                    first.to_string() + &chars.as_str().to_lowercase()
                })
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for CanonicalTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

impl TryFrom<String> for CanonicalTag {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<CanonicalTag> for String {
    fn from(tag: CanonicalTag) -> Self {
        tag.value
    }
}

/// Find every well-formed tag mentioned in `text`, bracketed or bare.
///
/// Matching is case-insensitive; results are uppercased and deduplicated in
/// order of first appearance.
pub fn scan_tags(text: &str) -> Vec<CanonicalTag> {
    let mut seen = HashSet::new();
    text.split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter_map(|token| CanonicalTag::parse(token.trim_matches('_').to_ascii_uppercase().as_str()).ok())
        .filter(|tag| seen.insert(tag.clone()))
        .collect()
}

/// One name reported by a single extraction attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawCandidate {
    pub name: String,
    #[serde(rename = "type")]
    pub suggested_type: EntityType,
}

impl RawCandidate {
    pub fn new(name: impl Into<String>, suggested_type: EntityType) -> Self {
        Self {
            name: name.into(),
            suggested_type,
        }
    }
}

/// Entity produced by consensus extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedEntity {
    /// Display form, the most frequent exact spelling
    pub name: String,
    pub suggested_type: EntityType,
    pub confidence: f64,
    pub source_attempts: BTreeSet<usize>,
    /// Every distinct spelling seen for this entity
    pub variants: Vec<String>,
    pub type_votes: BTreeMap<EntityType, usize>,
    /// Attempts disagreed on the type
    pub type_conflict: bool,
    pub canonical_tag: Option<CanonicalTag>,
}

impl ExtractedEntity {
    /// Tag this entity would receive if confirmed unchanged.
    pub fn proposed_tag(&self) -> DomainResult<CanonicalTag> {
        CanonicalTag::from_name(self.suggested_type, &self.name)
    }
}

/// Entity accepted by a reviewer. Passed to later jobs by value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmedEntity {
    pub name: String,
    pub entity_type: EntityType,
    pub tag: CanonicalTag,
}

/// A reviewer's verdict on one extracted entity.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum EntityDecision {
    #[default]
    Accept,
    /// Accept with corrections; `None` keeps the extracted value
    Amend {
        name: Option<String>,
        entity_type: Option<EntityType>,
        tag: Option<String>,
    },
    Reject,
}

/// Accumulates reviewer decisions into a set of uniquely tagged entities.
#[derive(Debug, Clone, Default)]
pub struct EntityConfirmation {
    confirmed: Vec<ConfirmedEntity>,
    rejected: Vec<String>,
}

impl EntityConfirmation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a decision. Returns the confirmed entity, or `None` on reject.
    pub fn decide(
        &mut self,
        entity: &ExtractedEntity,
        decision: EntityDecision,
    ) -> DomainResult<Option<&ConfirmedEntity>> {
        let (name, entity_type, tag) = match decision {
            EntityDecision::Reject => {
                self.rejected.push(entity.name.clone());
                return Ok(None);
            }
            EntityDecision::Accept => (entity.name.clone(), entity.suggested_type, None),
            EntityDecision::Amend {
                name,
                entity_type,
                tag,
            } => (
                name.unwrap_or_else(|| entity.name.clone()),
                entity_type.unwrap_or(entity.suggested_type),
                tag,
            ),
        };
        self.add(name, entity_type, tag.as_deref()).map(Some)
    }

    /// Add an entity the extraction missed.
    pub fn add(
        &mut self,
        name: impl Into<String>,
        entity_type: EntityType,
        tag: Option<&str>,
    ) -> DomainResult<&ConfirmedEntity> {
        let name = name.into();
        let tag = match tag {
            Some(explicit) => {
                let parsed = CanonicalTag::parse(explicit)?;
                if parsed.entity_type() != entity_type {
                    return Err(DomainError::InvalidTag(format!(
                        "{explicit} does not carry the {} prefix",
                        entity_type.tag_prefix()
                    )));
                }
                parsed
            }
            None => CanonicalTag::from_name(entity_type, &name)?,
        };

        if self.confirmed.iter().any(|e| e.tag == tag) {
            return Err(DomainError::DuplicateTag(tag.to_string()));
        }

        self.confirmed.push(ConfirmedEntity {
            name,
            entity_type,
            tag,
        });
        Ok(&self.confirmed[self.confirmed.len() - 1])
    }

    pub fn confirmed(&self) -> &[ConfirmedEntity] {
        &self.confirmed
    }

    pub fn rejected(&self) -> &[String] {
        &self.rejected
    }

    pub fn into_entities(self) -> Vec<ConfirmedEntity> {
        self.confirmed
    }
}
