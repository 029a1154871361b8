//! World-bible field schema.
//!
//! The world bible is the first progressively populated record: a block of
//! world-context fields followed by per-entity descriptions. Keys are
//! `world.<field>` or `<TAG>.<field>`; entity categories are the entity tag.

use super::entity::{ConfirmedEntity, EntityType};
use super::field::{FieldSpec, RecordSchema, WordCountRange};

pub const WORLD_CONTEXT_CATEGORY: &str = "world_context";

const CONTEXT_RANGE: WordCountRange = WordCountRange::new(10, 24);

const WORLD_CONTEXT_FIELDS: &[(&str, &str)] = &[
    ("setting", "the physical setting of the story"),
    ("time_period", "the historical era or time period"),
    ("cultural_context", "the cultural backdrop and customs"),
    ("social_structure", "the social hierarchy and power relations"),
    ("technology", "the level of technology available"),
    ("clothing_norms", "what people typically wear"),
    ("architecture", "the dominant architectural style"),
    ("color_palette", "the dominant visual color palette"),
    ("lighting", "the characteristic lighting style"),
    ("mood", "the overall mood and atmosphere"),
];

const CHARACTER_FIELDS: &[(&str, &str, WordCountRange)] = &[
    ("appearance", "the character's physical appearance", WordCountRange::new(20, 40)),
    ("clothing", "the character's typical clothing", WordCountRange::new(10, 24)),
    ("personality", "the character's key personality traits", WordCountRange::new(10, 24)),
    ("summary", "a brief summary of who the character is", WordCountRange::new(15, 24)),
];

const LOCATION_FIELDS: &[(&str, &str, WordCountRange)] = &[
    ("description", "the location as a whole", WordCountRange::new(15, 24)),
    ("view_north", "what a camera sees looking north", WordCountRange::new(10, 20)),
    ("view_east", "what a camera sees looking east", WordCountRange::new(10, 20)),
    ("view_south", "what a camera sees looking south", WordCountRange::new(10, 20)),
    ("view_west", "what a camera sees looking west", WordCountRange::new(10, 20)),
];

const PROP_FIELDS: &[(&str, &str, WordCountRange)] = &[
    ("description", "the prop's look, material and distinctive features", WordCountRange::new(10, 24)),
    ("significance", "why the prop matters to the story", WordCountRange::new(10, 20)),
];

/// Fields describing the world as a whole.
pub fn world_context_schema() -> RecordSchema {
    RecordSchema::new(
        WORLD_CONTEXT_FIELDS
            .iter()
            .map(|(name, about)| {
                FieldSpec::new(
                    format!("world.{name}"),
                    WORLD_CONTEXT_CATEGORY,
                    format!("Describe {about}."),
                    CONTEXT_RANGE,
                )
            })
            .collect(),
    )
}

/// Fields describing one confirmed entity.
pub fn entity_fields(entity: &ConfirmedEntity) -> Vec<FieldSpec> {
    let template = match entity.entity_type {
        EntityType::Character => CHARACTER_FIELDS,
        EntityType::Location => LOCATION_FIELDS,
        EntityType::Prop => PROP_FIELDS,
    };
    template
        .iter()
        .map(|(name, about, range)| {
            FieldSpec::new(
                format!("{}.{name}", entity.tag),
                entity.tag.as_str(),
                format!("Describe {about} for {}.", entity.name),
                *range,
            )
        })
        .collect()
}

/// Complete schema: world context first, then each entity in the given order.
pub fn schema_for(entities: &[ConfirmedEntity]) -> RecordSchema {
    let mut schema = world_context_schema();
    schema
        .fields
        .extend(entities.iter().flat_map(entity_fields));
    schema
}
