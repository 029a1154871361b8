//! Canonical tag CLI commands.

use anyhow::Result;
use clap::Args;

use crate::cli::output::{output, CommandOutput};
use crate::domain::models::world_bible::entity_fields;
use crate::domain::models::{CanonicalTag, ConfirmedEntity, EntityType};

#[derive(Args, Debug)]
pub struct TagArgs {
    /// Entity type: character, location or prop
    #[arg(value_parser = parse_entity_type)]
    pub entity_type: EntityType,

    /// Entity name, e.g. "Wang Jun"
    #[arg(required = true, num_args = 1..)]
    pub name: Vec<String>,

    /// Also list the world-bible fields generated for this entity
    #[arg(long)]
    pub fields: bool,
}

pub fn parse_entity_type(s: &str) -> Result<EntityType, String> {
    EntityType::from_str(s).ok_or_else(|| format!("unknown entity type {s:?}; expected character, location or prop"))
}

#[derive(Debug, serde::Serialize)]
pub struct TagOutput {
    pub name: String,
    pub entity_type: EntityType,
    pub tag: CanonicalTag,
    pub display_name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<TagField>,
}

#[derive(Debug, serde::Serialize)]
pub struct TagField {
    pub key: String,
    pub words: String,
}

impl CommandOutput for TagOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![
            self.tag.to_string(),
            format!("  {} \"{}\" (renders as \"{}\")", self.entity_type, self.name, self.display_name),
        ];
        for field in &self.fields {
            lines.push(format!("  {:<32} {} words", field.key, field.words));
        }
        lines.join("\n")
    }
}

pub fn execute(args: TagArgs, json_mode: bool) -> Result<()> {
    let name = args.name.join(" ");
    let tag = CanonicalTag::from_name(args.entity_type, &name)?;

    let fields = if args.fields {
        let entity = ConfirmedEntity {
            name: name.clone(),
            entity_type: args.entity_type,
            tag: tag.clone(),
        };
        entity_fields(&entity)
            .into_iter()
            .map(|spec| TagField {
                key: spec.key,
                words: spec.word_range.to_string(),
            })
            .collect()
    } else {
        Vec::new()
    };

    let out = TagOutput {
        display_name: tag.display_name(),
        name,
        entity_type: args.entity_type,
        tag,
        fields,
    };
    output(&out, json_mode);
    Ok(())
}
