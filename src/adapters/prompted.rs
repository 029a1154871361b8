//! Extraction and generation providers built on a plain [`TextModel`].
//!
//! These adapters own the prompt text and response parsing; the model behind
//! them only turns a system/user prompt pair into text.

use async_trait::async_trait;
use std::fmt::Write as _;
use std::sync::Arc;

use crate::domain::models::{FieldSpec, RawCandidate};
use crate::domain::ports::{
    ExtractionInput, ExtractionProvider, GenerationContext, GenerationProvider, ProviderError, TextModel,
};
use crate::services::response_parsing::parse_candidates;

const EXTRACTION_SYSTEM: &str = "You are an entity extraction specialist for cinematic pre-production.

Extract NAMED ENTITIES from the provided text:
1. CHARACTERS: named people or clearly described individuals
2. LOCATIONS: named places and described settings
3. PROPS: named objects with story significance

Only extract entities explicitly mentioned in the text. Use the names exactly as written.

Output JSON:
{\"characters\": [{\"name\": \"...\"}], \"locations\": [{\"name\": \"...\"}], \"props\": [{\"name\": \"...\"}]}";

pub struct PromptedExtractionProvider {
    model: Arc<dyn TextModel>,
}

impl PromptedExtractionProvider {
    pub fn new(model: Arc<dyn TextModel>) -> Self {
        Self { model }
    }

    fn prompt(input: &ExtractionInput) -> String {
        let mut prompt = String::from("Extract entities from this text");
        if let Some(name) = &input.source_name {
            let _ = write!(prompt, " ({name})");
        }
        let _ = write!(prompt, ":\n---\n{}\n---\n\nOutput only valid JSON.", input.text);
        prompt
    }
}

#[async_trait]
impl ExtractionProvider for PromptedExtractionProvider {
    async fn extract_once(&self, input: &ExtractionInput) -> Result<Vec<RawCandidate>, ProviderError> {
        let response = self.model.complete(EXTRACTION_SYSTEM, &Self::prompt(input)).await?;
        let candidates = parse_candidates(&response)?;
        tracing::debug!(model = self.model.name(), candidates = candidates.len(), "extraction attempt parsed");
        Ok(candidates)
    }
}

pub struct PromptedGenerationProvider {
    model: Arc<dyn TextModel>,
}

impl PromptedGenerationProvider {
    pub fn new(model: Arc<dyn TextModel>) -> Self {
        Self { model }
    }

    fn system(spec: &FieldSpec) -> String {
        format!(
            "{}\n\nWrite between {} and {} words. Output only the text, with no heading or quotes.",
            spec.instructions, spec.word_range.min, spec.word_range.max
        )
    }

    fn prompt(spec: &FieldSpec, context: &GenerationContext) -> String {
        let mut prompt = format!("SUBJECT: {}\n", spec.category);

        if !context.facts.is_empty() {
            prompt.push_str("\nESTABLISHED FACTS:\n");
            for (key, value) in &context.facts {
                let _ = writeln!(prompt, "- {key}: {value}");
            }
        }
        if let Some(excerpt) = &context.source_excerpt {
            let _ = write!(prompt, "\nSOURCE MATERIAL EXCERPT:\n{excerpt}\n");
        }

        let label = spec.key.rsplit('.').next().unwrap_or(&spec.key).replace('_', " ");
        let _ = write!(prompt, "\nGenerate the {label}.");
        prompt
    }
}

/// Trim whitespace and one layer of wrapping quotes.
fn clean_text(text: &str) -> String {
    let text = text.trim();
    text.strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .unwrap_or(text)
        .trim()
        .to_string()
}

#[async_trait]
impl GenerationProvider for PromptedGenerationProvider {
    async fn generate_field(&self, spec: &FieldSpec, context: &GenerationContext) -> Result<String, ProviderError> {
        let response = self
            .model
            .complete(&Self::system(spec), &Self::prompt(spec, context))
            .await?;
        let text = clean_text(&response);
        if text.is_empty() {
            return Err(ProviderError::Malformed(format!("empty response for {}", spec.key)));
        }
        Ok(text)
    }
}
