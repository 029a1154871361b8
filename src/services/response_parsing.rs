//! Parsing of free-form model responses.

use serde_json::Value;

use crate::domain::models::{EntityType, RawCandidate};
use crate::domain::ports::ProviderError;

/// Find the JSON object in a model response.
///
/// A fenced ```` ```json ```` block wins when it parses; otherwise the span from
/// the first `{` to the last `}` is tried.
pub fn extract_json_block(text: &str) -> Option<Value> {
    const FENCE: &str = "```json";

    if let Some(start) = text.find(FENCE).map(|i| i + FENCE.len()) {
        if let Some(len) = text[start..].find("```") {
            if let Ok(value) = serde_json::from_str(text[start..start + len].trim()) {
                return Some(value);
            }
        }
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

/// Turn an extraction response into candidates.
///
/// Accepts `{"characters": [...], "locations": [...], "props": [...]}` where
/// entries are names or objects with a `name`. Blank names are skipped.
pub fn parse_candidates(text: &str) -> Result<Vec<RawCandidate>, ProviderError> {
    let value = extract_json_block(text)
        .ok_or_else(|| ProviderError::Malformed("no JSON object in response".to_string()))?;
    let object = value
        .as_object()
        .ok_or_else(|| ProviderError::Malformed("response is not a JSON object".to_string()))?;

    let mut candidates = Vec::new();
    for (key, entity_type) in [
        ("characters", EntityType::Character),
        ("locations", EntityType::Location),
        ("props", EntityType::Prop),
    ] {
        let Some(entries) = object.get(key) else {
            continue;
        };
        let entries = entries
            .as_array()
            .ok_or_else(|| ProviderError::Malformed(format!("`{key}` is not a list")))?;

        for entry in entries {
            let name = match entry {
                Value::String(name) => Some(name.as_str()),
                Value::Object(fields) => fields.get("name").and_then(Value::as_str),
                _ => None,
            };
            match name.map(str::trim) {
                Some(name) if !name.is_empty() => candidates.push(RawCandidate::new(name, entity_type)),
                _ => tracing::debug!(key, entry = %entry, "skipping unnamed entity"),
            }
        }
    }
    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fenced_block_preferred() {
        let text = "Sure! {not json}\n```json\n{\"characters\": [\"Mei\"]}\n```\nDone.";
        assert_eq!(extract_json_block(text), Some(json!({"characters": ["Mei"]})));
    }

    #[test]
    fn test_bare_object_found() {
        let text = "Here you go: {\"props\": []} hope it helps";
        assert_eq!(extract_json_block(text), Some(json!({"props": []})));
        assert_eq!(extract_json_block("no braces here"), None);
        assert_eq!(extract_json_block("} backwards {"), None);
    }

    #[test]
    fn test_parse_candidates_mixed_entries() {
        let text = r#"{
            "characters": ["Mei", {"name": "Wang Jun", "role": "rival"}, {"role": "nameless"}, "  "],
            "locations": [{"name": "The Harbor"}],
            "props": ["Jade Lantern"]
        }"#;
        let candidates = parse_candidates(text).unwrap();
        assert_eq!(
            candidates,
            vec![
                RawCandidate::new("Mei", EntityType::Character),
                RawCandidate::new("Wang Jun", EntityType::Character),
                RawCandidate::new("The Harbor", EntityType::Location),
                RawCandidate::new("Jade Lantern", EntityType::Prop),
            ]
        );
    }

    #[test]
    fn test_parse_candidates_rejects_garbage() {
        assert!(matches!(parse_candidates("I could not find any"), Err(ProviderError::Malformed(_))));
        assert!(matches!(
            parse_candidates(r#"{"characters": "Mei"}"#),
            Err(ProviderError::Malformed(_))
        ));
    }
}
