//! Progressively populated records.
//!
//! A [`Record`] is a set of independently generated [`Field`]s. Each field
//! tracks its own status so that completed or hand-edited values survive
//! partial failures and later regeneration passes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};

/// Inclusive word-count bounds for generated text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordCountRange {
    pub min: usize,
    pub max: usize,
}

impl WordCountRange {
    pub const fn new(min: usize, max: usize) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, words: usize) -> bool {
        (self.min..=self.max).contains(&words)
    }

    /// How many words `words` lies outside the range.
    pub fn distance(&self, words: usize) -> usize {
        if words < self.min {
            self.min - words
        } else {
            words.saturating_sub(self.max)
        }
    }
}

impl fmt::Display for WordCountRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.min, self.max)
    }
}

/// Whitespace-delimited word count.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldStatus {
    Pending,
    Generating,
    Complete,
    /// Set by a human; only an explicit regenerate replaces it
    Edited,
    Error,
}

impl FieldStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Generating => "generating",
            Self::Complete => "complete",
            Self::Edited => "edited",
            Self::Error => "error",
        }
    }

    /// Whether `populate` should pick this field up.
    pub fn needs_generation(&self) -> bool {
        matches!(self, Self::Pending | Self::Error)
    }
}

impl fmt::Display for FieldStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static description of one generatable field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub key: String,
    pub category: String,
    /// What the generator should describe
    pub instructions: String,
    pub word_range: WordCountRange,
}

impl FieldSpec {
    pub fn new(
        key: impl Into<String>,
        category: impl Into<String>,
        instructions: impl Into<String>,
        word_range: WordCountRange,
    ) -> Self {
        Self {
            key: key.into(),
            category: category.into(),
            instructions: instructions.into(),
            word_range,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSchema {
    pub fields: Vec<FieldSpec>,
}

impl RecordSchema {
    pub fn new(fields: Vec<FieldSpec>) -> Self {
        Self { fields }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub spec: FieldSpec,
    pub value: Option<String>,
    pub status: FieldStatus,
    pub generation_attempt: u32,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Field {
    pub fn pending(spec: FieldSpec) -> Self {
        Self {
            spec,
            value: None,
            status: FieldStatus::Pending,
            generation_attempt: 0,
            last_error: None,
            updated_at: Utc::now(),
        }
    }

    pub fn key(&self) -> &str {
        &self.spec.key
    }

    pub fn category(&self) -> &str {
        &self.spec.category
    }

    pub(crate) fn set_status(&mut self, status: FieldStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

/// Field counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordProgress {
    pub total: usize,
    pub pending: usize,
    pub generating: usize,
    pub complete: usize,
    pub edited: usize,
    pub error: usize,
}

impl RecordProgress {
    /// Fields holding a usable value.
    pub fn settled(&self) -> usize {
        self.complete + self.edited
    }

    pub fn is_finished(&self) -> bool {
        self.settled() == self.total
    }

    pub fn ratio(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let ratio = self.settled() as f64 / self.total as f64;
        ratio
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: Uuid,
    pub fields: Vec<Field>,
}

impl Record {
    pub fn from_schema(schema: &RecordSchema) -> Self {
        Self {
            id: Uuid::new_v4(),
            fields: schema.fields.iter().cloned().map(Field::pending).collect(),
        }
    }

    pub fn field(&self, key: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.key() == key)
    }

    pub fn field_mut(&mut self, key: &str) -> DomainResult<&mut Field> {
        self.fields
            .iter_mut()
            .find(|f| f.key() == key)
            .ok_or_else(|| DomainError::FieldNotFound(key.to_string()))
    }

    /// Value of a field, if it has one.
    pub fn value(&self, key: &str) -> Option<&str> {
        self.field(key).and_then(|f| f.value.as_deref())
    }

    pub fn in_category<'a>(&'a self, category: &'a str) -> impl Iterator<Item = &'a Field> + 'a {
        self.fields.iter().filter(move |f| f.category() == category)
    }

    pub fn progress(&self) -> RecordProgress {
        let mut progress = RecordProgress {
            total: self.fields.len(),
            ..RecordProgress::default()
        };
        for field in &self.fields {
            match field.status {
                FieldStatus::Pending => progress.pending += 1,
                FieldStatus::Generating => progress.generating += 1,
                FieldStatus::Complete => progress.complete += 1,
                FieldStatus::Edited => progress.edited += 1,
                FieldStatus::Error => progress.error += 1,
            }
        }
        progress
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> RecordSchema {
        RecordSchema::new(vec![
            FieldSpec::new("world.setting", "world_context", "setting", WordCountRange::new(10, 24)),
            FieldSpec::new("CHAR_MEI.appearance", "CHAR_MEI", "appearance", WordCountRange::new(20, 40)),
        ])
    }

    #[test]
    fn test_word_range_distance() {
        let range = WordCountRange::new(10, 24);
        assert_eq!(range.distance(5), 5);
        assert_eq!(range.distance(10), 0);
        assert_eq!(range.distance(30), 6);
        assert!(range.contains(24));
        assert!(!range.contains(25));
    }

    #[test]
    fn test_word_count_ignores_extra_whitespace() {
        assert_eq!(word_count("  a  quiet\n\tharbor town "), 4);
        assert_eq!(word_count(""), 0);
    }

    #[test]
    fn test_record_from_schema_is_all_pending() {
        let record = Record::from_schema(&schema());
        let progress = record.progress();
        assert_eq!(progress.total, 2);
        assert_eq!(progress.pending, 2);
        assert!(!progress.is_finished());
        assert_eq!(record.in_category("CHAR_MEI").count(), 1);
    }

    #[test]
    fn test_field_lookup_errors_on_unknown_key() {
        let mut record = Record::from_schema(&schema());
        assert!(matches!(
            record.field_mut("world.weather"),
            Err(DomainError::FieldNotFound(_))
        ));
    }

    #[test]
    fn test_progress_counts_edited_as_settled() {
        let mut record = Record::from_schema(&schema());
        record.fields[0].set_status(FieldStatus::Edited);
        record.fields[1].set_status(FieldStatus::Complete);
        let progress = record.progress();
        assert!(progress.is_finished());
        assert!((progress.ratio() - 1.0).abs() < f64::EPSILON);
    }
}
