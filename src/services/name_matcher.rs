//! Fuzzy equivalence of entity names.
//!
//! Names are compared after normalisation (lowercase, punctuation dropped,
//! `-`, `_` and whitespace folded into single spaces). Two normalised names
//! match when they are equal, when their normalised Levenshtein similarity
//! reaches the configured threshold, or when the shorter one occurs inside
//! the longer on word boundaries and is long enough to be distinctive.

use strsim::normalized_levenshtein;

#[derive(Debug, Clone, PartialEq)]
pub struct NameMatcher {
    similarity_threshold: f64,
    min_substring_len: usize,
}

impl Default for NameMatcher {
    fn default() -> Self {
        Self::new(0.85, 4)
    }
}

impl NameMatcher {
    pub fn new(similarity_threshold: f64, min_substring_len: usize) -> Self {
        Self {
            similarity_threshold: similarity_threshold.clamp(0.0, 1.0),
            min_substring_len,
        }
    }

    pub fn similarity_threshold(&self) -> f64 {
        self.similarity_threshold
    }

    /// Canonical comparison form of a name. Empty when nothing is left.
    pub fn normalize(name: &str) -> String {
        let mut out = String::with_capacity(name.len());
        let mut pending_space = false;
        for c in name.chars() {
            if c.is_alphanumeric() {
                if pending_space && !out.is_empty() {
                    out.push(' ');
                }
                pending_space = false;
                out.extend(c.to_lowercase());
            } else if c.is_whitespace() || c == '-' || c == '_' {
                pending_space = true;
            }
        }
        out
    }

    /// Compare two raw names.
    pub fn matches(&self, a: &str, b: &str) -> bool {
        self.normalized_match(&Self::normalize(a), &Self::normalize(b))
    }

    /// Compare two names already passed through [`NameMatcher::normalize`].
    pub fn normalized_match(&self, a: &str, b: &str) -> bool {
        if a.is_empty() || b.is_empty() {
            return false;
        }
        if a == b {
            return true;
        }
        if normalized_levenshtein(a, b) >= self.similarity_threshold {
            return true;
        }

        let (shorter, longer) = if a.chars().count() <= b.chars().count() {
            (a, b)
        } else {
            (b, a)
        };
        shorter.chars().count() >= self.min_substring_len
            && format!(" {longer} ").contains(&format!(" {shorter} "))
    }
}
