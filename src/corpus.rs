//! Context sets: focus words mapped to example sentences
//!
//! File format is a JSON object `{"word": ["sentence", ...], ...}`. Words
//! keep their file order.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{Result, VizError};

/// Sentences for one focus word
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSet {
    pub word: String,
    pub sentences: Vec<String>,
}

/// Collection of context sets
#[derive(Debug, Clone, Default)]
pub struct Corpus {
    sets: Vec<ContextSet>,
}

impl Corpus {
    /// Load from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Parse the JSON object form
    pub fn from_json(content: &str) -> Result<Self> {
        let map: serde_json::Map<String, serde_json::Value> = serde_json::from_str(content)?;
        let sets = map
            .into_iter()
            .map(|(word, value)| {
                let sentences: Vec<String> = serde_json::from_value(value)?;
                Ok(ContextSet { word, sentences })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { sets })
    }

    /// Demo words whose senses differ sharply between their two sentences
    pub fn presets() -> Self {
        let set = |word: &str, sentences: [&str; 2]| ContextSet {
            word: word.to_string(),
            sentences: sentences.iter().map(|s| s.to_string()).collect(),
        };
        Self {
            sets: vec![
                set(
                    "bank",
                    [
                        "I deposited money in the bank.",
                        "The river bank was full of lush vegetation.",
                    ],
                ),
                set(
                    "pool",
                    [
                        "I had a good swim at the pool.",
                        "The questions will be drawn from the pool of available resources.",
                    ],
                ),
                set(
                    "figure",
                    [
                        "He was an important father figure in her life.",
                        "The amount stolen was a very large figure.",
                    ],
                ),
                set(
                    "work",
                    [
                        "I like this beautiful work by Andy Warhol.",
                        "Hundreds of people work in this building.",
                    ],
                ),
            ],
        }
    }

    /// Sentences for `word`
    pub fn sentences_for(&self, word: &str) -> Result<&[String]> {
        self.sets
            .iter()
            .find(|s| s.word == word)
            .map(|s| s.sentences.as_slice())
            .ok_or_else(|| {
                VizError::InvalidRequest(format!(
                    "no sentences for '{}' (available: {})",
                    word,
                    self.words().join(", ")
                ))
            })
    }

    pub fn words(&self) -> Vec<&str> {
        self.sets.iter().map(|s| s.word.as_str()).collect()
    }

    /// Write in the JSON object form
    pub fn save(&self, path: &Path) -> Result<()> {
        let map: BTreeMap<&str, &[String]> = self
            .sets
            .iter()
            .map(|s| (s.word.as_str(), s.sentences.as_slice()))
            .collect();
        std::fs::write(path, serde_json::to_string_pretty(&map)?)?;
        Ok(())
    }

    /// Number of words
    pub fn len(&self) -> usize {
        self.sets.len()
    }

    /// Check if corpus is empty
    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// Get all sets
    pub fn sets(&self) -> &[ContextSet] {
        &self.sets
    }
}
