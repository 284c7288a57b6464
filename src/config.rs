//! Run configuration for ctxviz

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Result, VizError};
use crate::extractor::{ExtractorOptions, FocusMatch};
use crate::model::TokenizerOptions;
use crate::reduction::TsneConfig;
use crate::visualizer::{Rgb, DEFAULT_PALETTE};

/// Main configuration, loadable from JSON; missing fields take defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VizConfig {
    /// HuggingFace model id or a local checkpoint directory.
    /// Default: "bert-base-uncased".
    pub model_id: String,

    /// Run on CPU even when CUDA is available.
    pub force_cpu: bool,

    /// Seed for t-SNE initialization.
    /// Default: 42.
    pub seed: u64,

    /// `#RRGGBB` colors assigned to contexts in order.
    pub palette: Vec<String>,

    /// Focus-word localization strategy.
    pub focus_match: FocusMatch,

    /// Candidates ranked per requested neighbor.
    /// Default: 10.
    pub oversample_factor: usize,

    /// Neighbors embedded per forward pass.
    /// Default: 1.
    pub neighbor_batch_size: usize,

    pub mask_token: String,

    /// Prefix marking word-piece continuations.
    pub continuation_prefix: String,

    pub tsne: TsneConfig,
}

impl Default for VizConfig {
    fn default() -> Self {
        let tokenizer = TokenizerOptions::default();
        Self {
            model_id: "bert-base-uncased".to_string(),
            force_cpu: false,
            seed: 42,
            palette: DEFAULT_PALETTE.iter().map(Rgb::to_hex).collect(),
            focus_match: FocusMatch::default(),
            oversample_factor: 10,
            neighbor_batch_size: 1,
            mask_token: tokenizer.mask_token,
            continuation_prefix: tokenizer.continuation_prefix,
            tsne: TsneConfig::default(),
        }
    }
}

impl VizConfig {
    /// Load from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| VizError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Write as pretty JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.model_id.trim().is_empty() {
            return Err(VizError::Config("model_id is empty".into()));
        }
        if self.oversample_factor == 0 {
            return Err(VizError::Config("oversample_factor must be at least 1".into()));
        }
        if self.neighbor_batch_size == 0 {
            return Err(VizError::Config("neighbor_batch_size must be at least 1".into()));
        }
        if self.tsne.perplexity <= 0.0 {
            return Err(VizError::Config("tsne.perplexity must be positive".into()));
        }
        Ok(())
    }

    pub fn tokenizer_options(&self) -> TokenizerOptions {
        TokenizerOptions {
            mask_token: self.mask_token.clone(),
            continuation_prefix: self.continuation_prefix.clone(),
        }
    }

    pub fn extractor_options(&self) -> ExtractorOptions {
        ExtractorOptions {
            focus_match: self.focus_match,
            oversample_factor: self.oversample_factor,
            neighbor_batch_size: self.neighbor_batch_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = VizConfig::default();
        assert_eq!(config.model_id, "bert-base-uncased");
        assert_eq!(config.seed, 42);
        assert_eq!(config.palette.len(), 6);
        assert_eq!(config.extractor_options(), ExtractorOptions::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"focus_match": "subword_span", "tsne": {{"perplexity": 5.0}}}}"#
        )
        .unwrap();

        let config = VizConfig::load(file.path()).unwrap();
        assert_eq!(config.focus_match, FocusMatch::SubwordSpan);
        assert_eq!(config.tsne.perplexity, 5.0);
        assert_eq!(config.tsne.max_iter, 1000);
        assert_eq!(config.oversample_factor, 10);
    }

    #[test]
    fn test_invalid_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"neighbor_batch_size": 0}}"#).unwrap();
        assert!(matches!(
            VizConfig::load(file.path()),
            Err(VizError::Config(_))
        ));
    }

    #[test]
    fn test_save_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = VizConfig {
            force_cpu: true,
            ..Default::default()
        };
        config.save(&path).unwrap();
        assert_eq!(VizConfig::load(&path).unwrap(), config);
    }
}
