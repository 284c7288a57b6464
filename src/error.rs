//! Error types for ctxviz

use thiserror::Error;

/// Errors raised while extracting, reducing or plotting embeddings
#[derive(Error, Debug)]
pub enum VizError {
    /// Tokenizer or model weights could not be loaded. Fatal for the run.
    #[error("Failed to load model '{model_id}': {reason}")]
    ModelLoad { model_id: String, reason: String },

    /// The focus word could not be located among a sentence's tokens.
    #[error("Focus word '{word}' not found in sentence: {sentence}")]
    FocusWordNotFound { word: String, sentence: String },

    /// Reduction technique name is not one of the supported methods.
    #[error("Unsupported method: {0}. Use 'pca' or 'tsne'.")]
    UnsupportedMethod(String),

    /// More contexts than palette entries.
    #[error("Insufficient colors: {needed} contexts but only {available} palette entries")]
    InsufficientColors { needed: usize, available: usize },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Vectors in one reduction call have different lengths.
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Tokenization error: {0}")]
    Tokenization(String),

    #[error("Inference error: {0}")]
    Inference(#[from] candle_core::Error),

    #[error("Reduction error: {0}")]
    Reduction(String),

    #[error("Render error: {0}")]
    Render(String),

    #[error("Invalid color '{0}': expected #RRGGBB")]
    InvalidColor(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, VizError>;

impl VizError {
    pub(crate) fn model_load(model_id: &str, reason: impl std::fmt::Display) -> Self {
        VizError::ModelLoad {
            model_id: model_id.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl From<linfa_reduction::ReductionError> for VizError {
    fn from(err: linfa_reduction::ReductionError) -> Self {
        VizError::Reduction(err.to_string())
    }
}

impl From<linfa_tsne::TSneError> for VizError {
    fn from(err: linfa_tsne::TSneError) -> Self {
        VizError::Reduction(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = VizError::UnsupportedMethod("umap".into());
        assert_eq!(err.to_string(), "Unsupported method: umap. Use 'pca' or 'tsne'.");

        let err = VizError::FocusWordNotFound {
            word: "pool".into(),
            sentence: "I went swimming.".into(),
        };
        assert!(err.to_string().contains("'pool'"));
        assert!(err.to_string().contains("I went swimming."));
    }
}
