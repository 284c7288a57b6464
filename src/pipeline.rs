//! End-to-end run: extract, reduce, plot
//!
//! Requests are validated before the model is touched, so a bad technique
//! name or a palette that is too small fails without any inference.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::VizConfig;
use crate::error::{Result, VizError};
use crate::extractor::EmbeddingExtractor;
use crate::model::MaskedLanguageModel;
use crate::reduction::{DimensionalityReducer, PlotDims, ReductionMethod};
use crate::visualizer::{EmbeddingVisualizer, Figure, NeighborGroup};

/// One visualization request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VizRequest {
    /// Focus word, as it appears in each sentence
    pub word: String,
    /// Sentences each containing the word once
    pub sentences: Vec<String>,
    pub method: ReductionMethod,
    /// Neighbors kept per sentence
    pub num_neighbors: usize,
    pub plot: PlotDims,
}

impl VizRequest {
    /// Build a request from textual technique and plot names
    ///
    /// Fails with [`VizError::UnsupportedMethod`] for an unknown technique.
    pub fn new<S: Into<String>>(
        word: &str,
        sentences: impl IntoIterator<Item = S>,
        method: &str,
        num_neighbors: usize,
        plot: &str,
    ) -> Result<Self> {
        let request = Self {
            word: word.to_string(),
            sentences: sentences.into_iter().map(Into::into).collect(),
            method: method.parse()?,
            num_neighbors,
            plot: plot.parse()?,
        };
        request.validate()?;
        Ok(request)
    }

    pub fn validate(&self) -> Result<()> {
        if self.word.trim().is_empty() {
            return Err(VizError::InvalidRequest("focus word is empty".into()));
        }
        if self.sentences.is_empty() {
            return Err(VizError::InvalidRequest("no sentences given".into()));
        }
        if self.num_neighbors == 0 {
            return Err(VizError::InvalidRequest(
                "num_neighbors must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// "Focus Word: pool | 3D Viz"
    pub fn title(&self) -> String {
        format!("Focus Word: {} | {} Viz", self.word, self.plot)
    }
}

/// Run a request with the default configuration
pub fn viz<M: MaskedLanguageModel>(
    extractor: &EmbeddingExtractor<M>,
    request: &VizRequest,
) -> Result<Figure> {
    viz_with_config(extractor, request, &VizConfig::default())
}

/// Run a request: extract vectors, reduce each group, build the figure
///
/// Focus vectors are reduced together; each context's neighbor vectors are
/// reduced as their own group.
pub fn viz_with_config<M: MaskedLanguageModel>(
    extractor: &EmbeddingExtractor<M>,
    request: &VizRequest,
    config: &VizConfig,
) -> Result<Figure> {
    request.validate()?;
    let visualizer = EmbeddingVisualizer::with_palette(config.palette.as_slice())?;
    visualizer.check_palette(request.sentences.len())?;

    info!(
        "Visualizing '{}' over {} sentences ({}, {}, {} neighbors)",
        request.word,
        request.sentences.len(),
        request.method,
        request.plot,
        request.num_neighbors
    );

    let extraction = extractor.extract(
        &request.word,
        request.sentences.as_slice(),
        request.num_neighbors,
    )?;

    let reducer = DimensionalityReducer::new(request.method, request.plot)
        .with_seed(config.seed)
        .with_tsne(config.tsne.clone());

    let focus = reducer.reduce(&extraction.focus_vectors())?;

    let tokens: Vec<Vec<String>> = extraction
        .contexts
        .iter()
        .map(|c| c.neighbor_tokens())
        .collect();
    let neighbor_coords = extraction
        .contexts
        .iter()
        .map(|c| reducer.reduce(&c.neighbor_vectors()))
        .collect::<Result<Vec<_>>>()?;
    let groups: Vec<NeighborGroup> = tokens
        .iter()
        .zip(&neighbor_coords)
        .map(|(tokens, coords)| NeighborGroup {
            tokens,
            coords: coords.view(),
        })
        .collect();

    let figure = visualizer.plot_focus_and_neighbors(
        focus.view(),
        &request.sentences,
        &groups,
        &request.title(),
        request.plot,
    )?;
    info!("Figure has {} points", figure.traces.len());
    Ok(figure)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_parses_names() {
        let request = VizRequest::new("pool", ["a pool"], "PCA", 5, "3D").unwrap();
        assert_eq!(request.method, ReductionMethod::Pca);
        assert_eq!(request.plot, PlotDims::Three);
        assert_eq!(request.title(), "Focus Word: pool | 3D Viz");
    }

    #[test]
    fn test_request_rejects_unknown_method() {
        let err = VizRequest::new("pool", ["a pool"], "umap", 5, "3D").unwrap_err();
        assert!(matches!(err, VizError::UnsupportedMethod(ref m) if m == "umap"));
    }

    #[test]
    fn test_request_validation() {
        assert!(VizRequest::new("pool", Vec::<String>::new(), "pca", 5, "2D").is_err());
        assert!(VizRequest::new("", ["a pool"], "pca", 5, "2D").is_err());
        assert!(VizRequest::new("pool", ["a pool"], "pca", 0, "2D").is_err());
        assert!(VizRequest::new("pool", ["a pool"], "pca", 5, "4D").is_err());
    }
}
