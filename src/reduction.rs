//! Dimensionality reduction with linfa
//!
//! Projects hidden-state vectors to 2 or 3 dimensions for plotting, either
//! linearly (PCA) or with t-SNE. Groups are often tiny (a context may keep
//! only one or two neighbors), so both methods handle small inputs
//! explicitly instead of failing.

use linfa::traits::{Fit, Predict, Transformer};
use linfa::DatasetBase;
use linfa_reduction::Pca;
use linfa_tsne::TSneParams;
use ndarray::{s, Array2};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use crate::error::{Result, VizError};

/// Supported reduction techniques
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ReductionMethod {
    /// Principal component analysis
    Pca,
    /// t-distributed stochastic neighbor embedding
    Tsne,
}

impl FromStr for ReductionMethod {
    type Err = VizError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "pca" => Ok(ReductionMethod::Pca),
            "tsne" | "t-sne" => Ok(ReductionMethod::Tsne),
            _ => Err(VizError::UnsupportedMethod(s.to_string())),
        }
    }
}

impl TryFrom<String> for ReductionMethod {
    type Error = VizError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ReductionMethod> for String {
    fn from(method: ReductionMethod) -> Self {
        method.to_string()
    }
}

impl fmt::Display for ReductionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReductionMethod::Pca => write!(f, "pca"),
            ReductionMethod::Tsne => write!(f, "tsne"),
        }
    }
}

/// Output dimensionality of the plot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PlotDims {
    Two,
    Three,
}

impl PlotDims {
    /// Number of reduced components
    pub fn n_components(&self) -> usize {
        match self {
            PlotDims::Two => 2,
            PlotDims::Three => 3,
        }
    }
}

impl FromStr for PlotDims {
    type Err = VizError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "2D" | "2" => Ok(PlotDims::Two),
            "3D" | "3" => Ok(PlotDims::Three),
            _ => Err(VizError::InvalidRequest(format!(
                "unsupported plot type '{s}', use '2D' or '3D'"
            ))),
        }
    }
}

impl TryFrom<String> for PlotDims {
    type Error = VizError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<PlotDims> for String {
    fn from(dims: PlotDims) -> Self {
        dims.to_string()
    }
}

impl fmt::Display for PlotDims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlotDims::Two => write!(f, "2D"),
            PlotDims::Three => write!(f, "3D"),
        }
    }
}

/// t-SNE hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TsneConfig {
    /// Requested perplexity, clamped per call to what the group size allows
    pub perplexity: f64,
    /// Barnes-Hut threshold; 0.0 runs exact t-SNE
    pub approx_threshold: f64,
    pub max_iter: usize,
}

impl Default for TsneConfig {
    fn default() -> Self {
        Self {
            perplexity: 30.0,
            approx_threshold: 0.0,
            max_iter: 1000,
        }
    }
}

/// Fewest points t-SNE runs on; smaller groups get the PCA layout
pub const MIN_TSNE_ITEMS: usize = 4;

/// Perplexity usable for `n_items` points, or `None` when t-SNE cannot run
///
/// t-SNE needs `n_items - 1 >= 3 * perplexity`, and a perplexity below 1
/// asks for an entropy the affinity search can never reach.
pub fn clamp_perplexity(requested: f64, n_items: usize) -> Option<f64> {
    if n_items < MIN_TSNE_ITEMS {
        return None;
    }
    let limit = (n_items - 1) as f64 / 3.0 * (1.0 - 1e-9);
    Some(requested.min(limit).max(1.0))
}

/// Projects vectors to `n_components` dimensions
#[derive(Debug, Clone)]
pub struct DimensionalityReducer {
    method: ReductionMethod,
    n_components: usize,
    seed: u64,
    tsne: TsneConfig,
}

impl DimensionalityReducer {
    /// Create a reducer; `n_components` comes from the plot dimensionality
    pub fn new(method: ReductionMethod, dims: PlotDims) -> Self {
        Self {
            method,
            n_components: dims.n_components(),
            seed: 42,
            tsne: TsneConfig::default(),
        }
    }

    /// Seed for stochastic techniques
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_tsne(mut self, tsne: TsneConfig) -> Self {
        self.tsne = tsne;
        self
    }

    pub fn method(&self) -> ReductionMethod {
        self.method
    }

    pub fn n_components(&self) -> usize {
        self.n_components
    }

    /// Reduce `(n_items, hidden_dim)` vectors to `(n_items, n_components)`
    pub fn reduce(&self, vectors: &[Vec<f32>]) -> Result<Array2<f64>> {
        let records = to_records(vectors)?;
        let n_items = records.nrows();

        // One point (or none) has no spread to project: place it at the origin
        if n_items <= 1 {
            return Ok(Array2::zeros((n_items, self.n_components)));
        }

        let reduced = match self.method {
            ReductionMethod::Pca => self.reduce_pca(records)?,
            ReductionMethod::Tsne => self.reduce_tsne(records)?,
        };
        debug_assert_eq!(reduced.dim(), (n_items, self.n_components));
        Ok(reduced)
    }

    fn reduce_pca(&self, records: Array2<f64>) -> Result<Array2<f64>> {
        let n_items = records.nrows();
        // Centered data has rank at most n_items - 1
        let available = self.n_components.min(n_items - 1).min(records.ncols());
        debug!(
            "PCA: {} items, {} of {} components",
            n_items, available, self.n_components
        );

        let mut out = Array2::zeros((n_items, self.n_components));
        if available == 0 {
            return Ok(out);
        }

        let dataset = DatasetBase::from(records.clone());
        let pca = Pca::params(available).fit(&dataset)?;
        let projected: Array2<f64> = pca.predict(&records);
        out.slice_mut(s![.., ..available]).assign(&projected);
        Ok(out)
    }

    fn reduce_tsne(&self, records: Array2<f64>) -> Result<Array2<f64>> {
        let n_items = records.nrows();
        let Some(perplexity) = clamp_perplexity(self.tsne.perplexity, n_items) else {
            debug!("t-SNE: {} items is too few, using PCA layout", n_items);
            return self.reduce_pca(records);
        };
        debug!(
            "t-SNE: {} items, perplexity {:.3}, seed {}",
            n_items, perplexity, self.seed
        );

        let rng = StdRng::seed_from_u64(self.seed);
        let embedded = TSneParams::embedding_size_with_rng(self.n_components, rng)
            .perplexity(perplexity)
            .approx_threshold(self.tsne.approx_threshold)
            .max_iter(self.tsne.max_iter)
            .transform(records)?;
        Ok(embedded)
    }
}

/// Stack vectors into an `(n, d)` matrix, checking that all rows agree on `d`
fn to_records(vectors: &[Vec<f32>]) -> Result<Array2<f64>> {
    let n_features = vectors.first().map_or(0, Vec::len);
    if let Some(bad) = vectors.iter().find(|v| v.len() != n_features) {
        return Err(VizError::DimensionMismatch {
            expected: n_features,
            actual: bad.len(),
        });
    }

    let flat: Vec<f64> = vectors
        .iter()
        .flat_map(|v| v.iter().map(|&x| f64::from(x)))
        .collect();
    Array2::from_shape_vec((vectors.len(), n_features), flat)
        .map_err(|e| VizError::Reduction(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_vectors(n: usize, dim: usize) -> Vec<Vec<f32>> {
        (0..n)
            .map(|i| {
                (0..dim)
                    .map(|j| ((i * 7 + j * 3) % 11) as f32 + (i as f32) * 0.5)
                    .collect()
            })
            .collect()
    }

    #[test]
    fn test_parse_methods() {
        assert_eq!("pca".parse::<ReductionMethod>().unwrap(), ReductionMethod::Pca);
        assert_eq!("TSNE".parse::<ReductionMethod>().unwrap(), ReductionMethod::Tsne);
        let err = "umap".parse::<ReductionMethod>().unwrap_err();
        assert!(matches!(err, VizError::UnsupportedMethod(ref m) if m == "umap"));
    }

    #[test]
    fn test_parse_plot_dims() {
        assert_eq!("3D".parse::<PlotDims>().unwrap(), PlotDims::Three);
        assert_eq!("2d".parse::<PlotDims>().unwrap().n_components(), 2);
        assert!("4D".parse::<PlotDims>().is_err());
    }

    #[test]
    fn test_clamp_perplexity() {
        assert_eq!(clamp_perplexity(30.0, 2), None);
        assert_eq!(clamp_perplexity(30.0, 3), None);
        assert_eq!(clamp_perplexity(30.0, 4), Some(1.0));
        assert_eq!(clamp_perplexity(5.0, 100), Some(5.0));
        assert_eq!(clamp_perplexity(0.2, 100), Some(1.0));
        let p = clamp_perplexity(30.0, 10).unwrap();
        assert!(p < 3.0 && 3.0 * p <= 9.0);
    }

    #[test]
    fn test_pca_shape() {
        for dims in [PlotDims::Two, PlotDims::Three] {
            let reducer = DimensionalityReducer::new(ReductionMethod::Pca, dims);
            let out = reducer.reduce(&sample_vectors(6, 16)).unwrap();
            assert_eq!(out.dim(), (6, dims.n_components()));
            assert!(out.iter().all(|x| x.is_finite()));
        }
    }

    #[test]
    fn test_pca_fewer_items_than_components() {
        let reducer = DimensionalityReducer::new(ReductionMethod::Pca, PlotDims::Three);
        let out = reducer.reduce(&sample_vectors(2, 16)).unwrap();
        assert_eq!(out.dim(), (2, 3));
        // Only one direction of spread exists between two points
        assert_eq!(out[[0, 1]], 0.0);
        assert_eq!(out[[1, 2]], 0.0);
        assert!(out[[0, 0]] != out[[1, 0]]);
    }

    #[test]
    fn test_single_item_maps_to_origin() {
        for method in [ReductionMethod::Pca, ReductionMethod::Tsne] {
            let reducer = DimensionalityReducer::new(method, PlotDims::Two);
            let out = reducer.reduce(&sample_vectors(1, 8)).unwrap();
            assert_eq!(out.dim(), (1, 2));
            assert!(out.iter().all(|&x| x == 0.0));
        }
    }

    #[test]
    fn test_empty_input() {
        let reducer = DimensionalityReducer::new(ReductionMethod::Pca, PlotDims::Three);
        assert_eq!(reducer.reduce(&[]).unwrap().dim(), (0, 3));
    }

    #[test]
    fn test_tsne_two_items() {
        let reducer = DimensionalityReducer::new(ReductionMethod::Tsne, PlotDims::Two);
        let out = reducer.reduce(&sample_vectors(2, 16)).unwrap();
        assert_eq!(out.dim(), (2, 2));
        assert!(out.iter().all(|x| x.is_finite()));
    }

    #[test]
    fn test_tsne_small_groups() {
        let reducer = DimensionalityReducer::new(ReductionMethod::Tsne, PlotDims::Three);
        for n in 2..=5 {
            let out = reducer.reduce(&sample_vectors(n, 16)).unwrap();
            assert_eq!(out.dim(), (n, 3));
            assert!(out.iter().all(|x| x.is_finite()));
        }
    }

    #[test]
    fn test_tsne_deterministic_with_seed() {
        let vectors = sample_vectors(8, 16);
        let reducer =
            DimensionalityReducer::new(ReductionMethod::Tsne, PlotDims::Three).with_seed(7);
        let a = reducer.reduce(&vectors).unwrap();
        let b = reducer.reduce(&vectors).unwrap();
        assert_eq!(a.dim(), (8, 3));
        assert_eq!(a, b);
    }

    #[test]
    fn test_ragged_input_rejected() {
        let reducer = DimensionalityReducer::new(ReductionMethod::Pca, PlotDims::Two);
        let err = reducer
            .reduce(&[vec![1.0, 2.0], vec![1.0]])
            .unwrap_err();
        assert!(matches!(
            err,
            VizError::DimensionMismatch {
                expected: 2,
                actual: 1
            }
        ));
    }
}
