// Pedantic clippy configuration for ML/math codebase
// These are acceptable in numerical/ML code:
#![allow(clippy::cast_precision_loss)] // usize→f64/f32 intentional in ML
#![allow(clippy::cast_possible_truncation)] // usize→u32 in tensor indexing
#![allow(clippy::cast_possible_wrap)] // u32→i32 marker sizes
#![allow(clippy::many_single_char_names)] // x, y, z, r standard in plotting
#![allow(clippy::module_name_repetitions)] // ContextModel in model.rs is fine
// Documentation pedantic:
#![allow(clippy::doc_markdown)] // backticks for every technical term is excessive
#![allow(clippy::missing_errors_doc)] // # Errors section for every Result fn
#![allow(clippy::missing_panics_doc)] // # Panics section for every panic
// Method style pedantic:
#![allow(clippy::must_use_candidate)] // #[must_use] on every pure fn is excessive
#![allow(clippy::return_self_not_must_use)] // #[must_use] on Self returns
#![allow(clippy::needless_pass_by_value)] // value params for API flexibility
#![allow(clippy::cast_sign_loss)] // f64→usize when value is known positive

//! ctxviz: contextual word embedding visualizer
//!
//! Shows how a masked language model represents one word across sentences.
//! Each sentence becomes a focus point; the model's substitutes for the
//! masked word become satellites around it.
//!
//! ## Architecture
//!
//! - `model`: `MaskedLanguageModel` trait and the BERT-backed `ContextModel`
//! - `forward_bert`: BERT encoder + MLM head with hidden-state capture
//! - `cache`: HiddenStateCache holding every layer's states for one input
//! - `masks`: Padding masks for batched inference
//! - `positioning`: Token spans, offsets and focus-word lookup
//! - `predictions`: Top-k masked predictions and candidate filtering
//! - `extractor`: Focus and neighbor vector extraction
//! - `reduction`: PCA and t-SNE projection with linfa
//! - `visualizer`: Backend-neutral figure, Plotly JSON and HTML output
//! - `render`: SVG rendering with plotters
//! - `pipeline`: Request validation and the end-to-end run
//! - `corpus`: Word → sentences context sets
//! - `config`: JSON run configuration

pub mod cache;
pub mod config;
pub mod corpus;
pub mod error;
pub mod extractor;
pub mod forward_bert;
pub mod masks;
pub mod model;
pub mod pipeline;
pub mod positioning;
pub mod predictions;
pub mod reduction;
pub mod render;
pub mod visualizer;

pub use cache::HiddenStateCache;
pub use config::VizConfig;
pub use corpus::{ContextSet, Corpus};
pub use error::{Result, VizError};
pub use extractor::{
    Context, ContextEmbedding, EmbeddingExtractor, ExtractionResult, ExtractorOptions,
    FocusMatch, Neighbor,
};
pub use forward_bert::{BertConfig, BertMaskedLm};
pub use masks::{create_padding_mask, pad_ids};
pub use model::{ContextModel, MaskedLanguageModel, ModelFiles, TokenizerOptions};
pub use pipeline::{viz, viz_with_config, VizRequest};
pub use positioning::{find_word_char_range, EncodingWithOffsets, TokenSpan};
pub use predictions::{filter_candidates, top_k_from_logits, Rejection, TokenPrediction};
pub use reduction::{DimensionalityReducer, PlotDims, ReductionMethod, TsneConfig};
pub use render::{render_svg, write_svg};
pub use visualizer::{
    EmbeddingVisualizer, Figure, MarkerSymbol, NeighborGroup, Point, Rgb, Trace, DEFAULT_PALETTE,
};
