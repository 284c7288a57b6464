//! Model service: tokenizer + masked language model behind one trait
//!
//! The extractor only talks to [`MaskedLanguageModel`]. [`ContextModel`] is
//! the candle/tokenizers implementation backed by a BERT checkpoint from the
//! HuggingFace hub or a local directory.

use candle_core::{DType, Device, Tensor};
use hf_hub::{api::sync::Api, Repo, RepoType};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokenizers::{Tokenizer, TruncationParams};
use tracing::info;

use crate::cache::HiddenStateCache;
use crate::error::{Result, VizError};
use crate::forward_bert::{BertConfig, BertMaskedLm, SafetensorsIndex};
use crate::positioning::EncodingWithOffsets;

/// Capabilities the embedding extractor needs from a masked language model.
///
/// Implementations must be deterministic: the same input always yields the
/// same states and logits.
pub trait MaskedLanguageModel {
    // --- Metadata ---
    fn n_layers(&self) -> usize;
    fn d_model(&self) -> usize;

    // --- Tokenization ---
    /// Tokenize with special tokens added (`[CLS] ... [SEP]` for BERT)
    fn tokenize(&self, text: &str) -> Result<EncodingWithOffsets>;
    /// Id and string of the mask token
    fn mask_token(&self) -> (u32, String);
    /// Surface string for a single token id
    fn decode_token(&self, token_id: u32) -> String;
    /// Whether the id is a non-initial piece of a multi-piece word
    fn is_continuation(&self, token_id: u32) -> bool;
    /// Whether the id is a control token (`[CLS]`, `[PAD]`, ...)
    fn is_special(&self, token_id: u32) -> bool;

    // --- Forward passes ---
    /// All hidden states (embeddings + each layer) for one encoding
    fn hidden_states(&self, encoding: &EncodingWithOffsets) -> Result<HiddenStateCache>;

    /// Hidden states for several encodings, in input order
    fn hidden_states_batch(
        &self,
        encodings: &[EncodingWithOffsets],
    ) -> Result<Vec<HiddenStateCache>> {
        encodings.iter().map(|e| self.hidden_states(e)).collect()
    }

    /// Vocabulary logits at `position`, shape `(vocab,)`
    fn masked_logits(&self, encoding: &EncodingWithOffsets, position: usize) -> Result<Tensor>;
}

/// Files making up one checkpoint
#[derive(Debug, Clone)]
pub struct ModelFiles {
    pub config: PathBuf,
    pub tokenizer: PathBuf,
    pub weights: Vec<PathBuf>,
}

impl ModelFiles {
    /// Resolve checkpoint files from a local directory or the HuggingFace hub
    pub fn resolve(model_id: &str) -> Result<Self> {
        let local = Path::new(model_id);
        if local.is_dir() {
            info!("Loading model files from {}", local.display());
            return Self::from_dir(local);
        }
        Self::from_hub(model_id)
    }

    /// Read a directory holding config.json, tokenizer.json and safetensors weights
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let config = dir.join("config.json");
        let tokenizer = dir.join("tokenizer.json");
        for required in [&config, &tokenizer] {
            if !required.is_file() {
                return Err(VizError::Config(format!(
                    "missing {} in model directory",
                    required.display()
                )));
            }
        }

        let index_path = dir.join("model.safetensors.index.json");
        let weights = if index_path.is_file() {
            shard_names(&index_path)?
                .into_iter()
                .map(|name| dir.join(name))
                .collect()
        } else {
            vec![dir.join("model.safetensors")]
        };

        Ok(Self {
            config,
            tokenizer,
            weights,
        })
    }

    /// Download (or reuse cached) files from the hub
    pub fn from_hub(model_id: &str) -> Result<Self> {
        let api = Api::new().map_err(|e| VizError::model_load(model_id, e))?;
        let repo = api.repo(Repo::new(model_id.to_string(), RepoType::Model));
        let fetch = |name: &str| {
            repo.get(name).map_err(|e| {
                VizError::model_load(model_id, format!("failed to download {name}: {e}"))
            })
        };

        let config = fetch("config.json")?;
        let tokenizer = fetch("tokenizer.json")?;

        // Check for sharded vs single safetensors
        let weights = if let Ok(index_path) = repo.get("model.safetensors.index.json") {
            info!("Model is sharded, loading index...");
            let names = shard_names(&index_path)?;
            info!("Downloading {} shard files...", names.len());
            names
                .iter()
                .map(|name| fetch(name))
                .collect::<Result<Vec<_>>>()?
        } else {
            vec![fetch("model.safetensors")?]
        };

        Ok(Self {
            config,
            tokenizer,
            weights,
        })
    }
}

/// Unique shard file names listed in a safetensors index
fn shard_names(index_path: &Path) -> Result<Vec<String>> {
    let index_str = std::fs::read_to_string(index_path)?;
    let index: SafetensorsIndex = serde_json::from_str(&index_str)?;
    let mut names: Vec<String> = index.weight_map.values().cloned().collect();
    names.sort();
    names.dedup();
    Ok(names)
}

/// Tokenizer settings that vary between WordPiece vocabularies
#[derive(Debug, Clone)]
pub struct TokenizerOptions {
    pub mask_token: String,
    pub continuation_prefix: String,
}

impl Default for TokenizerOptions {
    fn default() -> Self {
        Self {
            mask_token: "[MASK]".to_string(),
            continuation_prefix: "##".to_string(),
        }
    }
}

/// Pretrained BERT checkpoint with its tokenizer
///
/// Loaded once and used read-only for every extraction that borrows it.
pub struct ContextModel {
    model: BertMaskedLm,
    tokenizer: Tokenizer,
    mask_token_id: u32,
    options: TokenizerOptions,
    special_ids: HashSet<u32>,
}

impl ContextModel {
    /// Load a model (tries CUDA, falls back to CPU)
    pub fn from_pretrained(model_id: &str) -> Result<Self> {
        Self::from_pretrained_with_device(model_id, None, TokenizerOptions::default())
    }

    /// Load with explicit device choice (None = auto-detect)
    ///
    /// Every failure is reported as [`VizError::ModelLoad`].
    pub fn from_pretrained_with_device(
        model_id: &str,
        force_cpu: Option<bool>,
        options: TokenizerOptions,
    ) -> Result<Self> {
        Self::load(model_id, force_cpu, options).map_err(|e| match e {
            VizError::ModelLoad { .. } => e,
            other => VizError::model_load(model_id, other),
        })
    }

    fn load(model_id: &str, force_cpu: Option<bool>, options: TokenizerOptions) -> Result<Self> {
        let device = if force_cpu == Some(true) {
            info!("Forcing CPU mode");
            Device::Cpu
        } else {
            match Device::cuda_if_available(0) {
                Ok(dev) if dev.is_cuda() => {
                    info!("Using CUDA device");
                    dev
                }
                _ => {
                    info!("CUDA not available, using CPU");
                    Device::Cpu
                }
            }
        };
        // Encoder is small; F32 everywhere keeps results identical across devices
        let dtype = DType::F32;

        info!("Loading model: {}", model_id);
        info!("Device: {:?}", device);

        let files = ModelFiles::resolve(model_id)?;

        let config_str = std::fs::read_to_string(&files.config)?;
        let config: BertConfig = serde_json::from_str(&config_str)?;

        let mut tokenizer = Tokenizer::from_file(&files.tokenizer)
            .map_err(|e| VizError::model_load(model_id, format!("tokenizer error: {e}")))?;
        // Long sentences are cut at the position limit; a focus word past the
        // cut is then reported as not found
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: config.max_position_embeddings,
                ..Default::default()
            }))
            .map_err(|e| VizError::model_load(model_id, format!("tokenizer error: {e}")))?;
        let mask_token_id = tokenizer.token_to_id(&options.mask_token).ok_or_else(|| {
            VizError::model_load(
                model_id,
                format!("tokenizer has no mask token '{}'", options.mask_token),
            )
        })?;
        let special_ids = tokenizer
            .get_added_tokens_decoder()
            .iter()
            .filter(|(_, token)| token.special)
            .map(|(id, _)| *id)
            .collect();

        let model = BertMaskedLm::load(&config, &files.weights, &device, dtype)?;

        Ok(Self {
            model,
            tokenizer,
            mask_token_id,
            options,
            special_ids,
        })
    }
}

impl MaskedLanguageModel for ContextModel {
    fn n_layers(&self) -> usize {
        self.model.n_layers()
    }

    fn d_model(&self) -> usize {
        self.model.d_model()
    }

    fn tokenize(&self, text: &str) -> Result<EncodingWithOffsets> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| VizError::Tokenization(e.to_string()))?;

        let special = encoding
            .get_special_tokens_mask()
            .iter()
            .map(|&flag| flag == 1)
            .collect();

        Ok(EncodingWithOffsets::new(
            encoding.get_ids().to_vec(),
            encoding.get_tokens().to_vec(),
            encoding.get_offsets().to_vec(),
            special,
        ))
    }

    fn mask_token(&self) -> (u32, String) {
        (self.mask_token_id, self.options.mask_token.clone())
    }

    fn decode_token(&self, token_id: u32) -> String {
        self.tokenizer
            .decode(&[token_id], false)
            .unwrap_or_else(|_| format!("<{token_id}>"))
    }

    fn is_continuation(&self, token_id: u32) -> bool {
        self.tokenizer
            .id_to_token(token_id)
            .is_some_and(|t| t.starts_with(&self.options.continuation_prefix))
    }

    fn is_special(&self, token_id: u32) -> bool {
        self.special_ids.contains(&token_id)
    }

    fn hidden_states(&self, encoding: &EncodingWithOffsets) -> Result<HiddenStateCache> {
        self.model.forward_with_cache(&encoding.ids)
    }

    fn hidden_states_batch(
        &self,
        encodings: &[EncodingWithOffsets],
    ) -> Result<Vec<HiddenStateCache>> {
        let sequences: Vec<&[u32]> = encodings.iter().map(|e| e.ids.as_slice()).collect();
        self.model.forward_batch_with_cache(&sequences)
    }

    fn masked_logits(&self, encoding: &EncodingWithOffsets, position: usize) -> Result<Tensor> {
        self.model.masked_logits(&encoding.ids, position)
    }
}
