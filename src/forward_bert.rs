//! BERT forward pass with per-layer hidden-state capture
//!
//! Custom implementation that runs the encoder layer by layer so every
//! intermediate hidden state is available, plus the masked-LM prediction head
//! (transform + decoder tied to the word embeddings).
//!
//! Differences from the decoder-only backbones this layout is usually used for:
//! - Learned absolute position embeddings and token-type embeddings
//! - Post-LayerNorm residual blocks
//! - Bidirectional attention (padding mask only)
//! - GELU (erf) feed-forward with bias on every projection

use candle_core::{DType, Device, IndexOp, Module, Tensor};
use candle_nn::{embedding, linear, Embedding, LayerNorm, Linear, VarBuilder};
use std::path::PathBuf;
use tracing::{debug, info};

use crate::cache::HiddenStateCache;
use crate::error::{Result, VizError};
use crate::masks::{create_padding_mask, pad_ids};

/// Model configuration (matches HuggingFace config.json for BERT)
#[derive(Debug, Clone, serde::Deserialize)]
pub struct BertConfig {
    pub hidden_size: usize,
    pub intermediate_size: usize,
    pub num_attention_heads: usize,
    pub num_hidden_layers: usize,
    pub vocab_size: usize,
    #[serde(default = "default_max_position_embeddings")]
    pub max_position_embeddings: usize,
    #[serde(default = "default_type_vocab_size")]
    pub type_vocab_size: usize,
    #[serde(default = "default_layer_norm_eps")]
    pub layer_norm_eps: f64,
    #[serde(default)]
    pub pad_token_id: u32,
    #[serde(default = "default_hidden_act")]
    pub hidden_act: String,
}

fn default_max_position_embeddings() -> usize {
    512
}

fn default_type_vocab_size() -> usize {
    2
}

fn default_layer_norm_eps() -> f64 {
    1e-12
}

fn default_hidden_act() -> String {
    "gelu".to_string()
}

/// Load a LayerNorm that may be stored as `weight`/`bias` or as the
/// TensorFlow-era `gamma`/`beta`
fn layer_norm(size: usize, eps: f64, vb: VarBuilder) -> Result<LayerNorm> {
    let (weight, bias) = if vb.contains_tensor("weight") {
        (vb.get(size, "weight")?, vb.get(size, "bias")?)
    } else {
        (vb.get(size, "gamma")?, vb.get(size, "beta")?)
    };
    Ok(LayerNorm::new(weight, bias, eps))
}

/// Word + position + token-type embeddings followed by LayerNorm
struct Embeddings {
    word_embeddings: Embedding,
    position_embeddings: Embedding,
    token_type_embeddings: Embedding,
    layer_norm: LayerNorm,
}

impl Embeddings {
    fn load(vb: VarBuilder, config: &BertConfig) -> Result<Self> {
        let word_embeddings = embedding(
            config.vocab_size,
            config.hidden_size,
            vb.pp("word_embeddings"),
        )?;
        let position_embeddings = embedding(
            config.max_position_embeddings,
            config.hidden_size,
            vb.pp("position_embeddings"),
        )?;
        let token_type_embeddings = embedding(
            config.type_vocab_size,
            config.hidden_size,
            vb.pp("token_type_embeddings"),
        )?;
        let layer_norm = layer_norm(config.hidden_size, config.layer_norm_eps, vb.pp("LayerNorm"))?;

        Ok(Self {
            word_embeddings,
            position_embeddings,
            token_type_embeddings,
            layer_norm,
        })
    }

    fn forward(&self, input_ids: &Tensor) -> Result<Tensor> {
        let (b, seq_len) = input_ids.dims2()?;
        let device = input_ids.device();

        let positions = Tensor::arange(0u32, seq_len as u32, device)?.unsqueeze(0)?;
        let token_types = Tensor::zeros((b, seq_len), DType::U32, device)?;

        let words = self.word_embeddings.forward(input_ids)?;
        let positions = self.position_embeddings.forward(&positions)?;
        let token_types = self.token_type_embeddings.forward(&token_types)?;

        let hidden = words.broadcast_add(&positions)?.add(&token_types)?;
        Ok(self.layer_norm.forward(&hidden)?)
    }
}

/// Multi-head self-attention with output projection and residual LayerNorm
struct Attention {
    query: Linear,
    key: Linear,
    value: Linear,
    output: Linear,
    output_norm: LayerNorm,
    num_heads: usize,
    head_dim: usize,
}

impl Attention {
    fn load(vb: VarBuilder, config: &BertConfig) -> Result<Self> {
        let head_dim = config.hidden_size / config.num_attention_heads;
        let all_heads = config.num_attention_heads * head_dim;
        let vb_self = vb.pp("self");
        let query = linear(config.hidden_size, all_heads, vb_self.pp("query"))?;
        let key = linear(config.hidden_size, all_heads, vb_self.pp("key"))?;
        let value = linear(config.hidden_size, all_heads, vb_self.pp("value"))?;

        let vb_out = vb.pp("output");
        let output = linear(all_heads, config.hidden_size, vb_out.pp("dense"))?;
        let output_norm = layer_norm(
            config.hidden_size,
            config.layer_norm_eps,
            vb_out.pp("LayerNorm"),
        )?;

        Ok(Self {
            query,
            key,
            value,
            output,
            output_norm,
            num_heads: config.num_attention_heads,
            head_dim,
        })
    }

    fn forward(&self, x: &Tensor, mask: Option<&Tensor>) -> Result<Tensor> {
        let (b, seq_len, _) = x.dims3()?;

        let q = self.query.forward(x)?;
        let k = self.key.forward(x)?;
        let v = self.value.forward(x)?;

        // Reshape for multi-head attention
        let q = q
            .reshape((b, seq_len, self.num_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()?;
        let k = k
            .reshape((b, seq_len, self.num_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()?;
        let v = v
            .reshape((b, seq_len, self.num_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()?;

        // Scaled dot-product attention
        let scale = 1.0 / (self.head_dim as f64).sqrt();
        let attn_weights = (q.matmul(&k.transpose(2, 3)?.contiguous()?)? * scale)?;

        let attn_weights = match mask {
            Some(mask) => attn_weights.broadcast_add(mask)?,
            None => attn_weights,
        };

        let attn_weights = candle_nn::ops::softmax_last_dim(&attn_weights)?;
        let attn_output = attn_weights.matmul(&v)?;

        // Reshape back
        let attn_output = attn_output.transpose(1, 2)?.reshape((b, seq_len, ()))?;
        let projected = self.output.forward(&attn_output)?;
        Ok(self.output_norm.forward(&(projected + x)?)?)
    }
}

/// Feed-forward block: intermediate GELU projection, output projection, residual LayerNorm
struct FeedForward {
    intermediate: Linear,
    output: Linear,
    output_norm: LayerNorm,
}

impl FeedForward {
    fn load(vb: VarBuilder, config: &BertConfig) -> Result<Self> {
        let intermediate = linear(
            config.hidden_size,
            config.intermediate_size,
            vb.pp("intermediate").pp("dense"),
        )?;
        let vb_out = vb.pp("output");
        let output = linear(config.intermediate_size, config.hidden_size, vb_out.pp("dense"))?;
        let output_norm = layer_norm(
            config.hidden_size,
            config.layer_norm_eps,
            vb_out.pp("LayerNorm"),
        )?;

        Ok(Self {
            intermediate,
            output,
            output_norm,
        })
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let hidden = self.intermediate.forward(x)?.gelu_erf()?;
        let hidden = self.output.forward(&hidden)?;
        Ok(self.output_norm.forward(&(hidden + x)?)?)
    }
}

/// Single encoder layer
struct EncoderLayer {
    attention: Attention,
    feed_forward: FeedForward,
}

impl EncoderLayer {
    fn load(vb: VarBuilder, config: &BertConfig) -> Result<Self> {
        let attention = Attention::load(vb.pp("attention"), config)?;
        let feed_forward = FeedForward::load(vb.clone(), config)?;
        Ok(Self {
            attention,
            feed_forward,
        })
    }

    fn forward(&self, x: &Tensor, mask: Option<&Tensor>) -> Result<Tensor> {
        let x = self.attention.forward(x, mask)?;
        self.feed_forward.forward(&x)
    }
}

/// Masked-LM prediction head; the decoder reuses the word embedding matrix
struct MlmHead {
    transform: Linear,
    transform_norm: LayerNorm,
    decoder_weight: Tensor,
    decoder_bias: Tensor,
}

impl MlmHead {
    fn load(vb: VarBuilder, config: &BertConfig, word_embeddings: &Embedding) -> Result<Self> {
        let vb_transform = vb.pp("transform");
        let transform = linear(
            config.hidden_size,
            config.hidden_size,
            vb_transform.pp("dense"),
        )?;
        let transform_norm = layer_norm(
            config.hidden_size,
            config.layer_norm_eps,
            vb_transform.pp("LayerNorm"),
        )?;
        let decoder_bias = vb.get(config.vocab_size, "bias")?;

        Ok(Self {
            transform,
            transform_norm,
            decoder_weight: word_embeddings.embeddings().clone(),
            decoder_bias,
        })
    }

    /// Project hidden states `(n, d_model)` to vocabulary logits `(n, vocab)`
    fn forward(&self, hidden: &Tensor) -> Result<Tensor> {
        let x = self.transform.forward(hidden)?.gelu_erf()?;
        let x = self.transform_norm.forward(&x)?;
        let logits = x.matmul(&self.decoder_weight.t()?)?;
        Ok(logits.broadcast_add(&self.decoder_bias)?)
    }
}

/// Safetensors index for sharded checkpoints
#[derive(Debug, serde::Deserialize)]
pub(crate) struct SafetensorsIndex {
    pub weight_map: std::collections::HashMap<String, String>,
}

/// BERT masked language model with per-layer hidden-state capture
pub struct BertMaskedLm {
    embeddings: Embeddings,
    layers: Vec<EncoderLayer>,
    head: MlmHead,
    n_layers: usize,
    hidden_size: usize,
    pad_token_id: u32,
    max_positions: usize,
    device: Device,
}

impl BertMaskedLm {
    /// Build the model from a parsed config and safetensors weight files
    pub fn load(
        config: &BertConfig,
        weights_paths: &[PathBuf],
        device: &Device,
        dtype: DType,
    ) -> Result<Self> {
        info!("Loading weights from {} file(s)...", weights_paths.len());
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(weights_paths, dtype, device)? };
        Self::from_varbuilder(config, vb)
    }

    /// Build the model from any weight source
    ///
    /// Accepts encoder names with or without the `bert.` prefix; the MLM head
    /// is always read from `cls.predictions`.
    pub fn from_varbuilder(config: &BertConfig, vb: VarBuilder) -> Result<Self> {
        if config.hidden_act != "gelu" {
            return Err(VizError::Config(format!(
                "unsupported hidden_act '{}', only 'gelu' is implemented",
                config.hidden_act
            )));
        }
        if config.hidden_size % config.num_attention_heads != 0 {
            return Err(VizError::Config(format!(
                "hidden_size {} is not divisible by num_attention_heads {}",
                config.hidden_size, config.num_attention_heads
            )));
        }

        info!(
            "Model config: {} layers, {} hidden, {} vocab",
            config.num_hidden_layers, config.hidden_size, config.vocab_size
        );

        // Checkpoints saved from the MLM class prefix the encoder with "bert."
        let vb_bert = if vb.contains_tensor("bert.embeddings.word_embeddings.weight") {
            vb.pp("bert")
        } else {
            vb.clone()
        };

        let embeddings = Embeddings::load(vb_bert.pp("embeddings"), config)?;

        let vb_layers = vb_bert.pp("encoder").pp("layer");
        let mut layers = Vec::with_capacity(config.num_hidden_layers);
        for i in 0..config.num_hidden_layers {
            debug!("Loading layer {}/{}", i + 1, config.num_hidden_layers);
            layers.push(EncoderLayer::load(vb_layers.pp(i.to_string()), config)?);
        }

        let head = MlmHead::load(
            vb.pp("cls").pp("predictions"),
            config,
            &embeddings.word_embeddings,
        )?;

        info!(
            "Model loaded successfully with {} layers (vocab_size: {})",
            config.num_hidden_layers, config.vocab_size
        );

        Ok(Self {
            embeddings,
            layers,
            head,
            n_layers: config.num_hidden_layers,
            hidden_size: config.hidden_size,
            pad_token_id: config.pad_token_id,
            max_positions: config.max_position_embeddings,
            device: vb.device().clone(),
        })
    }

    /// Forward pass over one sequence, capturing every hidden state
    pub fn forward_with_cache(&self, input_ids: &[u32]) -> Result<HiddenStateCache> {
        self.check_length(input_ids.len())?;
        let ids = Tensor::new(input_ids, &self.device)?.unsqueeze(0)?;

        let mut cache = HiddenStateCache::with_capacity(self.n_layers + 1);
        let mut hidden = self.embeddings.forward(&ids)?;
        cache.push(hidden.i(0)?);

        for layer in &self.layers {
            hidden = layer.forward(&hidden, None)?;
            cache.push(hidden.i(0)?);
        }

        Ok(cache)
    }

    /// Forward pass over several sequences at once
    ///
    /// Sequences are right-padded and masked; each returned cache is trimmed
    /// back to its own length, in input order.
    pub fn forward_batch_with_cache(&self, sequences: &[&[u32]]) -> Result<Vec<HiddenStateCache>> {
        if sequences.is_empty() {
            return Ok(Vec::new());
        }
        let (flat, max_len) = pad_ids(sequences, self.pad_token_id);
        self.check_length(max_len)?;
        let lengths: Vec<usize> = sequences.iter().map(|s| s.len()).collect();

        let ids = Tensor::from_vec(flat, (sequences.len(), max_len), &self.device)?;
        let mut hidden = self.embeddings.forward(&ids)?;
        let mask = create_padding_mask(&lengths, max_len, &self.device, hidden.dtype())?;

        let mut per_layer = Vec::with_capacity(self.n_layers + 1);
        per_layer.push(hidden.clone());
        for layer in &self.layers {
            hidden = layer.forward(&hidden, Some(&mask))?;
            per_layer.push(hidden.clone());
        }

        lengths
            .iter()
            .enumerate()
            .map(|(b, &len)| {
                let mut cache = HiddenStateCache::with_capacity(per_layer.len());
                for states in &per_layer {
                    cache.push(states.i((b, 0..len))?);
                }
                Ok(cache)
            })
            .collect()
    }

    /// Vocabulary logits at one position of a sequence, shape `(vocab,)`
    pub fn masked_logits(&self, input_ids: &[u32], position: usize) -> Result<Tensor> {
        if position >= input_ids.len() {
            return Err(VizError::InvalidRequest(format!(
                "mask position {position} out of range (seq_len={})",
                input_ids.len()
            )));
        }
        let cache = self.forward_with_cache(input_ids)?;
        let last = cache.n_states() - 1;
        let hidden = cache.get_position(last, position)?.unsqueeze(0)?;
        Ok(self.head.forward(&hidden)?.squeeze(0)?)
    }

    fn check_length(&self, len: usize) -> Result<()> {
        if len > self.max_positions {
            return Err(VizError::InvalidRequest(format!(
                "sequence of {len} tokens exceeds the model limit of {}",
                self.max_positions
            )));
        }
        Ok(())
    }

    /// Number of encoder layers
    pub fn n_layers(&self) -> usize {
        self.n_layers
    }

    /// Hidden dimension
    pub fn d_model(&self) -> usize {
        self.hidden_size
    }
}

/// Randomly initialized checkpoints for tests
#[cfg(test)]
pub(crate) mod testing {
    use super::BertConfig;
    use candle_core::{DType, Device, Tensor};
    use std::collections::HashMap;

    pub(crate) fn tiny_config(vocab_size: usize) -> BertConfig {
        BertConfig {
            hidden_size: 16,
            intermediate_size: 32,
            num_attention_heads: 4,
            num_hidden_layers: 3,
            vocab_size,
            max_position_embeddings: 16,
            type_vocab_size: 2,
            layer_norm_eps: 1e-12,
            pad_token_id: 0,
            hidden_act: "gelu".to_string(),
        }
    }

    fn randn(weights: &mut HashMap<String, Tensor>, name: String, shape: (usize, usize)) {
        let tensor = Tensor::randn(0f32, 0.2, shape, &Device::Cpu).unwrap();
        weights.insert(name, tensor);
    }

    fn dense(weights: &mut HashMap<String, Tensor>, prefix: &str, d_in: usize, d_out: usize) {
        randn(weights, format!("{prefix}.weight"), (d_out, d_in));
        let bias = Tensor::randn(0f32, 0.2, d_out, &Device::Cpu).unwrap();
        weights.insert(format!("{prefix}.bias"), bias);
    }

    fn norm(weights: &mut HashMap<String, Tensor>, prefix: &str, size: usize) {
        let ones = Tensor::ones(size, DType::F32, &Device::Cpu).unwrap();
        let zeros = Tensor::zeros(size, DType::F32, &Device::Cpu).unwrap();
        weights.insert(format!("{prefix}.weight"), ones);
        weights.insert(format!("{prefix}.bias"), zeros);
    }

    /// Full MLM checkpoint with the encoder under `bert.`
    pub(crate) fn random_weights(config: &BertConfig) -> HashMap<String, Tensor> {
        let h = config.hidden_size;
        let mut weights = HashMap::new();

        randn(
            &mut weights,
            "bert.embeddings.word_embeddings.weight".into(),
            (config.vocab_size, h),
        );
        randn(
            &mut weights,
            "bert.embeddings.position_embeddings.weight".into(),
            (config.max_position_embeddings, h),
        );
        randn(
            &mut weights,
            "bert.embeddings.token_type_embeddings.weight".into(),
            (config.type_vocab_size, h),
        );
        norm(&mut weights, "bert.embeddings.LayerNorm", h);

        for layer in 0..config.num_hidden_layers {
            let p = format!("bert.encoder.layer.{layer}");
            for proj in ["query", "key", "value"] {
                dense(&mut weights, &format!("{p}.attention.self.{proj}"), h, h);
            }
            dense(&mut weights, &format!("{p}.attention.output.dense"), h, h);
            norm(&mut weights, &format!("{p}.attention.output.LayerNorm"), h);
            dense(
                &mut weights,
                &format!("{p}.intermediate.dense"),
                h,
                config.intermediate_size,
            );
            dense(
                &mut weights,
                &format!("{p}.output.dense"),
                config.intermediate_size,
                h,
            );
            norm(&mut weights, &format!("{p}.output.LayerNorm"), h);
        }

        dense(&mut weights, "cls.predictions.transform.dense", h, h);
        norm(&mut weights, "cls.predictions.transform.LayerNorm", h);
        let bias = Tensor::zeros(config.vocab_size, DType::F32, &Device::Cpu).unwrap();
        weights.insert("cls.predictions.bias".into(), bias);
        weights
    }
}
