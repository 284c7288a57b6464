//! Attention mask utilities for batched encoder passes
//!
//! The encoder attends bidirectionally, so the only mask needed is the
//! padding mask that stops real tokens from attending to pad positions when
//! sequences of different lengths share a batch.

use candle_core::{DType, Device, Tensor};

use crate::error::{Result, VizError};

/// Additive value used for masked positions.
///
/// Large-but-finite so that fully padded rows still softmax to finite values.
pub const MASKED_VALUE: f32 = -10_000.0;

/// Create an additive padding mask for a batch of sequences
///
/// # Returns
///
/// A tensor of shape `[batch, 1, 1, max_len]` where:
/// - `0.0` for real token positions (`j < lengths[b]`)
/// - [`MASKED_VALUE`] for padding positions
///
/// # Example
///
/// For lengths `[2, 4]` and `max_len = 4`:
/// ```text
/// [[[[0, 0, -1e4, -1e4]]],
///  [[[0, 0,    0,    0]]]]
/// ```
pub fn create_padding_mask(
    lengths: &[usize],
    max_len: usize,
    device: &Device,
    dtype: DType,
) -> Result<Tensor> {
    if let Some(&too_long) = lengths.iter().find(|&&len| len > max_len) {
        return Err(VizError::InvalidRequest(format!(
            "sequence length {too_long} exceeds padded length {max_len}"
        )));
    }

    let mask: Vec<f32> = lengths
        .iter()
        .flat_map(|&len| (0..max_len).map(move |j| if j < len { 0.0 } else { MASKED_VALUE }))
        .collect();
    let mask_tensor =
        Tensor::from_vec(mask, (lengths.len(), 1, 1, max_len), device)?.to_dtype(dtype)?;
    Ok(mask_tensor)
}

/// Right-pad id sequences to a common length
///
/// Returns the flattened `(batch * max_len)` ids and `max_len`.
pub fn pad_ids(sequences: &[&[u32]], pad_id: u32) -> (Vec<u32>, usize) {
    let max_len = sequences.iter().map(|s| s.len()).max().unwrap_or(0);
    let mut flat = Vec::with_capacity(sequences.len() * max_len);
    for seq in sequences {
        flat.extend_from_slice(seq);
        flat.extend(std::iter::repeat(pad_id).take(max_len - seq.len()));
    }
    (flat, max_len)
}
