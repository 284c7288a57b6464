//! Masked-token predictions: ranking vocabulary fillers for a masked position
//!
//! The model's distribution at the mask is oversampled (`top_n * factor`
//! candidates) and then filtered, so that enough substitutes survive once
//! word-piece fragments and the focus word itself are dropped.

use candle_core::{DType, Tensor};
use std::collections::HashSet;

use crate::error::Result;
use crate::model::MaskedLanguageModel;

/// A single token prediction
#[derive(Debug, Clone, PartialEq)]
pub struct TokenPrediction {
    /// Token ID
    pub token_id: u32,
    /// Decoded, trimmed token string
    pub token: String,
    /// Probability (0.0 - 1.0)
    pub probability: f32,
}

/// Why a candidate was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Continuation,
    FocusWord,
    Special,
    Empty,
    Duplicate,
}

/// Top-k `(token_id, probability)` pairs from a logits vector, most probable first
pub fn top_k_from_logits(logits: &Tensor, k: usize) -> Result<Vec<(u32, f32)>> {
    let logits_f32 = logits.to_dtype(DType::F32)?.flatten_all()?;
    let probs = candle_nn::ops::softmax_last_dim(&logits_f32)?;
    let probs_vec: Vec<f32> = probs.to_vec1()?;

    let mut indexed: Vec<(usize, f32)> = probs_vec.into_iter().enumerate().collect();
    // Stable sort keeps lower ids first among ties
    indexed.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    Ok(indexed
        .into_iter()
        .take(k)
        .map(|(idx, prob)| (idx as u32, prob))
        .collect())
}

/// Decide whether a ranked candidate can serve as a neighbor
pub fn classify_candidate<M: MaskedLanguageModel + ?Sized>(
    model: &M,
    token_id: u32,
    decoded: &str,
    focus_forms: &[&str],
    seen: &HashSet<String>,
) -> std::result::Result<(), Rejection> {
    if model.is_continuation(token_id) {
        Err(Rejection::Continuation)
    } else if model.is_special(token_id) {
        Err(Rejection::Special)
    } else if decoded.is_empty() {
        Err(Rejection::Empty)
    } else if focus_forms.contains(&decoded) {
        Err(Rejection::FocusWord)
    } else if seen.contains(decoded) {
        Err(Rejection::Duplicate)
    } else {
        Ok(())
    }
}

/// Filter ranked candidates down to at most `top_n` usable substitutes
///
/// `focus_forms` holds every spelling of the focus word to drop (the word as
/// given and the token it matched). Order of `ranked` (probability-descending)
/// is preserved.
pub fn filter_candidates<M: MaskedLanguageModel + ?Sized>(
    model: &M,
    ranked: &[(u32, f32)],
    focus_forms: &[&str],
    top_n: usize,
) -> (Vec<TokenPrediction>, Vec<(u32, Rejection)>) {
    let mut kept = Vec::with_capacity(top_n);
    let mut rejected = Vec::new();
    let mut seen = HashSet::new();

    for &(token_id, probability) in ranked {
        if kept.len() == top_n {
            break;
        }
        let decoded = model.decode_token(token_id).trim().to_string();
        match classify_candidate(model, token_id, &decoded, focus_forms, &seen) {
            Ok(()) => {
                seen.insert(decoded.clone());
                kept.push(TokenPrediction {
                    token_id,
                    token: decoded,
                    probability,
                });
            }
            Err(reason) => rejected.push((token_id, reason)),
        }
    }

    (kept, rejected)
}
