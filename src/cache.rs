//! Hidden-state cache for storing per-layer encoder outputs

use candle_core::{DType, IndexOp, Tensor};

use crate::error::{Result, VizError};

/// Stores all-position hidden states from one forward pass.
///
/// Entry 0 is the embedding output and entry `i` the output of encoder
/// layer `i`, so a model with `n` layers yields `n + 1` entries.
/// Each tensor has shape `(seq_len, d_model)`.
#[derive(Debug, Clone)]
pub struct HiddenStateCache {
    states: Vec<Tensor>,
}

impl HiddenStateCache {
    /// Create a cache from collected hidden states
    pub fn new(states: Vec<Tensor>) -> Self {
        Self { states }
    }

    /// Create an empty cache with capacity for n_states entries
    pub fn with_capacity(n_states: usize) -> Self {
        Self {
            states: Vec::with_capacity(n_states),
        }
    }

    /// Add one layer's all-position hidden state.
    ///
    /// Tensor should have shape `(seq_len, d_model)`.
    pub fn push(&mut self, tensor: Tensor) {
        self.states.push(tensor);
    }

    /// Number of stored hidden states (layers + embeddings)
    pub fn n_states(&self) -> usize {
        self.states.len()
    }

    /// Index of the state one below the last
    pub fn penultimate_index(&self) -> Result<usize> {
        self.states.len().checked_sub(2).ok_or_else(|| {
            VizError::InvalidRequest(format!(
                "need at least 2 hidden states, cache holds {}",
                self.states.len()
            ))
        })
    }

    /// Get the hidden state at a specific layer and token position.
    ///
    /// Returns shape `(d_model,)`.
    pub fn get_position(&self, layer: usize, position: usize) -> Result<Tensor> {
        let layer_tensor = self.layer_tensor(layer)?;
        let seq_len = layer_tensor.dim(0)?;
        if position >= seq_len {
            return Err(VizError::InvalidRequest(format!(
                "position {position} out of range (seq_len={seq_len})"
            )));
        }
        Ok(layer_tensor.i(position)?)
    }

    /// Mean hidden state over `positions` at `layer`, as f32
    pub fn mean_over(&self, layer: usize, positions: &[usize]) -> Result<Vec<f32>> {
        if positions.is_empty() {
            return Err(VizError::InvalidRequest(
                "cannot average over an empty set of positions".into(),
            ));
        }
        let rows = positions
            .iter()
            .map(|&pos| self.get_position(layer, pos))
            .collect::<Result<Vec<_>>>()?;
        let stacked = Tensor::stack(&rows, 0)?.to_dtype(DType::F32)?;
        Ok(stacked.mean(0)?.to_vec1()?)
    }

    /// Check if cache is empty
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    fn layer_tensor(&self, layer: usize) -> Result<&Tensor> {
        self.states.get(layer).ok_or_else(|| {
            VizError::InvalidRequest(format!(
                "layer {layer} not in cache ({} states)",
                self.states.len()
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_cache_basic() {
        let device = Device::Cpu;
        let seq_len = 6;
        let d_model = 8;

        let mut cache = HiddenStateCache::with_capacity(3);
        assert!(cache.is_empty());
        assert!(cache.penultimate_index().is_err());

        for _ in 0..3 {
            cache.push(Tensor::zeros((seq_len, d_model), DType::F32, &device).unwrap());
        }

        assert_eq!(cache.n_states(), 3);
        assert_eq!(cache.penultimate_index().unwrap(), 1);

        let pos = cache.get_position(1, 5).unwrap();
        assert_eq!(pos.dims(), &[d_model]);

        assert!(cache.get_position(0, seq_len).is_err());
        assert!(cache.get_position(5, 0).is_err());
    }

    #[test]
    fn test_mean_over_positions() {
        let device = Device::Cpu;
        let layer = Tensor::new(&[[1f32, 2.0], [3.0, 4.0], [5.0, 6.0]], &device).unwrap();
        let cache = HiddenStateCache::new(vec![layer.clone(), layer]);

        assert_eq!(cache.mean_over(0, &[0, 2]).unwrap(), vec![3.0, 4.0]);
        assert_eq!(cache.mean_over(1, &[1]).unwrap(), vec![3.0, 4.0]);
        assert!(cache.mean_over(0, &[]).is_err());
    }
}
