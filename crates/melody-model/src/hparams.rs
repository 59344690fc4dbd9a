// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Model hyperparameters.
//!
//! A checkpoint is only loadable by a model built from the same
//! hyperparameters; any divergence surfaces as a shape mismatch at
//! restore time.

use crate::ModelError;

/// Immutable hyperparameter bundle for the next-note model.
///
/// The defaults match the pretrained model family this runtime loads:
/// one LSTM layer of width 100 over a 38-event one-hot alphabet, trained
/// with batches of 128 sequences.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct HParams {
    /// Width of each stacked recurrent layer, bottom first.
    pub rnn_layer_sizes: Vec<usize>,
    /// Size of the one-hot note alphabet (vocabulary).
    pub one_hot_length: usize,
    /// Number of sequences per training batch. Ignored outside the
    /// training pipeline; priming and stepping always run batch-of-one.
    pub batch_size: usize,
}

impl Default for HParams {
    fn default() -> Self {
        Self {
            rnn_layer_sizes: vec![100],
            one_hot_length: 38,
            batch_size: 128,
        }
    }
}

impl HParams {
    /// Checks that the bundle describes a buildable model.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.rnn_layer_sizes.is_empty() {
            return Err(ModelError::InvalidHParams(
                "rnn_layer_sizes must not be empty".into(),
            ));
        }
        if self.rnn_layer_sizes.iter().any(|&w| w == 0) {
            return Err(ModelError::InvalidHParams(
                "rnn layer widths must be nonzero".into(),
            ));
        }
        if self.one_hot_length == 0 {
            return Err(ModelError::InvalidHParams(
                "one_hot_length must be nonzero".into(),
            ));
        }
        if self.batch_size == 0 {
            return Err(ModelError::InvalidHParams(
                "batch_size must be nonzero".into(),
            ));
        }
        Ok(())
    }

    /// Total width of the recurrent hidden state across all layers.
    pub fn state_width(&self) -> usize {
        self.rnn_layer_sizes.iter().sum()
    }

    /// Number of stacked recurrent layers.
    pub fn num_layers(&self) -> usize {
        self.rnn_layer_sizes.len()
    }

    /// Input width of layer `k`: the one-hot alphabet for the bottom
    /// layer, the previous layer's width above it.
    pub fn layer_input_width(&self, k: usize) -> usize {
        if k == 0 {
            self.one_hot_length
        } else {
            self.rnn_layer_sizes[k - 1]
        }
    }
}
