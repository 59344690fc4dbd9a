// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Cell construction: registering the stacked LSTM's parameters under a
//! naming scope.
//!
//! Layer `k` with input width `I` and layer width `H` owns three
//! tensors — `w_ih (I×4H)`, `w_hh (H×4H)`, `bias (4H)` — holding the
//! four gates `[i, f, g, o]` fused along the column axis. A final linear
//! projection `w_out (H_last×V)`, `b_out (V)` maps the top layer's
//! hidden vector onto vocabulary logits.

use tensor_core::Shape;

use crate::{HParams, ModelError, VariableStore};

/// Whether the forward pass emits normalized probabilities or raw logits.
///
/// Fixed at construction; the surrounding agent chooses which quantity
/// it reinforces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Row-wise softmax applied to every emitted distribution.
    Probabilities,
    /// Raw unnormalized scores.
    Logits,
}

/// Handle to a cell built under one scope.
///
/// `NoteRnn` owns no weights — it records the scope, hyperparameters,
/// and output mode, and derives the scoped names the forward pass
/// resolves against the [`VariableStore`]. Building the same scope twice
/// against one store registers nothing new (the variables are reused),
/// so two handles over one scope share a single parameter set.
#[derive(Debug, Clone)]
pub struct NoteRnn {
    scope: String,
    hparams: HParams,
    mode: OutputMode,
}

impl NoteRnn {
    /// Registers the cell's parameters under `scope` and returns the
    /// handle.
    ///
    /// # Errors
    /// Returns [`ModelError::InvalidHParams`] for an unusable bundle and
    /// [`ModelError::VariableShapeMismatch`] if the scope already holds
    /// variables with conflicting shapes (i.e., a different model was
    /// built there).
    pub fn build(
        store: &mut VariableStore,
        scope: &str,
        hparams: &HParams,
        mode: OutputMode,
    ) -> Result<Self, ModelError> {
        hparams.validate()?;
        tracing::info!("building note rnn under scope '{scope}'");

        let rnn = Self {
            scope: scope.to_string(),
            hparams: hparams.clone(),
            mode,
        };

        for k in 0..hparams.num_layers() {
            let input = hparams.layer_input_width(k);
            let width = hparams.rnn_layer_sizes[k];
            store.register(&rnn.w_ih_name(k), Shape::matrix(input, 4 * width))?;
            store.register(&rnn.w_hh_name(k), Shape::matrix(width, 4 * width))?;
            store.register(&rnn.bias_name(k), Shape::vector(4 * width))?;
        }

        let top = *hparams.rnn_layer_sizes.last().expect("validated non-empty");
        store.register(&rnn.w_out_name(), Shape::matrix(top, hparams.one_hot_length))?;
        store.register(&rnn.b_out_name(), Shape::vector(hparams.one_hot_length))?;

        Ok(rnn)
    }

    /// The scope this cell's variables live under.
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// The hyperparameters the cell was built from.
    pub fn hparams(&self) -> &HParams {
        &self.hparams
    }

    /// The output mode fixed at construction.
    pub fn output_mode(&self) -> OutputMode {
        self.mode
    }

    /// Total width of the hidden state across all layers.
    pub fn state_width(&self) -> usize {
        self.hparams.state_width()
    }

    /// All scoped variable names this cell resolves, in layer order.
    pub fn variable_names(&self) -> Vec<String> {
        let mut names = Vec::with_capacity(3 * self.hparams.num_layers() + 2);
        for k in 0..self.hparams.num_layers() {
            names.push(self.w_ih_name(k));
            names.push(self.w_hh_name(k));
            names.push(self.bias_name(k));
        }
        names.push(self.w_out_name());
        names.push(self.b_out_name());
        names
    }

    pub(crate) fn w_ih_name(&self, k: usize) -> String {
        format!("{}/cell/layer_{k}/w_ih", self.scope)
    }

    pub(crate) fn w_hh_name(&self, k: usize) -> String {
        format!("{}/cell/layer_{k}/w_hh", self.scope)
    }

    pub(crate) fn bias_name(&self, k: usize) -> String {
        format!("{}/cell/layer_{k}/bias", self.scope)
    }

    pub(crate) fn w_out_name(&self) -> String {
        format!("{}/logits/w_out", self.scope)
    }

    pub(crate) fn b_out_name(&self) -> String {
        format!("{}/logits/b_out", self.scope)
    }
}
