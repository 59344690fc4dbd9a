// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The shared forward pass.
//!
//! [`run_sequence`] is the single implementation behind all three call
//! paths: single-step inference, batch-of-one priming, and fixed-batch
//! training consumption. Each caller supplies a different input batch
//! and initial state; the weights are resolved by name from the
//! [`VariableStore`] at call time, so a checkpoint restore is visible to
//! every path without rebuilding anything.

use tensor_core::{linear, matmul_acc, sigmoid, softmax, tanh, DType, Shape, Tensor};

use crate::{ModelError, NoteRnn, OutputMode, VariableStore};

/// The mutable cross-call state of a recurrent cell.
///
/// Both matrices are `(batch × state_width)` where `state_width` is the
/// sum of the stacked layer widths; layer `k` occupies a contiguous
/// column band. `hidden` is the state vector the surrounding agent
/// observes; `cell` is the LSTM memory that must thread alongside it for
/// repeated single-step calls to match one batched pass.
#[derive(Debug, Clone, PartialEq)]
pub struct RecurrentState {
    hidden: Tensor,
    cell: Tensor,
}

impl RecurrentState {
    /// Creates an all-zero state for the given batch size and width.
    pub fn zero(batch: usize, state_width: usize) -> Self {
        Self {
            hidden: Tensor::zeros(Shape::matrix(batch, state_width), DType::F32),
            cell: Tensor::zeros(Shape::matrix(batch, state_width), DType::F32),
        }
    }

    /// Number of sequences this state threads.
    pub fn batch_size(&self) -> usize {
        self.hidden.shape().dims()[0]
    }

    /// Total hidden width across all layers.
    pub fn state_width(&self) -> usize {
        self.hidden.shape().dims()[1]
    }

    /// The hidden-state matrix `(batch × state_width)`.
    pub fn hidden(&self) -> &Tensor {
        &self.hidden
    }

    /// The LSTM cell-memory matrix `(batch × state_width)`.
    pub fn cell_memory(&self) -> &Tensor {
        &self.cell
    }

    /// Returns `true` if every entry of both matrices is zero.
    pub fn is_zero(&self) -> bool {
        self.hidden.as_f32_slice().iter().all(|&x| x == 0.0)
            && self.cell.as_f32_slice().iter().all(|&x| x == 0.0)
    }
}

/// Borrowed per-layer weights, resolved once per call.
struct LayerParams<'a> {
    w_ih: &'a Tensor,
    w_hh: &'a Tensor,
    bias: &'a Tensor,
    width: usize,
    col_offset: usize,
}

/// Runs the cell over a batch of note sequences.
///
/// `inputs` is `(batch × steps × vocabulary)` one-hot rows; `lengths`
/// gives the valid prefix of each sequence. Steps at or beyond a
/// sequence's length neither update that row's state nor produce output
/// (their output rows stay zero). Returns the emitted distributions —
/// probabilities or logits per the cell's [`OutputMode`] — and the final
/// state.
///
/// Only numeric scratch buffers are allocated here; the cell's
/// parameters are borrowed from the store.
///
/// # Errors
/// Returns [`ModelError::InvalidInput`] when the batch disagrees with
/// the model's shapes, and [`ModelError::VariableNotFound`] if the scope
/// was never built against this store.
pub fn run_sequence(
    store: &VariableStore,
    rnn: &NoteRnn,
    inputs: &Tensor,
    lengths: &[usize],
    initial_state: &RecurrentState,
) -> Result<(Tensor, RecurrentState), ModelError> {
    let hparams = rnn.hparams();
    let vocab = hparams.one_hot_length;

    let dims = inputs.shape().dims();
    if inputs.dtype() != DType::F32 || dims.len() != 3 {
        return Err(ModelError::InvalidInput {
            what: "inputs",
            detail: format!(
                "expected f32 tensor of shape [batch, steps, {vocab}], got {} {}",
                inputs.dtype().as_str(),
                inputs.shape()
            ),
        });
    }
    let (batch, max_steps) = (dims[0], dims[1]);
    if dims[2] != vocab {
        return Err(ModelError::InvalidInput {
            what: "inputs",
            detail: format!("one-hot width {} does not match vocabulary {vocab}", dims[2]),
        });
    }
    if lengths.len() != batch {
        return Err(ModelError::InvalidInput {
            what: "lengths",
            detail: format!("{} lengths for batch of {batch}", lengths.len()),
        });
    }
    if let Some(&bad) = lengths.iter().find(|&&l| l > max_steps) {
        return Err(ModelError::InvalidInput {
            what: "lengths",
            detail: format!("length {bad} exceeds padded step count {max_steps}"),
        });
    }
    if initial_state.batch_size() != batch || initial_state.state_width() != rnn.state_width() {
        return Err(ModelError::InvalidInput {
            what: "initial_state",
            detail: format!(
                "state is {}×{}, model expects {batch}×{}",
                initial_state.batch_size(),
                initial_state.state_width(),
                rnn.state_width()
            ),
        });
    }

    // Resolve every weight once; the store owns them for the whole call.
    let mut layers = Vec::with_capacity(hparams.num_layers());
    let mut col_offset = 0;
    for k in 0..hparams.num_layers() {
        let width = hparams.rnn_layer_sizes[k];
        layers.push(LayerParams {
            w_ih: store.get(&rnn.w_ih_name(k))?,
            w_hh: store.get(&rnn.w_hh_name(k))?,
            bias: store.get(&rnn.bias_name(k))?,
            width,
            col_offset,
        });
        col_offset += width;
    }
    let w_out = store.get(&rnn.w_out_name())?;
    let b_out = store.get(&rnn.b_out_name())?;
    let state_width = rnn.state_width();
    let top_width = *hparams.rnn_layer_sizes.last().expect("validated non-empty");

    let mut state = initial_state.clone();
    let mut outputs = Tensor::zeros(Shape::sequence(batch, max_steps, vocab), DType::F32);

    // Scratch, allocated once per call and reused across timesteps.
    let mut layer_inputs: Vec<Tensor> = (0..hparams.num_layers())
        .map(|k| Tensor::zeros(Shape::matrix(batch, hparams.layer_input_width(k)), DType::F32))
        .collect();
    let mut gate_bufs: Vec<Tensor> = layers
        .iter()
        .map(|l| Tensor::zeros(Shape::matrix(batch, 4 * l.width), DType::F32))
        .collect();
    let mut hidden_bufs: Vec<Tensor> = layers
        .iter()
        .map(|l| Tensor::zeros(Shape::matrix(batch, l.width), DType::F32))
        .collect();
    let mut top_hidden = Tensor::zeros(Shape::matrix(batch, top_width), DType::F32);
    let mut logits = Tensor::zeros(Shape::matrix(batch, vocab), DType::F32);
    let mut probs = Tensor::zeros(Shape::matrix(batch, vocab), DType::F32);

    let input_data = inputs.as_f32_slice();

    for t in 0..max_steps {
        // Gather this timestep's one-hot rows into the bottom layer input.
        {
            let x0 = layer_inputs[0].as_f32_slice_mut();
            for b in 0..batch {
                let src = &input_data[(b * max_steps + t) * vocab..(b * max_steps + t + 1) * vocab];
                x0[b * vocab..(b + 1) * vocab].copy_from_slice(src);
            }
        }

        for (k, layer) in layers.iter().enumerate() {
            let width = layer.width;

            // Snapshot this layer's hidden band into a contiguous matrix.
            {
                let h_src = state.hidden.as_f32_slice();
                let h_dst = hidden_bufs[k].as_f32_slice_mut();
                for b in 0..batch {
                    let off = b * state_width + layer.col_offset;
                    h_dst[b * width..(b + 1) * width].copy_from_slice(&h_src[off..off + width]);
                }
            }

            // gates = x · w_ih + bias + h · w_hh
            linear(
                &layer_inputs[k].view(),
                &layer.w_ih.view(),
                &layer.bias.view(),
                &mut gate_bufs[k],
            )?;
            matmul_acc(&hidden_bufs[k].view(), &layer.w_hh.view(), &mut gate_bufs[k])?;

            // Apply the gate math row by row, skipping exhausted sequences.
            let gates = gate_bufs[k].as_f32_slice_mut();
            let h_all = state.hidden.as_f32_slice_mut();
            let c_all = state.cell.as_f32_slice_mut();
            for b in 0..batch {
                if t >= lengths[b] {
                    continue;
                }
                let g_row = &mut gates[b * 4 * width..(b + 1) * 4 * width];
                let (i_gate, rest) = g_row.split_at_mut(width);
                let (f_gate, rest) = rest.split_at_mut(width);
                let (g_gate, o_gate) = rest.split_at_mut(width);
                sigmoid(i_gate);
                sigmoid(f_gate);
                tanh(g_gate);
                sigmoid(o_gate);

                let off = b * state_width + layer.col_offset;
                for j in 0..width {
                    let c_new = f_gate[j] * c_all[off + j] + i_gate[j] * g_gate[j];
                    c_all[off + j] = c_new;
                    h_all[off + j] = o_gate[j] * c_new.tanh();
                }
            }

            // The updated band feeds the next layer (or the projection).
            {
                let h_src = state.hidden.as_f32_slice();
                let dst = if k + 1 < layers.len() {
                    layer_inputs[k + 1].as_f32_slice_mut()
                } else {
                    top_hidden.as_f32_slice_mut()
                };
                for b in 0..batch {
                    let off = b * state_width + layer.col_offset;
                    dst[b * width..(b + 1) * width].copy_from_slice(&h_src[off..off + width]);
                }
            }
        }

        // Project the top layer onto vocabulary scores.
        linear(&top_hidden.view(), &w_out.view(), &b_out.view(), &mut logits)?;
        let emitted = match rnn.output_mode() {
            OutputMode::Probabilities => {
                softmax(&logits.view(), &mut probs)?;
                probs.as_f32_slice()
            }
            OutputMode::Logits => logits.as_f32_slice(),
        };

        let out = outputs.as_f32_slice_mut();
        for b in 0..batch {
            if t >= lengths[b] {
                continue;
            }
            let dst = &mut out[(b * max_steps + t) * vocab..(b * max_steps + t + 1) * vocab];
            dst.copy_from_slice(&emitted[b * vocab..(b + 1) * vocab]);
        }
    }

    Ok((outputs, state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HParams;

    fn build_small(store: &mut VariableStore, mode: OutputMode) -> NoteRnn {
        let hparams = HParams {
            rnn_layer_sizes: vec![6, 4],
            one_hot_length: 5,
            batch_size: 2,
        };
        let rnn = NoteRnn::build(store, "m", &hparams, mode).unwrap();
        store.initialize_scope("m", 1234);
        rnn
    }

    fn one_hot_seq(notes: &[usize], vocab: usize) -> Tensor {
        let mut data = vec![0.0f32; notes.len() * vocab];
        for (t, &n) in notes.iter().enumerate() {
            data[t * vocab + n] = 1.0;
        }
        Tensor::from_f32(Shape::sequence(1, notes.len(), vocab), &data).unwrap()
    }

    fn approx_eq(a: &[f32], b: &[f32], tol: f32) -> bool {
        a.len() == b.len() && a.iter().zip(b).all(|(x, y)| (x - y).abs() < tol)
    }

    #[test]
    fn test_output_shape_and_distribution() {
        let mut store = VariableStore::new();
        let rnn = build_small(&mut store, OutputMode::Probabilities);

        let inputs = one_hot_seq(&[0, 2, 4], 5);
        let zero = RecurrentState::zero(1, rnn.state_width());
        let (outputs, state) = run_sequence(&store, &rnn, &inputs, &[3], &zero).unwrap();

        assert_eq!(outputs.shape(), &Shape::sequence(1, 3, 5));
        assert_eq!(state.batch_size(), 1);
        assert_eq!(state.state_width(), 10);
        assert!(!state.is_zero());

        // Every emitted step is a probability distribution.
        let out = outputs.as_f32_slice();
        for t in 0..3 {
            let sum: f32 = out[t * 5..(t + 1) * 5].iter().sum();
            assert!((sum - 1.0).abs() < 1e-5, "step {t} sums to {sum}");
        }
    }

    #[test]
    fn test_stepwise_equals_batched() {
        let mut store = VariableStore::new();
        let rnn = build_small(&mut store, OutputMode::Probabilities);
        let notes = [1usize, 3, 0, 2, 4];

        // One batched pass over the whole sequence.
        let inputs = one_hot_seq(&notes, 5);
        let zero = RecurrentState::zero(1, rnn.state_width());
        let (batched_out, batched_state) =
            run_sequence(&store, &rnn, &inputs, &[notes.len()], &zero).unwrap();

        // The same notes, one step at a time, threading the state.
        let mut state = RecurrentState::zero(1, rnn.state_width());
        let mut last = Vec::new();
        for &n in &notes {
            let step = one_hot_seq(&[n], 5);
            let (out, next) = run_sequence(&store, &rnn, &step, &[1], &state).unwrap();
            last = out.as_f32_slice().to_vec();
            state = next;
        }

        let batched = batched_out.as_f32_slice();
        let final_batched = &batched[(notes.len() - 1) * 5..notes.len() * 5];
        assert!(approx_eq(final_batched, &last, 1e-5));
        assert!(approx_eq(
            batched_state.hidden().as_f32_slice(),
            state.hidden().as_f32_slice(),
            1e-5
        ));
        assert!(approx_eq(
            batched_state.cell_memory().as_f32_slice(),
            state.cell_memory().as_f32_slice(),
            1e-5
        ));
    }

    #[test]
    fn test_short_sequences_masked() {
        let mut store = VariableStore::new();
        let hparams = HParams {
            rnn_layer_sizes: vec![6],
            one_hot_length: 5,
            batch_size: 2,
        };
        let rnn = NoteRnn::build(&mut store, "m", &hparams, OutputMode::Probabilities).unwrap();
        store.initialize_scope("m", 99);

        // Batch of two, padded to 3 steps; the second sequence is length 1.
        let mut data = vec![0.0f32; 2 * 3 * 5];
        for t in 0..3 {
            data[(t) * 5] = 1.0; // row 0: note 0 at every step
        }
        data[(3 + 0) * 5 + 2] = 1.0; // row 1: note 2 at step 0
        let inputs = Tensor::from_f32(Shape::sequence(2, 3, 5), &data).unwrap();
        let zero = RecurrentState::zero(2, 6);

        let (outputs, state) = run_sequence(&store, &rnn, &inputs, &[3, 1], &zero).unwrap();

        let out = outputs.as_f32_slice();
        // Row 1 steps 1 and 2 were beyond the sequence: all-zero output.
        assert!(out[(3 + 1) * 5..(3 + 2) * 5].iter().all(|&x| x == 0.0));
        assert!(out[(3 + 2) * 5..(3 + 3) * 5].iter().all(|&x| x == 0.0));
        // Step 0 of row 1 is a real distribution.
        let sum: f32 = out[3 * 5..(3 + 1) * 5].iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);

        // Row 1's state matches a standalone length-1 run.
        let single = one_hot_seq(&[2], 5);
        let (_, solo_state) =
            run_sequence(&store, &rnn, &single, &[1], &RecurrentState::zero(1, 6)).unwrap();
        let h = state.hidden().as_f32_slice();
        assert!(approx_eq(&h[6..12], solo_state.hidden().as_f32_slice(), 1e-6));
    }

    #[test]
    fn test_logits_mode_unnormalized() {
        let mut store = VariableStore::new();
        let rnn = build_small(&mut store, OutputMode::Logits);

        let inputs = one_hot_seq(&[1], 5);
        let zero = RecurrentState::zero(1, rnn.state_width());
        let (outputs, _) = run_sequence(&store, &rnn, &inputs, &[1], &zero).unwrap();

        // Logits have no reason to sum to one.
        let sum: f32 = outputs.as_f32_slice().iter().sum();
        assert!((sum - 1.0).abs() > 1e-3);
    }

    #[test]
    fn test_rejects_wrong_vocab() {
        let mut store = VariableStore::new();
        let rnn = build_small(&mut store, OutputMode::Probabilities);

        let inputs = Tensor::zeros(Shape::sequence(1, 2, 7), DType::F32);
        let zero = RecurrentState::zero(1, rnn.state_width());
        let err = run_sequence(&store, &rnn, &inputs, &[2], &zero).unwrap_err();
        assert!(matches!(err, ModelError::InvalidInput { what: "inputs", .. }));
    }

    #[test]
    fn test_rejects_wrong_state_shape() {
        let mut store = VariableStore::new();
        let rnn = build_small(&mut store, OutputMode::Probabilities);

        let inputs = one_hot_seq(&[0], 5);
        let bad = RecurrentState::zero(1, 3);
        let err = run_sequence(&store, &rnn, &inputs, &[1], &bad).unwrap_err();
        assert!(matches!(
            err,
            ModelError::InvalidInput { what: "initial_state", .. }
        ));
    }

    #[test]
    fn test_rejects_length_beyond_padding() {
        let mut store = VariableStore::new();
        let rnn = build_small(&mut store, OutputMode::Probabilities);

        let inputs = one_hot_seq(&[0, 1], 5);
        let zero = RecurrentState::zero(1, rnn.state_width());
        let err = run_sequence(&store, &rnn, &inputs, &[5], &zero).unwrap_err();
        assert!(matches!(err, ModelError::InvalidInput { what: "lengths", .. }));
    }

    #[test]
    fn test_unbuilt_scope_fails() {
        let store = VariableStore::new();
        let mut other = VariableStore::new();
        let rnn = build_small(&mut other, OutputMode::Probabilities);

        let inputs = one_hot_seq(&[0], 5);
        let zero = RecurrentState::zero(1, rnn.state_width());
        let err = run_sequence(&store, &rnn, &inputs, &[1], &zero).unwrap_err();
        assert!(matches!(err, ModelError::VariableNotFound { .. }));
    }
}
