// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The melody session: one variable store, one cell, one recurrent
//! state, three ways to bring the weights to life.
//!
//! A session is built to be embedded in a reinforcement-learning agent
//! as its next-note estimator — the agent constructs two sessions over
//! the same checkpoint (Q-network and target network) under different
//! scopes and drives [`MelodySession::get_next_note_from_note`] once per
//! simulated time step.
//!
//! # Initialization
//! Call exactly one of [`initialize_new`](MelodySession::initialize_new),
//! [`initialize_and_restore`](MelodySession::initialize_and_restore), or
//! [`restore_initialize_prime`](MelodySession::restore_initialize_prime)
//! before any inference call. The modes are terminal; re-entering one is
//! outside the contract and not guarded.
//!
//! # Threading
//! Not synchronized: the recurrent state is mutated in place by every
//! step, so concurrent calls on one session race. One session, one
//! driver.

use checkpoint_store::{build_variable_map, resolve_checkpoint_path, restore};
use melody_model::{
    run_sequence, HParams, NoteRnn, RecurrentState, VariableStore,
};
use tensor_core::{argmax, one_hot, Shape, Tensor};

use crate::{Primer, RuntimeConfig, RuntimeError, TrainingFeeder};

/// Everything one training batch produced on its way through the model.
#[derive(Debug)]
pub struct TrainingBatchOutput {
    /// Emitted distributions, `(batch × steps × vocabulary)`.
    pub predictions: Tensor,
    /// Final hidden states, `(batch × state_width)`.
    pub states: Tensor,
    /// Valid prefix length of each sequence.
    pub lengths: Vec<usize>,
}

/// A loaded next-note model with its evolving recurrent state.
#[derive(Debug)]
pub struct MelodySession {
    config: RuntimeConfig,
    hparams: HParams,
    store: VariableStore,
    rnn: NoteRnn,
    state: RecurrentState,
    primer: Option<Primer>,
    priming_note: Option<Tensor>,
    training_files: Option<Vec<std::path::PathBuf>>,
    feeder: Option<TrainingFeeder>,
}

impl MelodySession {
    /// Builds the cell under the configured scope and loads the primer
    /// if one is configured. No weights are populated yet — follow with
    /// exactly one initialization call.
    pub fn new(config: RuntimeConfig) -> Result<Self, RuntimeError> {
        let hparams = config.resolve_hparams();
        hparams.validate()?;

        let mut store = VariableStore::new();
        let rnn = NoteRnn::build(&mut store, &config.scope, &hparams, config.output_mode())?;
        let state = RecurrentState::zero(1, rnn.state_width());

        let primer = match &config.primer_path {
            Some(path) => Primer::load(path, hparams.one_hot_length)?,
            None => None,
        };

        let training_files = match &config.training_files {
            Some(files) if files.is_empty() => {
                tracing::warn!("empty training file list, training pipeline disabled");
                None
            }
            Some(files) => Some(files.clone()),
            None => None,
        };

        Ok(Self {
            config,
            hparams,
            store,
            rnn,
            state,
            primer,
            priming_note: None,
            training_files,
            feeder: None,
        })
    }

    /// Fresh mode: fill every variable under this session's scope with
    /// its deterministic seeded initializer. No checkpoint read.
    pub fn initialize_new(&mut self) {
        self.store
            .initialize_scope(&self.config.scope, self.config.init_seed);
    }

    /// Restore-only mode: resolve the latest checkpoint (falling back to
    /// the configured backup), translate variable names, and load the
    /// weights. The recurrent state stays zero.
    pub fn initialize_and_restore(&mut self) -> Result<(), RuntimeError> {
        let path = resolve_checkpoint_path(
            &self.config.checkpoint_dir,
            self.config.backup_checkpoint.as_deref(),
        )?;
        let map = build_variable_map(
            &self.variables(),
            &self.config.scope,
            &self.config.checkpoint_scope,
        )?;
        restore(&mut self.store, &path, &map)?;
        Ok(())
    }

    /// Restore-and-prime mode: [`initialize_and_restore`] followed by
    /// one pass over the primer melody to warm the recurrent state.
    ///
    /// [`initialize_and_restore`]: MelodySession::initialize_and_restore
    pub fn restore_initialize_prime(&mut self) -> Result<(), RuntimeError> {
        self.initialize_and_restore()?;
        self.prime_model()
    }

    /// Runs the primer melody through the model as one batch-of-one
    /// call, replaces the recurrent state with the resulting final
    /// state, and records the arg-max of the final step as the priming
    /// note.
    ///
    /// With no primer configured (or a missing primer file) this logs a
    /// warning and leaves the zero state in place.
    pub fn prime_model(&mut self) -> Result<(), RuntimeError> {
        let Some(primer) = &self.primer else {
            tracing::warn!("no primer available, model state stays zero");
            return Ok(());
        };

        tracing::info!("priming model over {} steps", primer.num_steps());
        self.state = RecurrentState::zero(1, self.rnn.state_width());
        let (outputs, final_state) = run_sequence(
            &self.store,
            &self.rnn,
            primer.sequence(),
            &[primer.num_steps()],
            &self.state,
        )?;
        self.state = final_state;

        let vocab = self.hparams.one_hot_length;
        let data = outputs.as_f32_slice();
        let last = &data[(primer.num_steps() - 1) * vocab..primer.num_steps() * vocab];
        self.priming_note = Some(one_hot(argmax(last)?, vocab)?);
        Ok(())
    }

    /// Feeds one note through the model and returns the most probable
    /// next note, advancing the recurrent state.
    ///
    /// This is the hot path of the surrounding rollout loop: only
    /// numeric buffers are exchanged, never graph structure.
    pub fn get_next_note_from_note(&mut self, note: &[f32]) -> Result<Vec<f32>, RuntimeError> {
        let vocab = self.hparams.one_hot_length;
        if note.len() != vocab {
            return Err(RuntimeError::InvalidNote {
                expected: vocab,
                actual: note.len(),
            });
        }

        let input = Tensor::from_f32(Shape::sequence(1, 1, vocab), note)?;
        let (outputs, final_state) =
            run_sequence(&self.store, &self.rnn, &input, &[1], &self.state)?;
        self.state = final_state;

        self.get_note_from_softmax(outputs.as_f32_slice())
    }

    /// Extracts a one-hot encoding of the most probable note from a
    /// distribution (probabilities or logits — arg-max is the same).
    /// Exact ties go to the lowest index.
    pub fn get_note_from_softmax(&self, distribution: &[f32]) -> Result<Vec<f32>, RuntimeError> {
        let vocab = self.hparams.one_hot_length;
        if distribution.len() != vocab {
            return Err(RuntimeError::InvalidNote {
                expected: vocab,
                actual: distribution.len(),
            });
        }
        let index = argmax(distribution)?;
        let encoded = one_hot(index, vocab)?;
        Ok(encoded.as_f32_slice().to_vec())
    }

    /// Pulls one batch from the training queue and runs it through the
    /// shared weights from an all-zero state.
    ///
    /// The feeder thread is started on the first call and runs until
    /// [`shutdown`](MelodySession::shutdown).
    ///
    /// # Errors
    /// Returns [`RuntimeError::TrainingNotConfigured`] (with a logged
    /// warning) when no training source is configured; a malformed batch
    /// file surfaces here as [`RuntimeError::TrainingSource`].
    pub fn run_training_batch(&mut self) -> Result<TrainingBatchOutput, RuntimeError> {
        let Some(files) = &self.training_files else {
            tracing::warn!("no training file list was provided, cannot run training batch");
            return Err(RuntimeError::TrainingNotConfigured);
        };

        if self.feeder.is_none() {
            self.feeder = Some(TrainingFeeder::start(files.clone(), self.hparams.clone()));
        }
        let batch = self
            .feeder
            .as_ref()
            .expect("feeder started above")
            .next_batch()?;

        let zero = RecurrentState::zero(self.hparams.batch_size, self.rnn.state_width());
        let (predictions, final_state) = run_sequence(
            &self.store,
            &self.rnn,
            &batch.inputs,
            &batch.lengths,
            &zero,
        )?;

        Ok(TrainingBatchOutput {
            predictions,
            states: final_state.hidden().clone(),
            lengths: batch.lengths,
        })
    }

    /// Names of all live variables under this session's scope.
    pub fn variables(&self) -> Vec<String> {
        self.store.names_under(&self.config.scope)
    }

    /// The current recurrent state.
    pub fn state(&self) -> &RecurrentState {
        &self.state
    }

    /// The one-hot note recorded by the last successful priming pass.
    pub fn priming_note(&self) -> Option<&[f32]> {
        self.priming_note.as_ref().map(|t| t.as_f32_slice())
    }

    /// The hyperparameters this session was built with.
    pub fn hparams(&self) -> &HParams {
        &self.hparams
    }

    /// Stops and joins the training feeder, if it was started.
    /// Dropping the session does the same.
    pub fn shutdown(&mut self) {
        if let Some(mut feeder) = self.feeder.take() {
            feeder.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_config() -> RuntimeConfig {
        RuntimeConfig {
            hparams: Some(HParams {
                rnn_layer_sizes: vec![8],
                one_hot_length: 5,
                batch_size: 2,
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_fresh_session_steps() {
        let mut session = MelodySession::new(tiny_config()).unwrap();
        session.initialize_new();

        let note = session.get_note_from_softmax(&[0.0, 1.0, 0.0, 0.0, 0.0]).unwrap();
        let next = session.get_next_note_from_note(&note).unwrap();
        assert_eq!(next.len(), 5);
        assert_eq!(next.iter().filter(|&&x| x == 1.0).count(), 1);
        assert!(!session.state().is_zero());
    }

    #[test]
    fn test_step_rejects_wrong_width() {
        let mut session = MelodySession::new(tiny_config()).unwrap();
        session.initialize_new();

        let err = session.get_next_note_from_note(&[1.0, 0.0]).unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::InvalidNote { expected: 5, actual: 2 }
        ));
    }

    #[test]
    fn test_get_note_from_softmax_tie_breaks_low() {
        let session = MelodySession::new(tiny_config()).unwrap();
        let note = session
            .get_note_from_softmax(&[0.1, 0.4, 0.4, 0.05, 0.05])
            .unwrap();
        assert_eq!(note, vec![0.0, 1.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_variables_listed_under_scope() {
        let session = MelodySession::new(tiny_config()).unwrap();
        let names = session.variables();
        // One layer (3 tensors) + projection pair.
        assert_eq!(names.len(), 5);
        assert!(names.iter().all(|n| n.starts_with("melody_rnn/")));
    }

    #[test]
    fn test_unconfigured_training_refused() {
        let mut session = MelodySession::new(tiny_config()).unwrap();
        session.initialize_new();

        let err = session.run_training_batch().unwrap_err();
        assert!(matches!(err, RuntimeError::TrainingNotConfigured));
    }

    #[test]
    fn test_empty_training_list_refused() {
        let mut config = tiny_config();
        config.training_files = Some(vec![]);
        let mut session = MelodySession::new(config).unwrap();
        session.initialize_new();

        let err = session.run_training_batch().unwrap_err();
        assert!(matches!(err, RuntimeError::TrainingNotConfigured));
    }

    #[test]
    fn test_prime_without_primer_keeps_zero_state() {
        let mut session = MelodySession::new(tiny_config()).unwrap();
        session.initialize_new();

        session.prime_model().unwrap();
        assert!(session.state().is_zero());
        assert!(session.priming_note().is_none());
    }
}
