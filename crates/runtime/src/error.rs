// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for the session runtime.

use std::path::PathBuf;

/// Errors that can occur while configuring or driving a session.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Configuration could not be read or parsed.
    #[error("configuration error: {0}")]
    Config(String),

    /// Model construction or a forward pass failed.
    #[error(transparent)]
    Model(#[from] melody_model::ModelError),

    /// A tensor kernel failed.
    #[error(transparent)]
    Tensor(#[from] tensor_core::TensorError),

    /// Checkpoint resolution or restoration failed.
    #[error(transparent)]
    Checkpoint(#[from] checkpoint_store::CheckpointError),

    /// `run_training_batch` was called but no training source is configured.
    #[error("no training source configured, cannot run a training batch")]
    TrainingNotConfigured,

    /// A training batch file is unreadable or disagrees with the model.
    #[error("bad training batch '{}': {detail}", path.display())]
    TrainingSource { path: PathBuf, detail: String },

    /// The feeder thread is gone and no further batches will arrive.
    #[error("training feeder stopped")]
    TrainingStopped,

    /// The primer file exists but is not a valid decoded melody.
    #[error("bad primer '{}': {detail}", path.display())]
    Primer { path: PathBuf, detail: String },

    /// A note vector of the wrong width was supplied.
    #[error("invalid note vector: expected length {expected}, got {actual}")]
    InvalidNote { expected: usize, actual: usize },
}
