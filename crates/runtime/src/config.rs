// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Runtime configuration loaded from TOML files or constructed
//! programmatically.
//!
//! # TOML Format
//! ```toml
//! checkpoint_dir = "./checkpoints"
//! backup_checkpoint = "./backup/note-rnn.safetensors"
//! primer_path = "./primer.json"
//! training_files = ["./batches/batch-000.safetensors"]
//! scope = "melody_rnn"
//! checkpoint_scope = "rnn_model"
//! emit_probabilities = true
//!
//! [hparams]
//! rnn_layer_sizes = [100]
//! one_hot_length = 38
//! batch_size = 128
//! ```

use std::path::{Path, PathBuf};

use melody_model::{HParams, OutputMode};

use crate::RuntimeError;

/// Configuration for a melody session.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RuntimeConfig {
    /// Directory of checkpoint snapshots plus the `checkpoint.json` pointer.
    pub checkpoint_dir: PathBuf,
    /// Fallback snapshot used when the directory yields nothing.
    pub backup_checkpoint: Option<PathBuf>,
    /// Decoded primer melody (JSON). Absent or missing → priming is skipped.
    pub primer_path: Option<PathBuf>,
    /// Pre-encoded padded training batch files. `None` (or empty) disables
    /// the training pipeline.
    pub training_files: Option<Vec<PathBuf>>,
    /// Scope this session's variables are registered under.
    #[serde(default = "default_scope")]
    pub scope: String,
    /// Scope the checkpoint's variables were serialized under.
    #[serde(default = "default_checkpoint_scope")]
    pub checkpoint_scope: String,
    /// Emit softmax probabilities (`true`) or raw logits (`false`).
    #[serde(default = "default_true")]
    pub emit_probabilities: bool,
    /// Seed for fresh (non-checkpoint) weight initialization.
    #[serde(default)]
    pub init_seed: u64,
    /// Hyperparameters; `None` uses the documented defaults. Must match
    /// the checkpoint being restored.
    pub hparams: Option<HParams>,
}

fn default_scope() -> String {
    "melody_rnn".to_string()
}

fn default_checkpoint_scope() -> String {
    "rnn_model".to_string()
}

fn default_true() -> bool {
    true
}

impl RuntimeConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, RuntimeError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RuntimeError::Config(format!("cannot read config '{}': {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, RuntimeError> {
        toml::from_str(toml_str)
            .map_err(|e| RuntimeError::Config(format!("TOML parse error: {e}")))
    }

    /// Serialises configuration to TOML.
    pub fn to_toml(&self) -> Result<String, RuntimeError> {
        toml::to_string_pretty(self)
            .map_err(|e| RuntimeError::Config(format!("TOML serialise error: {e}")))
    }

    /// Returns the configured hyperparameters, or the documented defaults.
    pub fn resolve_hparams(&self) -> HParams {
        match &self.hparams {
            Some(h) => {
                tracing::info!("using custom hyperparameters");
                h.clone()
            }
            None => {
                tracing::info!("no hyperparameters supplied, using defaults");
                HParams::default()
            }
        }
    }

    /// The output mode the cell is built with.
    pub fn output_mode(&self) -> OutputMode {
        if self.emit_probabilities {
            OutputMode::Probabilities
        } else {
            OutputMode::Logits
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            checkpoint_dir: PathBuf::from("./checkpoints"),
            backup_checkpoint: None,
            primer_path: None,
            training_files: None,
            scope: default_scope(),
            checkpoint_scope: default_checkpoint_scope(),
            emit_probabilities: true,
            hparams: None,
            init_seed: 0,
        }
    }
}
