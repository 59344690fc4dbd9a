// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The primer melody.
//!
//! Priming input arrives already decoded: a JSON file with one one-hot
//! row per step, produced by an external melody-extraction component.
//! The raw MIDI never reaches this crate.
//!
//! A missing primer file is not an error — the session logs a warning
//! and proceeds with a zero initial state.

use std::path::Path;

use tensor_core::{Shape, Tensor};

use crate::RuntimeError;

/// On-disk form: `{"events": [[0,0,1,...], ...]}`.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct PrimerFile {
    events: Vec<Vec<f32>>,
}

/// A decoded seed melody, held as a batch-of-one sequence tensor.
#[derive(Debug, Clone)]
pub struct Primer {
    sequence: Tensor,
    num_steps: usize,
}

impl Primer {
    /// Loads a primer from `path`, validating every row as a one-hot
    /// vector of width `one_hot_length`.
    ///
    /// Returns `Ok(None)` with a logged warning if the file does not
    /// exist. A file that exists but is malformed is an error.
    pub fn load(path: &Path, one_hot_length: usize) -> Result<Option<Self>, RuntimeError> {
        if !path.is_file() {
            tracing::warn!("no such primer file '{}', priming will be skipped", path.display());
            return Ok(None);
        }

        let content = std::fs::read_to_string(path).map_err(|e| RuntimeError::Primer {
            path: path.to_path_buf(),
            detail: format!("read failed: {e}"),
        })?;
        let file: PrimerFile = serde_json::from_str(&content).map_err(|e| {
            RuntimeError::Primer {
                path: path.to_path_buf(),
                detail: format!("JSON parse error: {e}"),
            }
        })?;

        if file.events.is_empty() {
            return Err(RuntimeError::Primer {
                path: path.to_path_buf(),
                detail: "primer holds no events".into(),
            });
        }

        let num_steps = file.events.len();
        let mut data = Vec::with_capacity(num_steps * one_hot_length);
        for (t, row) in file.events.iter().enumerate() {
            if row.len() != one_hot_length {
                return Err(RuntimeError::Primer {
                    path: path.to_path_buf(),
                    detail: format!(
                        "event {t} has width {}, expected {one_hot_length}",
                        row.len()
                    ),
                });
            }
            let ones = row.iter().filter(|&&x| x == 1.0).count();
            let zeros = row.iter().filter(|&&x| x == 0.0).count();
            if ones != 1 || ones + zeros != row.len() {
                return Err(RuntimeError::Primer {
                    path: path.to_path_buf(),
                    detail: format!("event {t} is not a one-hot vector"),
                });
            }
            data.extend_from_slice(row);
        }

        let sequence = Tensor::from_f32(Shape::sequence(1, num_steps, one_hot_length), &data)
            .map_err(|e| RuntimeError::Primer {
                path: path.to_path_buf(),
                detail: e.to_string(),
            })?;

        tracing::info!("loaded primer '{}' ({num_steps} steps)", path.display());
        Ok(Some(Self { sequence, num_steps }))
    }

    /// The primer as a `(1 × steps × vocabulary)` tensor.
    pub fn sequence(&self) -> &Tensor {
        &self.sequence
    }

    /// Number of steps in the seed melody.
    pub fn num_steps(&self) -> usize {
        self.num_steps
    }
}
