// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for checkpoint resolution and restoration.

use std::path::PathBuf;

use tensor_core::Shape;

/// Errors that can occur while locating or restoring a checkpoint.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// Neither the checkpoint directory nor the backup path yielded a file.
    #[error("no checkpoint available: nothing under '{}', backup {}",
        dir.display(),
        backup.as_ref().map(|p| format!("'{}'", p.display())).unwrap_or_else(|| "not configured".into()))]
    NoCheckpointAvailable {
        dir: PathBuf,
        backup: Option<PathBuf>,
    },

    /// A filesystem read failed.
    #[error("cannot read '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The `checkpoint.json` pointer file is malformed.
    #[error("malformed checkpoint pointer '{}': {source}", path.display())]
    PointerParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The SafeTensors payload could not be parsed or written.
    #[error("failed to load checkpoint '{}': {detail}", path.display())]
    SafeTensors { path: PathBuf, detail: String },

    /// A mapped variable is missing from the checkpoint file.
    #[error("checkpoint '{}' has no tensor '{name}'", path.display())]
    TensorNotFound { name: String, path: PathBuf },

    /// A stored tensor's shape disagrees with the live variable.
    #[error("shape mismatch restoring '{name}': live {live}, stored {stored}")]
    ShapeMismatch {
        name: String,
        live: Shape,
        stored: Shape,
    },

    /// A stored tensor has a dtype the model cannot hold.
    #[error("unsupported dtype {dtype} for checkpoint tensor '{name}'")]
    UnsupportedDType { name: String, dtype: String },

    /// Two live variables renamed to the same checkpoint name.
    #[error("rename collision: '{first}' and '{second}' both map to '{checkpoint_name}'")]
    NameCollision {
        checkpoint_name: String,
        first: String,
        second: String,
    },

    /// A live variable lookup or assignment failed.
    #[error(transparent)]
    Model(#[from] melody_model::ModelError),
}
