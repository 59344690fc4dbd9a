// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Locating the checkpoint file to restore from.
//!
//! Resolution order:
//! 1. The snapshot named by the `checkpoint.json` pointer, if it exists.
//! 2. The lexicographically-latest `*.safetensors` file in the
//!    directory (snapshot names carry zero-padded step counts, so
//!    lexicographic order is step order).
//! 3. The backup path, if configured and present.
//! 4. [`CheckpointError::NoCheckpointAvailable`].

use std::path::{Path, PathBuf};

use crate::CheckpointError;

/// Filename of the latest-snapshot pointer inside a checkpoint directory.
pub const POINTER_FILE: &str = "checkpoint.json";

/// The JSON pointer naming the snapshot to prefer.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CheckpointPointer {
    /// Filename of the latest snapshot, relative to the directory.
    pub latest: String,
}

impl CheckpointPointer {
    /// Reads and parses the pointer file inside `dir`.
    pub fn from_dir(dir: &Path) -> Result<Self, CheckpointError> {
        let path = dir.join(POINTER_FILE);
        let content = std::fs::read_to_string(&path).map_err(|source| CheckpointError::Io {
            path: path.clone(),
            source,
        })?;
        serde_json::from_str(&content)
            .map_err(|source| CheckpointError::PointerParse { path, source })
    }
}

/// Resolves the checkpoint file to restore from.
///
/// # Errors
/// Returns [`CheckpointError::NoCheckpointAvailable`] naming both
/// searched locations when neither yields a file. A directory that does
/// not exist is treated as empty, not as an I/O error.
pub fn resolve_checkpoint_path(
    dir: &Path,
    backup: Option<&Path>,
) -> Result<PathBuf, CheckpointError> {
    if dir.join(POINTER_FILE).is_file() {
        let pointer = CheckpointPointer::from_dir(dir)?;
        let candidate = dir.join(&pointer.latest);
        if candidate.is_file() {
            tracing::info!("checkpoint resolved via pointer: {}", candidate.display());
            return Ok(candidate);
        }
        tracing::warn!(
            "checkpoint pointer names missing file '{}', scanning directory",
            pointer.latest
        );
    }

    if let Some(found) = latest_snapshot_in(dir)? {
        tracing::info!("checkpoint resolved by scan: {}", found.display());
        return Ok(found);
    }

    if let Some(backup) = backup {
        if backup.is_file() {
            tracing::info!("no checkpoint in directory, using backup {}", backup.display());
            return Ok(backup.to_path_buf());
        }
    }

    Err(CheckpointError::NoCheckpointAvailable {
        dir: dir.to_path_buf(),
        backup: backup.map(Path::to_path_buf),
    })
}

/// Returns the lexicographically-latest `*.safetensors` file in `dir`,
/// or `None` if the directory is absent or holds none.
fn latest_snapshot_in(dir: &Path) -> Result<Option<PathBuf>, CheckpointError> {
    if !dir.is_dir() {
        return Ok(None);
    }
    let entries = std::fs::read_dir(dir).map_err(|source| CheckpointError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut best: Option<PathBuf> = None;
    for entry in entries {
        let entry = entry.map_err(|source| CheckpointError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("safetensors") {
            continue;
        }
        if best.as_ref().map_or(true, |b| path.file_name() > b.file_name()) {
            best = Some(path);
        }
    }
    Ok(best)
}
