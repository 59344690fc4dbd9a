// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Reading snapshot files into the live variable store, and writing them.
//!
//! Restore is two-phase. Phase one walks the [`VariableMap`] and checks
//! that every checkpoint tensor exists, is f32, and matches its live
//! variable's shape. Only when the whole map validates does phase two
//! copy any data, so a bad checkpoint can never leave a partially
//! restored store behind.

use std::path::{Path, PathBuf};

use melody_model::VariableStore;
use tensor_core::{DType, Shape, Tensor};

use crate::{build_variable_map, CheckpointError, CheckpointPointer, VariableMap, POINTER_FILE};

/// Restores the mapped variables from the snapshot at `path`.
///
/// Only the variables named by `map` are touched; anything else in the
/// store (e.g. another scope sharing the graph) is left alone.
///
/// # Errors
/// [`CheckpointError::TensorNotFound`] if a mapped tensor is absent,
/// [`CheckpointError::ShapeMismatch`] if a stored shape disagrees with
/// the live variable — both raised before any variable is written.
pub fn restore(
    store: &mut VariableStore,
    path: &Path,
    map: &VariableMap,
) -> Result<(), CheckpointError> {
    tracing::info!("restoring {} variables from {}", map.len(), path.display());

    let file = std::fs::File::open(path).map_err(|source| CheckpointError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mmap = unsafe { memmap2::Mmap::map(&file) }.map_err(|source| CheckpointError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let tensors = safetensors::SafeTensors::deserialize(&mmap).map_err(|e| {
        CheckpointError::SafeTensors {
            path: path.to_path_buf(),
            detail: format!("SafeTensors parse error: {e}"),
        }
    })?;

    // Phase one: validate every mapping before writing anything.
    for (live, checkpoint_name) in map.iter() {
        let view = tensors
            .tensor(checkpoint_name)
            .map_err(|_| CheckpointError::TensorNotFound {
                name: checkpoint_name.to_string(),
                path: path.to_path_buf(),
            })?;

        if view.dtype() != safetensors::Dtype::F32 {
            return Err(CheckpointError::UnsupportedDType {
                name: checkpoint_name.to_string(),
                dtype: format!("{:?}", view.dtype()),
            });
        }

        let stored = Shape::new(view.shape().to_vec());
        let live_shape = store.get(live)?.shape().clone();
        if stored != live_shape {
            return Err(CheckpointError::ShapeMismatch {
                name: live.to_string(),
                live: live_shape,
                stored,
            });
        }
    }

    // Phase two: copy.
    for (live, checkpoint_name) in map.iter() {
        let view = tensors.tensor(checkpoint_name).expect("validated above");
        let shape = Shape::new(view.shape().to_vec());
        let tensor = Tensor::from_bytes(shape, DType::F32, view.data().to_vec())
            .map_err(|e| CheckpointError::SafeTensors {
                path: path.to_path_buf(),
                detail: format!("tensor '{checkpoint_name}': {e}"),
            })?;
        store.assign(live, &tensor)?;
    }

    tracing::info!("restore complete");
    Ok(())
}

/// Writes every variable under `live_scope` as a snapshot in `dir`,
/// renamed to `checkpoint_scope`, and updates the `checkpoint.json`
/// pointer. Returns the snapshot path.
///
/// Snapshot filenames embed a zero-padded step count
/// (`note-rnn-ckpt-00000042.safetensors`) so directory scans recover
/// the latest one without the pointer.
pub fn save_checkpoint(
    store: &VariableStore,
    live_scope: &str,
    checkpoint_scope: &str,
    dir: &Path,
    step: u64,
) -> Result<PathBuf, CheckpointError> {
    let names = store.names_under(live_scope);
    let map = build_variable_map(&names, live_scope, checkpoint_scope)?;

    let mut views: Vec<(String, safetensors::tensor::TensorView<'_>)> =
        Vec::with_capacity(map.len());
    for (live, checkpoint_name) in map.iter() {
        let tensor = store.get(live)?;
        let view = safetensors::tensor::TensorView::new(
            safetensors::Dtype::F32,
            tensor.shape().dims().to_vec(),
            tensor.as_bytes(),
        )
        .map_err(|e| CheckpointError::SafeTensors {
            path: dir.to_path_buf(),
            detail: format!("tensor '{checkpoint_name}': {e:?}"),
        })?;
        views.push((checkpoint_name.to_string(), view));
    }

    let payload = safetensors::serialize(views, &None).map_err(|e| {
        CheckpointError::SafeTensors {
            path: dir.to_path_buf(),
            detail: format!("serialize failed: {e:?}"),
        }
    })?;

    std::fs::create_dir_all(dir).map_err(|source| CheckpointError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let filename = format!("note-rnn-ckpt-{step:08}.safetensors");
    let snapshot = dir.join(&filename);
    std::fs::write(&snapshot, payload).map_err(|source| CheckpointError::Io {
        path: snapshot.clone(),
        source,
    })?;

    let pointer = CheckpointPointer { latest: filename };
    let pointer_path = dir.join(POINTER_FILE);
    let pointer_json = serde_json::to_string_pretty(&pointer).map_err(|source| {
        CheckpointError::PointerParse {
            path: pointer_path.clone(),
            source,
        }
    })?;
    std::fs::write(&pointer_path, pointer_json).map_err(|source| CheckpointError::Io {
        path: pointer_path,
        source,
    })?;

    tracing::info!("wrote checkpoint {}", snapshot.display());
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolve_checkpoint_path;
    use melody_model::{HParams, NoteRnn, OutputMode};
    use std::collections::HashMap;

    /// Writes raw named tensors as a snapshot file without going
    /// through a live store.
    fn write_raw_snapshot(
        path: &Path,
        tensors: &HashMap<String, Tensor>,
    ) -> Result<(), CheckpointError> {
        let mut views = Vec::with_capacity(tensors.len());
        for (name, tensor) in tensors {
            let view = safetensors::tensor::TensorView::new(
                safetensors::Dtype::F32,
                tensor.shape().dims().to_vec(),
                tensor.as_bytes(),
            )
            .map_err(|e| CheckpointError::SafeTensors {
                path: path.to_path_buf(),
                detail: format!("tensor '{name}': {e:?}"),
            })?;
            views.push((name.clone(), view));
        }
        let payload = safetensors::serialize(views, &None).map_err(|e| {
            CheckpointError::SafeTensors {
                path: path.to_path_buf(),
                detail: format!("serialize failed: {e:?}"),
            }
        })?;
        std::fs::write(path, payload).map_err(|source| CheckpointError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    fn small_hparams() -> HParams {
        HParams {
            rnn_layer_sizes: vec![4],
            one_hot_length: 3,
            batch_size: 2,
        }
    }

    /// Builds a store with one trained-looking scope.
    fn trained_store(scope: &str) -> VariableStore {
        let mut store = VariableStore::new();
        NoteRnn::build(&mut store, scope, &small_hparams(), OutputMode::Probabilities).unwrap();
        store.initialize_scope(scope, 7);
        store
    }

    #[test]
    fn test_save_then_restore_across_scopes() {
        let dir = tempfile::tempdir().unwrap();

        // "Train" under rnn_model and snapshot it.
        let trained = trained_store("rnn_model");
        save_checkpoint(&trained, "rnn_model", "rnn_model", dir.path(), 1).unwrap();

        // Load into a differently-scoped instantiation.
        let mut live = VariableStore::new();
        NoteRnn::build(&mut live, "q_network", &small_hparams(), OutputMode::Probabilities)
            .unwrap();
        let names = live.names_under("q_network");
        let map = build_variable_map(&names, "q_network", "rnn_model").unwrap();

        let path = resolve_checkpoint_path(dir.path(), None).unwrap();
        restore(&mut live, &path, &map).unwrap();

        // Values came across under the translated names.
        assert_eq!(
            live.get("q_network/cell/layer_0/w_ih").unwrap().as_f32_slice(),
            trained.get("rnn_model/cell/layer_0/w_ih").unwrap().as_f32_slice(),
        );
        assert_eq!(
            live.get("q_network/logits/b_out").unwrap().as_f32_slice(),
            trained.get("rnn_model/logits/b_out").unwrap().as_f32_slice(),
        );
    }

    #[test]
    fn test_restore_missing_tensor() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = dir.path().join("partial.safetensors");

        // Snapshot holding only one of the expected tensors.
        let trained = trained_store("rnn_model");
        let mut partial = HashMap::new();
        partial.insert(
            "rnn_model/cell/layer_0/w_ih".to_string(),
            trained.get("rnn_model/cell/layer_0/w_ih").unwrap().clone(),
        );
        write_raw_snapshot(&snapshot, &partial).unwrap();

        let mut live = VariableStore::new();
        NoteRnn::build(&mut live, "q", &small_hparams(), OutputMode::Probabilities).unwrap();
        let map = build_variable_map(&live.names_under("q"), "q", "rnn_model").unwrap();

        let err = restore(&mut live, &snapshot, &map).unwrap_err();
        assert!(matches!(err, CheckpointError::TensorNotFound { .. }));

        // Nothing was written: the present tensor did not sneak in.
        assert!(live
            .get("q/cell/layer_0/w_ih")
            .unwrap()
            .as_f32_slice()
            .iter()
            .all(|&x| x == 0.0));
    }

    #[test]
    fn test_restore_shape_mismatch_is_descriptive() {
        let dir = tempfile::tempdir().unwrap();

        // Snapshot from a wider model.
        let mut wide = VariableStore::new();
        let wide_hparams = HParams {
            rnn_layer_sizes: vec![8],
            one_hot_length: 3,
            batch_size: 2,
        };
        NoteRnn::build(&mut wide, "rnn_model", &wide_hparams, OutputMode::Probabilities).unwrap();
        wide.initialize_scope("rnn_model", 3);
        save_checkpoint(&wide, "rnn_model", "rnn_model", dir.path(), 1).unwrap();

        // Live model with the default (narrower) hyperparameters.
        let mut live = VariableStore::new();
        NoteRnn::build(&mut live, "q", &small_hparams(), OutputMode::Probabilities).unwrap();
        let map = build_variable_map(&live.names_under("q"), "q", "rnn_model").unwrap();

        let path = resolve_checkpoint_path(dir.path(), None).unwrap();
        let err = restore(&mut live, &path, &map).unwrap_err();
        match err {
            CheckpointError::ShapeMismatch { name, .. } => {
                assert!(name.starts_with("q/"));
            }
            other => panic!("expected ShapeMismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_restore_leaves_other_scopes_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let trained = trained_store("rnn_model");
        save_checkpoint(&trained, "rnn_model", "rnn_model", dir.path(), 1).unwrap();

        // One store, two scopes; restore only the first.
        let mut live = VariableStore::new();
        NoteRnn::build(&mut live, "q", &small_hparams(), OutputMode::Probabilities).unwrap();
        NoteRnn::build(&mut live, "target_q", &small_hparams(), OutputMode::Probabilities)
            .unwrap();

        let map = build_variable_map(&live.names_under("q"), "q", "rnn_model").unwrap();
        let path = resolve_checkpoint_path(dir.path(), None).unwrap();
        restore(&mut live, &path, &map).unwrap();

        assert!(live
            .get("q/cell/layer_0/w_ih")
            .unwrap()
            .as_f32_slice()
            .iter()
            .any(|&x| x != 0.0));
        assert!(live
            .get("target_q/cell/layer_0/w_ih")
            .unwrap()
            .as_f32_slice()
            .iter()
            .all(|&x| x == 0.0));
    }

    #[test]
    fn test_save_updates_pointer() {
        let dir = tempfile::tempdir().unwrap();
        let trained = trained_store("rnn_model");
        save_checkpoint(&trained, "rnn_model", "rnn_model", dir.path(), 1).unwrap();
        save_checkpoint(&trained, "rnn_model", "rnn_model", dir.path(), 2).unwrap();

        let pointer = CheckpointPointer::from_dir(dir.path()).unwrap();
        assert_eq!(pointer.latest, "note-rnn-ckpt-00000002.safetensors");
    }
}
