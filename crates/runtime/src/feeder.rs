// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Background training-batch feeder.
//!
//! A producer thread cycles over the configured batch files, loads each
//! into a [`TrainingBatch`], and pushes it through a bounded channel.
//! The consumer blocks on [`TrainingFeeder::next_batch`]. A malformed
//! file travels through the channel as an error and does not kill the
//! thread.
//!
//! Lifecycle: [`TrainingFeeder::start`] spawns the thread;
//! [`TrainingFeeder::stop`] signals it, drops the receiver (which
//! unblocks a producer stuck on a full queue), and joins. Dropping the
//! feeder without calling `stop` does the same as a backstop, so the
//! thread never outlives the session.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::Arc;
use std::thread::JoinHandle;

use melody_model::HParams;
use tensor_core::{DType, Shape, Tensor};

use crate::RuntimeError;

/// Number of decoded batches buffered ahead of the consumer.
const QUEUE_DEPTH: usize = 4;

/// One pre-encoded padded training batch.
#[derive(Debug)]
pub struct TrainingBatch {
    /// One-hot inputs, `(batch × steps × vocabulary)`, f32.
    pub inputs: Tensor,
    /// Next-note class labels, `(batch × steps)`, i32.
    pub labels: Tensor,
    /// Valid prefix length of each sequence.
    pub lengths: Vec<usize>,
}

/// Handle to the background producer thread.
pub struct TrainingFeeder {
    rx: Option<Receiver<Result<TrainingBatch, RuntimeError>>>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl TrainingFeeder {
    /// Spawns the producer thread over a non-empty file list.
    pub fn start(files: Vec<PathBuf>, hparams: HParams) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let (tx, rx) = sync_channel(QUEUE_DEPTH);
        let stop_flag = Arc::clone(&stop);

        tracing::info!("starting training feeder over {} file(s)", files.len());
        let handle = std::thread::Builder::new()
            .name("training-feeder".into())
            .spawn(move || feed_loop(files, hparams, tx, stop_flag))
            .expect("failed to spawn training feeder thread");

        Self {
            rx: Some(rx),
            stop,
            handle: Some(handle),
        }
    }

    /// Blocks until the next batch (or the next load error) arrives.
    ///
    /// # Errors
    /// Returns [`RuntimeError::TrainingStopped`] once the feeder has
    /// been stopped.
    pub fn next_batch(&self) -> Result<TrainingBatch, RuntimeError> {
        match &self.rx {
            Some(rx) => rx.recv().map_err(|_| RuntimeError::TrainingStopped)?,
            None => Err(RuntimeError::TrainingStopped),
        }
    }

    /// Signals the producer to stop and joins it.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        // Dropping the receiver unblocks a producer waiting on a full
        // queue; its next send fails and the loop exits.
        drop(self.rx.take());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
            tracing::info!("training feeder stopped");
        }
    }
}

impl Drop for TrainingFeeder {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.stop();
        }
    }
}

impl std::fmt::Debug for TrainingFeeder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrainingFeeder")
            .field("running", &self.handle.is_some())
            .finish()
    }
}

fn feed_loop(
    files: Vec<PathBuf>,
    hparams: HParams,
    tx: SyncSender<Result<TrainingBatch, RuntimeError>>,
    stop: Arc<AtomicBool>,
) {
    let mut index = 0usize;
    loop {
        if stop.load(Ordering::Relaxed) {
            break;
        }
        let path = &files[index % files.len()];
        index += 1;

        let result = load_batch_file(path, &hparams);
        if tx.send(result).is_err() {
            break;
        }
    }
    tracing::debug!("training feeder thread exiting");
}

/// Loads and validates one batch file against the model's shapes.
fn load_batch_file(path: &Path, hparams: &HParams) -> Result<TrainingBatch, RuntimeError> {
    let bad = |detail: String| RuntimeError::TrainingSource {
        path: path.to_path_buf(),
        detail,
    };

    let file = std::fs::File::open(path).map_err(|e| bad(format!("cannot open: {e}")))?;
    let mmap =
        unsafe { memmap2::Mmap::map(&file) }.map_err(|e| bad(format!("mmap failed: {e}")))?;
    let tensors = safetensors::SafeTensors::deserialize(&mmap)
        .map_err(|e| bad(format!("SafeTensors parse error: {e}")))?;

    let inputs_view = tensors
        .tensor("inputs")
        .map_err(|e| bad(format!("missing 'inputs': {e}")))?;
    let labels_view = tensors
        .tensor("labels")
        .map_err(|e| bad(format!("missing 'labels': {e}")))?;
    let lengths_view = tensors
        .tensor("lengths")
        .map_err(|e| bad(format!("missing 'lengths': {e}")))?;

    if inputs_view.dtype() != safetensors::Dtype::F32 {
        return Err(bad(format!("'inputs' must be f32, got {:?}", inputs_view.dtype())));
    }
    if labels_view.dtype() != safetensors::Dtype::I32
        || lengths_view.dtype() != safetensors::Dtype::I32
    {
        return Err(bad("'labels' and 'lengths' must be i32".into()));
    }

    let in_dims = inputs_view.shape();
    if in_dims.len() != 3 {
        return Err(bad(format!("'inputs' must be rank 3, got {in_dims:?}")));
    }
    let (batch, steps, vocab) = (in_dims[0], in_dims[1], in_dims[2]);
    if batch != hparams.batch_size {
        return Err(bad(format!(
            "batch size {batch} does not match configured {}",
            hparams.batch_size
        )));
    }
    if vocab != hparams.one_hot_length {
        return Err(bad(format!(
            "one-hot width {vocab} does not match vocabulary {}",
            hparams.one_hot_length
        )));
    }
    if labels_view.shape() != [batch, steps] {
        return Err(bad(format!(
            "'labels' shape {:?} does not match inputs [{batch}, {steps}]",
            labels_view.shape()
        )));
    }
    if lengths_view.shape() != [batch] {
        return Err(bad(format!(
            "'lengths' shape {:?} does not match batch {batch}",
            lengths_view.shape()
        )));
    }

    let inputs = Tensor::from_bytes(
        Shape::sequence(batch, steps, vocab),
        DType::F32,
        inputs_view.data().to_vec(),
    )
    .map_err(|e| bad(e.to_string()))?;
    let labels = Tensor::from_bytes(
        Shape::matrix(batch, steps),
        DType::I32,
        labels_view.data().to_vec(),
    )
    .map_err(|e| bad(e.to_string()))?;

    let mut lengths = Vec::with_capacity(batch);
    for &len in Tensor::from_bytes(
        Shape::vector(batch),
        DType::I32,
        lengths_view.data().to_vec(),
    )
    .map_err(|e| bad(e.to_string()))?
    .as_i32_slice()
    {
        if len < 0 || len as usize > steps {
            return Err(bad(format!("length {len} out of range for {steps} steps")));
        }
        lengths.push(len as usize);
    }

    Ok(TrainingBatch {
        inputs,
        labels,
        lengths,
    })
}

/// Writes a batch file in the format [`TrainingFeeder`] consumes.
/// Used by the encoding tooling and by tests.
pub fn write_training_batch(
    path: &Path,
    inputs: &Tensor,
    labels: &[i32],
    lengths: &[usize],
) -> Result<(), RuntimeError> {
    let bad = |detail: String| RuntimeError::TrainingSource {
        path: path.to_path_buf(),
        detail,
    };

    let dims = inputs.shape().dims();
    if dims.len() != 3 {
        return Err(bad("'inputs' must be rank 3".into()));
    }
    let (batch, steps) = (dims[0], dims[1]);

    let labels_tensor = Tensor::from_i32(Shape::matrix(batch, steps), labels)
        .map_err(|e| bad(e.to_string()))?;
    let lengths_i32: Vec<i32> = lengths.iter().map(|&l| l as i32).collect();
    let lengths_tensor =
        Tensor::from_i32(Shape::vector(batch), &lengths_i32).map_err(|e| bad(e.to_string()))?;

    let views = [
        ("inputs", safetensors::Dtype::F32, &*inputs),
        ("labels", safetensors::Dtype::I32, &labels_tensor),
        ("lengths", safetensors::Dtype::I32, &lengths_tensor),
    ]
    .into_iter()
    .map(|(name, dtype, tensor)| {
        safetensors::tensor::TensorView::new(dtype, tensor.shape().dims().to_vec(), tensor.as_bytes())
            .map(|view| (name.to_string(), view))
            .map_err(|e| bad(format!("tensor '{name}': {e:?}")))
    })
    .collect::<Result<Vec<_>, _>>()?;

    let payload =
        safetensors::serialize(views, &None).map_err(|e| bad(format!("serialize failed: {e:?}")))?;
    std::fs::write(path, payload).map_err(|e| bad(format!("write failed: {e}")))
}
