// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # runtime
//!
//! The session layer that ties the model, checkpoint, and data crates
//! together for a reinforcement-learning host.
//!
//! A [`MelodySession`] owns one variable store, one cell, and one
//! recurrent state, and is driven through exactly one of three
//! initialization modes:
//!
//! ```text
//! MelodySession::new(config)        — Uninitialized
//!     │  .initialize_new()              → Fresh    (seeded random weights)
//!     │  .initialize_and_restore()     → Restored (checkpoint weights, zero state)
//!     │  .restore_initialize_prime()   → Primed   (checkpoint weights, warmed state)
//!     ▼
//! get_next_note_from_note() / run_training_batch() / variables()
//! ```
//!
//! Call exactly one initialization method before any inference call;
//! re-entering a mode is outside the contract and not guarded.
//!
//! All calls are synchronous. The only background activity is the
//! [`TrainingFeeder`] thread, started by the first training-batch call
//! and joined by [`MelodySession::shutdown`] (or drop).

mod config;
mod error;
mod feeder;
mod primer;
mod session;

pub use config::RuntimeConfig;
pub use error::RuntimeError;
pub use feeder::{write_training_batch, TrainingBatch, TrainingFeeder};
pub use primer::Primer;
pub use session::{MelodySession, TrainingBatchOutput};
