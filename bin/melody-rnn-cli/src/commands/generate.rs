// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `melody-rnn generate` command: restore (or freshly initialize) a
//! model and roll out a melody one greedy step at a time.

use std::path::PathBuf;

use runtime::{MelodySession, RuntimeConfig};

pub fn execute(
    config_path: PathBuf,
    steps: usize,
    prime: bool,
    fresh: bool,
) -> anyhow::Result<()> {
    let config = RuntimeConfig::from_file(&config_path)
        .map_err(|e| anyhow::anyhow!("failed to load config '{}': {e}", config_path.display()))?;

    let mut session = MelodySession::new(config)?;
    if fresh {
        session.initialize_new();
    } else if prime {
        session.restore_initialize_prime()?;
    } else {
        session.initialize_and_restore()?;
    }

    let vocab = session.hparams().one_hot_length;

    // Start from the priming note when there is one, else from event 0.
    let mut note: Vec<f32> = match session.priming_note() {
        Some(n) => n.to_vec(),
        None => {
            let mut v = vec![0.0f32; vocab];
            v[0] = 1.0;
            v
        }
    };

    let mut trace = Vec::with_capacity(steps);
    for _ in 0..steps {
        note = session.get_next_note_from_note(&note)?;
        let index = note
            .iter()
            .position(|&x| x == 1.0)
            .expect("step returns a one-hot note");
        trace.push(index);
    }

    println!(
        "{}",
        trace
            .iter()
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join(" ")
    );

    session.shutdown();
    Ok(())
}
