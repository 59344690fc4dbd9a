// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `melody-rnn inspect` command: display the configured model's
//! variables and report which checkpoint a restore would use.

use std::path::PathBuf;

use checkpoint_store::{build_variable_map, resolve_checkpoint_path};
use runtime::{MelodySession, RuntimeConfig};

pub fn execute(config_path: PathBuf) -> anyhow::Result<()> {
    let config = RuntimeConfig::from_file(&config_path)
        .map_err(|e| anyhow::anyhow!("failed to load config '{}': {e}", config_path.display()))?;

    let session = MelodySession::new(config.clone())?;
    let hparams = session.hparams();

    println!("Model scope '{}':", config.scope);
    println!("  layers: {:?}", hparams.rnn_layer_sizes);
    println!("  vocabulary: {}", hparams.one_hot_length);
    println!("  state width: {}", hparams.state_width());
    println!();

    // ── Variables and their checkpoint names ───────────────────
    let names = session.variables();
    let map = build_variable_map(&names, &config.scope, &config.checkpoint_scope)?;
    println!("  {:<40} {}", "Live variable", "Checkpoint name");
    println!("  {}", "-".repeat(78));
    for (live, stored) in map.iter() {
        println!("  {live:<40} {stored}");
    }
    println!();

    // ── Checkpoint resolution ──────────────────────────────────
    match resolve_checkpoint_path(
        &config.checkpoint_dir,
        config.backup_checkpoint.as_deref(),
    ) {
        Ok(path) => println!("  Checkpoint: {}", path.display()),
        Err(e) => println!("  Checkpoint: unavailable ({e})"),
    }

    match &config.primer_path {
        Some(p) if p.is_file() => println!("  Primer: {}", p.display()),
        Some(p) => println!("  Primer: {} (missing, priming would be skipped)", p.display()),
        None => println!("  Primer: not configured"),
    }

    match &config.training_files {
        Some(files) if !files.is_empty() => {
            println!("  Training files: {}", files.len());
        }
        _ => println!("  Training files: none"),
    }

    Ok(())
}
