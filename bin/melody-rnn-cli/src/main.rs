// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # melody-rnn
//!
//! Command-line interface for the melody RNN runtime.
//!
//! ## Usage
//! ```bash
//! # Show the model's variables and where its checkpoint would come from
//! melody-rnn inspect --config ./runtime.toml
//!
//! # Restore, prime, and roll out 32 notes
//! melody-rnn generate --config ./runtime.toml --steps 32 --prime
//! ```

mod commands;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "melody-rnn",
    about = "Checkpoint-backed recurrent next-note predictor",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging (repeat for more: -v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect a configured model: variables, shapes, checkpoint resolution.
    Inspect {
        /// Path to the runtime TOML configuration.
        #[arg(short, long)]
        config: std::path::PathBuf,
    },

    /// Restore a model and roll out a melody step by step.
    Generate {
        /// Path to the runtime TOML configuration.
        #[arg(short, long)]
        config: std::path::PathBuf,

        /// Number of notes to generate.
        #[arg(short, long, default_value_t = 32)]
        steps: usize,

        /// Prime the state from the configured primer before generating.
        #[arg(long)]
        prime: bool,

        /// Skip the checkpoint and run from fresh seeded weights.
        #[arg(long, conflicts_with = "prime")]
        fresh: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    commands::init_tracing(cli.verbose);

    match cli.command {
        Commands::Inspect { config } => commands::inspect::execute(config),
        Commands::Generate {
            config,
            steps,
            prime,
            fresh,
        } => commands::generate::execute(config, steps, prime, fresh),
    }
}
