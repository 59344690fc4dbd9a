// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Benchmark for the single-step inference hot path, at the default
//! model size the surrounding rollout loop runs.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use runtime::{MelodySession, RuntimeConfig};

fn bench_step(c: &mut Criterion) {
    let mut session = MelodySession::new(RuntimeConfig::default()).unwrap();
    session.initialize_new();

    let mut note = vec![0.0f32; 38];
    note[0] = 1.0;

    c.bench_function("get_next_note_from_note", |b| {
        b.iter(|| {
            note = session.get_next_note_from_note(black_box(&note)).unwrap();
        })
    });
}

criterion_group!(benches, bench_step);
criterion_main!(benches);
