//! Benchmark for one analysis pass over a full trial window.
//!
//! Run with:
//! ```bash
//! cargo bench --bench analyser
//! ```

use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use taptone::{AnalyserConfig, TapLatencyAnalyser, TesterConfig};

fn trial_window(frames: usize, sample_rate: u32) -> Vec<f32> {
    let mut buffer = vec![0.0f32; frames];
    for (start, len, amplitude) in [(frames / 8, 192usize, 0.4f32), (frames / 3, 1920, 0.5)] {
        let fade_len = (len / 4) as f32;
        for i in 0..len.min(frames - start) {
            let phase = 2.0 * std::f32::consts::PI * 1000.0 * i as f32 / sample_rate as f32;
            let fade = ((len - i) as f32 / fade_len).min(1.0);
            buffer[start + i] += amplitude * fade * phase.cos();
        }
    }
    buffer
}

fn bench_analyse_window(c: &mut Criterion) {
    let config = TesterConfig::default();
    let frames = config.analysis_window_frames();
    let window = trial_window(frames, config.sample_rate);
    let silence = vec![0.0f32; frames];
    let analyser = TapLatencyAnalyser::new(config.sample_rate, AnalyserConfig::default());

    c.bench_function("analyse_trial_window", |b| {
        b.iter(|| analyser.analyze(black_box(&window), 0, frames))
    });

    c.bench_function("analyse_silent_window", |b| {
        b.iter(|| analyser.analyze(black_box(&silence), 0, frames))
    });
}

criterion_group!(benches, bench_analyse_window);
criterion_main!(benches);
