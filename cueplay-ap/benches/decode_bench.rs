//! Decode and tick performance benchmark
//!
//! Measures 16-bit conversion, whole-clip decoding through symphonia and the
//! per-tick cost of the engine with many live voices.
//!
//! **Goal:** Clip decode well above realtime; engine tick in microseconds

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use cueplay_ap::audio::{AssetReader, PcmFrame, SimulatedOutput, SymphoniaCodecFactory};
use cueplay_ap::audio::pcm::{interleave_i16, sample_to_i16};
use cueplay_ap::playback::{decode_clip, AudioEngine};
use cueplay_ap::{AudioConfig, AudioProperties};
use std::io::{self, Cursor};

/// Serves one in-memory WAV file for every path
struct WavAsset(Vec<u8>);

impl AssetReader for WavAsset {
    fn read(&self, _path: &str) -> io::Result<Vec<u8>> {
        Ok(self.0.clone())
    }

    fn exists(&self, _path: &str) -> bool {
        true
    }
}

fn wav_bytes(channels: u16, sample_rate: u32, seconds: f32) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        let frames = (sample_rate as f32 * seconds) as u32;
        for i in 0..frames {
            let t = i as f32 / sample_rate as f32;
            let sample = ((t * 440.0 * 2.0 * std::f32::consts::PI).sin() * 0.5 * i16::MAX as f32) as i16;
            for _ in 0..channels {
                writer.write_sample(sample).unwrap();
            }
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

fn bench_conversion(c: &mut Criterion) {
    let mut group = c.benchmark_group("conversion");

    group.bench_function("sample_to_i16", |b| {
        b.iter(|| black_box(sample_to_i16(black_box(0.3))));
    });

    group.bench_function("interleave_stereo_2048", |b| {
        let frame = PcmFrame::new(vec![vec![0.25f32; 2048], vec![-0.25f32; 2048]]);
        let mut out = Vec::with_capacity(4096);
        b.iter(|| {
            let clipped = interleave_i16(black_box(&frame), 0, 2048, &mut out);
            black_box((clipped, out.len()));
        });
    });

    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");
    group.sample_size(20);

    let asset = WavAsset(wav_bytes(2, 44_100, 1.0));
    group.bench_function("decode_clip_wav_1s_stereo", |b| {
        b.iter(|| {
            let clip = decode_clip(black_box("clip.wav"), &asset, &SymphoniaCodecFactory).unwrap();
            black_box(clip.samples.len());
        });
    });

    group.finish();
}

fn bench_engine_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine_tick");

    group.bench_function("update_64_looping_voices", |b| {
        let mut engine = AudioEngine::new(
            SimulatedOutput::new(),
            WavAsset(wav_bytes(1, 22_050, 0.5)),
            SymphoniaCodecFactory,
            AudioConfig::default(),
        );
        let properties = AudioProperties::listener_relative().with_looping(true);
        let ids: Vec<_> = (0..64).map(|_| engine.play_clip_with("loop.wav", properties)).collect();
        for id in ids.iter().step_by(2) {
            engine.set_gain_smooth(*id, 0.0, 1000.0);
        }

        b.iter(|| {
            engine.output_mut().advance(0.015625);
            engine.update(black_box(0.015625));
        });
    });

    group.finish();
}

criterion_group!(benches, bench_conversion, bench_decode, bench_engine_tick);
criterion_main!(benches);
