//! Cue Simulator (cue-sim)
//!
//! Drives an [`AudioEngine`] against the simulated output device and prints
//! the resulting timeline: cue segment transitions, voice completions,
//! stream progress and clip evictions.
//!
//! **Usage:**
//! ```bash
//! cue-sim --root assets --start intro.ogg --loop loop.ogg --end outro.ogg --play-time 10
//! cue-sim --root assets --cue engine.cue.toml --stream music/theme.ogg
//! ```

use anyhow::{bail, Context, Result};
use clap::Parser;
use cueplay_ap::audio::{FsAssetReader, SimulatedOutput, SymphoniaCodecFactory};
use cueplay_ap::playback::{AudioEngine, AudioEvent, CuePart, MusicPlayer, SequencedCue};
use cueplay_ap::AudioConfig;
use std::path::PathBuf;
use tracing::info;

/// Sequenced cue simulator
#[derive(Parser, Debug)]
#[command(name = "cue-sim")]
#[command(about = "Simulate cue, stream and music playback on a virtual device")]
#[command(version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("GIT_HASH"), ", ", env!("BUILD_PROFILE"), ")"))]
struct Args {
    /// Config file (falls back to CUEPLAY_CONFIG, then the platform config dir)
    #[arg(short, long, env = "CUEPLAY_CONFIG")]
    config: Option<PathBuf>,

    /// Directory relative asset paths are resolved against
    #[arg(short, long, default_value = ".")]
    root: PathBuf,

    /// Cue descriptor (TOML); overrides --start/--loop/--end
    #[arg(long, value_name = "FILE")]
    cue: Option<String>,

    /// Start segment
    #[arg(long)]
    start: Option<String>,

    /// Loop segment
    #[arg(long = "loop")]
    looped: Option<String>,

    /// End segment
    #[arg(long)]
    end: Option<String>,

    /// Requested cue play time in seconds (0 = descriptor default)
    #[arg(long, default_value = "10")]
    play_time: f64,

    /// Stream a file alongside the cue
    #[arg(long, value_name = "FILE")]
    stream: Option<String>,

    /// Play a looping music track alongside the cue
    #[arg(long, value_name = "FILE")]
    music: Option<String>,

    /// Simulation tick in seconds
    #[arg(long, default_value = "0.015625")]
    tick: f64,

    /// Total simulated time (default: play time + 2 s)
    #[arg(long)]
    duration: Option<f64>,

    /// Limit the virtual device to this many sources
    #[arg(long)]
    max_sources: Option<usize>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = AudioConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    cueplay_common::logging::init(&config.logging).context("Failed to initialize logging")?;

    info!(
        "cue-sim {} (git {}, built {}, {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    if args.tick <= 0.0 {
        bail!("--tick must be positive");
    }

    let reader = FsAssetReader::with_root(&args.root);
    let output = match args.max_sources {
        Some(limit) => SimulatedOutput::new().with_source_limit(limit),
        None => SimulatedOutput::new(),
    };
    let mut engine = AudioEngine::new(output, reader, SymphoniaCodecFactory, config);

    let mut cue = match &args.cue {
        Some(descriptor) => Some(
            SequencedCue::from_descriptor(&mut engine, descriptor)
                .with_context(|| format!("Failed to load cue {}", descriptor))?,
        ),
        None if args.start.is_some() || args.looped.is_some() || args.end.is_some() => Some(SequencedCue::new(
            &mut engine,
            args.start.as_deref(),
            args.looped.as_deref(),
            args.end.as_deref(),
        )),
        None => None,
    };

    let mut stream = match &args.stream {
        Some(path) => Some(
            engine
                .open_stream(path)
                .with_context(|| format!("Failed to open stream {}", path))?,
        ),
        None => None,
    };

    let mut music = MusicPlayer::new();
    if let Some(path) = &args.music {
        music.play_music(&mut engine, path, 0.0);
    }

    if cue.is_none() && stream.is_none() && args.music.is_none() {
        bail!("Nothing to simulate: pass --cue, --start/--loop/--end, --stream or --music");
    }

    if let Some(cue) = cue.as_mut() {
        cue.play(&mut engine, args.play_time);
    }

    let duration = args.duration.unwrap_or(args.play_time + 2.0);
    let mut last_part = cue.as_ref().map(|c| c.current_part());
    let mut cue_done = false;
    let mut stream_done = false;

    println!("{:>8}  event", "time");
    if let Some(part) = last_part {
        println!("{:>8.3}  cue {:?}", 0.0, part);
    }

    while engine.now() < duration {
        let dt = args.tick;
        engine.output_mut().advance(dt);
        engine.update(dt);

        if let Some(cue) = cue.as_mut() {
            let finished = cue.update(&mut engine);
            let part = cue.current_part();
            if Some(part) != last_part {
                println!("{:>8.3}  cue {:?}", engine.now(), part);
                last_part = Some(part);
            }
            if finished && !cue_done {
                println!("{:>8.3}  cue finished", engine.now());
            }
            cue_done = finished;
        }

        if let Some(stream) = stream.as_mut() {
            engine.update_stream(stream, dt as f32);
            if stream.is_finished() && !stream_done {
                println!(
                    "{:>8.3}  stream finished ({:.2}s decoded{})",
                    engine.now(),
                    stream.decoded_secs(),
                    if stream.clipped() { ", clipped" } else { "" }
                );
                stream_done = true;
            }
        }

        music.update(&mut engine, dt as f32);

        for event in engine.take_events() {
            match event {
                AudioEvent::VoiceFinished(id) => println!("{:>8.3}  voice {} finished", engine.now(), id),
                AudioEvent::ClipEvicted(key) => println!("{:>8.3}  clip {} evicted", engine.now(), key),
            }
        }
    }

    if let Some(stream) = stream.as_mut() {
        engine.clear_stream(stream);
    }
    if let Some(cue) = cue.as_mut() {
        if cue.current_part() != CuePart::None {
            cue.stop(&mut engine, 0.0, false);
        }
    }

    println!();
    println!("voices still active: {}", engine.active_voice_count());
    for voice in engine.voice_list() {
        let state = if voice.waiting {
            "waiting".to_string()
        } else {
            format!("{:?}", voice.state)
        };
        println!("  {} {} gain={:.2} {}", voice.id, voice.clip, voice.gain, state);
    }
    println!("clips cached: {}", engine.cached_clip_count());

    engine.shutdown();
    Ok(())
}
