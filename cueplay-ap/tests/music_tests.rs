//! Music channel integration tests

mod helpers;

use cueplay_ap::audio::{AudioCategory, AudioOutput};
use cueplay_ap::playback::MusicPlayer;
use helpers::*;

fn assets() -> MemoryAssets {
    MemoryAssets::new()
        .with("music/calm.ogg", tone(2.0, RATE))
        .with("music/battle.ogg", tone(2.0, RATE))
        .with("sfx/click.ogg", tone(0.5, RATE))
}

#[test]
fn test_play_music_loops() {
    let mut engine = engine(assets());
    let mut music = MusicPlayer::new();

    music.play_music(&mut engine, "music/calm.ogg", 0.0);
    let id = music.audio_id();
    assert!(music.is_playing(&engine));
    assert_eq!(music.current_track(), Some("music/calm.ogg"));

    // Well past the track length, the same voice is still looping
    run_until(&mut engine, 5.0, 0.25);
    assert!(engine.is_voice_active(id));
    assert!(music.is_playing(&engine));
}

#[test]
fn test_change_music_waits_for_delay() {
    let mut engine = engine(assets());
    let mut music = MusicPlayer::new();
    music.play_music(&mut engine, "music/calm.ogg", 0.0);
    let calm = music.audio_id();

    music.change_music(&mut engine, "music/battle.ogg", 0.5, 1.0);
    assert!(music.is_pending());
    assert!(!music.is_playing(&engine));

    for _ in 0..3 {
        tick(&mut engine, 0.25);
        music.update(&mut engine, 0.25);
    }
    assert!(music.is_pending());
    assert_eq!(engine.clip_ref_count("music/battle.ogg"), None);
    // Old track faded out within 0.5 s and was released
    assert!(!engine.is_voice_active(calm));

    tick(&mut engine, 0.25);
    music.update(&mut engine, 0.25);
    assert!(!music.is_pending());
    assert!(music.is_playing(&engine));
    assert_eq!(music.current_track(), Some("music/battle.ogg"));
    assert_eq!(engine.clip_ref_count("music/battle.ogg"), Some(1));
}

#[test]
fn test_change_music_without_delay_switches_now() {
    let mut engine = engine(assets());
    let mut music = MusicPlayer::new();
    music.play_music(&mut engine, "music/calm.ogg", 0.0);

    music.change_music(&mut engine, "music/battle.ogg", 1.0, 0.0);

    assert!(!music.is_pending());
    assert!(music.is_playing(&engine));
    assert_eq!(engine.active_voice_count(), 2);
}

#[test]
fn test_stop_music_cancels_pending_change() {
    let mut engine = engine(assets());
    let mut music = MusicPlayer::new();
    music.play_music(&mut engine, "music/calm.ogg", 0.0);
    music.change_music(&mut engine, "music/battle.ogg", 0.0, 1.0);

    music.stop_music(&mut engine, 0.5);

    assert!(!music.is_pending());
    run_until(&mut engine, 2.0, 0.25);
    music.update(&mut engine, 2.0);
    assert_eq!(engine.active_voice_count(), 0);
    assert!(!music.is_playing(&engine));
}

#[test]
fn test_master_gain_scales_track() {
    let mut engine = engine(assets());
    let mut music = MusicPlayer::new();
    music.play_music(&mut engine, "music/calm.ogg", 0.0);

    music.set_gain(&mut engine, 0.25);

    assert_eq!(music.gain(), 0.25);
    assert_eq!(engine.gain(music.audio_id()), Some(0.25));

    // New tracks start at the master gain
    music.play_music(&mut engine, "music/battle.ogg", 0.0);
    assert_eq!(engine.gain(music.audio_id()), Some(0.25));
}

#[test]
fn test_re_enabling_restarts_last_track() {
    let mut engine = engine(assets());
    let mut music = MusicPlayer::new();
    music.play_music(&mut engine, "music/calm.ogg", 0.0);
    music.stop_music(&mut engine, 0.0);
    run_until(&mut engine, 0.25, 0.25);
    assert!(!music.is_playing(&engine));

    music.set_enabled(&mut engine, false);
    assert!(!music.is_playing(&engine));

    music.set_enabled(&mut engine, true);
    assert!(music.is_playing(&engine));
    assert_eq!(music.current_track(), Some("music/calm.ogg"));
}

#[test]
fn test_sound_gain_leaves_music_alone() {
    let mut engine = engine(assets());
    let mut music = MusicPlayer::new();
    music.play_music(&mut engine, "music/calm.ogg", 0.0);
    let click = engine.play_clip("sfx/click.ogg");
    let track = engine.cache().voice_source(music.audio_id()).unwrap();
    let sfx = engine.cache().voice_source(click).unwrap();
    assert_eq!(
        engine.cache().voice_properties(music.audio_id()).map(|p| p.category),
        Some(AudioCategory::Music)
    );

    engine.set_sound_gain(0.0);
    assert_eq!(engine.output().gain(track), 1.0);
    assert_eq!(engine.output().gain(sfx), 0.0);

    engine.set_master_gain(0.5);
    assert_eq!(engine.output().gain(track), 0.5);
    assert_eq!(engine.gain(music.audio_id()), Some(1.0));
}
