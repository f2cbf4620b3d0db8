//! End-to-end mixer behaviour: registry, read pool and mixer together.

mod common;

use common::{mixer, mixer_with_timeout, FailingSource, PanickingSource, ScriptedSource};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use voicemix::frame::{decode_samples, encode_samples, FRAME_SAMPLES};
use voicemix::{silence, Category, EventKind, MixerEvent, SourceHandle, FRAME_SIZE};

#[test]
fn test_every_tick_emits_one_full_frame() {
    let (registry, mixer) = mixer_with_timeout(Duration::from_millis(10));
    assert_eq!(mixer.read().len(), FRAME_SIZE);

    let (slow, _) =
        ScriptedSource::with_delay(vec![common::constant_frame(1); 3], Duration::from_millis(40));
    registry.add_layer(slow);
    registry.add_layer(SourceHandle::new(FailingSource));
    let (short, _) = ScriptedSource::new(vec![encode_samples(&[9; 7])]);
    registry.add_to_queue(short);

    for _ in 0..10 {
        assert_eq!(mixer.read().len(), FRAME_SIZE);
    }
}

#[test]
fn test_idle_mixer_is_silent() {
    let (_registry, mixer) = mixer();
    for _ in 0..3 {
        assert_eq!(mixer.read(), silence());
    }
    assert!(!mixer.has_active_tracks());
}

#[test]
fn test_sums_all_categories_and_clips() {
    let (registry, mixer) = mixer();
    let (layer, _) = ScriptedSource::constant(1000, 5);
    let (button, _) = ScriptedSource::constant(2000, 5);
    let (queued, _) = ScriptedSource::constant(-500, 5);
    registry.add_layer(layer);
    registry.add_button_sound(button);
    registry.add_to_queue(queued);

    let samples = decode_samples(&mixer.read());
    assert_eq!(samples.len(), FRAME_SAMPLES);
    assert!(samples.iter().all(|&s| s == 2500));

    let (loud_a, _) = ScriptedSource::constant(20_000, 5);
    let (loud_b, _) = ScriptedSource::constant(20_000, 5);
    registry.set_tts_track(Some(loud_a));
    registry.add_layer(loud_b);

    let samples = decode_samples(&mixer.read());
    assert!(samples.iter().all(|&s| s == i16::MAX));
}

#[test]
fn test_queue_advances_after_first_item_ends() {
    let (registry, mixer) = mixer();
    let ended = Arc::new(AtomicUsize::new(0));
    let e = ended.clone();
    mixer.add_observer(EventKind::QueueEnd, move |_| {
        e.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    let n = 3;
    let (a, tally_a) = ScriptedSource::constant(100, n);
    let (b, _) = ScriptedSource::constant(200, 50);
    registry.add_to_queue(a.clone());
    registry.add_to_queue(b.clone());

    for _ in 0..n {
        let samples = decode_samples(&mixer.read());
        assert!(samples.iter().all(|&s| s == 100));
    }
    // Tick N+1 sees end of stream and advances
    mixer.read();

    let snapshot = registry.get_playing_sounds();
    assert_eq!(snapshot, vec![(Category::Queue, b)]);
    assert!(!snapshot.iter().any(|(_, s)| *s == a));
    assert_eq!(ended.load(Ordering::SeqCst), 1);
    assert!(tally_a.cleanups() >= 1);

    let samples = decode_samples(&mixer.read());
    assert!(samples.iter().all(|&s| s == 200));
}

#[test]
fn test_queue_empty_callback_fires_exactly_once() {
    let (registry, mixer) = mixer();
    let fired = Arc::new(AtomicUsize::new(0));
    let f = fired.clone();
    registry.on_queue_empty(move || {
        f.fetch_add(1, Ordering::SeqCst);
    });

    let (only, _) = ScriptedSource::new(vec![]);
    registry.add_to_queue(only);

    for _ in 0..5 {
        mixer.read();
    }
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert!(registry.queue_source().is_none());
}

#[test]
fn test_short_frame_is_mixed_once_then_retired() {
    let (registry, mixer) = mixer();
    let short = encode_samples(&[300; 100]);
    let (source, tally) = ScriptedSource::new(vec![
        common::constant_frame(50),
        short,
        common::constant_frame(999),
    ]);
    registry.add_layer(source);

    let ended = Arc::new(AtomicUsize::new(0));
    let e = ended.clone();
    mixer.add_observer(EventKind::TrackEnd, move |event| {
        if let MixerEvent::TrackEnd { sources } = event {
            e.fetch_add(sources.len(), Ordering::SeqCst);
        }
        Ok(())
    });

    mixer.read();
    let samples = decode_samples(&mixer.read());
    assert_eq!(samples.len(), FRAME_SAMPLES);
    assert!(samples[..100].iter().all(|&s| s == 300));
    assert!(samples[100..].iter().all(|&s| s == 0));

    assert_eq!(registry.layer_count(), 0);
    assert_eq!(ended.load(Ordering::SeqCst), 1);

    // Never read past the short frame
    assert_eq!(mixer.read(), silence());
    assert_eq!(tally.reads(), 2);
}

#[test]
fn test_failing_and_panicking_sources_are_retired() {
    let (registry, mixer) = mixer();
    let (good, _) = ScriptedSource::constant(700, 5);
    registry.add_layer(good);
    registry.add_layer(SourceHandle::new(FailingSource));
    registry.add_button_sound(SourceHandle::new(PanickingSource));

    let samples = decode_samples(&mixer.read());
    assert!(samples.iter().all(|&s| s == 700));
    assert_eq!(mixer.stats().failures, 2);
    assert_eq!(registry.layer_count(), 1);
    assert_eq!(registry.button_count(), 0);
}

#[test]
fn test_slow_source_stays_pending_without_resubmission() {
    let timeout = Duration::from_millis(20);
    let (registry, mixer) = mixer_with_timeout(timeout);
    let (slow, tally) = ScriptedSource::with_delay(
        vec![common::constant_frame(400); 10],
        Duration::from_millis(80),
    );
    registry.add_layer(slow);

    let started = Instant::now();
    let first = mixer.read();
    assert!(started.elapsed() < timeout + Duration::from_millis(500));
    assert_eq!(first, silence());
    assert!(mixer.has_active_tracks());

    mixer.read();
    assert_eq!(mixer.pending_reads(), 1);
    assert_eq!(mixer.stats().submissions, 1);

    thread::sleep(Duration::from_millis(150));
    let samples = decode_samples(&mixer.read());
    assert!(samples.iter().all(|&s| s == 400));
    assert_eq!(tally.max_in_flight(), 1);
}

#[test]
fn test_removed_source_has_its_pending_read_pruned() {
    let (registry, mixer) = mixer_with_timeout(Duration::from_millis(5));
    let (slow, _) = ScriptedSource::with_delay(
        vec![common::constant_frame(1); 10],
        Duration::from_millis(100),
    );
    let id = registry.add_layer(slow);

    mixer.read();
    assert_eq!(mixer.pending_reads(), 1);

    registry.remove_layer(id);
    mixer.read();
    assert_eq!(mixer.pending_reads(), 0);
}

#[test]
fn test_source_readded_while_pruned_read_runs_is_not_read_twice() {
    let (registry, mixer) = mixer_with_timeout(Duration::from_millis(5));
    let (slow, tally) = ScriptedSource::with_delay(
        vec![common::constant_frame(1); 10],
        Duration::from_millis(200),
    );

    let id = registry.add_layer(slow.clone());
    mixer.read();
    registry.detach_layer(id).unwrap();
    mixer.read();
    registry.add_layer(slow);
    mixer.read();
    mixer.read();
    assert_eq!(tally.max_in_flight(), 1);
    assert!(mixer.has_active_tracks());

    // The pruned read has returned, so the next tick may read again
    thread::sleep(Duration::from_millis(400));
    mixer.read();
    thread::sleep(Duration::from_millis(300));
    let samples = decode_samples(&mixer.read());
    assert!(samples.iter().all(|&s| s == 1));

    assert_eq!(tally.max_in_flight(), 1);
}

#[test]
fn test_registry_mutations_during_ticks() {
    let (registry, mixer) = mixer();
    let done = Arc::new(AtomicBool::new(false));

    let writer = {
        let registry = registry.clone();
        let done = done.clone();
        thread::spawn(move || {
            let mut tallies = Vec::new();
            for i in 0..40 {
                let (layer, tally) = ScriptedSource::constant(10, 3);
                tallies.push(tally);
                let id = registry.add_layer(layer);
                if i % 2 == 0 {
                    registry.remove_layer(id);
                }
                if i % 4 == 0 {
                    let (queued, tally) = ScriptedSource::constant(20, 2);
                    tallies.push(tally);
                    registry.add_to_queue(queued);
                }
                let (speech, tally) = ScriptedSource::constant(30, 2);
                tallies.push(tally);
                registry.set_tts_track(Some(speech));
                thread::sleep(Duration::from_millis(1));
            }
            done.store(true, Ordering::SeqCst);
            tallies
        })
    };

    while !done.load(Ordering::SeqCst) {
        assert_eq!(mixer.read().len(), FRAME_SIZE);
    }
    let tallies = writer.join().unwrap();

    for _ in 0..200 {
        if registry.get_playing_sounds().is_empty() {
            break;
        }
        assert_eq!(mixer.read().len(), FRAME_SIZE);
    }
    assert!(registry.get_playing_sounds().is_empty());
    assert_eq!(registry.queue_len(), 0);
    assert_eq!(mixer.read(), silence());
    for tally in &tallies {
        assert!(tally.cleanups() >= 1);
        assert!(tally.max_in_flight() <= 1);
    }
}

#[test]
fn test_source_moved_between_categories_is_mixed_once() {
    let (registry, mixer) = mixer();
    let (source, tally) = ScriptedSource::constant(1000, 10);
    registry.add_layer(source.clone());
    registry.add_to_queue(source);

    let samples = decode_samples(&mixer.read());
    assert!(samples.iter().all(|&s| s == 1000));
    assert_eq!(tally.reads(), 1);
}

#[test]
fn test_shutdown_is_final() {
    let (registry, mixer) = mixer_with_timeout(Duration::from_millis(10));
    let (slow, _) = ScriptedSource::with_delay(
        vec![common::constant_frame(1); 100],
        Duration::from_millis(50),
    );
    registry.add_layer(slow);
    mixer.read();

    mixer.shutdown();
    let submissions = mixer.stats().submissions;

    for _ in 0..5 {
        let started = Instant::now();
        assert_eq!(mixer.read(), silence());
        assert!(started.elapsed() < Duration::from_millis(10));
    }
    assert_eq!(mixer.stats().submissions, submissions);
    assert_eq!(mixer.pending_reads(), 0);
}

#[test]
fn test_accessors_and_shutdown_do_not_wait_for_a_tick() {
    let (registry, mixer) = mixer_with_timeout(Duration::from_millis(300));
    let (slow, _) = ScriptedSource::with_delay(
        vec![common::constant_frame(1); 2],
        Duration::from_millis(1000),
    );
    registry.add_layer(slow);

    let mixer = Arc::new(mixer);
    let ticking = {
        let mixer = mixer.clone();
        thread::spawn(move || mixer.read())
    };
    thread::sleep(Duration::from_millis(50));

    let started = Instant::now();
    mixer.pending_reads();
    assert!(started.elapsed() < Duration::from_millis(100));

    mixer.shutdown();
    let frame = ticking.join().unwrap();
    assert_eq!(frame.len(), FRAME_SIZE);
    assert_eq!(mixer.pending_reads(), 0);
}
