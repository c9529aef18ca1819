//! End-to-end scenarios
//!
//! - Zombie: irregular voicing and triggered noise on a syllabic anchor
//! - Werewolf: sub-octave bursts cycle through every phase
//! - Horde: 1,000 simultaneous voices across all tiers

use ae_core::{Archetype, ArchetypeLibrary, Sample, block_is_finite};
use ae_dsp::analysis::period_jitter;
use ae_dsp::subharmonic::BurstPhase;
use ae_dsp::svf::{SvfMode, SvfParams, TptSvf};
use ae_engine::{AnchorClip, AudioEngine, EngineConfig, LodTier, VoiceRequest};
use std::f64::consts::PI;
use std::sync::Arc;
use std::time::Instant;

const SAMPLE_RATE: u32 = 48000;
const SR: f64 = SAMPLE_RATE as f64;

/// 120 Hz glottal-like pulses in 250 ms syllables separated by 120 ms gaps
fn syllable_train(seconds: f64) -> Vec<Sample> {
    let period = SR / 120.0;
    let cycle = (0.370 * SR) as usize;
    let voiced = (0.250 * SR) as usize;
    (0..(seconds * SR) as usize)
        .map(|i| {
            if i % cycle >= voiced {
                return 0.0;
            }
            let phase = (i as f64 % period) / period;
            0.6 * (2.0 * PI * phase).sin() * (0.5 - 0.5 * (2.0 * PI * phase).cos())
        })
        .collect()
}

fn vowel_tone(seconds: f64) -> Vec<Sample> {
    (0..(seconds * SR) as usize)
        .map(|i| {
            let t = i as f64 / SR;
            0.3 * (2.0 * PI * 110.0 * t).sin() + 0.15 * (2.0 * PI * 220.0 * t).sin() + 0.08 * (2.0 * PI * 330.0 * t).sin()
        })
        .collect()
}

/// Longest run of samples below -60 dBFS, in seconds
fn longest_silence(signal: &[Sample]) -> f64 {
    let mut longest = 0usize;
    let mut run = 0usize;
    for &x in signal {
        if x.abs() < 1e-3 {
            run += 1;
            longest = longest.max(run);
        } else {
            run = 0;
        }
    }
    longest as f64 / SR
}

fn lowpass(signal: &[Sample], cutoff: f64) -> Vec<Sample> {
    let mut out = signal.to_vec();
    for _ in 0..2 {
        let mut filter = TptSvf::with_params(SvfMode::Lowpass, SvfParams::new(cutoff, 0.707), SR);
        filter.process_block(&mut out);
    }
    out
}

#[test]
fn zombie_voicing_is_irregular_and_wet() {
    let library = ArchetypeLibrary::with_presets();
    let zombie = library.id_of(Archetype::Zombie.name()).unwrap();
    let config = EngineConfig {
        max_voices: 4,
        ..EngineConfig::default()
    };
    let (mut ctl, mut audio) = AudioEngine::new(config, library).unwrap();

    let anchor = syllable_train(2.0);
    let clip = Arc::new(AnchorClip::new(anchor.clone(), SAMPLE_RATE).unwrap());
    let handle = ctl.start_voice(VoiceRequest::new(zombie, clip).at(3.0, 0.0)).unwrap();
    assert_eq!(ctl.tier(handle), Some(LodTier::Near));

    let mut rendered = Vec::with_capacity(anchor.len());
    while rendered.len() < anchor.len() {
        audio.process_block();
        rendered.extend_from_slice(audio.voice_output(handle.index()).unwrap());
    }
    rendered.truncate(anchor.len());
    assert!(block_is_finite(&rendered));

    // Compare fundamentals only; breath and noise live well above 250 Hz
    let anchor_jitter = period_jitter(&lowpass(&anchor, 250.0), SR).unwrap_or(1.0);
    let zombie_jitter = period_jitter(&lowpass(&rendered, 250.0), SR).unwrap_or(0.0);
    assert!(zombie_jitter > 0.02, "zombie jitter {}", zombie_jitter);
    assert!(
        anchor_jitter < 0.5 * zombie_jitter,
        "anchor jitter {} vs zombie {}",
        anchor_jitter,
        zombie_jitter
    );

    let voice = audio.voice(handle.index()).unwrap();
    assert!(voice.noise().events_triggered() >= 1);

    // Aberration may fill gaps but never opens new ones
    let anchor_gap = longest_silence(&anchor);
    let zombie_gap = longest_silence(&rendered);
    assert!(
        zombie_gap <= anchor_gap + 0.040,
        "longest silence {:.3} s vs anchor {:.3} s",
        zombie_gap,
        anchor_gap
    );
}

#[test]
fn werewolf_bursts_cycle_through_every_phase() {
    let library = ArchetypeLibrary::with_presets();
    let werewolf = library.id_of(Archetype::Werewolf.name()).unwrap();
    let config = EngineConfig {
        max_voices: 2,
        ..EngineConfig::default()
    };
    let blocks = (10.0 * SR) as usize / config.block_size;
    let (mut ctl, mut audio) = AudioEngine::new(config, library).unwrap();

    let clip = Arc::new(AnchorClip::new(vowel_tone(1.0), SAMPLE_RATE).unwrap());
    let handle = ctl
        .start_voice(VoiceRequest::new(werewolf, clip).at(2.0, 0.0).looping(true))
        .unwrap();

    for _ in 0..blocks {
        audio.process_block();
        let sub = audio.voice(handle.index()).unwrap().subharmonic();
        if sub.phase() == BurstPhase::Quiet {
            assert_eq!(sub.envelope(), 0.0);
        }
        let out = audio.voice_output(handle.index()).unwrap();
        assert!(out.iter().all(|s| s.is_finite() && s.abs() <= 1.0));
    }

    let sub = audio.voice(handle.index()).unwrap().subharmonic();
    assert!(sub.bursts_completed() >= 1, "no burst completed in 10 s");
    for phase in [BurstPhase::Rising, BurstPhase::Sustained, BurstPhase::Falling] {
        assert!(sub.phase_entries(phase) >= 1, "{:?} never entered", phase);
    }
}

#[test]
fn thousand_voice_horde() {
    let library = ArchetypeLibrary::with_presets();
    let archetypes: Vec<_> = library.iter().map(|(id, _)| id).collect();
    let config = EngineConfig::default();
    let far_buses = config.lod.far_buses;
    let block_secs = config.block_secs();
    let (mut ctl, mut audio) = AudioEngine::new(config, library).unwrap();

    let clip = Arc::new(AnchorClip::new(vowel_tone(1.0), SAMPLE_RATE).unwrap());
    for i in 0..1000 {
        let distance = match i {
            0..50 => 5.0,
            50..250 => 20.0,
            _ => 100.0,
        };
        let direction = i as f64 * 0.37;
        let request = VoiceRequest::new(archetypes[i % archetypes.len()], Arc::clone(&clip))
            .at(distance, direction)
            .importance(0.0)
            .looping(true);
        ctl.start_voice(request).unwrap();
    }
    assert_eq!(ctl.tier_counts(), (50, 200, 750));
    assert!(ctl.active_buses() <= far_buses);
    assert!(far_buses <= 24);

    let mut mix = vec![0.0; 256];
    let blocks = 40;
    let started = Instant::now();
    for _ in 0..blocks {
        audio.process_block();
        audio.mix_into(&mut mix);
        assert!(block_is_finite(&mix));
    }
    let per_block = started.elapsed().as_secs_f64() / blocks as f64;

    assert_eq!(ctl.fault_board().totals().filter_state, 0);
    if !cfg!(debug_assertions) {
        assert!(
            per_block < block_secs,
            "mean block {:.3} ms exceeds {:.3} ms",
            per_block * 1e3,
            block_secs * 1e3
        );
    }
}
