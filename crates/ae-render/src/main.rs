//! Aberration Engine offline renderer
//!
//! Usage:
//!   ae-render render <in.wav> <out.wav> --archetype zombie   - Aberrate an anchor
//!   ae-render presets [--output library.json]                - Dump the built-in archetypes
//!   ae-render config [--output engine.json]                  - Dump the default engine config

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

use ae_core::{ArchetypeLibrary, EmotionState, FaultKind, Sample};
use ae_dsp::analysis::period_jitter;
use ae_engine::{AnchorClip, AudioEngine, EngineConfig, VoiceRequest};

#[derive(Parser)]
#[command(name = "ae-render", about = "Aberration Engine offline renderer")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render an anchor WAV through an archetype
    Render {
        /// Anchor recording (mixed down to mono)
        input: PathBuf,
        /// Destination WAV (mono, 32-bit float)
        output: PathBuf,
        /// Archetype name
        #[arg(short, long, default_value = "zombie")]
        archetype: String,
        /// Archetype library JSON (built-in presets when omitted)
        #[arg(long)]
        profiles: Option<PathBuf>,
        /// Engine config JSON (sample rate follows the input file)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Listener distance in meters (selects the LOD tier)
        #[arg(long, default_value_t = 2.0)]
        distance: f64,
        /// Calm (-1) to agitated (+1)
        #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
        intensity: f64,
        #[arg(long, default_value_t = 0.0)]
        aggression: f64,
        #[arg(long, default_value_t = 0.0)]
        fatigue: f64,
        #[arg(long, default_value_t = 0.0)]
        proximity: f64,
        /// Extra render time after the anchor ends (seconds)
        #[arg(long, default_value_t = 0.5)]
        tail: f64,
    },
    /// Write the built-in archetype library as JSON
    Presets {
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Write the default engine configuration as JSON
    Config {
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Render {
            input,
            output,
            archetype,
            profiles,
            config,
            distance,
            intensity,
            aggression,
            fatigue,
            proximity,
            tail,
        } => {
            let emotion = EmotionState {
                intensity,
                aggression,
                fatigue,
                proximity,
            };
            let options = RenderOptions {
                archetype,
                profiles,
                config,
                distance,
                emotion,
                tail,
            };
            render(&input, &output, &options)
        }
        Commands::Presets { output } => emit(ArchetypeLibrary::with_presets().to_json()?, output.as_deref()),
        Commands::Config { output } => emit(EngineConfig::default().to_json()?, output.as_deref()),
    }
}

struct RenderOptions {
    archetype: String,
    profiles: Option<PathBuf>,
    config: Option<PathBuf>,
    distance: f64,
    emotion: EmotionState,
    tail: f64,
}

fn emit(json: String, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => {
            fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
            log::info!("Wrote {}", path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}

/// Read a WAV file as mono samples
fn load_wav(path: &Path) -> Result<(Vec<Sample>, u32)> {
    let reader = hound::WavReader::open(path).with_context(|| format!("opening {}", path.display()))?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f64> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .map(|s| s.map(|v| v as f64))
            .collect::<std::result::Result<Vec<_>, _>>()?,
        hound::SampleFormat::Int => {
            let max_val = (1i64 << (spec.bits_per_sample.max(1) - 1)) as f64;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f64 / max_val))
                .collect::<std::result::Result<Vec<_>, _>>()?
        }
    };

    let mono = interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f64>() / channels as f64)
        .collect();
    Ok((mono, spec.sample_rate))
}

fn write_wav(path: &Path, samples: &[Sample], sample_rate: u32) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(path, spec).with_context(|| format!("creating {}", path.display()))?;
    for &s in samples {
        writer.write_sample(s as f32)?;
    }
    writer.finalize()?;
    Ok(())
}

fn render(input: &Path, output: &Path, options: &RenderOptions) -> Result<()> {
    let library = match &options.profiles {
        Some(path) => {
            let json = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
            ArchetypeLibrary::from_json(&json)?
        }
        None => ArchetypeLibrary::with_presets(),
    };
    let mut config = match &options.config {
        Some(path) => {
            let json = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
            EngineConfig::from_json(&json)?
        }
        None => EngineConfig::default(),
    };

    let (anchor, sample_rate) = load_wav(input)?;
    if anchor.is_empty() {
        bail!("{} contains no samples", input.display());
    }
    config.sample_rate = sample_rate;
    config.max_voices = config.max_voices.max(1);
    let block = config.block_size;
    let archetype = library.id_of(&options.archetype)?;

    log::info!(
        "Rendering {} ({:.2} s @ {} Hz) as {}",
        input.display(),
        anchor.len() as f64 / sample_rate as f64,
        sample_rate,
        options.archetype
    );

    let (mut ctl, mut audio) = AudioEngine::new(config, library)?;
    let clip = Arc::new(AnchorClip::new(anchor.clone(), sample_rate)?);
    let handle = ctl.start_voice(
        VoiceRequest::new(archetype, clip)
            .at(options.distance, 0.0)
            .emotion(options.emotion),
    )?;
    if let Some(tier) = ctl.tier(handle) {
        log::info!("Voice tier: {:?}", tier);
    }

    let total = anchor.len() + (options.tail.max(0.0) * sample_rate as f64) as usize;
    let mut rendered = Vec::with_capacity(total + block);
    let mut mix = vec![0.0; block];
    while rendered.len() < total {
        audio.process_block();
        audio.mix_into(&mut mix);
        rendered.extend_from_slice(&mix);
    }
    rendered.truncate(total);

    ctl.stop_voice(handle)?;
    audio.process_block();
    ctl.collect_garbage();

    write_wav(output, &rendered, sample_rate)?;

    let totals = ctl.fault_board().totals();
    println!("Wrote {} ({} samples)", output.display(), rendered.len());
    println!(
        "Faults: parameter_range={} filter_state={} pool_exhaustion={}",
        totals.get(FaultKind::ParameterRange),
        totals.get(FaultKind::FilterState),
        totals.get(FaultKind::PoolExhaustion)
    );
    let fs = sample_rate as f64;
    match (period_jitter(&anchor, fs), period_jitter(&rendered, fs)) {
        (Some(before), Some(after)) => println!("Period jitter: anchor {:.4}, output {:.4}", before, after),
        _ => println!("Period jitter: not measurable (too few voiced periods)"),
    }
    Ok(())
}
