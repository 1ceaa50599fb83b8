use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use beacon_voice::voice::{
    self, AudioPlayback, CpalFrameSource, FrameSource, PcmAudio, PlaybackSink, Synthesizer,
    TextToSpeech,
};
use beacon_voice::{Config, VoiceAssistant};

/// Beacon Voice - wake-word voice assistant
#[derive(Parser)]
#[command(name = "beacon-voice", version, about)]
struct Cli {
    /// Path to config file (defaults to ~/.config/omni/beacon-voice/config.toml)
    #[arg(short, long, env = "BEACON_VOICE_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
#[allow(clippy::enum_variant_names)]
enum Command {
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// Test TTS output
    TestTts {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the text to speech system.")]
        text: String,
    },
    /// List audio input and output devices
    Devices,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,beacon_voice=info",
        1 => "info,beacon_voice=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config_path = cli.config.as_deref();

    if let Some(cmd) = cli.command {
        return match cmd {
            Command::TestMic { duration } => test_mic(config_path, duration).await,
            Command::TestSpeaker => test_speaker(config_path).await,
            Command::TestTts { text } => test_tts(config_path, &text).await,
            Command::Devices => list_devices(),
        };
    }

    let config = Config::load(config_path)?;
    tracing::debug!(?config, "loaded configuration");

    let assistant = VoiceAssistant::new(config)?;
    tracing::info!("beacon voice ready - say \"{}\"", assistant.wake_word());

    assistant
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    Ok(())
}

/// Test microphone input
async fn test_mic(config_path: Option<&std::path::Path>, duration: u64) -> anyhow::Result<()> {
    let config = Config::load_unvalidated(config_path)?;
    config.validate_audio()?;

    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");
    println!(
        "Sample rate: {} Hz, frame: {} samples, silence threshold: {}",
        config.audio.sample_rate,
        config.audio.frame_samples(),
        config.audio.silence_threshold
    );
    println!("---");

    let audio = config.audio.clone();
    let silence_threshold = audio.silence_threshold;
    tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let _stream = CpalFrameSource::new(&audio).open(tx)?;

        let start = Instant::now();
        for i in 0..duration {
            let second_end = start + Duration::from_secs(i + 1);
            let mut frames = Vec::new();
            while let Some(wait) = second_end.checked_duration_since(Instant::now()) {
                match rx.recv_timeout(wait) {
                    Ok(frame) => frames.push(frame),
                    Err(_) => break,
                }
            }

            let samples = voice::concat(&frames);
            let energy = voice::rms(&samples);
            let peak = samples.iter().map(|s| s.unsigned_abs()).max().unwrap_or(0);

            // Visual meter
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let meter_len = (energy / 100.0).min(50.0) as usize;
            let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);
            let marker = if energy >= silence_threshold { "speech" } else { "quiet " };

            println!(
                "[{:2}s] RMS: {:7.1} | Peak: {:5} | {marker} | [{meter}]",
                i + 1,
                energy,
                peak,
            );
        }
        Ok(())
    })
    .await??;

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: beacon-voice devices (and set audio.input_device)");
    println!("  3. Run: pactl info | grep 'Default Source'");
    println!("  4. Try: pavucontrol (to check levels)");

    Ok(())
}

/// Test speaker output with a sine wave
async fn test_speaker(config_path: Option<&std::path::Path>) -> anyhow::Result<()> {
    let config = Config::load_unvalidated(config_path)?;

    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    // 2 seconds of 440Hz at 24kHz, 30% volume
    let sample_rate = 24_000_u32;
    let frequency = 440.0_f32;
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    let samples: Vec<i16> = (0..sample_rate * 2)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            ((2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 * 32767.0) as i16
        })
        .collect();

    println!("Playing {} samples at {} Hz...", samples.len(), sample_rate);

    let playback = AudioPlayback::new(config.audio.output_device.clone());
    let pcm = PcmAudio {
        samples,
        channels: 1,
        sample_rate,
    };
    tokio::task::spawn_blocking(move || playback.play_pcm(&pcm)).await??;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: beacon-voice devices (and set audio.output_device)");
    println!("  2. Run: pactl list sinks short");
    println!("  3. Try: pavucontrol (to check output levels)");

    Ok(())
}

/// Test TTS output
async fn test_tts(config_path: Option<&std::path::Path>, text: &str) -> anyhow::Result<()> {
    println!("Testing TTS with text: \"{text}\"\n");

    let config = Config::load_unvalidated(config_path)?;
    let api_key = config
        .api_keys
        .openai
        .clone()
        .ok_or_else(|| anyhow::anyhow!("OPENAI_API_KEY is required for TTS"))?;
    let tts = TextToSpeech::new(api_key, &config.speech)?;

    println!("Synthesizing speech ({})...", tts.format().as_str());
    let audio = tts.synthesize(text).await?;
    println!("Got {} bytes of audio data", audio.len());

    let pcm = voice::decode_audio(&audio)?;
    println!(
        "Decoded {} Hz, {} channel(s), {:.1}s",
        pcm.sample_rate,
        pcm.channels,
        pcm.duration().as_secs_f32()
    );

    println!("Playing audio...");
    let playback = AudioPlayback::new(config.audio.output_device.clone());
    tokio::task::spawn_blocking(move || playback.play(&audio)).await?;

    println!("\n---");
    println!("If you heard the speech, TTS is working!");

    Ok(())
}

/// Print available audio devices
fn list_devices() -> anyhow::Result<()> {
    let (inputs, outputs) = voice::list_devices()?;

    println!("Input devices:");
    for (i, name) in inputs.iter().enumerate() {
        println!("  [{i}] {name}");
    }
    println!("\nOutput devices:");
    for (i, name) in outputs.iter().enumerate() {
        println!("  [{i}] {name}");
    }
    println!("\nSelect with audio.input_device / audio.output_device (index or name)");

    Ok(())
}
