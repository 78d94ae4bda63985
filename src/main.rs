use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use vienta::api::ApiServerBuilder;
use vienta::voice::{AudioCapture, PLAYBACK_SAMPLE_RATE, SAMPLE_RATE, Speaker, rms_level, samples_to_wav};
use vienta::{Config, CredentialGateway, HttpCredentialGateway};

/// Vienta - hands-free realtime voice sessions
#[derive(Parser)]
#[command(name = "vienta", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the credential gateway (default)
    Serve {
        /// Port to listen on
        #[arg(long)]
        port: Option<u16>,
    },
    /// Request an ephemeral session credential through the gateway
    Token {
        /// Gateway base URL
        #[arg(long, env = "VIENTA_GATEWAY_URL")]
        gateway: Option<String>,
    },
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
        /// Write the captured audio to a WAV file
        #[arg(long)]
        save: Option<PathBuf>,
    },
    /// Test speaker output
    TestSpeaker,
    /// Listen for the wake phrase and log detections
    #[cfg(feature = "wake-word")]
    Listen,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,vienta=info",
        1 => "info,vienta=debug",
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
    let config = Config::load()?;

    match cli.command.unwrap_or(Command::Serve { port: None }) {
        Command::Serve { port } => serve(config, port).await,
        Command::Token { gateway } => token(config, gateway).await,
        Command::TestMic { duration, save } => test_mic(duration, save).await,
        Command::TestSpeaker => test_speaker().await,
        #[cfg(feature = "wake-word")]
        Command::Listen => listen(config).await,
    }
}

/// Run the credential gateway until interrupted
async fn serve(config: Config, port: Option<u16>) -> anyhow::Result<()> {
    let mut builder = ApiServerBuilder::from_config(&config.gateway);
    if let Some(port) = port {
        builder = builder.port(port);
    }

    let server = builder.build();
    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => tracing::info!("shutting down"),
    }

    Ok(())
}

/// Fetch an ephemeral credential and report its expiry
async fn token(config: Config, gateway: Option<String>) -> anyhow::Result<()> {
    let url = gateway.unwrap_or(config.session.gateway_url);
    let client = HttpCredentialGateway::new(url.as_str());

    let credential = client
        .ephemeral_credential(config.session.api_key.as_ref())
        .await?;

    match credential.expires_at() {
        Some(expires_at) => println!("ephemeral credential issued by {url}, expires {expires_at}"),
        None => println!("ephemeral credential issued by {url}"),
    }

    Ok(())
}

/// Test microphone input
#[allow(clippy::future_not_send)]
async fn test_mic(duration: u64, save: Option<PathBuf>) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut capture = AudioCapture::new()?;
    capture.start()?;

    println!("Sample rate: {SAMPLE_RATE} Hz");
    println!("---");

    let mut recorded = Vec::new();
    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let samples = capture.take_buffer();
        let energy = rms_level(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | [{}]",
            i + 1,
            energy,
            peak,
            meter
        );

        if save.is_some() {
            recorded.extend(samples);
        }
    }

    capture.stop();

    if let Some(path) = save {
        let wav = samples_to_wav(&recorded, SAMPLE_RATE)?;
        std::fs::write(&path, wav)?;
        println!("\nSaved {} samples to {}", recorded.len(), path.display());
    }

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

/// Test speaker output with a sine wave
async fn test_speaker() -> anyhow::Result<()> {
    use vienta::realtime::PlaybackSink;

    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let speaker = Speaker::new()?;

    #[allow(clippy::cast_precision_loss)]
    let tone: Vec<f32> = (0..PLAYBACK_SAMPLE_RATE * 2)
        .map(|i| {
            let t = i as f32 / PLAYBACK_SAMPLE_RATE as f32;
            (t * 440.0 * std::f32::consts::TAU).sin() * 0.3
        })
        .collect();
    speaker.play(&tone);

    while speaker.queued() > 0 {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    speaker.close();

    println!("Done!");
    Ok(())
}

/// Run the wake word detector and log detections until interrupted
#[cfg(feature = "wake-word")]
async fn listen(config: Config) -> anyhow::Result<()> {
    use vienta::voice::{KeywordSpec, ModelSpec, RustpotterEngine, WakeWordAdapter};

    let gateway = HttpCredentialGateway::new(config.session.gateway_url.as_str());
    let mut adapter =
        WakeWordAdapter::new(Box::new(RustpotterEngine::new())).with_enabled(config.wake_word.enabled);

    adapter
        .bootstrap(
            &gateway,
            &KeywordSpec::from(&config.wake_word),
            &ModelSpec::from(&config.wake_word),
        )
        .await?;

    tracing::info!(label = %config.wake_word.label, "listening - say the wake phrase");
    let slot = adapter.slot().clone();

    loop {
        tokio::select! {
            () = slot.published() => {
                if let Some(detection) = adapter.take_detection() {
                    println!(
                        "[{}] {} (score {:.3})",
                        detection.detected_at.format("%H:%M:%S"),
                        detection.label,
                        detection.score
                    );
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    adapter.release().await?;
    Ok(())
}
