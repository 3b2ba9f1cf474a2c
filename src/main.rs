use std::io::Write;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use soniox_live::core::audio::list_input_devices;
use soniox_live::{
    AppConfig, AudioSource, MicrophoneSource, SessionController, SessionEvent, SessionState,
    TranslationConfig, WavSource,
};

/// Real-time speech-to-text streaming client
#[derive(Parser, Debug)]
#[command(name = "soniox-live")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Subcommand to run
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Transcribe live microphone audio or a WAV file
    Transcribe {
        /// Read audio from a WAV file instead of the microphone
        #[arg(long, value_name = "FILE")]
        wav: Option<PathBuf>,

        /// Input device name (see `devices`)
        #[arg(long, value_name = "NAME")]
        device: Option<String>,

        /// Transcription model override
        #[arg(long)]
        model: Option<String>,

        /// Language hint; repeat for several, omit for auto-detect
        #[arg(short = 'l', long = "language", value_name = "LANG")]
        languages: Vec<String>,

        /// Two-way translation between two languages, e.g. "en:de"
        #[arg(long, value_name = "A:B")]
        translate: Option<String>,

        /// Disable speaker diarization
        #[arg(long)]
        no_diarization: bool,

        /// Enable service-side endpoint detection
        #[arg(long)]
        endpoint_detection: bool,
    },

    /// List available audio input devices
    Devices,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Initialize crypto provider for TLS connections
    // This must be done before any TLS connections are attempted
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    match cli.command {
        Commands::Devices => {
            let devices = list_input_devices();
            if devices.is_empty() {
                println!("No input devices found");
            } else {
                for name in devices {
                    println!("{name}");
                }
            }
            Ok(())
        }
        Commands::Transcribe {
            wav,
            device,
            model,
            languages,
            translate,
            no_diarization,
            endpoint_detection,
        } => {
            run_transcribe(
                wav,
                device,
                model,
                languages,
                translate,
                no_diarization,
                endpoint_detection,
            )
            .await
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_transcribe(
    wav: Option<PathBuf>,
    device: Option<String>,
    model: Option<String>,
    languages: Vec<String>,
    translate: Option<String>,
    no_diarization: bool,
    endpoint_detection: bool,
) -> anyhow::Result<()> {
    let app = AppConfig::from_env().map_err(|e| anyhow!(e.to_string()))?;

    let mut config = app.session_config();
    if let Some(model) = model {
        config.model = model;
    }
    if !languages.is_empty() {
        config.language_hints = Some(languages);
    }
    if let Some(spec) = translate {
        let (a, b) = spec
            .split_once(':')
            .ok_or_else(|| anyhow!("--translate expects \"A:B\", e.g. \"en:de\""))?;
        config.translation = Some(TranslationConfig::TwoWay {
            language_a: a.to_string(),
            language_b: b.to_string(),
        });
    }
    config.enable_speaker_diarization = !no_diarization;
    config.enable_endpoint_detection = endpoint_detection;

    let source: Box<dyn AudioSource> = match (wav, device) {
        (Some(path), _) => Box::new(WavSource::new(path)),
        (None, Some(name)) => Box::new(MicrophoneSource::with_device(name)),
        (None, None) => Box::new(MicrophoneSource::new()),
    };

    let mut controller = SessionController::with_audio_source(source);
    let mut events = controller
        .take_events()
        .expect("event receiver available at startup");

    controller
        .start(config)
        .await
        .map_err(|e| anyhow!(e.to_string()))?;
    info!("Session started; press Ctrl-C to stop");

    let mut stop_requested = false;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                if stop_requested {
                    warn!("Canceling session");
                    controller.cancel();
                } else {
                    info!("Finishing session; press Ctrl-C again to cancel");
                    controller.stop();
                    stop_requested = true;
                }
            }

            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    // Committed text goes to stdout; the in-flight guess is
                    // rendered on stderr and overwritten in place.
                    SessionEvent::TranscriptFinal(text) => {
                        eprint!("\r\x1b[K");
                        print!("{text}");
                        let _ = std::io::stdout().flush();
                    }
                    SessionEvent::TranscriptInterim(text) => {
                        eprint!("\r\x1b[K{text}");
                        let _ = std::io::stderr().flush();
                    }
                    SessionEvent::Finished => {
                        eprint!("\r\x1b[K");
                        println!();
                        info!("Transcript: {}", controller.display_text());
                        break;
                    }
                    SessionEvent::Failed(e) => {
                        eprint!("\r\x1b[K");
                        println!();
                        return Err(anyhow!(e.to_string()));
                    }
                    SessionEvent::StateChanged(SessionState::Canceled) => {
                        println!();
                        info!("Session canceled");
                        break;
                    }
                    SessionEvent::StateChanged(state) => {
                        info!("Session state: {state}");
                    }
                }
            }
        }
    }

    Ok(())
}
