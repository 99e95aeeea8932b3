use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use callsim::audio::microphone::list_input_devices;
use callsim::{
    AudioSource, CallController, CallState, Config, HttpScoringClient, Persona, ScoringClient, SystemDevices,
    VoiceId,
};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "callsim")]
#[command(about = "Place simulated sales calls to AI prospects")]
struct Cli {
    /// Config file (without extension)
    #[arg(short, long, default_value = "config/callsim")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Place a call to a persona
    Call {
        /// Persona TOML file
        #[arg(short, long)]
        persona: PathBuf,

        /// Override the persona's voice
        #[arg(short, long)]
        voice: Option<VoiceId>,

        /// Call record identifier
        #[arg(long)]
        call_id: Option<String>,

        /// Replay a 16-bit WAV file instead of the microphone
        #[arg(long)]
        input_wav: Option<String>,

        /// Connect immediately without the ring tone
        #[arg(long)]
        no_ring: bool,

        /// Write the call recording (WAV) here
        #[arg(long)]
        recording_out: Option<PathBuf>,

        /// Write the transcript (JSON) here
        #[arg(long)]
        transcript_out: Option<PathBuf>,
    },

    /// List the available voices and input devices
    Voices,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Voices => {
            for voice in VoiceId::ALL {
                println!("{:<8} {}", voice.as_str(), voice.description());
            }
            match list_input_devices() {
                Ok(devices) if !devices.is_empty() => {
                    println!();
                    println!("Input devices:");
                    for device in devices {
                        println!("  {}", device);
                    }
                }
                Ok(_) => println!("\nNo input devices found"),
                Err(e) => warn!("Could not list input devices: {}", e),
            }
            Ok(())
        }
        Command::Call {
            persona,
            voice,
            call_id,
            input_wav,
            no_ring,
            recording_out,
            transcript_out,
        } => {
            let mut cfg = Config::load(&cli.config)?;
            if no_ring {
                cfg.call.ring_duration_ms = 0;
            }

            let mut persona = Persona::load(&persona)?;
            if voice.is_some() {
                persona.voice = voice;
            }

            let source = match input_wav {
                Some(path) => AudioSource::File(path),
                None => AudioSource::Microphone,
            };

            let call = CallArgs {
                call_id: call_id.unwrap_or_else(|| format!("call-{}", uuid::Uuid::new_v4())),
                persona,
                source,
                recording_out,
                transcript_out,
            };
            run_call(cfg, call).await
        }
    }
}

struct CallArgs {
    call_id: String,
    persona: Persona,
    source: AudioSource,
    recording_out: Option<PathBuf>,
    transcript_out: Option<PathBuf>,
}

async fn run_call(cfg: Config, args: CallArgs) -> Result<()> {
    info!("{} v{}", cfg.service.name, env!("CARGO_PKG_VERSION"));
    info!(
        "Calling {} (voice {})",
        args.persona.name,
        args.persona.voice_selection().voice()
    );

    let devices = Arc::new(SystemDevices::new(args.source, cfg.audio.receive_sample_rate));
    let scorer = HttpScoringClient::from_config(&cfg.scoring).map(|c| Arc::new(c) as Arc<dyn ScoringClient>);

    let mut controller = CallController::new(args.call_id, args.persona, cfg, devices.clone(), scorer)
        .map_err(|e| anyhow::anyhow!("{} ({})", e.user_message(), e))?;

    controller
        .dial()
        .await
        .map_err(|e| anyhow::anyhow!("{} ({})", e.user_message(), e))?;

    println!("Ringing... type a line to speak it, 'm' to toggle mute, 'q' to hang up");

    let mut status = controller.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut announced = false;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted; hanging up");
                controller.hang_up().await?;
                break;
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = status.borrow_and_update().clone();
                if current.state == CallState::Connected && !announced {
                    announced = true;
                    println!("Connected.");
                }
                if current.state.is_terminal() {
                    if let Some(error) = current.error {
                        eprintln!("{}", error);
                    }
                    break;
                }
            }
            line = lines.next_line() => {
                match line.context("Failed to read stdin")? {
                    Some(line) => match line.trim() {
                        "q" => {
                            controller.hang_up().await?;
                            break;
                        }
                        "m" => match controller.toggle_mute().await {
                            Ok(muted) => println!("{}", if muted { "Muted" } else { "Unmuted" }),
                            Err(e) => warn!("Mute failed: {}", e),
                        },
                        "" => {}
                        text => {
                            if let Err(e) = controller.send_turn(text).await {
                                warn!("Turn not sent: {}", e);
                            }
                        }
                    },
                    None => {
                        controller.hang_up().await?;
                        break;
                    }
                }
            }
        }
    }

    let outcome = controller.outcome().await?;
    devices.close();

    println!();
    println!("Call {} {} after {}s ({:?})", outcome.call_id, outcome.state, outcome.duration_secs, outcome.reason);
    for entry in &outcome.transcript {
        println!("{:>9}: {}", format!("{:?}", entry.role), entry.content);
    }
    if let Some(score) = &outcome.score {
        println!("Score: {}", serde_json::to_string_pretty(score)?);
    }

    if let Some(path) = args.transcript_out {
        let json = serde_json::to_string_pretty(&outcome.transcript)?;
        std::fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Transcript saved to {}", path.display());
    }

    if let Some(path) = args.recording_out {
        match &outcome.recording_base64 {
            Some(encoded) => {
                use base64::Engine;
                let wav = base64::engine::general_purpose::STANDARD
                    .decode(encoded)
                    .context("Recording is not valid base64")?;
                std::fs::write(&path, wav).with_context(|| format!("Failed to write {}", path.display()))?;
                info!("Recording saved to {}", path.display());
            }
            None => warn!("No audio was recorded"),
        }
    }

    Ok(())
}
