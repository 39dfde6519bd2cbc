use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use clap::{Parser, Subcommand};
use secrecy::ExposeSecret;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use supply_voice::config::LoadOptions;
use supply_voice::voice::{
    AudioCapture, CaptureOptions, CpalOutput, ScribeSession, calculate_rms, decode_mp3,
    play_blocking, samples_to_wav,
};
use supply_voice::{
    ChannelClient, Collaborators, Config, ConversationSettings, CredentialSource, Event,
    EventSender, HttpCredentials, Orchestrator, ViewState, event_channel,
};

/// Supply Voice - talk to the materials ordering assistant
#[derive(Parser)]
#[command(name = "supply-voice", version, about)]
struct Cli {
    /// Conversation language (en, de)
    #[arg(short, long, env = "SUPPLY_VOICE_LANGUAGE")]
    language: Option<String>,

    /// Backend API base URL
    #[arg(long, env = "SUPPLY_VOICE_API_URL")]
    api_url: Option<String>,

    /// Config file (default: ~/.config/supply-voice/config.toml)
    #[arg(short, long)]
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
        /// Save the recording as a WAV file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Test speaker output by playing an MP3 (default: the greeting)
    TestSpeaker {
        /// MP3 file to play
        file: Option<PathBuf>,
    },
    /// Fetch a transcription credential from the backend
    Token,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "warn,supply_voice=info",
        1 => "info,supply_voice=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
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
    let options = LoadOptions {
        language: cli.language,
        api_url: cli.api_url,
        config_path: cli.config,
    };
    let config = Config::load_with_options(&options)?;
    tracing::debug!(?config, "loaded configuration");

    if let Some(cmd) = cli.command {
        return match cmd {
            Command::TestMic { duration, output } => test_mic(duration, output).await,
            Command::TestSpeaker { file } => {
                let file = file.unwrap_or_else(|| config.greeting.audio_path(config.language));
                test_speaker(file).await
            }
            Command::Token => fetch_token(&config).await,
        };
    }

    converse(config).await
}

/// Run one conversation until shutdown
async fn converse(config: Config) -> anyhow::Result<()> {
    tracing::info!(
        api = %config.api_url,
        language = %config.language,
        "starting supply voice"
    );

    let (events, rx) = event_channel();
    let deps = Collaborators {
        channel: Arc::new(ChannelClient::open(config.channel_url.clone(), events.clone())),
        transcription: Arc::new(ScribeSession::new(config.stt.clone(), events.clone())),
        credentials: Arc::new(HttpCredentials::new(config.token_url.clone())?),
        audio: Arc::new(CpalOutput::new()),
    };

    let orchestrator = Orchestrator::new(ConversationSettings::from_config(&config), deps, events.clone());
    let view = orchestrator.subscribe();

    tokio::spawn(print_view(view));
    tokio::spawn(read_commands(events.clone()));
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted");
            events.send(Event::Shutdown);
        }
    });

    println!("Press Enter to start or stop talking, q + Enter to quit.");
    orchestrator.run(rx).await;
    Ok(())
}

/// Map terminal input onto conversation commands
async fn read_commands(events: EventSender) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let event = match line.trim() {
            "q" | "quit" => Event::Shutdown,
            _ => Event::Toggle,
        };
        let quit = matches!(event, Event::Shutdown);
        if !events.send(event) || quit {
            break;
        }
    }
}

/// Print the status line and on-screen text whenever they change
async fn print_view(mut view: tokio::sync::watch::Receiver<ViewState>) {
    let mut last_status = String::new();
    let mut last_text: Option<String> = None;

    loop {
        let (status, text) = {
            let current = view.borrow_and_update();
            (
                current.status_text(),
                current.visible_text().map(ToString::to_string),
            )
        };

        if status != last_status {
            println!("[{status}]");
            last_status = status;
        }
        if text != last_text {
            if let Some(text) = &text {
                println!("  {text}");
            }
            last_text = text;
        }

        if view.changed().await.is_err() {
            break;
        }
    }
}

/// Test microphone input
#[allow(clippy::future_not_send)]
async fn test_mic(duration: u64, output: Option<PathBuf>) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut capture = AudioCapture::new(CaptureOptions::default())?;
    capture.start()?;

    let sample_rate = capture.sample_rate();
    println!("Sample rate: {sample_rate} Hz");
    println!("---");

    let mut recording = Vec::new();
    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let samples = capture.take_buffer();
        let energy = calculate_rms(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "#".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | [{}]",
            i + 1,
            energy,
            peak,
            meter
        );

        if output.is_some() {
            recording.extend(samples);
        }
    }

    capture.stop();

    if let Some(path) = output {
        let wav = samples_to_wav(&recording, sample_rate)?;
        std::fs::write(&path, wav)?;
        println!("\nSaved {} samples to {}", recording.len(), path.display());
    }

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

/// Test speaker output with an MP3 file
async fn test_speaker(file: PathBuf) -> anyhow::Result<()> {
    println!("Testing speaker output with {}...", file.display());

    let bytes = std::fs::read(&file)?;
    let audio = decode_mp3(&bytes)?;
    println!(
        "Playing {:.1}s at {} Hz...",
        audio.duration().as_secs_f32(),
        audio.sample_rate
    );

    tokio::task::spawn_blocking(move || play_blocking(&audio, &AtomicBool::new(false))).await??;

    println!("\n---");
    println!("If you heard the clip, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: aplay -l (to list devices)");

    Ok(())
}

/// Check the credential endpoint without revealing the credential
async fn fetch_token(config: &Config) -> anyhow::Result<()> {
    let credentials = HttpCredentials::new(config.token_url.clone())?;
    println!("Requesting credential from {}...", credentials.endpoint());

    let token = credentials.fetch().await?;
    println!(
        "Credential received ({} characters)",
        token.expose_secret().len()
    );
    Ok(())
}
