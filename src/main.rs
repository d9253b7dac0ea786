use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use intervox::session::Command as SessionCommand;
use intervox::voice::{
    AudioCapture, Capabilities, Capture, EventSink, SpeakerSynthesizer, VoiceEvent,
    WhisperRecognizer, calculate_energy, play_mp3_blocking,
};
use intervox::{
    Config, HttpTransport, InterviewSession, Notice, Resume, SessionSettings, VoiceMode,
    VoiceState,
};

/// Intervox - hands-free voice mock interviews
#[derive(Parser)]
#[command(name = "intervox", version, about)]
struct Cli {
    /// Config file (defaults to ~/.config/intervox/config.toml)
    #[arg(short, long, env = "INTERVOX_CONFIG")]
    config: Option<PathBuf>,

    /// Interview API base URL (overrides config and `INTERVOX_API_URL`)
    #[arg(long)]
    api_url: Option<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Disable voice features (typed input, printed replies)
    #[arg(long)]
    disable_voice: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a live interview session
    Interview {
        /// Job description text
        #[arg(short, long, required_unless_present = "job_file", conflicts_with = "job_file")]
        job_description: Option<String>,
        /// Read the job description from a file
        #[arg(long)]
        job_file: Option<PathBuf>,
        /// Resume to upload (pdf, doc, docx, txt, md)
        #[arg(short, long)]
        resume: Option<PathBuf>,
    },
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test TTS output
    TestTts {
        /// Text to speak
        #[arg(default_value = "Hello! Tell me a little about yourself.")]
        text: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,intervox=info",
        1 => "info,intervox=debug",
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
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load(cli.config.as_deref(), cli.disable_voice)?;
    if let Some(url) = cli.api_url {
        config.api.url = url;
    }

    match cli.command {
        Command::Interview {
            job_description,
            job_file,
            resume,
        } => {
            let job_description = match (job_description, job_file) {
                (Some(text), _) => text,
                (None, Some(path)) => std::fs::read_to_string(&path)
                    .with_context(|| format!("reading job description {}", path.display()))?,
                (None, None) => anyhow::bail!("a job description is required"),
            };
            let resume = resume
                .map(|path| {
                    Resume::from_path(&path)
                        .with_context(|| format!("reading resume {}", path.display()))
                })
                .transpose()?;
            interview(config, &job_description, resume.as_ref()).await
        }
        Command::TestMic { duration } => test_mic(duration).await,
        Command::TestTts { text } => test_tts(&config, &text).await,
    }
}

/// Build real voice adapters when possible, typed input otherwise
fn capabilities(config: &Config) -> anyhow::Result<(Capabilities, bool)> {
    let Some(key) = config.openai_key.as_ref().filter(|_| config.voice_available()) else {
        if config.voice.enabled {
            tracing::warn!("OPENAI_API_KEY not set, continuing with typed input only");
        }
        return Ok((Capabilities::text_only(), false));
    };

    let recognizer = WhisperRecognizer::new(
        Arc::clone(key),
        config.voice.stt_model.clone(),
        config.voice.language.clone(),
    )?;
    let synthesizer = SpeakerSynthesizer::new(
        Arc::clone(key),
        config.voice.tts_model.clone(),
        config.voice.tts_voice.clone(),
        config.voice.tts_speed,
    )?;

    Ok((
        Capabilities {
            capture: Box::new(AudioCapture::new()),
            recognizer: Box::new(recognizer),
            synthesizer: Box::new(synthesizer),
        },
        true,
    ))
}

#[allow(clippy::future_not_send)]
async fn interview(
    mut config: Config,
    job_description: &str,
    resume: Option<&Resume>,
) -> anyhow::Result<()> {
    let transport = HttpTransport::new(
        &config.api.url,
        config.api.token.take(),
        config.api.request_timeout,
    )?;
    let (capabilities, voice) = capabilities(&config)?;
    let settings = SessionSettings {
        voice,
        recognition_window: config.voice.recognition_window,
        intro_delay: config.voice.intro_delay,
    };

    tracing::info!(api_url = %config.api.url, voice, "starting interview");
    let mut session = InterviewSession::new(capabilities, Arc::new(transport), settings);
    session.start(job_description, resume).await?;

    println!("Interview started. Type your answer and press Enter.");
    println!("Commands: /listen (speak an answer), /mic (toggle microphone), /end (finish)\n");

    let (tx, rx) = mpsc::channel(16);
    spawn_input(tx);

    let mut printer = Printer::default();
    printer.update(&mut session);
    session.run(rx, |session| printer.update(session)).await;
    printer.update(&mut session);

    match session.feedback() {
        Some(feedback) => {
            println!("\n=== Feedback ===");
            println!("Score: {}/100", feedback.score);
            if !feedback.summary.is_empty() {
                println!("\n{}", feedback.summary);
            }
            if !feedback.strengths.is_empty() {
                println!("\nStrengths:");
                for item in &feedback.strengths {
                    println!("  + {item}");
                }
            }
            if !feedback.weaknesses.is_empty() {
                println!("\nTo improve:");
                for item in &feedback.weaknesses {
                    println!("  - {item}");
                }
            }
        }
        None => println!("\nSession ended without feedback."),
    }

    Ok(())
}

/// Forward stdin lines and Ctrl-C to the session
fn spawn_input(tx: mpsc::Sender<SessionCommand>) {
    let interrupt = tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.send(SessionCommand::End).await.ok();
        }
    });

    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let command = match lines.next_line().await {
                Ok(Some(line)) => match line.trim() {
                    "" => continue,
                    "/end" | "/quit" => SessionCommand::End,
                    "/listen" => SessionCommand::Listen,
                    "/mic" => SessionCommand::ToggleCapture,
                    text => SessionCommand::Submit(text.to_string()),
                },
                Ok(None) => SessionCommand::End,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to read stdin");
                    SessionCommand::End
                }
            };

            let done = command == SessionCommand::End;
            if tx.send(command).await.is_err() || done {
                break;
            }
        }
    });
}

/// Prints what changed since the last update
#[derive(Default)]
struct Printer {
    turns: usize,
    status: Option<(VoiceState, VoiceMode, bool)>,
}

impl Printer {
    fn update(&mut self, session: &mut InterviewSession) {
        for turn in session.transcript().turns().iter().skip(self.turns) {
            println!("{}: {}\n", turn.speaker.label(), turn.content);
        }
        self.turns = session.transcript().len();

        for notice in session.take_notices() {
            match notice {
                Notice::Error { source, message } => println!("! {source:?} error: {message}"),
                Notice::Downgraded { reason } => {
                    println!("! voice input off ({reason}), type your answers");
                }
                Notice::Busy => println!("! still waiting for the interviewer, one moment"),
                Notice::FeedbackUnavailable { reason } => {
                    println!("! feedback could not be retrieved: {reason}");
                }
            }
        }

        let status = (session.voice_state(), session.voice_mode(), session.capture_active());
        if self.status != Some(status) {
            self.status = Some(status);
            if status.1 == VoiceMode::Voice {
                let mic = if status.2 { "mic on" } else { "mic off" };
                println!("  [{:?}, {mic}]", status.0);
            }
        }
    }
}

#[allow(clippy::future_not_send)]
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let (tx, mut events) = mpsc::unbounded_channel();
    let mut capture = AudioCapture::new();
    let stream = capture.start_capture(EventSink::new(tx))?;

    println!("Sample rate: {} Hz", intervox::voice::SAMPLE_RATE);
    println!("---");

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        if let Ok(intervox::Event::Voice(VoiceEvent::CaptureLost { error })) = events.try_recv() {
            capture.stop_capture(stream);
            anyhow::bail!("microphone lost: {error}");
        }

        let samples = stream.take_samples();
        let energy = calculate_energy(&samples);
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
    }

    capture.stop_capture(stream);

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check that the mic is plugged in and unmuted.");

    Ok(())
}

async fn test_tts(config: &Config, text: &str) -> anyhow::Result<()> {
    println!("Testing TTS with text: \"{text}\"\n");

    let key = config
        .openai_key
        .as_ref()
        .context("OPENAI_API_KEY is required for TTS")?;
    let synthesizer = SpeakerSynthesizer::new(
        Arc::clone(key),
        config.voice.tts_model.clone(),
        config.voice.tts_voice.clone(),
        config.voice.tts_speed,
    )?;

    println!("Synthesizing speech...");
    let mp3_data = synthesizer.synthesize(text).await?;
    println!("Got {} bytes of audio data", mp3_data.len());

    println!("Playing audio...");
    tokio::task::spawn_blocking(move || play_mp3_blocking(&mp3_data, &AtomicBool::new(false)))
        .await??;

    println!("Done!");
    Ok(())
}
