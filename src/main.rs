use clap::{Parser, Subcommand, ValueEnum};
use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use replay_vision::config;
use replay_vision::desktop::{Desktop, MockDesktop, XdoDesktop};
use replay_vision::model::{ModelCapability, ModelConfig, OpenAiClient, RetryingModel, TimeoutModel, check_health};
use replay_vision::synthesis::{load_steps, save_steps};
use replay_vision::{
    CancelToken, ModelVerifier, Pipeline, RunReport, ScreenChangeVerifier, Session, Step, Transcript,
    Verifier, WorkflowRun, cleanup_old_sessions, list_sessions,
};

type SharedModel = Arc<dyn ModelCapability>;

/// Replay Vision - learn desktop workflows from screen recordings and replay them
#[derive(Parser, Debug)]
#[command(
    name = "replay-vision",
    about = "Turn a screen recording into steps and play them back with a vision model in the loop",
    after_help = "ENVIRONMENT VARIABLES:\n\
        REPLAY_VISION_MODEL_ENDPOINT        Model API endpoint URL\n\
        REPLAY_VISION_MODEL                 Model name\n\
        REPLAY_VISION_MODEL_API_KEY         Bearer token (falls back to OPENAI_API_KEY)\n\
        REPLAY_VISION_CALL_TIMEOUT          Hard timeout per model call (s)\n\
        REPLAY_VISION_SESSION_DIR           Base directory for sessions\n\
        REPLAY_VISION_MAX_FRAMES            Key frames kept per recording\n\
        REPLAY_VISION_MIN_DIFFERENCE        Minimum change between key frames (0-1)\n\
        REPLAY_VISION_MAX_ATTEMPTS          Planner invocations per step\n\
        REPLAY_VISION_BACKOFF_BASE_MS       First retry delay after an error\n\
        REPLAY_VISION_BACKOFF_CAP_MS        Maximum retry delay\n\
        REPLAY_VISION_SCREENSHOT_MAX_WIDTH  Screenshots are downscaled to this width\n\
        RUST_LOG                            Log filter (default: info)"
)]
struct Args {
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Input backend for playback
#[derive(ValueEnum, Clone, Copy, Debug)]
enum DesktopKind {
    /// Real X11 display through xdotool
    Xdotool,
    /// In-memory desktop (dry run)
    Mock,
}

/// Step completion strategy
#[derive(ValueEnum, Clone, Copy, Debug)]
enum VerifierKind {
    /// Ask the model whether the step is done
    Model,
    /// Complete once the screen visibly changed
    ScreenChange,
}

#[derive(clap::Args, Debug)]
struct ModelArgs {
    /// Model endpoint URL
    #[arg(long, env = "REPLAY_VISION_MODEL_ENDPOINT", default_value = config::DEFAULT_MODEL_ENDPOINT)]
    endpoint: String,

    /// Model name
    #[arg(long, env = "REPLAY_VISION_MODEL", default_value = config::DEFAULT_MODEL)]
    model: String,
}

#[derive(clap::Args, Debug)]
struct PlayArgs {
    /// Where actions are injected
    #[arg(long, value_enum, default_value = "xdotool")]
    desktop: DesktopKind,

    /// How step completion is judged
    #[arg(long, value_enum, default_value = "model")]
    verifier: VerifierKind,

    /// Planner invocations allowed per step
    #[arg(long, env = "REPLAY_VISION_MAX_ATTEMPTS")]
    max_attempts: Option<u32>,

    /// Overall goal shown to the planner with every step
    #[arg(long)]
    instruction: Option<String>,

    /// Retry steps whose model calls fail instead of halting
    #[arg(long)]
    retry_unavailable: bool,

    /// Mock desktop size as WxH
    #[arg(long, default_value = "1280x800")]
    mock_size: String,
}

#[derive(clap::Args, Debug)]
struct OutputArgs {
    /// Session directory (default: auto-generated under the session base dir)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Remove the session directory when done
    #[arg(long)]
    discard: bool,

    /// Print results as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Extract key frames from a recording (video file or image directory)
    Sample {
        recording: PathBuf,

        /// Maximum frames to keep
        #[arg(long, env = "REPLAY_VISION_MAX_FRAMES")]
        max_frames: Option<usize>,

        /// Minimum fraction of changed pixels between kept frames
        #[arg(long, env = "REPLAY_VISION_MIN_DIFFERENCE")]
        min_difference: Option<f32>,

        #[command(flatten)]
        out: OutputArgs,
    },

    /// Describe the workflow in a recording as steps
    Synthesize {
        recording: PathBuf,

        /// What the recording is about, passed to the model
        #[arg(long)]
        context: Option<String>,

        #[command(flatten)]
        model: ModelArgs,

        #[command(flatten)]
        out: OutputArgs,
    },

    /// Play back a steps file
    Play {
        /// steps.json written by `synthesize`
        steps: PathBuf,

        #[command(flatten)]
        model: ModelArgs,

        #[command(flatten)]
        play: PlayArgs,

        #[command(flatten)]
        out: OutputArgs,
    },

    /// Sample, synthesize and play back a recording
    Run {
        recording: PathBuf,

        #[arg(long)]
        context: Option<String>,

        #[command(flatten)]
        model: ModelArgs,

        #[command(flatten)]
        play: PlayArgs,

        #[command(flatten)]
        out: OutputArgs,
    },

    /// Print a transcript file
    Transcript {
        path: PathBuf,

        #[arg(long)]
        json: bool,
    },

    /// List sessions, optionally removing old ones
    Sessions {
        /// Remove sessions older than this many hours
        #[arg(long)]
        clean_older_than: Option<u64>,
    },

    /// Check that the model endpoint responds
    Health {
        #[command(flatten)]
        model: ModelArgs,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match args.command {
        Some(Commands::Sample {
            recording,
            max_frames,
            min_difference,
            out,
        }) => {
            let session = open_session(&recording, &out)?;
            let mut pipeline = Pipeline::new(build_model(&ModelArgs::defaults()));
            if let Some(max) = max_frames {
                pipeline.sampler.max_frames = max;
            }
            if let Some(min) = min_difference {
                pipeline.sampler.min_difference = min;
            }

            let (frames, stats, paths) = tokio::task::spawn_blocking(move || {
                session.init()?;
                let (frames, stats) = pipeline.sample(&recording)?;
                let paths = session.save_frames(&frames, pipeline.synthesis.max_image_width)?;
                Ok::<_, replay_vision::ReplayError>((frames, stats, paths))
            })
            .await??;

            if out.json {
                println!("{}", serde_json::to_string_pretty(&serde_json::json!({
                    "stats": stats,
                    "frames": paths,
                }))?);
            } else {
                println!(
                    "Kept {} of {} frames ({} by even spacing)",
                    stats.accepted, stats.scanned, stats.fallback
                );
                for (frame, path) in frames.iter().zip(&paths) {
                    println!("  {} [{}] {}", frame.label(), frame.reason, path.display());
                }
            }
        }

        Some(Commands::Synthesize {
            recording,
            context,
            model,
            out,
        }) => {
            let session = open_session(&recording, &out)?;
            let pipeline = Pipeline::new(build_model(&model));
            let steps_path = session.steps_path();

            let steps = tokio::task::spawn_blocking(move || {
                session.init()?;
                let (frames, _) = pipeline.sample(&recording)?;
                session.save_frames(&frames, pipeline.synthesis.max_image_width)?;
                let steps = pipeline.synthesize(&frames, context.as_deref())?;
                save_steps(&session.steps_path(), &steps)?;
                Ok::<_, replay_vision::ReplayError>(steps)
            })
            .await??;

            if out.json {
                println!("{}", serde_json::to_string_pretty(&steps)?);
            } else {
                print_steps(&steps);
                println!("\nSteps: {}", steps_path.display());
            }
        }

        Some(Commands::Play {
            steps,
            model,
            play,
            out,
        }) => {
            let loaded = load_steps(&steps)?;
            let session = open_session(&steps, &out)?;
            let model = build_model(&model);
            let pipeline = configure(Pipeline::new(model.clone()), &play);
            let verifier = build_verifier(play.verifier, model);
            let desktop = build_desktop(&play)?;
            let cancel = watch_ctrl_c(pipeline.cancel_token());

            let run = tokio::task::spawn_blocking(move || {
                session.init()?;
                let transcript = Transcript::create(&session.dir, session.id.clone())?;
                pipeline.play(&loaded, desktop, verifier, transcript)
            })
            .await??;
            cancel.abort();
            return finish(run, out.json);
        }

        Some(Commands::Run {
            recording,
            context,
            model,
            play,
            out,
        }) => {
            let session = open_session(&recording, &out)?;
            let model = build_model(&model);
            let pipeline = configure(Pipeline::new(model.clone()), &play);
            let verifier = build_verifier(play.verifier, model);
            let desktop = build_desktop(&play)?;
            let cancel = watch_ctrl_c(pipeline.cancel_token());

            let run = tokio::task::spawn_blocking(move || {
                pipeline.run(&recording, context.as_deref(), desktop, verifier, &session)
            })
            .await??;
            cancel.abort();
            return finish(run, out.json);
        }

        Some(Commands::Transcript { path, json }) => {
            let loaded = Transcript::load(&path)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&loaded.entries)?);
            } else {
                println!(
                    "Run {} on {} started {}",
                    loaded.header.run_id, loaded.header.host, loaded.header.started_at
                );
                for entry in &loaded.entries {
                    println!("  [retry {}] {}", entry.retry, entry.describe());
                }
            }
        }

        Some(Commands::Sessions { clean_older_than }) => {
            let base = PathBuf::from(config::session_base_dir());
            if let Some(hours) = clean_older_than {
                let removed = cleanup_old_sessions(&base, Duration::from_secs(hours * 3600))?;
                println!("Removed {} sessions", removed);
            }
            for session in list_sessions(&base)? {
                println!("{}", session.display());
            }
        }

        Some(Commands::Health { model }) => {
            let healthy = check_health(&model.endpoint, 5)?;
            if healthy {
                println!("Model endpoint responding: {}", model.endpoint);
            } else {
                return Err(format!("model endpoint not responding: {}", model.endpoint).into());
            }
        }

        None => {
            println!("Replay Vision - learn desktop workflows from recordings and replay them");
            println!();
            println!("Usage: replay-vision <COMMAND>");
            println!();
            println!("Commands:");
            println!("  sample      Extract key frames from a recording");
            println!("  synthesize  Describe the workflow in a recording as steps");
            println!("  play        Play back a steps file");
            println!("  run         Sample, synthesize and play back a recording");
            println!("  transcript  Print a transcript file");
            println!("  sessions    List or clean up sessions");
            println!("  health      Check the model endpoint");
            println!();
            println!("Run with --help for more information.");
        }
    }

    Ok(())
}

impl ModelArgs {
    fn defaults() -> Self {
        Self {
            endpoint: config::model_endpoint(),
            model: config::model_name(),
        }
    }
}

/// HTTP client with transport retries and a hard per-call timeout
fn build_model(args: &ModelArgs) -> SharedModel {
    let settings = &config::get().model;
    let client = OpenAiClient::new(ModelConfig::new(&args.endpoint).model(&args.model));
    let retrying = RetryingModel::new(client, settings.retries);
    Arc::new(TimeoutModel::new(retrying, Duration::from_secs(settings.call_timeout)))
}

fn build_verifier(kind: VerifierKind, model: SharedModel) -> Box<dyn Verifier> {
    match kind {
        VerifierKind::Model => Box::new(ModelVerifier::new(model)),
        VerifierKind::ScreenChange => Box::new(ScreenChangeVerifier::default()),
    }
}

fn build_desktop(play: &PlayArgs) -> Result<Box<dyn Desktop>, Box<dyn Error>> {
    match play.desktop {
        DesktopKind::Xdotool => Ok(Box::new(XdoDesktop::connect()?)),
        DesktopKind::Mock => {
            let (width, height) = parse_size(&play.mock_size)
                .ok_or_else(|| format!("Invalid size '{}'. Use WxH, e.g. 1280x800", play.mock_size))?;
            Ok(Box::new(MockDesktop::new(width, height)))
        }
    }
}

fn configure(mut pipeline: Pipeline<SharedModel>, play: &PlayArgs) -> Pipeline<SharedModel> {
    if let Some(attempts) = play.max_attempts {
        pipeline.playback = pipeline.playback.max_attempts(attempts);
    }
    pipeline.playback = pipeline.playback.retry_unavailable(play.retry_unavailable);
    if let Some(instruction) = &play.instruction {
        pipeline.planner = pipeline.planner.user_instruction(instruction.clone());
    }
    pipeline
}

/// Session for `source`, kept unless `--discard` is given
fn open_session(source: &Path, out: &OutputArgs) -> Result<Session, Box<dyn Error>> {
    let session = match &out.output {
        Some(dir) => Session::in_dir(dir),
        None => {
            let name = source
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "replay".to_string());
            Session::with_name(&name)
        }
    };
    Ok(session.keep(!out.discard).with_recording(source))
}

/// Cancel the run on Ctrl-C
fn watch_ctrl_c(token: CancelToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after the current transition");
            token.cancel();
        }
    })
}

fn finish(run: WorkflowRun, json: bool) -> Result<(), Box<dyn Error>> {
    let report = run.report();
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    info!(status = %report.status, cycles = report.cycles, "run finished");
    match run.error {
        None => Ok(()),
        Some(e) => Err(e.into()),
    }
}

fn print_steps(steps: &[Step]) {
    for step in steps {
        println!("{}. {}", step.index, step.text);
        if let Some(expected) = &step.hints.expected_outcome {
            println!("   Expected: {}", expected);
        }
    }
}

fn print_report(report: &RunReport) {
    println!(
        "Run {}: {} ({} of {} steps, {} cycles)",
        report.run_id, report.status, report.steps_completed, report.steps_total, report.cycles
    );
    for step in &report.steps {
        println!("  {}. [{}] {} ({} cycles)", step.index, step.state, step.text, step.cycles);
    }
    if let Some(step) = report.failed_step {
        let action = report
            .last_action
            .as_ref()
            .map(|a| a.to_string())
            .unwrap_or_else(|| "none".to_string());
        println!(
            "Failed at step {} after {} retries; last action: {}",
            step,
            report.retries.unwrap_or(0),
            action
        );
    }
    if let Some(message) = &report.message {
        println!("Error: {}", message);
    }
    if let Some(path) = &report.transcript {
        println!("\nTranscript: {}", path.display());
    }
}

fn parse_size(size: &str) -> Option<(u32, u32)> {
    let (w, h) = size.split_once(['x', 'X'])?;
    let (w, h) = (w.trim().parse().ok()?, h.trim().parse().ok()?);
    (w > 0 && h > 0).then_some((w, h))
}
