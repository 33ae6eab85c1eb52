//! ReasonKit Replay CLI
//!
//! Records browser interactions into a session log and replays them.

use anyhow::Context;
use clap::{Parser, Subcommand};
use reasonkit_replay::browser::connection::DEFAULT_ENDPOINT;
use reasonkit_replay::commands::{self, ControlAction};
use reasonkit_replay::config::{RecordConfig, ReplayConfig};
use reasonkit_replay::control::{ControlPaths, DEFAULT_POLL_INTERVAL_MS};
use reasonkit_replay::replay::{ReplayOutcome, DEFAULT_CALL_TIMEOUT_MS, DEFAULT_SPEED_MS};
use reasonkit_replay::ConnectionConfig;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// ReasonKit Replay
#[derive(Parser, Debug)]
#[command(name = "rk-replay")]
#[command(author = "ReasonKit Team <team@reasonkit.sh>")]
#[command(version)]
#[command(about = "Capture browser interactions and replay them over CDP")]
struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Record the active page into a session log until Ctrl+C
    Record {
        /// Remote-debugging endpoint
        #[arg(long, env = "CDP_URL", default_value = DEFAULT_ENDPOINT)]
        endpoint: String,

        /// Session log path (default: <log-dir>/dom_session_<id>.jsonl)
        #[arg(short, long, env = "OUTPUT_PATH")]
        output: Option<PathBuf>,

        /// Session id (default: random UUID)
        #[arg(long, env = "SESSION_ID")]
        session_id: Option<String>,

        /// Directory for derived log paths (default: system temp dir)
        #[arg(long)]
        log_dir: Option<PathBuf>,
    },

    /// Replay a session log against the active page
    Replay {
        /// Remote-debugging endpoint
        #[arg(long, env = "CDP_URL", default_value = DEFAULT_ENDPOINT)]
        endpoint: String,

        /// Session log to replay
        #[arg(short, long, env = "INPUT_PATH")]
        input: PathBuf,

        /// Delay after each action in milliseconds
        #[arg(long, env = "SPEED_MS", default_value_t = DEFAULT_SPEED_MS)]
        speed_ms: u64,

        /// Captions as a JSON array of {index, text}
        #[arg(long, env = "CAPTIONS", default_value = "")]
        captions: String,

        /// Pause toggle file
        #[arg(long, env = "PAUSE_FILE")]
        pause_file: Option<PathBuf>,

        /// Step signal file; enables step mode (empty disables)
        #[arg(long, env = "STEP_FILE")]
        step_file: Option<PathBuf>,

        /// Stop signal file
        #[arg(long, env = "STOP_FILE")]
        stop_file: Option<PathBuf>,

        /// Progress output file
        #[arg(long, env = "PROGRESS_FILE")]
        progress_file: Option<PathBuf>,

        /// Control file polling interval in milliseconds
        #[arg(long, default_value_t = DEFAULT_POLL_INTERVAL_MS)]
        poll_ms: u64,

        /// Timeout for a single protocol call in milliseconds
        #[arg(long, default_value_t = DEFAULT_CALL_TIMEOUT_MS)]
        call_timeout_ms: u64,
    },

    /// Send a control signal to a running replay
    Ctl {
        /// Signal to send
        #[command(subcommand)]
        action: CtlAction,

        /// Directory holding the control files (default: system temp dir)
        #[arg(long, global = true)]
        dir: Option<PathBuf>,
    },

    /// Summarize a session log
    Inspect {
        /// Session log
        #[arg(short, long, env = "INPUT_PATH")]
        input: PathBuf,
    },

    /// Align narrations to a session log and print captions JSON
    Align {
        /// Session log
        #[arg(long)]
        dom_log: PathBuf,

        /// Narrations JSONL ({timestamp, text} per line)
        #[arg(long)]
        narrations: PathBuf,
    },
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum CtlAction {
    /// Pause the replay
    Pause,
    /// Resume a paused replay
    Resume,
    /// Advance one step in step mode
    Step,
    /// Stop at the next step boundary
    Stop,
    /// Show signals and progress
    Status,
    /// Clear stop, step and progress files
    Reset,
}

impl From<CtlAction> for ControlAction {
    fn from(action: CtlAction) -> Self {
        match action {
            CtlAction::Pause => ControlAction::Pause,
            CtlAction::Resume => ControlAction::Resume,
            CtlAction::Step => ControlAction::Step,
            CtlAction::Stop => ControlAction::Stop,
            CtlAction::Status => ControlAction::Status,
            CtlAction::Reset => ControlAction::Reset,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize tracing
    let default_filter = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(args.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command) -> anyhow::Result<()> {
    match command {
        Command::Record {
            endpoint,
            output,
            session_id,
            log_dir,
        } => {
            let mut builder = RecordConfig::builder()
                .connection(ConnectionConfig::builder().endpoint(endpoint).build());
            if let Some(output) = output {
                builder = builder.output(output);
            }
            if let Some(id) = session_id {
                builder = builder.session_id(id);
            }
            if let Some(dir) = log_dir {
                builder = builder.log_dir(dir);
            }
            let config = builder.build();

            let shutdown = async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::warn!("Failed to listen for Ctrl+C: {}", e);
                    std::future::pending::<()>().await;
                }
            };

            let outcome = commands::record(&config, shutdown)
                .await
                .context("recording failed")?;
            println!("{}", outcome.path.display());
        }

        Command::Replay {
            endpoint,
            input,
            speed_ms,
            captions,
            pause_file,
            step_file,
            stop_file,
            progress_file,
            poll_ms,
            call_timeout_ms,
        } => {
            let control = ControlPaths {
                pause: pause_file,
                step: step_file,
                stop: stop_file,
                progress: progress_file,
            };
            let config = ReplayConfig::builder()
                .connection(ConnectionConfig::builder().endpoint(endpoint).build())
                .input(input)
                .speed_ms(speed_ms)
                .captions_json(&captions)
                .control(control)
                .poll_interval_ms(poll_ms)
                .call_timeout_ms(call_timeout_ms)
                .build();

            let report = commands::replay(&config)
                .await
                .with_context(|| format!("replay of {} failed", config.input.display()))?;

            let progress = report.final_progress();
            match &report.outcome {
                ReplayOutcome::Completed => println!("completed {}/{}", progress.index, progress.total),
                ReplayOutcome::Aborted { .. } => println!("stopped {}/{}", progress.index, progress.total),
                ReplayOutcome::Failed { reason, .. } => {
                    println!("failed {}/{}: {}", progress.index, progress.total, reason)
                }
            }
        }

        Command::Ctl { action, dir } => {
            let paths = match dir {
                Some(dir) => ControlPaths::in_dir(dir),
                None => ControlPaths::temp(),
            };
            let status = commands::control(paths, action.into()).context("control signal failed")?;

            println!("paused: {}", status.paused);
            println!("stop pending: {}", status.stop_pending);
            println!("step pending: {}", status.step_pending);
            match status.progress {
                Some(p) => println!("progress: {}/{} ({:.0}%)", p.index, p.total, p.percent()),
                None => println!("progress: -"),
            }
        }

        Command::Inspect { input } => {
            let inspection = commands::inspect(&input)
                .with_context(|| format!("cannot read {}", input.display()))?;
            let summary = &inspection.summary;

            println!("session: {}", summary.session_id.as_deref().unwrap_or("-"));
            println!("events: {}", summary.total);
            let mut counts: Vec<_> = summary.by_type.iter().collect();
            counts.sort_by_key(|(t, _)| format!("{:?}", t));
            for (event_type, count) in counts {
                println!("  {:?}: {}", event_type, count);
            }
            if let (Some(start), Some(end)) = (summary.start, summary.end) {
                println!("span: {} .. {}", start.to_rfc3339(), end.to_rfc3339());
            }
            if let Some((url, title)) = inspection.last_location {
                println!("last url: {}", url);
                println!("last title: {}", title.as_deref().unwrap_or("-"));
            }
        }

        Command::Align {
            dom_log,
            narrations,
        } => {
            let captions = commands::align(&dom_log, &narrations).context("alignment failed")?;
            println!("{}", serde_json::to_string(&captions)?);
        }
    }

    Ok(())
}
