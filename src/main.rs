//! Scripted MQTT client: runs a command-script file against a broker.
//!
//! # Exit Codes
//!
//! | Code | Meaning |
//! |------|---------|
//! | 0 | Success, including shutdown via SIGINT/SIGTERM |
//! | 1 | Usage error or unreadable script file |
//! | 2 | Script parse error |
//! | 3 | Broker connection error |
//! | 4 | Runtime execution error |

pub mod engine;
pub mod logsink;
pub mod mqtt;
pub mod script;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use color_eyre::Result;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, Level};
use tracing_subscriber::FmtSubscriber;

use engine::error::EngineError;
use engine::scheduler::Engine;
use logsink::LogSink;
use mqtt::session::RumqttBroker;

const APP_NAME: &str = env!("CARGO_PKG_NAME");
const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Exit code for success, including the documented interrupt path
const EXIT_SUCCESS: u8 = 0;
/// Exit code for usage errors and an unreadable script file
const EXIT_USAGE: u8 = 1;
/// Exit code for script parse errors
const EXIT_PARSE_ERROR: u8 = 2;
/// Exit code for broker connection errors
const EXIT_CONNECT_ERROR: u8 = 3;
/// Exit code for runtime execution errors
const EXIT_RUNTIME_ERROR: u8 = 4;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(e) = setup() {
        eprintln!("startup failed: {e}");
        return ExitCode::from(EXIT_USAGE);
    }

    let path = match parse_args(std::env::args().skip(1)) {
        CliAction::Run(path) => path,
        CliAction::Exit(code) => return ExitCode::from(code),
    };

    let text = match std::fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) => {
            error!("cannot read script {}: {e}", path.display());
            return ExitCode::from(EXIT_USAGE);
        }
    };

    // Fail fast: the whole script must parse before anything executes.
    let commands = match script::parser::parse(&text) {
        Ok(commands) => commands,
        Err(e) => {
            error!("invalid script: {e}");
            return ExitCode::from(EXIT_PARSE_ERROR);
        }
    };
    info!("parsed {} commands from {}", commands.len(), path.display());

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    let sink = Arc::new(LogSink::new());
    let mut engine = Engine::new(RumqttBroker, sink, shutdown);
    let result = engine.run(&commands).await;
    debug!(state = ?engine.state(), "engine finished");
    match result {
        Ok(()) => {
            info!("script run complete");
            ExitCode::from(EXIT_SUCCESS)
        }
        Err(e) => {
            error!("{e}");
            ExitCode::from(error_to_exit_code(&e))
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum CliAction {
    Run(PathBuf),
    Exit(u8),
}

fn parse_args(args: impl Iterator<Item = String>) -> CliAction {
    let mut script: Option<PathBuf> = None;
    for arg in args {
        match arg.as_str() {
            "-h" | "--help" => {
                print_usage();
                return CliAction::Exit(EXIT_SUCCESS);
            }
            "-v" | "--version" => {
                println!("{APP_NAME} {APP_VERSION}");
                return CliAction::Exit(EXIT_SUCCESS);
            }
            _ if script.is_none() => script = Some(PathBuf::from(arg)),
            other => {
                eprintln!("unexpected argument: {other}");
                return CliAction::Exit(EXIT_USAGE);
            }
        }
    }
    match script {
        Some(path) => CliAction::Run(path),
        None => {
            print_usage();
            CliAction::Exit(EXIT_USAGE)
        }
    }
}

fn print_usage() {
    println!("{APP_NAME} {APP_VERSION} - scripted MQTT client");
    println!();
    println!("Usage: {APP_NAME} <script-file>");
    println!();
    println!("The script file holds one command per line (CONNECT, PUB, SUB,");
    println!("DELAY, CFG_*, ...); see the demos/ directory for examples.");
    println!("Logs go to stderr; RUST_LOG sets the level.");
}

fn error_to_exit_code(error: &EngineError) -> u8 {
    match error {
        EngineError::Connect(_) => EXIT_CONNECT_ERROR,
        EngineError::ConfigAfterConnect(_)
        | EngineError::NotConnected(_)
        | EngineError::AlreadyConnected => EXIT_RUNTIME_ERROR,
    }
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    setup_logging();
    Ok(())
}

fn setup_logging() {
    let level = std::env::var("RUST_LOG")
        .ok()
        .and_then(|v| v.parse::<Level>().ok())
        .unwrap_or(Level::INFO);
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// SIGINT/SIGTERM trigger the orderly shutdown path instead of killing
/// the process outright.
fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!("signal handler setup failed: {e}");
            return;
        }
        shutdown.cancel();
    });
}

async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = sigint.recv() => info!("received SIGINT, shutting down"),
            _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("received Ctrl+C, shutting down");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> impl Iterator<Item = String> {
        list.iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .into_iter()
    }

    #[test]
    fn single_positional_argument_is_the_script_path() {
        assert_eq!(
            parse_args(args(&["run.script"])),
            CliAction::Run(PathBuf::from("run.script"))
        );
    }

    #[test]
    fn missing_argument_is_a_usage_error() {
        assert_eq!(parse_args(args(&[])), CliAction::Exit(EXIT_USAGE));
    }

    #[test]
    fn surplus_arguments_are_a_usage_error() {
        assert_eq!(
            parse_args(args(&["a.script", "b.script"])),
            CliAction::Exit(EXIT_USAGE)
        );
    }

    #[test]
    fn help_and_version_exit_successfully() {
        assert_eq!(parse_args(args(&["--help"])), CliAction::Exit(EXIT_SUCCESS));
        assert_eq!(
            parse_args(args(&["--version"])),
            CliAction::Exit(EXIT_SUCCESS)
        );
    }

    #[test]
    fn fatal_errors_map_to_documented_exit_codes() {
        use crate::mqtt::session::SessionError;

        assert_eq!(
            error_to_exit_code(&EngineError::Connect(SessionError::Connect("x".into()))),
            EXIT_CONNECT_ERROR
        );
        assert_eq!(
            error_to_exit_code(&EngineError::ConfigAfterConnect("CFG_KEEPALIVE")),
            EXIT_RUNTIME_ERROR
        );
        assert_eq!(
            error_to_exit_code(&EngineError::NotConnected("PUB")),
            EXIT_RUNTIME_ERROR
        );
        assert_eq!(
            error_to_exit_code(&EngineError::AlreadyConnected),
            EXIT_RUNTIME_ERROR
        );
    }
}
