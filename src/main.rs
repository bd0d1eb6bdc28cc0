use std::{path::PathBuf, process::ExitCode};

use clap::Parser;
use remsync::{
    config::{read_config, Mode},
    services::sync::run,
};
use tracing_subscriber::EnvFilter;

/// Synchronizes a local directory with one reachable over a remote shell.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Sync definition to run.
    #[arg(short, long, env = "REMSYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Overrides the mode of the definition.
    #[arg(long, value_enum)]
    mode: Option<Mode>,

    /// Same as `--mode list`.
    #[arg(long, conflicts_with = "mode")]
    dry_run: bool,

    /// More logs on stderr. Repeat for more.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn log_filter(verbose: u8) -> EnvFilter {
    let fallback = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };

    std::env::var("RUST_LOG")
        .ok()
        .and_then(|level| EnvFilter::try_new(level).ok())
        .unwrap_or_else(|| EnvFilter::new(fallback))
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(log_filter(cli.verbose))
        .with_writer(std::io::stderr)
        .init();

    let mode = if cli.dry_run { Some(Mode::List) } else { cli.mode };

    let outcome = match read_config(cli.config) {
        Ok(config) => run(&config, mode).await,
        Err(err) => Err(err),
    };

    match outcome {
        Ok(outcome) if outcome.is_success() => ExitCode::SUCCESS,
        Ok(_) => ExitCode::from(1),
        Err(err) => {
            eprintln!("[!] {err:#}");
            ExitCode::from(2)
        }
    }
}
