use std::process::ExitCode;

mod cli;
use cli::{CliMode, USAGE, format_summary, parse_cli_mode, run_batch_mode};

use calsub::storage::config::Config;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    setup_logging();

    let args = match parse_cli_mode() {
        Ok(CliMode::Help) => {
            println!("{USAGE}");
            return ExitCode::SUCCESS;
        }
        Ok(CliMode::Batch(args)) => args,
        Err(err) => {
            eprintln!("Error: {}", err);
            println!("{USAGE}");
            return ExitCode::from(2);
        }
    };

    match run_batch_mode(args).await {
        Ok(result) => {
            println!("{}", format_summary(&result));
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            tracing::error!("Batch aborted before processing any user: {:#}", e);
            ExitCode::from(1)
        }
    }
}

fn setup_logging() {
    let log_dir = Config::config_dir();

    std::fs::create_dir_all(&log_dir).ok();

    let file_appender = tracing_appender::rolling::daily(log_dir, "calsub.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(false)
        .init();

    std::mem::forget(_guard);

    tracing::info!("calsub started");
}
