use std::{env, path::PathBuf, time::Duration};

use anyhow::{Context, bail};

use calsub::{
    storage::config::Config,
    storage::user_list::{self, ResultFileOptions},
    subscription::{BatchMode, BatchOrchestrator, BatchResult, CredentialTemplate, ImpersonatedSessionFactory},
};

pub const USAGE: &str = "Usage: calsub <subscribe|unsubscribe> --calendar <ID> (--users <CSV> | --user <ID>...)
       [--config <PATH>] [--key <PATH>] [--concurrency <N>] [--timeout <SECS>]
       [--output-dir <DIR>] [--success-name <NAME>] [--failure-name <NAME>]
       [--no-success-file] [--no-failure-file]";

#[derive(Debug, Clone, PartialEq)]
pub enum CliMode {
    Help,
    Batch(BatchArgs),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BatchArgs {
    pub mode: Option<BatchMode>,
    pub calendar_id: String,
    pub users_file: Option<PathBuf>,
    pub users: Vec<String>,
    pub config_path: Option<PathBuf>,
    pub key_path: Option<PathBuf>,
    pub concurrency: Option<usize>,
    pub timeout_seconds: Option<u64>,
    pub output_dir: Option<PathBuf>,
    pub success_name: Option<String>,
    pub failure_name: Option<String>,
    pub no_success_file: bool,
    pub no_failure_file: bool,
}

pub fn parse_cli_mode() -> Result<CliMode, String> {
    parse_args(env::args().skip(1))
}

fn parse_args<I: IntoIterator<Item = String>>(args: I) -> Result<CliMode, String> {
    let mut parsed = BatchArgs::default();
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        let mut value = |name: &str| {
            args.next()
                .filter(|v| !v.starts_with("--"))
                .ok_or_else(|| format!("Missing value for {}", name))
        };

        match arg.as_str() {
            "--help" | "-h" => return Ok(CliMode::Help),
            "subscribe" if parsed.mode.is_none() => parsed.mode = Some(BatchMode::Subscribe),
            "unsubscribe" if parsed.mode.is_none() => parsed.mode = Some(BatchMode::Unsubscribe),
            "--calendar" => parsed.calendar_id = value("--calendar")?,
            "--users" => parsed.users_file = Some(PathBuf::from(value("--users")?)),
            "--user" => parsed.users.push(value("--user")?),
            "--config" => parsed.config_path = Some(PathBuf::from(value("--config")?)),
            "--key" => parsed.key_path = Some(PathBuf::from(value("--key")?)),
            "--concurrency" => {
                let raw = value("--concurrency")?;
                let n = raw
                    .parse::<usize>()
                    .ok()
                    .filter(|n| *n > 0)
                    .ok_or_else(|| format!("Invalid concurrency '{}'. Use a positive integer.", raw))?;
                parsed.concurrency = Some(n);
            }
            "--timeout" => {
                let raw = value("--timeout")?;
                let secs = raw
                    .parse::<u64>()
                    .map_err(|_| format!("Invalid timeout '{}'. Use whole seconds.", raw))?;
                parsed.timeout_seconds = Some(secs);
            }
            "--output-dir" => parsed.output_dir = Some(PathBuf::from(value("--output-dir")?)),
            "--success-name" => parsed.success_name = Some(value("--success-name")?),
            "--failure-name" => parsed.failure_name = Some(value("--failure-name")?),
            "--no-success-file" => parsed.no_success_file = true,
            "--no-failure-file" => parsed.no_failure_file = true,
            _ => return Err(format!("Unknown argument: {}", arg)),
        }
    }

    if parsed.mode.is_none() {
        return Err("Missing command: subscribe or unsubscribe".to_string());
    }
    if parsed.calendar_id.trim().is_empty() {
        return Err("Missing --calendar <ID>".to_string());
    }
    if parsed.users_file.is_some() == !parsed.users.is_empty() {
        return Err("Give either --users <CSV> or one or more --user <ID>".to_string());
    }

    Ok(CliMode::Batch(parsed))
}

/// Loads config and credentials, then runs the batch. Any error returned here
/// happened before a single user was touched.
pub async fn run_batch_mode(args: BatchArgs) -> anyhow::Result<BatchResult> {
    let Some(mode) = args.mode else {
        bail!("Missing command: subscribe or unsubscribe");
    };

    let config = match &args.config_path {
        Some(path) => Config::load_or_create_at(path),
        None => Config::load_or_create(),
    }
    .context("Failed to load configuration")?;

    let key_path = args
        .key_path
        .clone()
        .unwrap_or_else(|| config.credentials.service_account_key.clone());
    let template = CredentialTemplate::from_key_file(&key_path, &config.credentials.scopes)
        .await
        .with_context(|| format!("Unusable service account key at {}", key_path.display()))?;

    let users = match &args.users_file {
        Some(path) => user_list::read_user_list(path)
            .with_context(|| format!("Failed to read user list {}", path.display()))?,
        None => args.users.clone(),
    };

    let factory = ImpersonatedSessionFactory::new(&template).with_base_url(config.api.base_url.clone());
    let mut orchestrator = BatchOrchestrator::new(factory)
        .with_concurrency(args.concurrency.unwrap_or(config.batch.concurrency));
    let timeout = match args.timeout_seconds {
        Some(0) => None,
        Some(secs) => Some(Duration::from_secs(secs)),
        None => config.user_timeout(),
    };
    if let Some(timeout) = timeout {
        orchestrator = orchestrator.with_user_timeout(timeout);
    }

    let result = orchestrator.run_batch(&args.calendar_id, &users, mode).await;

    let options = ResultFileOptions {
        directory: args.output_dir.clone().unwrap_or_else(|| config.output.directory.clone()),
        write_successes: config.output.write_successes && !args.no_success_file,
        success_name: args.success_name.clone(),
        write_failures: config.output.write_failures && !args.no_failure_file,
        failure_name: args.failure_name.clone(),
    };
    // The batch already ran; a failed write should not hide its result.
    match user_list::write_batch_result(&result, &options) {
        Ok(paths) => {
            for path in paths {
                println!("Wrote {}", path.display());
            }
        }
        Err(e) => {
            eprintln!("Failed to write result files: {}", e);
            tracing::error!("Failed to write result files: {}", e);
        }
    }

    Ok(result)
}

pub fn format_summary(result: &BatchResult) -> String {
    let mut lines = vec![format!(
        "{} {}: {} succeeded, {} failed in {:.1}s",
        result.mode,
        result.calendar_id,
        result.successes().len(),
        result.failed_users().len(),
        result.duration().num_milliseconds() as f64 / 1000.0
    )];

    for failed in result.failed_users() {
        lines.push(format!("  x {} ({})", failed.user, failed.reason));
    }

    lines.join("\n")
}
