//! slowfsctl - Change slowfs delays while it is mounted
//!
//! Usage:
//!   slowfsctl get                             # Whole delay table
//!   slowfsctl get read                        # One category
//!   slowfsctl set read --delay 0.2            # Fixed 200ms reads
//!   slowfsctl set fsync --min 1 --max 3       # Random 1-3s fsyncs
//!   slowfsctl set write --probability 0.1 --error ENOSPC
//!   slowfsctl load profile.json               # Replace the table
//!   slowfsctl reset | enable | disable | status

use anyhow::{Context, Result, bail};
use clap::{Args as ClapArgs, Parser, Subcommand};
use reqwest::{Client, RequestBuilder};
use serde_json::Value;
use slowfs::{ConfigTable, DelayModel, ErrorCode, OperationCategory};
use std::path::PathBuf;

/// slowfsctl - Control a running slowfs
#[derive(Parser, Debug)]
#[command(name = "slowfsctl")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Base URL of the slowfs control API
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the delay table, or one category
    Get { category: Option<OperationCategory> },
    /// Change one category; unspecified fields keep their current value
    Set(SetArgs),
    /// Replace the whole table from a JSON file
    Load { file: PathBuf },
    /// Reset every category to no delay
    Reset,
    /// Resume injecting delays and faults
    Enable,
    /// Pass everything through without discarding the table
    Disable,
    /// Show whether injection is enabled
    Status,
}

#[derive(ClapArgs, Debug)]
struct SetArgs {
    category: OperationCategory,

    /// Minimum delay in seconds
    #[arg(long, conflicts_with = "delay")]
    min: Option<f64>,

    /// Maximum delay in seconds
    #[arg(long, conflicts_with = "delay")]
    max: Option<f64>,

    /// Fixed delay in seconds (sets both bounds)
    #[arg(long)]
    delay: Option<f64>,

    /// Failure probability in [0, 1]
    #[arg(long)]
    probability: Option<f64>,

    /// Error returned on injected failure (e.g. EIO, ENOSPC)
    #[arg(long)]
    error: Option<ErrorCode>,
}

impl SetArgs {
    fn apply(&self, mut model: DelayModel) -> DelayModel {
        if let Some(delay) = self.delay {
            model.min_delay_seconds = delay;
            model.max_delay_seconds = delay;
        }
        if let Some(min) = self.min {
            model.min_delay_seconds = min;
        }
        if let Some(max) = self.max {
            model.max_delay_seconds = max;
        }
        if let Some(probability) = self.probability {
            model.failure_probability = probability;
        }
        if let Some(error) = self.error {
            model.failure_error_code = Some(error);
        }
        model
    }
}

/// Send a request and decode the JSON answer, turning API errors into
/// `anyhow` errors carrying the server's description.
async fn send(request: RequestBuilder) -> Result<Value> {
    let response = request
        .send()
        .await
        .context("Failed to reach slowfs control API")?;
    let status = response.status();
    let body: Value = response
        .json()
        .await
        .with_context(|| format!("Malformed response ({status})"))?;
    if !status.is_success() {
        let message = body
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        bail!("{status}: {message}");
    }
    Ok(body)
}

async fn run(args: Args) -> Result<Value> {
    let client = Client::new();
    let base = args.url.trim_end_matches('/');
    let url = |path: &str| format!("{base}{path}");

    match args.command {
        Command::Get { category: None } => send(client.get(url("/config"))).await,
        Command::Get {
            category: Some(category),
        } => send(client.get(url(&format!("/config/{category}")))).await,
        Command::Set(set) => {
            let path = url(&format!("/config/{}", set.category));
            let current: DelayModel = serde_json::from_value(send(client.get(&path)).await?)
                .context("Malformed delay model from server")?;
            let model = set.apply(current);
            send(client.put(&path).json(&model)).await
        }
        Command::Load { file } => {
            let json = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            // Validate locally first for a better error location.
            let table = ConfigTable::from_json(&json)
                .with_context(|| format!("Invalid config: {}", file.display()))?;
            send(client.put(url("/config")).json(&table)).await
        }
        Command::Reset => send(client.delete(url("/config"))).await,
        Command::Enable => send(client.post(url("/enable"))).await,
        Command::Disable => send(client.post(url("/disable"))).await,
        Command::Status => send(client.get(url("/status"))).await,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let body = run(args).await?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn set(args: &[&str]) -> SetArgs {
        let mut argv = vec!["slowfsctl", "set"];
        argv.extend_from_slice(args);
        match Args::try_parse_from(argv).unwrap().command {
            Command::Set(set) => set,
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_fixed_delay_sets_both_bounds() {
        let model = set(&["read", "--delay", "0.2"]).apply(DelayModel::range(1.0, 2.0));
        assert_eq!(model, DelayModel::fixed(0.2));
    }

    #[test]
    fn test_unspecified_fields_are_kept() {
        let current = DelayModel::range(0.1, 0.5).with_failure(0.3, ErrorCode::Io);
        let model = set(&["write", "--max", "0.9"]).apply(current);
        assert_eq!(model.min_delay_seconds, 0.1);
        assert_eq!(model.max_delay_seconds, 0.9);
        assert_eq!(model.failure_probability, 0.3);
        assert_eq!(model.failure_error_code, Some(ErrorCode::Io));
    }

    #[test]
    fn test_failure_flags() {
        let args = set(&["unlink", "--probability", "1", "--error", "EROFS"]);
        assert_eq!(args.category, OperationCategory::Unlink);
        let model = args.apply(DelayModel::new());
        assert_eq!(model, DelayModel::new().with_failure(1.0, ErrorCode::ReadOnly));
    }

    #[test]
    fn test_delay_conflicts_with_bounds() {
        let result = Args::try_parse_from(["slowfsctl", "set", "read", "--delay", "1", "--min", "0"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_category_is_rejected() {
        assert!(Args::try_parse_from(["slowfsctl", "get", "frobnicate"]).is_err());
    }
}
