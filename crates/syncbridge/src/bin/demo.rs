//! Wire one channel to one agent thread and make a blocking call.
//!
//! Usage: syncbridge-demo [<a> <b>]   (adds two integers, default 2 + 2)

use std::process;

use anyhow::{Context, bail};
use serde_json::{Value, json};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use syncbridge::{AgentConfig, Channel, ChannelConfig, JobError, Registry, spawn_agent};

/// Initialize tracing with SYNCBRIDGE_LOG and LOG_FORMAT support.
fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match std::env::var("SYNCBRIDGE_LOG").as_deref() {
            Ok("trace") => "trace",
            Ok("debug") => "debug",
            Ok("warn") | Ok("warning") => "warn",
            Ok("error") => "error",
            _ => "info",
        };
        EnvFilter::new(format!("syncbridge={level},syncbridge_demo={level}"))
    };

    let use_json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    if use_json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    }
}

fn add(args: Vec<Value>) -> Result<Value, JobError> {
    let [a, b] = args.as_slice() else {
        return Err(JobError::invalid_args(format!("add takes 2 arguments, got {}", args.len())));
    };
    match (a.as_i64(), b.as_i64()) {
        (Some(a), Some(b)) => a
            .checked_add(b)
            .map(|sum| json!(sum))
            .ok_or_else(|| JobError::failed("integer overflow")),
        _ => Err(JobError::invalid_args("add takes integers")),
    }
}

fn parse_args(args: &[String]) -> anyhow::Result<(i64, i64)> {
    match args {
        [] => Ok((2, 2)),
        [a, b] => {
            let a = a.parse::<i64>().with_context(|| format!("not an integer: {a}"))?;
            let b = b.parse::<i64>().with_context(|| format!("not an integer: {b}"))?;
            Ok((a, b))
        }
        _ => bail!("expected zero or two integers"),
    }
}

fn run(a: i64, b: i64) -> anyhow::Result<Value> {
    let channel = Channel::new(ChannelConfig::default()).context("failed to create channel")?;
    let registry = Registry::new().with("add", add);
    let agent = spawn_agent(channel.mailbox(), registry, AgentConfig::default())
        .context("failed to start agent thread")?;

    let result = channel.call("add", (a, b)).context("call failed")?;
    agent.shutdown();
    Ok(result)
}

fn main() {
    init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (a, b) = match parse_args(&args) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("error: {e}");
            eprintln!();
            eprintln!("Usage: syncbridge-demo [<a> <b>]");
            process::exit(2);
        }
    };

    match run(a, b) {
        Ok(result) => println!("{result}"),
        Err(e) => {
            eprintln!("error: {e:#}");
            process::exit(1);
        }
    }
}
