//! Replays a JSON script of operation calls against an in-memory runtime.
//!
//! The script is an array of `{"operation": ..., "args": {...}, "class": ...}`
//! steps. The session id returned by each call is carried into the next one,
//! and every result is printed as one JSON line on stdout.

use std::io::{self, IsTerminal};
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use dsgate_core::{RequestContext, SessionId, ValueMap};
use dsgate_server::service::{OperationClass, ServerConfig};
use dsgate_server::Runtime;
use serde::Deserialize;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "dsgate-replay", version, about = "Replay operation scripts against dsgate")]
struct Cli {
    /// JSON file holding the array of steps to replay.
    #[arg(long)]
    script: PathBuf,

    /// Optional server configuration file (JSON).
    #[arg(long, env = "DSGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Log output format on stderr.
    #[arg(long, value_enum, default_value = "text")]
    log_format: LogFormat,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Step {
    operation: String,
    #[serde(default)]
    args: ValueMap,
    #[serde(default)]
    class: Option<StepClass>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
enum StepClass {
    Query,
    Mutation,
}

impl From<StepClass> for OperationClass {
    fn from(class: StepClass) -> Self {
        match class {
            StepClass::Query => OperationClass::Query,
            StepClass::Mutation => OperationClass::Mutation,
        }
    }
}

fn init_tracing(format: LogFormat) {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal());

    match format {
        LogFormat::Text => builder.compact().init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let config = match &cli.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };
    let raw = tokio::fs::read_to_string(&cli.script)
        .await
        .with_context(|| format!("failed to read script {}", cli.script.display()))?;
    let steps: Vec<Step> = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse script {}", cli.script.display()))?;

    let mut runtime = Runtime::in_memory(config)?;
    runtime.start();

    let mut session: Option<SessionId> = None;
    for (index, step) in steps.into_iter().enumerate() {
        let mut ctx = RequestContext::new(format!("replay-{index}"));
        ctx.session_id.clone_from(&session);

        let result = match step.class {
            Some(class) => {
                runtime
                    .execute_in(class.into(), &step.operation, step.args, ctx)
                    .await
            }
            None => runtime.execute(&step.operation, step.args, ctx).await,
        };

        let line = match result {
            Ok(response) => {
                if response.session_id.is_some() {
                    session.clone_from(&response.session_id);
                }
                serde_json::json!({ "ok": response })
            }
            Err(err) => serde_json::json!({ "error": err }),
        };
        println!("{line}");
    }

    runtime.shutdown().await;
    Ok(())
}
