use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use push_core::{
    main_thread, CallVerifier, Dispatched, Dispatcher, UiBridge, VerificationStrategy,
};
use shared::domain::InboundMessage;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use verification_channel::DdpConnector;

mod config;
mod sink;

use config::{load_settings, Settings, StrategyKind};
use sink::JsonLinesSink;

/// Reads push messages (one JSON object per line) and writes the resulting
/// host actions as JSON lines.
#[derive(Parser, Debug)]
struct Args {
    #[arg(long)]
    config: Option<PathBuf>,
    /// `local` or `remote`; overrides the config file.
    #[arg(long)]
    strategy: Option<StrategyKind>,
    #[arg(long)]
    verification_url: Option<String>,
    /// Handle this single message instead of reading stdin.
    #[arg(long)]
    message: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut settings = load_settings(args.config.as_deref())?;
    if let Some(strategy) = args.strategy {
        settings.strategy = strategy;
    }
    if let Some(url) = args.verification_url {
        settings.verification_url = Some(url);
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.log_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let verifier = build_verifier(&settings)?;
    info!(strategy = ?verifier.strategy(), "relay: starting");

    let (executor, ui_queue) = main_thread();
    let sink = Arc::new(JsonLinesSink::new(std::io::stdout()));
    let dispatcher = Arc::new(Dispatcher::new(
        verifier,
        UiBridge::new(sink, Arc::new(executor)),
    ));

    let intake = tokio::spawn(relay_messages(dispatcher, args.message));
    // Host actions run here, on the main task, until the last dispatcher is gone.
    ui_queue.run().await;

    intake.await.context("message intake task panicked")?
}

fn build_verifier(settings: &Settings) -> Result<CallVerifier> {
    let strategy = match settings.strategy {
        StrategyKind::Local => VerificationStrategy::LocalClock {
            window: Duration::from_millis(settings.validity_window_ms),
        },
        StrategyKind::Remote => {
            let url = settings
                .verification_url
                .as_deref()
                .ok_or_else(|| anyhow!("remote verification needs a verification_url"))?;
            let connector = DdpConnector::new(url)?;
            VerificationStrategy::Remote {
                connector: Arc::new(connector),
                timeout: Duration::from_millis(settings.remote_timeout_ms),
            }
        }
    };
    Ok(CallVerifier::new(strategy))
}

fn parse_message(raw: &str) -> Result<InboundMessage> {
    serde_json::from_str(raw).context("push message must be a JSON object of string values")
}

async fn relay_messages(dispatcher: Arc<Dispatcher>, single: Option<String>) -> Result<()> {
    let mut pending = Vec::new();

    if let Some(raw) = single {
        pending.push(dispatcher.spawn(parse_message(&raw)?));
    } else {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
            if line.trim().is_empty() {
                continue;
            }
            match parse_message(&line) {
                Ok(message) => pending.push(dispatcher.spawn(message)),
                Err(err) => warn!(error = %format!("{err:#}"), "relay: skipping line"),
            }
        }
    }
    drop(dispatcher);

    for handle in pending {
        match handle.await {
            Ok(dispatched) => log_dispatched(&dispatched),
            Err(err) => error!(%err, "relay: dispatch task failed"),
        }
    }
    Ok(())
}

fn log_dispatched(dispatched: &Dispatched) {
    match dispatched {
        Dispatched::Call(outcome) => info!(outcome = outcome.label(), "relay: call handled"),
        Dispatched::CallRejected(err) => info!(kind = err.kind(), "relay: call rejected"),
        other => info!(result = ?other, "relay: message handled"),
    }
}
