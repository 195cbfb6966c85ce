use std::error::Error;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use agproxy_core::{
    ForwardError, ForwardOutcome, Forwarder, UpstreamClientConfig, WreqUpstreamClient, WriterSink,
};

mod bootstrap;
mod cli;
mod collab;

use crate::bootstrap::bootstrap;
use crate::cli::Cli;
use crate::collab::{CredentialTokenProvider, LoggingRateLimitNotifier};

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(err) = run().await {
        eprintln!("agproxy failed: {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn Error + Send + Sync>> {
    let cli = Cli::parse();
    let boot = bootstrap(&cli).await?;
    info!(
        base_url = %boot.config.base_url,
        account = %boot.account.name,
        max_attempts = boot.config.max_attempts,
        proxy = %boot.account.proxy().unwrap_or(""),
        "config loaded"
    );

    let client = WreqUpstreamClient::new(UpstreamClientConfig::from_forward(&boot.config))?;
    let forwarder = Forwarder::new(
        boot.config,
        Arc::new(client),
        Arc::new(CredentialTokenProvider),
        Arc::new(LoggingRateLimitNotifier),
    );

    let mut sink = WriterSink::new(tokio::io::stdout());
    let result = match (cli.gemini_model.as_deref(), cli.gemini_action.as_deref()) {
        (Some(model), Some(action)) => {
            forwarder
                .forward_gemini(&boot.account, model, action, cli.stream, &boot.body, &mut sink)
                .await
        }
        _ => forwarder.forward(&boot.account, &boot.body, &mut sink).await,
    };

    match result {
        Ok(outcome) => {
            log_outcome(&outcome);
            Ok(())
        }
        Err(err) => {
            if let Some(partial) = err.partial_outcome() {
                log_outcome(partial);
            }
            report_error(&err, sink.status());
            Err(err.into())
        }
    }
}

fn log_outcome(outcome: &ForwardOutcome) {
    info!(
        event = "forward_done",
        model = %outcome.model,
        request_id = %outcome.request_id,
        stream = outcome.stream,
        input_tokens = outcome.usage.input_tokens,
        output_tokens = outcome.usage.output_tokens,
        cache_read_input_tokens = outcome.usage.cache_read_input_tokens,
        duration_ms = outcome.duration.as_millis(),
        first_token_ms = outcome.first_token_ms.unwrap_or(0)
    );
}

fn report_error(err: &ForwardError, status: Option<u16>) {
    if err.is_failover() {
        warn!(error = %err, "account should be rotated; no other account configured");
    } else if err.response_written() {
        warn!(error = %err, status = status.unwrap_or(0), "error response written");
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("agproxy=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
