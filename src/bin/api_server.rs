/// Runs only the API Service (HTTP + WebSocket), split out for
/// deployments where the query surface scales independently of ingestion
/// and prediction. In this split-process mode the `sync_complete` events
/// it broadcasts originate only from its own in-process `POST /api/sync`
/// calls, not from a separately-running Ingestor — multi-host fan-out
/// would need an external pub/sub in place of the in-process channel,
/// which is out of scope here.
use candle_forecast::api;
use candle_forecast::bus::EventBus;
use candle_forecast::config::AppConfig;
use candle_forecast::storage::Storage;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::error;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Arc::new(AppConfig::load());
    let storage = match Storage::open(&config.db_path) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!(error = %e, "fatal: could not open storage");
            return ExitCode::FAILURE;
        }
    };
    let bus = EventBus::new();
    let cancel = CancellationToken::new();
    let cancel_for_signal = cancel.clone();

    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        cancel_for_signal.cancel();
    });

    match api::run(config, storage, bus, cancel).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "api service exited with error");
            ExitCode::FAILURE
        }
    }
}
