/// Runs only the Ingestor, for deployments that split the three
/// long-lived components across processes; the single-component
/// equivalent of `server`'s combined run.
use candle_forecast::bus::EventBus;
use candle_forecast::config::AppConfig;
use candle_forecast::ingestor;
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

    ingestor::run(config, storage, bus, cancel).await;
    ExitCode::SUCCESS
}
