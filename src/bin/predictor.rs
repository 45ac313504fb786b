/// Runs only the Predictor, split out for deployments that run the
/// CPU-bound training/inference loop on a dedicated host, separate from
/// the Ingestor and API Service.
use candle_forecast::bus::EventBus;
use candle_forecast::config::AppConfig;
use candle_forecast::predictor;
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

    predictor::run(config, storage, bus, cancel).await;
    ExitCode::SUCCESS
}
