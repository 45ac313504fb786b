/// Combined entrypoint: runs the Ingestor, Predictor, and API Service as
/// three cooperating long-lived tasks against one shared `Storage`, all
/// under one root `CancellationToken` for coordinated shutdown.
use candle_forecast::bus::EventBus;
use candle_forecast::config::AppConfig;
use candle_forecast::storage::Storage;
use candle_forecast::{api, ingestor, predictor};
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

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

    info!(symbols = ?config.tracked_symbols(), "starting candle-forecast");

    let ingestor_handle = tokio::spawn(ingestor::run(
        Arc::clone(&config),
        Arc::clone(&storage),
        bus.clone(),
        cancel.clone(),
    ));
    let predictor_handle = tokio::spawn(predictor::run(
        Arc::clone(&config),
        Arc::clone(&storage),
        bus.clone(),
        cancel.clone(),
    ));
    let api_handle = tokio::spawn(api::run(
        Arc::clone(&config),
        Arc::clone(&storage),
        bus.clone(),
        cancel.clone(),
    ));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }
    cancel.cancel();

    let _ = ingestor_handle.await;
    let _ = predictor_handle.await;
    match api_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "api service exited with error"),
        Err(e) => error!(error = %e, "api service task panicked"),
    }

    ExitCode::SUCCESS
}
