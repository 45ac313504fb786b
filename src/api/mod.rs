/// HTTP + WebSocket surface: an actix-web `App` builder with permissive
/// CORS, a `moka` response cache in front of range queries, and an
/// `actix-web-actors` session per WebSocket client.
mod broker;
mod handlers;
mod ws;

pub use broker::Broker;

use crate::bus::EventBus;
use crate::config::AppConfig;
use crate::storage::Storage;
use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use binance::api::Binance;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub struct AppState {
    pub storage: Arc<Storage>,
    pub config: Arc<AppConfig>,
    pub bus: EventBus,
    pub broker: Arc<Broker>,
    pub market: Arc<binance::market::Market>,
    pub candles_cache: Cache<CacheKey, Arc<Vec<crate::types::Candle>>>,
}

#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct CacheKey {
    pub symbol: String,
    pub start: Option<i64>,
    pub end: Option<i64>,
    pub limit: Option<i64>,
}

/// Registers the service surface on an `actix_web::App`. Split out from
/// `run()` so integration tests can build the same app over
/// `actix_web::test::init_service` without standing up a real listener.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(handlers::health)
        .service(handlers::list_symbols)
        .service(handlers::sync_symbol)
        .service(handlers::get_candles)
        .service(handlers::get_predictions)
        .service(handlers::get_stats)
        .route("/ws/updates", web::get().to(ws::ws_updates));
}

pub async fn run(
    config: Arc<AppConfig>,
    storage: Arc<Storage>,
    bus: EventBus,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    let broker = Arc::new(Broker::new(config.ws_queue_capacity));
    broker.spawn_bus_listener(bus.subscribe());

    let candles_cache = Cache::builder()
        .max_capacity(1000)
        .time_to_live(Duration::from_secs(30))
        .build();

    let market: Arc<binance::market::Market> = Arc::new(Binance::new(None, None));

    let state = web::Data::new(AppState {
        storage,
        config: Arc::clone(&config),
        bus,
        broker,
        market,
        candles_cache,
    });

    let bind_addr = config.bind_addr.clone();
    let server = HttpServer::new(move || {
        App::new()
            .wrap(Cors::permissive())
            .app_data(state.clone())
            .configure(configure)
    })
    .bind(&bind_addr)?
    .run();

    let handle = server.handle();
    tokio::spawn(async move {
        cancel.cancelled().await;
        handle.stop(true).await;
    });

    server.await
}
