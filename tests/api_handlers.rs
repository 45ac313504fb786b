//! Smoke tests for the HTTP surface, built the same way `api::run` wires
//! its `App` (via `candle_forecast::api::configure`) but driven through
//! `actix_web::test::init_service` instead of a real listener.
use binance::api::Binance;
use candle_forecast::api::{self, AppState};
use candle_forecast::bus::EventBus;
use candle_forecast::config::AppConfig;
use candle_forecast::storage::Storage;
use candle_forecast::types::Candle;
use actix_web::{test, web, App};
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;

fn test_state(storage: Storage) -> web::Data<AppState> {
    let config = Arc::new(AppConfig::defaults());
    let bus = EventBus::new();
    let broker = Arc::new(api::Broker::new(config.ws_queue_capacity));
    let market = Arc::new(Binance::new(None, None));
    let candles_cache = Cache::builder()
        .max_capacity(100)
        .time_to_live(Duration::from_secs(30))
        .build();

    web::Data::new(AppState {
        storage: Arc::new(storage),
        config,
        bus,
        broker,
        market,
        candles_cache,
    })
}

#[actix_web::test]
async fn health_reports_ok_when_storage_is_reachable() {
    let state = test_state(Storage::open_in_memory().unwrap());
    let app = test::init_service(App::new().app_data(state).configure(api::configure)).await;

    let req = test::TestRequest::get().uri("/health").to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["database"], "ok");
}

#[actix_web::test]
async fn list_symbols_reflects_tracked_symbols() {
    let storage = Storage::open_in_memory().unwrap();
    storage.ensure_symbol("BTCUSDT").unwrap();
    let state = test_state(storage);
    let app = test::init_service(App::new().app_data(state).configure(api::configure)).await;

    let req = test::TestRequest::get().uri("/api/symbols").to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    let list = body.as_array().expect("symbols endpoint returns a JSON array");
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["symbol"], "BTCUSDT");
}

#[actix_web::test]
async fn get_candles_returns_envelope_with_count_and_data() {
    let storage = Storage::open_in_memory().unwrap();
    storage.ensure_symbol("BTCUSDT").unwrap();
    let candles: Vec<Candle> = (0..5)
        .map(|i| Candle::from_ohlcv(i * candle_forecast::types::MINUTE_MS, 100.0, 101.0, 99.0, 100.5, 10.0))
        .collect();
    storage.upsert_candles("BTCUSDT", &candles).unwrap();

    let state = test_state(storage);
    let app = test::init_service(App::new().app_data(state).configure(api::configure)).await;

    let req = test::TestRequest::get().uri("/api/data/btcusdt").to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["symbol"], "BTCUSDT");
    assert_eq!(body["count"], 5);
    assert_eq!(body["data"].as_array().unwrap().len(), 5);
}

#[actix_web::test]
async fn get_candles_for_untracked_symbol_is_404() {
    let state = test_state(Storage::open_in_memory().unwrap());
    let app = test::init_service(App::new().app_data(state).configure(api::configure)).await;

    let req = test::TestRequest::get().uri("/api/data/NOSUCHPAIR").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["success"], false);
}

#[actix_web::test]
async fn get_stats_for_untracked_symbol_is_404() {
    let state = test_state(Storage::open_in_memory().unwrap());
    let app = test::init_service(App::new().app_data(state).configure(api::configure)).await;

    let req = test::TestRequest::get().uri("/api/stats/NOSUCHPAIR").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
}

#[actix_web::test]
async fn get_stats_for_tracked_symbol_with_no_data_reports_zero_candles() {
    let state = test_state(Storage::open_in_memory().unwrap());
    let app = test::init_service(App::new().app_data(state).configure(api::configure)).await;

    let req = test::TestRequest::get().uri("/api/stats/ETHUSDT").to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["statistics"]["total_candles"], 0);
}
