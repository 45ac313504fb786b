/// HTTP handlers: `#[get(...)]`/`#[post(...)]` service macros over a
/// shared `actix_web::web::Data<AppState>`, with a `moka` cache in front
/// of the candle range query.
use super::{AppState, CacheKey};
use crate::error::AppError;
use crate::ingestor;
use actix_web::{get, post, web, HttpResponse, Responder};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct SyncRequest {
    pub symbol: String,
}

fn error_response(err: &AppError) -> HttpResponse {
    let body = serde_json::json!({"success": false, "error": err.to_string()});
    if err.is_storage_unavailable() {
        HttpResponse::ServiceUnavailable().json(body)
    } else {
        HttpResponse::InternalServerError().json(body)
    }
}

fn unknown_symbol_response(symbol: &str) -> HttpResponse {
    HttpResponse::NotFound().json(serde_json::json!({
        "success": false,
        "error": format!("unknown symbol: {symbol}"),
    }))
}

#[get("/health")]
pub async fn health(state: web::Data<AppState>) -> impl Responder {
    let storage = state.storage.clone();
    let database = match web::block(move || storage.list_tracked_symbols()).await {
        Ok(Ok(_)) => "ok",
        _ => "unavailable",
    };
    let status = if database == "ok" { "ok" } else { "degraded" };
    HttpResponse::Ok().json(serde_json::json!({
        "status": status,
        "service": "candle-forecast",
        "database": database,
    }))
}

#[get("/api/symbols")]
pub async fn list_symbols(state: web::Data<AppState>) -> impl Responder {
    let storage = state.storage.clone();
    let symbols = match web::block(move || storage.list_tracked_symbols()).await {
        Ok(Ok(s)) => s,
        Ok(Err(e)) => return error_response(&e),
        Err(_) => return HttpResponse::InternalServerError().json(serde_json::json!({"success": false, "error": "task panicked"})),
    };

    let storage = state.storage.clone();
    let result = web::block(move || {
        symbols
            .into_iter()
            .map(|symbol| {
                let stats = storage.stats(&symbol)?;
                Ok::<_, AppError>(serde_json::json!({
                    "symbol": stats.symbol,
                    "total_records": stats.total_candles,
                    "first_record": stats.first_open_time,
                    "last_record": stats.last_open_time,
                    "last_price": stats.last_close,
                }))
            })
            .collect::<Result<Vec<_>, _>>()
    })
    .await;

    match result {
        Ok(Ok(list)) => HttpResponse::Ok().json(list),
        Ok(Err(e)) => error_response(&e),
        Err(_) => HttpResponse::InternalServerError().json(serde_json::json!({"success": false, "error": "task panicked"})),
    }
}

#[post("/api/sync")]
pub async fn sync_symbol(state: web::Data<AppState>, body: web::Json<SyncRequest>) -> impl Responder {
    let symbol = body.symbol.to_uppercase();
    let result = ingestor::tick_once(&state.config, &state.storage, &state.market, &state.bus, &symbol).await;

    match result {
        Ok(new_records) => {
            let storage = state.storage.clone();
            let symbol_owned = symbol.clone();
            let stats = web::block(move || storage.stats(&symbol_owned)).await;
            match stats {
                Ok(Ok(stats)) => HttpResponse::Ok().json(serde_json::json!({
                    "success": true,
                    "symbol": symbol,
                    "new_records": new_records,
                    "statistics": stats,
                })),
                Ok(Err(e)) => error_response(&e),
                Err(_) => HttpResponse::InternalServerError().json(serde_json::json!({"success": false, "error": "task panicked"})),
            }
        }
        Err(e) => error_response(&e),
    }
}

#[get("/api/data/{symbol}")]
pub async fn get_candles(
    state: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<RangeQuery>,
) -> impl Responder {
    let symbol = path.into_inner().to_uppercase();
    if !state.config.tracked_symbols().contains(&symbol) {
        return unknown_symbol_response(&symbol);
    }
    let q = query.into_inner();
    let key = CacheKey {
        symbol: symbol.clone(),
        start: q.start_time,
        end: q.end_time,
        limit: q.limit,
    };

    if let Some(cached) = state.candles_cache.get(&key).await {
        return respond_with_series(symbol, Ok(Ok((*cached).clone())));
    }

    let storage = state.storage.clone();
    let symbol_for_fetch = symbol.clone();
    let result =
        web::block(move || storage.candles_range(&symbol_for_fetch, q.start_time, q.end_time, q.limit)).await;

    if let Ok(Ok(rows)) = &result {
        state.candles_cache.insert(key, Arc::new(rows.clone())).await;
    }

    respond_with_series(symbol, result)
}

#[get("/api/predictions/{symbol}")]
pub async fn get_predictions(
    state: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<RangeQuery>,
) -> impl Responder {
    let symbol = path.into_inner().to_uppercase();
    if !state.config.tracked_symbols().contains(&symbol) {
        return unknown_symbol_response(&symbol);
    }
    let storage = state.storage.clone();
    let q = query.into_inner();
    let symbol_for_fetch = symbol.clone();
    let result = web::block(move || {
        storage.predictions_range(&symbol_for_fetch, q.start_time, q.end_time, q.limit)
    })
    .await;
    respond_with_series(symbol, result)
}

#[get("/api/stats/{symbol}")]
pub async fn get_stats(state: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let symbol = path.into_inner().to_uppercase();
    if !state.config.tracked_symbols().contains(&symbol) {
        return unknown_symbol_response(&symbol);
    }
    let storage = state.storage.clone();
    let result = web::block(move || storage.stats(&symbol)).await;
    match result {
        Ok(Ok(stats)) => HttpResponse::Ok().json(serde_json::json!({"success": true, "statistics": stats})),
        Ok(Err(e)) => error_response(&e),
        Err(_) => HttpResponse::InternalServerError().json(serde_json::json!({"success": false, "error": "task panicked"})),
    }
}

/// Shared `{success, symbol, count, data}` envelope for the candle and
/// prediction range endpoints, which share the same wire shape.
fn respond_with_series<T: serde::Serialize>(
    symbol: String,
    result: Result<crate::error::AppResult<Vec<T>>, actix_web::error::BlockingError>,
) -> HttpResponse {
    match result {
        Ok(Ok(rows)) => HttpResponse::Ok().json(serde_json::json!({
            "success": true,
            "symbol": symbol,
            "count": rows.len(),
            "data": rows,
        })),
        Ok(Err(e)) => error_response(&e),
        Err(_) => HttpResponse::InternalServerError().json(serde_json::json!({"success": false, "error": "task panicked"})),
    }
}
