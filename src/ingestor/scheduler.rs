/// Periodic ingest loop. One tick per `ingest_interval_secs`: for every
/// tracked symbol, compute the fetch start from `last_candle`, pull minute
/// candles in upstream-capped windows with bounded retry, upsert, and
/// publish `sync_complete`. Concurrency within a tick is bounded by a
/// `Semaphore`, the same primitive the predictor scheduler uses to cap
/// concurrent training.
use super::backoff::Backoff;
use super::fetch::{self, UPSTREAM_BATCH_CAP};
use super::gap_fill;
use crate::bus::{EventBus, SyncCompleteEvent};
use crate::config::AppConfig;
use crate::error::AppResult;
use crate::storage::Storage;
use crate::types::MINUTE_MS;
use binance::api::Binance;
use binance::market::Market;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Fetches and upserts whatever is new for `symbol`, up to the exchange's
/// present tail. Returns the number of new candles stored.
pub async fn tick_once(
    config: &AppConfig,
    storage: &Arc<Storage>,
    market: &Arc<Market>,
    bus: &EventBus,
    symbol: &str,
) -> AppResult<usize> {
    let (start_ms, mut prev_tail) = {
        let storage = Arc::clone(storage);
        let symbol_owned = symbol.to_string();
        let bootstrap = bootstrap_start_ms(config);
        tokio::task::spawn_blocking(move || -> AppResult<(i64, Option<crate::types::Candle>)> {
            storage.ensure_symbol(&symbol_owned)?;
            Ok(match storage.last_candle(&symbol_owned)? {
                Some(last) => (last.open_time + MINUTE_MS, Some(last)),
                None => (bootstrap, None),
            })
        })
        .await
        .expect("storage task panicked")?
    };

    let mut cursor = start_ms;
    let mut total_new = 0usize;

    loop {
        let mut backoff = Backoff::new(config.backoff_retries, config.backoff_base_ms, config.backoff_cap_ms);
        let candles = loop {
            let market = Arc::clone(market);
            let symbol_owned = symbol.to_string();
            // `market.get_klines` and sqlite access are both blocking; run
            // them on the blocking pool rather than stall the tick's task.
            let fetched = tokio::task::spawn_blocking(move || {
                fetch::fetch_minutes(&market, &symbol_owned, cursor, UPSTREAM_BATCH_CAP)
            })
            .await
            .expect("fetch task panicked");

            match fetched {
                Ok(candles) => break candles,
                Err(e) if e.is_storage_unavailable() => return Err(e),
                Err(e) => {
                    warn!(symbol, error = %e, "ingest fetch failed");
                    match backoff.next_delay() {
                        Some(delay) => tokio::time::sleep(delay).await,
                        None => {
                            warn!(symbol, "giving up on symbol for this tick after exhausting retries");
                            return Ok(total_new);
                        }
                    }
                }
            }
        };

        if candles.is_empty() {
            break;
        }

        let last_open = candles.last().unwrap().open_time;
        let original_len = candles.len();
        let filled = gap_fill::fill(prev_tail, candles);

        let inserted = {
            let storage = Arc::clone(storage);
            let symbol_owned = symbol.to_string();
            let filled = filled.clone();
            tokio::task::spawn_blocking(move || storage.upsert_candles(&symbol_owned, &filled))
                .await
                .expect("storage task panicked")?
        };
        total_new += inserted;
        prev_tail = filled.last().copied();
        cursor = last_open + MINUTE_MS;

        // Exchange caught up to present; stop walking forward this tick.
        if original_len < UPSTREAM_BATCH_CAP as usize || cursor > Utc::now().timestamp_millis() {
            break;
        }
    }

    let stats = {
        let storage = Arc::clone(storage);
        let symbol_owned = symbol.to_string();
        tokio::task::spawn_blocking(move || storage.stats(&symbol_owned))
            .await
            .expect("storage task panicked")?
    };
    bus.publish(SyncCompleteEvent {
        symbol: symbol.to_string(),
        new_records: total_new,
        total: stats.total_candles,
        last_price: stats.last_close,
        last_record_ts: stats.last_open_time,
    });

    Ok(total_new)
}

fn bootstrap_start_ms(config: &AppConfig) -> i64 {
    if let Some(date_str) = &config.bootstrap_start {
        if let Ok(date) = chrono::NaiveDate::parse_from_str(date_str, "%Y-%m-%d") {
            return date
                .and_hms_opt(0, 0, 0)
                .unwrap()
                .and_utc()
                .timestamp_millis();
        }
        warn!(date = %date_str, "unparsable CF_BOOTSTRAP_START, falling back to 30-day default");
    }
    (Utc::now() - ChronoDuration::days(30)).timestamp_millis()
}

pub async fn run(
    config: Arc<AppConfig>,
    storage: Arc<Storage>,
    bus: EventBus,
    cancel: CancellationToken,
) {
    let market: Arc<Market> = Arc::new(Binance::new(None, None));
    let symbols = config.tracked_symbols();
    let semaphore = Arc::new(Semaphore::new(config.ingest_parallelism));
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(config.ingest_interval_secs));

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("ingestor shutting down");
                return;
            }
            _ = interval.tick() => {}
        }

        let mut handles = Vec::with_capacity(symbols.len());
        for symbol in &symbols {
            let permit = Arc::clone(&semaphore);
            let config = Arc::clone(&config);
            let storage = Arc::clone(&storage);
            let market = Arc::clone(&market);
            let bus = bus.clone();
            let symbol = symbol.clone();

            handles.push(tokio::spawn(async move {
                let _permit = permit.acquire_owned().await.expect("semaphore never closed");
                match tick_once(&config, &storage, &market, &bus, &symbol).await {
                    Ok(n) if n > 0 => info!(symbol, new_records = n, "ingest tick complete"),
                    Ok(_) => {}
                    Err(e) => warn!(symbol, error = %e, "ingest tick failed"),
                }
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }
    }
}
