/// SQLite-backed storage substrate: a single shared connection holding
/// one pair of tables per tracked symbol, `klines_{symbol}` (real
/// candles, the Ingestor's exclusive write target) and
/// `predictions_{symbol}` (the Predictor's exclusive write target). Both
/// carry a `UNIQUE` constraint on `open_time`, so `INSERT OR IGNORE`
/// gives idempotent-upsert semantics for free.
mod schema;
mod stats;

use crate::error::{AppError, AppResult};
use crate::types::{Candle, Prediction, MINUTE_MS};
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::Mutex;

pub use stats::SymbolStats;

pub struct Storage {
    conn: Mutex<Connection>,
}

/// Table identifiers are built by string interpolation (rusqlite cannot bind
/// identifiers as parameters), so every symbol must be validated before it
/// ever reaches a `format!` call that builds SQL.
fn table_symbol(symbol: &str) -> AppResult<String> {
    let lower = symbol.to_lowercase();
    if lower.is_empty() || !lower.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(AppError::UpstreamProtocol(format!(
            "rejecting non-alphanumeric symbol as table name: {symbol}"
        )));
    }
    Ok(lower)
}

impl Storage {
    pub fn open(db_path: &str) -> AppResult<Self> {
        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Ok(Storage {
            conn: Mutex::new(conn),
        })
    }

    /// Ephemeral storage backed by an in-memory SQLite connection. Used by
    /// this crate's own tests and by integration tests in `tests/`; not
    /// wired to any CLI flag since no binary has a reason to discard its
    /// data on exit.
    pub fn open_in_memory() -> AppResult<Self> {
        Ok(Storage {
            conn: Mutex::new(Connection::open_in_memory()?),
        })
    }

    /// Creates `klines_{symbol}` / `predictions_{symbol}` if they don't
    /// already exist. Idempotent; cheap to call on every write path.
    pub fn ensure_symbol(&self, symbol: &str) -> AppResult<()> {
        let sym = table_symbol(symbol)?;
        let conn = self.conn.lock().unwrap();
        schema::create_symbol_tables(&conn, &sym)?;
        Ok(())
    }

    pub fn list_tracked_symbols(&self) -> AppResult<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name LIKE 'klines_%'",
        )?;
        let symbols = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .filter_map(|r| r.ok())
            .map(|name| name.trim_start_matches("klines_").to_uppercase())
            .collect();
        Ok(symbols)
    }

    /// Idempotent by `open_time`. Returns the count of rows actually
    /// inserted (duplicates are silently absorbed as success, per the
    /// `DuplicateKey` error kind's policy).
    pub fn upsert_candles(&self, symbol: &str, candles: &[Candle]) -> AppResult<usize> {
        let sym = table_symbol(symbol)?;
        let mut conn = self.conn.lock().unwrap();
        schema::create_symbol_tables(&conn, &sym)?;
        let tx = conn.transaction()?;
        let mut inserted = 0usize;
        {
            let sql = format!(
                "INSERT OR IGNORE INTO klines_{sym} (
                    open_time, close_time, open, high, low, close, volume,
                    quote_asset_volume, number_of_trades,
                    taker_buy_base_asset_volume, taker_buy_quote_asset_volume
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
            );
            let mut stmt = tx.prepare(&sql)?;
            for c in candles {
                let changes = stmt.execute(params![
                    c.open_time,
                    c.close_time,
                    c.open,
                    c.high,
                    c.low,
                    c.close,
                    c.volume,
                    c.quote_asset_volume,
                    c.number_of_trades,
                    c.taker_buy_base_asset_volume,
                    c.taker_buy_quote_asset_volume,
                ])?;
                inserted += changes;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    pub fn last_candle(&self, symbol: &str) -> AppResult<Option<Candle>> {
        let sym = table_symbol(symbol)?;
        let conn = self.conn.lock().unwrap();
        if !schema::table_exists(&conn, &format!("klines_{sym}"))? {
            return Ok(None);
        }
        let sql = format!(
            "SELECT open_time, close_time, open, high, low, close, volume,
                    quote_asset_volume, number_of_trades,
                    taker_buy_base_asset_volume, taker_buy_quote_asset_volume
             FROM klines_{sym} ORDER BY open_time DESC LIMIT 1"
        );
        conn.query_row(&sql, [], row_to_candle)
            .optional()
            .map_err(AppError::from)
    }

    pub fn candles_range(
        &self,
        symbol: &str,
        start_ms: Option<i64>,
        end_ms: Option<i64>,
        limit: Option<i64>,
    ) -> AppResult<Vec<Candle>> {
        let sym = table_symbol(symbol)?;
        let conn = self.conn.lock().unwrap();
        if !schema::table_exists(&conn, &format!("klines_{sym}"))? {
            return Ok(Vec::new());
        }
        let mut sql = format!(
            "SELECT open_time, close_time, open, high, low, close, volume,
                    quote_asset_volume, number_of_trades,
                    taker_buy_base_asset_volume, taker_buy_quote_asset_volume
             FROM klines_{sym} WHERE 1=1"
        );
        if start_ms.is_some() {
            sql.push_str(" AND open_time >= ?1");
        }
        if end_ms.is_some() {
            sql.push_str(if start_ms.is_some() {
                " AND open_time <= ?2"
            } else {
                " AND open_time <= ?1"
            });
        }
        sql.push_str(" ORDER BY open_time ASC");
        if limit.is_some() {
            sql.push_str(" LIMIT ?");
        }

        let mut stmt = conn.prepare(&sql)?;
        let mut binds: Vec<i64> = Vec::new();
        if let Some(s) = start_ms {
            binds.push(s);
        }
        if let Some(e) = end_ms {
            binds.push(e);
        }
        if let Some(l) = limit {
            binds.push(l);
        }
        let params: Vec<&dyn rusqlite::ToSql> = binds.iter().map(|b| b as &dyn rusqlite::ToSql).collect();
        let rows = stmt.query_map(params.as_slice(), row_to_candle)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(AppError::from)
    }

    pub fn upsert_predictions(&self, symbol: &str, predictions: &[Prediction]) -> AppResult<usize> {
        let sym = table_symbol(symbol)?;
        let mut conn = self.conn.lock().unwrap();
        schema::create_symbol_tables(&conn, &sym)?;
        let tx = conn.transaction()?;
        let mut inserted = 0usize;
        {
            let sql = format!(
                "INSERT OR IGNORE INTO predictions_{sym} (
                    open_time, close_time, open, high, low, close, volume,
                    predicted_at, model_version, minutes_ahead
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
            );
            let mut stmt = tx.prepare(&sql)?;
            for p in predictions {
                let changes = stmt.execute(params![
                    p.open_time,
                    p.close_time,
                    p.open,
                    p.high,
                    p.low,
                    p.close,
                    p.volume,
                    p.predicted_at,
                    p.model_version,
                    p.minutes_ahead,
                ])?;
                inserted += changes;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    pub fn predictions_range(
        &self,
        symbol: &str,
        start_ms: Option<i64>,
        end_ms: Option<i64>,
        limit: Option<i64>,
    ) -> AppResult<Vec<Prediction>> {
        let sym = table_symbol(symbol)?;
        let conn = self.conn.lock().unwrap();
        if !schema::table_exists(&conn, &format!("predictions_{sym}"))? {
            return Ok(Vec::new());
        }
        let mut sql = format!(
            "SELECT open_time, close_time, open, high, low, close, volume,
                    predicted_at, model_version, minutes_ahead
             FROM predictions_{sym} WHERE 1=1"
        );
        if start_ms.is_some() {
            sql.push_str(" AND open_time >= ?1");
        }
        if end_ms.is_some() {
            sql.push_str(if start_ms.is_some() {
                " AND open_time <= ?2"
            } else {
                " AND open_time <= ?1"
            });
        }
        sql.push_str(" ORDER BY open_time ASC");
        if limit.is_some() {
            sql.push_str(" LIMIT ?");
        }

        let mut stmt = conn.prepare(&sql)?;
        let mut i_binds: Vec<i64> = Vec::new();
        if let Some(s) = start_ms {
            i_binds.push(s);
        }
        if let Some(e) = end_ms {
            i_binds.push(e);
        }
        if let Some(l) = limit {
            i_binds.push(l);
        }
        let params: Vec<&dyn rusqlite::ToSql> = i_binds.iter().map(|b| b as &dyn rusqlite::ToSql).collect();
        let rows = stmt.query_map(params.as_slice(), row_to_prediction)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(AppError::from)
    }

    /// Existence test used to avoid re-predicting an hour already written.
    pub fn hour_has_prediction(&self, symbol: &str, utc_date: NaiveDate, hour: u32) -> AppResult<bool> {
        let sym = table_symbol(symbol)?;
        let conn = self.conn.lock().unwrap();
        if !schema::table_exists(&conn, &format!("predictions_{sym}"))? {
            return Ok(false);
        }
        let (start, end) = hour_bounds(utc_date, hour);
        let sql = format!(
            "SELECT COUNT(*) FROM predictions_{sym} WHERE open_time >= ?1 AND open_time < ?2"
        );
        let count: i64 = conn.query_row(&sql, params![start, end], |row| row.get(0))?;
        Ok(count > 0)
    }

    /// Max hour-of-day (0..=23) on `utc_date` with at least one persisted
    /// prediction, or `None` if no hour of that date has been predicted yet.
    pub fn last_predicted_hour_today(&self, symbol: &str, utc_date: NaiveDate) -> AppResult<Option<u32>> {
        let sym = table_symbol(symbol)?;
        let conn = self.conn.lock().unwrap();
        if !schema::table_exists(&conn, &format!("predictions_{sym}"))? {
            return Ok(None);
        }
        let day_start = utc_date.and_hms_opt(0, 0, 0).unwrap().and_utc().timestamp_millis();
        let day_end = day_start + 86_400_000;
        let sql = format!(
            "SELECT MAX(open_time) FROM predictions_{sym} WHERE open_time >= ?1 AND open_time < ?2"
        );
        let max_open: Option<i64> = conn
            .query_row(&sql, params![day_start, day_end], |row| row.get(0))
            .optional()?
            .flatten();
        Ok(max_open.map(|ms| (((ms - day_start) / MINUTE_MS) / 60) as u32))
    }

    /// True iff real candles exist for every minute in `[hour:00, hour:60)`.
    pub fn real_data_covers(&self, symbol: &str, utc_date: NaiveDate, hour: u32) -> AppResult<bool> {
        let sym = table_symbol(symbol)?;
        let conn = self.conn.lock().unwrap();
        if !schema::table_exists(&conn, &format!("klines_{sym}"))? {
            return Ok(false);
        }
        let (start, end) = hour_bounds(utc_date, hour);
        let sql = format!(
            "SELECT COUNT(DISTINCT open_time) FROM klines_{sym} WHERE open_time >= ?1 AND open_time < ?2"
        );
        let count: i64 = conn.query_row(&sql, params![start, end], |row| row.get(0))?;
        Ok(count == 60)
    }

    pub fn stats(&self, symbol: &str) -> AppResult<SymbolStats> {
        let sym = table_symbol(symbol)?;
        let conn = self.conn.lock().unwrap();
        stats::compute(&conn, &sym)
    }
}

fn hour_bounds(utc_date: NaiveDate, hour: u32) -> (i64, i64) {
    let day_start = utc_date.and_hms_opt(0, 0, 0).unwrap().and_utc().timestamp_millis();
    let start = day_start + (hour as i64) * 3_600_000;
    (start, start + 3_600_000)
}

fn row_to_candle(row: &rusqlite::Row) -> rusqlite::Result<Candle> {
    Ok(Candle {
        open_time: row.get(0)?,
        close_time: row.get(1)?,
        open: row.get(2)?,
        high: row.get(3)?,
        low: row.get(4)?,
        close: row.get(5)?,
        volume: row.get(6)?,
        quote_asset_volume: row.get(7)?,
        number_of_trades: row.get(8)?,
        taker_buy_base_asset_volume: row.get(9)?,
        taker_buy_quote_asset_volume: row.get(10)?,
    })
}

fn row_to_prediction(row: &rusqlite::Row) -> rusqlite::Result<Prediction> {
    Ok(Prediction {
        open_time: row.get(0)?,
        close_time: row.get(1)?,
        open: row.get(2)?,
        high: row.get(3)?,
        low: row.get(4)?,
        close: row.get(5)?,
        volume: row.get(6)?,
        predicted_at: row.get(7)?,
        model_version: row.get(8)?,
        minutes_ahead: row.get(9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(open_time: i64, close: f64) -> Candle {
        Candle::from_ohlcv(open_time, close, close + 1.0, close - 1.0, close, 10.0)
    }

    #[test]
    fn upsert_is_idempotent() {
        let storage = Storage::open_in_memory().unwrap();
        let candles = vec![candle(0, 100.0), candle(MINUTE_MS, 101.0)];
        assert_eq!(storage.upsert_candles("BTCUSDT", &candles).unwrap(), 2);
        assert_eq!(storage.upsert_candles("BTCUSDT", &candles).unwrap(), 0);
        let stored = storage.candles_range("BTCUSDT", None, None, None).unwrap();
        assert_eq!(stored.len(), 2);
    }

    #[test]
    fn last_candle_tracks_tail() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .upsert_candles("ETHUSDT", &[candle(0, 1.0), candle(MINUTE_MS, 2.0)])
            .unwrap();
        let last = storage.last_candle("ETHUSDT").unwrap().unwrap();
        assert_eq!(last.open_time, MINUTE_MS);
    }

    #[test]
    fn real_data_covers_requires_all_60_minutes() {
        let storage = Storage::open_in_memory().unwrap();
        let date = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let minutes: Vec<Candle> = (0..59).map(|m| candle(m * MINUTE_MS, 100.0)).collect();
        storage.upsert_candles("BTCUSDT", &minutes).unwrap();
        assert!(!storage.real_data_covers("BTCUSDT", date, 0).unwrap());

        storage.upsert_candles("BTCUSDT", &[candle(59 * MINUTE_MS, 100.0)]).unwrap();
        assert!(storage.real_data_covers("BTCUSDT", date, 0).unwrap());
    }

    #[test]
    fn hour_has_prediction_and_last_predicted_hour() {
        let storage = Storage::open_in_memory().unwrap();
        let date = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        assert_eq!(storage.last_predicted_hour_today("BTCUSDT", date).unwrap(), None);

        let preds: Vec<Prediction> = (0..60)
            .map(|m| Prediction {
                open_time: m * MINUTE_MS,
                close_time: m * MINUTE_MS + MINUTE_MS - 1,
                open: 1.0,
                high: 2.0,
                low: 0.5,
                close: 1.5,
                volume: 1.0,
                predicted_at: 0,
                model_version: "20260101".into(),
                minutes_ahead: 1,
            })
            .collect();
        storage.upsert_predictions("BTCUSDT", &preds).unwrap();
        assert!(storage.hour_has_prediction("BTCUSDT", date, 0).unwrap());
        assert!(!storage.hour_has_prediction("BTCUSDT", date, 1).unwrap());
        assert_eq!(storage.last_predicted_hour_today("BTCUSDT", date).unwrap(), Some(0));
    }

    #[test]
    fn rejects_non_alphanumeric_symbol() {
        let storage = Storage::open_in_memory().unwrap();
        let err = storage.upsert_candles("BTC;DROP", &[]).unwrap_err();
        assert!(matches!(err, AppError::UpstreamProtocol(_)));
    }

    #[test]
    fn predictions_unique_on_open_time_alone() {
        // Two different horizon models must never be allowed to both claim
        // the same minute: `open_time` is the sole uniqueness key for the
        // predictions table, `minutes_ahead` is not part of it.
        let storage = Storage::open_in_memory().unwrap();
        let base = Prediction {
            open_time: 0,
            close_time: MINUTE_MS - 1,
            open: 1.0,
            high: 2.0,
            low: 0.5,
            close: 1.5,
            volume: 1.0,
            predicted_at: 0,
            model_version: "20260101".into(),
            minutes_ahead: 1,
        };
        let conflicting = Prediction {
            minutes_ahead: 2,
            close: 1.6,
            ..base.clone()
        };
        assert_eq!(storage.upsert_predictions("BTCUSDT", &[base]).unwrap(), 1);
        assert_eq!(storage.upsert_predictions("BTCUSDT", &[conflicting]).unwrap(), 0);
        let stored = storage.predictions_range("BTCUSDT", None, None, None).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].minutes_ahead, 1);
    }
}
