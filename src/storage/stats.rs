use crate::error::AppResult;
use rusqlite::Connection;
use serde::Serialize;

use super::schema::table_exists;

/// Result of `Storage::stats` — total real-candle count, first/last
/// `open_time`, and the last close. Matches the shape the
/// `/api/stats/{symbol}` handler serializes directly.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SymbolStats {
    pub symbol: String,
    pub total_candles: i64,
    pub first_open_time: Option<i64>,
    pub last_open_time: Option<i64>,
    pub last_close: Option<f64>,
}

pub fn compute(conn: &Connection, sym: &str) -> AppResult<SymbolStats> {
    let table = format!("klines_{sym}");
    if !table_exists(conn, &table)? {
        return Ok(SymbolStats {
            symbol: sym.to_uppercase(),
            total_candles: 0,
            first_open_time: None,
            last_open_time: None,
            last_close: None,
        });
    }

    let sql = format!(
        "SELECT COUNT(*), MIN(open_time), MAX(open_time) FROM klines_{sym}"
    );
    let (total, first, last): (i64, Option<i64>, Option<i64>) =
        conn.query_row(&sql, [], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?;

    let last_close: Option<f64> = if let Some(last_open) = last {
        let sql = format!("SELECT close FROM klines_{sym} WHERE open_time = ?1");
        Some(conn.query_row(&sql, [last_open], |row| row.get(0))?)
    } else {
        None
    };

    Ok(SymbolStats {
        symbol: sym.to_uppercase(),
        total_candles: total,
        first_open_time: first,
        last_open_time: last,
        last_close,
    })
}
