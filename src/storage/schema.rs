/// DDL helpers. Table names are pre-validated by `super::table_symbol` before
/// they reach any function here.
use rusqlite::{Connection, Result};

pub fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub fn create_symbol_tables(conn: &Connection, sym: &str) -> Result<()> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS klines_{sym} (
            open_time INTEGER NOT NULL UNIQUE,
            close_time INTEGER NOT NULL,
            open REAL NOT NULL,
            high REAL NOT NULL,
            low REAL NOT NULL,
            close REAL NOT NULL,
            volume REAL NOT NULL,
            quote_asset_volume REAL NOT NULL,
            number_of_trades INTEGER NOT NULL,
            taker_buy_base_asset_volume REAL NOT NULL,
            taker_buy_quote_asset_volume REAL NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_klines_{sym}_open_time ON klines_{sym} (open_time);

        CREATE TABLE IF NOT EXISTS predictions_{sym} (
            open_time INTEGER NOT NULL UNIQUE,
            close_time INTEGER NOT NULL,
            open REAL NOT NULL,
            high REAL NOT NULL,
            low REAL NOT NULL,
            close REAL NOT NULL,
            volume REAL NOT NULL,
            predicted_at INTEGER NOT NULL,
            model_version TEXT NOT NULL,
            minutes_ahead INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_predictions_{sym}_open_time ON predictions_{sym} (open_time);"
    ))
}
