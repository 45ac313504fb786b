/// One-shot CLI: force-train a symbol's 12-horizon model set against the
/// real candles currently in storage, bypassing the Predictor's normal
/// once-per-UTC-day gate. A small `clap::Args` struct, one operation,
/// print a summary and exit.
use candle_forecast::config::AppConfig;
use candle_forecast::predictor::model::ModelSet;
use candle_forecast::storage::Storage;
use candle_forecast::types::MINUTE_MS;
use chrono::{Timelike, Utc};
use clap::Parser;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(author, version, about = "Force-train a symbol's model set from stored real candles")]
struct Args {
    /// Trading pair to train, e.g. BTCUSDT.
    #[arg(long)]
    symbol: String,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = AppConfig::load();
    let symbol = args.symbol.to_uppercase();

    let storage = match Storage::open(&config.db_path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("fatal: could not open storage: {e}");
            return ExitCode::FAILURE;
        }
    };

    let history = match storage.candles_range(&symbol, None, None, None) {
        Ok(h) => h,
        Err(e) => {
            eprintln!("fatal: could not load history for {symbol}: {e}");
            return ExitCode::FAILURE;
        }
    };

    let Some(last) = history.last() else {
        eprintln!("no real candles stored for {symbol} yet");
        return ExitCode::FAILURE;
    };

    // Most recent UTC hour boundary at or before the latest real candle.
    let last_dt = chrono::DateTime::from_timestamp_millis(last.open_time).unwrap();
    let boundary_ms = last_dt
        .date_naive()
        .and_hms_opt(last_dt.hour(), 0, 0)
        .unwrap()
        .and_utc()
        .timestamp_millis();

    let idx = ((boundary_ms - history[0].open_time) / MINUTE_MS) as i64;
    if idx < 0 || idx as usize > history.len() {
        eprintln!("history does not reach back to the current hour boundary for {symbol}");
        return ExitCode::FAILURE;
    }

    let today = Utc::now().date_naive();
    match ModelSet::train(&history, idx as usize, today) {
        Ok(set) => {
            if let Err(e) = candle_forecast::predictor::model::save_atomic(&config.models_dir, &symbol, &set) {
                eprintln!("fatal: could not persist model set for {symbol}: {e}");
                return ExitCode::FAILURE;
            }
            println!("trained and persisted model set for {symbol}, tagged {}", set.date_tag);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("training failed for {symbol}: {e}");
            ExitCode::FAILURE
        }
    }
}
