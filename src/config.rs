/// Process configuration. Loaded from environment (optionally via a
/// `.env` file through `dotenvy`) and overridable from the CLI via
/// `clap`'s derive macros and `env` attribute.
use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct AppConfig {
    /// Comma-separated list of tracked trading pairs, e.g. "BTCUSDT,ETHUSDT".
    #[arg(long, env = "CF_SYMBOLS", default_value = "BTCUSDT,ETHUSDT,SOLUSDT")]
    symbols: String,

    /// Path to the SQLite database file shared by all components.
    #[arg(long, env = "CF_DB_PATH", default_value = "candle_forecast.db")]
    pub db_path: String,

    /// Directory holding per-symbol, per-date model artifacts.
    #[arg(long, env = "CF_MODELS_DIR", default_value = "models")]
    pub models_dir: String,

    /// Ingestor tick period, in seconds.
    #[arg(long, env = "CF_INGEST_INTERVAL_SECS", default_value_t = 60)]
    pub ingest_interval_secs: u64,

    /// Predictor validation tick period, in seconds.
    #[arg(long, env = "CF_PREDICTOR_TICK_SECS", default_value_t = 5)]
    pub predictor_tick_secs: u64,

    /// Max symbols fetched concurrently within one ingest tick.
    #[arg(long, env = "CF_INGEST_PARALLELISM", default_value_t = 4)]
    pub ingest_parallelism: usize,

    /// Upstream retry budget before giving up on a symbol for this tick.
    #[arg(long, env = "CF_BACKOFF_RETRIES", default_value_t = 5)]
    pub backoff_retries: u32,

    /// Backoff base delay, in milliseconds.
    #[arg(long, env = "CF_BACKOFF_BASE_MS", default_value_t = 500)]
    pub backoff_base_ms: u64,

    /// Backoff delay cap, in milliseconds.
    #[arg(long, env = "CF_BACKOFF_CAP_MS", default_value_t = 30_000)]
    pub backoff_cap_ms: u64,

    /// Per-connection outbound WebSocket queue bound.
    #[arg(long, env = "CF_WS_QUEUE_CAPACITY", default_value_t = 256)]
    pub ws_queue_capacity: usize,

    /// HTTP/WebSocket bind address.
    #[arg(long, env = "CF_BIND_ADDR", default_value = "127.0.0.1:8080")]
    pub bind_addr: String,

    /// Bootstrap start date (YYYY-MM-DD) used the first time a symbol has
    /// no stored candles at all. Defaults to 30 days before now.
    #[arg(long, env = "CF_BOOTSTRAP_START")]
    pub bootstrap_start: Option<String>,
}

impl AppConfig {
    pub fn load() -> Self {
        // Best-effort: a missing or unreadable .env file is never fatal.
        let _ = dotenvy::dotenv();
        AppConfig::parse()
    }

    pub fn tracked_symbols(&self) -> Vec<String> {
        self.symbols
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Builds a config from defaults only, ignoring the calling binary's own
    /// argv and environment. Used by tests (in this crate and in
    /// `tests/`) that need an `AppConfig` without parsing
    /// `std::env::args()`.
    pub fn defaults() -> Self {
        AppConfig::parse_from(["candle-forecast"])
    }
}
