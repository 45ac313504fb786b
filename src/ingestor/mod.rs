/// Maintains the real candle series gap-free, one minute behind the
/// exchange at most, for all tracked symbols: a periodic scheduler that
/// fetches a batch, retries transient `binance` errors with bounded
/// exponential backoff, upserts, and moves on to the next symbol.
mod backoff;
mod fetch;
mod gap_fill;
mod scheduler;

pub use scheduler::{run, tick_once};
