use serde::{Deserialize, Serialize};

/// A single minute-bar (OHLCV) for a trading pair.
///
/// Invariants (enforced at construction sites, not here — see
/// `storage::Storage::upsert_candles` and `predictor::inference`):
/// `open_time % 60_000 == 0`, `close_time == open_time + 59_999`,
/// `low <= min(open, close)`, `high >= max(open, close)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: i64,
    pub close_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub quote_asset_volume: f64,
    pub number_of_trades: i64,
    pub taker_buy_base_asset_volume: f64,
    pub taker_buy_quote_asset_volume: f64,
}

impl Candle {
    /// Builds a candle from raw OHLCV, filling the exchange auxiliary
    /// fields with zero. Used for predicted and synthetic (interpolated)
    /// candles, where those fields carry no meaning.
    pub fn from_ohlcv(open_time: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Candle {
            open_time,
            close_time: open_time + crate::types::MINUTE_MS - 1,
            open,
            high,
            low,
            close,
            volume,
            quote_asset_volume: 0.0,
            number_of_trades: 0,
            taker_buy_base_asset_volume: 0.0,
            taker_buy_quote_asset_volume: 0.0,
        }
    }

    pub fn is_ohlc_sane(&self) -> bool {
        let lo = self.open.min(self.close);
        let hi = self.open.max(self.close);
        self.low <= lo && self.high >= hi
    }
}
