use serde::{Deserialize, Serialize};

/// A minute-level forecast candle. Same OHLCV shape as `Candle`, plus the
/// provenance fields that let clients and the storage layer distinguish
/// predictions from real data and from each other across retrains.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub open_time: i64,
    pub close_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    /// Wall-clock instant (ms since epoch) the inference that produced this
    /// candle ran.
    pub predicted_at: i64,
    /// Opaque tag identifying the model set that produced this candle —
    /// the UTC date (`YYYYMMDD`) the set was trained on.
    pub model_version: String,
    /// The horizon (1..=60) whose model produced this minute.
    pub minutes_ahead: u32,
}

impl Prediction {
    pub fn is_ohlc_sane(&self) -> bool {
        let lo = self.open.min(self.close);
        let hi = self.open.max(self.close);
        self.low <= lo && self.high >= hi
    }
}
