pub mod candle;
pub mod prediction;

pub use candle::Candle;
pub use prediction::Prediction;

/// One minute, in milliseconds. The fundamental step of every series this
/// service stores: real candles, predicted candles, and resampling buckets
/// are all multiples of this.
pub const MINUTE_MS: i64 = 60_000;
