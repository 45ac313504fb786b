/// Forecasts a shadow minute-candle series, one hour at a time, using
/// twelve horizon-specialized regression models retrained once per UTC
/// day. See `scheduler` for the per-tick algorithm.
pub mod features;
pub mod horizons;
pub mod model;
mod scheduler;

pub use scheduler::run;
