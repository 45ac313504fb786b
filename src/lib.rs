//! Ingests minute candles for a small set of trading pairs, trains
//! horizon-specialized sequence models daily, and serves the merged
//! real/predicted series over HTTP and a WebSocket push channel.
pub mod api;
pub mod bus;
pub mod config;
pub mod error;
pub mod ingestor;
pub mod predictor;
pub mod storage;
pub mod types;
