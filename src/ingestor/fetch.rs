/// One REST fetch of minute klines from Binance, converted into our
/// `Candle` type. Parses the exchange's string-encoded numeric fields and
/// classifies failures into the crate's `AppError` taxonomy.
use crate::error::{AppError, AppResult};
use crate::types::Candle;
use binance::market::Market;
use binance::model::{KlineSummaries, KlineSummary};

const INTERVAL: &str = "1m";
pub const UPSTREAM_BATCH_CAP: u16 = 1000;

pub fn fetch_minutes(
    market: &Market,
    symbol: &str,
    start_ms: i64,
    limit: u16,
) -> AppResult<Vec<Candle>> {
    let limit = limit.min(UPSTREAM_BATCH_CAP);
    let result = market.get_klines(symbol, INTERVAL, Some(limit), Some(start_ms as u64), None);

    let summaries = result.map_err(|e| AppError::UpstreamTransient(format!("{e:?}")))?;
    let KlineSummaries::AllKlineSummaries(klines) = summaries;
    klines.iter().map(kline_to_candle).collect()
}

fn kline_to_candle(kline: &KlineSummary) -> AppResult<Candle> {
    let parse = |field: &str, name: &str| -> AppResult<f64> {
        field
            .parse::<f64>()
            .map_err(|_| AppError::UpstreamProtocol(format!("malformed {name}: {field:?}")))
    };

    let candle = Candle {
        open_time: kline.open_time,
        close_time: kline.close_time,
        open: parse(&kline.open, "open")?,
        high: parse(&kline.high, "high")?,
        low: parse(&kline.low, "low")?,
        close: parse(&kline.close, "close")?,
        volume: parse(&kline.volume, "volume")?,
        quote_asset_volume: parse(&kline.quote_asset_volume, "quote_asset_volume")?,
        number_of_trades: kline.number_of_trades,
        taker_buy_base_asset_volume: parse(
            &kline.taker_buy_base_asset_volume,
            "taker_buy_base_asset_volume",
        )?,
        taker_buy_quote_asset_volume: parse(
            &kline.taker_buy_quote_asset_volume,
            "taker_buy_quote_asset_volume",
        )?,
    };

    if !candle.is_ohlc_sane() {
        return Err(AppError::UpstreamProtocol(format!(
            "non-sane OHLC at open_time {}",
            candle.open_time
        )));
    }

    Ok(candle)
}
