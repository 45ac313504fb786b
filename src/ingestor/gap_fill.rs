/// Linear interpolation for rare single-minute gaps inside a fetched
/// upstream batch. Runs in-memory on a freshly fetched batch before it
/// ever reaches `Storage::upsert_candles`, so the gap-freeness invariant
/// holds without a second storage round-trip.
use crate::types::{Candle, MINUTE_MS};

/// Fills any gap between `prev_tail` and the first element of `batch`, and
/// between consecutive elements of `batch` itself. A gap of more than a
/// few minutes most likely means the upstream source is itself missing
/// data rather than a transient hiccup; it is still filled, since the
/// stored series must stay gap-free regardless of cause.
pub fn fill(prev_tail: Option<Candle>, batch: Vec<Candle>) -> Vec<Candle> {
    if batch.is_empty() {
        return batch;
    }

    let mut filled = Vec::with_capacity(batch.len());
    let mut prev = prev_tail;

    for candle in batch {
        if let Some(p) = prev {
            let missing = (candle.open_time - p.open_time) / MINUTE_MS - 1;
            for j in 1..=missing {
                let ratio = j as f64 / (missing + 1) as f64;
                filled.push(interpolate(&p, &candle, ratio));
            }
        }
        filled.push(candle);
        prev = filled.last().copied();
    }

    filled
}

fn interpolate(current: &Candle, next: &Candle, ratio: f64) -> Candle {
    let open_time = current.open_time + ((next.open_time - current.open_time) as f64 * ratio) as i64;
    let lerp = |a: f64, b: f64| a + (b - a) * ratio;

    Candle {
        open_time,
        close_time: open_time + MINUTE_MS - 1,
        open: lerp(current.open, next.open),
        high: lerp(current.high, next.high),
        low: lerp(current.low, next.low),
        close: lerp(current.close, next.close),
        volume: lerp(current.volume, next.volume),
        quote_asset_volume: lerp(current.quote_asset_volume, next.quote_asset_volume),
        number_of_trades: lerp(current.number_of_trades as f64, next.number_of_trades as f64) as i64,
        taker_buy_base_asset_volume: lerp(
            current.taker_buy_base_asset_volume,
            next.taker_buy_base_asset_volume,
        ),
        taker_buy_quote_asset_volume: lerp(
            current.taker_buy_quote_asset_volume,
            next.taker_buy_quote_asset_volume,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(open_time: i64, close: f64) -> Candle {
        Candle::from_ohlcv(open_time, close, close + 1.0, close - 1.0, close, 10.0)
    }

    #[test]
    fn fills_single_minute_gap_between_batch_elements() {
        let batch = vec![candle(0, 100.0), candle(2 * MINUTE_MS, 102.0)];
        let filled = fill(None, batch);
        assert_eq!(filled.len(), 3);
        assert_eq!(filled[1].open_time, MINUTE_MS);
        assert_eq!(filled[1].close, 101.0);
    }

    #[test]
    fn fills_gap_against_prior_tail() {
        let prev = candle(0, 100.0);
        let batch = vec![candle(3 * MINUTE_MS, 103.0)];
        let filled = fill(Some(prev), batch);
        assert_eq!(filled.len(), 3);
        assert_eq!(filled[0].open_time, MINUTE_MS);
        assert_eq!(filled[1].open_time, 2 * MINUTE_MS);
        assert_eq!(filled[2].open_time, 3 * MINUTE_MS);
    }

    #[test]
    fn no_gap_is_a_no_op() {
        let batch = vec![candle(0, 100.0), candle(MINUTE_MS, 101.0)];
        let filled = fill(None, batch.clone());
        assert_eq!(filled, batch);
    }
}
