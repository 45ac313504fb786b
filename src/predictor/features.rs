/// Feature and target assembly for horizon models.
///
/// `history` is always a chronological, gap-free, minute-aligned candle
/// slice (the storage layer's gap-freeness invariant is what makes index
/// arithmetic here safe instead of needing timestamp lookups per row).
use super::horizons::{horizon_interval, FEATURE_LEN, RESAMPLE_BUCKETS};
use crate::types::Candle;

/// Per-feature min/max, fit on a training window and persisted alongside
/// the model so inference normalizes with the same scale the model was
/// trained on.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Scaler {
    pub min: Vec<f64>,
    pub max: Vec<f64>,
}

impl Scaler {
    pub fn fit(rows: &[Vec<f64>]) -> Self {
        let mut min = vec![f64::INFINITY; FEATURE_LEN];
        let mut max = vec![f64::NEG_INFINITY; FEATURE_LEN];
        for row in rows {
            for (i, &v) in row.iter().enumerate() {
                if v < min[i] {
                    min[i] = v;
                }
                if v > max[i] {
                    max[i] = v;
                }
            }
        }
        Scaler { min, max }
    }

    pub fn transform(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .enumerate()
            .map(|(i, &v)| {
                let span = self.max[i] - self.min[i];
                if span <= f64::EPSILON {
                    0.5
                } else {
                    ((v - self.min[i]) / span).clamp(0.0, 1.0)
                }
            })
            .collect()
    }
}

/// One bucket's OHLCV aggregate, ending at and including index `t`.
///
/// Forward-fills from the most recent complete bucket. When fewer than `n`
/// minutes of history precede `t`, no earlier complete bucket exists yet,
/// so the earliest bucket that *does* become complete (indices `0..n`)
/// holds constant for every `t` before it.
fn bucket_agg(history: &[Candle], t: usize, n: usize) -> (f64, f64, f64, f64, f64) {
    let slice = if t + 1 >= n {
        &history[t + 1 - n..=t]
    } else if history.len() >= n {
        &history[0..n]
    } else {
        &history[0..=t.min(history.len() - 1)]
    };

    let open = slice.first().map(|c| c.open).unwrap_or(0.0);
    let close = slice.last().map(|c| c.close).unwrap_or(0.0);
    let high = slice.iter().map(|c| c.high).fold(f64::NEG_INFINITY, f64::max);
    let low = slice.iter().map(|c| c.low).fold(f64::INFINITY, f64::min);
    let volume: f64 = slice.iter().map(|c| c.volume).sum();
    (open, high, low, close, volume)
}

/// Builds the `FEATURE_LEN`-wide feature row for minute index `t`: raw
/// OHLCV followed by each resample bucket's aggregate, in ascending
/// bucket-size order.
pub fn feature_row(history: &[Candle], t: usize) -> Vec<f64> {
    let c = &history[t];
    let mut row = Vec::with_capacity(FEATURE_LEN);
    row.push(c.open);
    row.push(c.high);
    row.push(c.low);
    row.push(c.close);
    row.push(c.volume);

    for &n in RESAMPLE_BUCKETS.iter() {
        let (open, high, low, close, volume) = bucket_agg(history, t, n as usize);
        row.push(open);
        row.push(high);
        row.push(low);
        row.push(close);
        row.push(volume);
    }

    debug_assert_eq!(row.len(), FEATURE_LEN);
    row
}

/// Delta-based targets for minute `t` and `horizon`, or `None` when the
/// lookahead window runs past the end of available history (the row is
/// dropped from the training set rather than padded).
pub fn targets(history: &[Candle], t: usize, horizon: u32) -> Option<(f64, f64, f64, f64)> {
    let (start, end) = horizon_interval(horizon);
    let future_start = t + 1 + start as usize;
    let future_end = t + 1 + end as usize;
    if future_end > history.len() {
        return None;
    }

    let close_t = history[t].close;
    let future = &history[future_start..future_end];
    let future_close = future.last().unwrap().close;
    let future_high = future.iter().map(|c| c.high).fold(f64::NEG_INFINITY, f64::max);
    let future_low = future.iter().map(|c| c.low).fold(f64::INFINITY, f64::min);
    let future_volume: f64 = future.iter().map(|c| c.volume).sum();

    Some((
        future_close - close_t,
        future_high - close_t,
        future_low - close_t,
        future_volume,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_history(n: usize) -> Vec<Candle> {
        (0..n)
            .map(|i| Candle::from_ohlcv((i as i64) * 60_000, 100.0, 101.0, 99.0, 100.0, 5.0))
            .collect()
    }

    #[test]
    fn feature_row_has_expected_length() {
        let history = flat_history(200);
        let row = feature_row(&history, 150);
        assert_eq!(row.len(), FEATURE_LEN);
    }

    #[test]
    fn scaler_round_trips_into_unit_interval() {
        let rows = vec![vec![0.0, 10.0], vec![5.0, 20.0], vec![10.0, 30.0]];
        let scaler = Scaler { min: vec![0.0, 10.0], max: vec![10.0, 30.0] };
        for row in &rows {
            let t = scaler.transform(row);
            assert!(t.iter().all(|&v| (0.0..=1.0).contains(&v)));
        }
    }

    #[test]
    fn targets_none_past_available_history() {
        let history = flat_history(10);
        assert!(targets(&history, 9, 60).is_none());
    }
}
