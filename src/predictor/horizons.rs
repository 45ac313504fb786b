/// Horizon catalogue: training window sizes and the partition of a
/// predicted hour's 60 minutes across horizon-specialized models.
pub const HORIZONS: [u32; 12] = [1, 2, 3, 4, 5, 6, 10, 12, 15, 20, 30, 60];

pub const RESAMPLE_BUCKETS: [u32; 11] = [2, 3, 4, 5, 6, 10, 12, 15, 20, 30, 60];

/// Raw OHLCV (5) + 11 resampled buckets x 5 aggregate fields each.
pub const FEATURE_LEN: usize = 5 + RESAMPLE_BUCKETS.len() * 5;

/// Training window size W(h), in minutes.
pub fn training_window_minutes(horizon: u32) -> usize {
    match horizon {
        1..=6 => 2880,
        10 | 12 | 15 => 4320,
        20 | 30 => 5760,
        60 => 8640,
        other => panic!("unknown horizon {other}"),
    }
}

/// The half-open interval of future minutes, `[start, end)`, that horizon
/// `h` is responsible for predicting within the hour block.
pub fn horizon_interval(horizon: u32) -> (u32, u32) {
    match horizon {
        1 => (0, 1),
        2 => (1, 2),
        3 => (2, 3),
        4 => (3, 4),
        5 => (4, 5),
        6 => (5, 6),
        10 => (6, 10),
        12 => (10, 12),
        15 => (12, 15),
        20 => (15, 20),
        30 => (20, 30),
        60 => (30, 60),
        other => panic!("unknown horizon {other}"),
    }
}

/// The horizon responsible for predicting minute offset `k` (0..=59) of an
/// hour block.
pub fn horizon_for_offset(k: u32) -> u32 {
    HORIZONS
        .iter()
        .copied()
        .find(|&h| {
            let (start, end) = horizon_interval(h);
            k >= start && k < end
        })
        .unwrap_or_else(|| panic!("minute offset {k} not covered by any horizon"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_covers_every_minute_exactly_once() {
        let mut covered = [0u32; 60];
        for h in HORIZONS {
            let (start, end) = horizon_interval(h);
            for m in start..end {
                covered[m as usize] += 1;
            }
        }
        assert!(covered.iter().all(|&c| c == 1), "{covered:?}");
    }

    #[test]
    fn horizon_for_offset_matches_partition() {
        for k in 0..60 {
            let h = horizon_for_offset(k);
            let (start, end) = horizon_interval(h);
            assert!(k >= start && k < end);
        }
    }
}
