/// Model lifecycle: train, persist, load, and predict one horizon-
/// specialized model bundle per symbol per UTC day. Uses `smartcore` for
/// the regressors, `ndarray` for feature-matrix assembly, and `bincode`
/// for the on-disk bundle.
use super::features::{feature_row, targets, Scaler};
use super::horizons::{training_window_minutes, HORIZONS};
use crate::error::{AppError, AppResult};
use crate::types::Candle;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use smartcore::linalg::basic::matrix::DenseMatrix;
use smartcore::linear::linear_regression::{LinearRegression, LinearRegressionParameters};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

type Regressor = LinearRegression<f64, f64, DenseMatrix<f64>, Vec<f64>>;

/// One horizon's fitted regressors (close/high/low delta + volume) and the
/// feature scaler they were trained against.
#[derive(Serialize, Deserialize)]
pub struct HorizonModel {
    scaler: Scaler,
    close_delta: Regressor,
    high_delta: Regressor,
    low_delta: Regressor,
    volume: Regressor,
}

/// A (close_delta, high_delta, low_delta, volume) inference.
pub struct HorizonPrediction {
    pub close_delta: f64,
    pub high_delta: f64,
    pub low_delta: f64,
    pub volume: f64,
}

impl HorizonModel {
    fn train(history: &[Candle], window_start: usize, window_len: usize, horizon: u32) -> AppResult<Self> {
        let window_end = window_start + window_len;
        let mut raw_rows = Vec::new();
        let mut close_y = Vec::new();
        let mut high_y = Vec::new();
        let mut low_y = Vec::new();
        let mut volume_y = Vec::new();

        for t in window_start..window_end {
            let Some((cd, hd, ld, vol)) = targets(history, t, horizon) else {
                continue;
            };
            raw_rows.push(feature_row(history, t));
            close_y.push(cd);
            high_y.push(hd);
            low_y.push(ld);
            volume_y.push(vol);
        }

        if raw_rows.len() != window_len {
            return Err(AppError::InsufficientData {
                horizon,
                needed: window_len,
                available: raw_rows.len(),
            });
        }

        let scaler = Scaler::fit(&raw_rows);
        let normalized: Vec<Vec<f64>> = raw_rows.iter().map(|r| scaler.transform(r)).collect();
        let x = DenseMatrix::from_2d_vec(&normalized)
            .map_err(|e| AppError::ModelArtifact(format!("feature matrix build failed: {e}")))?;

        let params = LinearRegressionParameters::default();
        let fit = |y: &Vec<f64>| -> AppResult<Regressor> {
            Regressor::fit(&x, y, params.clone())
                .map_err(|e| AppError::ModelArtifact(format!("fit failed for horizon {horizon}: {e}")))
        };

        Ok(HorizonModel {
            scaler,
            close_delta: fit(&close_y)?,
            high_delta: fit(&high_y)?,
            low_delta: fit(&low_y)?,
            volume: fit(&volume_y)?,
        })
    }

    pub fn predict(&self, raw_row: &[f64]) -> AppResult<HorizonPrediction> {
        let normalized = self.scaler.transform(raw_row);
        let x = DenseMatrix::from_2d_vec(&vec![normalized])
            .map_err(|e| AppError::ModelArtifact(format!("inference matrix build failed: {e}")))?;

        let predict_one = |m: &Regressor| -> AppResult<f64> {
            let out = m
                .predict(&x)
                .map_err(|e| AppError::ModelArtifact(format!("predict failed: {e}")))?;
            Ok(out[0])
        };

        Ok(HorizonPrediction {
            close_delta: predict_one(&self.close_delta)?,
            high_delta: predict_one(&self.high_delta)?,
            low_delta: predict_one(&self.low_delta)?,
            volume: predict_one(&self.volume)?.max(0.0),
        })
    }
}

/// The full per-symbol set of 12 horizon models, tagged with the UTC date
/// they were trained on. Valid for exactly that calendar day.
#[derive(Serialize, Deserialize)]
pub struct ModelSet {
    pub date_tag: String,
    horizons: HashMap<u32, HorizonModel>,
}

impl ModelSet {
    pub fn train(history: &[Candle], reference_boundary_idx: usize, date_tag: NaiveDate) -> AppResult<Self> {
        let mut horizons = HashMap::with_capacity(HORIZONS.len());
        for h in HORIZONS {
            let window_len = training_window_minutes(h);
            if reference_boundary_idx < window_len {
                return Err(AppError::InsufficientData {
                    horizon: h,
                    needed: window_len,
                    available: reference_boundary_idx,
                });
            }
            let window_start = reference_boundary_idx - window_len;
            horizons.insert(h, HorizonModel::train(history, window_start, window_len, h)?);
        }

        Ok(ModelSet {
            date_tag: date_tag.format("%Y%m%d").to_string(),
            horizons,
        })
    }

    pub fn model_for(&self, horizon: u32) -> AppResult<&HorizonModel> {
        self.horizons
            .get(&horizon)
            .ok_or_else(|| AppError::ModelArtifact(format!("missing model for horizon {horizon}")))
    }
}

/// File names encode only the date — never the hour — so that
/// date-equality alone determines validity. The twelve horizon models for
/// one symbol and one UTC day are bundled into a single bincode file (see
/// `ModelSet`); its name still carries only the symbol and the date,
/// nothing finer-grained.
fn symbol_date_path(models_dir: &str, symbol: &str, date_tag: &str) -> PathBuf {
    Path::new(models_dir).join(format!("{}_{date_tag}.bin", symbol.to_lowercase()))
}

fn glob_prefix(symbol: &str) -> String {
    format!("{}_", symbol.to_lowercase())
}

/// Loads the set persisted for `symbol` on `date`, if a file with that
/// exact name exists and decodes. A malformed or missing file is treated
/// as "no valid set" rather than a hard failure — the caller falls back
/// to training a fresh one. Because the filename itself encodes the
/// date, a set for any other day is invisible to this lookup without
/// needing to inspect `ModelSet::date_tag` at all.
pub fn load(models_dir: &str, symbol: &str, date: NaiveDate) -> Option<ModelSet> {
    let date_tag = date.format("%Y%m%d").to_string();
    let path = symbol_date_path(models_dir, symbol, &date_tag);
    let bytes = std::fs::read(&path).ok()?;
    bincode::deserialize(&bytes).ok()
}

/// Persists `set` for `symbol`, writing to a sibling temp file first and
/// renaming into place so concurrent readers never observe a partial
/// write — the same atomic-swap idiom used by on-disk caches elsewhere in
/// the pack.
pub fn save_atomic(models_dir: &str, symbol: &str, set: &ModelSet) -> AppResult<()> {
    std::fs::create_dir_all(models_dir)?;
    let final_path = symbol_date_path(models_dir, symbol, &set.date_tag);
    let tmp_path = final_path.with_extension("bin.tmp");

    let bytes = bincode::serialize(set)
        .map_err(|e| AppError::ModelArtifact(format!("serialize failed: {e}")))?;
    std::fs::write(&tmp_path, bytes)?;
    std::fs::rename(&tmp_path, &final_path)?;
    Ok(())
}

/// Removes every model file for `symbol` regardless of its date tag —
/// called once a day's lookup (`load`) has come back empty, at which
/// point any file still on disk for this symbol is from a prior UTC day
/// and must go before training a fresh set. Best-effort: a directory
/// that doesn't exist yet yields no entries, not an error.
pub fn delete_stale(models_dir: &str, symbol: &str) -> AppResult<()> {
    let prefix = glob_prefix(symbol);
    let entries = match std::fs::read_dir(models_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(AppError::Io(e)),
    };
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name.starts_with(&prefix) && name.ends_with(".bin") {
            std::fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_models_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("candle_forecast_test_models_{tag}_{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn load_misses_a_file_tagged_with_a_different_date() {
        let dir = temp_models_dir("load_miss");
        let dir_str = dir.to_str().unwrap();
        let path = symbol_date_path(dir_str, "BTCUSDT", "20260101");
        std::fs::write(&path, b"not a real bundle, just needs to exist").unwrap();

        let today = NaiveDate::from_ymd_opt(2026, 1, 2).unwrap();
        assert!(load(dir_str, "BTCUSDT", today).is_none());
    }

    #[test]
    fn delete_stale_only_removes_matching_symbol_prefix() {
        let dir = temp_models_dir("delete_stale");
        let dir_str = dir.to_str().unwrap();
        let btc_old = symbol_date_path(dir_str, "BTCUSDT", "20251231");
        let eth = symbol_date_path(dir_str, "ETHUSDT", "20251231");
        std::fs::write(&btc_old, b"x").unwrap();
        std::fs::write(&eth, b"x").unwrap();

        delete_stale(dir_str, "BTCUSDT").unwrap();

        assert!(!btc_old.exists());
        assert!(eth.exists());
    }
}
