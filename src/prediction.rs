//! Drive time and battery usage predictions.
//!
//! Two independent regression models take the same two features, the
//! map-estimated distance (km) and the map-estimated duration (minutes):
//! - the time model predicts the actual drive time in minutes
//! - the battery model predicts the battery percentage consumed
//!
//! Models are plain linear regressions stored as JSON artifacts:
//! ```text
//! {models_dir}/
//! ├── actual_time_drive_model.json
//! └── battery_usage_model.json
//! ```
//! They can be refitted from the trip history with ordinary least squares.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::analytics::AnalyticsRecord;
use crate::store::write_atomic;

pub const TIME_MODEL_FILE: &str = "actual_time_drive_model.json";
pub const BATTERY_MODEL_FILE: &str = "battery_usage_model.json";

/// Minimum number of trips needed to fit a model
pub const MIN_TRAINING_SAMPLES: usize = 3;

#[derive(Error, Debug)]
pub enum PredictionError {
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Model produced a non-finite prediction")]
    InvalidOutput,

    #[error("Not enough training data ({0} trips, need at least {})", MIN_TRAINING_SAMPLES)]
    InsufficientData(usize),

    #[error("Training data is degenerate (features are collinear)")]
    Singular,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Anything that maps (distance km, estimated minutes) to a single value
pub trait Predictor {
    fn predict(&self, distance_km: f64, estimated_minutes: f64) -> Result<f64, PredictionError>;
}

/// `y = intercept + c0 * distance_km + c1 * estimated_minutes`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    pub intercept: f64,
    pub coefficients: [f64; 2],
}

impl LinearModel {
    pub fn load(path: &Path) -> Result<Self, PredictionError> {
        let contents = fs::read_to_string(path)?;
        let model: LinearModel = serde_json::from_str(&contents)?;
        if !model.intercept.is_finite() || !model.coefficients.iter().all(|c| c.is_finite()) {
            return Err(PredictionError::ModelUnavailable(format!(
                "{:?} contains non-finite parameters",
                path
            )));
        }
        Ok(model)
    }

    pub fn save(&self, path: &Path) -> Result<(), PredictionError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(self)?;
        write_atomic(path, &json)?;
        Ok(())
    }

    /// Ordinary least squares fit over `[distance_km, estimated_minutes]` rows.
    pub fn fit(features: &[[f64; 2]], targets: &[f64]) -> Result<Self, PredictionError> {
        if features.len() != targets.len() {
            return Err(PredictionError::InvalidInput(format!(
                "{} feature rows but {} targets",
                features.len(),
                targets.len()
            )));
        }
        if features.len() < MIN_TRAINING_SAMPLES {
            return Err(PredictionError::InsufficientData(features.len()));
        }

        // Normal equations (XᵀX) β = Xᵀy with a leading bias column
        let mut xtx = [[0.0f64; 3]; 3];
        let mut xty = [0.0f64; 3];
        for (row, &y) in features.iter().zip(targets) {
            let x = [1.0, row[0], row[1]];
            for i in 0..3 {
                xty[i] += x[i] * y;
                for j in 0..3 {
                    xtx[i][j] += x[i] * x[j];
                }
            }
        }

        let beta = solve3(xtx, xty).ok_or(PredictionError::Singular)?;
        Ok(Self {
            intercept: beta[0],
            coefficients: [beta[1], beta[2]],
        })
    }
}

impl Predictor for LinearModel {
    fn predict(&self, distance_km: f64, estimated_minutes: f64) -> Result<f64, PredictionError> {
        check_input("distance", distance_km)?;
        check_input("estimated time", estimated_minutes)?;

        let value = self.intercept
            + self.coefficients[0] * distance_km
            + self.coefficients[1] * estimated_minutes;
        if value.is_finite() {
            Ok(value)
        } else {
            Err(PredictionError::InvalidOutput)
        }
    }
}

fn check_input(name: &str, value: f64) -> Result<(), PredictionError> {
    if !value.is_finite() || value < 0.0 {
        return Err(PredictionError::InvalidInput(format!(
            "{} must be a non-negative number (got {})",
            name, value
        )));
    }
    Ok(())
}

/// Gaussian elimination with partial pivoting on a 3x3 system.
fn solve3(mut a: [[f64; 3]; 3], mut b: [f64; 3]) -> Option<[f64; 3]> {
    let scale = a
        .iter()
        .flat_map(|row| row.iter())
        .fold(0.0f64, |acc, v| acc.max(v.abs()))
        .max(1.0);

    for col in 0..3 {
        let pivot = (col..3).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot][col].abs() <= scale * 1e-12 {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);

        for row in col + 1..3 {
            let factor = a[row][col] / a[col][col];
            for k in col..3 {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = [0.0f64; 3];
    for row in (0..3).rev() {
        let tail: f64 = (row + 1..3).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    Some(x)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimePrediction {
    pub predicted_minutes: f64,
    /// Predicted minus estimated minutes
    pub delta_vs_estimate_min: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatteryPrediction {
    /// Clamped to 0..=100
    pub predicted_percent: f64,
    /// km per 1% battery; only when some battery use is predicted
    pub predicted_km_per_battery_pct: Option<f64>,
}

/// Both predictions for a planned journey. `None` means no prediction is
/// available; the reason is listed in `unavailable`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JourneyPrediction {
    pub time: Option<TimePrediction>,
    pub battery: Option<BatteryPrediction>,
    pub unavailable: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingSummary {
    pub sample_count: usize,
    pub time_model: LinearModel,
    pub battery_model: LinearModel,
}

/// Loads both models from a directory and serves predictions.
///
/// A missing or unreadable model only disables its own prediction.
pub struct PredictionService {
    models_dir: PathBuf,
    time_model: Option<LinearModel>,
    battery_model: Option<LinearModel>,
}

impl PredictionService {
    pub fn load(models_dir: &Path) -> Self {
        let time_model = Self::load_model(&models_dir.join(TIME_MODEL_FILE));
        let battery_model = Self::load_model(&models_dir.join(BATTERY_MODEL_FILE));
        log::info!(
            "Prediction models from {:?}: time={}, battery={}",
            models_dir,
            if time_model.is_some() { "loaded" } else { "unavailable" },
            if battery_model.is_some() { "loaded" } else { "unavailable" }
        );
        Self {
            models_dir: models_dir.to_path_buf(),
            time_model,
            battery_model,
        }
    }

    fn load_model(path: &Path) -> Option<LinearModel> {
        match LinearModel::load(path) {
            Ok(model) => Some(model),
            Err(PredictionError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
                log::debug!("No model at {:?}", path);
                None
            }
            Err(e) => {
                log::warn!("Error loading model {:?}: {}", path, e);
                None
            }
        }
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// Predicted actual drive time in minutes
    pub fn predict_time(&self, distance_km: f64, estimated_minutes: f64) -> Result<f64, PredictionError> {
        let model = self
            .time_model
            .as_ref()
            .ok_or_else(|| PredictionError::ModelUnavailable(TIME_MODEL_FILE.to_string()))?;
        model.predict(distance_km, estimated_minutes)
    }

    /// Predicted battery consumption in percent, clamped to 0..=100
    pub fn predict_battery(&self, distance_km: f64, estimated_minutes: f64) -> Result<f64, PredictionError> {
        let model = self
            .battery_model
            .as_ref()
            .ok_or_else(|| PredictionError::ModelUnavailable(BATTERY_MODEL_FILE.to_string()))?;
        Ok(model.predict(distance_km, estimated_minutes)?.clamp(0.0, 100.0))
    }

    pub fn predict_journey(&self, distance_km: f64, estimated_minutes: f64) -> JourneyPrediction {
        let mut unavailable = Vec::new();

        let time = match self.predict_time(distance_km, estimated_minutes) {
            Ok(minutes) => Some(TimePrediction {
                predicted_minutes: minutes,
                delta_vs_estimate_min: minutes - estimated_minutes,
            }),
            Err(e) => {
                log::warn!("Time prediction error: {}", e);
                unavailable.push(format!("Time prediction: {}", e));
                None
            }
        };

        let battery = match self.predict_battery(distance_km, estimated_minutes) {
            Ok(percent) => Some(BatteryPrediction {
                predicted_percent: percent,
                predicted_km_per_battery_pct: (percent > 0.0).then(|| distance_km / percent),
            }),
            Err(e) => {
                log::warn!("Battery prediction error: {}", e);
                unavailable.push(format!("Battery prediction: {}", e));
                None
            }
        };

        JourneyPrediction {
            time,
            battery,
            unavailable,
        }
    }

    /// Refit both models from valid trips, save them and start using them.
    pub fn train(&mut self, records: &[AnalyticsRecord]) -> Result<TrainingSummary, PredictionError> {
        let features: Vec<[f64; 2]> = records
            .iter()
            .map(|r| [r.trip.planned_distance_km, r.trip.planned_duration_min])
            .collect();
        let durations: Vec<f64> = records.iter().map(|r| r.actual_duration_min).collect();
        let battery: Vec<f64> = records.iter().map(|r| f64::from(r.battery_used)).collect();

        let time_model = LinearModel::fit(&features, &durations)?;
        let battery_model = LinearModel::fit(&features, &battery)?;

        time_model.save(&self.models_dir.join(TIME_MODEL_FILE))?;
        battery_model.save(&self.models_dir.join(BATTERY_MODEL_FILE))?;
        log::info!("Trained prediction models on {} trips", records.len());

        self.time_model = Some(time_model.clone());
        self.battery_model = Some(battery_model.clone());

        Ok(TrainingSummary {
            sample_count: records.len(),
            time_model,
            battery_model,
        })
    }
}
