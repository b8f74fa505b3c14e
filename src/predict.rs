//! Equipment failure prediction.
//!
//! Two strategies sit behind [`FailurePredictor`]:
//!
//! - [`ModelPredictor`]: a trained logistic model loaded from a JSON
//!   artifact (`predictor.model_path`):
//!
//!   ```json
//!   { "intercept": -4.2,
//!     "weights":  { "temperature": 0.04, "vibration": 3.1 },
//!     "defaults": { "temperature": 70.0 } }
//!   ```
//!
//!   `p = sigmoid(intercept + Σ weight·value)`; a feature missing from the
//!   readings takes its `defaults` entry, else `0`.
//!
//! - [`HeuristicPredictor`]: `0.1 + 0.005·temperature + 0.5·vibration`
//!   with temperature defaulting to 70 and vibration to 0.
//!
//! Either way the result is a probability in `[0, 1]`; a NaN result is
//! reported as `0`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::config::PredictorConfig;
use crate::models::SensorReadings;

pub trait FailurePredictor: Send + Sync {
    fn name(&self) -> &str;
    /// Failure probability in `[0, 1]`.
    fn predict(&self, readings: &SensorReadings) -> f64;
}

fn to_probability(p: f64) -> f64 {
    if p.is_nan() {
        0.0
    } else {
        p.clamp(0.0, 1.0)
    }
}

pub struct HeuristicPredictor;

impl FailurePredictor for HeuristicPredictor {
    fn name(&self) -> &str {
        "heuristic"
    }

    fn predict(&self, readings: &SensorReadings) -> f64 {
        let temperature = readings.get("temperature").copied().unwrap_or(70.0);
        let vibration = readings.get("vibration").copied().unwrap_or(0.0);
        to_probability(0.1 + 0.005 * temperature + 0.5 * vibration)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelPredictor {
    pub intercept: f64,
    pub weights: BTreeMap<String, f64>,
    #[serde(default)]
    pub defaults: BTreeMap<String, f64>,
}

impl ModelPredictor {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read model artifact: {}", path.display()))?;
        let model: ModelPredictor = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse model artifact: {}", path.display()))?;
        Ok(model)
    }
}

impl FailurePredictor for ModelPredictor {
    fn name(&self) -> &str {
        "model"
    }

    fn predict(&self, readings: &SensorReadings) -> f64 {
        let z = self.weights.iter().fold(self.intercept, |acc, (feature, w)| {
            let x = readings
                .get(feature)
                .or_else(|| self.defaults.get(feature))
                .copied()
                .unwrap_or(0.0);
            acc + w * x
        });
        to_probability(1.0 / (1.0 + (-z).exp()))
    }
}

/// Model artifact when present and valid, heuristic otherwise.
pub fn load_predictor(config: &PredictorConfig) -> Arc<dyn FailurePredictor> {
    if !config.model_path.exists() {
        return Arc::new(HeuristicPredictor);
    }
    match ModelPredictor::load(&config.model_path) {
        Ok(model) => {
            tracing::info!(path = %config.model_path.display(), "loaded failure model");
            Arc::new(model)
        }
        Err(e) => {
            tracing::warn!(error = %format!("{:#}", e), "using heuristic failure predictor");
            Arc::new(HeuristicPredictor)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn readings(pairs: &[(&str, f64)]) -> SensorReadings {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn heuristic_matches_formula() {
        let p =
            HeuristicPredictor.predict(&readings(&[("temperature", 72.0), ("vibration", 0.21)]));
        assert!((p - (0.1 + 0.36 + 0.105)).abs() < 1e-9);
    }

    #[test]
    fn heuristic_defaults() {
        let p = HeuristicPredictor.predict(&SensorReadings::new());
        assert!((p - 0.45).abs() < 1e-9);
    }

    #[test]
    fn heuristic_is_clamped() {
        let hot = readings(&[("temperature", 1e9), ("vibration", 1e9)]);
        let cold = readings(&[("temperature", -1e9), ("vibration", -5.0)]);
        assert_eq!(HeuristicPredictor.predict(&hot), 1.0);
        assert_eq!(HeuristicPredictor.predict(&cold), 0.0);
        let inf = readings(&[("temperature", f64::INFINITY), ("vibration", f64::NEG_INFINITY)]);
        assert_eq!(HeuristicPredictor.predict(&inf), 0.0);
        let nan = readings(&[("temperature", f64::NAN)]);
        assert_eq!(HeuristicPredictor.predict(&nan), 0.0);
    }

    #[test]
    fn model_is_logistic_and_clamped() {
        let model: ModelPredictor = serde_json::from_str(
            r#"{"intercept": 0.0, "weights": {"vibration": 10.0}, "defaults": {"vibration": 0.0}}"#,
        )
        .unwrap();
        assert!((model.predict(&SensorReadings::new()) - 0.5).abs() < 1e-9);
        let p = model.predict(&readings(&[("vibration", 1e6)]));
        assert!((0.0..=1.0).contains(&p));
        assert!(p > 0.99);
    }

    #[test]
    fn load_predictor_falls_back_to_heuristic() {
        let tmp = tempfile::tempdir().unwrap();
        let missing = PredictorConfig {
            model_path: tmp.path().join("none.json"),
        };
        assert_eq!(load_predictor(&missing).name(), "heuristic");

        let broken = tmp.path().join("broken.json");
        std::fs::write(&broken, "{not json").unwrap();
        assert_eq!(
            load_predictor(&PredictorConfig { model_path: broken }).name(),
            "heuristic"
        );

        let good = tmp.path().join("model.json");
        std::fs::write(&good, r#"{"intercept": -1.0, "weights": {"temperature": 0.01}}"#).unwrap();
        assert_eq!(load_predictor(&PredictorConfig { model_path: good }).name(), "model");
    }
}
