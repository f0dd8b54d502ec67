//! Model artifact domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use crate::domain::config::TrainingConfig;
use crate::domain::features::{CLASS_COUNT, FEATURE_COUNT};

/// Epochs without validation-loss improvement before training stops
pub const EARLY_STOPPING_PATIENCE: usize = 10;

/// Activation applied after a dense layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    Relu,
    Softmax,
}

/// One layer of the architecture descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LayerSpec {
    Dense { units: usize, activation: Activation },
    Dropout { rate: f64 },
}

/// Network shape stored alongside every artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Architecture {
    pub input_size: usize,
    pub layers: Vec<LayerSpec>,
}

impl Architecture {
    /// The severity classifier every retraining run produces
    ///
    /// Dense 64 (ReLU) → Dropout 0.2 → Dense 32 (ReLU) → Dropout 0.2 →
    /// Dense 4 (softmax).
    pub fn severity_classifier() -> Self {
        Self {
            input_size: FEATURE_COUNT,
            layers: vec![
                LayerSpec::Dense {
                    units: 64,
                    activation: Activation::Relu,
                },
                LayerSpec::Dropout { rate: 0.2 },
                LayerSpec::Dense {
                    units: 32,
                    activation: Activation::Relu,
                },
                LayerSpec::Dropout { rate: 0.2 },
                LayerSpec::Dense {
                    units: CLASS_COUNT,
                    activation: Activation::Softmax,
                },
            ],
        }
    }

    /// Width of the last dense layer
    pub fn output_size(&self) -> usize {
        self.layers
            .iter()
            .rev()
            .find_map(|layer| match layer {
                LayerSpec::Dense { units, .. } => Some(*units),
                LayerSpec::Dropout { .. } => None,
            })
            .unwrap_or(self.input_size)
    }
}

/// Accuracy and loss of a fitted model on some dataset
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub accuracy: f64,
    pub loss: f64,
}

impl Evaluation {
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.accuracy) {
            return Err(format!("accuracy {} is outside [0, 1]", self.accuracy));
        }
        if !self.loss.is_finite() || self.loss < 0.0 {
            return Err(format!("loss {} is not a finite non-negative number", self.loss));
        }
        Ok(())
    }
}

/// Opaque identifier of a registered artifact
///
/// Issued as the registration time in epoch milliseconds, bumped when needed
/// so it stays strictly increasing per model name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelVersion(String);

impl ModelVersion {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Next version after `previous`, preferring `now_millis`
    pub fn issue(now_millis: i64, previous: Option<&ModelVersion>) -> Self {
        let floor = previous
            .and_then(ModelVersion::sequence)
            .map(|seq| seq.saturating_add(1))
            .unwrap_or(i64::MIN);
        Self(now_millis.max(floor).to_string())
    }

    /// Numeric value for versions issued by `issue`
    pub fn sequence(&self) -> Option<i64> {
        self.0.parse().ok()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Ord for ModelVersion {
    /// Numeric order for issued versions, text order otherwise
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.sequence(), other.sequence()) {
            (Some(a), Some(b)) => a.cmp(&b).then_with(|| self.0.cmp(&other.0)),
            _ => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for ModelVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ModelVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How a fit went, recorded next to the weights
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingSummary {
    pub epochs_run: u32,
    pub stopped_early: bool,
    pub final_train_loss: f64,
    pub best_validation_loss: Option<f64>,
}

/// Trained model as produced by a `Trainer`
///
/// `payload` is backend-defined; only the backend that produced it knows how
/// to read it back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelArtifact {
    pub architecture: Architecture,
    pub training_config: TrainingConfig,
    pub summary: TrainingSummary,
    pub payload: serde_json::Value,
}

/// Artifact plus metadata as persisted by the model registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredModel {
    pub model_name: String,
    pub version: ModelVersion,
    pub artifact: ModelArtifact,
    pub evaluation: Evaluation,
    pub registered_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_classifier_shape() {
        let arch = Architecture::severity_classifier();
        assert_eq!(arch.input_size, 3);
        assert_eq!(arch.output_size(), 4);
        assert_eq!(arch.layers.len(), 5);
        assert_eq!(arch.layers[1], LayerSpec::Dropout { rate: 0.2 });
    }

    #[test]
    fn test_version_issue_is_strictly_increasing() {
        let first = ModelVersion::issue(1_000, None);
        assert_eq!(first.as_str(), "1000");

        // Clock did not move (or went backwards)
        let second = ModelVersion::issue(1_000, Some(&first));
        assert_eq!(second.sequence(), Some(1_001));
        let third = ModelVersion::issue(900, Some(&second));
        assert_eq!(third.sequence(), Some(1_002));

        let later = ModelVersion::issue(5_000, Some(&third));
        assert_eq!(later.as_str(), "5000");
    }

    #[test]
    fn test_versions_order_numerically() {
        let mut versions = vec![
            ModelVersion::new("1000"),
            ModelVersion::new("999"),
            ModelVersion::new("1001"),
        ];
        versions.sort();
        assert_eq!(versions[0].as_str(), "999");
        assert_eq!(versions[2].as_str(), "1001");
    }

    #[test]
    fn test_evaluation_validation() {
        assert!(Evaluation { accuracy: 0.5, loss: 1.2 }.validate().is_ok());
        assert!(Evaluation { accuracy: 1.5, loss: 1.2 }.validate().is_err());
        assert!(Evaluation { accuracy: 0.5, loss: -0.1 }.validate().is_err());
        assert!(Evaluation { accuracy: 0.5, loss: f64::INFINITY }.validate().is_err());
    }

    #[test]
    fn test_layer_spec_json_shape() {
        let json = serde_json::to_value(LayerSpec::Dense {
            units: 64,
            activation: Activation::Relu,
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"type": "dense", "units": 64, "activation": "relu"}));
    }
}
