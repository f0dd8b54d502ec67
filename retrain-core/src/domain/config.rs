//! Training configuration carried by every job

use serde::{Deserialize, Serialize};

pub const DEFAULT_EPOCHS: u32 = 100;
pub const DEFAULT_BATCH_SIZE: u32 = 32;
pub const DEFAULT_LEARNING_RATE: f64 = 0.001;
pub const DEFAULT_VALIDATION_SPLIT: f64 = 0.2;

/// Hyperparameters for one retraining attempt
///
/// Fields missing from a stored record fall back to their defaults one by one,
/// so a job created with `{ "epochs": 20 }` still trains with batch size 32.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingConfig {
    #[serde(default = "default_epochs")]
    pub epochs: u32,
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    #[serde(default = "default_validation_split")]
    pub validation_split: f64,
}

impl TrainingConfig {
    /// Checks the ranges the trainer relies on
    pub fn validate(&self) -> Result<(), String> {
        if self.epochs == 0 {
            return Err("epochs must be greater than 0".to_string());
        }
        if self.batch_size == 0 {
            return Err("batchSize must be greater than 0".to_string());
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(format!(
                "learningRate must be a positive number (got {})",
                self.learning_rate
            ));
        }
        if !(0.0..1.0).contains(&self.validation_split) {
            return Err(format!(
                "validationSplit must be in [0, 1) (got {})",
                self.validation_split
            ));
        }
        Ok(())
    }
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: DEFAULT_EPOCHS,
            batch_size: DEFAULT_BATCH_SIZE,
            learning_rate: DEFAULT_LEARNING_RATE,
            validation_split: DEFAULT_VALIDATION_SPLIT,
        }
    }
}

fn default_epochs() -> u32 {
    DEFAULT_EPOCHS
}

fn default_batch_size() -> u32 {
    DEFAULT_BATCH_SIZE
}

fn default_learning_rate() -> f64 {
    DEFAULT_LEARNING_RATE
}

fn default_validation_split() -> f64 {
    DEFAULT_VALIDATION_SPLIT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = TrainingConfig::default();
        assert_eq!(config.epochs, 100);
        assert_eq!(config.batch_size, 32);
        assert_eq!(config.learning_rate, 0.001);
        assert_eq!(config.validation_split, 0.2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let config: TrainingConfig = serde_json::from_str(r#"{"epochs": 20}"#).unwrap();
        assert_eq!(config.epochs, 20);
        assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(config.validation_split, DEFAULT_VALIDATION_SPLIT);
    }

    #[test]
    fn test_config_validation() {
        let mut config = TrainingConfig::default();

        config.epochs = 0;
        assert!(config.validate().is_err());
        config.epochs = 10;

        config.learning_rate = f64::NAN;
        assert!(config.validate().is_err());
        config.learning_rate = 0.01;

        config.validation_split = 1.0;
        assert!(config.validate().is_err());

        config.validation_split = 0.0;
        assert!(config.validate().is_ok());
    }
}
