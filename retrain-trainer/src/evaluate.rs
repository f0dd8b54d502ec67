use retrain_core::capability::{CapabilityError, Evaluator};
use retrain_core::domain::features::{FEATURE_COUNT, FeatureSet};
use retrain_core::domain::model::{Evaluation, ModelArtifact};

use crate::loss::{argmax, cross_entropy};
use crate::network::Network;

/// Scores artifacts produced by [`crate::MlpTrainer`]
#[derive(Debug, Clone, Copy, Default)]
pub struct MlpEvaluator;

impl Evaluator for MlpEvaluator {
    fn evaluate(
        &self,
        artifact: &ModelArtifact,
        data: &FeatureSet,
    ) -> Result<Evaluation, CapabilityError> {
        if data.is_empty() {
            return Err(CapabilityError::InsufficientData(
                "no examples to evaluate on".to_string(),
            ));
        }

        let network: Network = serde_json::from_value(artifact.payload.clone())
            .map_err(|e| CapabilityError::InvalidArtifact(e.to_string()))?;
        network.validate()?;

        if network.input_size != FEATURE_COUNT {
            return Err(CapabilityError::InvalidArtifact(format!(
                "network expects {} features, dataset has {}",
                network.input_size, FEATURE_COUNT
            )));
        }

        let (loss, accuracy) = score(&network, data);
        Ok(Evaluation { accuracy, loss })
    }
}

/// Mean cross-entropy and accuracy over `data`, without dropout
pub(crate) fn score(network: &Network, data: &FeatureSet) -> (f64, f64) {
    if data.is_empty() {
        return (0.0, 0.0);
    }

    let mut total_loss = 0.0;
    let mut correct = 0usize;
    for (features, label) in data.iter() {
        let probs = network.predict(features);
        total_loss += cross_entropy(&probs, label);
        if argmax(&probs) == label {
            correct += 1;
        }
    }

    let n = data.len() as f64;
    (total_loss / n, correct as f64 / n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fit::MlpTrainer;
    use retrain_core::capability::Trainer;
    use retrain_core::domain::config::TrainingConfig;
    use std::sync::atomic::AtomicBool;

    fn fitted(data: &FeatureSet) -> ModelArtifact {
        let config = TrainingConfig {
            epochs: 3,
            batch_size: 4,
            learning_rate: 0.001,
            validation_split: 0.0,
        };
        MlpTrainer::new()
            .with_seed(1)
            .fit(data, &config, &AtomicBool::new(false))
            .unwrap()
    }

    fn data() -> FeatureSet {
        let mut set = FeatureSet::default();
        for i in 0..12 {
            set.push([i as f64 / 12.0, 0.5, 2.0 / 24.0], i % 4);
        }
        set
    }

    #[test]
    fn test_metrics_are_in_range() {
        let data = data();
        let evaluation = MlpEvaluator.evaluate(&fitted(&data), &data).unwrap();
        assert!((0.0..=1.0).contains(&evaluation.accuracy));
        assert!(evaluation.loss.is_finite() && evaluation.loss >= 0.0);
        assert!(evaluation.validate().is_ok());
    }

    #[test]
    fn test_evaluation_is_deterministic() {
        let data = data();
        let artifact = fitted(&data);
        let first = MlpEvaluator.evaluate(&artifact, &data).unwrap();
        let second = MlpEvaluator.evaluate(&artifact, &data).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_rejects_foreign_payload() {
        let data = data();
        let mut artifact = fitted(&data);
        artifact.payload = serde_json::json!({"weights": "not ours"});
        let err = MlpEvaluator.evaluate(&artifact, &data).unwrap_err();
        assert!(matches!(err, CapabilityError::InvalidArtifact(_)));
    }

    #[test]
    fn test_empty_evaluation_set() {
        let data = data();
        let err = MlpEvaluator
            .evaluate(&fitted(&data), &FeatureSet::default())
            .unwrap_err();
        assert!(matches!(err, CapabilityError::InsufficientData(_)));
    }
}
