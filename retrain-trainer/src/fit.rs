use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use retrain_core::capability::{CapabilityError, Trainer};
use retrain_core::domain::config::TrainingConfig;
use retrain_core::domain::features::FeatureSet;
use retrain_core::domain::model::{
    Architecture, EARLY_STOPPING_PATIENCE, ModelArtifact, TrainingSummary,
};
use tracing::{debug, info};

use crate::early_stopping::EarlyStopping;
use crate::evaluate::score;
use crate::loss::cross_entropy;
use crate::network::{Gradients, Network};
use crate::optim::Adam;

/// Mini-batch Adam trainer for the dense severity classifier
///
/// The trailing `validationSplit` fraction of the data is held out for
/// monitoring; training stops early once validation loss has not improved
/// for `patience` epochs. Without a seed every fit starts from fresh entropy,
/// so two fits on the same data generally differ.
#[derive(Debug, Clone)]
pub struct MlpTrainer {
    architecture: Architecture,
    patience: usize,
    seed: Option<u64>,
}

impl MlpTrainer {
    pub fn new() -> Self {
        Self {
            architecture: Architecture::severity_classifier(),
            patience: EARLY_STOPPING_PATIENCE,
            seed: None,
        }
    }

    /// Makes fits reproducible
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_architecture(mut self, architecture: Architecture) -> Self {
        self.architecture = architecture;
        self
    }

    pub fn with_patience(mut self, patience: usize) -> Self {
        self.patience = patience;
        self
    }

    fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }
}

impl Default for MlpTrainer {
    fn default() -> Self {
        Self::new()
    }
}

impl Trainer for MlpTrainer {
    fn fit(
        &self,
        data: &FeatureSet,
        config: &TrainingConfig,
        stop: &AtomicBool,
    ) -> Result<ModelArtifact, CapabilityError> {
        config.validate().map_err(CapabilityError::InvalidConfig)?;

        if data.is_empty() {
            return Err(CapabilityError::InsufficientData(
                "dataset contains no examples".to_string(),
            ));
        }

        let classes = self.architecture.output_size();
        if let Some(label) = data.labels.iter().find(|&&label| label >= classes) {
            return Err(CapabilityError::InsufficientData(format!(
                "label {} is outside the {} model classes",
                label, classes
            )));
        }

        let (train, validation) = data.split_tail(config.validation_split);
        if train.is_empty() {
            return Err(CapabilityError::InsufficientData(format!(
                "validation split {} leaves no training examples out of {}",
                config.validation_split,
                data.len()
            )));
        }

        let mut rng = self.rng();
        let mut network = Network::from_architecture(&self.architecture, &mut rng)?;
        let mut optimizer = Adam::new(config.learning_rate, &network);
        let mut early_stopping = EarlyStopping::new(self.patience);
        let mut indices: Vec<usize> = (0..train.len()).collect();
        let batch_size = config.batch_size as usize;

        info!(
            "Fitting on {} examples ({} held out for validation), up to {} epochs",
            train.len(),
            validation.len(),
            config.epochs
        );

        let mut epochs_run = 0;
        let mut final_train_loss = 0.0;
        let mut stopped_early = false;

        for epoch in 1..=config.epochs {
            if stop.load(Ordering::Relaxed) {
                return Err(CapabilityError::Stopped { epochs_run });
            }

            let t_start = Instant::now();
            indices.shuffle(&mut rng);

            let mut total_loss = 0.0;
            for batch in indices.chunks(batch_size) {
                let mut grads = Gradients::zeros_like(&network);
                for &idx in batch {
                    let label = train.labels[idx];
                    let trace = network.forward_train(&train.features[idx], &mut rng);
                    total_loss += cross_entropy(trace.output(), label);
                    network.backward(&trace, label, &mut grads);
                }
                grads.scale(1.0 / batch.len() as f64);
                optimizer.step(&mut network, &grads);
            }

            let train_loss = total_loss / train.len() as f64;
            epochs_run = epoch;
            final_train_loss = train_loss;

            if !train_loss.is_finite() {
                return Err(CapabilityError::Diverged {
                    epoch,
                    loss: train_loss,
                });
            }

            let val_loss = (!validation.is_empty()).then(|| score(&network, &validation).0);

            debug!(
                epoch,
                train_loss,
                ?val_loss,
                elapsed_ms = t_start.elapsed().as_millis() as u64,
                "epoch finished"
            );

            if let Some(val_loss) = val_loss {
                if early_stopping.should_stop(val_loss) {
                    info!(
                        "Early stopping at epoch {}: validation loss has not improved for {} epochs",
                        epoch, self.patience
                    );
                    stopped_early = true;
                    break;
                }
            }
        }

        let payload = serde_json::to_value(&network)
            .map_err(|e| CapabilityError::InvalidArtifact(e.to_string()))?;

        Ok(ModelArtifact {
            architecture: self.architecture.clone(),
            training_config: *config,
            summary: TrainingSummary {
                epochs_run,
                stopped_early,
                final_train_loss,
                best_validation_loss: early_stopping.best(),
            },
            payload,
        })
    }
}
