//! Retrain Trainer
//!
//! Dense-network backend behind the `Trainer` and `Evaluator` capabilities.
//!
//! - `network`: dense, ReLU, dropout and softmax layers with backpropagation
//! - `optim`: Adam
//! - `loss`: sparse categorical cross-entropy
//! - `fit`: mini-batch training loop with validation split and early stopping
//! - `evaluate`: inference-mode scoring of a stored artifact

pub mod early_stopping;
pub mod evaluate;
pub mod fit;
pub mod loss;
pub mod network;
pub mod optim;

pub use evaluate::MlpEvaluator;
pub use fit::MlpTrainer;
pub use network::Network;
