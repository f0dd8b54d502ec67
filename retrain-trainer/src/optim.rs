use crate::network::{Gradients, Layer, Network};

/// Adam optimizer with per-parameter first and second moment estimates
pub struct Adam {
    pub learning_rate: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub epsilon: f64,
    step: i32,
    m_weights: Vec<Vec<f64>>,
    v_weights: Vec<Vec<f64>>,
    m_biases: Vec<Vec<f64>>,
    v_biases: Vec<Vec<f64>>,
}

impl Adam {
    pub fn new(learning_rate: f64, network: &Network) -> Adam {
        let zeros = Gradients::zeros_like(network);
        Adam {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-7,
            step: 0,
            m_weights: zeros.weights.clone(),
            v_weights: zeros.weights,
            m_biases: zeros.biases.clone(),
            v_biases: zeros.biases,
        }
    }

    /// Applies one update from batch-averaged gradients
    pub(crate) fn step(&mut self, network: &mut Network, grads: &Gradients) {
        self.step = self.step.saturating_add(1);
        let t = self.step;
        let lr_t = self.learning_rate * (1.0 - self.beta2.powi(t)).sqrt()
            / (1.0 - self.beta1.powi(t));
        let (beta1, beta2, epsilon) = (self.beta1, self.beta2, self.epsilon);

        for (i, layer) in network.layers.iter_mut().enumerate() {
            let Layer::Dense(dense) = layer else {
                continue;
            };

            let update = |params: &mut [f64], g: &[f64], m: &mut [f64], v: &mut [f64]| {
                for k in 0..params.len() {
                    m[k] = beta1 * m[k] + (1.0 - beta1) * g[k];
                    v[k] = beta2 * v[k] + (1.0 - beta2) * g[k] * g[k];
                    params[k] -= lr_t * m[k] / (v[k].sqrt() + epsilon);
                }
            };

            update(
                &mut dense.weights,
                &grads.weights[i],
                &mut self.m_weights[i],
                &mut self.v_weights[i],
            );
            update(
                &mut dense.biases,
                &grads.biases[i],
                &mut self.m_biases[i],
                &mut self.v_biases[i],
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loss::cross_entropy;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use retrain_core::domain::model::Architecture;

    #[test]
    fn test_repeated_steps_reduce_loss_on_one_example() {
        let mut rng = StdRng::seed_from_u64(9);
        let mut network =
            Network::from_architecture(&Architecture::severity_classifier(), &mut rng).unwrap();
        let mut adam = Adam::new(0.01, &network);
        let input = [0.25, 0.5, 0.1];
        let label = 3;

        let before = cross_entropy(&network.predict(&input), label);
        for _ in 0..50 {
            let trace = network.forward_train(&input, &mut rng);
            let mut grads = Gradients::zeros_like(&network);
            network.backward(&trace, label, &mut grads);
            adam.step(&mut network, &grads);
        }
        let after = cross_entropy(&network.predict(&input), label);

        assert!(after < before, "loss went from {} to {}", before, after);
    }
}
