use rand::Rng;
use retrain_core::capability::CapabilityError;
use retrain_core::domain::model::{Activation, Architecture, LayerSpec};
use serde::{Deserialize, Serialize};

/// Fully connected layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dense {
    pub inputs: usize,
    pub units: usize,
    /// Row-major `units × inputs`
    pub weights: Vec<f64>,
    pub biases: Vec<f64>,
    pub activation: Activation,
}

impl Dense {
    /// Glorot-uniform weights, zero biases
    pub fn new<R: Rng + ?Sized>(
        inputs: usize,
        units: usize,
        activation: Activation,
        rng: &mut R,
    ) -> Dense {
        let limit = (6.0 / (inputs + units) as f64).sqrt();
        let weights = (0..inputs * units)
            .map(|_| rng.gen_range(-limit..limit))
            .collect();

        Dense {
            inputs,
            units,
            weights,
            biases: vec![0.0; units],
            activation,
        }
    }

    fn row(&self, unit: usize) -> &[f64] {
        &self.weights[unit * self.inputs..(unit + 1) * self.inputs]
    }

    fn feed_from(&self, input: &[f64]) -> Vec<f64> {
        let z: Vec<f64> = (0..self.units)
            .map(|o| {
                self.biases[o]
                    + self
                        .row(o)
                        .iter()
                        .zip(input)
                        .map(|(w, x)| w * x)
                        .sum::<f64>()
            })
            .collect();

        match self.activation {
            Activation::Relu => z.into_iter().map(|x| x.max(0.0)).collect(),
            Activation::Softmax => softmax(&z),
        }
    }
}

/// Numerically stable softmax
pub fn softmax(z: &[f64]) -> Vec<f64> {
    let max = z.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = z.iter().map(|x| (x - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Layer {
    Dense(Dense),
    /// Inverted dropout; identity at inference time
    Dropout { rate: f64 },
}

/// Weights of a trained classifier; this is what goes into an artifact payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Network {
    pub input_size: usize,
    pub layers: Vec<Layer>,
}

/// Activations recorded during a training forward pass
pub(crate) struct Trace {
    /// `activations[0]` is the input, `activations[i + 1]` the output of layer `i`
    activations: Vec<Vec<f64>>,
    /// Scaled keep-mask per dropout layer, empty for dense layers
    masks: Vec<Vec<f64>>,
}

impl Trace {
    pub(crate) fn output(&self) -> &[f64] {
        self.activations.last().map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Per-layer gradient accumulator, shaped like the network
pub(crate) struct Gradients {
    pub(crate) weights: Vec<Vec<f64>>,
    pub(crate) biases: Vec<Vec<f64>>,
}

impl Gradients {
    pub(crate) fn zeros_like(network: &Network) -> Self {
        let (weights, biases) = network
            .layers
            .iter()
            .map(|layer| match layer {
                Layer::Dense(d) => (vec![0.0; d.weights.len()], vec![0.0; d.biases.len()]),
                Layer::Dropout { .. } => (Vec::new(), Vec::new()),
            })
            .unzip();
        Self { weights, biases }
    }

    pub(crate) fn scale(&mut self, factor: f64) {
        for g in self.weights.iter_mut().chain(self.biases.iter_mut()) {
            g.iter_mut().for_each(|x| *x *= factor);
        }
    }
}

impl Network {
    /// Builds freshly initialized weights for `architecture`
    pub fn from_architecture<R: Rng + ?Sized>(
        architecture: &Architecture,
        rng: &mut R,
    ) -> Result<Network, CapabilityError> {
        let mut width = architecture.input_size;
        let mut layers = Vec::with_capacity(architecture.layers.len());

        for spec in &architecture.layers {
            match *spec {
                LayerSpec::Dense { units, activation } => {
                    layers.push(Layer::Dense(Dense::new(width, units, activation, rng)));
                    width = units;
                }
                LayerSpec::Dropout { rate } => layers.push(Layer::Dropout { rate }),
            }
        }

        let network = Network {
            input_size: architecture.input_size,
            layers,
        };
        network.validate()?;
        Ok(network)
    }

    /// Checks the invariants backpropagation relies on
    ///
    /// The last layer must be a softmax dense layer and the only softmax;
    /// layer widths must chain; dropout rates must be in `[0, 1)`.
    pub fn validate(&self) -> Result<(), CapabilityError> {
        let invalid = |msg: String| Err(CapabilityError::InvalidArtifact(msg));

        match self.layers.last() {
            Some(Layer::Dense(d)) if d.activation == Activation::Softmax => {}
            _ => return invalid("last layer must be a softmax dense layer".to_string()),
        }

        let mut width = self.input_size;
        let last = self.layers.len() - 1;
        for (i, layer) in self.layers.iter().enumerate() {
            match layer {
                Layer::Dense(d) => {
                    if d.inputs != width || d.units == 0 {
                        return invalid(format!(
                            "layer {} expects {} inputs but receives {}",
                            i, d.inputs, width
                        ));
                    }
                    if d.weights.len() != d.inputs * d.units || d.biases.len() != d.units {
                        return invalid(format!("layer {} has malformed parameters", i));
                    }
                    if d.activation == Activation::Softmax && i != last {
                        return invalid(format!("softmax is only supported as the last layer (found at {})", i));
                    }
                    width = d.units;
                }
                Layer::Dropout { rate } => {
                    if !(0.0..1.0).contains(rate) {
                        return invalid(format!("dropout rate {} at layer {} is outside [0, 1)", rate, i));
                    }
                }
            }
        }
        Ok(())
    }

    pub fn output_size(&self) -> usize {
        self.layers
            .iter()
            .rev()
            .find_map(|layer| match layer {
                Layer::Dense(d) => Some(d.units),
                Layer::Dropout { .. } => None,
            })
            .unwrap_or(self.input_size)
    }

    /// Inference-mode forward pass; returns class probabilities
    pub fn predict(&self, input: &[f64]) -> Vec<f64> {
        let mut current = input.to_vec();
        for layer in &self.layers {
            if let Layer::Dense(d) = layer {
                current = d.feed_from(&current);
            }
        }
        current
    }

    /// Training-mode forward pass with dropout masks applied
    pub(crate) fn forward_train<R: Rng + ?Sized>(&self, input: &[f64], rng: &mut R) -> Trace {
        let mut activations = Vec::with_capacity(self.layers.len() + 1);
        let mut masks = Vec::with_capacity(self.layers.len());
        activations.push(input.to_vec());

        for layer in &self.layers {
            let current = activations.last().map(Vec::as_slice).unwrap_or(input);
            match layer {
                Layer::Dense(d) => {
                    let out = d.feed_from(current);
                    masks.push(Vec::new());
                    activations.push(out);
                }
                Layer::Dropout { rate } => {
                    let keep = 1.0 - rate;
                    let mask: Vec<f64> = current
                        .iter()
                        .map(|_| if rng.gen_bool(keep) { 1.0 / keep } else { 0.0 })
                        .collect();
                    let out = current.iter().zip(&mask).map(|(x, m)| x * m).collect();
                    masks.push(mask);
                    activations.push(out);
                }
            }
        }

        Trace { activations, masks }
    }

    /// Accumulates cross-entropy gradients of one example into `grads`
    pub(crate) fn backward(&self, trace: &Trace, label: usize, grads: &mut Gradients) {
        // Softmax + cross-entropy: dL/dz = p - onehot(label)
        let mut delta = trace.output().to_vec();
        if let Some(p) = delta.get_mut(label) {
            *p -= 1.0;
        }

        for i in (0..self.layers.len()).rev() {
            let input = &trace.activations[i];
            let output = &trace.activations[i + 1];

            match &self.layers[i] {
                Layer::Dense(d) => {
                    if d.activation == Activation::Relu {
                        for (g, a) in delta.iter_mut().zip(output) {
                            if *a <= 0.0 {
                                *g = 0.0;
                            }
                        }
                    }

                    let w_grad = &mut grads.weights[i];
                    let b_grad = &mut grads.biases[i];
                    for o in 0..d.units {
                        b_grad[o] += delta[o];
                        let row = &mut w_grad[o * d.inputs..(o + 1) * d.inputs];
                        for (g, x) in row.iter_mut().zip(input) {
                            *g += delta[o] * x;
                        }
                    }

                    if i > 0 {
                        delta = (0..d.inputs)
                            .map(|j| {
                                (0..d.units)
                                    .map(|o| d.weights[o * d.inputs + j] * delta[o])
                                    .sum()
                            })
                            .collect();
                    }
                }
                Layer::Dropout { .. } => {
                    for (g, m) in delta.iter_mut().zip(&trace.masks[i]) {
                        *g *= m;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loss::cross_entropy;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn small_architecture() -> Architecture {
        Architecture {
            input_size: 3,
            layers: vec![
                LayerSpec::Dense {
                    units: 5,
                    activation: Activation::Relu,
                },
                LayerSpec::Dense {
                    units: 4,
                    activation: Activation::Softmax,
                },
            ],
        }
    }

    #[test]
    fn test_softmax_sums_to_one() {
        let p = softmax(&[1.0, 2.0, 3.0, 1000.0]);
        let sum: f64 = p.iter().sum();
        assert!((sum - 1.0).abs() < 1e-12);
        assert!(p[3] > 0.99);
    }

    #[test]
    fn test_severity_classifier_builds() {
        let mut rng = StdRng::seed_from_u64(1);
        let network =
            Network::from_architecture(&Architecture::severity_classifier(), &mut rng).unwrap();
        assert_eq!(network.output_size(), 4);

        let probs = network.predict(&[0.5, 0.5, 0.1]);
        assert_eq!(probs.len(), 4);
        assert!((probs.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_rejects_hidden_softmax() {
        let mut arch = small_architecture();
        arch.layers.swap(0, 1);
        let mut rng = StdRng::seed_from_u64(1);
        assert!(Network::from_architecture(&arch, &mut rng).is_err());
    }

    #[test]
    fn test_backward_matches_finite_differences() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut network = Network::from_architecture(&small_architecture(), &mut rng).unwrap();
        let input = [0.3, 0.7, 0.2];
        let label = 2;

        let trace = network.forward_train(&input, &mut rng);
        let mut grads = Gradients::zeros_like(&network);
        network.backward(&trace, label, &mut grads);

        let eps = 1e-6;
        for layer_idx in 0..network.layers.len() {
            let count = match &network.layers[layer_idx] {
                Layer::Dense(d) => d.weights.len(),
                Layer::Dropout { .. } => 0,
            };
            for w in 0..count {
                let original = match &network.layers[layer_idx] {
                    Layer::Dense(d) => d.weights[w],
                    Layer::Dropout { .. } => unreachable!(),
                };
                let mut loss_at = |value: f64| {
                    if let Layer::Dense(d) = &mut network.layers[layer_idx] {
                        d.weights[w] = value;
                    }
                    cross_entropy(&network.predict(&input), label)
                };
                let numeric = (loss_at(original + eps) - loss_at(original - eps)) / (2.0 * eps);
                loss_at(original);

                let analytic = grads.weights[layer_idx][w];
                assert!(
                    (numeric - analytic).abs() < 1e-4,
                    "layer {} weight {}: numeric {} vs analytic {}",
                    layer_idx,
                    w,
                    numeric,
                    analytic
                );
            }
        }
    }

    #[test]
    fn test_payload_round_trip_keeps_predictions() {
        let mut rng = StdRng::seed_from_u64(3);
        let network =
            Network::from_architecture(&Architecture::severity_classifier(), &mut rng).unwrap();
        let json = serde_json::to_value(&network).unwrap();
        let restored: Network = serde_json::from_value(json).unwrap();
        assert_eq!(network.predict(&[0.1, 0.2, 0.3]), restored.predict(&[0.1, 0.2, 0.3]));
    }
}
