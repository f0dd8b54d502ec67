//! Numeric training data

/// Length of every feature vector: month, hour, duration
pub const FEATURE_COUNT: usize = 3;

/// Number of severity classes the model predicts
pub const CLASS_COUNT: usize = 4;

/// Normalized features of one report, in schema order
pub type FeatureVector = [f64; FEATURE_COUNT];

/// Class index in `0..CLASS_COUNT`
pub type Label = usize;

/// Feature vectors and their labels, kept in lockstep
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureSet {
    pub features: Vec<FeatureVector>,
    pub labels: Vec<Label>,
}

impl FeatureSet {
    pub fn new(features: Vec<FeatureVector>, labels: Vec<Label>) -> Result<Self, String> {
        if features.len() != labels.len() {
            return Err(format!(
                "feature/label length mismatch: {} features, {} labels",
                features.len(),
                labels.len()
            ));
        }
        Ok(Self { features, labels })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn push(&mut self, feature: FeatureVector, label: Label) {
        self.features.push(feature);
        self.labels.push(label);
    }

    /// Splits off a trailing `fraction` of the examples
    ///
    /// Returns `(head, tail)` where the head keeps `floor(len * (1 - fraction))`
    /// examples. The tail is what a validation or test split holds out; order
    /// is preserved on both sides. A single example with a non-zero fraction
    /// therefore ends up entirely in the tail.
    pub fn split_tail(&self, fraction: f64) -> (FeatureSet, FeatureSet) {
        let fraction = if fraction.is_finite() {
            fraction.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let split_at = ((self.len() as f64 * (1.0 - fraction)).floor() as usize).min(self.len());

        let head = FeatureSet {
            features: self.features[..split_at].to_vec(),
            labels: self.labels[..split_at].to_vec(),
        };
        let tail = FeatureSet {
            features: self.features[split_at..].to_vec(),
            labels: self.labels[split_at..].to_vec(),
        };
        (head, tail)
    }

    /// Iterates over `(features, label)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (&FeatureVector, Label)> {
        self.features.iter().zip(self.labels.iter().copied())
    }
}
