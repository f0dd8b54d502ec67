//! Sparse categorical cross-entropy

/// Probabilities are clipped to this before taking the log
pub const EPSILON: f64 = 1e-7;

/// Loss of one example given predicted class probabilities
pub fn cross_entropy(probs: &[f64], label: usize) -> f64 {
    let p = probs.get(label).copied().unwrap_or(0.0);
    -p.clamp(EPSILON, 1.0 - EPSILON).ln()
}

/// Index of the largest probability
pub fn argmax(v: &[f64]) -> usize {
    v.iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(i, _)| i)
        .unwrap_or(0)
}
