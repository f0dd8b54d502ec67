//! Early stopping on validation loss

/// Stops training after `patience` epochs without improvement
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    patience: usize,
    best: Option<f64>,
    wait: usize,
}

impl EarlyStopping {
    pub fn new(patience: usize) -> Self {
        Self {
            patience,
            best: None,
            wait: 0,
        }
    }

    /// Records one epoch's monitored loss; returns `true` when training should stop
    pub fn should_stop(&mut self, loss: f64) -> bool {
        let improved = loss.is_finite() && self.best.is_none_or(|best| loss < best);
        if improved {
            self.best = Some(loss);
            self.wait = 0;
            return false;
        }

        self.wait += 1;
        self.wait >= self.patience
    }

    /// Lowest loss seen so far
    pub fn best(&self) -> Option<f64> {
        self.best
    }
}
