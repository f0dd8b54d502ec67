//! Feature extraction
//!
//! Turns raw reports into the fixed three-feature schema the classifier is
//! trained on: `[month / 12, hour / 24, duration_hours / 24]`, all in UTC.

use chrono::{Datelike, Timelike};
use retrain_core::domain::features::{FeatureSet, FeatureVector, Label};
use retrain_core::domain::report::Report;

/// Duration assumed for reports that carry none, or a zero or non-finite one
pub const DEFAULT_DURATION_HOURS: f64 = 2.0;

/// Extracts one feature vector and label per report, in input order
pub fn extract(reports: &[Report]) -> FeatureSet {
    let mut set = FeatureSet::default();
    for report in reports {
        set.push(features_of(report), label_of(report));
    }
    set
}

/// Month is zero-based (January is 0)
pub fn features_of(report: &Report) -> FeatureVector {
    let duration = report
        .duration
        .filter(|hours| hours.is_finite() && *hours != 0.0)
        .unwrap_or(DEFAULT_DURATION_HOURS);

    [
        report.timestamp.month0() as f64 / 12.0,
        report.timestamp.hour() as f64 / 24.0,
        duration / 24.0,
    ]
}

pub fn label_of(report: &Report) -> Label {
    report.severity.unwrap_or_default().rank()
}
