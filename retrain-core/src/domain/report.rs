//! Raw training examples

use chrono::{DateTime, TimeZone, Utc};
use serde::de::IntoDeserializer;
use serde::de::value::StrDeserializer;
use serde::{Deserialize, Deserializer, Serialize};

/// Severity reported for an event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
    /// Any value this service does not know about
    #[serde(other)]
    Other,
}

impl Severity {
    /// Class index used as the training label
    pub fn rank(self) -> usize {
        match self {
            Severity::Critical => 3,
            Severity::High => 2,
            Severity::Medium => 1,
            Severity::Low | Severity::Other => 0,
        }
    }
}

/// One raw event record from the labeled dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    /// Event duration in hours
    #[serde(default)]
    pub duration: Option<f64>,
    /// An empty string counts as absent
    #[serde(default, deserialize_with = "deserialize_severity")]
    pub severity: Option<Severity>,
}

/// Latest labeled dataset as published by the data collection side
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetSnapshot {
    #[serde(default)]
    pub reports: Vec<Report>,
    #[serde(default)]
    pub captured_at: Option<DateTime<Utc>>,
}

/// Accepts RFC 3339 strings as well as epoch milliseconds
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawTimestamp {
        Millis(i64),
        Text(String),
    }

    match RawTimestamp::deserialize(deserializer)? {
        RawTimestamp::Millis(ms) => Utc
            .timestamp_millis_opt(ms)
            .single()
            .ok_or_else(|| serde::de::Error::custom(format!("timestamp out of range: {}", ms))),
        RawTimestamp::Text(text) => DateTime::parse_from_rfc3339(&text)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| serde::de::Error::custom(format!("invalid timestamp '{}': {}", text, e))),
    }
}

fn deserialize_severity<'de, D>(deserializer: D) -> Result<Option<Severity>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)?.as_deref() {
        None | Some("") => Ok(None),
        Some(name) => {
            let name: StrDeserializer<'_, D::Error> = name.into_deserializer();
            Severity::deserialize(name).map(Some)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_rank_is_total() {
        assert_eq!(Severity::Critical.rank(), 3);
        assert_eq!(Severity::High.rank(), 2);
        assert_eq!(Severity::Medium.rank(), 1);
        assert_eq!(Severity::Low.rank(), 0);
        assert_eq!(Severity::Other.rank(), 0);
        assert_eq!(Severity::default(), Severity::Medium);
    }

    #[test]
    fn test_unknown_severity_maps_to_other() {
        let report: Report =
            serde_json::from_str(r#"{"timestamp": "2024-03-01T10:00:00Z", "severity": "urgent"}"#)
                .unwrap();
        assert_eq!(report.severity, Some(Severity::Other));
        assert_eq!(report.duration, None);
    }

    #[test]
    fn test_empty_severity_is_absent() {
        let report: Report =
            serde_json::from_str(r#"{"timestamp": "2024-03-01T10:00:00Z", "severity": ""}"#).unwrap();
        assert_eq!(report.severity, None);

        let report: Report =
            serde_json::from_str(r#"{"timestamp": "2024-03-01T10:00:00Z", "severity": "high"}"#)
                .unwrap();
        assert_eq!(report.severity, Some(Severity::High));
    }

    #[test]
    fn test_timestamp_accepts_millis() {
        let report: Report =
            serde_json::from_str(r#"{"timestamp": 1709287200000, "duration": 3.5}"#).unwrap();
        assert_eq!(report.timestamp.to_rfc3339(), "2024-03-01T10:00:00+00:00");
        assert_eq!(report.duration, Some(3.5));
        assert_eq!(report.severity, None);
    }

    #[test]
    fn test_invalid_timestamp_is_rejected() {
        let result = serde_json::from_str::<Report>(r#"{"timestamp": "yesterday"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_snapshot_without_reports() {
        let snapshot: DatasetSnapshot = serde_json::from_str("{}").unwrap();
        assert!(snapshot.reports.is_empty());
    }
}
