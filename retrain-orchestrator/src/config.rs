//! Orchestrator configuration
//!
//! Defines every tunable of the process: where jobs, datasets and artifacts
//! live, the job time limit and the retraining cadence.

use anyhow::{Context, Result};
use retrain_core::domain::schedule::Cadence;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::repository::validate_key;
use crate::service::EvaluationMode;
use crate::service::job::{DEFAULT_JOB_TIMEOUT, DEFAULT_SWEEP_INTERVAL};

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL URL for the job store; jobs are kept in memory when unset
    pub database_url: Option<String>,

    /// Model the scheduler triggers retraining for
    pub model_name: String,

    /// Holds `latest_dataset.json` and `retraining_schedule.json`
    pub data_dir: PathBuf,

    /// Root of the artifact store
    pub models_dir: PathBuf,

    /// Wall-clock ceiling for one job
    pub job_timeout: Duration,

    /// How often to sweep for jobs whose notification was missed
    pub sweep_interval: Duration,

    /// Cadence used when the schedule record does not set one
    pub schedule_cadence: Cadence,

    /// Runs the scheduler adapter in this process
    pub scheduler_enabled: bool,

    pub evaluation_mode: EvaluationMode,

    /// Fixed RNG seed for reproducible fits
    pub trainer_seed: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            model_name: "outage_model".to_string(),
            data_dir: PathBuf::from("./data"),
            models_dir: PathBuf::from("./models"),
            job_timeout: DEFAULT_JOB_TIMEOUT,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            schedule_cadence: Cadence::default(),
            scheduler_enabled: true,
            evaluation_mode: EvaluationMode::default(),
            trainer_seed: None,
        }
    }
}

impl Config {
    /// Creates configuration from environment variables
    ///
    /// Every variable is optional:
    /// - DATABASE_URL (default: unset, in-memory job store)
    /// - MODEL_NAME (default: outage_model)
    /// - DATA_DIR (default: ./data)
    /// - MODELS_DIR (default: ./models)
    /// - JOB_TIMEOUT (seconds, default: 21600)
    /// - SWEEP_INTERVAL (seconds, default: 60)
    /// - SCHEDULE_CADENCE (default: "sun 02:00", UTC)
    /// - SCHEDULER_ENABLED (default: true)
    /// - EVALUATION_MODE (`training-set` or `held-out:<fraction>`, default: training-set)
    /// - TRAINER_SEED (default: unset)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Config::from_env`] with a custom variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let job_timeout = parse_var::<u64>(&get, "JOB_TIMEOUT")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.job_timeout);

        let sweep_interval = parse_var::<u64>(&get, "SWEEP_INTERVAL")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.sweep_interval);

        let schedule_cadence = match get("SCHEDULE_CADENCE") {
            Some(value) => value
                .parse::<Cadence>()
                .map_err(anyhow::Error::msg)
                .context("Invalid SCHEDULE_CADENCE")?,
            None => defaults.schedule_cadence,
        };

        let scheduler_enabled = match get("SCHEDULER_ENABLED") {
            Some(value) => parse_bool(&value).context("Invalid SCHEDULER_ENABLED")?,
            None => defaults.scheduler_enabled,
        };

        let evaluation_mode = match get("EVALUATION_MODE") {
            Some(value) => value
                .parse::<EvaluationMode>()
                .map_err(anyhow::Error::msg)
                .context("Invalid EVALUATION_MODE")?,
            None => defaults.evaluation_mode,
        };

        Ok(Self {
            database_url: get("DATABASE_URL"),
            model_name: get("MODEL_NAME").unwrap_or(defaults.model_name),
            data_dir: get("DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            models_dir: get("MODELS_DIR").map(PathBuf::from).unwrap_or(defaults.models_dir),
            job_timeout,
            sweep_interval,
            schedule_cadence,
            scheduler_enabled,
            evaluation_mode,
            trainer_seed: parse_var::<u64>(&get, "TRAINER_SEED")?,
        })
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<()> {
        validate_key(&self.model_name)
            .context("model_name may only contain letters, digits, '_' and '-'")?;

        if self.job_timeout.is_zero() {
            anyhow::bail!("job_timeout must be greater than 0");
        }

        if self.sweep_interval.is_zero() {
            anyhow::bail!("sweep_interval must be greater than 0");
        }

        if let Some(url) = &self.database_url {
            if !url.starts_with("postgres://") && !url.starts_with("postgresql://") {
                anyhow::bail!("database_url must start with postgres:// or postgresql://");
            }
        }

        Ok(())
    }
}

fn parse_var<T>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    get(key)
        .map(|value| value.trim().parse::<T>())
        .transpose()
        .with_context(|| format!("Invalid {}", key))
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => anyhow::bail!("expected a boolean, got '{}'", other),
    }
}
