//! Retrain Orchestrator
//!
//! Long-running process that retrains the severity classifier. It listens for
//! new training jobs, drives each one to a terminal status, and optionally runs
//! the weekly scheduler that creates those jobs.

use anyhow::{Context, Result};
use retrain_orchestrator::config::Config;
use retrain_orchestrator::db;
use retrain_orchestrator::repository::{
    FsArtifactStore, FsDatasetProvider, FsScheduleSource, InMemoryJobStore, JobStore, PgJobStore,
};
use retrain_orchestrator::scheduler::SchedulerAdapter;
use retrain_orchestrator::service::{JobOrchestrator, ModelRegistry, TrainingPipeline};
use retrain_trainer::{MlpEvaluator, MlpTrainer};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "retrain_orchestrator=info,retrain_trainer=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Retrain Orchestrator");

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate()?;
    info!(
        "Loaded configuration: model={}, data_dir={}, models_dir={}, evaluation={}",
        config.model_name,
        config.data_dir.display(),
        config.models_dir.display(),
        config.evaluation_mode
    );

    let store = connect_job_store(&config).await?;

    let mut trainer = MlpTrainer::new();
    if let Some(seed) = config.trainer_seed {
        info!("Trainer seeded with {}", seed);
        trainer = trainer.with_seed(seed);
    }

    let registry = Arc::new(ModelRegistry::new(Arc::new(FsArtifactStore::new(
        &config.models_dir,
    ))));
    let pipeline = TrainingPipeline::new(
        Arc::new(FsDatasetProvider::new(&config.data_dir)),
        Arc::new(trainer),
        Arc::new(MlpEvaluator),
        registry,
    )
    .with_evaluation_mode(config.evaluation_mode);

    let orchestrator = Arc::new(
        JobOrchestrator::new(Arc::clone(&store), Arc::new(pipeline))
            .with_job_timeout(config.job_timeout)
            .with_sweep_interval(config.sweep_interval),
    );

    let scheduler = config.scheduler_enabled.then(|| {
        SchedulerAdapter::new(
            Arc::new(FsScheduleSource::new(&config.data_dir)),
            Arc::clone(&store),
            config.model_name.clone(),
        )
        .with_default_cadence(config.schedule_cadence)
    });
    if scheduler.is_none() {
        info!("Scheduler disabled; jobs must be created externally");
    }

    let scheduler_loop = async {
        match &scheduler {
            Some(scheduler) => scheduler.run().await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        result = orchestrator.run() => {
            result.context("Orchestrator stopped")?;
            warn!("Orchestrator loop ended");
        }
        result = scheduler_loop => {
            if let Err(e) = result {
                error!("Scheduler stopped: {:#}", e);
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    Ok(())
}

/// PostgreSQL when `DATABASE_URL` is set, memory otherwise
async fn connect_job_store(config: &Config) -> Result<Arc<dyn JobStore>> {
    let Some(database_url) = &config.database_url else {
        warn!("DATABASE_URL not set; jobs are kept in memory and lost on restart");
        return Ok(Arc::new(InMemoryJobStore::new()));
    };

    info!("Connecting to database...");
    let pool = db::create_pool(database_url)
        .await
        .context("Failed to create database pool")?;

    db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;

    let store = PgJobStore::connect(pool)
        .await
        .context("Failed to listen for job notifications")?;
    info!("Database job store ready");

    Ok(Arc::new(store))
}
