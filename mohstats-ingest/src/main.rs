use itertools::Itertools;
use log::info;
use miette::IntoDiagnostic;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use mohstats_db::{
    analytic_url_from_environment, forum_url_from_environment, get_pool,
    run_analytic_migrations, run_forum_migrations,
};
use mohstats_ingest::achievements::{AchievementEngine, AchievementRegistry, EngineDeps};
use mohstats_ingest::cache::Cache;
use mohstats_ingest::config::PipelineConfig;
use mohstats_ingest::metrics;
use mohstats_ingest::queue::EventQueue;
use mohstats_ingest::session::SessionManager;
use mohstats_ingest::side_effects::SideEffects;
use mohstats_ingest::worker::{self, WorkerDeps};

#[tokio::main]
async fn main() -> miette::Result<()> {
    env_logger::init();

    let config = PipelineConfig::config().into_diagnostic()?;

    let analytic_url = analytic_url_from_environment();
    let forum_url = forum_url_from_environment();
    run_analytic_migrations(&analytic_url)?;
    run_forum_migrations(&forum_url)?;

    let analytic_pool = get_pool(&analytic_url, config.db_pool_size).into_diagnostic()?;
    let forum_pool = get_pool(&forum_url, config.db_pool_size).into_diagnostic()?;
    let cache = Cache::connect(&config.cache_url).await.into_diagnostic()?;

    let registry = Arc::new(AchievementRegistry::load(forum_pool.clone()).into_diagnostic()?);
    spawn_registry_reloader(registry.clone());

    let shutdown = CancellationToken::new();
    let queue = EventQueue::new(config.queue_size, shutdown.clone());

    let engine = AchievementEngine::start(
        EngineDeps {
            cache: cache.clone(),
            analytic_pool: analytic_pool.clone(),
            forum_pool: forum_pool.clone(),
            registry: registry.clone(),
        },
        config.achievement_worker_count,
        config.achievement_queue_size,
    );

    let session = SessionManager::new(cache.clone(), forum_pool.clone(), queue.clone());
    let side_effects = SideEffects::new(cache.clone(), forum_pool.clone(), registry, session);

    let sampler = metrics::spawn_queue_depth_sampler(queue.clone(), shutdown.clone());

    let flush_interval = Duration::from_millis(config.flush_interval_ms);
    let side_effect_tasks = TaskTracker::new();
    let workers = (0..config.worker_count)
        .map(|worker_id| {
            let deps = WorkerDeps {
                queue: queue.clone(),
                analytic_pool: analytic_pool.clone(),
                side_effects: side_effects.clone(),
                engine: engine.handle(),
                side_effect_tasks: side_effect_tasks.clone(),
            };
            tokio::spawn(worker::run(worker_id, deps, config.batch_size, flush_interval))
        })
        .collect_vec();

    info!(
        "Pipeline is up: {} batch workers, queue capacity {}, batches of {} flushed every {:?}",
        config.worker_count, config.queue_size, config.batch_size, flush_interval,
    );

    tokio::signal::ctrl_c().await.into_diagnostic()?;
    info!("Shutdown requested; refusing new events and draining");

    // Producers start seeing `false` immediately; each worker drains the
    // queue, flushes its buffer, and exits
    shutdown.cancel();
    for worker in workers {
        worker.await.into_diagnostic()?;
    }

    // Let in-flight side effects finish before the engine intake closes
    side_effect_tasks.close();
    side_effect_tasks.wait().await;
    engine.shutdown().await;
    sampler.await.into_diagnostic()?;

    info!("Pipeline drained; exiting");
    Ok(())
}

/// SIGHUP hot-reloads the achievement definitions without a restart.
fn spawn_registry_reloader(registry: Arc<AchievementRegistry>) {
    tokio::spawn(async move {
        let mut hangup = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())
        {
            Ok(stream) => stream,
            Err(err) => {
                log::warn!("Couldn't install the SIGHUP handler; reload disabled: {err}");
                return;
            }
        };
        while hangup.recv().await.is_some() {
            let registry = registry.clone();
            let result =
                tokio::task::spawn_blocking(move || registry.reload()).await;
            match result {
                Ok(Ok(count)) => info!("Achievement registry reloaded: {count} definitions"),
                Ok(Err(err)) => log::error!("Achievement registry reload failed: {err}"),
                Err(err) => log::error!("Achievement registry reload task died: {err}"),
            }
        }
    });
}
