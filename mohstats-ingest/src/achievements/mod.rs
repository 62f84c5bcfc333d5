mod registry;
pub mod rules;

pub use registry::{AchievementRegistry, RegistryError};

use chrono::NaiveDateTime;
use futures::FutureExt;
use hashbrown::HashSet;
use log::{debug, error, info, warn};
use mohstats_db::db::BaselineStat;
use mohstats_db::{ConnectionPool, db};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use telemetry::{EventKind, GameEvent};
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::cache::{Cache, CacheError};
use crate::queue::Job;

#[derive(Debug, Error)]
enum EngineError {
    #[error("cache command failed")]
    Cache(#[from] CacheError),

    #[error("database query failed")]
    Db(#[from] mohstats_db::QueryError),

    #[error("couldn't get a database connection")]
    Pool(#[from] mohstats_db::PoolError),

    #[error("blocking query task died")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Clone)]
pub struct EngineDeps {
    pub cache: Cache,
    pub analytic_pool: ConnectionPool,
    pub forum_pool: ConnectionPool,
    pub registry: Arc<AchievementRegistry>,
}

/// Cache counters that have been reconciled against the analytic store this
/// process lifetime, keyed by cache key.
type Baselined = Arc<Mutex<HashSet<String>>>;

/// The rule-evaluation worker pool. The batcher feeds it per event;
/// achievements are best effort, so a full queue drops the event with a
/// warning and baseline backfill repairs the counter on a later increment.
pub struct AchievementEngine {
    tx: flume::Sender<Job>,
    workers: Vec<JoinHandle<()>>,
}

impl AchievementEngine {
    pub fn start(deps: EngineDeps, worker_count: usize, queue_size: usize) -> AchievementEngine {
        let (tx, rx) = flume::bounded(queue_size);
        let baselined: Baselined = Arc::new(Mutex::new(HashSet::new()));

        let workers = (0..worker_count)
            .map(|idx| {
                let rx = rx.clone();
                let deps = deps.clone();
                let baselined = baselined.clone();
                tokio::spawn(worker(idx, rx, deps, baselined))
            })
            .collect();

        AchievementEngine { tx, workers }
    }

    /// A cheap intake handle for the batch workers. The engine itself stays
    /// with whoever is responsible for shutting it down.
    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            tx: self.tx.clone(),
        }
    }

    /// Closes the intake and waits for the workers to drain what's queued.
    /// Every outstanding [`EngineHandle`] must be gone first, or the
    /// workers will keep waiting for more events.
    pub async fn shutdown(self) {
        drop(self.tx);
        for (idx, worker) in self.workers.into_iter().enumerate() {
            if let Err(err) = worker.await {
                error!("Achievement worker {idx} did not shut down cleanly: {err}");
            }
        }
    }
}

#[derive(Clone)]
pub struct EngineHandle {
    tx: flume::Sender<Job>,
}

impl EngineHandle {
    pub fn submit(&self, job: &Job) {
        match self.tx.try_send(job.clone()) {
            Ok(()) => {}
            Err(flume::TrySendError::Full(job)) => {
                warn!(
                    "Achievement queue is full; dropping {} event for match_id={}",
                    job.event.event_type, job.event.match_id
                );
            }
            Err(flume::TrySendError::Disconnected(_)) => {
                debug!("Achievement engine is stopped; discarding event");
            }
        }
    }
}

async fn worker(idx: usize, rx: flume::Receiver<Job>, deps: EngineDeps, baselined: Baselined) {
    debug!("Achievement worker {idx} launched");
    while let Ok(job) = rx.recv_async().await {
        // One event's evaluation must never take the worker down with it
        let result = AssertUnwindSafe(handle_event(&deps, &baselined, &job))
            .catch_unwind()
            .await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(
                "Achievement evaluation failed: worker={idx} event_type={} match_id={} smf_id={} error={err}",
                job.event.event_type,
                job.event.match_id,
                job.event.actor_smf_id(),
            ),
            Err(_) => error!(
                "Achievement evaluation panicked: worker={idx} event_type={} match_id={}",
                job.event.event_type, job.event.match_id,
            ),
        }
    }
    debug!("Achievement worker {idx} exiting");
}

async fn handle_event(
    deps: &EngineDeps,
    baselined: &Baselined,
    job: &Job,
) -> Result<(), EngineError> {
    let event = &job.event;
    let kind = event.kind();
    let now = job.ingested_at.naive_utc();

    // Any death in the kill family resets the victim's streak, even when
    // the killer is anonymous or the world
    if kind.is_kill_family() && !event.victim_guid.is_empty() {
        deps.cache
            .del(&format!("streak:kill:{}", event.victim_guid))
            .await?;
    }

    let smf_id = event.actor_smf_id();
    if smf_id == 0 {
        return Ok(());
    }

    match kind {
        k if k.counts_as_kill() => on_kill(deps, baselined, event, smf_id, now).await,
        EventKind::Distance => on_distance(deps, baselined, event, smf_id, now).await,
        EventKind::HealthPickup => on_health_pickup(deps, baselined, smf_id, now).await,
        EventKind::ItemPickup if event.item.contains("health") => {
            on_health_pickup(deps, baselined, smf_id, now).await
        }
        EventKind::ObjectiveUpdate | EventKind::ObjectiveCapture => {
            on_objective(deps, baselined, smf_id, now).await
        }
        EventKind::TeamWin => on_win(deps, baselined, smf_id, now).await,
        EventKind::MatchOutcome if event.match_outcome == 1 => {
            on_win(deps, baselined, smf_id, now).await
        }
        _ => Ok(()),
    }
}

async fn on_kill(
    deps: &EngineDeps,
    baselined: &Baselined,
    event: &GameEvent,
    smf_id: i64,
    now: NaiveDateTime,
) -> Result<(), EngineError> {
    let kills = incr_counter(deps, baselined, smf_id, Stat::Kills, 1).await?;
    for slug in rules::tiers_reached(rules::KILL_TIERS, kills) {
        unlock(deps, smf_id, slug, now).await?;
    }

    if rules::is_headshot(&event.hitloc) {
        let headshots = incr_counter(deps, baselined, smf_id, Stat::Headshots, 1).await?;
        for slug in rules::tiers_reached(rules::HEADSHOT_TIERS, headshots) {
            unlock(deps, smf_id, slug, now).await?;
        }
    }

    if event.inflictor.contains("vehicle") {
        let vehicle_kills = incr_counter(deps, baselined, smf_id, Stat::VehicleKills, 1).await?;
        for slug in rules::tiers_reached(rules::VEHICLE_KILL_TIERS, vehicle_kills) {
            unlock(deps, smf_id, slug, now).await?;
        }
    }

    if !event.weapon.is_empty() {
        let weapon_kills =
            incr_counter(deps, baselined, smf_id, Stat::WeaponKills(&event.weapon), 1).await?;
        if let Some(slug) = rules::weapon_mastery_tier(&event.weapon, weapon_kills) {
            unlock(deps, smf_id, slug, now).await?;
        }
    }

    if !event.attacker_guid.is_empty() {
        let streak = deps
            .cache
            .incr(&format!("streak:kill:{}", event.attacker_guid), 1)
            .await?;
        if let Some(slug) = rules::streak_tier_reached(streak) {
            unlock(deps, smf_id, slug, now).await?;
        }
    }

    Ok(())
}

async fn on_distance(
    deps: &EngineDeps,
    baselined: &Baselined,
    event: &GameEvent,
    smf_id: i64,
    now: NaiveDateTime,
) -> Result<(), EngineError> {
    let moved = event.walked + event.sprinted + event.swam + event.driven;
    if moved <= 0.0 {
        return Ok(());
    }

    let total = incr_float_counter(deps, baselined, smf_id, moved).await?;
    for slug in rules::marathon_tiers_crossed(total / 1_000.0) {
        unlock(deps, smf_id, slug, now).await?;
    }
    Ok(())
}

async fn on_health_pickup(
    deps: &EngineDeps,
    baselined: &Baselined,
    smf_id: i64,
    now: NaiveDateTime,
) -> Result<(), EngineError> {
    let pickups = incr_counter(deps, baselined, smf_id, Stat::HealthPickups, 1).await?;
    for slug in rules::tiers_reached(rules::HEALTH_TIERS, pickups) {
        unlock(deps, smf_id, slug, now).await?;
    }
    Ok(())
}

async fn on_objective(
    deps: &EngineDeps,
    baselined: &Baselined,
    smf_id: i64,
    now: NaiveDateTime,
) -> Result<(), EngineError> {
    let objectives = incr_counter(deps, baselined, smf_id, Stat::ObjectivesCompleted, 1).await?;
    for slug in rules::tiers_reached(rules::OBJECTIVE_TIERS, objectives) {
        unlock(deps, smf_id, slug, now).await?;
    }
    Ok(())
}

async fn on_win(
    deps: &EngineDeps,
    baselined: &Baselined,
    smf_id: i64,
    now: NaiveDateTime,
) -> Result<(), EngineError> {
    let wins = incr_counter(deps, baselined, smf_id, Stat::Wins, 1).await?;
    for slug in rules::tiers_reached(rules::VICTOR_TIERS, wins) {
        unlock(deps, smf_id, slug, now).await?;
    }
    Ok(())
}

/// Per-SMF cache counters the rules read. Names are part of the cache
/// keyspace contract with the read services.
enum Stat<'a> {
    Kills,
    Headshots,
    Distance,
    VehicleKills,
    HealthPickups,
    ObjectivesCompleted,
    Wins,
    WeaponKills(&'a str),
}

impl Stat<'_> {
    fn key(&self, smf_id: i64) -> String {
        match self {
            Stat::Kills => format!("stats:smf:{smf_id}:kills"),
            Stat::Headshots => format!("stats:smf:{smf_id}:headshots"),
            Stat::Distance => format!("stats:smf:{smf_id}:distance"),
            Stat::VehicleKills => format!("stats:smf:{smf_id}:vehicle_kills"),
            Stat::HealthPickups => format!("stats:smf:{smf_id}:health_pickups"),
            Stat::ObjectivesCompleted => format!("stats:smf:{smf_id}:objectives_completed"),
            Stat::Wins => format!("stats:smf:{smf_id}:wins"),
            Stat::WeaponKills(weapon) => format!("stats:smf:{smf_id}:weapon_kills:{weapon}"),
        }
    }

    fn baseline(&self) -> BaselineStat {
        match self {
            Stat::Kills => BaselineStat::TotalKills,
            Stat::Headshots => BaselineStat::TotalHeadshots,
            Stat::Distance => BaselineStat::TotalDistance,
            Stat::VehicleKills => BaselineStat::VehicleKills,
            Stat::HealthPickups => BaselineStat::HealthPickups,
            Stat::ObjectivesCompleted => BaselineStat::ObjectivesCompleted,
            Stat::Wins => BaselineStat::TotalWins,
            Stat::WeaponKills(weapon) => BaselineStat::WeaponKills(weapon.to_string()),
        }
    }
}

/// Increments a counter, reconciling it against the analytic store the
/// first time this process touches it. The reconciliation applies the
/// difference as another increment rather than overwriting, because a
/// concurrent increment may have landed between our read and the store
/// query.
async fn incr_counter(
    deps: &EngineDeps,
    baselined: &Baselined,
    smf_id: i64,
    stat: Stat<'_>,
    by: i64,
) -> Result<i64, EngineError> {
    let key = stat.key(smf_id);
    let mut value = deps.cache.incr(&key, by).await?;

    if mark_first_observation(baselined, &key) {
        let store = query_baseline(deps, smf_id, stat.baseline()).await? as i64;
        let delta = store - value;
        if delta > 0 {
            debug!("Backfilling {key}: cache={value} store={store}");
            value = deps.cache.incr(&key, delta).await?;
        }
    }

    Ok(value)
}

async fn incr_float_counter(
    deps: &EngineDeps,
    baselined: &Baselined,
    smf_id: i64,
    by: f64,
) -> Result<f64, EngineError> {
    let stat = Stat::Distance;
    let key = stat.key(smf_id);
    let mut value = deps.cache.incr_float(&key, by).await?;

    if mark_first_observation(baselined, &key) {
        let store = query_baseline(deps, smf_id, stat.baseline()).await?;
        let delta = store - value;
        if delta > 0.0 {
            debug!("Backfilling {key}: cache={value} store={store}");
            value = deps.cache.incr_float(&key, delta).await?;
        }
    }

    Ok(value)
}

fn mark_first_observation(baselined: &Baselined, key: &str) -> bool {
    let mut guard = match baselined.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    guard.insert(key.to_string())
}

async fn query_baseline(
    deps: &EngineDeps,
    smf_id: i64,
    stat: BaselineStat,
) -> Result<f64, EngineError> {
    let pool = deps.analytic_pool.clone();
    tokio::task::spawn_blocking(move || -> Result<f64, EngineError> {
        let mut conn = pool.get()?;
        Ok(db::baseline(&mut conn, smf_id, &stat)?)
    })
    .await?
}

/// Idempotent unlock: resolve the slug, early-return if already unlocked,
/// upsert, then announce on the pub/sub channel.
async fn unlock(
    deps: &EngineDeps,
    smf_id: i64,
    slug: &str,
    now: NaiveDateTime,
) -> Result<(), EngineError> {
    let Some(def) = deps.registry.get(slug) else {
        warn!("No achievement definition for slug={slug}; skipping unlock for smf_id={smf_id}");
        return Ok(());
    };

    let pool = deps.forum_pool.clone();
    let achievement_id = def.id;
    let target = def.target;
    let newly_unlocked = tokio::task::spawn_blocking(move || -> Result<bool, EngineError> {
        let mut conn = pool.get()?;
        if db::is_unlocked(&mut conn, smf_id, achievement_id)? {
            return Ok(false);
        }
        db::upsert_unlock(&mut conn, smf_id, achievement_id, target, now)?;
        Ok(true)
    })
    .await??;

    if !newly_unlocked {
        return Ok(());
    }

    let payload = serde_json::json!({
        "type": "achievement_unlock",
        "smf_id": smf_id,
        "slug": def.achievement_code,
        "title": def.title,
        "tier": def.tier,
        "points": def.points,
        "unlocked_at": now.and_utc().timestamp(),
    });
    deps.cache
        .publish("achievement_unlocks", &payload.to_string())
        .await?;

    info!(
        "Unlocked achievement slug={} smf_id={smf_id}",
        def.achievement_code
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stat_keys_follow_the_cache_contract() {
        assert_eq!(Stat::Kills.key(42), "stats:smf:42:kills");
        assert_eq!(
            Stat::WeaponKills("kar98k").key(42),
            "stats:smf:42:weapon_kills:kar98k"
        );
    }

    #[test]
    fn kill_family_events_are_attributed_to_the_attacker() {
        let event = GameEvent {
            event_type: "bot_killed".to_string(),
            attacker_smf_id: 5,
            player_smf_id: 6,
            ..GameEvent::default()
        };
        assert_eq!(event.actor_smf_id(), 5);
    }
}
