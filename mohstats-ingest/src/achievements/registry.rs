use hashbrown::HashMap;
use log::{info, warn};
use mohstats_db::models::DbAchievement;
use mohstats_db::{ConnectionPool, db};
use std::sync::RwLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("couldn't get a database connection")]
    Pool(#[from] mohstats_db::PoolError),

    #[error("couldn't load achievement definitions")]
    Query(#[from] mohstats_db::QueryError),
}

/// In-memory achievement definition registry, keyed by slug. Loaded once at
/// startup from `mohaa_achievements`; `reload` hot-swaps the whole map.
pub struct AchievementRegistry {
    forum_pool: ConnectionPool,
    defs: RwLock<HashMap<String, DbAchievement>>,
}

impl AchievementRegistry {
    pub fn load(forum_pool: ConnectionPool) -> Result<AchievementRegistry, RegistryError> {
        let defs = fetch_definitions(&forum_pool)?;
        info!("Loaded {} achievement definitions", defs.len());
        Ok(AchievementRegistry {
            forum_pool,
            defs: RwLock::new(defs),
        })
    }

    /// Re-reads the definitions and swaps them in. The write lock is held
    /// only for the swap itself, so rule evaluation never waits on the
    /// database here.
    pub fn reload(&self) -> Result<usize, RegistryError> {
        let fresh = fetch_definitions(&self.forum_pool)?;
        let count = fresh.len();
        let mut guard = match self.defs.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = fresh;
        drop(guard);
        info!("Reloaded {count} achievement definitions");
        Ok(count)
    }

    pub fn get(&self, slug: &str) -> Option<DbAchievement> {
        let guard = match self.defs.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.get(slug).cloned()
    }

    pub fn len(&self) -> usize {
        let guard = match self.defs.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn fetch_definitions(
    pool: &ConnectionPool,
) -> Result<HashMap<String, DbAchievement>, RegistryError> {
    let mut conn = pool.get()?;
    let defs = db::load_achievement_definitions(&mut conn)?;

    let mut map = HashMap::with_capacity(defs.len());
    for def in defs {
        // The registry is authoritative; two rows claiming the same slug is
        // an operational error in the definitions table
        if let Some(prev) = map.insert(def.achievement_code.clone(), def) {
            warn!(
                "Duplicate achievement definition for slug {}; keeping the later row",
                prev.achievement_code
            );
        }
    }
    Ok(map)
}
