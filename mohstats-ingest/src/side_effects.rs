use chrono::Utc;
use log::{debug, error, info, warn};
use mohstats_db::models::NewPlayerAchievement;
use mohstats_db::{ConnectionPool, db};
use redis::Value;
use std::sync::Arc;
use telemetry::{EventKind, strip_color_codes};
use thiserror::Error;

use crate::achievements::{AchievementRegistry, rules};
use crate::cache::Cache;
use crate::queue::Job;
use crate::session::SessionManager;

/// Per-GUID kill counts that trigger a fast-path unlock check (`KILL_k`
/// slugs).
pub const KILL_THRESHOLDS: &[i64] = &[100, 500, 1_000, 5_000, 10_000];

/// Per-GUID headshot counts that trigger a fast-path unlock check (`HS_k`
/// slugs).
pub const HEADSHOT_THRESHOLDS: &[i64] = &[50, 100, 500, 1_000];

#[derive(Debug, Error)]
enum PersistError {
    #[error("couldn't get a database connection")]
    Pool(#[from] mohstats_db::PoolError),

    #[error(transparent)]
    Db(#[from] mohstats_db::QueryError),
}

/// A counter increment issued in phase S whose reply we need in phase V.
struct CounterCheck {
    /// Position of the increment's reply in the phase-S pipeline response.
    slot: usize,
    guid: String,
    smf_id: i64,
    thresholds: &'static [i64],
    slug_prefix: &'static str,
}

struct PendingUnlock {
    guid: String,
    smf_id: i64,
    slug: String,
}

/// The post-insert pipeline: segregate the batch into pipelined cache
/// writes (S), verify threshold crossings against the same round's replies
/// (V), persist new unlocks in one statement (P), then hand the deferred
/// events to the session-state manager in order (D).
#[derive(Clone)]
pub struct SideEffects {
    cache: Cache,
    forum_pool: ConnectionPool,
    registry: Arc<AchievementRegistry>,
    session: SessionManager,
}

impl SideEffects {
    pub fn new(
        cache: Cache,
        forum_pool: ConnectionPool,
        registry: Arc<AchievementRegistry>,
        session: SessionManager,
    ) -> SideEffects {
        SideEffects {
            cache,
            forum_pool,
            registry,
            session,
        }
    }

    /// Cache and relational failures in here are logged and skipped, never
    /// propagated: the analytic log is already written and baseline
    /// backfill reconstructs lost counters.
    pub async fn process_batch(&self, batch: Vec<Job>) {
        // Matches started inside this batch: their roster writes must run
        // after the match_start handler clears the stale roster, so they go
        // through phase D instead of phase S
        let started_here: std::collections::HashSet<&str> = batch
            .iter()
            .filter(|job| job.event.kind() == EventKind::MatchStart)
            .map(|job| job.event.match_id.as_str())
            .collect();

        // Phase S
        let mut pipe = redis::pipe();
        let mut issued = 0usize;
        let mut slot = 0usize;
        let mut checks: Vec<CounterCheck> = Vec::new();
        let mut deferred: Vec<usize> = Vec::new();

        for (idx, job) in batch.iter().enumerate() {
            let event = &job.event;
            match event.kind() {
                kind if kind.counts_as_kill() => {
                    let guid = event.attacker_guid.as_str();
                    if guid.is_empty() || guid == "world" {
                        continue;
                    }
                    pipe.incr(format!("player:{guid}:kills"), 1);
                    issued += 1;
                    checks.push(CounterCheck {
                        slot,
                        guid: guid.to_string(),
                        smf_id: event.attacker_smf_id,
                        thresholds: KILL_THRESHOLDS,
                        slug_prefix: "KILL",
                    });
                    slot += 1;

                    if rules::is_headshot(&event.hitloc) {
                        pipe.incr(format!("player:{guid}:headshots"), 1);
                        issued += 1;
                        checks.push(CounterCheck {
                            slot,
                            guid: guid.to_string(),
                            smf_id: event.attacker_smf_id,
                            thresholds: HEADSHOT_THRESHOLDS,
                            slug_prefix: "HS",
                        });
                        slot += 1;
                    }
                }
                EventKind::Connect => {
                    let guid = event.player_guid.as_str();
                    if guid.is_empty() {
                        continue;
                    }
                    pipe.hset("player_names", guid, strip_color_codes(&event.player_name))
                        .ignore();
                    pipe.sadd(format!("match:{}:players", event.match_id), guid)
                        .ignore();
                    issued += 2;
                    if event.player_smf_id > 0 {
                        pipe.hset("player_smfids", guid, event.player_smf_id).ignore();
                        issued += 1;
                    }
                }
                EventKind::Disconnect => {
                    pipe.srem(
                        format!("match:{}:players", event.match_id),
                        &event.player_guid,
                    )
                    .ignore();
                    issued += 1;
                }
                EventKind::TeamJoin | EventKind::Spawn => {
                    if event.player_guid.is_empty() {
                        continue;
                    }
                    if started_here.contains(event.match_id.as_str()) {
                        deferred.push(idx);
                        continue;
                    }
                    pipe.hset(
                        format!("match:{}:teams", event.match_id),
                        &event.player_guid,
                        &event.player_team,
                    )
                    .ignore();
                    issued += 1;
                }
                _ => deferred.push(idx),
            }
        }

        let responses = if issued > 0 {
            match self.cache.execute_pipeline(&pipe).await {
                Ok(values) => values,
                Err(err) => {
                    warn!(
                        "Side-effect cache pipeline failed; counters for this batch may be \
                        lost until backfill: {err}"
                    );
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        // Phase V: piggy-back the membership checks on the values the same
        // round produced, so there is no read-after-write race
        let hits = threshold_hits(checks, &responses);
        if !hits.is_empty() {
            let mut membership = redis::pipe();
            for hit in &hits {
                membership.sismember(format!("player:{}:achievements", hit.guid), &hit.slug);
            }
            match self.cache.execute_pipeline(&membership).await {
                Ok(answers) => {
                    let new_unlocks = absent_only(hits, &answers);
                    if !new_unlocks.is_empty() {
                        // Phase P
                        self.persist_unlocks(new_unlocks).await;
                    }
                }
                Err(err) => warn!("Achievement membership check pipeline failed: {err}"),
            }
        }

        // Phase D: deferred events mutate session state and may re-enqueue
        // synthesized events, in batch order
        for idx in deferred {
            self.session.handle_deferred(&batch[idx]).await;
        }
    }

    async fn persist_unlocks(&self, unlocks: Vec<PendingUnlock>) {
        let now = Utc::now().naive_utc();

        let mut rows: Vec<NewPlayerAchievement> = Vec::new();
        let mut announcements: Vec<String> = Vec::new();
        for unlock in unlocks.iter().filter(|unlock| unlock.smf_id > 0) {
            let Some(def) = self.registry.get(&unlock.slug) else {
                warn!(
                    "No achievement definition for slug={}; recording cache membership only",
                    unlock.slug
                );
                continue;
            };
            rows.push(NewPlayerAchievement {
                smf_member_id: unlock.smf_id,
                achievement_id: def.id,
                unlocked: true,
                unlocked_at: Some(now),
                progress: def.target,
            });
            announcements.push(
                serde_json::json!({
                    "type": "achievement_unlock",
                    "smf_id": unlock.smf_id,
                    "slug": def.achievement_code,
                    "title": def.title,
                    "tier": def.tier,
                    "points": def.points,
                    "unlocked_at": now.and_utc().timestamp(),
                })
                .to_string(),
            );
        }

        if !rows.is_empty() {
            let count = rows.len();
            let pool = self.forum_pool.clone();
            let result = tokio::task::spawn_blocking(move || -> Result<usize, PersistError> {
                let mut conn = pool.get()?;
                Ok(db::bulk_record_unlocks(&mut conn, &rows)?)
            })
            .await;
            match result {
                Ok(Ok(inserted)) => {
                    info!("Recorded {inserted} of {count} threshold unlocks");
                }
                Ok(Err(err)) => warn!(
                    "Couldn't persist {count} threshold unlocks; they will re-fire on the \
                    next crossing: {err}"
                ),
                Err(err) => error!("Unlock persistence task died: {err}"),
            }
        }

        // Membership is recorded for every unlock, including anonymous
        // GUIDs that have no relational row to write; the announcements
        // ride in the same round trip
        let mut pipe = redis::pipe();
        for unlock in &unlocks {
            pipe.sadd(format!("player:{}:achievements", unlock.guid), &unlock.slug)
                .ignore();
        }
        for announcement in &announcements {
            pipe.publish("achievement_unlocks", announcement).ignore();
        }
        if let Err(err) = self.cache.execute_pipeline(&pipe).await {
            warn!("Couldn't record unlock membership in cache: {err}");
        } else {
            debug!("Recorded {} unlock memberships", unlocks.len());
        }
    }
}

/// Phase V selection: a check fires when the incremented value landed
/// exactly on one of its thresholds.
fn threshold_hits(checks: Vec<CounterCheck>, responses: &[Value]) -> Vec<PendingUnlock> {
    checks
        .into_iter()
        .filter_map(|check| {
            let value = responses
                .get(check.slot)
                .and_then(|v| redis::from_redis_value::<i64>(v).ok())?;
            if check.thresholds.contains(&value) {
                Some(PendingUnlock {
                    guid: check.guid,
                    smf_id: check.smf_id,
                    slug: format!("{}_{}", check.slug_prefix, value),
                })
            } else {
                None
            }
        })
        .collect()
}

/// Phase V filter: keep only the unlocks whose membership check answered
/// "absent".
fn absent_only(pending: Vec<PendingUnlock>, answers: &[Value]) -> Vec<PendingUnlock> {
    pending
        .into_iter()
        .zip(answers)
        .filter_map(|(unlock, answer)| {
            match redis::from_redis_value::<bool>(answer) {
                Ok(false) => Some(unlock),
                Ok(true) => None,
                // An unreadable answer means we can't prove absence; skip
                // rather than double-unlock
                Err(_) => None,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(slot: usize, guid: &str) -> CounterCheck {
        CounterCheck {
            slot,
            guid: guid.to_string(),
            smf_id: 42,
            thresholds: KILL_THRESHOLDS,
            slug_prefix: "KILL",
        }
    }

    #[test]
    fn a_counter_landing_on_a_threshold_fires() {
        let hits = threshold_hits(vec![check(0, "g1")], &[Value::Int(100)]);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].slug, "KILL_100");
        assert_eq!(hits[0].guid, "g1");
    }

    #[test]
    fn a_counter_between_thresholds_does_not_fire() {
        assert!(threshold_hits(vec![check(0, "g1")], &[Value::Int(101)]).is_empty());
        assert!(threshold_hits(vec![check(0, "g1")], &[Value::Int(99)]).is_empty());
    }

    #[test]
    fn missing_replies_are_skipped() {
        assert!(threshold_hits(vec![check(5, "g1")], &[Value::Int(100)]).is_empty());
    }

    #[test]
    fn only_absent_members_become_unlocks() {
        let pending = vec![
            PendingUnlock {
                guid: "g1".to_string(),
                smf_id: 1,
                slug: "KILL_100".to_string(),
            },
            PendingUnlock {
                guid: "g2".to_string(),
                smf_id: 2,
                slug: "KILL_500".to_string(),
            },
        ];
        let kept = absent_only(pending, &[Value::Int(1), Value::Int(0)]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].slug, "KILL_500");
    }
}
