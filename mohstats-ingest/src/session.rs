use chrono::NaiveDateTime;
use itertools::Itertools;
use log::{debug, error, info, warn};
use mohstats_db::{ConnectionPool, db};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use telemetry::{EventKind, GameEvent};
use thiserror::Error;

use crate::cache::{Cache, CacheError};
use crate::queue::{EventQueue, Job};

const SERVER_ROW_TIMEOUT: Duration = Duration::from_secs(5);

/// Cached record of a currently ongoing match. Stored serialized as a field
/// of the `live_matches` hash.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiveMatch {
    pub map: String,
    pub gametype: String,
    pub started_at: i64,
    pub allies_score: i32,
    pub axis_score: i32,
    pub player_count: i32,
    pub round: i32,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("cache command failed")]
    Cache(#[from] CacheError),

    #[error("live match record was unreadable")]
    Json(#[from] serde_json::Error),

    #[error("couldn't get a database connection")]
    Pool(#[from] mohstats_db::PoolError),

    #[error("database query failed")]
    Db(#[from] mohstats_db::QueryError),
}

/// Owns the match/roster/server lifecycle in the cache and synthesizes
/// per-player `match_outcome` events when a match ends.
#[derive(Clone)]
pub struct SessionManager {
    cache: Cache,
    forum_pool: ConnectionPool,
    queue: EventQueue,
}

impl SessionManager {
    pub fn new(cache: Cache, forum_pool: ConnectionPool, queue: EventQueue) -> SessionManager {
        SessionManager {
            cache,
            forum_pool,
            queue,
        }
    }

    /// Phase-D entry point. Failures are logged and swallowed; session
    /// state self-heals from later events.
    pub async fn handle_deferred(&self, job: &Job) {
        let event = &job.event;
        let result = match event.kind() {
            EventKind::MatchStart => self.on_match_start(job).await,
            EventKind::MatchEnd => self.on_match_end(job).await,
            EventKind::Heartbeat => self.on_heartbeat(job).await,
            EventKind::TeamWin => self.on_team_win(event).await,
            EventKind::Chat => self.on_chat(job).await,
            // Roster writes normally run in phase S; they arrive here only
            // when the same batch also started the match, so they must land
            // after that handler's roster clear
            EventKind::TeamJoin | EventKind::Spawn => self.on_team_update(event).await,
            _ => Ok(()),
        };

        if let Err(err) = result {
            warn!(
                "Session handler failed: event_type={} match_id={} error={err}",
                event.event_type, event.match_id,
            );
        }
    }

    async fn on_match_start(&self, job: &Job) -> Result<(), SessionError> {
        let event = &job.event;
        let live = LiveMatch {
            map: event.map_name.clone(),
            gametype: event.gametype.clone(),
            started_at: job.ingested_at.timestamp(),
            allies_score: 0,
            axis_score: 0,
            player_count: event.player_count,
            round: event.round,
        };
        let payload = serde_json::to_string(&live)?;

        let mut pipe = redis::pipe();
        pipe.hset("live_matches", &event.match_id, payload).ignore();
        pipe.sadd("active_match_ids", &event.match_id).ignore();
        // A previous crash can leave a stale roster behind under this id
        pipe.del(format!("match:{}:teams", event.match_id)).ignore();
        self.cache.execute_pipeline(&pipe).await?;

        info!(
            "Match started: match_id={} map={} gametype={}",
            event.match_id, event.map_name, event.gametype
        );
        self.update_server_status(event, job.ingested_at.naive_utc());
        Ok(())
    }

    async fn on_heartbeat(&self, job: &Job) -> Result<(), SessionError> {
        let event = &job.event;
        let mut live = match self.cache.hget("live_matches", &event.match_id).await? {
            Some(json) => serde_json::from_str(&json).unwrap_or_else(|err| {
                warn!(
                    "Unreadable live match record for match_id={}; starting fresh: {err}",
                    event.match_id
                );
                LiveMatch::default()
            }),
            None => {
                debug!(
                    "Heartbeat for match_id={} with no live entry; creating one",
                    event.match_id
                );
                LiveMatch {
                    started_at: job.ingested_at.timestamp(),
                    ..LiveMatch::default()
                }
            }
        };

        live.allies_score = event.allies_score;
        live.axis_score = event.axis_score;
        live.player_count = event.player_count;
        live.round = event.round;
        if !event.map_name.is_empty() {
            live.map = event.map_name.clone();
        }
        if !event.gametype.is_empty() {
            live.gametype = event.gametype.clone();
        }

        let payload = serde_json::to_string(&live)?;
        self.cache
            .hset("live_matches", &event.match_id, &payload)
            .await?;

        self.update_server_status(event, job.ingested_at.naive_utc());
        Ok(())
    }

    async fn on_team_update(&self, event: &GameEvent) -> Result<(), SessionError> {
        if event.player_guid.is_empty() {
            return Ok(());
        }
        self.cache
            .hset(
                &format!("match:{}:teams", event.match_id),
                &event.player_guid,
                &event.player_team,
            )
            .await?;
        Ok(())
    }

    async fn on_team_win(&self, event: &GameEvent) -> Result<(), SessionError> {
        self.cache
            .set(
                &format!("match:{}:winner", event.match_id),
                &event.winning_team,
            )
            .await?;
        info!(
            "Team win recorded: match_id={} team={}",
            event.match_id, event.winning_team
        );
        Ok(())
    }

    async fn on_match_end(&self, job: &Job) -> Result<(), SessionError> {
        let event = &job.event;
        let match_id = &event.match_id;

        let live: Option<LiveMatch> = self
            .cache
            .hget("live_matches", match_id)
            .await?
            .and_then(|json| serde_json::from_str(&json).ok());
        if live.is_none() {
            warn!("match_end for match_id={match_id} with no live match entry");
        }
        let gametype = live
            .map(|l| l.gametype)
            .filter(|g| !g.is_empty())
            .unwrap_or_else(|| event.gametype.clone());

        let teams = self
            .cache
            .hgetall(&format!("match:{match_id}:teams"))
            .await?;
        let winner = self
            .cache
            .get(&format!("match:{match_id}:winner"))
            .await?
            .unwrap_or_default();

        if teams.is_empty() {
            debug!("No roster recorded for match_id={match_id}; no outcomes to synthesize");
        } else {
            let (names, smf_ids) = self.lookup_identities(teams.keys()).await?;
            let outcomes = synthesize_outcomes(event, &gametype, &teams, &winner, &names, &smf_ids);
            info!(
                "Synthesizing {} match outcomes for match_id={match_id} (winner={winner:?})",
                outcomes.len()
            );
            for outcome in outcomes {
                if !self.queue.enqueue(outcome).await {
                    warn!(
                        "Couldn't re-enqueue a match_outcome for match_id={match_id}; \
                        pipeline is shutting down"
                    );
                }
            }
        }

        let mut pipe = redis::pipe();
        pipe.hdel("live_matches", match_id).ignore();
        pipe.del(format!("match:{match_id}:teams")).ignore();
        pipe.del(format!("match:{match_id}:players")).ignore();
        pipe.del(format!("match:{match_id}:winner")).ignore();
        pipe.srem("active_match_ids", match_id).ignore();
        self.cache.execute_pipeline(&pipe).await?;

        info!("Match ended: match_id={match_id}");
        Ok(())
    }

    async fn on_chat(&self, job: &Job) -> Result<(), SessionError> {
        let event = &job.event;
        let Some(code) = event.message.trim().strip_prefix("!claim ") else {
            return Ok(());
        };
        let code = code.trim();
        if code.is_empty() || event.player_guid.is_empty() {
            return Ok(());
        }

        if self.cache.exists(&format!("identity_claim:{code}")).await? {
            self.cache
                .hset(
                    &format!("identity_claim:{code}:verified"),
                    &event.player_guid,
                    &job.ingested_at.timestamp().to_string(),
                )
                .await?;
            info!(
                "Identity claim verified for guid={} (code redacted)",
                event.player_guid
            );
        }
        Ok(())
    }

    /// Last-known name and SMF id per GUID, fetched in one pipeline round.
    async fn lookup_identities(
        &self,
        guids: impl Iterator<Item = &String>,
    ) -> Result<(HashMap<String, String>, HashMap<String, String>), SessionError> {
        let guids = guids.sorted().collect_vec();
        if guids.is_empty() {
            return Ok((HashMap::new(), HashMap::new()));
        }

        let mut pipe = redis::pipe();
        for guid in &guids {
            pipe.hget("player_names", guid.as_str());
            pipe.hget("player_smfids", guid.as_str());
        }
        let replies = self.cache.execute_pipeline(&pipe).await?;

        let mut names = HashMap::new();
        let mut smf_ids = HashMap::new();
        for (i, guid) in guids.iter().enumerate() {
            if let Some(name) = replies
                .get(i * 2)
                .and_then(|v| redis::from_redis_value::<Option<String>>(v).ok())
                .flatten()
            {
                names.insert((*guid).clone(), name);
            }
            if let Some(smf_id) = replies
                .get(i * 2 + 1)
                .and_then(|v| redis::from_redis_value::<Option<String>>(v).ok())
                .flatten()
            {
                smf_ids.insert((*guid).clone(), smf_id);
            }
        }
        Ok((names, smf_ids))
    }

    /// Writes the compact server status string and touches the relational
    /// `servers` row off to the side, bounded by a short deadline so a slow
    /// relational store never stalls phase D.
    fn update_server_status(&self, event: &GameEvent, now: NaiveDateTime) {
        if event.server_id.is_empty() {
            return;
        }

        let status = format!(
            "players:{},map:{},gametype:{}",
            event.player_count, event.map_name, event.gametype
        );
        let cache = self.cache.clone();
        let server_id = event.server_id.clone();
        {
            let server_id = server_id.clone();
            tokio::spawn(async move {
                if let Err(err) = cache.hset("live_servers", &server_id, &status).await {
                    warn!("Couldn't refresh live_servers for {server_id}: {err}");
                }
            });
        }

        let pool = self.forum_pool.clone();
        let map_name = event.map_name.clone();
        let gametype = event.gametype.clone();
        let player_count = event.player_count;
        tokio::spawn(async move {
            let update = tokio::task::spawn_blocking(move || -> Result<usize, SessionError> {
                let mut conn = pool.get()?;
                Ok(db::touch_server(
                    &mut conn,
                    &server_id,
                    &map_name,
                    &gametype,
                    player_count,
                    now,
                )?)
            });
            match tokio::time::timeout(SERVER_ROW_TIMEOUT, update).await {
                Ok(Ok(Ok(_))) => {}
                Ok(Ok(Err(err))) => warn!("servers row update failed: {err}"),
                Ok(Err(err)) => error!("servers row update task died: {err}"),
                Err(_) => warn!("servers row update timed out"),
            }
        });
    }
}

/// Builds one `match_outcome` event per rostered player. The timestamp is
/// deliberately zero so the normalizer stamps it with the ingestion wall
/// clock at re-enqueue.
fn synthesize_outcomes(
    source: &GameEvent,
    gametype: &str,
    teams: &HashMap<String, String>,
    winner: &str,
    names: &HashMap<String, String>,
    smf_ids: &HashMap<String, String>,
) -> Vec<GameEvent> {
    teams
        .iter()
        .sorted()
        .map(|(guid, team)| GameEvent {
            event_type: "match_outcome".to_string(),
            match_id: source.match_id.clone(),
            server_id: source.server_id.clone(),
            gametype: gametype.to_string(),
            player_guid: guid.clone(),
            player_name: names.get(guid).cloned().unwrap_or_default(),
            player_smf_id: smf_ids
                .get(guid)
                .and_then(|raw| raw.parse().ok())
                .unwrap_or(0),
            player_team: team.clone(),
            match_outcome: i32::from(!winner.is_empty() && team == winner),
            ..GameEvent::default()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn end_event() -> GameEvent {
        GameEvent {
            event_type: "match_end".to_string(),
            match_id: "m1".to_string(),
            server_id: "s1".to_string(),
            ..GameEvent::default()
        }
    }

    #[test]
    fn outcomes_split_winners_and_losers() {
        let teams = HashMap::from([
            ("p1".to_string(), "allies".to_string()),
            ("p2".to_string(), "axis".to_string()),
        ]);
        let names = HashMap::from([("p1".to_string(), "Ryan".to_string())]);
        let smf_ids = HashMap::from([("p1".to_string(), "42".to_string())]);

        let outcomes =
            synthesize_outcomes(&end_event(), "obj", &teams, "allies", &names, &smf_ids);

        assert_eq!(outcomes.len(), 2);
        let p1 = outcomes.iter().find(|o| o.player_guid == "p1").unwrap();
        let p2 = outcomes.iter().find(|o| o.player_guid == "p2").unwrap();
        assert_eq!(p1.match_outcome, 1);
        assert_eq!(p1.player_name, "Ryan");
        assert_eq!(p1.player_smf_id, 42);
        assert_eq!(p2.match_outcome, 0);
        assert_eq!(p2.player_smf_id, 0);
        for outcome in &outcomes {
            assert_eq!(outcome.gametype, "obj");
            assert_eq!(outcome.match_id, "m1");
            assert_eq!(outcome.timestamp, 0.0);
        }
    }

    #[test]
    fn a_missing_winner_means_no_winning_outcomes() {
        let teams = HashMap::from([
            ("p1".to_string(), "allies".to_string()),
            ("p2".to_string(), "axis".to_string()),
        ]);

        let outcomes = synthesize_outcomes(
            &end_event(),
            "tdm",
            &teams,
            "",
            &HashMap::new(),
            &HashMap::new(),
        );

        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| o.match_outcome == 0));
    }

    #[test]
    fn claim_codes_parse_out_of_chat_messages() {
        assert_eq!(
            "!claim ABC123".trim().strip_prefix("!claim "),
            Some("ABC123")
        );
        assert_eq!("hello there".strip_prefix("!claim "), None);
    }
}
