use diesel::sql_types::{BigInt, Text};
use diesel::{PgConnection, prelude::*, sql_query};

use crate::models::NewRawEvent;

/// One multi-row insert covering a whole batch. From the reader's
/// perspective the batch is atomic: either every row is visible or none.
pub fn insert_raw_events(conn: &mut PgConnection, rows: &[NewRawEvent]) -> QueryResult<usize> {
    use crate::analytic_schema::raw_events::dsl;

    diesel::insert_into(dsl::raw_events)
        .values(rows)
        .execute(conn)
}

/// The per-player aggregates the achievement engine can rebuild a cache
/// counter from. Each variant corresponds to one cache stat.
#[derive(Debug, Clone, PartialEq)]
pub enum BaselineStat {
    TotalKills,
    TotalHeadshots,
    TotalDistance,
    VehicleKills,
    HealthPickups,
    ObjectivesCompleted,
    TotalWins,
    WeaponKills(String),
}

#[derive(QueryableByName)]
struct CountRow {
    #[diesel(sql_type = BigInt)]
    value: i64,
}

#[derive(QueryableByName)]
struct SumRow {
    #[diesel(sql_type = diesel::sql_types::Nullable<diesel::sql_types::Double>)]
    value: Option<f64>,
}

/// Replays the analytic log into a single aggregate for one player. This is
/// the source of truth a stale or lost cache counter is rebuilt from.
///
/// `kill` and `bot_killed` are counted interchangeably, matching the
/// increments the side-effect pipeline applies. The `inflictor` and `item`
/// predicates reach into `raw_json` because those source fields are not
/// dedicated row columns.
pub fn baseline(conn: &mut PgConnection, smf_id: i64, stat: &BaselineStat) -> QueryResult<f64> {
    let count = |conn: &mut PgConnection, sql: &str| -> QueryResult<f64> {
        sql_query(sql)
            .bind::<BigInt, _>(smf_id)
            .get_result::<CountRow>(conn)
            .map(|row| row.value as f64)
    };

    match stat {
        BaselineStat::TotalKills => count(
            conn,
            "SELECT count(*) AS value FROM raw_events \
             WHERE actor_smf_id = $1 AND event_type IN ('kill', 'bot_killed')",
        ),
        BaselineStat::TotalHeadshots => count(
            conn,
            "SELECT count(*) AS value FROM raw_events \
             WHERE actor_smf_id = $1 AND event_type IN ('kill', 'bot_killed') \
               AND hitloc IN ('head', 'helmet')",
        ),
        BaselineStat::TotalDistance => sql_query(
            "SELECT sum(distance) AS value FROM raw_events \
             WHERE actor_smf_id = $1 AND event_type = 'distance'",
        )
        .bind::<BigInt, _>(smf_id)
        .get_result::<SumRow>(conn)
        .map(|row| row.value.unwrap_or(0.0)),
        BaselineStat::VehicleKills => count(
            conn,
            "SELECT count(*) AS value FROM raw_events \
             WHERE actor_smf_id = $1 AND event_type IN ('kill', 'bot_killed') \
               AND (raw_json::jsonb ->> 'inflictor') LIKE '%vehicle%'",
        ),
        BaselineStat::HealthPickups => count(
            conn,
            "SELECT count(*) AS value FROM raw_events \
             WHERE actor_smf_id = $1 AND (event_type = 'health_pickup' \
               OR (event_type = 'item_pickup' \
                   AND (raw_json::jsonb ->> 'item') LIKE '%health%'))",
        ),
        BaselineStat::ObjectivesCompleted => count(
            conn,
            "SELECT count(*) AS value FROM raw_events \
             WHERE actor_smf_id = $1 \
               AND event_type IN ('objective_update', 'objective_capture')",
        ),
        BaselineStat::TotalWins => count(
            conn,
            "SELECT count(*) AS value FROM raw_events \
             WHERE actor_smf_id = $1 AND (event_type = 'team_win' \
               OR (event_type = 'match_outcome' AND match_outcome = 1))",
        ),
        BaselineStat::WeaponKills(weapon) => sql_query(
            "SELECT count(*) AS value FROM raw_events \
             WHERE actor_smf_id = $1 AND event_type IN ('kill', 'bot_killed') \
               AND actor_weapon = $2",
        )
        .bind::<BigInt, _>(smf_id)
        .bind::<Text, _>(weapon.clone())
        .get_result::<CountRow>(conn)
        .map(|row| row.value as f64),
    }
}
