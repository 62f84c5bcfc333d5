mod raw;

pub use raw::*;

use chrono::NaiveDateTime;
use diesel::dsl::exists;
use diesel::{PgConnection, prelude::*};

use crate::models::{DbAchievement, NewPlayerAchievement, NewServer};

/// Loads every achievement definition. Called once at startup and again on
/// registry reload.
pub fn load_achievement_definitions(conn: &mut PgConnection) -> QueryResult<Vec<DbAchievement>> {
    use crate::forum_schema::mohaa_achievements::dsl;

    dsl::mohaa_achievements
        .select(DbAchievement::as_select())
        .order_by(dsl::achievement_code.asc())
        .get_results(conn)
}

pub fn is_unlocked(
    conn: &mut PgConnection,
    smf_member_id: i64,
    achievement_id: i32,
) -> QueryResult<bool> {
    use crate::forum_schema::mohaa_player_achievements::dsl;

    diesel::select(exists(
        dsl::mohaa_player_achievements.filter(
            dsl::smf_member_id
                .eq(smf_member_id)
                .and(dsl::achievement_id.eq(achievement_id))
                .and(dsl::unlocked.eq(true)),
        ),
    ))
    .get_result(conn)
}

/// Idempotent single-unlock upsert. The unique key on
/// `(smf_member_id, achievement_id)` makes replays a no-op apart from
/// refreshing `unlocked_at`.
pub fn upsert_unlock(
    conn: &mut PgConnection,
    smf_member_id: i64,
    achievement_id: i32,
    target: i32,
    at: NaiveDateTime,
) -> QueryResult<usize> {
    use crate::forum_schema::mohaa_player_achievements::dsl;

    NewPlayerAchievement {
        smf_member_id,
        achievement_id,
        unlocked: true,
        unlocked_at: Some(at),
        progress: target,
    }
    .insert_into(dsl::mohaa_player_achievements)
    .on_conflict((dsl::smf_member_id, dsl::achievement_id))
    .do_update()
    .set((
        dsl::unlocked.eq(true),
        dsl::unlocked_at.eq(at),
        dsl::progress.eq(target),
    ))
    .execute(conn)
}

/// One multi-row insert for a batch of unlocks discovered by the
/// side-effect pipeline. Conflicting rows (already unlocked) are skipped
/// entirely, which is what makes batch replays safe.
pub fn bulk_record_unlocks(
    conn: &mut PgConnection,
    unlocks: &[NewPlayerAchievement],
) -> QueryResult<usize> {
    use crate::forum_schema::mohaa_player_achievements::dsl;

    diesel::insert_into(dsl::mohaa_player_achievements)
        .values(unlocks)
        .on_conflict((dsl::smf_member_id, dsl::achievement_id))
        .do_nothing()
        .execute(conn)
}

/// Heartbeat-driven server directory upsert.
pub fn touch_server(
    conn: &mut PgConnection,
    server_key: &str,
    map_name: &str,
    gametype: &str,
    player_count: i32,
    at: NaiveDateTime,
) -> QueryResult<usize> {
    use crate::forum_schema::servers::dsl;

    NewServer {
        server_key,
        map_name,
        gametype,
        player_count,
        last_seen: at,
        is_active: true,
    }
    .insert_into(dsl::servers)
    .on_conflict(dsl::server_key)
    .do_update()
    .set((
        dsl::map_name.eq(map_name),
        dsl::gametype.eq(gametype),
        dsl::player_count.eq(player_count),
        dsl::last_seen.eq(at),
        dsl::is_active.eq(true),
    ))
    .execute(conn)
}
