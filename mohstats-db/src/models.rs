use chrono::NaiveDateTime;
use diesel::prelude::*;

/// One normalized analytic row. The projection from an event to this layout
/// is the normalizer's job; this struct is just the insertable shape.
#[derive(Debug, Insertable)]
#[diesel(table_name = crate::analytic_schema::raw_events)]
#[diesel(treat_none_as_default_value = false)]
pub struct NewRawEvent {
    pub timestamp: f64,
    pub match_id: uuid::Uuid,
    pub server_id: String,
    pub map_name: String,
    pub event_type: String,
    pub actor_id: String,
    pub actor_name: String,
    pub actor_team: String,
    pub actor_smf_id: i64,
    pub actor_weapon: String,
    pub actor_pos_x: f64,
    pub actor_pos_y: f64,
    pub actor_pos_z: f64,
    pub actor_pitch: f64,
    pub actor_yaw: f64,
    pub actor_stance: String,
    pub target_id: String,
    pub target_name: String,
    pub target_team: String,
    pub target_smf_id: i64,
    pub target_pos_x: f64,
    pub target_pos_y: f64,
    pub target_pos_z: f64,
    pub target_stance: String,
    pub damage: i32,
    pub hitloc: String,
    pub distance: f64,
    pub raw_json: String,
    pub match_outcome: i32,
    pub round_number: i32,
}

#[derive(Debug, Clone, Identifiable, Queryable, Selectable)]
#[diesel(table_name = crate::forum_schema::mohaa_achievements)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DbAchievement {
    pub id: i32,
    pub achievement_code: String,
    pub title: String,
    pub description: String,
    pub category: String,
    pub tier: String,
    pub points: i32,
    pub target: i32,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::forum_schema::mohaa_player_achievements)]
pub struct NewPlayerAchievement {
    pub smf_member_id: i64,
    pub achievement_id: i32,
    pub unlocked: bool,
    pub unlocked_at: Option<NaiveDateTime>,
    pub progress: i32,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::forum_schema::servers)]
pub struct NewServer<'a> {
    pub server_key: &'a str,
    pub map_name: &'a str,
    pub gametype: &'a str,
    pub player_count: i32,
    pub last_seen: NaiveDateTime,
    pub is_active: bool,
}
