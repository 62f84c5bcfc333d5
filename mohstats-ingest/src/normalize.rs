use mohstats_db::models::NewRawEvent;
use telemetry::{EventKind, GameEvent, PlayerView, coerce_match_id, sanitize_timestamp,
                strip_color_codes};

use crate::queue::Job;

/// Projects one event into the fixed analytic row layout. Exactly one rule
/// applies per event type: it picks which sub-record fills the `actor_*`
/// columns, which fills the `target_*` columns, and which domain fields
/// ride along.
pub fn normalize(job: &Job) -> Result<NewRawEvent, serde_json::Error> {
    let event = &job.event;
    let ingested_at = job.ingested_at.timestamp_millis() as f64 / 1_000.0;

    let mut row = empty_row(event, ingested_at)?;

    let kind = event.kind();
    match kind {
        k if k.is_kill_family() => {
            fill_actor(&mut row, event.attacker(), &event.weapon);
            fill_target(&mut row, event.victim());
            row.hitloc = event.hitloc.clone();
        }
        EventKind::Damage | EventKind::Pain => {
            fill_actor(&mut row, event.attacker(), "");
            fill_target(&mut row, event.victim());
            row.damage = event.damage;
        }
        EventKind::WeaponFire | EventKind::Reload | EventKind::WeaponChange => {
            fill_actor(&mut row, event.player(), &event.weapon);
        }
        EventKind::WeaponHit => {
            fill_actor(&mut row, event.player(), "");
            fill_target(&mut row, event.victim());
            row.hitloc = event.hitloc.clone();
        }
        EventKind::Distance => {
            fill_actor(&mut row, event.player(), "");
            row.distance = event.walked + event.sprinted + event.swam + event.driven;
        }
        EventKind::MatchOutcome => {
            // gametype rides in the weapon column so outcome rows are
            // self-describing without a schema change
            fill_actor(&mut row, event.player(), &event.gametype);
            row.match_outcome = event.match_outcome;
        }
        EventKind::ObjectiveUpdate | EventKind::ObjectiveCapture => {
            fill_actor(&mut row, event.player(), &event.objective);
        }
        EventKind::VehicleEnter
        | EventKind::VehicleExit
        | EventKind::VehicleCrash
        | EventKind::TurretEnter => {
            fill_actor(&mut row, event.player(), "");
            row.target_id = event.entity.clone();
            row.hitloc = event.seat.clone();
        }
        _ => {
            fill_actor(&mut row, event.player(), &event.item);
        }
    }

    Ok(row)
}

fn empty_row(event: &GameEvent, ingested_at: f64) -> Result<NewRawEvent, serde_json::Error> {
    Ok(NewRawEvent {
        timestamp: sanitize_timestamp(event.timestamp, ingested_at),
        match_id: coerce_match_id(&event.match_id),
        server_id: event.server_id.clone(),
        map_name: event.map_name.clone(),
        event_type: event.event_type.clone(),
        actor_id: String::new(),
        actor_name: String::new(),
        actor_team: String::new(),
        actor_smf_id: 0,
        actor_weapon: String::new(),
        actor_pos_x: 0.0,
        actor_pos_y: 0.0,
        actor_pos_z: 0.0,
        actor_pitch: 0.0,
        actor_yaw: 0.0,
        actor_stance: String::new(),
        target_id: String::new(),
        target_name: String::new(),
        target_team: String::new(),
        target_smf_id: 0,
        target_pos_x: 0.0,
        target_pos_y: 0.0,
        target_pos_z: 0.0,
        target_stance: String::new(),
        damage: 0,
        hitloc: String::new(),
        distance: 0.0,
        raw_json: event.encode()?,
        match_outcome: 0,
        round_number: event.round,
    })
}

fn fill_actor(row: &mut NewRawEvent, view: PlayerView<'_>, weapon: &str) {
    row.actor_id = view.guid.to_string();
    row.actor_name = strip_color_codes(view.name);
    row.actor_team = view.team.to_string();
    row.actor_smf_id = view.smf_id;
    row.actor_weapon = weapon.to_string();
    row.actor_pos_x = view.x;
    row.actor_pos_y = view.y;
    row.actor_pos_z = view.z;
    row.actor_pitch = view.pitch;
    row.actor_yaw = view.yaw;
    row.actor_stance = view.stance.to_string();
}

fn fill_target(row: &mut NewRawEvent, view: PlayerView<'_>) {
    row.target_id = view.guid.to_string();
    row.target_name = strip_color_codes(view.name);
    row.target_team = view.team.to_string();
    row.target_smf_id = view.smf_id;
    row.target_pos_x = view.x;
    row.target_pos_y = view.y;
    row.target_pos_z = view.z;
    row.target_stance = view.stance.to_string();
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use telemetry::MIN_VALID_UNIX_TS;

    fn job(event: GameEvent) -> Job {
        Job {
            event,
            ingested_at: Utc::now(),
        }
    }

    #[test]
    fn kill_projects_attacker_versus_victim() {
        let row = normalize(&job(GameEvent {
            event_type: "kill".to_string(),
            timestamp: 1_736_600_000.0,
            attacker_guid: "g1".to_string(),
            attacker_name: "^1Red".to_string(),
            attacker_team: "allies".to_string(),
            attacker_smf_id: 42,
            victim_guid: "g2".to_string(),
            victim_name: "Blue".to_string(),
            weapon: "kar98k".to_string(),
            hitloc: "head".to_string(),
            ..GameEvent::default()
        }))
        .unwrap();

        assert_eq!(row.actor_id, "g1");
        assert_eq!(row.actor_name, "Red");
        assert_eq!(row.actor_smf_id, 42);
        assert_eq!(row.actor_weapon, "kar98k");
        assert_eq!(row.target_id, "g2");
        assert_eq!(row.hitloc, "head");
        assert_eq!(row.timestamp, 1_736_600_000.0);
    }

    #[test]
    fn damage_fills_the_damage_column() {
        let row = normalize(&job(GameEvent {
            event_type: "damage".to_string(),
            attacker_guid: "g1".to_string(),
            victim_guid: "g2".to_string(),
            damage: 35,
            ..GameEvent::default()
        }))
        .unwrap();

        assert_eq!(row.actor_id, "g1");
        assert_eq!(row.target_id, "g2");
        assert_eq!(row.damage, 35);
    }

    #[test]
    fn weapon_fire_is_actor_only() {
        let row = normalize(&job(GameEvent {
            event_type: "weapon_fire".to_string(),
            player_guid: "g1".to_string(),
            weapon: "thompson".to_string(),
            ..GameEvent::default()
        }))
        .unwrap();

        assert_eq!(row.actor_id, "g1");
        assert_eq!(row.actor_weapon, "thompson");
        assert_eq!(row.target_id, "");
    }

    #[test]
    fn distance_sums_the_movement_fields() {
        let row = normalize(&job(GameEvent {
            event_type: "distance".to_string(),
            player_guid: "g1".to_string(),
            walked: 100.0,
            sprinted: 50.0,
            swam: 5.0,
            driven: 200.0,
            ..GameEvent::default()
        }))
        .unwrap();

        assert_eq!(row.distance, 355.0);
    }

    #[test]
    fn match_outcome_carries_gametype_in_the_weapon_column() {
        let row = normalize(&job(GameEvent {
            event_type: "match_outcome".to_string(),
            player_guid: "g1".to_string(),
            gametype: "obj".to_string(),
            match_outcome: 1,
            ..GameEvent::default()
        }))
        .unwrap();

        assert_eq!(row.actor_weapon, "obj");
        assert_eq!(row.match_outcome, 1);
    }

    #[test]
    fn vehicle_events_put_the_entity_in_target_id() {
        let row = normalize(&job(GameEvent {
            event_type: "vehicle_enter".to_string(),
            player_guid: "g1".to_string(),
            entity: "tank_01".to_string(),
            seat: "driver".to_string(),
            ..GameEvent::default()
        }))
        .unwrap();

        assert_eq!(row.target_id, "tank_01");
        assert_eq!(row.hitloc, "driver");
    }

    #[test]
    fn unknown_types_use_the_default_projection() {
        let row = normalize(&job(GameEvent {
            event_type: "flag_drop".to_string(),
            player_guid: "g1".to_string(),
            item: "flag".to_string(),
            ..GameEvent::default()
        }))
        .unwrap();

        assert_eq!(row.event_type, "flag_drop");
        assert_eq!(row.actor_id, "g1");
        assert_eq!(row.actor_weapon, "flag");
    }

    #[test]
    fn game_relative_timestamps_become_ingest_wall_clock() {
        let j = job(GameEvent {
            event_type: "kill".to_string(),
            timestamp: 37.9,
            ..GameEvent::default()
        });
        let row = normalize(&j).unwrap();

        assert!(row.timestamp >= MIN_VALID_UNIX_TS);
        let ingested = j.ingested_at.timestamp_millis() as f64 / 1_000.0;
        assert!((row.timestamp - ingested).abs() < 0.001);
    }

    #[test]
    fn non_uuid_match_ids_coerce_identically_across_batches() {
        let a = normalize(&job(GameEvent {
            event_type: "kill".to_string(),
            match_id: "no_match".to_string(),
            ..GameEvent::default()
        }))
        .unwrap();
        let b = normalize(&job(GameEvent {
            event_type: "spawn".to_string(),
            match_id: "no_match".to_string(),
            ..GameEvent::default()
        }))
        .unwrap();

        assert_eq!(a.match_id, b.match_id);
    }

    #[test]
    fn raw_json_round_trips_to_the_original_event() {
        let event = GameEvent {
            event_type: "kill".to_string(),
            attacker_name: "^1Red".to_string(),
            damage: 35,
            ..GameEvent::default()
        };
        let row = normalize(&job(event.clone())).unwrap();
        let replayed = GameEvent::decode(row.raw_json.as_bytes()).unwrap();

        // The row keeps the unsanitized original; sanitization is
        // projection-only
        assert_eq!(replayed, event);
        assert_eq!(replayed.attacker_name, "^1Red");
    }
}
