use serde::{Deserialize, Serialize};
use std::str::FromStr;
use strum::EnumString;
use thiserror::Error;

use crate::flex;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed event envelope")]
    Malformed(#[from] serde_json::Error),
}

/// The closed set of event types the pipeline knows projection and
/// side-effect rules for. Wire strings outside this set still decode (the
/// raw string is kept on the event) and are handled by the default
/// projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum EventKind {
    Kill,
    BotKilled,
    Bash,
    Roadkill,
    Teamkill,
    Suicide,
    Crushed,
    Telefragged,
    Damage,
    Pain,
    WeaponFire,
    WeaponHit,
    Reload,
    WeaponChange,
    Distance,
    Jump,
    Crouch,
    Prone,
    ItemPickup,
    HealthPickup,
    AmmoPickup,
    ItemDrop,
    Chat,
    TeamJoin,
    Spawn,
    Connect,
    Disconnect,
    MatchStart,
    MatchEnd,
    Heartbeat,
    TeamWin,
    ObjectiveUpdate,
    ObjectiveCapture,
    VehicleEnter,
    VehicleExit,
    VehicleCrash,
    TurretEnter,
    MatchOutcome,
    Unknown,
}

impl EventKind {
    /// Kill-like events share the attacker/victim projection.
    pub fn is_kill_family(self) -> bool {
        matches!(
            self,
            EventKind::Kill
                | EventKind::BotKilled
                | EventKind::Bash
                | EventKind::Roadkill
                | EventKind::Teamkill
                | EventKind::Suicide
                | EventKind::Crushed
                | EventKind::Telefragged
        )
    }

    /// Which kill-family events bump kill counters. `kill` and `bot_killed`
    /// are canonicalized as kills; the rest project like kills but don't
    /// count.
    pub fn counts_as_kill(self) -> bool {
        matches!(self, EventKind::Kill | EventKind::BotKilled)
    }
}

/// Borrowed view of one of the three role-typed player sub-records.
#[derive(Debug, Clone, Copy)]
pub struct PlayerView<'a> {
    pub name: &'a str,
    pub guid: &'a str,
    pub team: &'a str,
    pub smf_id: i64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub pitch: f64,
    pub yaw: f64,
    pub stance: &'a str,
}

/// One decoded game event. The wire format is a flat JSON object with
/// role-prefixed fields; every numeric/boolean field goes through the
/// [`flex`] deserializers, so native and quoted forms are interchangeable.
/// Unknown keys are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub match_id: String,
    pub server_id: String,
    pub session_id: String,
    pub server_token: String,
    #[serde(deserialize_with = "flex::f64")]
    pub timestamp: f64,

    pub player_name: String,
    pub player_guid: String,
    pub player_team: String,
    #[serde(deserialize_with = "flex::i64")]
    pub player_smf_id: i64,
    #[serde(deserialize_with = "flex::f64")]
    pub player_x: f64,
    #[serde(deserialize_with = "flex::f64")]
    pub player_y: f64,
    #[serde(deserialize_with = "flex::f64")]
    pub player_z: f64,
    #[serde(deserialize_with = "flex::f64")]
    pub player_pitch: f64,
    #[serde(deserialize_with = "flex::f64")]
    pub player_yaw: f64,
    pub player_stance: String,
    #[serde(deserialize_with = "flex::bool")]
    pub player_is_bot: bool,

    pub attacker_name: String,
    pub attacker_guid: String,
    pub attacker_team: String,
    #[serde(deserialize_with = "flex::i64")]
    pub attacker_smf_id: i64,
    #[serde(deserialize_with = "flex::f64")]
    pub attacker_x: f64,
    #[serde(deserialize_with = "flex::f64")]
    pub attacker_y: f64,
    #[serde(deserialize_with = "flex::f64")]
    pub attacker_z: f64,
    #[serde(deserialize_with = "flex::f64")]
    pub attacker_pitch: f64,
    #[serde(deserialize_with = "flex::f64")]
    pub attacker_yaw: f64,
    pub attacker_stance: String,

    // weapon_hit carries a "target" rather than a "victim"; both spellings
    // land in the same sub-record
    #[serde(alias = "target_name")]
    pub victim_name: String,
    #[serde(alias = "target_guid")]
    pub victim_guid: String,
    #[serde(alias = "target_team")]
    pub victim_team: String,
    #[serde(alias = "target_smf_id", deserialize_with = "flex::i64")]
    pub victim_smf_id: i64,
    #[serde(alias = "target_x", deserialize_with = "flex::f64")]
    pub victim_x: f64,
    #[serde(alias = "target_y", deserialize_with = "flex::f64")]
    pub victim_y: f64,
    #[serde(alias = "target_z", deserialize_with = "flex::f64")]
    pub victim_z: f64,
    #[serde(deserialize_with = "flex::f64")]
    pub victim_pitch: f64,
    #[serde(deserialize_with = "flex::f64")]
    pub victim_yaw: f64,
    #[serde(alias = "target_stance")]
    pub victim_stance: String,

    pub weapon: String,
    pub inflictor: String,
    #[serde(rename = "mod")]
    pub means_of_death: String,
    pub hitloc: String,
    #[serde(deserialize_with = "flex::i32")]
    pub damage: i32,
    #[serde(deserialize_with = "flex::i32")]
    pub ammo: i32,

    #[serde(deserialize_with = "flex::f64")]
    pub walked: f64,
    #[serde(deserialize_with = "flex::f64")]
    pub sprinted: f64,
    #[serde(deserialize_with = "flex::f64")]
    pub swam: f64,
    #[serde(deserialize_with = "flex::f64")]
    pub driven: f64,

    pub item: String,

    #[serde(alias = "map")]
    pub map_name: String,
    pub gametype: String,
    #[serde(deserialize_with = "flex::i32")]
    pub allies_score: i32,
    #[serde(deserialize_with = "flex::i32")]
    pub axis_score: i32,
    #[serde(deserialize_with = "flex::i32")]
    pub player_count: i32,
    #[serde(deserialize_with = "flex::i32")]
    pub round: i32,
    pub winning_team: String,

    pub entity: String,
    pub seat: String,

    pub message: String,
    pub objective: String,

    #[serde(deserialize_with = "flex::i32")]
    pub match_outcome: i32,
}

impl GameEvent {
    pub fn decode(bytes: &[u8]) -> Result<GameEvent, DecodeError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Serialization stored verbatim in the `raw_json` analytic column.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Unknown wire strings dispatch as [`EventKind::Unknown`]; the raw
    /// string stays available in `event_type`.
    pub fn kind(&self) -> EventKind {
        EventKind::from_str(&self.event_type).unwrap_or(EventKind::Unknown)
    }

    pub fn player(&self) -> PlayerView<'_> {
        PlayerView {
            name: &self.player_name,
            guid: &self.player_guid,
            team: &self.player_team,
            smf_id: self.player_smf_id,
            x: self.player_x,
            y: self.player_y,
            z: self.player_z,
            pitch: self.player_pitch,
            yaw: self.player_yaw,
            stance: &self.player_stance,
        }
    }

    pub fn attacker(&self) -> PlayerView<'_> {
        PlayerView {
            name: &self.attacker_name,
            guid: &self.attacker_guid,
            team: &self.attacker_team,
            smf_id: self.attacker_smf_id,
            x: self.attacker_x,
            y: self.attacker_y,
            z: self.attacker_z,
            pitch: self.attacker_pitch,
            yaw: self.attacker_yaw,
            stance: &self.attacker_stance,
        }
    }

    pub fn victim(&self) -> PlayerView<'_> {
        PlayerView {
            name: &self.victim_name,
            guid: &self.victim_guid,
            team: &self.victim_team,
            smf_id: self.victim_smf_id,
            x: self.victim_x,
            y: self.victim_y,
            z: self.victim_z,
            pitch: self.victim_pitch,
            yaw: self.victim_yaw,
            stance: &self.victim_stance,
        }
    }

    /// The SMF id the achievement engine attributes this event to.
    /// Kill-family events belong to the attacker, everything else to the
    /// player. Zero means anonymous.
    pub fn actor_smf_id(&self) -> i64 {
        if self.kind().is_kill_family() {
            self.attacker_smf_id
        } else {
            self.player_smf_id
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_mixed_native_and_quoted_fields() {
        let event = GameEvent::decode(
            br#"{
                "type": "kill",
                "match_id": "7c9e6679-7425-40de-944b-e07fc1f90ae7",
                "timestamp": "1736600000.25",
                "attacker_guid": "abc123",
                "attacker_smf_id": "42",
                "victim_guid": "def456",
                "damage": 35,
                "hitloc": "head",
                "weapon": "kar98k"
            }"#,
        )
        .unwrap();

        assert_eq!(event.kind(), EventKind::Kill);
        assert_eq!(event.timestamp, 1736600000.25);
        assert_eq!(event.attacker_smf_id, 42);
        assert_eq!(event.damage, 35);
        assert_eq!(event.ammo, 0);
    }

    #[test]
    fn unknown_type_is_kept_verbatim() {
        let event = GameEvent::decode(br#"{"type": "flag_drop"}"#).unwrap();
        assert_eq!(event.event_type, "flag_drop");
        assert_eq!(event.kind(), EventKind::Unknown);
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let event =
            GameEvent::decode(br#"{"type": "jump", "totally_new_field": {"a": 1}}"#).unwrap();
        assert_eq!(event.kind(), EventKind::Jump);
    }

    #[test]
    fn malformed_envelope_is_an_error() {
        assert!(GameEvent::decode(b"{\"type\": ").is_err());
    }

    #[test]
    fn target_aliases_fill_the_victim_record() {
        let event = GameEvent::decode(
            br#"{"type": "weapon_hit", "target_guid": "t1", "target_name": "Bob"}"#,
        )
        .unwrap();
        assert_eq!(event.victim_guid, "t1");
        assert_eq!(event.victim_name, "Bob");
    }

    #[test]
    fn encode_round_trips_through_decode() {
        let original = GameEvent::decode(
            br#"{"type": "kill", "damage": "35", "attacker_guid": "g1", "walked": "12.5"}"#,
        )
        .unwrap();
        let reencoded = original.encode().unwrap();
        let decoded = GameEvent::decode(reencoded.as_bytes()).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn kill_family_attribution() {
        let kill = GameEvent {
            event_type: "kill".to_string(),
            attacker_smf_id: 7,
            player_smf_id: 9,
            ..GameEvent::default()
        };
        assert_eq!(kill.actor_smf_id(), 7);

        let pickup = GameEvent {
            event_type: "health_pickup".to_string(),
            player_smf_id: 9,
            ..GameEvent::default()
        };
        assert_eq!(pickup.actor_smf_id(), 9);
    }
}
