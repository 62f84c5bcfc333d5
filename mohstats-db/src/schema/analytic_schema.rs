// Analytic store: one append-only table, written in batches, read back only
// by the reporting services and the achievement baselines.

diesel::table! {
    raw_events (id) {
        id -> Int8,
        timestamp -> Float8,
        match_id -> Uuid,
        server_id -> Text,
        map_name -> Text,
        event_type -> Text,
        actor_id -> Text,
        actor_name -> Text,
        actor_team -> Text,
        actor_smf_id -> Int8,
        actor_weapon -> Text,
        actor_pos_x -> Float8,
        actor_pos_y -> Float8,
        actor_pos_z -> Float8,
        actor_pitch -> Float8,
        actor_yaw -> Float8,
        actor_stance -> Text,
        target_id -> Text,
        target_name -> Text,
        target_team -> Text,
        target_smf_id -> Int8,
        target_pos_x -> Float8,
        target_pos_y -> Float8,
        target_pos_z -> Float8,
        target_stance -> Text,
        damage -> Int4,
        hitloc -> Text,
        distance -> Float8,
        raw_json -> Text,
        match_outcome -> Int4,
        round_number -> Int4,
    }
}
