// Relational store: achievement definitions and unlocks live alongside the
// SMF forum tables, plus the server directory.

diesel::table! {
    mohaa_achievements (id) {
        id -> Int4,
        achievement_code -> Text,
        title -> Text,
        description -> Text,
        category -> Text,
        tier -> Text,
        points -> Int4,
        target -> Int4,
    }
}

diesel::table! {
    mohaa_player_achievements (id) {
        id -> Int8,
        smf_member_id -> Int8,
        achievement_id -> Int4,
        unlocked -> Bool,
        unlocked_at -> Nullable<Timestamp>,
        progress -> Int4,
    }
}

diesel::table! {
    servers (id) {
        id -> Int4,
        server_key -> Text,
        map_name -> Text,
        gametype -> Text,
        player_count -> Int4,
        last_seen -> Timestamp,
        is_active -> Bool,
    }
}

diesel::allow_tables_to_appear_in_same_query!(mohaa_achievements, mohaa_player_achievements);
