use uuid::Uuid;

/// 2020-01-01T00:00:00Z. Anything earlier is a game-relative clock, not a
/// wall clock.
pub const MIN_VALID_UNIX_TS: f64 = 1_577_836_800.0;

/// Namespace for deterministically mapping non-UUID match id strings
/// ("mohstats-matchid" as raw bytes).
const MATCH_ID_NAMESPACE: Uuid = Uuid::from_u128(0x6d6f_6873_7461_7473_2d6d_6174_6368_6964);

/// Source timestamps are either wall clocks (epoch seconds) or
/// game-relative seconds since map load, and nothing in the envelope says
/// which. Anything that can't be a recent wall clock is replaced with the
/// wall clock captured at enqueue.
pub fn sanitize_timestamp(raw: f64, ingested_at: f64) -> f64 {
    if raw >= MIN_VALID_UNIX_TS {
        raw
    } else {
        ingested_at
    }
}

/// Match ids are UUIDs when the server mod generates them, but older mods
/// send arbitrary strings (or nothing). Non-UUID strings map to a
/// deterministic v5 UUID so every batch of the same match lands under the
/// same id.
pub fn coerce_match_id(raw: &str) -> Uuid {
    Uuid::try_parse(raw).unwrap_or_else(|_| Uuid::new_v5(&MATCH_ID_NAMESPACE, raw.as_bytes()))
}

/// Strips in-game color escapes from a display name. A caret followed by
/// one decimal digit is removed; a caret followed by anything else, and a
/// lone trailing caret, are kept.
pub fn strip_color_codes(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut chars = name.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '^' {
            match chars.peek() {
                Some(d) if d.is_ascii_digit() => {
                    chars.next();
                }
                _ => out.push('^'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_names_pass_through() {
        assert_eq!(strip_color_codes("Private Ryan"), "Private Ryan");
    }

    #[test]
    fn caret_digit_pairs_are_removed() {
        assert_eq!(strip_color_codes("^1Red^7Baron"), "RedBaron");
        assert_eq!(strip_color_codes("^0^1^2^3x"), "x");
    }

    #[test]
    fn caret_non_digit_is_preserved() {
        assert_eq!(strip_color_codes("up^down"), "up^down");
        assert_eq!(strip_color_codes("^^1"), "^");
    }

    #[test]
    fn trailing_caret_is_preserved() {
        assert_eq!(strip_color_codes("dangling^"), "dangling^");
    }

    #[test]
    fn wall_clock_timestamps_survive() {
        assert_eq!(sanitize_timestamp(1_736_600_000.5, 1_736_600_100.0), 1_736_600_000.5);
    }

    #[test]
    fn game_relative_timestamps_fall_back() {
        assert_eq!(sanitize_timestamp(37.9, 1_736_600_100.0), 1_736_600_100.0);
        assert_eq!(sanitize_timestamp(0.0, 1_736_600_100.0), 1_736_600_100.0);
    }

    #[test]
    fn uuid_match_ids_parse_directly() {
        let id = coerce_match_id("7c9e6679-7425-40de-944b-e07fc1f90ae7");
        assert_eq!(id.to_string(), "7c9e6679-7425-40de-944b-e07fc1f90ae7");
    }

    #[test]
    fn non_uuid_match_ids_map_deterministically() {
        let a = coerce_match_id("no_match");
        let b = coerce_match_id("no_match");
        assert_eq!(a, b);
        assert_ne!(a, coerce_match_id("other_match"));
    }
}
