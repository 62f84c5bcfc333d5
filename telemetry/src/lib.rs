mod event;
pub mod flex;
mod sanitize;

pub use event::{DecodeError, EventKind, GameEvent, PlayerView};
pub use sanitize::{MIN_VALID_UNIX_TS, coerce_match_id, sanitize_timestamp, strip_color_codes};
