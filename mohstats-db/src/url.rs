use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, PartialEq, Deserialize)]
struct PostgresConfig {
    user: String,
    password: Option<String>,
    password_file: Option<PathBuf>,
    host: String,
    db: String,
}

/// Analytic-store endpoint, from the `ANALYTIC_*` environment group.
pub fn analytic_url_from_environment() -> String {
    postgres_url_from_environment("ANALYTIC_")
}

/// Relational-store (SMF forum database) endpoint, from the `FORUM_*`
/// environment group.
pub fn forum_url_from_environment() -> String {
    postgres_url_from_environment("FORUM_")
}

fn postgres_url_from_environment(prefix: &str) -> String {
    let provider = figment::providers::Env::prefixed(prefix);
    let config: PostgresConfig = figment::Figment::from(provider)
        .extract()
        .unwrap_or_else(|e| {
            panic!("{prefix}* database environment variable(s) missing or invalid: {e}")
        });

    let password = if let Some(password) = config.password {
        password
    } else if let Some(password_file) = config.password_file {
        std::fs::read_to_string(password_file).expect("Failed to read database password file")
    } else {
        panic!("One of {prefix}PASSWORD or {prefix}PASSWORD_FILE must be provided");
    };

    // Postgres truncates passwords at the first newline. A single trailing
    // newline is the near-universal text-file convention so we strip it, but
    // any other newline means the password would be silently weakened, so we
    // refuse to continue.
    let password = if let Some(pw) = password.strip_suffix("\n") {
        pw
    } else {
        &password
    };

    if password.contains("\n") {
        panic!(
            "Database password for {prefix}* contains a non-terminal newline. This password \
            would be insecurely truncated. Please try again with a password that does not \
            contain non-terminal newlines."
        );
    }

    let password = utf8_percent_encode(password, NON_ALPHANUMERIC);

    format!(
        "postgres://{}:{}@{}/{}",
        config.user, password, config.host, config.db
    )
}
