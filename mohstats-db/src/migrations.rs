use diesel::sql_types::BigInt;
use diesel::{Connection, ConnectionError, PgConnection, RunQueryDsl};
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use log::{info, warn};
use miette::Diagnostic;
use std::error::Error;
use thiserror::Error;

const ANALYTIC_MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations/analytic");
const FORUM_MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations/forum");

const MIGRATION_LOCK_ID: i64 = 71713;

#[derive(Debug, Error, Diagnostic)]
pub enum MigrationError {
    #[error("couldn't connect to database")]
    FailedToConnectToDatabase(#[source] ConnectionError),

    #[error("error acquiring migrations lock")]
    FailedToAcquireMigrationsLock(#[source] crate::QueryError),

    #[error("error running migrations")]
    FailedToRunMigrations(#[source] Box<dyn Error + Send + Sync>),
}

pub fn run_analytic_migrations(url: &str) -> Result<(), MigrationError> {
    run_migrations(url, ANALYTIC_MIGRATIONS)
}

pub fn run_forum_migrations(url: &str) -> Result<(), MigrationError> {
    run_migrations(url, FORUM_MIGRATIONS)
}

fn run_migrations(url: &str, migrations: EmbeddedMigrations) -> Result<(), MigrationError> {
    let mut conn =
        PgConnection::establish(url).map_err(MigrationError::FailedToConnectToDatabase)?;

    info!("Acquiring migrations lock");
    diesel::sql_query("select pg_advisory_lock($1);")
        .bind::<BigInt, _>(MIGRATION_LOCK_ID)
        .execute(&mut conn)
        .map_err(MigrationError::FailedToAcquireMigrationsLock)?;

    info!("Running any pending migrations");
    conn.run_pending_migrations(migrations)
        .map_err(MigrationError::FailedToRunMigrations)?;

    let unlock_result = diesel::sql_query("select pg_advisory_unlock($1);")
        .bind::<BigInt, _>(MIGRATION_LOCK_ID)
        .execute(&mut conn);

    if let Err(e) = unlock_result {
        warn!(
            "Failed to unlock migrations lock. It will be unlocked when the connection is \
            dropped, but this still may be indicative of an application issue. Error: {:?}",
            e,
        );
    }

    info!("Migrations finished");
    Ok(())
}
