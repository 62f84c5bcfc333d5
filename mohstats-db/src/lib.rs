mod migrations;
mod pool;
mod schema;
mod url;

pub mod db;
pub mod models;

pub(crate) use schema::*;

pub use migrations::{MigrationError, run_analytic_migrations, run_forum_migrations};
pub use pool::{ConnectionPool, PoolError, get_pool};
pub use url::{analytic_url_from_environment, forum_url_from_environment};

pub use diesel::{Connection, PgConnection, QueryResult};

pub type QueryError = diesel::result::Error;
