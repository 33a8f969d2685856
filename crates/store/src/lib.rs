//! Instance metadata store: record types, the [`InstanceStore`] contract and
//! its SQLite and in-memory implementations.

pub mod error;
pub mod memory;
pub mod record;
pub mod sqlite;
pub mod store;

pub use {
    error::{Error, Result},
    memory::InMemoryInstanceStore,
    record::{
        AccountProfile, AdminState, ConnectionStatus, InstancePatch, InstanceRecord,
        InstanceStatus,
    },
    sqlite::SqliteInstanceStore,
    store::InstanceStore,
};

/// Run database migrations for the store crate.
///
/// Creates the `instances` table. Call at startup before constructing a
/// [`SqliteInstanceStore`].
pub async fn run_migrations(pool: &sqlx::SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .set_ignore_missing(true)
        .run(pool)
        .await?;
    Ok(())
}
