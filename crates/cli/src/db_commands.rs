use std::path::{Path, PathBuf};

use {chatgate_config::GatewayConfig, clap::Subcommand};

#[derive(Subcommand)]
pub enum DbAction {
    /// Delete the instance database (and its WAL/SHM files) completely.
    Reset,
    /// Run all pending database migrations.
    Migrate,
}

pub async fn handle_db(action: DbAction, config: &GatewayConfig) -> anyhow::Result<()> {
    match action {
        DbAction::Reset => reset_database(&config.store.path.join(&config.store.file_name)),
        DbAction::Migrate => run_migrations(config).await,
    }
}

/// The database file followed by the sidecar files SQLite may have created.
fn db_files(db: &Path) -> [PathBuf; 3] {
    let sidecar = |suffix: &str| {
        let mut name = db.as_os_str().to_owned();
        name.push(suffix);
        PathBuf::from(name)
    };
    [db.to_path_buf(), sidecar("-wal"), sidecar("-shm")]
}

fn reset_database(db: &Path) -> anyhow::Result<()> {
    let mut deleted = false;
    for path in db_files(db) {
        if path.exists() {
            std::fs::remove_file(&path)?;
            println!("Deleted: {}", path.display());
            deleted = true;
        }
    }

    if deleted {
        println!("Database files deleted. Run `chatgate db migrate` to recreate them.");
    } else {
        println!("No database files found at {}.", db.display());
    }
    Ok(())
}

pub(crate) async fn open_pool(config: &GatewayConfig) -> anyhow::Result<sqlx::SqlitePool> {
    std::fs::create_dir_all(&config.store.path)?;
    let pool = sqlx::SqlitePool::connect(&config.store.database_url()).await?;
    chatgate_store::run_migrations(&pool)
        .await
        .map_err(|e| anyhow::anyhow!("store migrations failed: {e}"))?;
    Ok(pool)
}

async fn run_migrations(config: &GatewayConfig) -> anyhow::Result<()> {
    println!("Running migrations for {}...", config.store.database_url());
    let pool = open_pool(config).await?;
    pool.close().await;
    println!("All migrations complete.");
    Ok(())
}
