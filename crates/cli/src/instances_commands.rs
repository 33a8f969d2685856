use {
    chatgate_config::GatewayConfig,
    chatgate_store::{InstanceRecord, InstanceStore, SqliteInstanceStore},
    clap::Subcommand,
};

use crate::db_commands::open_pool;

#[derive(Subcommand)]
pub enum InstancesAction {
    /// List every stored instance.
    List,
    /// Print one instance (by id, number or name) as JSON, access key removed.
    Show { identifier: String },
}

pub async fn handle_instances(
    action: InstancesAction,
    config: &GatewayConfig,
) -> anyhow::Result<()> {
    let pool = open_pool(config).await?;
    let store = SqliteInstanceStore::new(pool.clone());
    let outcome = match action {
        InstancesAction::List => list(&store).await,
        InstancesAction::Show { identifier } => show(&store, &identifier).await,
    };
    pool.close().await;
    outcome
}

async fn list(store: &SqliteInstanceStore) -> anyhow::Result<()> {
    let records = store.read_all().await?;
    if records.is_empty() {
        println!("No instances found.");
        return Ok(());
    }
    println!("{}", header());
    for record in &records {
        println!("{}", row(record));
    }
    Ok(())
}

async fn show(store: &SqliteInstanceStore, identifier: &str) -> anyhow::Result<()> {
    let Some(record) = store.read(identifier).await? else {
        anyhow::bail!("no instance matches {identifier}");
    };
    println!("{}", serde_json::to_string_pretty(&record.redacted())?);
    Ok(())
}

fn header() -> String {
    format!(
        "{:<36}  {:<20}  {:<8}  {:<8}  {:<10}  NUMBER",
        "ID", "NAME", "STATE", "STATUS", "CONNECTION"
    )
}

fn row(record: &InstanceRecord) -> String {
    format!(
        "{:<36}  {:<20}  {:<8}  {:<8}  {:<10}  {}",
        record.id,
        record.name,
        record.state.as_str(),
        record.status.as_str(),
        record.connection.as_str(),
        record.number().unwrap_or("-")
    )
}
