use {
    async_trait::async_trait,
    chatgate_common::time::{parse_rfc3339, to_rfc3339},
    sqlx::{QueryBuilder, Sqlite, SqlitePool},
};

use crate::{
    error::{Error, Result},
    record::{AccountProfile, InstancePatch, InstanceRecord},
    store::InstanceStore,
};

/// Internal row type for sqlx mapping.
#[derive(sqlx::FromRow)]
struct InstanceRow {
    id: String,
    name: String,
    external_id: Option<String>,
    access_key: String,
    state: String,
    status: String,
    connection: String,
    number: Option<String>,
    last_connection: Option<String>,
    container_name: Option<String>,
    created_at: String,
    updated_at: Option<String>,
}

impl TryFrom<InstanceRow> for InstanceRecord {
    type Error = Error;

    fn try_from(r: InstanceRow) -> Result<Self> {
        let created_at = parse_rfc3339(&r.created_at).ok_or_else(|| Error::Corrupt {
            column: "created_at",
            value: r.created_at.clone(),
        })?;
        Ok(Self {
            id: r.id,
            name: r.name,
            external_id: r.external_id.filter(|v| !v.is_empty()),
            access_key: Some(r.access_key),
            state: r.state.parse()?,
            status: r.status.parse()?,
            connection: r.connection.parse()?,
            profile: AccountProfile {
                number: r.number.filter(|v| !v.is_empty()),
                last_connection: r.last_connection.as_deref().and_then(parse_rfc3339),
                ..Default::default()
            },
            container_name: r.container_name.filter(|v| !v.is_empty()),
            created_at,
            updated_at: r.updated_at.as_deref().and_then(parse_rfc3339),
            deleted_at: None,
        })
    }
}

fn unique_violation(e: sqlx::Error, name: &str) -> Error {
    if let sqlx::Error::Database(db) = &e
        && db.is_unique_violation()
    {
        return Error::Duplicate {
            name: name.to_string(),
        };
    }
    Error::from(e)
}

/// SQLite-backed instance store.
pub struct SqliteInstanceStore {
    pool: SqlitePool,
}

impl SqliteInstanceStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl InstanceStore for SqliteInstanceStore {
    async fn create(&self, record: &InstanceRecord) -> Result<()> {
        let access_key = record
            .access_key
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string().to_uppercase());
        sqlx::query(
            r#"INSERT INTO instances
                 (id, name, external_id, access_key, state, status, connection,
                  number, last_connection, container_name, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&record.id)
        .bind(&record.name)
        .bind(&record.external_id)
        .bind(&access_key)
        .bind(record.state.as_str())
        .bind(record.status.as_str())
        .bind(record.connection.as_str())
        .bind(record.number())
        .bind(record.profile.last_connection.as_ref().map(to_rfc3339))
        .bind(&record.container_name)
        .bind(to_rfc3339(&record.created_at))
        .bind(record.updated_at.as_ref().map(to_rfc3339))
        .execute(&self.pool)
        .await
        .map_err(|e| unique_violation(e, &record.name))?;
        Ok(())
    }

    async fn read(&self, identifier: &str) -> Result<Option<InstanceRecord>> {
        let row = sqlx::query_as::<_, InstanceRow>(
            r#"SELECT * FROM instances
               WHERE id = ?1 OR number = ?1 OR name = ?1 COLLATE NOCASE
               ORDER BY CASE
                 WHEN id = ?1 THEN 0
                 WHEN number = ?1 THEN 1
                 ELSE 2
               END, created_at
               LIMIT 1"#,
        )
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn read_all(&self) -> Result<Vec<InstanceRecord>> {
        let rows = sqlx::query_as::<_, InstanceRow>("SELECT * FROM instances ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn update(&self, id: &str, patch: &InstancePatch) -> Result<()> {
        if patch.is_empty() {
            return Ok(());
        }

        let mut query = QueryBuilder::<Sqlite>::new("UPDATE instances SET ");
        let mut set = query.separated(", ");
        if let Some(name) = patch.name() {
            set.push("name = ");
            set.push_bind_unseparated(name.to_string());
        }
        if let Some(number) = patch.number() {
            set.push("number = ");
            set.push_bind_unseparated(number.to_string());
        }
        if let Some(last_connection) = &patch.last_connection {
            set.push("last_connection = ");
            set.push_bind_unseparated(to_rfc3339(last_connection));
        }
        if let Some(state) = patch.state {
            set.push("state = ");
            set.push_bind_unseparated(state.as_str());
        }
        if let Some(status) = patch.status {
            set.push("status = ");
            set.push_bind_unseparated(status.as_str());
        }
        if let Some(connection) = patch.connection {
            set.push("connection = ");
            set.push_bind_unseparated(connection.as_str());
        }
        if let Some(updated_at) = &patch.updated_at {
            set.push("updated_at = ");
            set.push_bind_unseparated(to_rfc3339(updated_at));
        }
        query.push(" WHERE id = ");
        query.push_bind(id.to_string());

        query
            .build()
            .execute(&self.pool)
            .await
            .map_err(|e| unique_violation(e, patch.name().unwrap_or_default()))?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM instances WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
