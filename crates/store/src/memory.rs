//! In-memory instance store for tests and ephemeral deployments.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::{
    error::{Error, Result},
    record::{InstancePatch, InstanceRecord},
    store::InstanceStore,
};

/// Insertion-ordered records behind a mutex. No persistence.
pub struct InMemoryInstanceStore {
    records: Mutex<Vec<InstanceRecord>>,
}

impl InMemoryInstanceStore {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
        }
    }
}

impl Default for InMemoryInstanceStore {
    fn default() -> Self {
        Self::new()
    }
}

fn name_taken(records: &[InstanceRecord], name: &str, except_id: Option<&str>) -> bool {
    records
        .iter()
        .filter(|r| Some(r.id.as_str()) != except_id)
        .any(|r| r.name.eq_ignore_ascii_case(name))
}

#[async_trait]
impl InstanceStore for InMemoryInstanceStore {
    async fn create(&self, record: &InstanceRecord) -> Result<()> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        if name_taken(&records, &record.name, None) || records.iter().any(|r| r.id == record.id) {
            return Err(Error::Duplicate {
                name: record.name.clone(),
            });
        }
        let mut stored = record.clone();
        stored.deleted_at = None;
        records.push(stored);
        Ok(())
    }

    async fn read(&self, identifier: &str) -> Result<Option<InstanceRecord>> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let found = records
            .iter()
            .find(|r| r.id == identifier)
            .or_else(|| records.iter().find(|r| r.number() == Some(identifier)))
            .or_else(|| {
                records
                    .iter()
                    .find(|r| r.name.eq_ignore_ascii_case(identifier))
            });
        Ok(found.cloned())
    }

    async fn read_all(&self) -> Result<Vec<InstanceRecord>> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        Ok(records.clone())
    }

    async fn update(&self, id: &str, patch: &InstancePatch) -> Result<()> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(name) = patch.name()
            && name_taken(&records, name, Some(id))
        {
            return Err(Error::Duplicate {
                name: name.to_string(),
            });
        }
        if let Some(record) = records.iter_mut().find(|r| r.id == id) {
            patch.apply(record);
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.retain(|r| r.id != id);
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_round_trip_by_every_identifier() {
        let store = InMemoryInstanceStore::new();
        let rec = InstanceRecord::new("sales").with_number("553187654321");
        store.create(&rec).await.unwrap();

        for key in [rec.id.as_str(), "Sales", "553187654321"] {
            assert_eq!(store.read(key).await.unwrap().unwrap().id, rec.id);
        }
    }

    #[tokio::test]
    async fn test_duplicate_names_rejected() {
        let store = InMemoryInstanceStore::new();
        store.create(&InstanceRecord::new("sales")).await.unwrap();
        assert!(matches!(
            store.create(&InstanceRecord::new("SALES")).await,
            Err(Error::Duplicate { .. })
        ));
    }

    #[tokio::test]
    async fn test_rename_into_taken_name_rejected() {
        let store = InMemoryInstanceStore::new();
        let a = InstanceRecord::new("a");
        store.create(&a).await.unwrap();
        store.create(&InstanceRecord::new("b")).await.unwrap();

        let patch = InstancePatch {
            name: Some("B".into()),
            ..Default::default()
        };
        assert!(store.update(&a.id, &patch).await.is_err());
        // Renaming to its own name in another case is fine.
        let patch = InstancePatch {
            name: Some("A".into()),
            ..Default::default()
        };
        store.update(&a.id, &patch).await.unwrap();
        assert_eq!(store.read(&a.id).await.unwrap().unwrap().name, "A");
    }

    #[tokio::test]
    async fn test_delete() {
        let store = InMemoryInstanceStore::new();
        let rec = InstanceRecord::new("sales");
        store.create(&rec).await.unwrap();
        store.delete(&rec.id).await.unwrap();
        assert!(store.read("sales").await.unwrap().is_none());
    }
}
