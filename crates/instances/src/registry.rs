use std::{
    collections::HashMap,
    sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use {
    chatgate_store::{AdminState, InstanceRecord},
    tracing::{info, warn},
};

use crate::{
    error::{Error, Result},
    instance::{Instance, InstanceContext},
};

/// Live instances keyed by instance id.
///
/// Only connect (insert) and delete (remove) mutate the map. The lock is
/// never held across an `.await`.
pub struct InstanceRegistry {
    ctx: InstanceContext,
    instances: RwLock<HashMap<String, Arc<Instance>>>,
}

impl InstanceRegistry {
    pub fn new(ctx: InstanceContext) -> Self {
        Self {
            ctx,
            instances: RwLock::new(HashMap::new()),
        }
    }

    pub fn context(&self) -> &InstanceContext {
        &self.ctx
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<Instance>>> {
        self.instances.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<Instance>>> {
        self.instances.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Resume every active instance with a known account number, one after
    /// the other. Failures are logged and skipped. Returns how many
    /// sessions were resumed.
    pub async fn bootstrap(&self) -> Result<usize> {
        let records = self.ctx.store.read_all().await?;
        let mut resumed = 0;
        for record in records {
            if record.state == AdminState::Inactive {
                info!(instance = %record.name, "skipping inactive instance");
                continue;
            }
            if record.number().is_none() {
                info!(instance = %record.name, "skipping instance without account number");
                continue;
            }

            let name = record.name.clone();
            let instance = Instance::new(record, self.ctx.clone());
            match instance.connect().await {
                Ok(()) => {
                    self.register(instance).await;
                    resumed += 1;
                },
                Err(e) => warn!(instance = %name, error = %e, "failed to resume instance"),
            }
        }
        info!(resumed, "instances loaded");
        Ok(resumed)
    }

    /// Resolve an id, account number or name to its live session.
    ///
    /// [`Error::NotFound`] when nothing is stored under `identifier`,
    /// [`Error::NotConnected`] when the instance exists but has no session.
    pub async fn get(&self, identifier: &str) -> Result<Arc<Instance>> {
        let record = self
            .ctx
            .store
            .read(identifier)
            .await?
            .ok_or_else(|| Error::not_found(identifier))?;
        self.live(&record.id)
            .ok_or(Error::NotConnected { name: record.name })
    }

    pub fn live(&self, id: &str) -> Option<Arc<Instance>> {
        self.read().get(id).cloned()
    }

    /// The registered instance for `record`, inserting a fresh one when
    /// none exists. Concurrent callers for the same id share one instance.
    pub fn get_or_insert(&self, record: InstanceRecord) -> Arc<Instance> {
        let mut instances = self.write();
        let instance = instances
            .entry(record.id.clone())
            .or_insert_with(|| Instance::new(record, self.ctx.clone()));
        Arc::clone(instance)
    }

    /// Insert or replace the entry for the instance's id. A displaced
    /// instance has its client disconnected.
    pub async fn register(&self, instance: Arc<Instance>) -> Option<Arc<Instance>> {
        let id = instance.id();
        let displaced = self.write().insert(id, Arc::clone(&instance))?;
        if !Arc::ptr_eq(&displaced, &instance) {
            displaced.detach().await;
        }
        Some(displaced)
    }

    pub fn unregister(&self, id: &str) -> Option<Arc<Instance>> {
        self.write().remove(id)
    }

    /// Remove `instance` unless its entry was replaced since.
    pub fn unregister_instance(&self, instance: &Arc<Instance>) -> bool {
        let mut instances = self.write();
        let id = instance.id();
        if instances.get(&id).is_some_and(|i| Arc::ptr_eq(i, instance)) {
            instances.remove(&id);
            return true;
        }
        false
    }

    pub fn all(&self) -> Vec<Arc<Instance>> {
        self.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}
