//! Administrative operations over instances.

use std::{sync::Arc, time::Duration};

use {
    chatgate_broker::events,
    chatgate_protocol::{Jid, OnWhatsApp, format_jid},
    chatgate_store::{
        AdminState, ConnectionStatus, InstancePatch, InstanceRecord, InstanceStatus,
    },
    chrono::Utc,
    serde::Deserialize,
    serde_json::json,
    tracing::{info, warn},
};

use crate::{
    error::{Error, Result},
    qr::QrCode,
    registry::InstanceRegistry,
};

/// Request to create an instance.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateInstance {
    #[serde(alias = "instanceName")]
    pub name: String,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub state: Option<AdminState>,
    #[serde(default, rename = "apikey")]
    pub access_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ServiceSettings {
    /// Name no instance may take, compared case-insensitively.
    pub reserved_name: String,
    /// How long `new_connection` waits for the first pairing code.
    pub qr_wait: Duration,
    pub container_name: Option<String>,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            reserved_name: "codechat".into(),
            qr_wait: Duration::from_secs(2),
            container_name: None,
        }
    }
}

pub struct InstanceService {
    registry: Arc<InstanceRegistry>,
    settings: ServiceSettings,
}

impl InstanceService {
    pub fn new(registry: Arc<InstanceRegistry>, settings: ServiceSettings) -> Self {
        Self { registry, settings }
    }

    pub fn registry(&self) -> &Arc<InstanceRegistry> {
        &self.registry
    }

    async fn record(&self, identifier: &str) -> Result<InstanceRecord> {
        self.registry
            .context()
            .store
            .read(identifier)
            .await?
            .ok_or_else(|| Error::not_found(identifier))
    }

    /// Persist a new instance and return it with its access key. The only
    /// call that ever reveals the key.
    pub async fn create(&self, request: CreateInstance) -> Result<InstanceRecord> {
        let name = request.name.trim();
        if name.is_empty() {
            return Err(Error::validation("instance name is required"));
        }
        let ctx = self.registry.context();
        if name.eq_ignore_ascii_case(&self.settings.reserved_name)
            || ctx.store.read(name).await?.is_some_and(|r| r.name.eq_ignore_ascii_case(name))
        {
            return Err(Error::conflict(format!(
                "it is not possible to create an instance with this name: {name}"
            )));
        }

        let mut record = InstanceRecord::new(name)
            .with_state(request.state.unwrap_or(AdminState::Active));
        if let Some(external_id) = request.external_id.filter(|v| !v.is_empty()) {
            record = record.with_external_id(external_id);
        }
        if let Some(key) = request.access_key.filter(|v| !v.is_empty()) {
            record = record.with_access_key(key);
        }
        if let Some(container) = &self.settings.container_name {
            record = record.with_container_name(container.clone());
        }

        ctx.store.create(&record).await?;
        info!(instance = %record.name, instance_id = %record.id, "instance created");

        let mut announced = record.clone();
        announced.status = InstanceStatus::Created;
        ctx.publisher.publish_detached(
            events::INSTANCE_STATUS,
            announced,
            json!({ "status": InstanceStatus::Created }),
        );
        Ok(record)
    }

    /// Stored record overlaid with the live session when one is registered.
    pub async fn find(&self, identifier: &str) -> Result<InstanceRecord> {
        let record = self.record(identifier).await?;
        match self.registry.live(&record.id) {
            Some(instance) => Ok(instance.live_snapshot().await),
            None => Ok(record.redacted()),
        }
    }

    pub async fn find_all(&self) -> Result<Vec<InstanceRecord>> {
        let records = self.registry.context().store.read_all().await?;
        Ok(records.iter().map(InstanceRecord::redacted).collect())
    }

    /// Start pairing and return the first code, or the bare link state when
    /// none arrived within the wait window.
    ///
    /// The instance is registered before pairing starts, so a concurrent
    /// request for the same instance sees it booting and conflicts.
    pub async fn new_connection(&self, identifier: &str) -> Result<QrCode> {
        let record = self.record(identifier).await?;
        let instance = self.registry.get_or_insert(record);
        if instance.is_logged_in() {
            return Ok(QrCode::state(ConnectionStatus::Open));
        }

        if let Err(e) = instance.new_connection().await {
            warn!(instance = %instance.name(), error = %e, "unable to start pairing");
            if !matches!(e, Error::Conflict { .. }) && instance.client().is_none() {
                self.registry.unregister_instance(&instance);
            }
            return Err(e);
        }

        Ok(instance
            .wait_for_qr(self.settings.qr_wait)
            .await
            .unwrap_or_else(|| QrCode::state(instance.connection())))
    }

    pub async fn logout(&self, identifier: &str) -> Result<InstanceRecord> {
        self.registry.get(identifier).await?.logout().await
    }

    /// Remove an instance. Refused while its session is connected or logged
    /// in. The row is deleted; `deletedAt` only appears on the returned
    /// snapshot and the published event.
    pub async fn delete(&self, identifier: &str) -> Result<InstanceRecord> {
        let record = self.record(identifier).await?;
        let live = self.registry.live(&record.id);
        if let Some(instance) = &live
            && instance.is_busy()
        {
            return Err(Error::conflict(format!(
                "instance '{}' {{jid: '{}', id: '{}'}} is connected",
                record.name,
                record.number().unwrap_or_default(),
                record.id
            )));
        }

        let ctx = self.registry.context();
        ctx.store.delete(&record.id).await?;
        self.registry.unregister(&record.id);

        let now = Utc::now();
        let mut deleted = live.map(|i| i.snapshot()).unwrap_or(record);
        deleted.status = InstanceStatus::Deleted;
        deleted.deleted_at = Some(now);
        info!(instance = %deleted.name, instance_id = %deleted.id, "instance deleted");

        ctx.publisher.publish_detached(
            events::INSTANCE_STATUS,
            deleted.clone(),
            json!({ "status": InstanceStatus::Deleted, "deletedAt": now }),
        );
        Ok(deleted.redacted())
    }

    /// Rename through the protocol's group-name call with an empty target,
    /// which the protocol applies to the account itself.
    pub async fn update_group_name(&self, identifier: &str, name: &str) -> Result<()> {
        let client = self.registry.get(identifier).await?.require_client()?;
        client.set_group_name(&Jid::empty(), name).await?;
        Ok(())
    }

    /// Rewrite the stored account number.
    pub async fn update_number(&self, identifier: &str, number: &str) -> Result<()> {
        if number.trim().is_empty() {
            return Err(Error::validation("number is required"));
        }
        let record = self.record(identifier).await?;
        self.registry
            .context()
            .store
            .update(&record.id, &InstancePatch {
                number: Some(number.trim().to_string()),
                updated_at: Some(Utc::now()),
                ..Default::default()
            })
            .await?;
        Ok(())
    }

    /// Which of `numbers` have an account on the network.
    pub async fn is_on_whatsapp(&self, identifier: &str, numbers: &[String]) -> Result<Vec<OnWhatsApp>> {
        if numbers.is_empty() {
            return Err(Error::validation("numbers must not be empty"));
        }
        let client = self.registry.get(identifier).await?.require_client()?;
        let jids = numbers
            .iter()
            .map(|n| format_jid(n).map(|j| j.to_string()))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(client.is_on_whatsapp(&jids).await?)
    }
}
