//! One managed session: its live record, the protocol client it owns and
//! the background tasks consuming the client's QR and occurrence streams.

use std::{
    sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak},
    time::Duration,
};

use {
    chatgate_broker::{EventPublisher, events},
    chatgate_protocol::{ClientFactory, Jid, Occurrence, ProtocolClient, QrEvent},
    chatgate_store::{ConnectionStatus, InstancePatch, InstanceRecord, InstanceStatus, InstanceStore},
    chrono::Utc,
    serde_json::{Value, json},
    tokio::sync::{mpsc, watch},
    tracing::{debug, info, warn},
};

use crate::{
    error::{Error, Result},
    qr::{self, QrCode},
    table::{Effect, EventTable, TranslateCtx, Translation},
};

/// Collaborators every instance needs.
#[derive(Clone)]
pub struct InstanceContext {
    pub store: Arc<dyn InstanceStore>,
    pub publisher: EventPublisher,
    pub factory: Arc<dyn ClientFactory>,
    pub table: Arc<EventTable>,
}

impl InstanceContext {
    pub fn new(
        store: Arc<dyn InstanceStore>,
        publisher: EventPublisher,
        factory: Arc<dyn ClientFactory>,
    ) -> Self {
        Self {
            store,
            publisher,
            factory,
            table: Arc::new(EventTable::default()),
        }
    }

    pub fn with_table(mut self, table: EventTable) -> Self {
        self.table = Arc::new(table);
        self
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

/// While a client is attached the in-memory record is authoritative for
/// `status` and `connection`; the store only holds checkpoints.
pub struct Instance {
    record: RwLock<InstanceRecord>,
    client: RwLock<Option<Arc<dyn ProtocolClient>>>,
    qr: watch::Sender<Option<QrCode>>,
    ctx: InstanceContext,
}

impl Instance {
    pub fn new(record: InstanceRecord, ctx: InstanceContext) -> Arc<Self> {
        let (qr, _) = watch::channel(None);
        Arc::new(Self {
            record: RwLock::new(record),
            client: RwLock::new(None),
            qr,
            ctx,
        })
    }

    pub fn id(&self) -> String {
        read(&self.record).id.clone()
    }

    pub fn name(&self) -> String {
        read(&self.record).name.clone()
    }

    pub fn status(&self) -> InstanceStatus {
        read(&self.record).status
    }

    pub fn connection(&self) -> ConnectionStatus {
        read(&self.record).connection
    }

    /// The live record, access key included.
    pub fn snapshot(&self) -> InstanceRecord {
        read(&self.record).clone()
    }

    pub fn client(&self) -> Option<Arc<dyn ProtocolClient>> {
        read(&self.client).clone()
    }

    /// The attached client, or [`Error::NotConnected`].
    pub fn require_client(&self) -> Result<Arc<dyn ProtocolClient>> {
        self.client().ok_or_else(|| Error::NotConnected { name: self.name() })
    }

    /// Whether the attached client holds an open link or a logged-in session.
    pub fn is_busy(&self) -> bool {
        self.client()
            .is_some_and(|c| c.is_connected() || c.is_logged_in())
    }

    pub fn is_logged_in(&self) -> bool {
        self.client().is_some_and(|c| c.is_logged_in())
    }

    /// Latest pairing artifact.
    pub fn qr_code(&self) -> Option<QrCode> {
        self.qr.borrow().clone()
    }

    /// Wait up to `timeout` for a pairing artifact.
    pub async fn wait_for_qr(&self, timeout: Duration) -> Option<QrCode> {
        let mut rx = self.qr.subscribe();
        let wait = rx.wait_for(Option::is_some);
        match tokio::time::timeout(timeout, wait).await {
            Ok(Ok(qr)) => qr.clone(),
            _ => None,
        }
    }

    fn update(&self, f: impl FnOnce(&mut InstanceRecord)) {
        f(&mut write(&self.record));
    }

    async fn persist(&self, patch: InstancePatch) {
        let id = self.id();
        if let Err(e) = self.ctx.store.update(&id, &patch).await {
            warn!(instance_id = %id, error = %e, "failed to checkpoint instance");
        }
    }

    async fn publish(&self, routing_key: &str, data: Value) {
        self.ctx
            .publisher
            .publish(routing_key, &self.snapshot(), data)
            .await;
    }

    /// Live view for clients: link state, account and profile details read
    /// from the attached client, access key stripped.
    pub async fn live_snapshot(&self) -> InstanceRecord {
        let mut record = self.snapshot().redacted();
        let Some(client) = self.client() else {
            return record;
        };

        record.connection = if client.is_logged_in() {
            ConnectionStatus::Open
        } else {
            ConnectionStatus::Close
        };
        let device = client.device();
        if let Some(push_name) = device.push_name {
            record.profile.push_name = Some(push_name);
        }
        if let Some(last) = device.last_successful_connect {
            record.profile.last_connection = Some(last);
        }
        if let Some(jid) = device.id {
            record.profile.number = Some(jid.number().to_string());
            match client.profile_picture_info(&Jid::user(jid.number()), None).await {
                Ok(Some(picture)) => record.profile.picture_url = Some(picture.url),
                Ok(None) => {},
                Err(e) => debug!(instance = %record.name, error = %e, "profile picture unavailable"),
            }
        }
        record
    }

    // ── Connection lifecycle ────────────────────────────────────────────────

    /// Pair a fresh device identity. Codes are published on `qrcode.update`
    /// until the client reports success; the `Connected` occurrence then
    /// makes the instance available.
    pub async fn new_connection(self: &Arc<Self>) -> Result<()> {
        {
            let mut record = write(&self.record);
            if record.status == InstanceStatus::Booting {
                return Err(Error::conflict(format!(
                    "Instance is not fully loaded - status: {}",
                    record.status
                )));
            }
            record.status = InstanceStatus::Booting;
        }
        self.qr.send_replace(None);

        let result = self.start_pairing().await;
        if result.is_err() {
            self.detach().await;
            self.update(|r| {
                r.status = InstanceStatus::Waiting;
                r.connection = ConnectionStatus::Close;
            });
        }
        result
    }

    async fn start_pairing(self: &Arc<Self>) -> Result<()> {
        let client = self.ctx.factory.new_session(&self.id()).await?;
        let codes = client.qr_channel().await?;
        self.attach(Arc::clone(&client)).await;
        self.spawn_qr_loop(codes);
        self.update(|r| {
            r.status = InstanceStatus::Waiting;
            r.connection = ConnectionStatus::Connecting;
        });
        client.connect().await?;
        info!(instance = %self.name(), "pairing started");
        Ok(())
    }

    /// Resume the stored device for the instance's account number. A missing
    /// device is an error; pairing is never started implicitly.
    pub async fn connect(self: &Arc<Self>) -> Result<()> {
        let (id, name, number) = {
            let record = read(&self.record);
            (record.id.clone(), record.name.clone(), record.number().map(str::to_string))
        };
        let number = number.ok_or_else(|| {
            Error::validation(format!("instance '{name}' has no account number"))
        })?;

        let client = self.ctx.factory.load_session(&id, &number).await?;
        self.attach(Arc::clone(&client)).await;
        if let Err(e) = client.connect().await {
            self.detach().await;
            return Err(e.into());
        }

        let number = client
            .device()
            .id
            .map(|jid| jid.number().to_string())
            .unwrap_or(number);
        self.update(|r| {
            r.status = InstanceStatus::Available;
            r.connection = ConnectionStatus::Open;
            r.profile.number = Some(number.clone());
        });
        self.qr.send_replace(Some(QrCode::state(ConnectionStatus::Open)));
        info!(instance = %name, number = %number, "session resumed");

        self.publish(events::INSTANCE_STATUS, json!({ "status": InstanceStatus::Available }))
            .await;
        Ok(())
    }

    /// End the session. On failure the link is dropped anyway and the
    /// error returned.
    pub async fn logout(&self) -> Result<InstanceRecord> {
        let client = self.require_client()?;
        if let Err(e) = client.logout().await {
            client.disconnect().await;
            return Err(e.into());
        }

        let now = Utc::now();
        self.update(|r| {
            r.connection = ConnectionStatus::Close;
            r.status = InstanceStatus::Waiting;
            r.updated_at = Some(now);
        });
        self.ctx
            .store
            .update(&self.id(), &InstancePatch {
                connection: Some(ConnectionStatus::Close),
                status: Some(InstanceStatus::Waiting),
                updated_at: Some(now),
                ..Default::default()
            })
            .await?;
        Ok(self.snapshot().redacted())
    }

    /// Replace the attached client and start consuming its occurrences.
    async fn attach(self: &Arc<Self>, client: Arc<dyn ProtocolClient>) {
        let events = client.take_events();
        let previous = write(&self.client).replace(client);
        if let Some(previous) = previous {
            previous.disconnect().await;
        }
        match events {
            Some(rx) => self.spawn_event_loop(rx),
            None => warn!(instance = %self.name(), "client occurrence stream already taken"),
        }
    }

    /// Drop the attached client, closing its link.
    pub async fn detach(&self) {
        let client = write(&self.client).take();
        if let Some(client) = client {
            client.disconnect().await;
        }
    }

    fn spawn_event_loop(self: &Arc<Self>, mut rx: mpsc::Receiver<Occurrence>) {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(occurrence) = rx.recv().await {
                let Some(instance) = weak.upgrade() else {
                    break;
                };
                instance.handle_occurrence(occurrence).await;
            }
        });
    }

    fn spawn_qr_loop(self: &Arc<Self>, mut rx: mpsc::Receiver<QrEvent>) {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let Some(instance) = weak.upgrade() else {
                    break;
                };
                instance.handle_qr_event(event).await;
            }
        });
    }

    async fn handle_qr_event(&self, event: QrEvent) {
        let name = self.name();
        match event {
            QrEvent::Code { code } => {
                let qr = match QrCode::render(&code) {
                    Ok(qr) => qr,
                    Err(e) => {
                        warn!(instance = %name, error = %e, "failed to render QR code");
                        return;
                    },
                };
                if let Ok(art) = qr::terminal(&code) {
                    info!(instance = %name, "scan to pair:\n{art}");
                }
                self.qr.send_replace(Some(qr.clone()));
                let data = serde_json::to_value(&qr).unwrap_or(Value::Null);
                self.publish(events::QR_CODE, data).await;
            },
            QrEvent::Success => info!(instance = %name, "pairing completed"),
            QrEvent::Timeout => {
                info!(instance = %name, "pairing code expired");
                self.update(|r| {
                    r.connection = ConnectionStatus::Close;
                    r.status = InstanceStatus::Waiting;
                });
                self.qr.send_replace(Some(QrCode::state(ConnectionStatus::Close)));
            },
            QrEvent::Error { message } => {
                warn!(instance = %name, error = %message, "pairing failed");
            },
        }
    }

    // ── Occurrences ─────────────────────────────────────────────────────────

    /// Translate, apply and publish one occurrence. Unmapped kinds are
    /// dropped.
    pub async fn handle_occurrence(&self, occurrence: Occurrence) {
        let ctx = TranslateCtx {
            connection: self.connection(),
            now: Utc::now(),
        };
        let Some(mut translation) = self.ctx.table.translate(&occurrence, &ctx) else {
            debug!(instance = %self.name(), kind = %occurrence.kind, "unmapped occurrence dropped");
            return;
        };
        self.apply(&mut translation).await;
        self.publish(translation.routing_key, translation.data).await;
    }

    async fn apply(&self, translation: &mut Translation) {
        match std::mem::replace(&mut translation.effect, Effect::None) {
            Effect::None => {},
            Effect::Connected { jid } => self.on_connected(jid).await,
            Effect::LoggedOut => {
                self.update(|r| {
                    r.status = InstanceStatus::Waiting;
                    r.connection = ConnectionStatus::Close;
                });
                self.persist(InstancePatch {
                    status: Some(InstanceStatus::Waiting),
                    connection: Some(ConnectionStatus::Close),
                    updated_at: Some(Utc::now()),
                    ..Default::default()
                })
                .await;
            },
            Effect::ConnectFailed => self.update(|r| {
                r.status = InstanceStatus::Waiting;
                r.connection = ConnectionStatus::Refused;
            }),
            Effect::Refused => self.update(|r| r.connection = ConnectionStatus::Refused),
            Effect::Disconnected => self.update(|r| r.connection = ConnectionStatus::Close),
            Effect::FetchPicture { jid, picture_id } => {
                let Some(client) = self.client() else {
                    return;
                };
                let existing = Some(picture_id.as_str()).filter(|id| !id.is_empty());
                let info = match client.profile_picture_info(&jid, existing).await {
                    Ok(info) => info,
                    Err(e) => {
                        debug!(jid = %jid, error = %e, "picture lookup failed");
                        None
                    },
                };
                if let Some(obj) = translation.data.as_object_mut() {
                    obj.insert("PictureInfo".into(), json!(info));
                }
            },
        }
    }

    async fn on_connected(&self, jid: Option<Jid>) {
        let device = self.client().map(|c| c.device()).unwrap_or_default();
        let number = jid
            .or(device.id)
            .map(|j| j.number().to_string());
        let last_connection = device.last_successful_connect.unwrap_or_else(Utc::now);

        self.update(|r| {
            r.status = InstanceStatus::Available;
            r.connection = ConnectionStatus::Open;
            r.profile.last_connection = Some(last_connection);
            if let Some(number) = &number {
                r.profile.number = Some(number.clone());
            }
            if device.push_name.is_some() {
                r.profile.push_name = device.push_name.clone();
            }
        });
        self.qr.send_replace(Some(QrCode::state(ConnectionStatus::Open)));
        info!(instance = %self.name(), number = ?number, "connected");

        self.persist(InstancePatch {
            number,
            last_connection: Some(last_connection),
            status: Some(InstanceStatus::Available),
            connection: Some(ConnectionStatus::Open),
            updated_at: Some(Utc::now()),
            ..Default::default()
        })
        .await;
    }
}
