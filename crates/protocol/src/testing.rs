//! Scripted in-process protocol client for tests.
//!
//! Records every call and lets a test push QR codes and occurrences as if
//! they came from the network.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    chrono::Utc,
    serde_json::json,
    tokio::sync::mpsc,
};

use crate::{
    client::{
        ChatPresence, ChatPresenceMedia, ClientFactory, DeviceInfo, GroupInfo, MediaKind,
        OnWhatsApp, ProfilePictureInfo, ProtocolClient, SendOptions, SendResponse, UploadResponse,
    },
    error::{Error, Result},
    jid::Jid,
    message::Message,
    occurrence::{Occurrence, OccurrenceKind, QrEvent},
};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// A recorded client call.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Connect,
    Disconnect,
    QrChannel,
    SendMessage {
        to: Jid,
        message: Message,
        id: Option<String>,
    },
    Upload {
        len: usize,
        kind: MediaKind,
    },
    GroupInfo(Jid),
    ProfilePicture(Jid),
    SubscribePresence(Jid),
    ChatPresence {
        jid: Jid,
        state: ChatPresence,
        media: ChatPresenceMedia,
    },
    SetGroupName {
        jid: Jid,
        name: String,
    },
    Logout,
    IsOnWhatsApp(Vec<String>),
}

pub struct FakeClient {
    calls: Mutex<Vec<Call>>,
    connected: AtomicBool,
    logged_in: AtomicBool,
    device: Mutex<DeviceInfo>,
    events_tx: mpsc::Sender<Occurrence>,
    events_rx: Mutex<Option<mpsc::Receiver<Occurrence>>>,
    qr_tx: Mutex<Option<mpsc::Sender<QrEvent>>>,
    groups: Mutex<HashMap<Jid, GroupInfo>>,
    failures: Mutex<HashSet<&'static str>>,
}

impl Default for FakeClient {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeClient {
    pub fn new() -> Self {
        let (events_tx, events_rx) = mpsc::channel(64);
        Self {
            calls: Mutex::new(Vec::new()),
            connected: AtomicBool::new(false),
            logged_in: AtomicBool::new(false),
            device: Mutex::new(DeviceInfo::default()),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            qr_tx: Mutex::new(None),
            groups: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashSet::new()),
        }
    }

    /// A client whose device is already paired to `number`.
    pub fn paired(number: &str) -> Self {
        let client = Self::new();
        lock(&client.device).id = Some(Jid::user(format!("{number}:1")));
        client
    }

    pub fn calls(&self) -> Vec<Call> {
        lock(&self.calls).clone()
    }

    pub fn set_logged_in(&self, logged_in: bool) {
        self.logged_in.store(logged_in, Ordering::SeqCst);
        self.connected.store(logged_in, Ordering::SeqCst);
    }

    pub fn with_group(self, info: GroupInfo) -> Self {
        lock(&self.groups).insert(info.jid.clone(), info);
        self
    }

    /// Make the named operation (`"connect"`, `"send_message"`, `"upload"`,
    /// `"logout"`, `"group_info"`, ...) fail from now on.
    pub fn fail(&self, operation: &'static str) {
        lock(&self.failures).insert(operation);
    }

    fn check(&self, operation: &'static str) -> Result<()> {
        if lock(&self.failures).contains(operation) {
            return Err(Error::rejected(operation, "scripted failure"));
        }
        Ok(())
    }

    fn record(&self, call: Call) {
        lock(&self.calls).push(call);
    }

    /// Push a QR code onto the pairing channel.
    pub async fn push_qr(&self, code: &str) {
        let tx = lock(&self.qr_tx).clone();
        if let Some(tx) = tx {
            let _ = tx
                .send(QrEvent::Code {
                    code: code.to_string(),
                })
                .await;
        }
    }

    /// Close the pairing channel the way the protocol does on timeout.
    pub async fn expire_qr(&self) {
        let tx = lock(&self.qr_tx).take();
        if let Some(tx) = tx {
            let _ = tx.send(QrEvent::Timeout).await;
        }
    }

    pub async fn emit(&self, occurrence: Occurrence) {
        let _ = self.events_tx.send(occurrence).await;
    }

    /// Complete pairing: the device gets `number`, the session is logged in
    /// and a `Connected` occurrence is emitted.
    pub async fn complete_pairing(&self, number: &str) {
        let jid = Jid::user(format!("{number}:1"));
        {
            let mut device = lock(&self.device);
            device.id = Some(jid.clone());
            device.push_name = Some("Sales".into());
            device.last_successful_connect = Some(Utc::now());
        }
        self.set_logged_in(true);
        let tx = lock(&self.qr_tx).take();
        if let Some(tx) = tx {
            let _ = tx.send(QrEvent::Success).await;
        }
        self.emit(Occurrence::new(
            OccurrenceKind::Connected,
            json!({ "jid": jid.to_string() }),
        ))
        .await;
    }
}

#[async_trait]
impl ProtocolClient for FakeClient {
    async fn connect(&self) -> Result<()> {
        self.record(Call::Connect);
        self.check("connect")?;
        self.connected.store(true, Ordering::SeqCst);
        if lock(&self.device).id.is_some() {
            self.logged_in.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn disconnect(&self) {
        self.record(Call::Disconnect);
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn is_logged_in(&self) -> bool {
        self.logged_in.load(Ordering::SeqCst)
    }

    fn device(&self) -> DeviceInfo {
        lock(&self.device).clone()
    }

    async fn qr_channel(&self) -> Result<mpsc::Receiver<QrEvent>> {
        self.record(Call::QrChannel);
        self.check("qr_channel")?;
        let (tx, rx) = mpsc::channel(8);
        *lock(&self.qr_tx) = Some(tx);
        Ok(rx)
    }

    fn take_events(&self) -> Option<mpsc::Receiver<Occurrence>> {
        lock(&self.events_rx).take()
    }

    async fn send_message(
        &self,
        to: &Jid,
        message: Message,
        options: SendOptions,
    ) -> Result<SendResponse> {
        self.record(Call::SendMessage {
            to: to.clone(),
            message,
            id: options.id.clone(),
        });
        self.check("send_message")?;
        Ok(SendResponse {
            id: options.id.unwrap_or_else(|| "FAKE-ID".into()),
            timestamp: Utc::now(),
        })
    }

    async fn upload(&self, data: Vec<u8>, kind: MediaKind) -> Result<UploadResponse> {
        self.record(Call::Upload {
            len: data.len(),
            kind,
        });
        self.check("upload")?;
        Ok(UploadResponse {
            url: "https://mmg.example.net/d/f/blob.enc".into(),
            direct_path: "/v/t62/blob.enc".into(),
            media_key: "bWVkaWEta2V5".into(),
            file_enc_sha256: "ZW5j".into(),
            file_sha256: "c2hh".into(),
            file_length: data.len() as u64,
        })
    }

    async fn group_info(&self, jid: &Jid) -> Result<GroupInfo> {
        self.record(Call::GroupInfo(jid.clone()));
        self.check("group_info")?;
        lock(&self.groups)
            .get(jid)
            .cloned()
            .ok_or_else(|| Error::rejected("group_info", format!("unknown group {jid}")))
    }

    async fn profile_picture_info(
        &self,
        jid: &Jid,
        existing_id: Option<&str>,
    ) -> Result<Option<ProfilePictureInfo>> {
        self.record(Call::ProfilePicture(jid.clone()));
        self.check("profile_picture_info")?;
        Ok(Some(ProfilePictureInfo {
            url: format!("https://pps.example.net/{}.jpg", jid.number()),
            id: existing_id.unwrap_or("1").to_string(),
            kind: "image".into(),
            direct_path: String::new(),
        }))
    }

    async fn subscribe_presence(&self, jid: &Jid) -> Result<()> {
        self.record(Call::SubscribePresence(jid.clone()));
        self.check("subscribe_presence")
    }

    async fn send_chat_presence(
        &self,
        jid: &Jid,
        state: ChatPresence,
        media: ChatPresenceMedia,
    ) -> Result<()> {
        self.record(Call::ChatPresence {
            jid: jid.clone(),
            state,
            media,
        });
        self.check("send_chat_presence")
    }

    async fn set_group_name(&self, jid: &Jid, name: &str) -> Result<()> {
        self.record(Call::SetGroupName {
            jid: jid.clone(),
            name: name.to_string(),
        });
        self.check("set_group_name")
    }

    async fn logout(&self) -> Result<()> {
        self.record(Call::Logout);
        self.check("logout")?;
        self.set_logged_in(false);
        Ok(())
    }

    async fn is_on_whatsapp(&self, phones: &[String]) -> Result<Vec<OnWhatsApp>> {
        self.record(Call::IsOnWhatsApp(phones.to_vec()));
        self.check("is_on_whatsapp")?;
        Ok(phones
            .iter()
            .map(|p| OnWhatsApp {
                query: p.clone(),
                jid: Some(Jid::user(p.clone())),
                exists: true,
            })
            .collect())
    }
}

/// Hands out [`FakeClient`]s and keeps them reachable by session id.
#[derive(Default)]
pub struct FakeFactory {
    sessions: Mutex<HashMap<String, Arc<FakeClient>>>,
    prepared: Mutex<HashMap<String, Arc<FakeClient>>>,
    stored_devices: Mutex<HashSet<String>>,
    fail_new_session: AtomicBool,
    session_delay: Mutex<Option<Duration>>,
    new_sessions: AtomicUsize,
}

impl FakeFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretend a paired device is stored for `number`.
    pub fn with_stored_device(self, number: &str) -> Self {
        lock(&self.stored_devices).insert(number.to_string());
        self
    }

    /// Make every `new_session` take `delay` before handing out a client.
    pub fn with_session_delay(self, delay: Duration) -> Self {
        *lock(&self.session_delay) = Some(delay);
        self
    }

    /// How many pairing sessions were handed out.
    pub fn new_session_count(&self) -> usize {
        self.new_sessions.load(Ordering::SeqCst)
    }

    pub fn fail_new_sessions(&self) {
        self.fail_new_session.store(true, Ordering::SeqCst);
    }

    /// The most recent client handed out for `session_id`.
    pub fn client(&self, session_id: &str) -> Option<Arc<FakeClient>> {
        lock(&self.sessions).get(session_id).cloned()
    }

    /// Pre-register the client the next session for `session_id` will get.
    pub fn prepare(&self, session_id: &str, client: FakeClient) -> Arc<FakeClient> {
        let client = Arc::new(client);
        lock(&self.prepared).insert(session_id.to_string(), Arc::clone(&client));
        client
    }

    fn take_or_create(&self, session_id: &str, make: impl FnOnce() -> FakeClient) -> Arc<FakeClient> {
        let client = lock(&self.prepared)
            .remove(session_id)
            .unwrap_or_else(|| Arc::new(make()));
        lock(&self.sessions).insert(session_id.to_string(), Arc::clone(&client));
        client
    }
}

#[async_trait]
impl ClientFactory for FakeFactory {
    async fn new_session(&self, session_id: &str) -> Result<Arc<dyn ProtocolClient>> {
        let delay = *lock(&self.session_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_new_session.load(Ordering::SeqCst) {
            return Err(Error::message("device store unavailable"));
        }
        self.new_sessions.fetch_add(1, Ordering::SeqCst);
        Ok(self.take_or_create(session_id, FakeClient::new))
    }

    async fn load_session(
        &self,
        session_id: &str,
        number: &str,
    ) -> Result<Arc<dyn ProtocolClient>> {
        if !lock(&self.stored_devices).contains(number) {
            return Err(Error::DeviceNotFound {
                account: number.to_string(),
            });
        }
        Ok(self.take_or_create(session_id, || FakeClient::paired(number)))
    }
}
