//! WebSocket link to the bridge sidecar.
//!
//! One link multiplexes every account. Requests are correlated with their
//! responses by `request_id`; pushed frames (pairing codes, occurrences and
//! status) are routed to the account they name.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use {
    chatgate_protocol::{
        DeviceInfo, Error, Jid, Occurrence, OccurrenceKind, QrEvent, Result,
    },
    futures::{SinkExt, StreamExt},
    serde_json::Value,
    tokio::sync::{mpsc, oneshot},
    tokio_tungstenite::{connect_async, tungstenite::Message},
    tracing::{debug, info, trace, warn},
    uuid::Uuid,
};

use crate::types::{DeviceFrame, GatewayMessage, SidecarMessage, codes};

/// Port the sidecar listens on unless configured otherwise.
pub const DEFAULT_SIDECAR_PORT: u16 = 9710;

/// Maximum delay between connection attempts.
const MAX_BACKOFF: Duration = Duration::from_secs(5);

type Reply = Result<Value>;

/// Live state of one account, fed by frames from the sidecar.
#[derive(Debug)]
pub struct AccountState {
    id: String,
    connected: AtomicBool,
    logged_in: AtomicBool,
    device: Mutex<DeviceFrame>,
    events: mpsc::UnboundedSender<Occurrence>,
    qr: Mutex<Option<mpsc::Sender<QrEvent>>>,
}

impl AccountState {
    fn new(id: &str, events: mpsc::UnboundedSender<Occurrence>) -> Self {
        Self {
            id: id.to_string(),
            connected: AtomicBool::new(false),
            logged_in: AtomicBool::new(false),
            device: Mutex::new(DeviceFrame::default()),
            events,
            qr: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn is_logged_in(&self) -> bool {
        self.logged_in.load(Ordering::SeqCst)
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn device(&self) -> DeviceInfo {
        let device = self.device.lock().unwrap_or_else(|e| e.into_inner());
        DeviceInfo {
            id: device.id.as_deref().and_then(|id| id.parse::<Jid>().ok()),
            push_name: device.push_name.clone(),
            last_successful_connect: device.last_successful_connect,
        }
    }

    /// Route future pairing codes to a new channel, replacing any previous one.
    pub fn open_qr(&self, capacity: usize) -> mpsc::Receiver<QrEvent> {
        let (tx, rx) = mpsc::channel(capacity);
        *self.qr.lock().unwrap_or_else(|e| e.into_inner()) = Some(tx);
        rx
    }

    fn apply_status(&self, connected: bool, logged_in: bool, device: Option<DeviceFrame>) {
        self.connected.store(connected, Ordering::SeqCst);
        self.logged_in.store(logged_in, Ordering::SeqCst);
        if let Some(device) = device {
            *self.device.lock().unwrap_or_else(|e| e.into_inner()) = device;
        }
    }

    fn push_qr(&self, event: QrEvent) {
        let mut slot = self.qr.lock().unwrap_or_else(|e| e.into_inner());
        let Some(tx) = slot.as_ref() else {
            debug!(account_id = %self.id, "pairing code with no listener");
            return;
        };
        let terminal = !matches!(event, QrEvent::Code { .. });
        match tx.try_send(event) {
            Ok(()) => {},
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(account_id = %self.id, "pairing channel full, dropping code");
            },
            Err(mpsc::error::TrySendError::Closed(_)) => {
                *slot = None;
                return;
            },
        }
        if terminal {
            *slot = None;
        }
    }

    fn push_event(&self, occurrence: Occurrence) {
        if self.events.send(occurrence).is_err() {
            trace!(account_id = %self.id, "occurrence dropped, no receiver");
        }
    }

    fn link_lost(&self) {
        let was_connected = self.connected.swap(false, Ordering::SeqCst);
        if was_connected {
            self.push_event(Occurrence::bare(OccurrenceKind::Disconnected));
        }
    }
}

#[derive(Default)]
struct Shared {
    pending: Mutex<HashMap<String, oneshot::Sender<Reply>>>,
    accounts: Mutex<HashMap<String, Arc<AccountState>>>,
    alive: AtomicBool,
}

impl Shared {
    fn account(&self, id: &str) -> Option<Arc<AccountState>> {
        self.accounts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }

    fn dispatch(&self, text: &str) {
        let frame: SidecarMessage = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "unparseable sidecar frame");
                return;
            },
        };

        match frame {
            SidecarMessage::Response {
                request_id,
                ok,
                result,
                error,
                code,
            } => {
                let waiter = self
                    .pending
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .remove(&request_id);
                let Some(waiter) = waiter else {
                    debug!(request_id = %request_id, "response for unknown request");
                    return;
                };
                let reply = if ok {
                    Ok(result)
                } else {
                    Err(response_error(
                        code.as_deref(),
                        error.unwrap_or_else(|| "unknown error".into()),
                    ))
                };
                let _ = waiter.send(reply);
            },
            SidecarMessage::Qr { account_id, qr } => match self.account(&account_id) {
                Some(account) => account.push_qr(qr),
                None => debug!(account_id = %account_id, "pairing code for unknown account"),
            },
            SidecarMessage::Event {
                account_id,
                name,
                data,
            } => {
                let Some(account) = self.account(&account_id) else {
                    debug!(account_id = %account_id, name = %name, "occurrence for unknown account");
                    return;
                };
                match Occurrence::from_wire(&name, data) {
                    Some(occurrence) => account.push_event(occurrence),
                    None => debug!(account_id = %account_id, name = %name, "ignoring unknown occurrence"),
                }
            },
            SidecarMessage::Status {
                account_id,
                connected,
                logged_in,
                device,
            } => {
                if let Some(account) = self.account(&account_id) {
                    account.apply_status(connected, logged_in, device);
                }
            },
            SidecarMessage::Error { account_id, error } => {
                warn!(account_id = account_id.as_deref().unwrap_or("-"), error = %error, "sidecar error");
            },
        }
    }

    fn link_lost(&self) {
        self.alive.store(false, Ordering::SeqCst);
        // Dropping the waiters fails every in-flight request.
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        let accounts: Vec<_> = self
            .accounts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        for account in accounts {
            account.link_lost();
        }
    }
}

fn response_error(code: Option<&str>, message: String) -> Error {
    match code {
        Some(codes::DEVICE_NOT_FOUND) => Error::DeviceNotFound { account: message },
        Some(codes::NOT_CONNECTED) => Error::NotConnected,
        _ => Error::message(message),
    }
}

/// Multiplexed connection to a running sidecar.
pub struct SidecarHandle {
    write_tx: mpsc::UnboundedSender<String>,
    shared: Arc<Shared>,
    request_timeout: Duration,
}

impl SidecarHandle {
    /// Open the link and start the background I/O task.
    pub async fn connect(url: &str, request_timeout: Duration) -> Result<Arc<Self>> {
        let (ws, _response) = connect_async(url)
            .await
            .map_err(|e| Error::external(format!("failed to connect to sidecar at {url}"), e))?;
        let (mut sink, mut reader) = ws.split();
        let (write_tx, mut write_rx) = mpsc::unbounded_channel::<String>();

        let shared = Arc::new(Shared::default());
        shared.alive.store(true, Ordering::SeqCst);
        info!(url, "connected to protocol sidecar");

        let link = Arc::clone(&shared);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    msg = reader.next() => match msg {
                        Some(Ok(Message::Text(text))) => link.dispatch(text.as_str()),
                        Some(Ok(Message::Ping(data))) => {
                            if sink.send(Message::Pong(data)).await.is_err() {
                                break;
                            }
                        },
                        Some(Ok(Message::Close(_))) | None => {
                            debug!("sidecar closed the link");
                            break;
                        },
                        Some(Ok(_)) => {},
                        Some(Err(e)) => {
                            warn!(error = %e, "sidecar link error");
                            break;
                        },
                    },
                    out = write_rx.recv() => match out {
                        Some(text) => {
                            if let Err(e) = sink.send(Message::Text(text.into())).await {
                                warn!(error = %e, "failed to write to sidecar");
                                break;
                            }
                        },
                        None => {
                            let _ = sink.send(Message::Close(None)).await;
                            break;
                        },
                    },
                }
            }
            link.link_lost();
            warn!("protocol sidecar link lost");
        });

        Ok(Arc::new(Self {
            write_tx,
            shared,
            request_timeout,
        }))
    }

    pub fn is_alive(&self) -> bool {
        self.shared.alive.load(Ordering::SeqCst)
    }

    /// Track `account_id`, returning its state and the receiving end of its
    /// occurrence stream. Re-registering replaces the previous routes.
    pub fn register(
        &self,
        account_id: &str,
    ) -> (Arc<AccountState>, mpsc::UnboundedReceiver<Occurrence>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = Arc::new(AccountState::new(account_id, tx));
        self.shared
            .accounts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(account_id.to_string(), Arc::clone(&state));
        (state, rx)
    }

    /// Stop routing frames to `state`, unless the account was re-registered
    /// since.
    pub fn forget(&self, state: &Arc<AccountState>) {
        let mut accounts = self.shared.accounts.lock().unwrap_or_else(|e| e.into_inner());
        if accounts
            .get(state.id())
            .is_some_and(|current| Arc::ptr_eq(current, state))
        {
            accounts.remove(state.id());
        }
    }

    /// Invoke `method` for `account_id` and wait for its result.
    pub async fn request(&self, account_id: &str, method: &str, params: Value) -> Result<Value> {
        if !self.is_alive() {
            return Err(Error::NotConnected);
        }
        let request_id = Uuid::new_v4().to_string();
        let frame = GatewayMessage::Request {
            request_id: request_id.clone(),
            account_id: account_id.to_string(),
            method: method.to_string(),
            params,
        };
        let text = serde_json::to_string(&frame)
            .map_err(|e| Error::external("failed to encode sidecar request", e))?;

        let (tx, rx) = oneshot::channel();
        self.shared
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(request_id.clone(), tx);

        if self.write_tx.send(text).is_err() {
            self.take_pending(&request_id);
            return Err(Error::NotConnected);
        }
        trace!(account_id, method, request_id = %request_id, "sidecar request");

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(reply)) => reply.map_err(|e| match e {
                Error::Message { message } => Error::rejected(method, message),
                other => other,
            }),
            Ok(Err(_)) => Err(Error::NotConnected),
            Err(_) => {
                self.take_pending(&request_id);
                Err(Error::Timeout {
                    operation: method.to_string(),
                })
            },
        }
    }

    fn take_pending(&self, request_id: &str) {
        self.shared
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(request_id);
    }
}

/// Connect to the sidecar, retrying with exponential backoff while it boots.
pub async fn connect_with_retry(
    url: &str,
    retries: u32,
    request_timeout: Duration,
) -> Result<Arc<SidecarHandle>> {
    let mut backoff = Duration::from_millis(250);
    let mut attempt = 0;
    loop {
        match SidecarHandle::connect(url, request_timeout).await {
            Ok(handle) => return Ok(handle),
            Err(e) if attempt < retries => {
                attempt += 1;
                debug!(url, attempt, delay_ms = backoff.as_millis(), error = %e, "sidecar not ready, retrying");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
            },
            Err(e) => return Err(e),
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod tests {
    use {
        super::*,
        serde_json::json,
        tokio::net::TcpListener,
        tokio_tungstenite::accept_async,
    };

    /// `None` leaves the request unanswered.
    pub(crate) type Reply = Option<std::result::Result<Value, (String, Option<String>)>>;
    pub(crate) type Responder = Arc<dyn Fn(&str, &str, &Value) -> Reply + Send + Sync>;

    /// A scripted sidecar accepting one link. Requests are answered by
    /// `respond`; frames sent on the returned channel are pushed unsolicited.
    /// Every request is echoed on the second channel.
    pub(crate) async fn fake_sidecar(
        respond: Responder,
    ) -> (
        String,
        mpsc::UnboundedSender<Value>,
        mpsc::UnboundedReceiver<(String, String, Value)>,
    ) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let (push_tx, mut push_rx) = mpsc::unbounded_channel::<Value>();
        let (seen_tx, seen_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = accept_async(stream).await.unwrap();
            let (mut sink, mut reader) = ws.split();
            loop {
                tokio::select! {
                    msg = reader.next() => {
                        let Some(Ok(Message::Text(text))) = msg else { break };
                        let frame: Value = serde_json::from_str(text.as_str()).unwrap();
                        let id = frame["request_id"].as_str().unwrap().to_string();
                        let account = frame["account_id"].as_str().unwrap().to_string();
                        let method = frame["method"].as_str().unwrap().to_string();
                        let params = frame["params"].clone();
                        let _ = seen_tx.send((account.clone(), method.clone(), params.clone()));
                        let reply = match respond(&account, &method, &params) {
                            None => continue,
                            Some(Ok(result)) => json!({
                                "type": "response", "request_id": id, "ok": true, "result": result
                            }),
                            Some(Err((error, code))) => json!({
                                "type": "response", "request_id": id, "ok": false,
                                "error": error, "code": code
                            }),
                        };
                        if sink.send(Message::Text(reply.to_string().into())).await.is_err() {
                            break;
                        }
                    },
                    push = push_rx.recv() => {
                        let Some(push) = push else {
                            let _ = sink.send(Message::Close(None)).await;
                            break;
                        };
                        if sink.send(Message::Text(push.to_string().into())).await.is_err() {
                            break;
                        }
                    },
                }
            }
        });

        (url, push_tx, seen_rx)
    }

    pub(crate) fn ok_null() -> Responder {
        Arc::new(|_, _, _| Some(Ok(Value::Null)))
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn correlates_responses() {
        let (url, _push, mut seen) = fake_sidecar(Arc::new(|_, method, params| {
            Some(Ok(json!({ "method": method, "echo": params })))
        }))
        .await;
        let handle = SidecarHandle::connect(&url, Duration::from_secs(2)).await.unwrap();

        let (a, b) = tokio::join!(
            handle.request("acc", "one", json!({ "n": 1 })),
            handle.request("acc", "two", json!({ "n": 2 })),
        );
        assert_eq!(a.unwrap()["echo"]["n"], 1);
        assert_eq!(b.unwrap()["method"], "two");
        assert_eq!(seen.recv().await.unwrap().0, "acc");
    }

    #[tokio::test]
    async fn maps_error_codes() {
        let (url, _push, _) = fake_sidecar(Arc::new(|_, method, _| {
            Some(match method {
                "session.load" => Err(("no device".into(), Some(codes::DEVICE_NOT_FOUND.into()))),
                "send" => Err(("offline".into(), Some(codes::NOT_CONNECTED.into()))),
                _ => Err(("boom".into(), None)),
            })
        }))
        .await;
        let handle = SidecarHandle::connect(&url, Duration::from_secs(2)).await.unwrap();

        let err = handle.request("acc", "session.load", Value::Null).await.unwrap_err();
        assert!(matches!(err, Error::DeviceNotFound { .. }));
        let err = handle.request("acc", "send", Value::Null).await.unwrap_err();
        assert!(matches!(err, Error::NotConnected));
        let err = handle.request("acc", "logout", Value::Null).await.unwrap_err();
        assert!(matches!(err, Error::Rejected { ref operation, .. } if operation == "logout"));
    }

    #[tokio::test]
    async fn times_out_unanswered_requests() {
        let (url, _push, _) = fake_sidecar(Arc::new(|_, _, _| None)).await;
        let handle = SidecarHandle::connect(&url, Duration::from_millis(50)).await.unwrap();
        let err = handle.request("acc", "slow", Value::Null).await.unwrap_err();
        assert!(matches!(err, Error::Timeout { ref operation } if operation == "slow"));
    }

    #[tokio::test]
    async fn routes_pushed_frames_to_accounts() {
        let (url, push, _) = fake_sidecar(ok_null()).await;
        let handle = SidecarHandle::connect(&url, Duration::from_secs(2)).await.unwrap();
        let (state, mut events) = handle.register("acc");
        let mut qr = state.open_qr(4);

        push.send(json!({
            "type": "status", "account_id": "acc", "connected": true, "logged_in": true,
            "device": { "id": "553111111111@s.whatsapp.net", "push_name": "Sales" }
        }))
        .unwrap();
        push.send(json!({ "type": "qr", "account_id": "acc", "qr": { "event": "code", "code": "2@x" } }))
            .unwrap();
        push.send(json!({ "type": "event", "account_id": "acc", "name": "Connected", "data": {} }))
            .unwrap();
        push.send(json!({ "type": "event", "account_id": "acc", "name": "NoSuchThing" }))
            .unwrap();
        push.send(json!({ "type": "event", "account_id": "other", "name": "Connected" }))
            .unwrap();

        assert_eq!(qr.recv().await.unwrap(), QrEvent::Code { code: "2@x".into() });
        assert_eq!(events.recv().await.unwrap().kind, OccurrenceKind::Connected);
        settle().await;
        assert!(events.try_recv().is_err());
        assert!(state.is_connected());
        assert!(state.is_logged_in());
        let device = state.device();
        assert_eq!(device.id.unwrap().number(), "553111111111");
        assert_eq!(device.push_name.as_deref(), Some("Sales"));
    }

    #[tokio::test]
    async fn link_loss_fails_requests_and_disconnects_accounts() {
        let (url, push, _) = fake_sidecar(ok_null()).await;
        let handle = SidecarHandle::connect(&url, Duration::from_secs(2)).await.unwrap();
        let (state, mut events) = handle.register("acc");
        state.set_connected(true);

        drop(push);
        assert_eq!(events.recv().await.unwrap().kind, OccurrenceKind::Disconnected);
        assert!(!state.is_connected());
        assert!(!handle.is_alive());
        let err = handle.request("acc", "logout", Value::Null).await.unwrap_err();
        assert!(matches!(err, Error::NotConnected));
    }

    #[tokio::test]
    async fn retry_gives_up() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        drop(listener);
        let err = connect_with_retry(&url, 1, Duration::from_secs(1)).await;
        assert!(err.is_err());
    }
}
