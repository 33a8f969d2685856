//! [`ProtocolClient`] over the sidecar link.

use std::sync::{Arc, Mutex};

use {
    async_trait::async_trait,
    base64::{Engine, engine::general_purpose::STANDARD as BASE64},
    chatgate_protocol::{
        ChatPresence, ChatPresenceMedia, ClientFactory, DeviceInfo, Error, GroupInfo, Jid,
        MediaKind, Message, Occurrence, OnWhatsApp, ProfilePictureInfo, ProtocolClient, QrEvent,
        Result, SendOptions, SendResponse, UploadResponse,
    },
    serde::de::DeserializeOwned,
    serde_json::{Value, json},
    tokio::sync::mpsc,
    tracing::debug,
};

use crate::sidecar::{AccountState, SidecarHandle};

/// Capacity of the per-session occurrence and pairing channels.
const CHANNEL_CAPACITY: usize = 256;

/// One account on the sidecar.
pub struct SidecarClient {
    handle: Arc<SidecarHandle>,
    state: Arc<AccountState>,
    events: Mutex<Option<mpsc::Receiver<Occurrence>>>,
}

impl SidecarClient {
    /// Register `account_id` on `handle`. Occurrences pushed from here on
    /// are buffered until [`ProtocolClient::take_events`] is called.
    pub fn new(handle: Arc<SidecarHandle>, account_id: &str) -> Self {
        let (state, mut unbounded) = handle.register(account_id);
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        tokio::spawn(async move {
            while let Some(occurrence) = unbounded.recv().await {
                if tx.send(occurrence).await.is_err() {
                    break;
                }
            }
        });
        Self {
            handle,
            state,
            events: Mutex::new(Some(rx)),
        }
    }

    pub fn account_id(&self) -> &str {
        self.state.id()
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        self.handle.request(self.state.id(), method, params).await
    }

    async fn call_as<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let value = self.call(method, params).await?;
        serde_json::from_value(value)
            .map_err(|e| Error::rejected(method, format!("malformed response: {e}")))
    }
}

impl Drop for SidecarClient {
    fn drop(&mut self) {
        self.handle.forget(&self.state);
    }
}

#[async_trait]
impl ProtocolClient for SidecarClient {
    async fn connect(&self) -> Result<()> {
        let status = self.call("connect", Value::Null).await?;
        if let Some(connected) = status.get("connected").and_then(Value::as_bool) {
            self.state.set_connected(connected);
        }
        Ok(())
    }

    async fn disconnect(&self) {
        if let Err(e) = self.call("disconnect", Value::Null).await {
            debug!(account_id = self.state.id(), error = %e, "sidecar disconnect failed");
        }
        self.state.set_connected(false);
    }

    fn is_connected(&self) -> bool {
        self.handle.is_alive() && self.state.is_connected()
    }

    fn is_logged_in(&self) -> bool {
        self.state.is_logged_in()
    }

    fn device(&self) -> DeviceInfo {
        self.state.device()
    }

    async fn qr_channel(&self) -> Result<mpsc::Receiver<QrEvent>> {
        if !self.handle.is_alive() {
            return Err(Error::NotConnected);
        }
        Ok(self.state.open_qr(CHANNEL_CAPACITY))
    }

    fn take_events(&self) -> Option<mpsc::Receiver<Occurrence>> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    async fn send_message(
        &self,
        to: &Jid,
        message: Message,
        options: SendOptions,
    ) -> Result<SendResponse> {
        self.call_as(
            "send_message",
            json!({ "to": to, "message": message, "id": options.id }),
        )
        .await
    }

    async fn upload(&self, data: Vec<u8>, kind: MediaKind) -> Result<UploadResponse> {
        self.call_as(
            "upload",
            json!({ "kind": kind, "data": BASE64.encode(&data) }),
        )
        .await
    }

    async fn group_info(&self, jid: &Jid) -> Result<GroupInfo> {
        self.call_as("group_info", json!({ "jid": jid })).await
    }

    async fn profile_picture_info(
        &self,
        jid: &Jid,
        existing_id: Option<&str>,
    ) -> Result<Option<ProfilePictureInfo>> {
        self.call_as(
            "profile_picture_info",
            json!({ "jid": jid, "existing_id": existing_id }),
        )
        .await
    }

    async fn subscribe_presence(&self, jid: &Jid) -> Result<()> {
        self.call("subscribe_presence", json!({ "jid": jid })).await?;
        Ok(())
    }

    async fn send_chat_presence(
        &self,
        jid: &Jid,
        state: ChatPresence,
        media: ChatPresenceMedia,
    ) -> Result<()> {
        self.call(
            "send_chat_presence",
            json!({ "jid": jid, "state": state, "media": media }),
        )
        .await?;
        Ok(())
    }

    async fn set_group_name(&self, jid: &Jid, name: &str) -> Result<()> {
        self.call("set_group_name", json!({ "jid": jid, "name": name }))
            .await?;
        Ok(())
    }

    async fn logout(&self) -> Result<()> {
        self.call("logout", Value::Null).await?;
        Ok(())
    }

    async fn is_on_whatsapp(&self, phones: &[String]) -> Result<Vec<OnWhatsApp>> {
        self.call_as("is_on_whatsapp", json!({ "phones": phones }))
            .await
    }
}

/// Creates sessions on a shared sidecar link.
#[derive(Clone)]
pub struct SidecarClientFactory {
    handle: Arc<SidecarHandle>,
    client_name: Option<String>,
}

impl SidecarClientFactory {
    pub fn new(handle: Arc<SidecarHandle>) -> Self {
        Self {
            handle,
            client_name: None,
        }
    }

    /// Browser name announced to the network when pairing a new device.
    pub fn with_client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = Some(name.into());
        self
    }
}

#[async_trait]
impl ClientFactory for SidecarClientFactory {
    async fn new_session(&self, session_id: &str) -> Result<Arc<dyn ProtocolClient>> {
        let client = SidecarClient::new(Arc::clone(&self.handle), session_id);
        let params = match &self.client_name {
            Some(name) => json!({ "clientName": name }),
            None => Value::Null,
        };
        client.call("session.create", params).await?;
        Ok(Arc::new(client))
    }

    async fn load_session(
        &self,
        session_id: &str,
        number: &str,
    ) -> Result<Arc<dyn ProtocolClient>> {
        let client = SidecarClient::new(Arc::clone(&self.handle), session_id);
        match client
            .call("session.load", json!({ "number": number }))
            .await
        {
            Ok(_) => Ok(Arc::new(client)),
            Err(Error::DeviceNotFound { .. }) => Err(Error::DeviceNotFound {
                account: number.to_string(),
            }),
            Err(e) => Err(e),
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            sidecar::tests::{Responder, fake_sidecar, ok_null},
            types::codes,
        },
        chatgate_protocol::OccurrenceKind,
        chrono::{TimeZone, Utc},
        std::time::Duration,
    };

    async fn link(respond: Responder) -> (
        SidecarClientFactory,
        mpsc::UnboundedSender<Value>,
        mpsc::UnboundedReceiver<(String, String, Value)>,
    ) {
        let (url, push, seen) = fake_sidecar(respond).await;
        let handle = SidecarHandle::connect(&url, Duration::from_secs(2))
            .await
            .unwrap();
        (SidecarClientFactory::new(handle), push, seen)
    }

    #[tokio::test]
    async fn load_session_reports_missing_device() {
        let (factory, _push, _) = link(Arc::new(|_, method, _| {
            Some(match method {
                "session.load" => Err(("nothing stored".into(), Some(codes::DEVICE_NOT_FOUND.into()))),
                _ => Ok(Value::Null),
            })
        }))
        .await;
        let err = factory
            .load_session("sess-1", "553111111111")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::DeviceNotFound { ref account } if account == "553111111111"));
    }

    #[tokio::test]
    async fn send_message_round_trips() {
        let (factory, _push, mut seen) = link(Arc::new(|_, method, params| {
            Some(Ok(match method {
                "send_message" => json!({
                    "id": params["id"],
                    "timestamp": "2026-01-02T03:04:05Z"
                }),
                _ => Value::Null,
            }))
        }))
        .await;
        let client = factory.new_session("sess-2").await.unwrap();
        let resp = client
            .send_message(&Jid::user("553187654321"), Message::text("hi"), SendOptions {
                id: Some("MSG1".into()),
            })
            .await
            .unwrap();
        assert_eq!(resp.id, "MSG1");
        assert_eq!(resp.timestamp, Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap());

        let (account, method, _) = seen.recv().await.unwrap();
        assert_eq!((account.as_str(), method.as_str()), ("sess-2", "session.create"));
        let (_, method, params) = seen.recv().await.unwrap();
        assert_eq!(method, "send_message");
        assert_eq!(params["to"], "553187654321@s.whatsapp.net");
        assert_eq!(params["message"]["conversation"], "hi");
    }

    #[tokio::test]
    async fn upload_sends_base64_payload() {
        let (factory, _push, mut seen) = link(Arc::new(|_, method, _| {
            Some(Ok(match method {
                "upload" => json!({
                    "url": "https://mmg.example/x",
                    "directPath": "/x",
                    "mediaKey": "k",
                    "fileEncSha256": "e",
                    "fileSha256": "s",
                    "fileLength": 3
                }),
                _ => Value::Null,
            }))
        }))
        .await;
        let client = factory.new_session("sess-3").await.unwrap();
        let up = client.upload(b"abc".to_vec(), MediaKind::Image).await.unwrap();
        assert_eq!(up.file_length, 3);
        assert_eq!(up.direct_path, "/x");

        seen.recv().await.unwrap();
        let (_, _, params) = seen.recv().await.unwrap();
        assert_eq!(params["kind"], "image");
        assert_eq!(params["data"], "YWJj");
    }

    #[tokio::test]
    async fn malformed_result_is_rejected() {
        let (factory, _push, _) = link(Arc::new(|_, method, _| {
            Some(Ok(match method {
                "group_info" => json!("not a group"),
                _ => Value::Null,
            }))
        }))
        .await;
        let client = factory.new_session("sess-4").await.unwrap();
        let err = client
            .group_info(&"123@g.us".parse().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Rejected { ref operation, .. } if operation == "group_info"));
    }

    #[tokio::test]
    async fn pushes_reach_the_session() {
        let (factory, push, _) = link(ok_null()).await;
        let client = factory.new_session("sess-5").await.unwrap();
        let mut events = client.take_events().unwrap();
        assert!(client.take_events().is_none());
        let mut qr = client.qr_channel().await.unwrap();

        push.send(json!({ "type": "qr", "account_id": "sess-5", "qr": { "event": "success" } }))
            .unwrap();
        push.send(json!({
            "type": "status", "account_id": "sess-5", "connected": true, "logged_in": true
        }))
        .unwrap();
        push.send(json!({
            "type": "event", "account_id": "sess-5", "name": "PairSuccess",
            "data": { "ID": "553111111111@s.whatsapp.net" }
        }))
        .unwrap();

        assert_eq!(qr.recv().await.unwrap(), QrEvent::Success);
        let occurrence = events.recv().await.unwrap();
        assert_eq!(occurrence.kind, OccurrenceKind::PairSuccess);
        assert!(client.is_connected());
        assert!(client.is_logged_in());
    }

    #[tokio::test]
    async fn disconnect_clears_connected_even_on_error() {
        let (factory, push, _) = link(Arc::new(|_, method, _| {
            Some(match method {
                "disconnect" => Err(("gone".into(), None)),
                _ => Ok(json!({ "connected": true })),
            })
        }))
        .await;
        let client = factory.new_session("sess-6").await.unwrap();
        client.connect().await.unwrap();
        assert!(client.is_connected());
        client.disconnect().await;
        assert!(!client.is_connected());
        drop(push);
    }
}
