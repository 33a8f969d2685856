//! One operation per message shape, all sharing the same pipeline: resolve
//! the instance, normalise the recipient, build the context block, compose
//! the message and hand it to the typing-simulated dispatch.

use std::{sync::Arc, time::Duration};

use {
    bytes::Bytes,
    chatgate_instances::{Instance, InstanceRegistry},
    chatgate_protocol::{ContextInfo, Jid, Message, ProtocolClient, format_jid},
    tracing::{info, warn},
    url::Url,
};

use crate::{
    compose,
    context::build_context,
    contract::{
        AudioMessage, ContactMessage, EditMessage, LinkMessage, ListMessage, LocationMessage,
        MediaAttributes, MediaFile, MediaFileMessage, MediaMessage, MediaType, MessageId,
        Options, PollMessage, PtvMessage, ReactionMessage, TextMessage,
    },
    dispatch::{self, Outbound},
    error::{Error, Result},
    fetch::{Fetcher, guess_mimetype},
    preview::OpenGraph,
};

#[derive(Debug, Clone)]
pub struct SendSettings {
    /// Budget for each media or link preview download.
    pub fetch_timeout: Duration,
    pub max_fetch_bytes: usize,
    pub max_redirects: u8,
    /// Allow downloads from loopback and private networks.
    pub allow_private_hosts: bool,
}

impl Default for SendSettings {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(30),
            max_fetch_bytes: 64 * 1024 * 1024,
            max_redirects: 3,
            allow_private_hosts: false,
        }
    }
}

/// A resolved send target.
struct Target {
    instance: Arc<Instance>,
    client: Arc<dyn ProtocolClient>,
    to: Jid,
}

pub struct SendService {
    registry: Arc<InstanceRegistry>,
    fetcher: Fetcher,
}

impl SendService {
    pub fn new(registry: Arc<InstanceRegistry>, settings: SendSettings) -> Result<Self> {
        let fetcher = Fetcher::new(settings.fetch_timeout)?
            .with_max_bytes(settings.max_fetch_bytes)
            .with_max_redirects(settings.max_redirects)
            .with_private_hosts(settings.allow_private_hosts);
        Ok(Self::with_fetcher(registry, fetcher))
    }

    pub fn with_fetcher(registry: Arc<InstanceRegistry>, fetcher: Fetcher) -> Self {
        Self { registry, fetcher }
    }

    async fn target(&self, instance: &str, recipient: &str) -> Result<Target> {
        let instance = self.registry.get(instance).await?;
        let client = instance.require_client()?;
        let to = format_jid(recipient).map_err(|source| Error::Recipient {
            recipient: recipient.to_string(),
            source,
        })?;
        Ok(Target {
            instance,
            client,
            to,
        })
    }

    fn send(&self, target: Target, message: Message, options: &Options) -> MessageId {
        let id = dispatch::message_id(options);
        info!(
            instance = %target.instance.name(),
            message_id = %id,
            to = %target.to,
            delay_ms = options.delay,
            "scheduling send"
        );
        let outbound = Outbound::new(
            target.instance.snapshot(),
            target.client,
            target.to,
            message,
            options,
        );
        MessageId {
            message_id: dispatch::dispatch(&self.registry.context().publisher, outbound, id),
        }
    }

    pub async fn text(&self, instance: &str, request: TextMessage) -> Result<MessageId> {
        if request.text_message.text.is_empty() {
            return Err(Error::validation("text is required"));
        }
        let target = self.target(instance, &request.recipient).await?;
        let ctx = build_context(target.client.as_ref(), &target.to, &request.options).await?;
        let message = compose::text(&request.text_message.text, ctx);
        Ok(self.send(target, message, &request.options))
    }

    /// Extended text with a scraped preview. Page and thumbnail failures
    /// only cost the preview.
    pub async fn link(&self, instance: &str, request: LinkMessage) -> Result<MessageId> {
        let link = &request.link_message.link;
        if link.trim().is_empty() {
            return Err(Error::validation("link is required"));
        }
        let target = self.target(instance, &request.recipient).await?;
        let ctx = build_context(target.client.as_ref(), &target.to, &request.options).await?;

        let og = match self.fetcher.get(link).await {
            Ok(page) => OpenGraph::parse(&String::from_utf8_lossy(&page.body)),
            Err(e) => {
                warn!(link = %link, error = %e, "failed to fetch link preview");
                OpenGraph::default()
            },
        };
        let thumbnail = match og.image().and_then(|img| resolve(link, img)) {
            Some(url) => match self.fetcher.get(&url).await {
                Ok(image) => Some(image.body),
                Err(e) => {
                    warn!(url = %url, error = %e, "failed to generate jpeg thumbnail");
                    None
                },
            },
            None => None,
        };

        let message = compose::link(&request.link_message, &og, thumbnail.as_deref(), ctx);
        Ok(self.send(target, message, &request.options))
    }

    /// Media fetched from a URL.
    pub async fn media(&self, instance: &str, request: MediaMessage) -> Result<MessageId> {
        self.media_from_url(
            instance,
            &request.recipient,
            &request.options,
            &request.media_message.url,
            &request.media_message.attributes,
        )
        .await
    }

    /// Voice note fetched from a URL.
    pub async fn audio(&self, instance: &str, request: AudioMessage) -> Result<MessageId> {
        self.media_from_url(
            instance,
            &request.recipient,
            &request.options,
            &request.audio_message.url,
            &MediaAttributes::of(MediaType::Audio),
        )
        .await
    }

    /// Round video note fetched from a URL.
    pub async fn ptv(&self, instance: &str, request: PtvMessage) -> Result<MessageId> {
        let mut attributes = MediaAttributes::of(MediaType::Ptv);
        attributes.caption = request.ptv_message.caption.clone();
        self.media_from_url(
            instance,
            &request.recipient,
            &request.options,
            &request.ptv_message.url,
            &attributes,
        )
        .await
    }

    /// Media from uploaded bytes, described by `request.media_message`.
    pub async fn media_file(
        &self,
        instance: &str,
        request: MediaFileMessage,
        file: MediaFile,
    ) -> Result<MessageId> {
        let attributes = request
            .media_message
            .clone()
            .ok_or_else(|| Error::validation("mediaMessage is required"))?;
        self.media_from_file(instance, request, attributes, file)
            .await
    }

    pub async fn audio_file(
        &self,
        instance: &str,
        request: MediaFileMessage,
        file: MediaFile,
    ) -> Result<MessageId> {
        self.media_from_file(instance, request, MediaAttributes::of(MediaType::Audio), file)
            .await
    }

    pub async fn ptv_file(
        &self,
        instance: &str,
        request: MediaFileMessage,
        file: MediaFile,
    ) -> Result<MessageId> {
        let mut attributes = MediaAttributes::of(MediaType::Ptv);
        attributes.caption = request
            .media_message
            .as_ref()
            .and_then(|m| m.caption.clone());
        self.media_from_file(instance, request, attributes, file)
            .await
    }

    async fn media_from_url(
        &self,
        instance: &str,
        recipient: &str,
        options: &Options,
        url: &str,
        attributes: &MediaAttributes,
    ) -> Result<MessageId> {
        compose::check_media(attributes)?;
        let target = self.target(instance, recipient).await?;
        let ctx = build_context(target.client.as_ref(), &target.to, options).await?;

        let fetched = self.fetcher.get(url).await?;
        let mimetype = fetched
            .content_type
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| guess_mimetype(url).to_string());

        let message = upload(&target, attributes, &mimetype, fetched.body, ctx).await?;
        Ok(self.send(target, message, options))
    }

    async fn media_from_file(
        &self,
        instance: &str,
        request: MediaFileMessage,
        mut attributes: MediaAttributes,
        file: MediaFile,
    ) -> Result<MessageId> {
        if attributes.filename.as_deref().is_none_or(str::is_empty) {
            attributes.filename = file.file_name.clone();
        }
        compose::check_media(&attributes)?;
        if file.data.is_empty() {
            return Err(Error::validation("file is empty"));
        }

        let target = self.target(instance, &request.recipient).await?;
        let ctx = build_context(target.client.as_ref(), &target.to, &request.options).await?;

        let mimetype = file
            .mimetype
            .filter(|m| !m.is_empty() && m != "application/octet-stream")
            .or_else(|| file.file_name.as_deref().map(|n| guess_mimetype(n).to_string()))
            .unwrap_or_else(|| "application/octet-stream".to_string());

        let message = upload(&target, &attributes, &mimetype, file.data, ctx).await?;
        Ok(self.send(target, message, &request.options))
    }

    pub async fn location(&self, instance: &str, request: LocationMessage) -> Result<MessageId> {
        let target = self.target(instance, &request.recipient).await?;
        let ctx = build_context(target.client.as_ref(), &target.to, &request.options).await?;
        let message = compose::location(&request.location_message, ctx);
        Ok(self.send(target, message, &request.options))
    }

    pub async fn contact(&self, instance: &str, request: ContactMessage) -> Result<MessageId> {
        let target = self.target(instance, &request.recipient).await?;
        let ctx = build_context(target.client.as_ref(), &target.to, &request.options).await?;
        let message = compose::contacts(&request.contact_message, &request.recipient, ctx)?;
        Ok(self.send(target, message, &request.options))
    }

    pub async fn list(&self, instance: &str, request: ListMessage) -> Result<MessageId> {
        let target = self.target(instance, &request.recipient).await?;
        let ctx = build_context(target.client.as_ref(), &target.to, &request.options).await?;
        let message = compose::list(&request.list_message, ctx)?;
        Ok(self.send(target, message, &request.options))
    }

    pub async fn poll(&self, instance: &str, request: PollMessage) -> Result<MessageId> {
        let target = self.target(instance, &request.recipient).await?;
        let ctx = build_context(target.client.as_ref(), &target.to, &request.options).await?;
        let secret: [u8; 32] = rand::random();
        let message = compose::poll(&request.poll_message, &secret, ctx)?;
        Ok(self.send(target, message, &request.options))
    }

    /// Reactions carry no quote or mentions.
    pub async fn reaction(&self, instance: &str, request: ReactionMessage) -> Result<MessageId> {
        let key = &request.message_key;
        if key.message_id.is_empty() {
            return Err(Error::validation("messageKey.messageId is required"));
        }
        let target = self.target(instance, &request.recipient).await?;
        let chat = format_jid(&key.chat_id).map_err(|source| Error::Recipient {
            recipient: key.chat_id.clone(),
            source,
        })?;
        let message = compose::reaction(
            chat,
            &key.message_id,
            key.from_me,
            &request.reaction_message,
        );
        Ok(self.send(target, message, &Options::default()))
    }

    /// Replace the text of message `message_id` previously sent to the
    /// recipient.
    pub async fn edit(
        &self,
        instance: &str,
        message_id: &str,
        request: EditMessage,
    ) -> Result<MessageId> {
        if message_id.is_empty() {
            return Err(Error::validation("message id is required"));
        }
        if request.edit_message.text.is_empty() {
            return Err(Error::validation("text is required"));
        }
        let target = self.target(instance, &request.recipient).await?;
        let message = target.client.build_edit(
            &target.to,
            message_id,
            Message::text(request.edit_message.text),
        );
        Ok(self.send(target, message, &Options::default()))
    }
}

/// Upload `data` and wrap the result in the descriptor for `attributes`.
async fn upload(
    target: &Target,
    attributes: &MediaAttributes,
    mimetype: &str,
    data: Bytes,
    ctx: Option<ContextInfo>,
) -> Result<Message> {
    let uploaded = target
        .client
        .upload(data.to_vec(), attributes.media_type.upload_kind())
        .await
        .map_err(Error::Upload)?;
    compose::media(attributes, mimetype, uploaded, ctx)
}

/// Absolute form of a possibly relative `og:image` reference.
fn resolve(base: &str, reference: &str) -> Option<String> {
    let base = Url::parse(base).ok()?;
    base.join(reference).ok().map(String::from)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        chatgate_broker::{EventPublisher, InMemoryBroker, events},
        chatgate_instances::{ErrorKind, InstanceContext},
        chatgate_protocol::{
            GroupInfo, GroupParticipant, MediaKind,
            testing::{Call, FakeClient, FakeFactory},
        },
        chatgate_store::{InMemoryInstanceStore, InstanceRecord, InstanceStore},
        serde_json::json,
        wiremock::{
            Mock, MockServer, ResponseTemplate,
            matchers::{method, path},
        },
    };

    const NUMBER: &str = "553111111111";

    struct Harness {
        broker: Arc<InMemoryBroker>,
        client: Arc<FakeClient>,
        service: SendService,
    }

    /// Mock servers listen on loopback.
    fn loopback_settings() -> SendSettings {
        SendSettings {
            fetch_timeout: Duration::from_secs(5),
            allow_private_hosts: true,
            ..SendSettings::default()
        }
    }

    async fn harness_with(client: FakeClient) -> Harness {
        harness_with_settings(client, loopback_settings()).await
    }

    async fn harness_with_settings(client: FakeClient, settings: SendSettings) -> Harness {
        let store = Arc::new(InMemoryInstanceStore::new());
        let broker = Arc::new(InMemoryBroker::new());
        let factory = Arc::new(FakeFactory::new().with_stored_device(NUMBER));

        let record = InstanceRecord::new("sales").with_number(NUMBER);
        store.create(&record).await.unwrap();
        let client = factory.prepare(&record.id, client);

        let ctx = InstanceContext::new(store, EventPublisher::new(broker.clone()), factory);
        let registry = Arc::new(InstanceRegistry::new(ctx));
        assert_eq!(registry.bootstrap().await.unwrap(), 1);

        let service = SendService::new(registry, settings).unwrap();
        Harness {
            broker,
            client,
            service,
        }
    }

    async fn harness() -> Harness {
        harness_with(FakeClient::paired(NUMBER)).await
    }

    fn sent(client: &FakeClient) -> Vec<(Jid, Message, Option<String>)> {
        client
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::SendMessage { to, message, id } => Some((to, message, id)),
                _ => None,
            })
            .collect()
    }

    fn uploads(client: &FakeClient) -> Vec<(usize, MediaKind)> {
        client
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Upload { len, kind } => Some((len, kind)),
                _ => None,
            })
            .collect()
    }

    /// Poll until `check` holds; sends complete on a detached task.
    async fn eventually(mut check: impl FnMut() -> bool) {
        for _ in 0..100 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    async fn one_sent(client: &FakeClient) -> (Jid, Message, Option<String>) {
        eventually(|| sent(client).len() == 1).await;
        sent(client).remove(0)
    }

    fn text(recipient: &str, options: serde_json::Value) -> TextMessage {
        serde_json::from_value(json!({
            "recipient": recipient,
            "options": options,
            "textMessage": { "text": "hello" }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn text_returns_id_then_publishes_outcome() {
        let h = harness().await;
        let id = h
            .service
            .text("sales", text("5531987654321", json!({ "messageId": "ABC123" })))
            .await
            .unwrap();
        assert_eq!(id.message_id, "ABC123");

        let (to, message, sent_id) = one_sent(&h.client).await;
        assert_eq!(to.to_string(), "553187654321@s.whatsapp.net");
        assert_eq!(message.extended_text_message.unwrap().text, "hello");
        assert_eq!(sent_id.as_deref(), Some("ABC123"));

        eventually(|| h.broker.count(events::SEND_MESSAGE) == 1).await;
        let outcome = &h.broker.on(events::SEND_MESSAGE)[0];
        assert_eq!(outcome.data["sent"]["messageId"], "ABC123");
        assert_eq!(outcome.instance.name, "sales");
    }

    #[tokio::test]
    async fn zero_delay_never_touches_presence() {
        let h = harness().await;
        h.service
            .text("sales", text("5531987654321", json!({ "presence": "composing" })))
            .await
            .unwrap();
        one_sent(&h.client).await;
        assert!(!h.client.calls().iter().any(|c| matches!(
            c,
            Call::SubscribePresence(_) | Call::ChatPresence { .. }
        )));
    }

    #[tokio::test]
    async fn send_failure_surfaces_only_as_event() {
        let h = harness().await;
        h.client.fail("send_message");
        let id = h
            .service
            .text("sales", text("5531987654321", json!({})))
            .await
            .unwrap();
        eventually(|| h.broker.count(events::INSTANCE_ERROR) == 1).await;
        let failed = &h.broker.on(events::INSTANCE_ERROR)[0];
        assert_eq!(failed.data["sent"]["messageId"], id.message_id.as_str());
        assert_eq!(failed.data["error"]["isError"], true);
        assert_eq!(h.broker.count(events::SEND_MESSAGE), 0);
    }

    #[tokio::test]
    async fn unknown_instance_is_not_found() {
        let h = harness().await;
        let err = h
            .service
            .text("nobody", text("5531987654321", json!({})))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn bad_recipient_is_rejected_before_sending() {
        let h = harness().await;
        let err = h
            .service
            .text("sales", text("not a number", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Recipient { .. }));
        assert_eq!(err.kind(), ErrorKind::Validation);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(sent(&h.client).is_empty());
    }

    #[tokio::test]
    async fn invalid_quote_blocks_the_send() {
        let h = harness().await;
        let err = h
            .service
            .text(
                "sales",
                text("5531987654321", json!({ "quotedMessage": { "messageId": "X" } })),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidQuote { .. }));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(sent(&h.client).is_empty());
    }

    #[tokio::test]
    async fn hidden_mention_targets_every_group_member() {
        let group: Jid = "120363025246125486@g.us".parse().unwrap();
        let client = FakeClient::paired(NUMBER).with_group(GroupInfo {
            jid: group.clone(),
            name: "Team".into(),
            participants: vec![GroupParticipant {
                jid: Jid::user("553122222222"),
                is_admin: false,
            }],
        });
        let h = harness_with(client).await;
        h.service
            .text(
                "sales",
                text(&group.to_string(), json!({ "groupMention": { "hiddenMention": true } })),
            )
            .await
            .unwrap();

        let (to, message, _) = one_sent(&h.client).await;
        assert_eq!(to, group);
        let ctx = message.context_info().cloned().unwrap();
        assert_eq!(ctx.mentioned_jid, vec!["553122222222@s.whatsapp.net"]);
    }

    #[tokio::test]
    async fn media_by_url_uploads_and_uses_served_mimetype() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cat"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "image/png")
                    .set_body_bytes(vec![0u8; 64]),
            )
            .mount(&server)
            .await;

        let h = harness().await;
        let request: MediaMessage = serde_json::from_value(json!({
            "recipient": "5531987654321",
            "mediaMessage": {
                "url": format!("{}/cat", server.uri()),
                "mediatype": "image",
                "caption": "a cat"
            }
        }))
        .unwrap();
        h.service.media("sales", request).await.unwrap();

        assert_eq!(uploads(&h.client), vec![(64, MediaKind::Image)]);
        let (_, message, _) = one_sent(&h.client).await;
        let image = message.image_message.unwrap();
        assert_eq!(image.mimetype, "image/png");
        assert_eq!(image.caption.as_deref(), Some("a cat"));
        assert_eq!(image.file_length, 64);
    }

    #[tokio::test]
    async fn media_on_private_network_is_refused() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 64]))
            .expect(0)
            .mount(&server)
            .await;

        let h = harness_with_settings(FakeClient::paired(NUMBER), SendSettings::default()).await;
        let request: MediaMessage = serde_json::from_value(json!({
            "recipient": "5531987654321",
            "mediaMessage": {
                "url": format!("{}/cat", server.uri()),
                "mediatype": "image"
            }
        }))
        .unwrap();
        let err = h.service.media("sales", request).await.unwrap_err();
        assert!(matches!(err, Error::Blocked { .. }), "{err}");
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(uploads(&h.client).is_empty());
    }

    #[tokio::test]
    async fn document_without_filename_fails_before_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8; 8]))
            .expect(0)
            .mount(&server)
            .await;

        let h = harness().await;
        let request: MediaMessage = serde_json::from_value(json!({
            "recipient": "5531987654321",
            "mediaMessage": {
                "url": format!("{}/report.pdf", server.uri()),
                "mediatype": "document"
            }
        }))
        .unwrap();
        let err = h.service.media("sales", request).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(uploads(&h.client).is_empty());
    }

    #[tokio::test]
    async fn media_fetch_failure_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let h = harness().await;
        let request: AudioMessage = serde_json::from_value(json!({
            "recipient": "5531987654321",
            "audioMessage": { "url": format!("{}/gone.ogg", server.uri()) }
        }))
        .unwrap();
        let err = h.service.audio("sales", request).await.unwrap_err();
        assert!(matches!(err, Error::FetchStatus { status: 404, .. }));
        assert!(uploads(&h.client).is_empty());
    }

    #[tokio::test]
    async fn upload_failure_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8; 8]))
            .mount(&server)
            .await;

        let h = harness().await;
        h.client.fail("upload");
        let request: PtvMessage = serde_json::from_value(json!({
            "recipient": "5531987654321",
            "ptvMessage": { "url": format!("{}/note.mp4", server.uri()) }
        }))
        .unwrap();
        let err = h.service.ptv("sales", request).await.unwrap_err();
        assert!(matches!(err, Error::Upload(_)));
        assert_eq!(err.kind(), ErrorKind::Protocol);
    }

    #[tokio::test]
    async fn uploaded_document_takes_file_name_and_guessed_mimetype() {
        let h = harness().await;
        let request: MediaFileMessage = serde_json::from_value(json!({
            "recipient": "5531987654321",
            "mediaMessage": { "mediatype": "document", "caption": "Q3" }
        }))
        .unwrap();
        let file = MediaFile {
            data: Bytes::from_static(b"%PDF-1.7"),
            mimetype: None,
            file_name: Some("report.pdf".into()),
        };
        h.service.media_file("sales", request, file).await.unwrap();

        assert_eq!(uploads(&h.client), vec![(8, MediaKind::Document)]);
        let (_, message, _) = one_sent(&h.client).await;
        let doc = message.document_message.unwrap();
        assert_eq!(doc.file_name.as_deref(), Some("report.pdf"));
        assert_eq!(doc.mimetype, "application/pdf");
    }

    #[tokio::test]
    async fn uploaded_audio_is_a_voice_note() {
        let h = harness().await;
        let request: MediaFileMessage =
            serde_json::from_value(json!({ "recipient": "5531987654321" })).unwrap();
        let file = MediaFile {
            data: Bytes::from_static(b"OggS"),
            mimetype: Some("audio/ogg".into()),
            file_name: None,
        };
        h.service.audio_file("sales", request, file).await.unwrap();
        let (_, message, _) = one_sent(&h.client).await;
        let audio = message.audio_message.unwrap();
        assert_eq!(audio.ptt, Some(true));
        assert_eq!(audio.mimetype, "audio/ogg");
    }

    #[tokio::test]
    async fn link_preview_scrapes_page_and_thumbnail() {
        let server = MockServer::start().await;
        let page = r#"<html><head>
                <meta property="og:title" content="Release notes">
                <meta property="og:description" content="What changed">
                <meta property="og:image" content="/thumb.jpg">
                <meta property="og:image:width" content="300">
                <meta property="og:image:height" content="200">
            </head></html>"#;
        Mock::given(method("GET"))
            .and(path("/post"))
            .respond_with(ResponseTemplate::new(200).set_body_string(page))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/thumb.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"jpg".to_vec()))
            .mount(&server)
            .await;

        let h = harness().await;
        let link = format!("{}/post", server.uri());
        let request: LinkMessage = serde_json::from_value(json!({
            "recipient": "5531987654321",
            "linkMessage": { "link": link, "description": "Mine" }
        }))
        .unwrap();
        h.service.link("sales", request).await.unwrap();

        let (_, message, _) = one_sent(&h.client).await;
        let ext = message.extended_text_message.unwrap();
        assert_eq!(ext.text, link);
        assert_eq!(ext.title.as_deref(), Some("Release notes"));
        assert_eq!(ext.description.as_deref(), Some("Mine"));
        assert_eq!(ext.jpeg_thumbnail.as_deref(), Some("anBn"));
        assert_eq!((ext.thumbnail_width, ext.thumbnail_height), (Some(300), Some(200)));
    }

    #[tokio::test]
    async fn link_preview_failure_still_sends() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let h = harness().await;
        let request: LinkMessage = serde_json::from_value(json!({
            "recipient": "5531987654321",
            "linkMessage": { "link": format!("{}/down", server.uri()), "text": "see" }
        }))
        .unwrap();
        h.service.link("sales", request).await.unwrap();

        let (_, message, _) = one_sent(&h.client).await;
        let ext = message.extended_text_message.unwrap();
        assert!(ext.text.ends_with("\n\nsee"));
        assert!(ext.title.is_none());
        assert!(ext.jpeg_thumbnail.is_none());
    }

    #[tokio::test]
    async fn polls_get_fresh_secrets() {
        let h = harness().await;
        let poll = || -> PollMessage {
            serde_json::from_value(json!({
                "recipient": "5531987654321",
                "pollMessage": { "name": "Lunch?", "options": ["yes", "no"] }
            }))
            .unwrap()
        };
        h.service.poll("sales", poll()).await.unwrap();
        h.service.poll("sales", poll()).await.unwrap();

        eventually(|| sent(&h.client).len() == 2).await;
        let keys: Vec<String> = sent(&h.client)
            .into_iter()
            .map(|(_, m, _)| m.poll_creation_message_v3.unwrap().enc_key)
            .collect();
        assert_ne!(keys[0], keys[1]);
    }

    #[tokio::test]
    async fn reaction_skips_context_resolution() {
        let h = harness().await;
        let request: ReactionMessage = serde_json::from_value(json!({
            "recipient": "120363025246125486@g.us",
            "messageKey": {
                "chatId": "120363025246125486@g.us",
                "messageId": "MSG1",
                "fromMe": false
            },
            "reactionMessage": { "reaction": "👍" }
        }))
        .unwrap();
        h.service.reaction("sales", request).await.unwrap();

        let (_, message, _) = one_sent(&h.client).await;
        let reaction = message.reaction_message.unwrap();
        assert_eq!(reaction.key.id, "MSG1");
        assert_eq!(reaction.text, "👍");
        assert!(!h.client.calls().iter().any(|c| matches!(c, Call::GroupInfo(_))));
    }

    #[tokio::test]
    async fn edit_wraps_new_text() {
        let h = harness().await;
        let request: EditMessage = serde_json::from_value(json!({
            "recipient": "5531987654321",
            "editMessage": { "text": "fixed" }
        }))
        .unwrap();
        h.service.edit("sales", "MSG9", request).await.unwrap();

        let (_, message, _) = one_sent(&h.client).await;
        let inner = message.edited_message.unwrap().message;
        let protocol = inner.protocol_message.unwrap();
        assert_eq!(protocol.key.id, "MSG9");
        assert_eq!(
            protocol.edited_message.unwrap().conversation.as_deref(),
            Some("fixed")
        );
    }

    #[tokio::test]
    async fn location_and_contacts_are_sent() {
        let h = harness().await;
        let location: LocationMessage = serde_json::from_value(json!({
            "recipient": "5531987654321",
            "locationMessage": { "name": "Office", "latitude": -19.9, "longitude": -43.9 }
        }))
        .unwrap();
        h.service.location("sales", location).await.unwrap();
        let contact: ContactMessage = serde_json::from_value(json!({
            "recipient": "5531987654321",
            "contactMessage": [
                { "fullName": "Ana", "rawNumber": "5531911111111", "phoneNumber": "+55 31 91111-1111" },
                { "fullName": "Bia", "rawNumber": "5531922222222", "phoneNumber": "+55 31 92222-2222" }
            ]
        }))
        .unwrap();
        h.service.contact("sales", contact).await.unwrap();

        eventually(|| sent(&h.client).len() == 2).await;
        let messages: Vec<Message> = sent(&h.client).into_iter().map(|(_, m, _)| m).collect();
        assert!(messages.iter().any(|m| m.location_message.is_some()));
        assert!(messages.iter().any(|m| {
            m.contacts_array_message
                .as_ref()
                .is_some_and(|a| a.display_name == "2 contatos")
        }));
    }
}
