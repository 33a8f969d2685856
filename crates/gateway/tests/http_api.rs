//! End-to-end tests of the `/api/v3` surface over in-process fakes.
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{net::SocketAddr, sync::Arc, time::Duration};

use {
    chatgate_broker::{EventPublisher, InMemoryBroker},
    chatgate_gateway::{AppState, build_app},
    chatgate_instances::{InstanceContext, InstanceRegistry, InstanceService, ServiceSettings},
    chatgate_protocol::{
        MediaKind,
        testing::{Call, FakeClient, FakeFactory},
    },
    chatgate_send::{SendService, SendSettings},
    chatgate_store::{InMemoryInstanceStore, InstanceRecord, InstanceStore},
    reqwest::{StatusCode, multipart},
    secrecy::Secret,
    serde_json::{Value, json},
    tokio::net::TcpListener,
};

const GLOBAL: &str = "global-secret";
const SALES_KEY: &str = "SALES-KEY";
const NUMBER: &str = "553111111111";

struct Server {
    base: String,
    http: reqwest::Client,
    client: Arc<FakeClient>,
}

impl Server {
    fn url(&self, path: &str) -> String {
        format!("{}/api/v3{path}", self.base)
    }
}

/// A gateway with one logged-in instance named `sales`.
async fn start_server() -> Server {
    let store = Arc::new(InMemoryInstanceStore::new());
    let broker = Arc::new(InMemoryBroker::new());
    let factory = Arc::new(FakeFactory::new().with_stored_device(NUMBER));

    let record = InstanceRecord::new("sales")
        .with_number(NUMBER)
        .with_access_key(SALES_KEY);
    store.create(&record).await.unwrap();
    let client = factory.prepare(&record.id, FakeClient::paired(NUMBER));

    let ctx = InstanceContext::new(store, EventPublisher::new(broker), factory);
    let registry = Arc::new(InstanceRegistry::new(ctx));
    assert_eq!(registry.bootstrap().await.unwrap(), 1);

    let instances = Arc::new(InstanceService::new(Arc::clone(&registry), ServiceSettings {
        qr_wait: Duration::from_millis(50),
        ..ServiceSettings::default()
    }));
    let send = Arc::new(SendService::new(registry, SendSettings::default()).unwrap());
    let state = AppState::new(instances, send).with_global_token(Some(Secret::new(GLOBAL.into())));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    let app = build_app(state);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Server {
        base: format!("http://{addr}"),
        http: reqwest::Client::new(),
        client,
    }
}

#[tokio::test]
async fn admin_routes_require_the_global_token() {
    let server = start_server().await;

    let resp = server.http.get(server.url("/instance")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = server
        .http
        .get(server.url("/instance"))
        .header("apikey", SALES_KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["statusCode"], 401);
    assert_eq!(body["error"], "Unauthorized");
}

#[tokio::test]
async fn create_returns_the_access_key_once() {
    let server = start_server().await;

    let resp = server
        .http
        .post(server.url("/instance"))
        .header("apikey", GLOBAL)
        .json(&json!({ "name": "support" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let created: Value = resp.json().await.unwrap();
    assert_eq!(created["name"], "support");
    let key = created["apikey"].as_str().unwrap().to_string();
    assert!(!key.is_empty());

    let resp = server
        .http
        .get(server.url("/instance/support"))
        .header("apikey", &key)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let found: Value = resp.json().await.unwrap();
    assert_eq!(found["instanceId"], created["instanceId"]);
    assert!(found.get("apikey").is_none());
}

#[tokio::test]
async fn duplicate_names_conflict() {
    let server = start_server().await;

    let resp = server
        .http
        .post(server.url("/instance"))
        .header("apikey", GLOBAL)
        .json(&json!({ "instanceName": "SALES" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["message"][0], "Unable to create instance");
}

#[tokio::test]
async fn instance_keys_only_open_their_own_instance() {
    let server = start_server().await;

    let resp = server
        .http
        .get(server.url("/instance/sales"))
        .header("apikey", "wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = server
        .http
        .get(server.url("/instance/ghost"))
        .header("apikey", SALES_KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["message"][0], "Invalid instance: ghost");

    let resp = server
        .http
        .get(server.url("/instance/ghost"))
        .header("apikey", GLOBAL)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn ping_and_unknown_routes() {
    let server = start_server().await;

    let resp = server
        .http
        .request(reqwest::Method::OPTIONS, server.url("/ping"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.text().await.unwrap(), "pong");

    let resp = server
        .http
        .get(format!("{}/nowhere", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["message"][0], "Cannot GET /nowhere");
}

#[tokio::test]
async fn preflight_still_gets_cors_headers() {
    let server = start_server().await;

    let resp = server
        .http
        .request(reqwest::Method::OPTIONS, server.url("/instance"))
        .header("origin", "https://crm.example.com")
        .header("access-control-request-method", "POST")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers()
            .get("access-control-allow-origin")
            .and_then(|v| v.to_str().ok()),
        Some("*")
    );
}

#[tokio::test]
async fn text_send_is_accepted_for_logged_in_instance() {
    let server = start_server().await;

    let resp = server
        .http
        .post(server.url("/instance/sales/send/text"))
        .header("apikey", SALES_KEY)
        .json(&json!({
            "recipient": "5531987654321",
            "textMessage": { "text": "hello" },
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body: Value = resp.json().await.unwrap();
    assert!(!body["messageId"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn malformed_send_body_is_a_bad_request() {
    let server = start_server().await;

    let resp = server
        .http
        .post(server.url("/instance/sales/send/text"))
        .header("apikey", SALES_KEY)
        .json(&json!({ "recipient": "5531987654321" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn sends_need_a_logged_in_session() {
    let server = start_server().await;

    let resp = server
        .http
        .post(server.url("/instance"))
        .header("apikey", GLOBAL)
        .json(&json!({ "name": "idle", "apikey": "IDLE-KEY" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);

    let resp = server
        .http
        .post(server.url("/instance/idle/send/text"))
        .header("apikey", "IDLE-KEY")
        .json(&json!({
            "recipient": "5531987654321",
            "textMessage": { "text": "hello" },
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["message"][0], "Instance idle not connected.");
}

#[tokio::test]
async fn edit_requires_message_id_query() {
    let server = start_server().await;

    let resp = server
        .http
        .patch(server.url("/instance/sales/send/edit"))
        .header("apikey", SALES_KEY)
        .json(&json!({
            "recipient": "5531987654321",
            "editMessage": { "text": "fixed" },
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["message"][0], "Query 'messageId' empty or not defined.");
}

#[tokio::test]
async fn audio_upload_goes_through_multipart() {
    let server = start_server().await;

    let form = multipart::Form::new()
        .text("recipient", "5531987654321")
        .part(
            "attachment",
            multipart::Part::bytes(vec![1u8; 64])
                .file_name("note.ogg")
                .mime_str("audio/ogg")
                .unwrap(),
        );
    let resp = server
        .http
        .post(server.url("/instance/sales/send/audio-file"))
        .header("apikey", SALES_KEY)
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);

    let uploads: Vec<_> = server
        .client
        .calls()
        .into_iter()
        .filter(|c| matches!(c, Call::Upload { len: 64, kind: MediaKind::Audio }))
        .collect();
    assert_eq!(uploads.len(), 1);
}

#[tokio::test]
async fn upload_without_attachment_is_rejected() {
    let server = start_server().await;

    let form = multipart::Form::new().text("recipient", "5531987654321");
    let resp = server
        .http
        .post(server.url("/instance/sales/send/media-file"))
        .header("apikey", SALES_KEY)
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}
