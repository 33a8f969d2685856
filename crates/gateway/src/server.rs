use std::{future::IntoFuture, net::SocketAddr, sync::Arc, time::Duration};

use {
    anyhow::Context,
    axum::{
        Router,
        extract::DefaultBodyLimit,
        http::{Method, Uri},
        middleware::from_fn_with_state,
        routing::{get, options, patch, post},
    },
    chatgate_broker::{Broker, EventPublisher, InMemoryBroker, events},
    chatgate_config::GatewayConfig,
    chatgate_instances::{
        InstanceContext, InstanceRegistry, InstanceService, ServiceSettings,
    },
    chatgate_send::{SendService, SendSettings},
    chatgate_store::{InstanceRecord, SqliteInstanceStore},
    chatgate_whatsapp::{
        SidecarClientFactory, SidecarConfig, SidecarProcess, connect_with_retry,
        find_sidecar_dir, start_sidecar,
    },
    serde_json::json,
    tokio::{sync::watch, task::JoinError},
    tower_http::{
        cors::{Any, CorsLayer},
        trace::TraceLayer,
    },
    tracing::{error, info, warn},
};

use crate::{
    auth_middleware::{require_global_token, require_instance_key, require_logged_in},
    error::ApiError,
    instance_routes, send_routes,
    state::AppState,
};

/// Every route lives under this prefix.
pub const API_PREFIX: &str = "/api/v3";

/// Build the gateway router (shared between production startup and tests).
pub fn build_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let admin = Router::new()
        .route(
            "/instance",
            post(instance_routes::create).get(instance_routes::find_all),
        )
        .route_layer(from_fn_with_state(state.clone(), require_global_token));

    let send = Router::new()
        .route("/instance/{instance}/send/text", post(send_routes::text))
        .route(
            "/instance/{instance}/send/link-preview",
            post(send_routes::link),
        )
        .route("/instance/{instance}/send/media", post(send_routes::media))
        .route("/instance/{instance}/send/audio", post(send_routes::audio))
        .route("/instance/{instance}/send/ptv", post(send_routes::ptv))
        .route(
            "/instance/{instance}/send/media-file",
            post(send_routes::media_file),
        )
        .route(
            "/instance/{instance}/send/audio-file",
            post(send_routes::audio_file),
        )
        .route(
            "/instance/{instance}/send/ptv-file",
            post(send_routes::ptv_file),
        )
        .route(
            "/instance/{instance}/send/location",
            post(send_routes::location),
        )
        .route(
            "/instance/{instance}/send/contact",
            post(send_routes::contact),
        )
        .route("/instance/{instance}/send/list", post(send_routes::list))
        .route("/instance/{instance}/send/poll", post(send_routes::poll))
        .route(
            "/instance/{instance}/send/reaction",
            patch(send_routes::reaction),
        )
        .route("/instance/{instance}/send/edit", patch(send_routes::edit))
        .layer(DefaultBodyLimit::max(send_routes::MAX_UPLOAD_SIZE))
        .route_layer(from_fn_with_state(state.clone(), require_logged_in));

    let instance = Router::new()
        .route(
            "/instance/{instance}",
            get(instance_routes::find).delete(instance_routes::delete),
        )
        .route(
            "/instance/{instance}/whatsapp/connect",
            get(instance_routes::connect),
        )
        .route(
            "/instance/{instance}/whatsapp/logout",
            patch(instance_routes::logout),
        )
        .route(
            "/instance/{instance}/whatsapp/group-name",
            patch(instance_routes::group_name),
        )
        .route(
            "/instance/{instance}/whatsapp/number",
            patch(instance_routes::number),
        )
        .route(
            "/instance/{instance}/chat/on-whatsapp",
            post(instance_routes::on_whatsapp),
        )
        .merge(send)
        .route_layer(from_fn_with_state(state.clone(), require_instance_key));

    let api = Router::new().merge(admin).merge(instance);
    let cors_routes = Router::new()
        .nest(API_PREFIX, api)
        .fallback(not_found)
        .layer(cors);

    // The CORS layer answers every OPTIONS request as a preflight, so the
    // health check sits outside it.
    Router::new()
        .route(&format!("{API_PREFIX}/ping"), options(ping))
        .merge(cors_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn ping() -> &'static str {
    "pong"
}

async fn not_found(method: Method, uri: Uri) -> ApiError {
    ApiError::not_found(format!("Cannot {method} {}", uri.path()))
}

/// Open the store, the broker and the sidecar link, resume persisted
/// sessions and serve HTTP until SIGINT/SIGTERM.
pub async fn start_gateway(config: GatewayConfig) -> anyhow::Result<()> {
    std::fs::create_dir_all(&config.store.path).with_context(|| {
        format!(
            "failed to create store directory {}",
            config.store.path.display()
        )
    })?;
    let db_pool = sqlx::SqlitePool::connect(&config.store.database_url())
        .await
        .context("failed to open the instance database")?;
    chatgate_store::run_migrations(&db_pool)
        .await
        .context("failed to run store migrations")?;
    let store = Arc::new(SqliteInstanceStore::new(db_pool));

    let broker = open_broker(&config).await?;
    let publisher = EventPublisher::new(broker)
        .with_global_webhook(config.webhook.global_url.clone())
        .with_license_key(config.webhook.license_key.clone());
    if !publisher.declare_topology(events::ALL).await {
        warn!("broker topology declaration failed, events may be dropped");
    }

    let mut sidecar = spawn_sidecar(&config).await?;

    let request_timeout = Duration::from_secs(config.bridge.request_timeout_secs);
    let handle = match connect_with_retry(
        &config.bridge.url,
        config.bridge.connect_retries,
        request_timeout,
    )
    .await
    {
        Ok(handle) => handle,
        Err(e) => {
            stop_sidecar(&mut sidecar).await;
            return Err(e).context("failed to reach the protocol sidecar");
        },
    };
    let factory = Arc::new(
        SidecarClientFactory::new(handle).with_client_name(config.bridge.client_name.clone()),
    );

    let ctx = InstanceContext::new(store, publisher.clone(), factory);
    let registry = Arc::new(InstanceRegistry::new(ctx));
    let resumed = registry.bootstrap().await?;
    info!(resumed, "instance sessions resumed");

    let instances = Arc::new(InstanceService::new(Arc::clone(&registry), ServiceSettings {
        reserved_name: config.instances.reserved_name.clone(),
        qr_wait: Duration::from_millis(config.instances.qr_wait_ms),
        container_name: Some(config.server.container_name.clone()),
    }));
    let send = Arc::new(SendService::new(registry, SendSettings {
        fetch_timeout: Duration::from_secs(config.fetch.timeout_secs),
        max_fetch_bytes: config.fetch.max_bytes,
        max_redirects: config.fetch.max_redirects,
        allow_private_hosts: config.fetch.allow_private_hosts,
    })?);

    if config.auth.global_token.is_none() {
        warn!("no global token configured, admin routes are open");
    }
    let state = AppState::new(instances, send).with_global_token(config.auth.global_token.clone());
    let app = build_app(state);

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port)
        .parse()
        .with_context(|| format!("invalid bind address {}", config.server.bind))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, prefix = API_PREFIX, "gateway listening");

    let identity = InstanceRecord::new(config.server.container_name.clone())
        .with_container_name(config.server.container_name.clone())
        .redacted();
    publisher
        .publish(events::APP_STATUS, &identity, json!({ "status": "on" }))
        .await;

    let (stop_tx, mut stop_rx) = watch::channel(false);
    let mut server = tokio::spawn(
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = stop_rx.changed().await;
            })
            .into_future(),
    );

    let outcome = tokio::select! {
        joined = &mut server => served(joined),
        () = shutdown_signal() => {
            info!("shutdown requested, draining requests");
            let _ = stop_tx.send(true);
            let grace = Duration::from_secs(config.server.shutdown_timeout_secs);
            match tokio::time::timeout(grace, &mut server).await {
                Ok(joined) => served(joined),
                Err(_) => {
                    warn!(grace_secs = grace.as_secs(), "in-flight requests did not finish in time");
                    server.abort();
                    Ok(())
                },
            }
        },
    };

    publisher
        .publish(events::APP_STATUS, &identity, json!({ "status": "off" }))
        .await;
    stop_sidecar(&mut sidecar).await;
    info!("gateway stopped");
    outcome
}

fn served(joined: Result<std::io::Result<()>, JoinError>) -> anyhow::Result<()> {
    Ok(joined??)
}

async fn open_broker(config: &GatewayConfig) -> anyhow::Result<Arc<dyn Broker>> {
    let Some(url) = config.broker.connection_url() else {
        warn!("no broker url configured, events stay in process");
        return Ok(Arc::new(InMemoryBroker::new()));
    };
    #[cfg(feature = "amqp")]
    {
        let broker = chatgate_broker::AmqpBroker::connect(
            &url,
            config.broker.exchange.clone(),
            &config.broker.queues,
        )
        .await
        .context("failed to connect to the AMQP broker")?;
        info!(exchange = %config.broker.exchange, "connected to AMQP broker");
        Ok(Arc::new(broker))
    }
    #[cfg(not(feature = "amqp"))]
    {
        warn!(%url, "built without AMQP support, events stay in process");
        Ok(Arc::new(InMemoryBroker::new()))
    }
}

async fn spawn_sidecar(config: &GatewayConfig) -> anyhow::Result<Option<SidecarProcess>> {
    if !config.bridge.auto_start {
        return Ok(None);
    }
    let sidecar_dir = find_sidecar_dir(config.bridge.sidecar_dir.as_deref())?;
    let mut sidecar_config = SidecarConfig {
        sidecar_dir,
        auth_dir: config.bridge.auth_dir.clone(),
        ..SidecarConfig::default()
    };
    if let Some(port) = config.bridge.port() {
        sidecar_config.port = port;
    }
    let process = start_sidecar(sidecar_config).await?;
    info!(port = process.port(), "protocol sidecar started");
    Ok(Some(process))
}

async fn stop_sidecar(sidecar: &mut Option<SidecarProcess>) {
    if let Some(process) = sidecar.as_mut()
        && let Err(e) = process.stop().await
    {
        error!(error = %e, "failed to stop protocol sidecar");
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            },
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, axum::http::StatusCode};

    #[tokio::test]
    async fn unknown_route_names_method_and_path() {
        let err = not_found(Method::DELETE, Uri::from_static("/api/v3/nowhere")).await;
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert_eq!(err.message, vec!["Cannot DELETE /api/v3/nowhere".to_string()]);
    }
}
