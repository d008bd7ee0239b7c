mod signature;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::body::{Body, Bytes};
use axum::extract::{Json, State};
use axum::http::{header, HeaderMap, HeaderValue, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use relay_clients::{
    build_http_client, AssistantSettings, HttpRecordStore, LineMessagingClient, OpenAiChatClient,
};
use relay_core::{DialogueScript, RelayConfig, WebhookPayload};
use relay_dispatcher::{Collaborators, DispatchSettings, Dispatcher};
use relay_observability::{AppMetrics, MetricsSnapshot};
use relay_storage::{SessionSettings, SessionStore, Store};
use serde::Serialize;
use tokio::task::JoinHandle;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub use signature::{compute_signature, verify_line_signature, SIGNATURE_HEADER};

pub const SESSION_PURGE_INTERVAL: Duration = Duration::from_secs(60);

const MAX_WEBHOOK_BODY_BYTES: usize = 256 * 1024;
const LIVENESS_TEXT: &str = "care relay webhook is running";

#[derive(Clone)]
pub struct ApiState {
    pub dispatcher: Arc<Dispatcher<Store>>,
    pub metrics: Arc<AppMetrics>,
    channel_secret: Arc<str>,
}

impl ApiState {
    pub fn new(dispatcher: Dispatcher<Store>, channel_secret: impl Into<Arc<str>>) -> Self {
        Self {
            metrics: dispatcher.metrics(),
            dispatcher: Arc::new(dispatcher),
            channel_secret: channel_secret.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp_utc: String,
    session_backend: &'static str,
    metrics: MetricsSnapshot,
}

#[derive(Debug, Serialize)]
struct WebhookAck {
    status: &'static str,
}

pub async fn build_state(config: &RelayConfig) -> Result<ApiState> {
    let metrics = AppMetrics::shared();

    let script = match config.scripts_path.as_ref() {
        Some(path) => DialogueScript::load(path)
            .with_context(|| format!("failed to load dialogue script {}", path.display()))?,
        None => DialogueScript::builtin(),
    };

    let store = match config.database_url.as_deref() {
        Some(database_url) => Store::sqlite(database_url).await?,
        None => Store::memory(),
    };
    let sessions = SessionStore::new(
        Arc::new(store),
        SessionSettings {
            idle_timeout: config.session_idle,
            history_limit: config.history_limit,
            ..SessionSettings::default()
        },
    );

    let http = build_http_client(config.upstream_timeout).context("failed to build HTTP client")?;
    let collaborators = Collaborators {
        gateway: Arc::new(LineMessagingClient::new(
            http.clone(),
            config.line_access_token.as_str(),
        )),
        assistant: Arc::new(OpenAiChatClient::new(
            http.clone(),
            config.openai_api_key.as_str(),
            AssistantSettings {
                model: config.openai_model.clone(),
                reply_language: config.reply_language.clone(),
                max_tokens: config.max_tokens,
            },
        )),
        records: Arc::new(HttpRecordStore::new(http, config.record_store_url.clone())),
    };

    let dispatcher = Dispatcher::new(
        Arc::new(script),
        sessions,
        collaborators,
        metrics,
        DispatchSettings {
            upstream_timeout: config.upstream_timeout,
            admin_user_id: config.admin_user_id.clone(),
            log_conversations: true,
        },
    );

    info!(
        session_backend = dispatcher.sessions().repository().backend_name(),
        topics = dispatcher.script().topics.len(),
        admin_alerts = config.admin_user_id.is_some(),
        "dispatcher ready"
    );

    Ok(ApiState::new(dispatcher, config.line_channel_secret.as_str()))
}

pub async fn build_app(config: &RelayConfig) -> Result<Router> {
    Ok(build_router(build_state(config).await?))
}

pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/", get(liveness))
        .route("/health", get(health))
        .route("/webhook", get(liveness).post(webhook))
        .layer(middleware::from_fn(security_headers_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(RequestBodyLimitLayer::new(MAX_WEBHOOK_BODY_BYTES))
        .with_state(state)
}

pub fn spawn_session_purge(dispatcher: Arc<Dispatcher<Store>>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match dispatcher.sessions().purge_expired().await {
                Ok(0) => {}
                Ok(purged) => info!(purged, "expired sessions purged"),
                Err(err) => warn!(error = %err, "session purge failed"),
            }
        }
    })
}

async fn liveness() -> &'static str {
    LIVENESS_TEXT
}

async fn health(State(state): State<ApiState>) -> impl IntoResponse {
    let payload = HealthResponse {
        status: "ok",
        timestamp_utc: chrono::Utc::now().to_rfc3339(),
        session_backend: state.dispatcher.sessions().repository().backend_name(),
        metrics: state.metrics.snapshot(),
    };
    (StatusCode::OK, Json(payload))
}

async fn webhook(State(state): State<ApiState>, headers: HeaderMap, body: Bytes) -> Response {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if !verify_line_signature(&state.channel_secret, &body, signature) {
        warn!("webhook signature rejected");
        return StatusCode::UNAUTHORIZED.into_response();
    }

    match serde_json::from_slice::<WebhookPayload>(&body) {
        Ok(payload) => {
            state.dispatcher.dispatch_payload(payload).await;
        }
        Err(err) => warn!(error = %err, bytes = body.len(), "webhook body not understood"),
    }

    (StatusCode::OK, Json(WebhookAck { status: "success" })).into_response()
}

async fn security_headers_middleware(request: Request<Body>, next: Next) -> Response {
    let mut response = next.run(request).await;
    response.headers_mut().insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    response.headers_mut().insert(
        header::HeaderName::from_static("x-frame-options"),
        HeaderValue::from_static("DENY"),
    );
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-store"),
    );
    response
}
