//! HTTP surface: message intake, health and readiness probes, capabilities,
//! session lookup, and the metrics scrape endpoint.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{MatchedPath, Path, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::agent::Agent;
use crate::cache::{last_message_key, MemorySessionCache, SessionCache};
use crate::config::AppConfig;
use crate::error::{AttacheError, Result};
use crate::metrics::Metrics;
use crate::storage::{MessageStore, SqlMessageStore};

/// Startup progress flags for the readiness probe. Set-only: a component
/// marked ready stays ready, so /ready never flaps back to 503.
#[derive(Default)]
pub struct Readiness {
    agent: AtomicBool,
    database: AtomicBool,
    cache: AtomicBool,
}

impl Readiness {
    pub fn mark_agent_ready(&self) {
        self.agent.store(true, Ordering::Release);
    }

    pub fn mark_database_ready(&self) {
        self.database.store(true, Ordering::Release);
    }

    pub fn mark_cache_ready(&self) {
        self.cache.store(true, Ordering::Release);
    }

    pub fn agent_ready(&self) -> bool {
        self.agent.load(Ordering::Acquire)
    }

    pub fn database_ready(&self) -> bool {
        self.database.load(Ordering::Acquire)
    }

    pub fn cache_ready(&self) -> bool {
        self.cache.load(Ordering::Acquire)
    }

    pub fn is_ready(&self) -> bool {
        self.agent_ready() && self.database_ready() && self.cache_ready()
    }

    fn pending(&self) -> Vec<&'static str> {
        let mut pending = Vec::new();
        if !self.agent_ready() {
            pending.push("agent");
        }
        if !self.database_ready() {
            pending.push("database");
        }
        if !self.cache_ready() {
            pending.push("cache");
        }
        pending
    }
}

/// Everything a handler needs, passed explicitly through router state.
#[derive(Clone)]
pub struct AppContext {
    pub agent: Arc<Agent>,
    pub store: Option<Arc<dyn MessageStore>>,
    pub cache: Option<Arc<dyn SessionCache>>,
    pub cache_ttl: Duration,
    pub metrics: Metrics,
    pub readiness: Arc<Readiness>,
}

impl AppContext {
    pub async fn from_config(cfg: &AppConfig) -> Result<Self> {
        let readiness = Arc::new(Readiness::default());

        let agent = Arc::new(Agent::from_config(cfg).await?);
        readiness.mark_agent_ready();

        let database_url = cfg
            .storage
            .database_url
            .clone()
            .unwrap_or_else(|| "sqlite::memory:".to_string());
        let store: Option<Arc<dyn MessageStore>> =
            match SqlMessageStore::connect(&database_url).await {
                Ok(store) => {
                    readiness.mark_database_ready();
                    Some(Arc::new(store))
                }
                Err(err) => {
                    warn!(error = %err, "message store unavailable; sessions will not persist");
                    None
                }
            };

        let cache: Arc<dyn SessionCache> = Arc::new(MemorySessionCache::new());
        readiness.mark_cache_ready();

        Ok(Self {
            agent,
            store,
            cache: Some(cache),
            cache_ttl: Duration::from_secs(cfg.cache.ttl_seconds),
            metrics: Metrics::new()?,
            readiness,
        })
    }
}

pub fn build_app(ctx: AppContext) -> Router {
    Router::new()
        .route("/v1/messages", post(post_message))
        .route("/v1/capabilities", get(get_capabilities))
        .route("/v1/sessions/:session_id", get(get_session))
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/metrics", get(scrape_metrics))
        .layer(middleware::from_fn_with_state(ctx.clone(), track_metrics))
        .with_state(ctx)
}

/// Build the full context and serve until the listener fails.
pub async fn serve(cfg: AppConfig) -> Result<()> {
    let addr = format!("{}:{}", cfg.server.host, cfg.server.port);
    let ctx = AppContext::from_config(&cfg).await?;
    let app = build_app(ctx);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "http server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn track_metrics(State(ctx): State<AppContext>, req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let endpoint = req
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_owned())
        .unwrap_or_else(|| req.uri().path().to_owned());

    let response = next.run(req).await;

    ctx.metrics
        .http_requests
        .with_label_values(&[method.as_str(), &endpoint, response.status().as_str()])
        .inc();
    ctx.metrics
        .http_duration
        .with_label_values(&[method.as_str(), &endpoint])
        .observe(start.elapsed().as_secs_f64());
    response
}

#[derive(Debug, Deserialize)]
struct MessageRequest {
    session_id: String,
    message: String,
    /// Per-request override; never mutates shared configuration.
    #[serde(default)]
    temperature: Option<f64>,
}

#[derive(Debug, Serialize)]
struct MessageResponse {
    session_id: String,
    message: String,
    status: &'static str,
    timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    truncated: Option<bool>,
}

async fn post_message(
    State(ctx): State<AppContext>,
    Json(req): Json<MessageRequest>,
) -> Response {
    if let Some(temperature) = req.temperature {
        if !(0.0..=2.0).contains(&temperature) {
            return (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({ "detail": format!("temperature {temperature} outside [0, 2]") })),
            )
                .into_response();
        }
    }

    let session_id = req.session_id;

    match ctx.agent.invoke_with(&req.message, req.temperature).await {
        Ok(reply) => {
            ctx.metrics
                .agent_requests
                .with_label_values(&["success"])
                .inc();

            if let Some(store) = &ctx.store {
                if let Err(err) = store
                    .record_exchange(&session_id, &req.message, &reply.text)
                    .await
                {
                    warn!(error = %err, session = %session_id, "failed to persist exchange");
                }
            }
            if let Some(cache) = &ctx.cache {
                if let Err(err) = cache
                    .set_with_expiry(&last_message_key(&session_id), &req.message, ctx.cache_ttl)
                    .await
                {
                    warn!(error = %err, session = %session_id, "failed to cache last message");
                }
            }

            Json(MessageResponse {
                session_id,
                message: reply.text,
                status: "success",
                timestamp: Utc::now().to_rfc3339(),
                truncated: reply.truncated.then_some(true),
            })
            .into_response()
        }
        Err(err) => {
            ctx.metrics
                .agent_requests
                .with_label_values(&["error"])
                .inc();
            ctx.metrics
                .agent_errors
                .with_label_values(&[err.kind()])
                .inc();
            error_response(err)
        }
    }
}

/// Request-scoped failures surface their message; everything else collapses
/// to an opaque 500 so internals never leak to clients.
fn error_response(err: AttacheError) -> Response {
    let detail = match &err {
        AttacheError::Invocation(msg) => msg.clone(),
        _ => "Internal server error".to_string(),
    };
    warn!(error = %err, "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "detail": detail })),
    )
        .into_response()
}

async fn get_capabilities(State(ctx): State<AppContext>) -> Response {
    Json(ctx.agent.capabilities()).into_response()
}

async fn get_session(
    State(ctx): State<AppContext>,
    Path(session_id): Path<String>,
) -> Response {
    let Some(store) = &ctx.store else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "detail": "Session storage unavailable" })),
        )
            .into_response();
    };

    let summary = match store.session_summary(&session_id).await {
        Ok(Some(summary)) => summary,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({ "detail": "Session not found" })),
            )
                .into_response();
        }
        Err(err) => return error_response(err),
    };

    // The cache holds the freshest value; fall back to the stored row.
    let cached = match &ctx.cache {
        Some(cache) => cache
            .get(&last_message_key(&session_id))
            .await
            .unwrap_or(None),
        None => None,
    };

    Json(json!({
        "session_id": summary.session_id,
        "exchanges": summary.exchanges,
        "last_message": cached.or(summary.last_message),
        "last_activity": summary.last_activity,
    }))
    .into_response()
}

/// Liveness plus per-component readiness flags; always 200.
async fn health(State(ctx): State<AppContext>) -> Response {
    Json(json!({
        "status": "healthy",
        "components": {
            "agent": ctx.readiness.agent_ready(),
            "database": ctx.readiness.database_ready(),
            "cache": ctx.readiness.cache_ready(),
        },
    }))
    .into_response()
}

async fn ready(State(ctx): State<AppContext>) -> Response {
    if ctx.readiness.is_ready() {
        Json(json!({ "status": "ready" })).into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "not ready",
                "pending": ctx.readiness.pending(),
            })),
        )
            .into_response()
    }
}

async fn scrape_metrics(State(ctx): State<AppContext>) -> Response {
    match ctx.metrics.render() {
        Ok(body) => (
            [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(err) => error_response(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readiness_is_monotonic() {
        let readiness = Readiness::default();
        assert!(!readiness.is_ready());
        assert_eq!(readiness.pending(), vec!["agent", "database", "cache"]);

        readiness.mark_agent_ready();
        readiness.mark_database_ready();
        assert!(!readiness.is_ready());

        readiness.mark_cache_ready();
        assert!(readiness.is_ready());
        assert!(readiness.pending().is_empty());
    }

    #[tokio::test]
    async fn invocation_errors_surface_their_message() {
        let response = error_response(AttacheError::Invocation("backend exploded".into()));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["detail"], "backend exploded");
    }

    #[tokio::test]
    async fn other_errors_are_opaque() {
        let response = error_response(AttacheError::Storage("disk gone".into()));
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["detail"], "Internal server error");
    }
}
