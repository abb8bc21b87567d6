use crate::bot::ChatTransport;
use crate::gate::{AuthGate, ResponseChannel};
use crate::web::pages;
use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode, Uri},
    response::{Html, IntoResponse, Json},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

const ENDPOINTS: &[&str] = &["/auth/{nonce}", "/health", "/"];

/// Shared state of the HTTP surface
#[derive(Clone)]
pub struct AppState {
    pub gate: Arc<AuthGate>,
    pub chat: Arc<dyn ChatTransport>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(gate: Arc<AuthGate>, chat: Arc<dyn ChatTransport>) -> Self {
        Self {
            gate,
            chat,
            started_at: Instant::now(),
        }
    }
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: String,
    /// Seconds since the server started
    pub uptime: f64,
    pub endpoints: &'static [&'static str],
}

/// Health check endpoint
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        uptime: state.started_at.elapsed().as_secs_f64(),
        endpoints: ENDPOINTS,
    })
}

/// Query string of the forum's redirect
#[derive(Debug, Deserialize)]
pub struct AuthQuery {
    #[serde(default)]
    pub payload: Option<String>,
}

/// Redirect target of the User API key flow.
///
/// Any path suffix after `/auth` is ignored; the nonce is taken from the
/// decrypted payload.
pub async fn auth_callback(
    State(state): State<AppState>,
    Query(query): Query<AuthQuery>,
    headers: HeaderMap,
) -> (StatusCode, Html<String>) {
    let payload = query.payload.filter(|p| !p.trim().is_empty());
    info!(
        has_payload = payload.is_some(),
        user_agent = header_str(&headers, header::USER_AGENT.as_str()),
        forwarded_for = header_str(&headers, "x-forwarded-for"),
        "Forum auth callback received"
    );

    let Some(payload) = payload else {
        return (
            StatusCode::BAD_REQUEST,
            Html(pages::render_failure("No authentication payload was received.")),
        );
    };

    let decision = match state.gate.resolve(&payload, ResponseChannel::Redirect).await {
        Ok(decision) => decision,
        Err(e) => {
            warn!("Redirect resolution failed: {}", e);
            return (
                e.status_code(),
                Html(pages::render_failure(&e.user_message())),
            );
        }
    };

    if let Err(e) = state
        .chat
        .approve_join_request(decision.group_id, decision.user_id)
        .await
    {
        error!(
            "Verified user {} but approving the join request failed: {}",
            decision.user_id, e
        );
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Html(pages::render_failure(
                "Your forum account was verified, but the join request could not be approved. Please ask a group admin.",
            )),
        );
    }

    // Let the requester know in the chat the link was sent to
    if let Err(e) = state
        .chat
        .send_message(
            decision.chat_channel_id,
            "✅ Verified! Your join request has been approved.",
            None,
        )
        .await
    {
        warn!("Failed to notify chat {}: {}", decision.chat_channel_id, e);
    }

    (
        StatusCode::OK,
        Html(pages::render_success(&decision, &payload)),
    )
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
}

/// Service index page
pub async fn index() -> Html<String> {
    Html(pages::render_index())
}

pub async fn not_found(uri: Uri) -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Html(pages::render_not_found(uri.path())))
}

/// Create the web router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/auth", get(auth_callback))
        .route("/auth/{*rest}", get(auth_callback))
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
