use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, Method},
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use thinky_shared::constants::{
    BAN_THRESHOLD, MAX_COMMUNITY_MESSAGE_LEN, MAX_DIRECT_MESSAGE_LEN,
    PRESENCE_WINDOW_BROADCAST_SECS, PRESENCE_WINDOW_ONLINE_SECS,
};
use thinky_store::{Database, QuestionView};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::grading::{self, GradeRequest, ScoreBreakdown};
use crate::rate_limit::{rate_limit_middleware, RateLimiter};

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub config: Arc<ServerConfig>,
    pub rate_limiter: RateLimiter,
    pub started_at: Instant,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/api/config", get(public_config))
        .route("/api/reviewers/{id}/questions", get(reviewer_questions))
        .route("/api/grade", post(grade_quiz))
        .route("/admin/broadcast", post(admin_broadcast))
        .route("/admin/status", get(admin_status))
        .layer(middleware::from_fn_with_state(
            state.rate_limiter.clone(),
            rate_limit_middleware,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Runtime settings the client shim reads at startup.
#[derive(Serialize)]
struct PublicConfigResponse {
    instance_name: String,
    version: &'static str,
    ban_threshold: u32,
    max_community_message_len: usize,
    max_direct_message_len: usize,
}

#[derive(Deserialize)]
struct BroadcastRequest {
    message: String,
}

#[derive(Serialize)]
struct BroadcastResponse {
    delivered: u32,
}

#[derive(Serialize)]
struct AdminStatusResponse {
    instance_name: String,
    version: &'static str,
    online_devices: u32,
    community_messages: u64,
    uptime_secs: u64,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn public_config(State(state): State<AppState>) -> Json<PublicConfigResponse> {
    Json(PublicConfigResponse {
        instance_name: state.config.instance_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
        ban_threshold: BAN_THRESHOLD,
        max_community_message_len: MAX_COMMUNITY_MESSAGE_LEN,
        max_direct_message_len: MAX_DIRECT_MESSAGE_LEN,
    })
}

/// The sanitized question list: options normalized, no answer field.
async fn reviewer_questions(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<QuestionView>>, ServerError> {
    let views = state.db.question_views(&id)?;
    if views.is_empty() {
        return Err(ServerError::ReviewerNotFound(id));
    }
    Ok(Json(views))
}

async fn grade_quiz(
    State(state): State<AppState>,
    Json(req): Json<GradeRequest>,
) -> Result<Json<ScoreBreakdown>, ServerError> {
    let questions = state.db.questions_for_reviewer(&req.reviewer_id)?;
    if questions.is_empty() {
        return Err(ServerError::ReviewerNotFound(req.reviewer_id));
    }

    let breakdown = grading::grade(&questions, &req.answers);
    info!(
        reviewer = %req.reviewer_id,
        earned = breakdown.earned_points,
        total = breakdown.total_points,
        "Quiz graded"
    );
    Ok(Json(breakdown))
}

async fn admin_broadcast(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(req): Json<BroadcastRequest>,
) -> Result<Json<BroadcastResponse>, ServerError> {
    verify_admin_token(&headers, &state.config)?;

    let message = req.message.trim();
    if message.is_empty() {
        return Err(ServerError::BadRequest("Broadcast message is empty".into()));
    }

    let delivered = state
        .db
        .admin_broadcast(message, PRESENCE_WINDOW_BROADCAST_SECS)?;
    info!(delivered, "Admin broadcast sent");
    Ok(Json(BroadcastResponse { delivered }))
}

async fn admin_status(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<AdminStatusResponse>, ServerError> {
    verify_admin_token(&headers, &state.config)?;

    Ok(Json(AdminStatusResponse {
        instance_name: state.config.instance_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
        online_devices: state.db.online_count(PRESENCE_WINDOW_ONLINE_SECS)?,
        community_messages: state.db.community_message_count()?,
        uptime_secs: state.started_at.elapsed().as_secs(),
    }))
}

fn verify_admin_token(headers: &HeaderMap, config: &ServerConfig) -> Result<(), ServerError> {
    let Some(ref expected) = config.admin_token else {
        return Err(ServerError::Forbidden(
            "Admin API is disabled (no ADMIN_TOKEN configured)".into(),
        ));
    };

    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let token = auth.strip_prefix("Bearer ").unwrap_or(auth);

    // Constant-time comparison to prevent timing attacks on admin token.
    use subtle::ConstantTimeEq;
    let token_bytes = token.as_bytes();
    let expected_bytes = expected.as_bytes();
    if token_bytes.len() != expected_bytes.len()
        || token_bytes.ct_eq(expected_bytes).unwrap_u8() != 1
    {
        return Err(ServerError::Forbidden("Invalid admin token".into()));
    }

    Ok(())
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}
