use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use formrelay_core::Problem;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::events::EntryCreated;
use crate::listener::{QueueError, RelayQueue};

pub const INTAKE_TOKEN_HEADER: &str = "X-Intake-Token";

pub struct IntakeState {
    pub queue: RelayQueue,
    /// When set, `POST /entries` requires a matching `X-Intake-Token`
    pub intake_token: Option<String>,
}

impl IntakeState {
    pub fn new(queue: RelayQueue, intake_token: Option<String>) -> Self {
        Self {
            queue,
            intake_token: intake_token.filter(|t| !t.is_empty()),
        }
    }
}

async fn receive_entry(
    State(state): State<Arc<IntakeState>>,
    headers: HeaderMap,
    Json(event): Json<EntryCreated>,
) -> Result<impl IntoResponse, Problem> {
    if let Some(expected) = &state.intake_token {
        let provided = headers
            .get(INTAKE_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok());
        if provided != Some(expected.as_str()) {
            warn!("Rejected entry {}: bad intake token", event.entry_id);
            return Err(Problem::new(StatusCode::UNAUTHORIZED, "Unauthorized")
                .with_detail("Missing or invalid intake token"));
        }
    }

    let entry_id = event.entry_id;
    state.queue.enqueue(event).map_err(|e| {
        warn!("Could not queue entry {}: {}", entry_id, e);
        let detail = match e {
            QueueError::Full => "Relay queue is full, retry later",
            QueueError::Closed => "Relay worker is shutting down",
        };
        Problem::new(StatusCode::SERVICE_UNAVAILABLE, "Relay Unavailable")
            .with_detail(detail)
            .with_value("entry_id", entry_id)
    })?;

    debug!("Queued entry {}", entry_id);
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({"status": "queued", "entry_id": entry_id})),
    ))
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

pub fn configure_routes() -> Router<Arc<IntakeState>> {
    Router::new()
        .route("/entries", post(receive_entry))
        .route("/health", get(health))
}
