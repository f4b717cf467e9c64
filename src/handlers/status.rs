//! Status endpoint handler.
//!
//! Serves the latest published poll snapshot as JSON.

use axum::{extract::State, response::IntoResponse, Json};
use tracing::{debug, instrument};

use crate::state::SharedState;

/// Handler for the /status endpoint.
#[instrument(skip(state))]
pub async fn status_handler(State(state): State<SharedState>) -> impl IntoResponse {
    let snapshot = state.poller.snapshot();
    debug!(
        "Serving snapshot of cycle {} ({} services)",
        snapshot.cycle,
        snapshot.services.len()
    );
    Json(snapshot)
}
