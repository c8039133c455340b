// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! HTTP surface for creating and cancelling turndown schedules.
//!
//! Two endpoints on port 9731: `POST /schedule` creates or replaces the
//! singleton `TurndownSchedule` resource, `POST /cancel` deletes it. Both
//! mutate only the resource; everything else flows through the watch, so an
//! HTTP-created schedule behaves exactly like one applied with `kubectl`.

use crate::constants::{DEFAULT_SCHEDULE_NAME, HTTP_API_BIND_ADDRESS, HTTP_API_PORT};
use crate::crd::{Repeat, TurndownSchedule, TurndownScheduleSpec};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::post,
    Router,
};
use chrono::Utc;
use kube::{
    api::{DeleteParams, ListParams, PostParams},
    Api, Client, ResourceExt,
};
use kube::core::ObjectMeta;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::{error, info, warn};

/// Body of `POST /schedule`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScheduleRequest {
    /// When the scaledown begins (RFC 3339)
    pub start: String,

    /// When the cluster is restored (RFC 3339)
    pub end: String,

    /// Recurrence: `none`, `daily`, or `weekly`
    #[serde(default)]
    pub repeat: Repeat,
}

impl ScheduleRequest {
    /// Build the singleton resource this request describes.
    #[must_use]
    pub fn into_schedule(self) -> TurndownSchedule {
        TurndownSchedule {
            metadata: ObjectMeta {
                name: Some(DEFAULT_SCHEDULE_NAME.to_string()),
                ..Default::default()
            },
            spec: TurndownScheduleSpec {
                start: self.start,
                end: self.end,
                repeat: self.repeat,
            },
            status: None,
        }
    }
}

#[derive(Clone)]
struct ApiState {
    client: Client,
}

/// Build the schedule/cancel router.
#[must_use]
pub fn router(client: Client) -> Router {
    Router::new()
        .route("/schedule", post(handle_schedule))
        .route("/cancel", post(handle_cancel))
        .with_state(ApiState { client })
}

/// Serve the HTTP API on the configured port. Runs until the process exits.
///
/// # Errors
///
/// Returns an error when the listener cannot bind or the server fails.
pub async fn serve(client: Client) -> anyhow::Result<()> {
    let bind_addr = format!("{HTTP_API_BIND_ADDRESS}:{HTTP_API_PORT}");
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Turndown API listening on http://{bind_addr}");
    axum::serve(listener, router(client)).await?;
    Ok(())
}

/// `POST /schedule`: create or replace the singleton schedule.
async fn handle_schedule(
    State(state): State<ApiState>,
    Json(request): Json<ScheduleRequest>,
) -> Response {
    let schedule = request.into_schedule();

    // Reject malformed schedules synchronously; the reconciler would only
    // park them in ScheduleFailed.
    if let Err(e) = schedule.validate_spec(Utc::now()) {
        warn!(error = %e, "Rejecting schedule request");
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": e.to_string() }))).into_response();
    }

    let api: Api<TurndownSchedule> = Api::all(state.client.clone());

    // Replace semantics: drop whatever exists, then create. Deleting a
    // schedule whose cluster is down triggers the finalizer's scaleup first,
    // so creation may need to wait for the old resource to clear.
    if let Err(e) = delete_all_schedules(&api).await {
        error!(error = %e, "Failed to clear existing schedules");
        return backend_error(&e);
    }

    for _ in 0..20 {
        match api.create(&PostParams::default(), &schedule).await {
            Ok(created) => {
                info!(schedule = %created.name_any(), "Schedule created via API");
                return (StatusCode::OK, Json(json!({ "status": "scheduled" }))).into_response();
            }
            Err(kube::Error::Api(api_err)) if api_err.code == 409 => {
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
            Err(e) => {
                error!(error = %e, "Failed to create schedule");
                return backend_error(&e);
            }
        }
    }

    (
        StatusCode::CONFLICT,
        Json(json!({ "error": "previous schedule is still being cancelled; retry shortly" })),
    )
        .into_response()
}

/// `POST /cancel`: delete every schedule. Idempotent.
async fn handle_cancel(State(state): State<ApiState>) -> Response {
    let api: Api<TurndownSchedule> = Api::all(state.client.clone());

    match delete_all_schedules(&api).await {
        Ok(deleted) => {
            info!(deleted, "Schedules cancelled via API");
            (StatusCode::OK, Json(json!({ "status": "cancelled" }))).into_response()
        }
        Err(e) => {
            error!(error = %e, "Failed to cancel schedules");
            backend_error(&e)
        }
    }
}

/// Delete every `TurndownSchedule`, returning how many deletions were issued.
async fn delete_all_schedules(api: &Api<TurndownSchedule>) -> Result<u32, kube::Error> {
    let list = api.list(&ListParams::default()).await?;
    let mut deleted = 0;
    for schedule in &list.items {
        match api
            .delete(&schedule.name_any(), &DeleteParams::default())
            .await
        {
            Ok(_) => deleted += 1,
            Err(kube::Error::Api(api_err)) if api_err.code == 404 => {}
            Err(e) => return Err(e),
        }
    }
    Ok(deleted)
}

fn backend_error(error: &kube::Error) -> Response {
    (
        StatusCode::BAD_GATEWAY,
        Json(json!({ "error": error.to_string() })),
    )
        .into_response()
}

#[cfg(test)]
#[path = "api_tests.rs"]
mod api_tests;
