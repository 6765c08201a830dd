//! Read-only views of a channel's coordination state.

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use utoipa::ToSchema;

use crate::gateway::active::ActiveMeetingStatus;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/channels/{channel_id}/active-meeting", get(get_active_meeting))
        .route("/channels/{channel_id}/presence", get(get_presence))
}

// ---------------------------------------------------------------------------
// GET /api/v1/channels/:channel_id/active-meeting
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/api/v1/channels/{channel_id}/active-meeting",
    tag = "Channels",
    params(("channel_id" = String, Path, description = "Channel ID")),
    responses(
        (status = 200, description = "Active meeting of the channel", body = ActiveMeetingStatus),
    ),
)]
pub async fn get_active_meeting(
    State(state): State<AppState>,
    Path(channel_id): Path<String>,
) -> Json<ActiveMeetingStatus> {
    Json(state.active_meetings.check(&channel_id))
}

// ---------------------------------------------------------------------------
// GET /api/v1/channels/:channel_id/presence
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PresenceResponse {
    pub channel_id: String,
    pub online_users: Vec<String>,
}

#[utoipa::path(
    get,
    path = "/api/v1/channels/{channel_id}/presence",
    tag = "Channels",
    params(("channel_id" = String, Path, description = "Channel ID")),
    responses(
        (status = 200, description = "Users online in the channel", body = PresenceResponse),
    ),
)]
pub async fn get_presence(
    State(state): State<AppState>,
    Path(channel_id): Path<String>,
) -> Json<PresenceResponse> {
    let online_users = state.presence.online_users(&channel_id);
    Json(PresenceResponse {
        channel_id,
        online_users,
    })
}
