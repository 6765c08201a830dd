pub mod channels;
pub mod health;

use axum::Router;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(crate::gateway::server::router())
        .nest("/api/v1", channels::router())
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
}

#[derive(OpenApi)]
#[openapi(
    paths(
        // Health
        health::health,
        // Channels
        channels::get_active_meeting,
        channels::get_presence,
    ),
    components(
        schemas(
            // Error types
            crate::error::ApiErrorBody,
            crate::error::ApiErrorDetail,
            crate::error::FieldError,
            // Models
            crate::models::user::User,
            crate::models::attachment::Attachment,
            crate::models::attachment::MeetingStatus,
            crate::models::message::Message,
            crate::models::message::MessageView,
            crate::gateway::active::ActiveMeetingStatus,
            // Route response types
            health::HealthResponse,
            channels::PresenceResponse,
        )
    ),
    tags(
        (name = "Health", description = "Health check"),
        (name = "Channels", description = "Channel presence and meetings"),
    )
)]
pub struct ApiDoc;
