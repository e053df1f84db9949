use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Response,
    Extension,
};
use uuid::Uuid;

use crate::{
    error::Result,
    handlers::bookings::json_response,
    models::session::Session,
    services::reviews,
    state::AppState,
};

#[axum::debug_handler]
pub async fn review_eligibility(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(venue_id): Path<Uuid>,
) -> Result<Response> {
    let can_review =
        reviews::can_review(state.bookings.repository(), session.user_id, venue_id).await?;

    json_response(
        StatusCode::OK,
        &sonic_rs::json!({
            "venue_id": venue_id.to_string(),
            "can_review": can_review
        }),
    )
}
