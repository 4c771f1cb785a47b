use crate::{
    auth::guest::{SESSION_ID_HEADER, SESSION_SECRET_HEADER},
    errors::ServiceError,
    services::identity::IssuedSession,
};
use axum::{
    http::{HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use validator::Validate;

/// Standard success response
pub fn success_response<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(data)).into_response()
}

/// Standard created response
pub fn created_response<T: Serialize>(data: T) -> Response {
    (StatusCode::CREATED, Json(data)).into_response()
}

/// Standard no content response
pub fn no_content_response() -> Response {
    StatusCode::NO_CONTENT.into_response()
}

/// Validate request input
pub fn validate_input<T: Validate>(input: &T) -> Result<(), ServiceError> {
    input.validate().map_err(ServiceError::from)
}

/// Attaches the guest credential pair to a response. Only called when a
/// session was minted by this request; a reused session is never re-echoed.
pub fn with_session_headers(mut response: Response, issued: Option<&IssuedSession>) -> Response {
    if let Some(issued) = issued {
        let headers = response.headers_mut();
        if let Ok(value) = HeaderValue::from_str(&issued.session_id.to_string()) {
            headers.insert(HeaderName::from_static(SESSION_ID_HEADER), value);
        }
        if let Ok(value) = HeaderValue::from_str(&issued.secret) {
            headers.insert(HeaderName::from_static(SESSION_SECRET_HEADER), value);
        }
    }
    response
}
