//! Plain-text error responses. Every user-input error in this transport is
//! reported as a bare status code and message body -- there is no JSON
//! envelope, since the client-side library matches on status and literal
//! text, not a structured error shape.

use axum::http::StatusCode;
use axum::response::Response;

use crate::middleware::status_text;

pub type HttpResponse = Response;
pub type HttpResult<T = ()> = Result<T, HttpResponse>;

pub fn bad_request(message: impl Into<String>) -> HttpResponse {
    status_text(StatusCode::BAD_REQUEST, message.into())
}

pub fn not_found(message: impl Into<String>) -> HttpResponse {
    status_text(StatusCode::NOT_FOUND, message.into())
}

pub fn method_not_allowed(message: impl Into<String>) -> HttpResponse {
    status_text(StatusCode::METHOD_NOT_ALLOWED, message.into())
}

pub fn version_required() -> HttpResponse {
    bad_request("Version 8 required")
}

pub fn unknown_sid() -> HttpResponse {
    bad_request("Unknown SID")
}

pub fn bad_data() -> HttpResponse {
    bad_request("Bad data")
}
