//! Response headers common to every channel response: cache suppression,
//! an already-expired `Expires`, and the MIME-sniffing opt-out.

use axum::extract::Request;
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use std::time::SystemTime;

pub async fn no_cache_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        axum::http::header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-store, max-age=0, must-revalidate"),
    );
    headers.insert(axum::http::header::PRAGMA, HeaderValue::from_static("no-cache"));
    if let Ok(expires) = HeaderValue::from_str(&epoch_expires()) {
        headers.insert(axum::http::header::EXPIRES, expires);
    }
    headers.insert(
        "X-Content-Type-Options",
        HeaderValue::from_static("nosniff"),
    );
    response
}

/// An already-elapsed `Expires` timestamp -- the Unix epoch itself, so any
/// cache in the path must revalidate on every request.
fn epoch_expires() -> String {
    httpdate::fmt_http_date(SystemTime::UNIX_EPOCH)
}

pub fn status_text(status: StatusCode, body: impl Into<String>) -> Response {
    use axum::response::IntoResponse;
    let mut response = (status, body.into()).into_response();
    response.headers_mut().insert(
        axum::http::header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::routing::get;
    use axum::Router;
    use tower::ServiceExt;

    #[tokio::test]
    async fn no_cache_headers_are_applied_to_every_response() {
        let app = Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(axum::middleware::from_fn(no_cache_headers));

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let headers = response.headers();
        assert_eq!(
            headers.get(axum::http::header::CACHE_CONTROL).unwrap(),
            "no-cache, no-store, max-age=0, must-revalidate"
        );
        assert_eq!(headers.get(axum::http::header::PRAGMA).unwrap(), "no-cache");
        assert!(headers.get(axum::http::header::EXPIRES).is_some());
        assert_eq!(headers.get("X-Content-Type-Options").unwrap(), "nosniff");
    }

    #[tokio::test]
    async fn status_text_sets_plain_content_type() {
        use axum::body::to_bytes;
        let response = status_text(StatusCode::BAD_REQUEST, "Version 8 required");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers().get(axum::http::header::CONTENT_TYPE).unwrap(),
            "text/plain; charset=utf-8"
        );
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(bytes.as_ref(), b"Version 8 required");
    }
}
