pub mod codec;
pub mod config;
pub mod decoder;
pub mod http;
pub mod id;
pub mod middleware;
pub mod registry;
pub mod session;
pub mod state;

pub use state::AppState;

use axum::routing::get;
use axum::Router;

use http::response::not_found;

/// Builds the BrowserChannel dispatcher, nested under `state.config.base`.
/// Everything outside that prefix is untouched by this router -- mounting it
/// alongside other routes is the caller's business.
pub fn build_router(state: AppState) -> Router {
    let base = state.config.base.clone();
    let channel = Router::new()
        .route("/test", get(http::test_endpoint::test))
        .route("/bind", get(http::bind::bind_get).post(http::bind::bind_post))
        .fallback(not_found_under_base)
        .with_state(state);

    Router::new()
        .nest(&base, channel)
        .layer(axum::middleware::from_fn(middleware::no_cache_headers))
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Any path under `/{base}` other than `/test` or `/bind` is a direct 404,
/// never delegated further.
async fn not_found_under_base() -> axum::response::Response {
    not_found("Not Found")
}
