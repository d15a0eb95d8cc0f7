//! `GET /{base}/test`: host-prefix discovery (`MODE=init`) and the
//! buffering-detection probe clients run before ever binding a session.

use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bc_clock::Clock;
use bc_protocol::ChannelQuery;
use rand::seq::SliceRandom;
use serde_json::json;

use crate::codec::{content_type_for, BackChannelWriter};
use crate::http::response::version_required;
use crate::state::AppState;

/// Gap between the two chunks of the phase-2 probe. Clients time this to
/// tell a streaming connection apart from one a proxy is buffering whole.
const BUFFERING_PROBE_DELAY: Duration = Duration::from_secs(2);

pub async fn test(State(state): State<AppState>, Query(query): Query<ChannelQuery>) -> Response {
    if !query.is_version_8() {
        return version_required();
    }

    if query.mode.as_deref() == Some("init") {
        return init_response(&state);
    }

    probe_response(&state, &query)
}

fn init_response(state: &AppState) -> Response {
    let host_prefix = state
        .config
        .host_prefixes
        .choose(&mut rand::thread_rng())
        .cloned();
    let body = serde_json::to_string(&json!([host_prefix, null]))
        .unwrap_or_else(|_| "[null,null]".to_owned());
    let mut response = (StatusCode::OK, body).into_response();
    response.headers_mut().insert(
        axum::http::header::CONTENT_TYPE,
        HeaderValue::from_static("application/json; charset=utf-8"),
    );
    response.headers_mut().insert(
        "X-Accept",
        HeaderValue::from_static("application/json; application/x-www-form-urlencoded"),
    );
    response
}

fn probe_response(state: &AppState, query: &ChannelQuery) -> Response {
    let framing = query.framing();
    let (mut writer, body) = BackChannelWriter::new(framing);
    let clock = state.clock.clone();
    let domain = query.domain.clone();
    tokio::spawn(async move {
        writer.write_head(domain.as_deref());
        writer.write_raw("11111");
        clock.sleep(BUFFERING_PROBE_DELAY).await;
        writer.write_raw("2");
        writer.end();
    });

    let mut response = body.into_response();
    response.headers_mut().insert(
        axum::http::header::CONTENT_TYPE,
        HeaderValue::from_static(content_type_for(framing)),
    );
    response
}
