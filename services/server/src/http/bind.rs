//! `/{base}/bind`: forward-channel POSTs and the hanging back-channel GET.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bc_protocol::{post_ack_array, ChannelQuery, Framing};
use rand::seq::SliceRandom;

use crate::codec::{content_type_for, length_prefixed_json, BackChannelWriter};
use crate::decoder;
use crate::http::response::{bad_data, unknown_sid, version_required};
use crate::session::BindError;
use crate::state::AppState;

pub async fn bind_post(
    State(state): State<AppState>,
    Query(query): Query<ChannelQuery>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    if !query.is_version_8() {
        return version_required();
    }

    let content_type = headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/x-www-form-urlencoded");

    match query.sid.clone() {
        None => new_session(&state, &query, addr, content_type, &body).await,
        Some(sid) => existing_session(&state, &sid, &query, content_type, &body).await,
    }
}

/// No `SID`: create a session, feed it whatever forward data rode along on
/// this first POST, then bind the response itself as the initial back
/// channel so the `["c", id, hostPrefix, 8]` array has somewhere to go.
async fn new_session(
    state: &AppState,
    query: &ChannelQuery,
    addr: SocketAddr,
    content_type: &str,
    body: &[u8],
) -> Response {
    let old_aid = query.oaid.as_deref().and_then(|v| v.parse::<i64>().ok());
    let session = state
        .registry
        .create(
            addr.ip().to_string(),
            query.cver.clone(),
            query.osid.as_deref(),
            old_aid,
        )
        .await;

    let host_prefix = state
        .config
        .host_prefixes
        .choose(&mut rand::thread_rng())
        .cloned();
    session
        .queue_array(
            bc_protocol::initial_array(session.id(), host_prefix.as_deref()),
            None,
            None,
        )
        .await;

    match decoder::decode_forward_payload(content_type, body) {
        Ok(Some(batch)) => session.received_data(batch).await,
        Ok(None) => {}
        Err(_) => return bad_data(),
    }

    let (writer, response_body) = BackChannelWriter::new(Framing::Xhr);
    // Synthetic {RID: "rpc", CI: "1", TYPE: "xmlhttp"}: CI=1 means
    // chunked=false, so the response ends as soon as the flush below writes
    // the initial array.
    if let Err((_err, mut writer)) = session.set_back_channel(writer, Some("rpc"), false).await {
        let status = writer.write_error(StatusCode::BAD_REQUEST, "Session closed");
        return framed_error_response(response_body, status, Framing::Xhr);
    }
    session.mark_ok().await;

    let mut response = response_body.into_response();
    response.headers_mut().insert(
        axum::http::header::CONTENT_TYPE,
        HeaderValue::from_static(content_type_for(Framing::Xhr)),
    );
    response
}

/// `SID` present: apply the client's ack, feed it any forward data, and
/// reply with where the outgoing queue stands.
async fn existing_session(
    state: &AppState,
    sid: &str,
    query: &ChannelQuery,
    content_type: &str,
    body: &[u8],
) -> Response {
    let Some(session) = state.registry.lookup(sid).await else {
        return unknown_sid();
    };

    if let Some(aid) = query.aid.as_deref().and_then(|v| v.parse::<i64>().ok()) {
        session.acknowledged_arrays(aid).await;
    }

    match decoder::decode_forward_payload(content_type, body) {
        Ok(Some(batch)) => session.received_data(batch).await,
        Ok(None) => {}
        Err(_) => return bad_data(),
    }

    let array = post_ack_array(
        session.has_back_channel().await,
        session.last_sent_array_id().await,
        session.outstanding_bytes().await,
    );
    let mut response = (StatusCode::OK, length_prefixed_json(&array)).into_response();
    response.headers_mut().insert(
        axum::http::header::CONTENT_TYPE,
        HeaderValue::from_static(content_type_for(Framing::Xhr)),
    );
    response
}

pub async fn bind_get(State(state): State<AppState>, Query(query): Query<ChannelQuery>) -> Response {
    if !query.is_version_8() {
        return version_required();
    }

    let Some(sid) = query.sid.as_deref() else {
        return unknown_sid();
    };
    let Some(session) = state.registry.lookup(sid).await else {
        return unknown_sid();
    };

    if let Some(aid) = query.aid.as_deref().and_then(|v| v.parse::<i64>().ok()) {
        session.acknowledged_arrays(aid).await;
    }

    let framing = query.framing();
    let (mut writer, body) = BackChannelWriter::new(framing);
    writer.write_head(query.domain.as_deref());

    if let Err((err, mut writer)) = session
        .set_back_channel(writer, query.rid.as_deref(), query.chunked())
        .await
    {
        let message = match err {
            BindError::RidRequired => "RID must be rpc",
            BindError::SessionClosed => "Unknown SID",
        };
        let status = writer.write_error(StatusCode::BAD_REQUEST, message);
        return framed_error_response(body, status, framing);
    }

    let mut response = body.into_response();
    response.headers_mut().insert(
        axum::http::header::CONTENT_TYPE,
        HeaderValue::from_static(content_type_for(framing)),
    );
    response
}

/// Finishes an error reported through an already-opened back-channel body:
/// the writer may have already queued framing preamble (HTML's `write_head`)
/// before the bind failed, so the error goes out on the same stream instead
/// of a fresh response replacing it.
fn framed_error_response(body: axum::body::Body, status: StatusCode, framing: Framing) -> Response {
    let mut response = body.into_response();
    *response.status_mut() = status;
    response.headers_mut().insert(
        axum::http::header::CONTENT_TYPE,
        HeaderValue::from_static(content_type_for(framing)),
    );
    response
}
