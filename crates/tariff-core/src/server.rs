//! The axum front-end: the loopback HTTP surface and the SSE plumbing
//! (heartbeat pump, hop-by-hop header hygiene).

use std::convert::Infallible;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::extract::{RawQuery, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri, header};
use axum::response::Response;
use axum::routing::{get, post};
use bytes::Bytes;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::info;
use uuid::Uuid;

use crate::engine::{ChatReply, PassthroughReply, ProxyEngine};
use crate::error::ProxyError;
use crate::upstream::{Headers, UpstreamBody};

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(2);
pub const HEARTBEAT_FRAME: &[u8] = b": heartbeat\n\n";

pub fn router(engine: ProxyEngine) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/v1/models", get(models_list))
        .route("/v1/chat/completions", post(chat_completions))
        .fallback(fallback)
        .with_state(engine)
}

async fn health(State(engine): State<ProxyEngine>) -> Response {
    let state = engine.state();
    let providers: Vec<&str> = {
        let mut seen = Vec::new();
        for model in state.registry.iter() {
            if !seen.contains(&model.provider.as_str()) {
                seen.push(model.provider.as_str());
            }
        }
        seen
    };
    let accessible = state.keys.accessible_providers(&providers);
    let model_count = state
        .registry
        .iter()
        .filter(|model| accessible.contains(&model.provider))
        .count();
    let body = json!({
        "status": "ok",
        "configuredProviders": state.keys.configured_providers(),
        "gatewayFallback": state.keys.has_gateway(),
        "accessibleProviders": accessible,
        "modelCount": model_count,
    });
    json_response(StatusCode::OK, Bytes::from(body.to_string()))
}

async fn stats(State(engine): State<ProxyEngine>, RawQuery(query): RawQuery) -> Response {
    let days = query
        .as_deref()
        .and_then(|q| {
            serde_urlencoded::from_str::<Vec<(String, String)>>(q)
                .ok()?
                .into_iter()
                .find(|(k, _)| k == "days")
                .and_then(|(_, v)| v.parse::<u32>().ok())
        })
        .unwrap_or(7);
    let body = engine.state().stats.aggregate(days);
    json_response(StatusCode::OK, Bytes::from(body.to_string()))
}

async fn models_list(State(engine): State<ProxyEngine>) -> Response {
    let state = engine.state();
    let mut data = vec![json!({
        "id": "auto",
        "object": "model",
        "created": MODELS_CREATED_AT,
        "owned_by": "tariff",
    })];
    for model in state.registry.iter() {
        if state.keys.is_reachable(&model.provider) {
            data.push(json!({
                "id": model.id,
                "object": "model",
                "created": MODELS_CREATED_AT,
                "owned_by": model.provider,
            }));
        }
    }
    let body = json!({ "object": "list", "data": data });
    json_response(StatusCode::OK, Bytes::from(body.to_string()))
}

const MODELS_CREATED_AT: i64 = 1_686_935_002;

async fn chat_completions(
    State(engine): State<ProxyEngine>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let trace_id = Uuid::now_v7().to_string();
    info!(event = "chat_received", trace_id = %trace_id, bytes = body.len());
    match engine.handle_chat(trace_id.clone(), headers, body).await {
        Ok(ChatReply::Json { status, body }) => {
            let mut resp = json_response(status, body);
            set_request_id(&mut resp, &trace_id);
            resp
        }
        Ok(ChatReply::Stream { rx }) => {
            let mut resp = sse_response(wrap_sse_with_heartbeat(rx));
            set_request_id(&mut resp, &trace_id);
            resp
        }
        Err(err) => error_response(err),
    }
}

async fn fallback(
    State(engine): State<ProxyEngine>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = uri.path().to_string();
    if !path.starts_with("/v1/") {
        return error_response(ProxyError::not_found(format!("unknown path: {path}")));
    }
    let trace_id = Uuid::now_v7().to_string();
    match engine
        .handle_passthrough(trace_id, method, &path, uri.query(), &headers, body)
        .await
    {
        Ok(reply) => passthrough_response(reply),
        Err(err) => error_response(err),
    }
}

// ---- Response assembly ----

fn json_response(status: StatusCode, body: Bytes) -> Response {
    let mut resp = Response::new(Body::from(body));
    *resp.status_mut() = status;
    resp.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    resp
}

fn sse_response(rx: mpsc::Receiver<Bytes>) -> Response {
    let stream = ReceiverStream::new(rx).map(Ok::<_, Infallible>);
    let mut resp = Response::new(Body::from_stream(stream));
    *resp.status_mut() = StatusCode::OK;
    let headers = resp.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(
        HeaderName::from_static("x-accel-buffering"),
        HeaderValue::from_static("no"),
    );
    resp
}

fn passthrough_response(reply: PassthroughReply) -> Response {
    let status = StatusCode::from_u16(reply.status).unwrap_or(StatusCode::BAD_GATEWAY);
    match reply.body {
        UpstreamBody::Bytes(bytes) => {
            let mut resp = Response::new(Body::from(bytes));
            *resp.status_mut() = status;
            extend_headers(resp.headers_mut(), &reply.headers);
            resp
        }
        UpstreamBody::Stream(rx) => {
            let stream = ReceiverStream::new(rx).map(Ok::<_, Infallible>);
            let mut resp = Response::new(Body::from_stream(stream));
            *resp.status_mut() = status;
            extend_headers(resp.headers_mut(), &reply.headers);
            resp
        }
    }
}

fn extend_headers(out: &mut HeaderMap, headers: &Headers) {
    for (name, value) in headers {
        // Hyper sets framing itself; hop-by-hop headers must not leak.
        if is_hop_by_hop_or_framing_header(name) {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            out.append(name, value);
        }
    }
}

fn is_hop_by_hop_or_framing_header(name: &str) -> bool {
    name.eq_ignore_ascii_case("content-length")
        || name.eq_ignore_ascii_case("transfer-encoding")
        || name.eq_ignore_ascii_case("connection")
        || name.eq_ignore_ascii_case("keep-alive")
        || name.eq_ignore_ascii_case("proxy-authenticate")
        || name.eq_ignore_ascii_case("proxy-authorization")
        || name.eq_ignore_ascii_case("te")
        || name.eq_ignore_ascii_case("trailer")
        || name.eq_ignore_ascii_case("upgrade")
}

fn error_response(err: ProxyError) -> Response {
    json_response(err.status, err.body)
}

fn set_request_id(resp: &mut Response, trace_id: &str) {
    if let Ok(value) = HeaderValue::from_str(trace_id) {
        resp.headers_mut()
            .insert(HeaderName::from_static("x-tariff-request-id"), value);
    }
}

/// Keep intermediaries alive while upstream is quiet: one comment frame
/// immediately, another every `HEARTBEAT_INTERVAL`, stopping the instant
/// the first payload byte is forwarded. Payload order is untouched.
pub fn wrap_sse_with_heartbeat(upstream_rx: mpsc::Receiver<Bytes>) -> mpsc::Receiver<Bytes> {
    wrap_sse_with_heartbeat_every(upstream_rx, HEARTBEAT_INTERVAL)
}

fn wrap_sse_with_heartbeat_every(
    mut upstream_rx: mpsc::Receiver<Bytes>,
    interval: Duration,
) -> mpsc::Receiver<Bytes> {
    let (tx, rx) = mpsc::channel::<Bytes>(32);
    tokio::spawn(async move {
        if tx.send(Bytes::from_static(HEARTBEAT_FRAME)).await.is_err() {
            return;
        }
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                maybe_chunk = upstream_rx.recv() => {
                    let Some(chunk) = maybe_chunk else {
                        return;
                    };
                    if tx.send(chunk).await.is_err() {
                        return;
                    }
                    break;
                }
                _ = ticker.tick() => {
                    if tx.send(Bytes::from_static(HEARTBEAT_FRAME)).await.is_err() {
                        return;
                    }
                }
            }
        }

        while let Some(chunk) = upstream_rx.recv().await {
            if tx.send(chunk).await.is_err() {
                return;
            }
        }
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn heartbeats_flow_until_first_payload_byte() {
        let (up_tx, up_rx) = mpsc::channel::<Bytes>(4);
        let mut rx = wrap_sse_with_heartbeat_every(up_rx, Duration::from_millis(20));

        // Immediate first heartbeat.
        let first = tokio::time::timeout(Duration::from_millis(100), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.as_ref(), HEARTBEAT_FRAME);

        // Upstream silent: at least two more heartbeat frames, zero payload.
        let mut beats = 0;
        let silent_window = tokio::time::Instant::now() + Duration::from_millis(110);
        while tokio::time::Instant::now() < silent_window {
            match tokio::time::timeout_at(silent_window, rx.recv()).await {
                Ok(Some(frame)) => {
                    assert_eq!(frame.as_ref(), HEARTBEAT_FRAME);
                    beats += 1;
                }
                _ => break,
            }
        }
        assert!(beats >= 2, "only {beats} heartbeats while upstream silent");

        // Payload stops the heartbeat and flows through in order.
        up_tx.send(Bytes::from_static(b"data: x\n\n")).await.unwrap();
        up_tx.send(Bytes::from_static(b"data: y\n\n")).await.unwrap();
        drop(up_tx);
        let mut payload = Vec::new();
        while let Some(frame) = rx.recv().await {
            assert_ne!(frame.as_ref(), HEARTBEAT_FRAME, "heartbeat after payload");
            payload.push(frame);
        }
        assert_eq!(payload[0].as_ref(), b"data: x\n\n");
        assert_eq!(payload[1].as_ref(), b"data: y\n\n");
    }

    #[test]
    fn hop_by_hop_headers_are_dropped() {
        let mut out = HeaderMap::new();
        extend_headers(
            &mut out,
            &vec![
                ("content-length".to_string(), "12".to_string()),
                ("transfer-encoding".to_string(), "chunked".to_string()),
                ("x-custom".to_string(), "keep".to_string()),
            ],
        );
        assert!(out.get("content-length").is_none());
        assert!(out.get("transfer-encoding").is_none());
        assert_eq!(out.get("x-custom").unwrap(), "keep");
    }
}
