//! The per-request state machine:
//!
//! ```text
//! RECEIVE -> CLASSIFY -> RESOLVE_KEY -> DEDUP_CHECK -> DISPATCH -> STREAM -> COMPLETE
//!                                                        ^    `-> FALLBACK_NEXT -'
//! ```
//!
//! Every state has a defined failure transition; fallback decisions live
//! entirely here, never inside the dialect adapter.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use rand::Rng;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use tariff_protocol::Dialect;
use tariff_protocol::openai::{ChatCompletionRequestBody, ChatCompletionResponse, Usage};
use tariff_routing::{
    RoutingDecision, Tier, build_decision, classify, estimate_tokens, is_auto_model,
    widened_tiers,
};

use crate::dedup::{DedupKey, DedupOutcome, StoredResponse, await_completion, dedup_key};
use crate::error::ProxyError;
use crate::keys::{ResolvedAccess, auth_headers};
use crate::retry::is_retryable;
use crate::session::session_id_from_headers;
use crate::state::AppState;
use crate::translate::{
    DEFAULT_MAX_TOKENS, StreamTranslator, request_path, translate_request, upstream_error_frame,
};
use crate::upstream::{Headers, HttpMethod, UpstreamBody, UpstreamRequest};
use crate::usage::UsageEntry;

pub enum ChatReply {
    Json {
        status: StatusCode,
        body: Bytes,
    },
    /// SSE stream; the server wraps it with the heartbeat pump.
    Stream {
        rx: mpsc::Receiver<Bytes>,
    },
}

/// Raw upstream reply for `/v1/*` passthrough paths.
pub struct PassthroughReply {
    pub status: u16,
    pub headers: Headers,
    pub body: UpstreamBody,
}

#[derive(Debug, Clone)]
struct RouteOutcome {
    /// Ordered candidate chain, primary first. Never empty.
    chain: Vec<String>,
    tier: Option<Tier>,
    decision: Option<RoutingDecision>,
}

#[derive(Debug, Clone)]
struct PlannedCall {
    model_id: String,
    access: ResolvedAccess,
    outbound: Bytes,
    url: String,
    headers: Headers,
}

#[derive(Clone)]
pub struct ProxyEngine {
    state: Arc<AppState>,
}

impl ProxyEngine {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// `/v1/chat/completions`.
    pub async fn handle_chat(
        &self,
        trace_id: String,
        headers: HeaderMap,
        body: Bytes,
    ) -> Result<ChatReply, ProxyError> {
        let started_at = Instant::now();
        let parsed: ChatCompletionRequestBody = serde_json::from_slice(&body)
            .map_err(|err| ProxyError::bad_request(format!("invalid json body: {err}")))?;
        let is_stream = parsed.is_stream();

        let route = self.route(&headers, &parsed)?;
        info!(
            event = "routed",
            trace_id = %trace_id,
            model = %route.chain[0],
            tier = route.tier.map(|t| t.as_str()),
            is_stream,
            savings = route.decision.as_ref().map(|d| d.savings),
        );

        let plan = self.plan_call(&route.chain[0], &parsed, is_stream)?;
        let key = dedup_key(&plan.outbound);

        // DEDUP_CHECK: coalesce concurrent duplicates, replay fresh ones.
        loop {
            match self.state.dedup.check(key) {
                DedupOutcome::Primary => break,
                DedupOutcome::Join(rx) => match await_completion(rx).await {
                    Some(stored) => return Ok(replay(stored, is_stream)),
                    // The primary was cancelled; race for its slot.
                    None => continue,
                },
                DedupOutcome::Replay(stored) => return Ok(replay(stored, is_stream)),
            }
        }

        if is_stream {
            let (tx, rx) = mpsc::channel::<Bytes>(32);
            let engine = self.clone();
            tokio::spawn(async move {
                engine
                    .run_stream(trace_id, route, plan, parsed, key, tx, started_at)
                    .await;
            });
            Ok(ChatReply::Stream { rx })
        } else {
            self.run_nonstream(trace_id, route, plan, parsed, key, started_at)
                .await
        }
    }

    // ---- CLASSIFY ----

    fn route(
        &self,
        headers: &HeaderMap,
        body: &ChatCompletionRequestBody,
    ) -> Result<RouteOutcome, ProxyError> {
        if !is_auto_model(&body.model) {
            // Client-named model: no brain, no fallback chain.
            return Ok(RouteOutcome {
                chain: vec![body.model.clone()],
                tier: None,
                decision: None,
            });
        }

        let session_id = session_id_from_headers(headers);
        if let Some(id) = session_id.as_deref()
            && let Some(entry) = self.state.sessions.get(id)
        {
            debug!(event = "session_pin", session = %id, model = %entry.model);
            let mut chain = vec![entry.model.clone()];
            chain.extend(
                self.state
                    .tiers
                    .select(entry.tier, false)
                    .chain()
                    .into_iter()
                    .filter(|candidate| *candidate != entry.model),
            );
            return Ok(RouteOutcome {
                chain,
                tier: Some(entry.tier),
                decision: None,
            });
        }

        let user_prompt = body
            .messages
            .iter()
            .rev()
            .find(|message| message.role == "user")
            .map(|message| message.content_text())
            .unwrap_or_default();
        let system_prompt = body
            .messages
            .iter()
            .find(|message| message.role == "system")
            .map(|message| message.content_text());
        let total_tokens: u64 = body
            .messages
            .iter()
            .map(|message| estimate_tokens(&message.content_text()))
            .sum();

        let classification = classify(
            &user_prompt,
            system_prompt.as_deref(),
            total_tokens,
            &self.state.scoring,
        );
        let agentic = is_agentic(body);

        // Widen up, then down, until some tier has a reachable model.
        let mut effective_tier = classification.tier;
        let mut chain = Vec::new();
        for tier in widened_tiers(classification.tier) {
            let candidates = self.state.tiers.select(tier, agentic).chain();
            if candidates.iter().any(|id| self.reachable(id)) {
                effective_tier = tier;
                chain = candidates;
                break;
            }
        }
        if chain.is_empty() {
            return Err(ProxyError::no_provider(
                "no reachable model for any tier; configure a provider key",
            ));
        }

        let est_input = total_tokens;
        let est_output = u64::from(body.requested_max_tokens().unwrap_or(DEFAULT_MAX_TOKENS));
        chain = self.order_candidates(chain, est_input, est_output);

        let candidate_models: Vec<_> = chain
            .iter()
            .filter_map(|id| self.state.registry.get(id))
            .collect();
        let chosen = self
            .state
            .registry
            .get(&chain[0])
            .ok_or_else(|| ProxyError::internal("tier table model missing from registry"))?;

        let signal_names: Vec<&str> = classification
            .signals
            .iter()
            .map(|signal| signal.name)
            .collect();
        let mut decision = build_decision(
            effective_tier,
            chosen,
            &candidate_models,
            est_input,
            est_output,
            format!(
                "tier {} (score {:.1}; signals: {})",
                effective_tier,
                classification.score,
                signal_names.join(", ")
            ),
        );
        if effective_tier != classification.tier {
            decision.push_note(format!(
                "widened from {} to {}",
                classification.tier, effective_tier
            ));
        }
        if agentic {
            decision.push_note("agentic table".to_string());
        }
        let configured_primary = &self.state.tiers.select(effective_tier, agentic).primary;
        if chain[0] != *configured_primary {
            decision.push_note(format!(
                "primary {configured_primary} unreachable, rate-limited, or too small; using {}",
                chain[0]
            ));
        }

        if let Some(id) = session_id.as_deref() {
            self.state.sessions.set(id, &decision.model, effective_tier);
        }

        Ok(RouteOutcome {
            chain,
            tier: Some(effective_tier),
            decision: Some(decision),
        })
    }

    /// RESOLVE_KEY + fallback ordering: unreachable candidates drop out,
    /// models whose context window cannot hold the request are skipped
    /// without being called, and rate-limited models sink to the back.
    fn order_candidates(&self, chain: Vec<String>, est_input: u64, est_output: u64) -> Vec<String> {
        let needed = est_input + est_output;
        let reachable: Vec<String> = chain
            .into_iter()
            .filter(|id| self.reachable(id))
            .collect();
        let mut fitting: Vec<String> = reachable
            .iter()
            .filter(|id| {
                self.state
                    .registry
                    .get(id)
                    .map(|model| model.context_window >= needed)
                    .unwrap_or(true)
            })
            .cloned()
            .collect();
        if fitting.is_empty() {
            // Nothing fits; take the largest-context reachable candidate
            // rather than failing outright.
            fitting = reachable;
            fitting.sort_by_key(|id| {
                std::cmp::Reverse(
                    self.state
                        .registry
                        .get(id)
                        .map(|model| model.context_window)
                        .unwrap_or(0),
                )
            });
        }
        self.state.rate_limits.prioritize(&fitting)
    }

    fn reachable(&self, model_id: &str) -> bool {
        provider_of(model_id)
            .map(|provider| self.state.keys.is_reachable(provider))
            .unwrap_or(false)
    }

    // ---- DISPATCH planning ----

    fn plan_call(
        &self,
        model_id: &str,
        body: &ChatCompletionRequestBody,
        is_stream: bool,
    ) -> Result<PlannedCall, ProxyError> {
        let provider = provider_of(model_id)
            .ok_or_else(|| ProxyError::bad_request(format!("malformed model id: {model_id}")))?;
        let access = self
            .state
            .keys
            .resolve(provider)
            .ok_or_else(|| ProxyError::no_provider(format!("no key reaches {provider}")))?;

        let native_model = if access.via_gateway {
            self.state.catalog.gateway_id(model_id)
        } else {
            self.state.registry.native_name(model_id)
        };

        let outbound = translate_request(body, access.dialect, &native_model)
            .map_err(|err| ProxyError::internal(err.to_string()))?;
        let url = format!(
            "{}{}",
            access.base_url,
            request_path(access.dialect, &native_model, is_stream)
        );
        let headers = auth_headers(&access);

        Ok(PlannedCall {
            model_id: model_id.to_string(),
            access,
            outbound,
            url,
            headers,
        })
    }

    fn next_plan(
        &self,
        route: &RouteOutcome,
        tried: &[String],
        body: &ChatCompletionRequestBody,
        is_stream: bool,
    ) -> Option<PlannedCall> {
        let est_input: u64 = body
            .messages
            .iter()
            .map(|message| estimate_tokens(&message.content_text()))
            .sum();
        let est_output = u64::from(body.requested_max_tokens().unwrap_or(DEFAULT_MAX_TOKENS));
        let ordered = self.order_candidates(route.chain.clone(), est_input, est_output);
        for candidate in ordered {
            if tried.contains(&candidate) {
                continue;
            }
            if let Ok(plan) = self.plan_call(&candidate, body, is_stream) {
                return Some(plan);
            }
        }
        None
    }

    // ---- Non-stream path ----

    async fn run_nonstream(
        &self,
        trace_id: String,
        route: RouteOutcome,
        first_plan: PlannedCall,
        body: ChatCompletionRequestBody,
        key: DedupKey,
        started_at: Instant,
    ) -> Result<ChatReply, ProxyError> {
        let deadline = started_at + self.state.config.request_timeout;
        let result = tokio::time::timeout_at(
            deadline.into(),
            self.dispatch_with_fallback(&trace_id, &route, first_plan, &body, false),
        )
        .await;

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(_) => {
                self.state.dedup.remove_inflight(key);
                return Err(ProxyError::timeout("request deadline exceeded"));
            }
        };

        match outcome {
            Ok((plan, response)) => {
                let upstream_bytes = response.body_bytes().unwrap_or_default();
                let translated = crate::translate::translate_response(
                    &upstream_bytes,
                    plan.access.dialect,
                    &plan.model_id,
                    unix_now(),
                )
                .map_err(|err| {
                    self.state.dedup.remove_inflight(key);
                    warn!(event = "translate_failed", trace_id = %trace_id, error = %err);
                    ProxyError::bad_upstream(err.to_string())
                })?;

                self.state.dedup.complete(
                    key,
                    StoredResponse {
                        status: 200,
                        headers: vec![(
                            "content-type".to_string(),
                            "application/json".to_string(),
                        )],
                        body: translated.clone(),
                        is_stream: false,
                    },
                );
                self.record_usage(&route, &plan, usage_from_body(&translated), started_at);
                Ok(ChatReply::Json {
                    status: StatusCode::OK,
                    body: translated,
                })
            }
            Err(err) => {
                self.state.dedup.remove_inflight(key);
                Err(err)
            }
        }
    }

    // ---- Stream path ----

    #[allow(clippy::too_many_arguments)]
    async fn run_stream(
        &self,
        trace_id: String,
        route: RouteOutcome,
        first_plan: PlannedCall,
        body: ChatCompletionRequestBody,
        key: DedupKey,
        tx: mpsc::Sender<Bytes>,
        started_at: Instant,
    ) {
        let deadline = started_at + self.state.config.request_timeout;
        let dispatched = tokio::time::timeout_at(
            deadline.into(),
            self.dispatch_with_fallback(&trace_id, &route, first_plan, &body, true),
        )
        .await;

        let (plan, response) = match dispatched {
            Ok(Ok(success)) => success,
            Ok(Err(err)) => {
                // Headers are gone already; a single error frame then DONE.
                self.state.dedup.remove_inflight(key);
                let message = String::from_utf8_lossy(&err.body).into_owned();
                let _ = tx.send(upstream_error_frame("upstream_error", &message)).await;
                let _ = tx.send(tariff_protocol::sse::done_frame()).await;
                return;
            }
            Err(_) => {
                self.state.dedup.remove_inflight(key);
                let _ = tx
                    .send(upstream_error_frame("upstream_timeout", "request deadline exceeded"))
                    .await;
                let _ = tx.send(tariff_protocol::sse::done_frame()).await;
                return;
            }
        };

        let mut translator = StreamTranslator::new(
            plan.access.dialect,
            &plan.model_id,
            &format!("chatcmpl-{trace_id}"),
            unix_now(),
        );
        let mut captured: Vec<u8> = Vec::new();

        let mut rx_in = match response.body {
            UpstreamBody::Stream(rx_in) => rx_in,
            UpstreamBody::Bytes(bytes) => {
                // Upstream answered without streaming; translate in one go.
                for frame in translator.push(&bytes) {
                    captured.extend_from_slice(&frame);
                    if tx.send(frame).await.is_err() {
                        self.state.dedup.remove_inflight(key);
                        return;
                    }
                }
                self.finish_stream(&trace_id, &route, &plan, translator, captured, key, tx, started_at)
                    .await;
                return;
            }
        };

        loop {
            let chunk = tokio::select! {
                next = tokio::time::timeout_at(deadline.into(), rx_in.recv()) => match next {
                    Ok(Some(chunk)) => chunk,
                    Ok(None) => break,
                    Err(_) => {
                        self.state.dedup.remove_inflight(key);
                        let _ = tx
                            .send(upstream_error_frame(
                                "upstream_timeout",
                                "request deadline exceeded",
                            ))
                            .await;
                        let _ = tx.send(tariff_protocol::sse::done_frame()).await;
                        return;
                    }
                },
                // Client disconnect: dropping `rx_in` aborts the upstream
                // pump; the inflight entry must not outlive us.
                _ = tx.closed() => {
                    self.state.dedup.remove_inflight(key);
                    return;
                }
            };
            for frame in translator.push(&chunk) {
                captured.extend_from_slice(&frame);
                if tx.send(frame).await.is_err() {
                    self.state.dedup.remove_inflight(key);
                    return;
                }
            }
        }

        self.finish_stream(&trace_id, &route, &plan, translator, captured, key, tx, started_at)
            .await;
    }

    #[allow(clippy::too_many_arguments)]
    async fn finish_stream(
        &self,
        trace_id: &str,
        route: &RouteOutcome,
        plan: &PlannedCall,
        mut translator: StreamTranslator,
        mut captured: Vec<u8>,
        key: DedupKey,
        tx: mpsc::Sender<Bytes>,
        started_at: Instant,
    ) {
        for frame in translator.finish() {
            captured.extend_from_slice(&frame);
            if tx.send(frame).await.is_err() {
                self.state.dedup.remove_inflight(key);
                return;
            }
        }
        self.state.dedup.complete(
            key,
            StoredResponse {
                status: 200,
                headers: vec![(
                    "content-type".to_string(),
                    "text/event-stream".to_string(),
                )],
                body: Bytes::from(captured),
                is_stream: true,
            },
        );
        info!(event = "stream_complete", trace_id = %trace_id, model = %plan.model_id);
        self.record_usage(route, plan, translator.usage(), started_at);
    }

    // ---- FALLBACK_NEXT ----

    /// Try the planned candidate, then walk the chain on retryable
    /// failures, up to `max_fallback_attempts` total dispatches.
    async fn dispatch_with_fallback(
        &self,
        trace_id: &str,
        route: &RouteOutcome,
        first_plan: PlannedCall,
        body: &ChatCompletionRequestBody,
        is_stream: bool,
    ) -> Result<(PlannedCall, crate::upstream::UpstreamResponse), ProxyError> {
        let mut tried: Vec<String> = Vec::new();
        let mut plan = first_plan;
        let mut last_error: Option<ProxyError> = None;

        for attempt in 1..=self.state.config.max_fallback_attempts {
            tried.push(plan.model_id.clone());
            let request = UpstreamRequest {
                method: HttpMethod::Post,
                url: plan.url.clone(),
                headers: plan.headers.clone(),
                body: Some(plan.outbound.clone()),
                is_stream,
            };
            debug!(
                event = "dispatch",
                trace_id = %trace_id,
                attempt,
                model = %plan.model_id,
                provider = %plan.access.provider,
                via_gateway = plan.access.via_gateway,
            );

            match self.state.client.send(request).await {
                Ok(response) if response.is_success() => return Ok((plan, response)),
                Ok(response) => {
                    let status = response.status;
                    let body_bytes = response.body_bytes().unwrap_or_default();
                    let retryable = is_retryable(status, &body_bytes);
                    warn!(
                        event = "upstream_error",
                        trace_id = %trace_id,
                        attempt,
                        model = %plan.model_id,
                        status,
                        retryable,
                    );
                    if status == 429 {
                        self.state.rate_limits.mark(&plan.model_id);
                    }
                    if !retryable {
                        return Err(ProxyError::passthrough(
                            StatusCode::from_u16(status)
                                .unwrap_or(StatusCode::BAD_GATEWAY),
                            body_bytes,
                        ));
                    }
                    last_error = Some(ProxyError::passthrough(
                        StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY),
                        body_bytes,
                    ));
                }
                Err(transport) => {
                    // Timeouts and aborts fall back like provider errors.
                    warn!(
                        event = "upstream_transport_error",
                        trace_id = %trace_id,
                        attempt,
                        model = %plan.model_id,
                        error = %transport,
                    );
                    last_error = Some(ProxyError::bad_upstream(transport.to_string()));
                }
            }

            match self.next_plan(route, &tried, body, is_stream) {
                Some(next) if attempt < self.state.config.max_fallback_attempts => {
                    backoff_sleep(attempt).await;
                    plan = next;
                }
                _ => break,
            }
        }

        Err(last_error.unwrap_or_else(|| ProxyError::bad_upstream("fallback chain exhausted")))
    }

    // ---- COMPLETE ----

    fn record_usage(
        &self,
        route: &RouteOutcome,
        plan: &PlannedCall,
        usage: Option<Usage>,
        started_at: Instant,
    ) {
        let (prompt_tokens, completion_tokens) = usage
            .map(|u| (u.prompt_tokens, u.completion_tokens))
            .unwrap_or((0, 0));
        let cost = self
            .state
            .registry
            .get(&plan.model_id)
            .map(|model| tariff_routing::projected_cost(model, prompt_tokens, completion_tokens))
            .unwrap_or(0.0);
        let (baseline, savings) = match &route.decision {
            Some(decision) if decision.model == plan.model_id => {
                (decision.baseline_cost.max(cost), decision.savings)
            }
            _ => (cost, 0.0),
        };
        self.state.usage.record(UsageEntry {
            model: plan.model_id.clone(),
            tier: route.tier,
            cost,
            baseline,
            savings,
            prompt_tokens,
            completion_tokens,
            latency_ms: started_at.elapsed().as_millis() as u64,
            at: time::OffsetDateTime::now_utc(),
        });
    }
}

impl ProxyEngine {
    /// Any other `/v1/*` path: rewrite the model id if the body names
    /// one, attach the right credentials, and forward. Only A-dialect
    /// routes make sense for arbitrary paths, so non-A providers go
    /// through the gateway.
    pub async fn handle_passthrough(
        &self,
        trace_id: String,
        method: http::Method,
        path: &str,
        query: Option<&str>,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<PassthroughReply, ProxyError> {
        let Some(method) = HttpMethod::parse(method.as_str()) else {
            return Err(ProxyError::bad_request("unsupported method"));
        };

        let parsed_body: Option<serde_json::Value> = if body.is_empty() {
            None
        } else {
            serde_json::from_slice(&body).ok()
        };
        let model_id = parsed_body
            .as_ref()
            .and_then(|value| value.get("model"))
            .and_then(|value| value.as_str())
            .map(str::to_string);

        let access = match model_id.as_deref().and_then(provider_of) {
            Some(provider) => self
                .state
                .keys
                .resolve(provider)
                .filter(|access| access.dialect == Dialect::OpenAiChat)
                .or_else(|| self.gateway_access()),
            None => self.gateway_access(),
        }
        .ok_or_else(|| ProxyError::no_provider("no A-dialect route for passthrough"))?;

        let outbound = match (parsed_body, model_id.as_deref()) {
            (Some(mut value), Some(id)) => {
                let gatewayed =
                    access.via_gateway || access.provider == tariff_routing::GATEWAY_PROVIDER;
                let native = if gatewayed {
                    self.state.catalog.gateway_id(id)
                } else {
                    self.state.registry.native_name(id)
                };
                if let Some(obj) = value.as_object_mut() {
                    obj.insert("model".to_string(), serde_json::Value::String(native));
                }
                Some(Bytes::from(serde_json::to_vec(&value).map_err(|err| {
                    ProxyError::internal(err.to_string())
                })?))
            }
            (Some(_), None) => Some(body),
            (None, _) => None,
        };

        let is_stream = stream_hint(headers, outbound.as_deref());
        let suffix = path.strip_prefix("/v1").unwrap_or(path);
        let url = match query {
            Some(query) => format!("{}{}?{}", access.base_url, suffix, query),
            None => format!("{}{}", access.base_url, suffix),
        };

        info!(
            event = "passthrough",
            trace_id = %trace_id,
            path = %path,
            provider = %access.provider,
            is_stream,
        );
        let response = self
            .state
            .client
            .send(UpstreamRequest {
                method,
                url,
                headers: auth_headers(&access),
                body: outbound,
                is_stream,
            })
            .await
            .map_err(|err| ProxyError::bad_upstream(err.to_string()))?;

        Ok(PassthroughReply {
            status: response.status,
            headers: response.headers,
            body: response.body,
        })
    }

    fn gateway_access(&self) -> Option<ResolvedAccess> {
        self.state
            .keys
            .resolve(tariff_routing::GATEWAY_PROVIDER)
            .filter(|access| access.via_gateway || access.provider == tariff_routing::GATEWAY_PROVIDER)
    }
}

fn stream_hint(headers: &HeaderMap, body: Option<&[u8]>) -> bool {
    if headers
        .get(http::header::ACCEPT)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_ascii_lowercase().contains("text/event-stream"))
        .unwrap_or(false)
    {
        return true;
    }
    body.and_then(|bytes| serde_json::from_slice::<serde_json::Value>(bytes).ok())
        .and_then(|value| value.get("stream").and_then(|v| v.as_bool()))
        .unwrap_or(false)
}

fn provider_of(model_id: &str) -> Option<&str> {
    let (provider, rest) = model_id.split_once('/')?;
    (!provider.is_empty() && !rest.is_empty()).then_some(provider)
}

/// Conservative agentic rule: a `tools` array on the request, or at least
/// two prior assistant messages carrying tool calls.
fn is_agentic(body: &ChatCompletionRequestBody) -> bool {
    if body.tools.as_ref().is_some_and(|tools| !tools.is_empty()) {
        return true;
    }
    body.messages
        .iter()
        .filter(|message| {
            message.role == "assistant"
                && message
                    .tool_calls
                    .as_ref()
                    .is_some_and(|calls| !calls.is_empty())
        })
        .count()
        >= 2
}

fn replay(stored: StoredResponse, want_stream: bool) -> ChatReply {
    if want_stream && stored.is_stream {
        let (tx, rx) = mpsc::channel(1);
        let body = stored.body;
        tokio::spawn(async move {
            let _ = tx.send(body).await;
        });
        ChatReply::Stream { rx }
    } else {
        ChatReply::Json {
            status: StatusCode::from_u16(stored.status).unwrap_or(StatusCode::OK),
            body: stored.body,
        }
    }
}

fn usage_from_body(body: &Bytes) -> Option<Usage> {
    serde_json::from_slice::<ChatCompletionResponse>(body)
        .ok()
        .and_then(|response| response.usage)
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Jittered linear backoff between fallback attempts.
async fn backoff_sleep(attempt: u32) {
    let jitter = rand::rng().random_range(0..120);
    let delay = Duration::from_millis(u64::from(attempt) * 200 + jitter);
    tokio::time::sleep(delay).await;
}
