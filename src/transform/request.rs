//! Outbound request rewriting: public API shape to internal Code Assist
//! shape.
//!
//! A generation call arrives as `/v1beta/models/{model}:{action}` with the
//! request JSON as its body. It leaves as `/v1internal:{action}` carrying
//! the envelope `{"project": P, "model": M, "request": <body>}` and the
//! session's bearer token. Everything that is not a model route passes
//! through untouched.
//!
//! All mutations are idempotent: transforming an already-transformed
//! request changes nothing (the envelope key guards re-wrapping, injected
//! fields are presence-checked), so a retry path can safely re-run the
//! transformer.

use serde_json::{json, Map, Value};
use tracing::debug;

use crate::constants::{ProviderConfig, ProviderKind, INTERNAL_API_PREFIX};

/// Per-call inputs resolved by the session manager.
#[derive(Debug, Clone)]
pub struct TransformContext {
    /// Bearer token for the outbound call.
    pub access_token: String,
    /// Project the call is attributed to.
    pub project_id: String,
}

/// A model route parsed out of a public API path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRoute {
    pub model: String,
    pub action: String,
    pub streaming: bool,
}

/// The rewritten request, ready to send.
#[derive(Debug)]
pub struct TransformedRequest {
    /// Path and query relative to the backend base URL.
    pub path: String,
    /// Whether the response will be an SSE stream.
    pub streaming: bool,
    /// Complete outbound header set (inputs filtered, auth and fixed
    /// headers merged in).
    pub headers: Vec<(String, String)>,
    /// The enveloped body, or the original bytes when they were opaque.
    pub body: Option<Vec<u8>>,
    /// Model name from the route, for logging.
    pub model: String,
}

/// Headers that must never reach the backend.
const STRIPPED_HEADERS: &[&str] = &["x-goog-api-key", "x-api-key", "authorization", "host"];

/// Parse `/v1beta/models/{model}:{action}` (or `/v1/models/...`).
///
/// Query strings on the incoming path are ignored; streaming is decided by
/// the action, not by an incoming `alt=sse`.
pub fn parse_model_path(path: &str) -> Option<ModelRoute> {
    let path = path.split('?').next().unwrap_or(path);
    let rest = path
        .strip_prefix("/v1beta/models/")
        .or_else(|| path.strip_prefix("/v1/models/"))?;
    let (model, action) = rest.split_once(':')?;
    if model.is_empty() || action.is_empty() {
        return None;
    }
    Some(ModelRoute {
        model: model.to_string(),
        action: action.to_string(),
        streaming: action == "streamGenerateContent",
    })
}

/// Rewrite one outbound call.
///
/// Returns `None` for paths that are not model routes; the caller sends
/// those unmodified (pass-through).
pub fn transform_request(
    path: &str,
    headers: &[(String, String)],
    body: Option<&[u8]>,
    ctx: &TransformContext,
    config: &ProviderConfig,
) -> Option<TransformedRequest> {
    let route = parse_model_path(path)?;
    debug!(model = %route.model, action = %route.action, streaming = route.streaming, "Transforming model call");

    let mut out_path = format!("{}:{}", INTERNAL_API_PREFIX, route.action);
    if route.streaming {
        out_path.push_str("?alt=sse");
    }

    let out_headers = build_headers(headers, &ctx.access_token, route.streaming, config);

    let out_body = match body {
        Some(bytes) => match serde_json::from_slice::<Value>(bytes) {
            Ok(value) => {
                let envelope = build_envelope(value, &ctx.project_id, &route.model, config.kind);
                // Envelope construction from parsed JSON cannot produce
                // unserializable values.
                Some(serde_json::to_vec(&envelope).unwrap_or_else(|_| bytes.to_vec()))
            }
            // Opaque bodies are forwarded as-is, never rejected.
            Err(_) => Some(bytes.to_vec()),
        },
        None => None,
    };

    Some(TransformedRequest {
        path: out_path,
        streaming: route.streaming,
        headers: out_headers,
        body: out_body,
        model: route.model,
    })
}

fn build_headers(
    incoming: &[(String, String)],
    access_token: &str,
    streaming: bool,
    config: &ProviderConfig,
) -> Vec<(String, String)> {
    let mut headers: Vec<(String, String)> = incoming
        .iter()
        .filter(|(name, _)| {
            let lower = name.to_ascii_lowercase();
            !STRIPPED_HEADERS.contains(&lower.as_str())
                && !config
                    .fixed_headers
                    .iter()
                    .any(|(fixed, _)| fixed.eq_ignore_ascii_case(&lower))
        })
        .map(|(name, value)| (name.to_ascii_lowercase(), value.clone()))
        .collect();

    headers.push(("authorization".to_string(), format!("Bearer {}", access_token)));
    for (name, value) in &config.fixed_headers {
        headers.push((name.to_string(), value.clone()));
    }
    if streaming {
        headers.retain(|(name, _)| name != "accept");
        headers.push(("accept".to_string(), "text/event-stream".to_string()));
    }
    headers
}

/// Wrap the request JSON in the internal envelope, unless it already is
/// one, then apply the provider-variant mutations.
fn build_envelope(body: Value, project_id: &str, model: &str, kind: ProviderKind) -> Value {
    let mut envelope = match &body {
        // Re-wrap guard: a body that already carries the envelope key was
        // produced by a previous pass.
        Value::Object(map) if map.contains_key("request") => body,
        _ => json!({
            "project": project_id,
            "model": model,
            "request": body,
        }),
    };
    if kind == ProviderKind::Agent {
        mutate_agent_envelope(&mut envelope);
    }
    envelope
}

/// Agent-flavor envelope mutations. Each is presence-checked so repeated
/// application is a no-op.
fn mutate_agent_envelope(envelope: &mut Value) {
    let Some(map) = envelope.as_object_mut() else {
        return;
    };

    // Promote the session id from request.labels to the top level; the
    // agent backend reads it there, the label stays for billing.
    if !map.contains_key("session_id") {
        let session_id = map
            .get("request")
            .and_then(|r| r.get("labels"))
            .and_then(|l| l.get("session_id"))
            .and_then(Value::as_str)
            .map(str::to_string);
        if let Some(session_id) = session_id {
            map.insert("session_id".to_string(), Value::String(session_id));
        }
    }

    if let Some(request) = map.get_mut("request").and_then(Value::as_object_mut) {
        rename_thinking_config(request);
    }

    if !map.contains_key("requestId") {
        map.insert(
            "requestId".to_string(),
            Value::String(uuid::Uuid::new_v4().to_string()),
        );
    }

    if !map.contains_key("userAgent") {
        map.insert(
            "userAgent".to_string(),
            Value::String("codeassist-gate".to_string()),
        );
    }
}

/// The agent backend only understands camelCase thinking configuration.
fn rename_thinking_config(request: &mut Map<String, Value>) {
    let Some(mut config) = request.remove("thinking_config") else {
        return;
    };
    if let Some(inner) = config.as_object_mut() {
        if let Some(v) = inner.remove("include_thoughts") {
            inner.entry("includeThoughts").or_insert(v);
        }
        if let Some(v) = inner.remove("thinking_budget") {
            inner.entry("thinkingBudget").or_insert(v);
        }
    }
    // An existing camelCase key wins; the snake_case duplicate is dropped.
    request.entry("thinkingConfig").or_insert(config);
}
