//! Host-facing surface: the authorize entry point and the fetch override.
//!
//! The embedding plugin hands every outbound API call to
//! [`Gateway::execute`]. Generation calls (`/v1beta/models/{model}:{action}`)
//! are authenticated, enveloped, and sent to the internal backend; anything
//! else passes through unmodified. Backend error statuses are returned as
//! responses, not errors — the caller sees exactly what the backend said.

use std::sync::Arc;

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use tracing::{debug, info, instrument, warn};

use crate::auth::{AuthorizeOptions, Credentials, HeadlessAttempt, OAuthFlow};
use crate::constants::ProviderConfig;
use crate::error::Result;
use crate::host::CredentialSink;
use crate::session::SessionManager;
use crate::transform::request::parse_model_path;
use crate::transform::{transform_request, SseRelay, TransformContext};

/// One outbound API call as the plugin saw it.
#[derive(Debug)]
pub struct OutboundCall {
    pub method: reqwest::Method,
    /// Path and query relative to the API base.
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl OutboundCall {
    pub fn new(method: reqwest::Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// POST with a JSON body, the shape of every generation call.
    pub fn post_json(path: impl Into<String>, body: &serde_json::Value) -> Self {
        let mut call = Self::new(reqwest::Method::POST, path);
        call.headers
            .push(("content-type".to_string(), "application/json".to_string()));
        // Value serialization cannot fail.
        call.body = serde_json::to_vec(body).ok();
        call
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Response body, buffered or streaming.
pub enum Body {
    Full(Bytes),
    Stream(BoxStream<'static, std::result::Result<Bytes, reqwest::Error>>),
}

impl std::fmt::Debug for Body {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Body::Full(bytes) => f.debug_tuple("Full").field(&bytes.len()).finish(),
            Body::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// What the plugin's caller receives back.
#[derive(Debug)]
pub struct ProxiedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Body,
}

impl ProxiedResponse {
    /// First header with the given name, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// The buffered body, or `None` for a streaming response.
    pub fn bytes(&self) -> Option<&Bytes> {
        match &self.body {
            Body::Full(bytes) => Some(bytes),
            Body::Stream(_) => None,
        }
    }
}

/// The assembled gateway: flow controller, session manager, HTTP client.
pub struct Gateway {
    config: ProviderConfig,
    flow: OAuthFlow,
    session: SessionManager,
    client: reqwest::Client,
    sink: Arc<dyn CredentialSink>,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("provider_id", &self.config.provider_id)
            .field("kind", &self.config.kind)
            .finish()
    }
}

impl Gateway {
    /// Assemble a gateway around a provider configuration and the host's
    /// credential sink.
    pub fn new(config: ProviderConfig, sink: Arc<dyn CredentialSink>) -> Self {
        let client = reqwest::Client::new();
        let flow = OAuthFlow::new(config.clone()).with_client(client.clone());
        let session = SessionManager::new(config.clone(), flow.clone(), sink.clone())
            .with_client(client.clone());
        Self {
            config,
            flow,
            session,
            client,
            sink,
        }
    }

    /// The session manager, for hosts that want direct token access.
    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    /// Rehydrate credentials persisted by the host in a previous run.
    pub async fn install_credentials(&self, credentials: Credentials) {
        self.session.set_credentials(credentials).await;
    }

    /// Run the interactive browser authorization and install the result.
    pub async fn authorize(&self) -> Result<Credentials> {
        self.authorize_with(AuthorizeOptions::default()).await
    }

    /// Interactive authorization with explicit options.
    #[instrument(skip(self, options))]
    pub async fn authorize_with(&self, options: AuthorizeOptions) -> Result<Credentials> {
        let credentials = self.flow.authorize_with(options).await?;
        self.install_and_persist(credentials.clone()).await;
        info!("Authorization complete");
        Ok(credentials)
    }

    /// Begin the headless (paste-a-code) authorization variant.
    pub fn begin_headless(&self) -> HeadlessAttempt {
        self.flow.begin_headless()
    }

    /// Finish a headless attempt with the code the user pasted.
    pub async fn complete_headless(
        &self,
        attempt: HeadlessAttempt,
        code: &str,
    ) -> Result<Credentials> {
        let credentials = self.flow.complete_headless(attempt, code).await?;
        self.install_and_persist(credentials.clone()).await;
        info!("Headless authorization complete");
        Ok(credentials)
    }

    async fn install_and_persist(&self, credentials: Credentials) {
        self.session.set_credentials(credentials.clone()).await;
        if let Err(e) = self
            .sink
            .persist(&self.config.provider_id, &credentials)
            .await
        {
            warn!(error = %e, "Failed to persist credentials to host storage");
        }
    }

    /// The fetch override: transform, send, and un-transform one call.
    #[instrument(skip(self, call), fields(path = %call.path))]
    pub async fn execute(&self, call: OutboundCall) -> Result<ProxiedResponse> {
        if parse_model_path(&call.path).is_none() {
            debug!("Pass-through call");
            return self.send_raw(call).await;
        }

        let access_token = self.session.get_access_token().await?;
        let project_id = self.session.project_id().await?;
        let ctx = TransformContext {
            access_token,
            project_id,
        };

        let transformed = match transform_request(
            &call.path,
            &call.headers,
            call.body.as_deref(),
            &ctx,
            &self.config,
        ) {
            Some(t) => t,
            None => return self.send_raw(call).await,
        };

        let url = format!("{}{}", self.config.base_url, transformed.path);
        let mut request = self.client.request(call.method, &url);
        for (name, value) in &transformed.headers {
            request = request.header(name, value);
        }
        if let Some(body) = transformed.body {
            request = request.body(body);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let headers = collect_headers(&response);

        if transformed.streaming && is_event_stream(&headers) {
            debug!(status, model = %transformed.model, "Relaying SSE stream");
            let stream = SseRelay::new(response.bytes_stream()).boxed();
            return Ok(ProxiedResponse {
                status,
                headers,
                body: Body::Stream(stream),
            });
        }

        let bytes = response.bytes().await?;
        // Non-JSON responses pass through untouched.
        let body = if is_json(&headers) {
            match crate::transform::unwrap_response_body(&bytes) {
                Some(unwrapped) => Bytes::from(unwrapped),
                None => bytes,
            }
        } else {
            bytes
        };
        debug!(status, model = %transformed.model, "Proxied call complete");
        Ok(ProxiedResponse {
            status,
            headers,
            body: Body::Full(body),
        })
    }

    /// Send a non-model call unmodified.
    async fn send_raw(&self, call: OutboundCall) -> Result<ProxiedResponse> {
        let url = format!("{}{}", self.config.base_url, call.path);
        let mut request = self.client.request(call.method, &url);
        for (name, value) in &call.headers {
            request = request.header(name, value);
        }
        if let Some(body) = call.body {
            request = request.body(body);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let headers = collect_headers(&response);
        let bytes = response.bytes().await?;
        Ok(ProxiedResponse {
            status,
            headers,
            body: Body::Full(bytes),
        })
    }
}

fn collect_headers(response: &reqwest::Response) -> Vec<(String, String)> {
    response
        .headers()
        .iter()
        .filter(|(name, _)| {
            // Body length may change after unwrapping.
            *name != reqwest::header::CONTENT_LENGTH && *name != reqwest::header::TRANSFER_ENCODING
        })
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.to_string(), v.to_string()))
        })
        .collect()
}

fn is_json(headers: &[(String, String)]) -> bool {
    headers
        .iter()
        .any(|(n, v)| n.eq_ignore_ascii_case("content-type") && v.contains("json"))
}

fn is_event_stream(headers: &[(String, String)]) -> bool {
    headers
        .iter()
        .any(|(n, v)| n.eq_ignore_ascii_case("content-type") && v.starts_with("text/event-stream"))
}
