//! OAuth session engine and request proxy for Google's Code Assist API.
//!
//! This crate gives a CLI AI-assistant plugin everything it needs to call
//! the internal Code Assist backend with a personal Google account:
//!
//! - **Authentication**: browser-based OAuth 2.0 authorization-code flow
//!   with a single-use loopback callback server, plus a headless
//!   paste-a-code variant with PKCE.
//! - **Session management**: proactive token refresh (5-minute expiry
//!   buffer, single-flight under concurrency) and per-session project
//!   discovery via `loadCodeAssist`.
//! - **Request proxying**: rewrites public `/v1beta/models/{model}:{action}`
//!   calls into internal `/v1internal:{action}` calls with the
//!   `{"project", "model", "request"}` envelope, and unwraps the
//!   `{"response": ...}` envelope on the way back — incrementally for SSE
//!   streams.
//!
//! The host supplies durable credential storage through the
//! [`CredentialSink`] trait and observes the crate through `tracing`;
//! nothing here touches disk, keychain, or global state.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use codeassist_gate::{Gateway, MemorySink, OutboundCall, ProviderConfig};
//!
//! # async fn run() -> codeassist_gate::Result<()> {
//! let config = ProviderConfig::standard("client-id", "client-secret");
//! let gateway = Gateway::new(config, Arc::new(MemorySink::new()));
//!
//! // One-time browser authorization; credentials land in the sink.
//! gateway.authorize().await?;
//!
//! // From here every call is authenticated and enveloped transparently.
//! let call = OutboundCall::post_json(
//!     "/v1beta/models/gemini-2.0-flash:generateContent",
//!     &serde_json::json!({ "contents": [{ "parts": [{ "text": "hi" }] }] }),
//! );
//! let response = gateway.execute(call).await?;
//! assert_eq!(response.status, 200);
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod constants;
pub mod error;
pub mod gateway;
pub mod host;
pub mod session;
pub mod transform;

pub use auth::{AuthorizeOptions, CallbackServer, Credentials, HeadlessAttempt, OAuthFlow, PkcePair};
pub use constants::{ProviderConfig, ProviderKind};
pub use error::{AuthError, Error, Result, SessionError};
pub use gateway::{Body, Gateway, OutboundCall, ProxiedResponse};
pub use host::{CredentialSink, MemorySink};
pub use session::{ProjectInfo, SessionManager, SubscriptionTier};
