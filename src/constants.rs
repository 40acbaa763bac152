//! Provider configuration and Code Assist API constants.
//!
//! All configuration is carried by explicit immutable values injected at
//! construction time — nothing in this crate reads ambient global state.
//! The two backend flavors share most behavior and are modeled as
//! [`ProviderKind`], a closed set selected when the gateway is built.

use std::time::Duration;

// ============================================================================
// API Endpoints
// ============================================================================

/// Production Code Assist API endpoint.
pub const CODE_ASSIST_ENDPOINT: &str = "https://cloudcode-pa.googleapis.com";

/// API path for project discovery.
pub const API_PATH_LOAD_CODE_ASSIST: &str = "/v1internal:loadCodeAssist";

/// Internal API version prefix for generation calls.
pub const INTERNAL_API_PREFIX: &str = "/v1internal";

/// Fixed path the local callback server answers on.
pub const CALLBACK_PATH: &str = "/oauth2callback";

// ============================================================================
// Timeouts and safety margins
// ============================================================================

/// Safety buffer for access-token expiry checks.
///
/// Tokens are treated as expired this long before their actual expiry to
/// absorb clock skew and request latency.
pub const EXPIRY_SAFETY_MARGIN: Duration = Duration::from_secs(5 * 60);

/// Default deadline for a browser-based authorization attempt.
pub const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(5 * 60);

// ============================================================================
// Provider configuration
// ============================================================================

/// Which backend flavor this gateway speaks to.
///
/// Both flavors share the OAuth flow and the envelope format; they differ
/// in fixed headers and in a handful of envelope mutations (see
/// `transform::request`). The kind is fixed at construction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    /// Plain Code Assist backend.
    Standard,
    /// Agent-flavored backend: expects a top-level session id, camelCase
    /// thinking configuration, and per-request agent metadata.
    Agent,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::Standard => write!(f, "standard"),
            ProviderKind::Agent => write!(f, "agent"),
        }
    }
}

/// Immutable OAuth and backend configuration for one provider variant.
///
/// Constructed once and injected into the flow controller, session manager,
/// and gateway. The `base_url` is overridable for tests.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Identifier used when persisting credentials through the host.
    pub provider_id: String,
    /// OAuth client ID.
    pub client_id: String,
    /// OAuth client secret (public by design for installed apps).
    pub client_secret: String,
    /// Authorization endpoint for the browser redirect.
    pub auth_url: String,
    /// Token endpoint for code exchange and refresh.
    pub token_url: String,
    /// Requested OAuth scopes.
    pub scopes: Vec<String>,
    /// Code Assist API base URL.
    pub base_url: String,
    /// Backend flavor.
    pub kind: ProviderKind,
    /// Fixed headers merged into every transformed request.
    pub fixed_headers: Vec<(&'static str, String)>,
    /// Deadline for a single authorization attempt.
    pub auth_timeout: Duration,
}

impl ProviderConfig {
    /// Standard Code Assist configuration with Google endpoints.
    pub fn standard(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            provider_id: "google".to_string(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            auth_url: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
            token_url: "https://oauth2.googleapis.com/token".to_string(),
            scopes: vec![
                "https://www.googleapis.com/auth/cloud-platform".to_string(),
                "https://www.googleapis.com/auth/userinfo.email".to_string(),
                "https://www.googleapis.com/auth/userinfo.profile".to_string(),
            ],
            base_url: CODE_ASSIST_ENDPOINT.to_string(),
            kind: ProviderKind::Standard,
            fixed_headers: vec![
                ("user-agent", "codeassist-gate".to_string()),
                ("x-goog-api-client", "gl-rust/codeassist-gate".to_string()),
                (
                    "client-metadata",
                    r#"{"ideType":"IDE_UNSPECIFIED","platform":"PLATFORM_UNSPECIFIED","pluginType":"GEMINI"}"#
                        .to_string(),
                ),
            ],
            auth_timeout: DEFAULT_AUTH_TIMEOUT,
        }
    }

    /// Agent-flavored configuration.
    ///
    /// Same endpoints and scopes as [`ProviderConfig::standard`], but the
    /// transformer applies the agent envelope mutations and the client
    /// metadata identifies the agent surface.
    pub fn agent(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        let mut config = Self::standard(client_id, client_secret);
        config.provider_id = "google-agent".to_string();
        config.kind = ProviderKind::Agent;
        config.fixed_headers = vec![
            ("user-agent", "codeassist-gate".to_string()),
            ("x-goog-api-client", "gl-rust/codeassist-gate".to_string()),
            (
                "client-metadata",
                r#"{"ideType":"IDE_UNSPECIFIED","platform":"PLATFORM_UNSPECIFIED","pluginType":"AGENT"}"#
                    .to_string(),
            ),
        ];
        config
    }

    /// Override the Code Assist base URL (used by tests to point at a mock).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Override the authorization attempt deadline.
    pub fn with_auth_timeout(mut self, timeout: Duration) -> Self {
        self.auth_timeout = timeout;
        self
    }

    /// Override the OAuth endpoints (used by tests to point at a mock).
    pub fn with_oauth_urls(
        mut self,
        auth_url: impl Into<String>,
        token_url: impl Into<String>,
    ) -> Self {
        self.auth_url = auth_url.into();
        self.token_url = token_url.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_config_uses_google_endpoints() {
        let config = ProviderConfig::standard("id", "secret");
        assert!(config.auth_url.starts_with("https://accounts.google.com/"));
        assert!(config.token_url.starts_with("https://oauth2.googleapis.com/"));
        assert_eq!(config.kind, ProviderKind::Standard);
    }

    #[test]
    fn test_agent_config_differs_in_kind_and_metadata() {
        let config = ProviderConfig::agent("id", "secret");
        assert_eq!(config.kind, ProviderKind::Agent);
        let metadata = config
            .fixed_headers
            .iter()
            .find(|(name, _)| *name == "client-metadata")
            .map(|(_, value)| value.clone())
            .unwrap();
        assert!(metadata.contains("AGENT"));
    }

    #[test]
    fn test_base_url_override() {
        let config = ProviderConfig::standard("id", "secret").with_base_url("http://localhost:1");
        assert_eq!(config.base_url, "http://localhost:1");
    }

    #[test]
    fn test_scopes_include_cloud_platform() {
        let config = ProviderConfig::standard("id", "secret");
        assert!(config
            .scopes
            .iter()
            .any(|s| s.contains("cloud-platform")));
    }
}
