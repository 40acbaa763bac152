//! Error types for the Code Assist gateway.
//!
//! The taxonomy follows the two failure domains of the crate:
//!
//! - [`AuthError`] — failures of a single authorization attempt (browser
//!   launch, callback validation, token exchange)
//! - [`SessionError`] — failures of the long-lived session (missing
//!   credentials, refresh, project discovery)
//!
//! Transform failures in the response path never surface here; they are
//! recovered locally by passing the original response through.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Authorization attempt failure.
    #[error("auth error: {0}")]
    Auth(#[from] AuthError),

    /// Session lifecycle failure.
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// Network-level failure from the HTTP client.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// JSON (de)serialization failure.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Non-success response from a remote endpoint.
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body or error description.
        message: String,
    },

    /// An operation did not complete within its deadline.
    #[error("operation timed out")]
    Timeout,
}

impl Error {
    /// Construct an API error from a status code and message body.
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Error::Api {
            status,
            message: message.into(),
        }
    }
}

/// Failures of a single OAuth authorization attempt.
///
/// Each variant corresponds to a terminal state of the flow controller;
/// none of them are retried automatically.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The default browser could not be opened.
    ///
    /// Recoverable by manual navigation when the authorization URL was
    /// still surfaced to the user; terminal otherwise.
    #[error("failed to launch browser: {0}")]
    BrowserLaunch(String),

    /// The provider reported an authorization failure on the callback.
    #[error("provider returned '{error}': {description}")]
    Callback {
        /// OAuth error code (e.g. `access_denied`).
        error: String,
        /// Human-readable description, if the provider sent one.
        description: String,
    },

    /// The callback `state` did not exactly match the attempt's nonce.
    /// Possible CSRF; always terminal.
    #[error("state parameter mismatch")]
    StateMismatch,

    /// The callback query matched neither the success nor the failure
    /// shape. Treated as a protocol violation, never silently ignored.
    #[error("malformed callback: {0}")]
    Protocol(String),

    /// Code-for-token or refresh-for-token exchange was rejected.
    #[error("token exchange failed: {0}")]
    ExchangeFailed(String),

    /// The provider reported `invalid_grant` (revoked or expired grant).
    #[error("grant is invalid or revoked, re-authentication required")]
    InvalidGrant,

    /// The token response omitted a mandatory token.
    ///
    /// A provider that withholds the refresh token (e.g. on repeat
    /// consent) must not silently produce an unusable session.
    #[error("token response missing {0}")]
    MissingToken(&'static str),
}

/// Failures of the credential/session lifecycle.
#[derive(Debug, Error)]
pub enum SessionError {
    /// No credentials have been installed.
    #[error("not authenticated: no credentials installed")]
    NoTokens,

    /// A required token refresh failed.
    #[error("token refresh failed: {0}")]
    RefreshFailed(String),

    /// Project discovery was rejected with a non-401 client error.
    #[error("project discovery rejected (HTTP {status})")]
    ProjectClient {
        /// The 4xx status returned by the backend.
        status: u16,
    },

    /// Project discovery hit a backend server error.
    #[error("project discovery unavailable (HTTP {status})")]
    ProjectServer {
        /// The 5xx status returned by the backend.
        status: u16,
    },

    /// Project discovery returned an unusable payload.
    #[error("project discovery failed: {0}")]
    ProjectDiscovery(String),
}
