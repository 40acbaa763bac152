//! OAuth credential pair with expiry tracking.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::EXPIRY_SAFETY_MARGIN;

/// A complete OAuth credential set.
///
/// Construction is all-or-nothing: both tokens are required, so a
/// `Credentials` value in hand is always usable. Ownership passes to the
/// session manager once the flow controller produces it; the host is
/// informed of changes through the persistence boundary but never co-owns
/// the value.
///
/// # Example
///
/// ```
/// use codeassist_gate::Credentials;
///
/// let creds = Credentials::new("ya29.access".into(), "1//refresh".into(), 3600);
/// assert!(!creds.needs_refresh());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Credentials {
    /// OAuth access token for API requests.
    pub access_token: String,

    /// OAuth refresh token for obtaining new access tokens.
    pub refresh_token: String,

    /// Unix timestamp when the access token expires.
    pub expires_at: i64,
}

impl Credentials {
    /// Create credentials expiring `expires_in` seconds from now.
    pub fn new(access_token: String, refresh_token: String, expires_in: i64) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            access_token,
            refresh_token,
            expires_at: now + expires_in,
        }
    }

    /// Create credentials with an absolute expiry timestamp.
    ///
    /// Useful when rehydrating from host storage.
    pub fn with_expires_at(access_token: String, refresh_token: String, expires_at: i64) -> Self {
        Self {
            access_token,
            refresh_token,
            expires_at,
        }
    }

    /// Whether the access token is expired or inside the safety buffer.
    ///
    /// The buffer (5 minutes) absorbs clock skew and request latency, so
    /// a token is refreshed before it can expire mid-request.
    pub fn needs_refresh(&self) -> bool {
        let now = chrono::Utc::now().timestamp();
        self.expires_at <= now + EXPIRY_SAFETY_MARGIN.as_secs() as i64
    }

    /// Duration until actual expiry, zero if already expired.
    pub fn time_until_expiry(&self) -> Duration {
        let now = chrono::Utc::now().timestamp();
        let remaining = self.expires_at - now;
        if remaining > 0 {
            Duration::from_secs(remaining as u64)
        } else {
            Duration::ZERO
        }
    }
}
