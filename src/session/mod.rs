//! Long-lived session state: credential lifecycle and project binding.
//!
//! The [`SessionManager`] is the single owner of the current credential
//! set. Every outbound call funnels through [`SessionManager::get_access_token`],
//! which refreshes inside the 5-minute expiry buffer with single-flight
//! semantics: the refresh path takes the write lock and re-checks freshness
//! under it, so any number of concurrent expired observers produce exactly
//! one network refresh.

pub mod discovery;

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

pub use discovery::{ProjectInfo, SubscriptionTier};

use crate::auth::{Credentials, OAuthFlow};
use crate::constants::ProviderConfig;
use crate::error::{Error, Result, SessionError};
use crate::host::CredentialSink;

/// Owns credentials and the cached project binding for one provider.
pub struct SessionManager {
    config: ProviderConfig,
    flow: OAuthFlow,
    client: reqwest::Client,
    sink: Arc<dyn CredentialSink>,
    credentials: RwLock<Option<Credentials>>,
    project: RwLock<Option<ProjectInfo>>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("provider_id", &self.config.provider_id)
            .finish()
    }
}

impl SessionManager {
    /// Create a session manager with no credentials installed.
    pub fn new(config: ProviderConfig, flow: OAuthFlow, sink: Arc<dyn CredentialSink>) -> Self {
        Self {
            config,
            flow,
            client: reqwest::Client::new(),
            sink,
            credentials: RwLock::new(None),
            project: RwLock::new(None),
        }
    }

    /// Use a custom HTTP client for discovery calls.
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Install a credential set, replacing any previous one.
    ///
    /// Idempotent overwrite. The cached project binding is dropped since a
    /// new credential set may belong to a different account.
    pub async fn set_credentials(&self, credentials: Credentials) {
        {
            let mut guard = self.credentials.write().await;
            *guard = Some(credentials);
        }
        let mut project = self.project.write().await;
        if project.take().is_some() {
            debug!("Cleared cached project binding after credential change");
        }
    }

    /// A clone of the currently installed credentials, if any.
    pub async fn credentials(&self) -> Option<Credentials> {
        self.credentials.read().await.clone()
    }

    /// Whether a credential set is installed.
    pub async fn is_authenticated(&self) -> bool {
        self.credentials.read().await.is_some()
    }

    /// A usable access token, refreshed if necessary, with the project
    /// binding resolved.
    ///
    /// This is the only token accessor the proxy path uses. The returned
    /// token is re-read from the installed credentials after project
    /// resolution: discovery may have forced a refresh of a token the
    /// backend rejected despite a healthy expiry, and the caller must get
    /// the replacement, not the revoked one.
    #[instrument(skip(self))]
    pub async fn get_access_token(&self) -> Result<String> {
        let needs_refresh = {
            let guard = self.credentials.read().await;
            guard
                .as_ref()
                .ok_or(SessionError::NoTokens)?
                .needs_refresh()
        };
        if needs_refresh {
            self.refresh_credentials(false).await?;
        }

        self.ensure_project().await?;

        let guard = self.credentials.read().await;
        Ok(guard
            .as_ref()
            .ok_or(SessionError::NoTokens)?
            .access_token
            .clone())
    }

    /// The project id all generation calls are attributed to.
    pub async fn project_id(&self) -> Result<String> {
        Ok(self.ensure_project().await?.project_id)
    }

    /// Refresh under the write lock.
    ///
    /// Unless `force`, freshness is re-checked under the lock: a caller
    /// that lost the race to another refresher returns the winner's token
    /// without touching the network.
    async fn refresh_credentials(&self, force: bool) -> Result<String> {
        let mut guard = self.credentials.write().await;
        let current = guard.as_ref().ok_or(SessionError::NoTokens)?;

        if !force && !current.needs_refresh() {
            debug!("Credentials already refreshed by a concurrent caller");
            return Ok(current.access_token.clone());
        }

        info!("Refreshing access token");
        let refreshed = self.flow.refresh(current).await.map_err(|e| match e {
            // Revoked grant needs re-authentication; keep it typed.
            Error::Auth(crate::error::AuthError::InvalidGrant) => e,
            other => Error::Session(SessionError::RefreshFailed(other.to_string())),
        })?;

        if let Err(e) = self
            .sink
            .persist(&self.config.provider_id, &refreshed)
            .await
        {
            warn!(error = %e, "Failed to persist refreshed credentials");
        }

        let token = refreshed.access_token.clone();
        *guard = Some(refreshed);
        Ok(token)
    }

    /// Resolve and cache the project binding.
    ///
    /// A 401-class rejection gets exactly one forced refresh and retry;
    /// every other failure is surfaced immediately.
    async fn ensure_project(&self) -> Result<ProjectInfo> {
        if let Some(info) = self.project.read().await.as_ref() {
            return Ok(info.clone());
        }

        let mut guard = self.project.write().await;
        if let Some(info) = guard.as_ref() {
            return Ok(info.clone());
        }

        let token = {
            let creds = self.credentials.read().await;
            creds
                .as_ref()
                .ok_or(SessionError::NoTokens)?
                .access_token
                .clone()
        };

        let info = match discovery::load_code_assist(&self.client, &self.config, &token).await {
            Ok(info) => info,
            Err(Error::Api { status, .. }) if status == 401 || status == 403 => {
                debug!(status, "Project discovery rejected, refreshing once");
                let token = self.refresh_credentials(true).await?;
                discovery::load_code_assist(&self.client, &self.config, &token)
                    .await
                    .map_err(classify_discovery_error)?
            }
            Err(e) => return Err(classify_discovery_error(e)),
        };

        info!(project = %info.project_id, "Session bound to project");
        *guard = Some(info.clone());
        Ok(info)
    }
}

/// Map raw discovery statuses onto the session error taxonomy.
fn classify_discovery_error(e: Error) -> Error {
    match e {
        Error::Api { status, .. } if (400..500).contains(&status) => {
            Error::Session(SessionError::ProjectClient { status })
        }
        Error::Api { status, .. } if status >= 500 => {
            Error::Session(SessionError::ProjectServer { status })
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MemorySink;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn manager_for(server_uri: &str) -> SessionManager {
        let config = ProviderConfig::standard("id", "secret")
            .with_base_url(server_uri)
            .with_oauth_urls("unused", format!("{}/token", server_uri));
        let flow = OAuthFlow::new(config.clone());
        SessionManager::new(config, flow, Arc::new(MemorySink::new()))
    }

    fn fresh_credentials() -> Credentials {
        Credentials::new("fresh-at".into(), "rt".into(), 3600)
    }

    fn expired_credentials() -> Credentials {
        Credentials::with_expires_at("stale-at".into(), "rt".into(), 0)
    }

    async fn mount_discovery(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/v1internal:loadCodeAssist"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "cloudaicompanionProject": "proj-1",
                "currentTier": { "id": "free-tier" }
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_no_credentials_is_typed_error() {
        let manager = manager_for("http://127.0.0.1:1");
        let result = manager.get_access_token().await;
        assert!(matches!(
            result,
            Err(Error::Session(SessionError::NoTokens))
        ));
    }

    #[tokio::test]
    async fn test_fresh_token_skips_refresh() {
        let server = MockServer::start().await;
        mount_discovery(&server).await;
        // No /token mock mounted: any refresh attempt would fail loudly.

        let manager = manager_for(&server.uri());
        manager.set_credentials(fresh_credentials()).await;

        let token = manager.get_access_token().await.unwrap();
        assert_eq!(token, "fresh-at");
    }

    #[tokio::test]
    async fn test_expired_token_is_refreshed_and_persisted() {
        let server = MockServer::start().await;
        mount_discovery(&server).await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "renewed-at",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;

        let config = ProviderConfig::standard("id", "secret")
            .with_base_url(server.uri())
            .with_oauth_urls("unused", format!("{}/token", server.uri()));
        let sink = Arc::new(MemorySink::new());
        let manager = SessionManager::new(
            config.clone(),
            OAuthFlow::new(config),
            sink.clone(),
        );
        manager.set_credentials(expired_credentials()).await;

        let token = manager.get_access_token().await.unwrap();
        assert_eq!(token, "renewed-at");
        assert_eq!(sink.latest().await.unwrap().access_token, "renewed-at");
    }

    #[tokio::test]
    async fn test_project_cached_after_first_resolution() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1internal:loadCodeAssist"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "cloudaicompanionProject": "proj-1"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let manager = manager_for(&server.uri());
        manager.set_credentials(fresh_credentials()).await;

        assert_eq!(manager.project_id().await.unwrap(), "proj-1");
        assert_eq!(manager.project_id().await.unwrap(), "proj-1");
    }

    #[tokio::test]
    async fn test_new_credentials_clear_project_cache() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1internal:loadCodeAssist"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "cloudaicompanionProject": "proj-1"
            })))
            .expect(2)
            .mount(&server)
            .await;

        let manager = manager_for(&server.uri());
        manager.set_credentials(fresh_credentials()).await;
        manager.project_id().await.unwrap();

        manager.set_credentials(fresh_credentials()).await;
        manager.project_id().await.unwrap();
    }

    #[tokio::test]
    async fn test_discovery_401_triggers_single_refresh_retry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1internal:loadCodeAssist"))
            .respond_with(ResponseTemplate::new(401).set_body_string("expired"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1internal:loadCodeAssist"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "cloudaicompanionProject": "proj-after-retry"
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "renewed-at",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;

        let manager = manager_for(&server.uri());
        manager.set_credentials(fresh_credentials()).await;

        assert_eq!(manager.project_id().await.unwrap(), "proj-after-retry");
    }

    #[tokio::test]
    async fn test_token_returned_after_discovery_forced_refresh() {
        // A token can be healthy by expiry yet revoked server-side.
        // Discovery sees the 401, forces a refresh, and the caller must
        // receive the replacement token, not the rejected one.
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1internal:loadCodeAssist"))
            .respond_with(ResponseTemplate::new(401).set_body_string("revoked"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1internal:loadCodeAssist"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "cloudaicompanionProject": "proj-1"
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "renewed-at",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;

        let manager = manager_for(&server.uri());
        manager
            .set_credentials(Credentials::new("revoked-at".into(), "rt".into(), 3600))
            .await;

        let token = manager.get_access_token().await.unwrap();
        assert_eq!(token, "renewed-at");
    }

    #[tokio::test]
    async fn test_discovery_server_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1internal:loadCodeAssist"))
            .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
            .expect(1)
            .mount(&server)
            .await;

        let manager = manager_for(&server.uri());
        manager.set_credentials(fresh_credentials()).await;

        let result = manager.project_id().await;
        assert!(matches!(
            result,
            Err(Error::Session(SessionError::ProjectServer { status: 503 }))
        ));
    }

    #[tokio::test]
    async fn test_discovery_client_error_is_terminal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1internal:loadCodeAssist"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;

        let manager = manager_for(&server.uri());
        manager.set_credentials(fresh_credentials()).await;

        let result = manager.project_id().await;
        assert!(matches!(
            result,
            Err(Error::Session(SessionError::ProjectClient { status: 429 }))
        ));
    }
}
