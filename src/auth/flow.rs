//! OAuth 2.0 authorization-code flow controller.
//!
//! One authorization attempt walks the states
//! `Idle -> AwaitingUserAction -> AwaitingCallback -> Validating ->
//! Exchanging -> Complete | Failed`. Two variants exist:
//!
//! - **Interactive**: spin up the loopback [`CallbackServer`], open the
//!   user's browser at the authorization URL, await the redirect.
//! - **Headless**: no local redirect is possible; print the authorization
//!   URL (with a PKCE challenge) and exchange a code the user pastes back.
//!
//! Google requires `access_type=offline` and `prompt=consent` to return a
//! refresh token; a response missing either token is a hard failure, since
//! a session without a refresh token would silently die within the hour.

use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use crate::auth::callback::{CallbackOutcome, CallbackServer};
use crate::auth::pkce::{generate_state, PkcePair};
use crate::auth::token::Credentials;
use crate::constants::ProviderConfig;
use crate::error::{AuthError, Error, Result};

/// Redirect target for the headless variant: the provider displays the
/// authorization code for the user to copy instead of redirecting.
const HEADLESS_REDIRECT_URI: &str = "https://codeassist.google.com/authcode";

/// Controls for one interactive authorization attempt.
pub struct AuthorizeOptions {
    /// Attempt to open the default browser (best-effort).
    pub launch_browser: bool,
    /// Treat a failed browser launch as terminal. Set when the browser is
    /// the sole navigation mechanism and the URL is not surfaced anywhere.
    pub require_browser: bool,
    /// Called with the authorization URL so the host can surface it for
    /// manual navigation.
    pub on_auth_url: Option<Box<dyn Fn(&str) + Send + Sync>>,
}

impl Default for AuthorizeOptions {
    fn default() -> Self {
        Self {
            launch_browser: true,
            require_browser: false,
            on_auth_url: None,
        }
    }
}

impl std::fmt::Debug for AuthorizeOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizeOptions")
            .field("launch_browser", &self.launch_browser)
            .field("require_browser", &self.require_browser)
            .field("has_url_sink", &self.on_auth_url.is_some())
            .finish()
    }
}

/// An in-progress headless authorization attempt.
///
/// Holds the PKCE verifier and nonce for this attempt only; dropped when
/// the attempt resolves, never reused.
#[derive(Debug)]
pub struct HeadlessAttempt {
    auth_url: String,
    pkce: PkcePair,
}

impl HeadlessAttempt {
    /// The authorization URL to show the user.
    pub fn auth_url(&self) -> &str {
        &self.auth_url
    }
}

/// Orchestrates authorization attempts and token refresh against one
/// provider configuration.
#[derive(Debug, Clone)]
pub struct OAuthFlow {
    config: ProviderConfig,
    client: reqwest::Client,
}

impl OAuthFlow {
    /// Create a flow controller for the given provider configuration.
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Use a custom HTTP client (testing, custom TLS).
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// The provider configuration this flow was built with.
    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Build the authorization URL for a given redirect target and nonce.
    ///
    /// `access_type=offline` and `prompt=consent` are always sent so the
    /// provider returns a refresh token. The PKCE challenge is appended
    /// only for the headless variant.
    pub fn build_authorization_url(
        &self,
        redirect_uri: &str,
        state: &str,
        pkce: Option<&PkcePair>,
    ) -> String {
        let scopes = self.config.scopes.join(" ");
        let mut url = format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&state={}&access_type=offline&prompt=consent",
            self.config.auth_url,
            urlencoding::encode(&self.config.client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(&scopes),
            urlencoding::encode(state),
        );
        if let Some(pkce) = pkce {
            url.push_str(&format!(
                "&code_challenge={}&code_challenge_method=S256",
                urlencoding::encode(&pkce.challenge)
            ));
        }
        url
    }

    /// Run one interactive authorization attempt with default options.
    pub async fn authorize(&self) -> Result<Credentials> {
        self.authorize_with(AuthorizeOptions::default()).await
    }

    /// Run one interactive authorization attempt.
    ///
    /// Starts the callback server, directs the user's browser at the
    /// authorization URL, and blocks until the redirect arrives or the
    /// configured deadline elapses. The callback server is torn down on
    /// every terminal path.
    #[instrument(skip(self, options))]
    pub async fn authorize_with(&self, options: AuthorizeOptions) -> Result<Credentials> {
        let state = generate_state();
        let server = CallbackServer::bind().await?;
        let redirect_uri = server.redirect_uri().to_string();
        let auth_url = self.build_authorization_url(&redirect_uri, &state, None);

        info!("Awaiting authorization in browser");
        if let Some(sink) = &options.on_auth_url {
            sink(&auth_url);
        }

        if options.launch_browser {
            if let Err(e) = open::that(&auth_url) {
                warn!(error = %e, "Failed to launch browser");
                if options.require_browser {
                    return Err(Error::Auth(AuthError::BrowserLaunch(e.to_string())));
                }
            }
        }

        let outcome = server.wait(self.config.auth_timeout).await?;

        match outcome {
            CallbackOutcome::Success {
                code,
                state: returned,
            } => {
                // Exact equality. A mismatch is possible CSRF and is
                // terminal even when a code is present.
                if returned != state {
                    return Err(Error::Auth(AuthError::StateMismatch));
                }
                self.exchange_code(&code, &redirect_uri, None).await
            }
            CallbackOutcome::ProviderError {
                error,
                error_description,
                ..
            } => Err(Error::Auth(AuthError::Callback {
                error,
                description: error_description.unwrap_or_else(|| "no description".to_string()),
            })),
            CallbackOutcome::Protocol { query } => Err(Error::Auth(AuthError::Protocol(format!(
                "callback query matched neither success nor failure shape: {}",
                query
            )))),
        }
    }

    /// Begin a headless authorization attempt.
    ///
    /// Returns the attempt handle whose [`HeadlessAttempt::auth_url`] the
    /// host must surface to the user; the user pastes the resulting code
    /// into [`OAuthFlow::complete_headless`].
    pub fn begin_headless(&self) -> HeadlessAttempt {
        let pkce = PkcePair::generate();
        let state = generate_state();
        let auth_url =
            self.build_authorization_url(HEADLESS_REDIRECT_URI, &state, Some(&pkce));
        HeadlessAttempt { auth_url, pkce }
    }

    /// Exchange a pasted authorization code from a headless attempt.
    pub async fn complete_headless(
        &self,
        attempt: HeadlessAttempt,
        code: &str,
    ) -> Result<Credentials> {
        self.exchange_code(code, HEADLESS_REDIRECT_URI, Some(&attempt.pkce.verifier))
            .await
    }

    /// Exchange an authorization code for a credential pair.
    ///
    /// Both tokens are mandatory; a provider that omits the refresh token
    /// (e.g. on repeat consent without `prompt=consent`) fails the attempt
    /// rather than producing a session that cannot outlive its first hour.
    #[instrument(skip(self, code, verifier))]
    pub async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
        verifier: Option<&str>,
    ) -> Result<Credentials> {
        debug!("Exchanging authorization code for tokens");

        let mut form = vec![
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("code", code),
            ("grant_type", "authorization_code"),
            ("redirect_uri", redirect_uri),
        ];
        if let Some(verifier) = verifier {
            form.push(("code_verifier", verifier));
        }

        let token = self.post_token_endpoint(&form).await?;

        let refresh_token = token
            .refresh_token
            .ok_or(Error::Auth(AuthError::MissingToken("refresh_token")))?;
        if token.access_token.is_empty() {
            return Err(Error::Auth(AuthError::MissingToken("access_token")));
        }

        debug!("Token exchange successful");
        Ok(Credentials::new(
            token.access_token,
            refresh_token,
            token.expires_in,
        ))
    }

    /// Refresh an access token.
    ///
    /// Requires a new access token in the response; reuses the previous
    /// refresh token when the provider does not rotate it (Google usually
    /// does not).
    #[instrument(skip(self, current))]
    pub async fn refresh(&self, current: &Credentials) -> Result<Credentials> {
        debug!("Refreshing access token");

        let form = [
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("refresh_token", current.refresh_token.as_str()),
            ("grant_type", "refresh_token"),
        ];

        let token = self.post_token_endpoint(&form).await?;

        if token.access_token.is_empty() {
            return Err(Error::Auth(AuthError::MissingToken("access_token")));
        }
        let refresh_token = token
            .refresh_token
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| current.refresh_token.clone());

        debug!("Token refresh successful");
        Ok(Credentials::new(
            token.access_token,
            refresh_token,
            token.expires_in,
        ))
    }

    /// POST a form to the token endpoint and parse the response.
    async fn post_token_endpoint(&self, form: &[(&str, &str)]) -> Result<TokenResponse> {
        let response = self
            .client
            .post(&self.config.token_url)
            .form(form)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            if let Ok(error) = serde_json::from_str::<TokenErrorResponse>(&body) {
                warn!(
                    error = %error.error,
                    description = ?error.error_description,
                    "Token endpoint rejected request"
                );
                if error.error == "invalid_grant" {
                    return Err(Error::Auth(AuthError::InvalidGrant));
                }
                return Err(Error::Auth(AuthError::ExchangeFailed(
                    error.error_description.unwrap_or(error.error),
                )));
            }
            return Err(Error::api(status.as_u16(), body));
        }

        serde_json::from_str(&body)
            .map_err(|e| Error::Auth(AuthError::ExchangeFailed(format!("parse failure: {}", e))))
    }
}

/// Success response from the token endpoint.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    expires_in: i64,
}

/// Error response from the token endpoint.
#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}
