//! Project discovery through the `loadCodeAssist` endpoint.
//!
//! Every Code Assist call is billed against a Cloud project; for managed
//! accounts the backend picks one and reports it here. Discovery runs once
//! per session and the result is cached by the session manager.

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::constants::{ProviderConfig, ProviderKind, API_PATH_LOAD_CODE_ASSIST};
use crate::error::{Error, Result, SessionError};

/// Subscription tier reported by `loadCodeAssist`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionTier {
    Free,
    Legacy,
    Standard,
    /// A tier id this crate does not know about.
    Unknown,
}

impl SubscriptionTier {
    fn from_id(id: &str) -> Self {
        match id {
            "free-tier" => SubscriptionTier::Free,
            "legacy-tier" => SubscriptionTier::Legacy,
            "standard-tier" => SubscriptionTier::Standard,
            _ => SubscriptionTier::Unknown,
        }
    }
}

/// The discovered project binding for the current credential set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectInfo {
    /// Cloud project id all generation calls are attributed to.
    pub project_id: String,
    /// Subscription tier of the account.
    pub tier: SubscriptionTier,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LoadCodeAssistRequest {
    metadata: ClientMetadata,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ClientMetadata {
    ide_type: &'static str,
    platform: &'static str,
    plugin_type: &'static str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoadCodeAssistResponse {
    #[serde(default)]
    cloudaicompanion_project: Option<String>,
    #[serde(default)]
    current_tier: Option<TierInfo>,
}

#[derive(Debug, Deserialize)]
struct TierInfo {
    #[serde(default)]
    id: Option<String>,
}

/// Ask the backend which project this account is bound to.
///
/// Non-success statuses surface as [`Error::Api`] so the caller can decide
/// whether the failure is worth a token refresh (401-class) or terminal.
#[instrument(skip(client, config, access_token))]
pub(crate) async fn load_code_assist(
    client: &reqwest::Client,
    config: &ProviderConfig,
    access_token: &str,
) -> Result<ProjectInfo> {
    let url = format!("{}{}", config.base_url, API_PATH_LOAD_CODE_ASSIST);
    let body = LoadCodeAssistRequest {
        metadata: ClientMetadata {
            ide_type: "IDE_UNSPECIFIED",
            platform: "PLATFORM_UNSPECIFIED",
            plugin_type: match config.kind {
                ProviderKind::Standard => "GEMINI",
                ProviderKind::Agent => "AGENT",
            },
        },
    };

    let mut request = client
        .post(&url)
        .bearer_auth(access_token)
        .json(&body);
    for (name, value) in &config.fixed_headers {
        request = request.header(*name, value);
    }

    let response = request.send().await?;
    let status = response.status();
    let text = response.text().await?;

    if !status.is_success() {
        return Err(Error::api(status.as_u16(), text));
    }

    let parsed: LoadCodeAssistResponse = serde_json::from_str(&text).map_err(|e| {
        Error::Session(SessionError::ProjectDiscovery(format!(
            "unparseable response: {}",
            e
        )))
    })?;

    let project_id = parsed.cloudaicompanion_project.ok_or_else(|| {
        Error::Session(SessionError::ProjectDiscovery(
            "response carried no project id".to_string(),
        ))
    })?;
    let tier = parsed
        .current_tier
        .and_then(|t| t.id)
        .map(|id| SubscriptionTier::from_id(&id))
        .unwrap_or(SubscriptionTier::Unknown);

    debug!(project = %project_id, tier = ?tier, "Project discovered");
    Ok(ProjectInfo { project_id, tier })
}
