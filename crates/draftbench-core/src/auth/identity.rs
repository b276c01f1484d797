//! Identity providers: the remote identity service and the stand-in record.
//!
//! The provider strategy is chosen once at construction time so the session
//! controller stays provider-agnostic. Bypass-auth mode (test_mode +
//! development) substitutes a fixed record and never touches the network.

use std::future::Future;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::config::Config;

/// Authenticated user profile as returned by `GET /user`.
///
/// Replaced wholesale on each successful fetch; never mutated locally.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserRecord {
    pub id: String,
    pub email: String,
    pub name: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    /// Avatar URL; blanked in test mode for deterministic visual diffs.
    pub image: String,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

/// Error envelope returned by the identity service.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error_code: Option<String>,
    message: Option<String>,
}

/// Source of the authenticated user record.
pub trait IdentityProvider {
    /// Fetches the current user, attaching the bearer token when present.
    fn fetch_user(&self, token: Option<&str>) -> impl Future<Output = Result<UserRecord>> + Send;
}

/// Identity provider backed by the remote Draftbench API.
#[derive(Debug, Clone)]
pub struct RemoteIdentity {
    client: reqwest::Client,
    base_url: String,
    blank_avatar: bool,
}

impl RemoteIdentity {
    pub fn new(base_url: &str, blank_avatar: bool) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            blank_avatar,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.api_base_url, config.test_mode)
    }
}

impl IdentityProvider for RemoteIdentity {
    async fn fetch_user(&self, token: Option<&str>) -> Result<UserRecord> {
        let mut request = self.client.get(format!("{}/user", self.base_url));
        if let Some(token) = token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }

        let response = request
            .send()
            .await
            .context("Failed to send identity request")?;
        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read identity response")?;

        // The service reports failures through an error envelope; reject with
        // the service-provided message when one is present.
        if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(&body)
            && let Some(code) = envelope.error_code
        {
            anyhow::bail!(
                "{}",
                envelope
                    .message
                    .unwrap_or_else(|| format!("identity service error ({code})"))
            );
        }
        if !status.is_success() {
            anyhow::bail!("Identity request failed (HTTP {status})");
        }

        let mut user: UserRecord = serde_json::from_str(&body)
            .context("Failed to parse user record from identity response")?;
        if self.blank_avatar {
            user.image = String::new();
        }
        Ok(user)
    }
}

/// Fixed identity used in bypass-auth mode; never touches the network.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandInIdentity;

/// The fixed record returned in bypass-auth mode.
pub fn stand_in_user() -> UserRecord {
    UserRecord {
        id: "stand-in-user".to_string(),
        email: "drafter@draftbench.dev".to_string(),
        name: Some("Stand-in Drafter".to_string()),
        first_name: Some("Stand-in".to_string()),
        last_name: Some("Drafter".to_string()),
        image: String::new(),
        created_at: None,
        updated_at: None,
    }
}

impl IdentityProvider for StandInIdentity {
    async fn fetch_user(&self, _token: Option<&str>) -> Result<UserRecord> {
        Ok(stand_in_user())
    }
}

/// Provider strategy selected at construction time from config.
#[derive(Debug, Clone)]
pub enum Identity {
    Remote(RemoteIdentity),
    StandIn(StandInIdentity),
}

impl Identity {
    pub fn from_config(config: &Config) -> Self {
        if config.bypass_auth() {
            tracing::debug!("bypass-auth active, using stand-in identity");
            Self::StandIn(StandInIdentity)
        } else {
            Self::Remote(RemoteIdentity::from_config(config))
        }
    }
}

impl IdentityProvider for Identity {
    async fn fetch_user(&self, token: Option<&str>) -> Result<UserRecord> {
        match self {
            Self::Remote(provider) => provider.fetch_user(token).await,
            Self::StandIn(provider) => provider.fetch_user(token).await,
        }
    }
}
