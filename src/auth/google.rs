use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::AppError;

/// Identity asserted by an external provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalProfile {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

/// Resolves a provider access token into a verified profile.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch_profile(&self, access_token: &str) -> Result<ExternalProfile, AppError>;
}

/// Response of Google's `oauth2/v2/userinfo` endpoint.
#[derive(Debug, Deserialize)]
struct GoogleUserInfo {
    email: Option<String>,
    #[serde(default)]
    verified_email: bool,
    name: Option<String>,
    given_name: Option<String>,
    family_name: Option<String>,
}

impl GoogleUserInfo {
    fn into_profile(self) -> Result<ExternalProfile, AppError> {
        let email = self
            .email
            .filter(|e| !e.trim().is_empty())
            .ok_or_else(|| AppError::ExternalIdentity("profile has no email".into()))?;
        if !self.verified_email {
            return Err(AppError::ExternalIdentity("email not verified by provider".into()));
        }

        // "Grace Brewster Hopper" -> ("Grace", "Brewster Hopper")
        let full_name = self.name.unwrap_or_default();
        let mut words = full_name.split_whitespace();
        let name_head = words.next().map(str::to_string);
        let name_tail = words.collect::<Vec<_>>().join(" ");

        let first_name = non_blank(self.given_name)
            .or(name_head)
            .unwrap_or_else(|| email.split('@').next().unwrap_or_default().to_string());
        let last_name = non_blank(self.family_name)
            .or_else(|| non_blank(Some(name_tail)))
            .unwrap_or_else(|| "-".into());

        Ok(ExternalProfile {
            email,
            first_name,
            last_name,
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

pub struct GoogleProvider {
    client: reqwest::Client,
    userinfo_url: String,
}

impl GoogleProvider {
    pub fn new(userinfo_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            userinfo_url: userinfo_url.into(),
        }
    }
}

#[async_trait]
impl IdentityProvider for GoogleProvider {
    fn name(&self) -> &str {
        "google"
    }

    async fn fetch_profile(&self, access_token: &str) -> Result<ExternalProfile, AppError> {
        let response = self
            .client
            .get(&self.userinfo_url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("google userinfo request failed: {e}")))?;

        if !response.status().is_success() {
            warn!(status = %response.status(), "google rejected access token");
            return Err(AppError::ExternalIdentity(format!(
                "userinfo returned {}",
                response.status()
            )));
        }

        let info: GoogleUserInfo = response
            .json()
            .await
            .map_err(|e| AppError::ExternalIdentity(format!("unreadable userinfo: {e}")))?;
        let profile = info.into_profile()?;
        info!(email = %profile.email, "google identity resolved");
        Ok(profile)
    }
}
