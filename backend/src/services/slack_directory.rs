//! Slack Web API implementation of [`DirectoryClient`].

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::num::NonZeroU32;
use std::time::Duration;
use tracing::Instrument;

use crate::config::Config;
use crate::error::AppError;
use crate::models::external_user::DirectoryProfile;
use crate::services::directory::{DirectoryClient, DirectoryPage};

const NOT_FOUND_ERRORS: &[&str] = &["user_not_found", "users_not_found"];

#[derive(Debug, Deserialize)]
struct SlackEnvelope<T> {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(flatten)]
    body: Option<T>,
}

#[derive(Debug, Deserialize)]
struct UserBody {
    user: SlackUser,
}

#[derive(Debug, Deserialize)]
struct UserListBody {
    #[serde(default)]
    members: Vec<SlackUser>,
    #[serde(default)]
    response_metadata: Option<ResponseMetadata>,
}

#[derive(Debug, Deserialize)]
struct ResponseMetadata {
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SlackUser {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    real_name: Option<String>,
    #[serde(default)]
    deleted: bool,
    #[serde(default)]
    is_bot: bool,
    #[serde(default)]
    profile: SlackProfile,
}

#[derive(Debug, Default, Deserialize)]
struct SlackProfile {
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    real_name: Option<String>,
    #[serde(default)]
    email: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl From<SlackUser> for DirectoryProfile {
    fn from(user: SlackUser) -> Self {
        let display_name = non_empty(user.profile.display_name).unwrap_or(user.name);
        let full_name = non_empty(user.profile.real_name)
            .or_else(|| non_empty(user.real_name))
            .unwrap_or_default();
        DirectoryProfile {
            id: user.id,
            display_name,
            full_name,
            email: non_empty(user.profile.email),
            is_deleted: user.deleted,
            is_bot: user.is_bot,
        }
    }
}

pub struct SlackDirectoryClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    limiter: DefaultDirectRateLimiter,
}

impl SlackDirectoryClient {
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
        requests_per_minute: u32,
        timeout: Duration,
    ) -> Result<Self, AppError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        let per_minute = NonZeroU32::new(requests_per_minute).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::per_minute(per_minute);
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            limiter: RateLimiter::direct(quota),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, AppError> {
        Self::new(
            config.slack_api_base_url.clone(),
            config.slack_token.clone(),
            config.directory_requests_per_minute,
            Duration::from_secs(config.directory_timeout_seconds),
        )
    }

    /// Calls one Web API method. `Ok(None)` means the directory reported no such user.
    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        query: &[(&str, String)],
    ) -> Result<Option<T>, AppError> {
        self.limiter.until_ready().await;

        let response = self
            .http
            .get(format!("{}/{}", self.base_url, method))
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .unwrap_or("unknown")
                .to_string();
            return Err(AppError::directory(format!(
                "{method} rate limited (retry after {retry_after}s)"
            )));
        }
        if !status.is_success() {
            return Err(AppError::directory(format!(
                "{method} answered with HTTP {status}"
            )));
        }

        let envelope: SlackEnvelope<T> = response.json().await?;
        if envelope.ok {
            return envelope
                .body
                .map(Some)
                .ok_or_else(|| AppError::directory(format!("{method} returned an empty body")));
        }

        match envelope.error.as_deref() {
            Some(code) if NOT_FOUND_ERRORS.iter().any(|known| *known == code) => Ok(None),
            Some(code) => Err(AppError::directory(format!("{method} failed: {code}"))),
            None => Err(AppError::directory(format!("{method} failed"))),
        }
    }
}

#[async_trait]
impl DirectoryClient for SlackDirectoryClient {
    async fn lookup_by_id(&self, id: &str) -> Result<Option<DirectoryProfile>, AppError> {
        let span = tracing::debug_span!("slack_users_info", id);
        let body: Option<UserBody> = self
            .call("users.info", &[("user", id.to_string())])
            .instrument(span)
            .await?;
        Ok(body.map(|body| body.user.into()))
    }

    async fn lookup_by_email(&self, email: &str) -> Result<Option<DirectoryProfile>, AppError> {
        let span = tracing::debug_span!("slack_users_lookup_by_email", email);
        let body: Option<UserBody> = self
            .call("users.lookupByEmail", &[("email", email.to_string())])
            .instrument(span)
            .await?;
        Ok(body.map(|body| body.user.into()))
    }

    async fn list_page(
        &self,
        cursor: Option<String>,
        page_size: u32,
    ) -> Result<DirectoryPage, AppError> {
        let span =
            tracing::debug_span!("slack_users_list", cursor = cursor.as_deref().unwrap_or(""));
        let mut query = vec![("limit", page_size.to_string())];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor));
        }

        let body: UserListBody = self
            .call("users.list", &query)
            .instrument(span)
            .await?
            .ok_or_else(|| AppError::directory("users.list reported no users"))?;

        Ok(DirectoryPage {
            entries: body.members.into_iter().map(DirectoryProfile::from).collect(),
            next_cursor: body
                .response_metadata
                .and_then(|meta| non_empty(meta.next_cursor)),
        })
    }
}
