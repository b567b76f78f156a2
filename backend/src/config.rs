use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;

use crate::error::AppError;
use crate::services::event_handler::EventHandlerKind;

const DEFAULT_DATABASE_URL: &str = "postgres://localhost/response";
const DEFAULT_SLACK_API_BASE_URL: &str = "https://slack.com/api";
const MAX_DIRECTORY_PAGE_SIZE: u32 = 1000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub slack_token: String,
    pub slack_api_base_url: String,
    pub directory_page_size: u32,
    pub directory_requests_per_minute: u32,
    pub directory_timeout_seconds: u64,
    pub user_cache_exclude_bots: bool,
    pub user_cache_refresh_timeout_seconds: u64,
    pub audit_event_handler: EventHandlerKind,
}

impl Config {
    pub fn load() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url =
            lookup("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());
        let slack_token = lookup("SLACK_TOKEN").unwrap_or_default();
        let slack_api_base_url = lookup("SLACK_API_BASE_URL")
            .unwrap_or_else(|| DEFAULT_SLACK_API_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let directory_page_size: u32 = parse_or(&lookup, "DIRECTORY_PAGE_SIZE", 200)?;
        if directory_page_size == 0 || directory_page_size > MAX_DIRECTORY_PAGE_SIZE {
            return Err(AppError::Config(format!(
                "DIRECTORY_PAGE_SIZE must be between 1 and {}, got {}",
                MAX_DIRECTORY_PAGE_SIZE, directory_page_size
            )));
        }

        let directory_requests_per_minute: u32 =
            parse_or(&lookup, "DIRECTORY_REQUESTS_PER_MINUTE", 20)?;
        if directory_requests_per_minute == 0 {
            return Err(AppError::Config(
                "DIRECTORY_REQUESTS_PER_MINUTE must be positive".to_string(),
            ));
        }

        Ok(Config {
            database_url,
            slack_token,
            slack_api_base_url,
            directory_page_size,
            directory_requests_per_minute,
            directory_timeout_seconds: parse_or(&lookup, "DIRECTORY_TIMEOUT_SECONDS", 10)?,
            user_cache_exclude_bots: parse_or(&lookup, "USER_CACHE_EXCLUDE_BOTS", false)?,
            user_cache_refresh_timeout_seconds: parse_or(
                &lookup,
                "USER_CACHE_REFRESH_TIMEOUT_SECONDS",
                300,
            )?,
            audit_event_handler: parse_or(
                &lookup,
                "AUDIT_EVENT_HANDLER",
                EventHandlerKind::EventLog,
            )?,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, AppError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) if raw.trim().is_empty() => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| AppError::Config(format!("Invalid {} value {:?}: {}", key, raw, e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config, AppError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_environment_is_empty() {
        let config = config_from(&[]).expect("config");
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(config.slack_api_base_url, DEFAULT_SLACK_API_BASE_URL);
        assert_eq!(config.directory_page_size, 200);
        assert_eq!(config.directory_requests_per_minute, 20);
        assert_eq!(config.directory_timeout_seconds, 10);
        assert!(!config.user_cache_exclude_bots);
        assert_eq!(config.user_cache_refresh_timeout_seconds, 300);
        assert_eq!(config.audit_event_handler, EventHandlerKind::EventLog);
    }

    #[test]
    fn explicit_values_override_defaults() {
        let config = config_from(&[
            ("SLACK_TOKEN", "xoxb-test"),
            ("SLACK_API_BASE_URL", "http://127.0.0.1:9000/api/"),
            ("DIRECTORY_PAGE_SIZE", "50"),
            ("USER_CACHE_EXCLUDE_BOTS", "true"),
            ("AUDIT_EVENT_HANDLER", "tracing"),
        ])
        .expect("config");
        assert_eq!(config.slack_token, "xoxb-test");
        assert_eq!(config.slack_api_base_url, "http://127.0.0.1:9000/api");
        assert_eq!(config.directory_page_size, 50);
        assert!(config.user_cache_exclude_bots);
        assert_eq!(config.audit_event_handler, EventHandlerKind::Tracing);
    }

    #[test]
    fn malformed_values_are_rejected() {
        let err = config_from(&[("DIRECTORY_PAGE_SIZE", "lots")]).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));

        let err = config_from(&[("USER_CACHE_EXCLUDE_BOTS", "maybe")]).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));

        let err = config_from(&[("AUDIT_EVENT_HANDLER", "webhook")]).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn page_size_is_bounded() {
        assert!(config_from(&[("DIRECTORY_PAGE_SIZE", "0")]).is_err());
        assert!(config_from(&[("DIRECTORY_PAGE_SIZE", "1001")]).is_err());
        assert!(config_from(&[("DIRECTORY_PAGE_SIZE", "1000")]).is_ok());
    }
}
