use std::collections::HashMap;

use thiserror::Error;

use crate::engine::policy::ScoringPolicy;

pub const DEFAULT_PORT: u16 = 3000;

/// Process configuration, parsed once at startup and carried inside the
/// [`AppContext`](crate::context::AppContext). Missing required values are
/// fatal: the process must not continue serving without credentials.
#[derive(Debug, Clone)]
pub struct Config {
    pub bot_token: String,
    pub owner_id: i64,
    pub database_url: String,
    /// Public base URL of this deployment. Present ⇒ webhook mode plus the
    /// keep-alive self-ping; absent ⇒ long-poll fallback.
    pub external_base_url: Option<String>,
    pub port: u16,
    pub policy: ScoringPolicy,
}

impl Config {
    pub fn from_env() -> ConfigResult<Self> {
        // a missing .env file is fine, the process environment still counts
        let _ = dotenvy::dotenv();
        Self::from_iter(std::env::vars())
    }

    pub fn from_iter<I>(vars: I) -> ConfigResult<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let vars: HashMap<String, String> = vars.into_iter().collect();

        let required = |key: &'static str| -> ConfigResult<&str> {
            vars.get(key)
                .map(String::as_str)
                .filter(|v| !v.is_empty())
                .ok_or(ConfigErr::Missing(key))
        };

        let bot_token = required("BOT_TOKEN")?.to_string();
        let database_url = required("DATABASE_URL")?.to_string();

        let owner_id = required("OWNER_ID")?
            .parse::<i64>()
            .map_err(|_| ConfigErr::Invalid("OWNER_ID"))?;

        let external_base_url = vars
            .get("EXTERNAL_BASE_URL")
            .filter(|v| !v.is_empty())
            .map(|v| v.trim_end_matches('/').to_string());

        let port = match vars.get("PORT").filter(|v| !v.is_empty()) {
            Some(raw) => raw.parse::<u16>().map_err(|_| ConfigErr::Invalid("PORT"))?,
            None => DEFAULT_PORT,
        };

        let policy = match vars.get("XP_POLICY").filter(|v| !v.is_empty()) {
            Some(raw) => raw
                .parse::<ScoringPolicy>()
                .map_err(|_| ConfigErr::Invalid("XP_POLICY"))?,
            None => ScoringPolicy::default(),
        };

        Ok(Self {
            bot_token,
            owner_id,
            database_url,
            external_base_url,
            port,
            policy,
        })
    }
}

pub type ConfigResult<T> = core::result::Result<T, ConfigErr>;

#[derive(Debug, Error)]
pub enum ConfigErr {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for environment variable {0}")]
    Invalid(&'static str),
}

#[cfg(test)]
mod test {
    use super::*;

    fn base_vars() -> Vec<(String, String)> {
        [
            ("BOT_TOKEN", "123456:abcdef"),
            ("OWNER_ID", "42"),
            ("DATABASE_URL", "postgres://localhost/tallybot"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    #[test]
    fn test_minimal_config_defaults() {
        let config = Config::from_iter(base_vars()).unwrap();

        assert_eq!(config.owner_id, 42);
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.policy, ScoringPolicy::LineBlock);
        assert!(config.external_base_url.is_none());
    }

    #[test]
    fn test_missing_token_is_fatal() {
        let vars = base_vars()
            .into_iter()
            .filter(|(k, _)| k != "BOT_TOKEN")
            .collect::<Vec<_>>();

        assert!(matches!(
            Config::from_iter(vars),
            Err(ConfigErr::Missing("BOT_TOKEN"))
        ));
    }

    #[test]
    fn test_invalid_owner_id() {
        let mut vars = base_vars();
        vars.retain(|(k, _)| k != "OWNER_ID");
        vars.push(("OWNER_ID".into(), "not-a-number".into()));

        assert!(matches!(
            Config::from_iter(vars),
            Err(ConfigErr::Invalid("OWNER_ID"))
        ));
    }

    #[test]
    fn test_policy_and_base_url_normalization() {
        let mut vars = base_vars();
        vars.push(("XP_POLICY".into(), "weighted-density".into()));
        vars.push(("EXTERNAL_BASE_URL".into(), "https://bot.example.com/".into()));
        vars.push(("PORT".into(), "8080".into()));

        let config = Config::from_iter(vars).unwrap();

        assert_eq!(config.policy, ScoringPolicy::WeightedLineDensity);
        assert_eq!(
            config.external_base_url.as_deref(),
            Some("https://bot.example.com")
        );
        assert_eq!(config.port, 8080);
    }
}
