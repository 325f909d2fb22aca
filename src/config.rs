//! Environment configuration

use std::env;
use std::time::Duration;

use crate::error::{BotError, Result};

const DEFAULT_EXTRACTION_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct BotConfig {
    pub gemini_api_key: String,
    /// Postgres connection string; the in-memory store is used when unset.
    pub database_url: Option<String>,
    /// Channel ids bootstrapped as admins on startup.
    pub admin_ids: Vec<i64>,
    pub extraction_timeout: Duration,
}

impl BotConfig {
    pub fn from_env() -> Result<Self> {
        let gemini_api_key = env::var("GEMINI_API_KEY")
            .map_err(|_| BotError::Validation("GEMINI_API_KEY is not set".to_string()))?;

        let database_url = env::var("DATABASE_URL").ok().filter(|s| !s.is_empty());

        let admin_ids = match env::var("ADMIN_IDS") {
            Ok(raw) => parse_admin_ids(&raw)?,
            Err(_) => Vec::new(),
        };

        let extraction_timeout = env::var("EXTRACTION_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(DEFAULT_EXTRACTION_TIMEOUT_SECS));

        Ok(Self {
            gemini_api_key,
            database_url,
            admin_ids,
            extraction_timeout,
        })
    }
}

fn parse_admin_ids(raw: &str) -> Result<Vec<i64>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<i64>()
                .map_err(|_| BotError::Validation(format!("invalid admin id: {}", s)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_ids_parse_comma_separated() {
        assert_eq!(parse_admin_ids("1, 2,3").unwrap(), vec![1, 2, 3]);
        assert_eq!(parse_admin_ids("").unwrap(), Vec::<i64>::new());
        assert!(parse_admin_ids("1,abc").is_err());
    }
}
