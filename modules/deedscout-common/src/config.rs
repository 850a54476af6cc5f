use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::types::{Provenance, StageId};

/// Retry delays are capped so a misconfigured value cannot stall a runner.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Submission / scheduling
    pub max_addresses: usize,
    pub processing_delay: Duration,
    pub max_parallel_addresses: usize,

    // Stage execution
    pub stage_timeout: Duration,
    pub stage_max_attempts: u32,
    pub stage_retry_delay: Duration,

    // Aggregation
    pub owner_precedence: Vec<Provenance>,

    // Collaborators
    pub database_url: Option<String>,
    pub reasoner_url: Option<String>,
    pub stage_urls: HashMap<StageId, String>,
    pub collaborator_token: Option<String>,

    // Web server
    pub api_host: String,
    pub api_port: u16,
    pub cors_origins: Vec<String>,
    pub log_json: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_addresses: 10,
            processing_delay: Duration::from_millis(500),
            max_parallel_addresses: 2,
            stage_timeout: Duration::from_secs(90),
            stage_max_attempts: 3,
            stage_retry_delay: Duration::from_millis(2000),
            owner_precedence: vec![
                Provenance::Document,
                Provenance::Registry,
                Provenance::Secondary,
            ],
            database_url: None,
            reasoner_url: None,
            stage_urls: HashMap::new(),
            collaborator_token: None,
            api_host: "0.0.0.0".to_string(),
            api_port: 8000,
            cors_origins: vec!["*".to_string()],
            log_json: false,
        }
    }
}

impl Config {
    /// Load configuration from the process environment (and `.env`, if present).
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup. Unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let max_addresses = parse_or(&get, "MAX_ADDRESSES", defaults.max_addresses)?;
        if max_addresses == 0 {
            anyhow::bail!("MAX_ADDRESSES must be at least 1");
        }
        let max_parallel_addresses =
            parse_or(&get, "MAX_PARALLEL_ADDRESSES", defaults.max_parallel_addresses)?.max(1);
        let stage_max_attempts =
            parse_or(&get, "STAGE_MAX_ATTEMPTS", defaults.stage_max_attempts)?.max(1);

        let processing_delay = Duration::from_millis(parse_or(
            &get,
            "PROCESSING_DELAY_MS",
            defaults.processing_delay.as_millis() as u64,
        )?);
        let stage_timeout = Duration::from_secs(parse_or(
            &get,
            "STAGE_TIMEOUT_SECS",
            defaults.stage_timeout.as_secs(),
        )?);
        let stage_retry_delay = Duration::from_millis(parse_or(
            &get,
            "STAGE_RETRY_DELAY_MS",
            defaults.stage_retry_delay.as_millis() as u64,
        )?)
        .min(MAX_RETRY_DELAY);

        let owner_precedence = match get("OWNER_PRECEDENCE") {
            Some(raw) => parse_precedence(&raw)?,
            None => defaults.owner_precedence,
        };

        let mut stage_urls = HashMap::new();
        for stage in StageId::ALL {
            let key = format!("STAGE_URL_{}", stage.as_str().to_uppercase());
            if let Some(url) = get(&key) {
                stage_urls.insert(stage, url.trim().to_string());
            }
        }

        let cors_origins = get("CORS_ORIGINS")
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or(defaults.cors_origins);

        Ok(Self {
            max_addresses,
            processing_delay,
            max_parallel_addresses,
            stage_timeout,
            stage_max_attempts,
            stage_retry_delay,
            owner_precedence,
            database_url: get("DATABASE_URL"),
            reasoner_url: get("REASONER_URL"),
            stage_urls,
            collaborator_token: get("COLLABORATOR_TOKEN"),
            api_host: get("API_HOST").unwrap_or(defaults.api_host),
            api_port: parse_or(&get, "API_PORT", defaults.api_port)?,
            cors_origins,
            log_json: get("LOG_FORMAT").is_some_and(|f| f.eq_ignore_ascii_case("json")),
        })
    }

    /// Log the loaded settings, with secrets truncated.
    pub fn log_keys(&self) {
        fn preview_opt(val: &Option<String>) -> String {
            match val {
                Some(v) if !v.is_empty() => {
                    let n = v.len().min(12);
                    format!("{}...({} chars)", &v[..n], v.len())
                }
                _ => "<not set>".to_string(),
            }
        }

        tracing::info!("Config loaded:");
        tracing::info!("  MAX_ADDRESSES: {}", self.max_addresses);
        tracing::info!("  MAX_PARALLEL_ADDRESSES: {}", self.max_parallel_addresses);
        tracing::info!("  PROCESSING_DELAY_MS: {}", self.processing_delay.as_millis());
        tracing::info!("  DATABASE_URL: {}", preview_opt(&self.database_url));
        tracing::info!("  REASONER_URL: {}", preview_opt(&self.reasoner_url));
        tracing::info!("  stage urls configured: {}", self.stage_urls.len());
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{e}"))
            .with_context(|| format!("{key} is not valid: {raw:?}")),
        None => Ok(default),
    }
}

/// Parse a comma-separated precedence list such as `document,registry,secondary`.
/// Provenances left out are appended in default order so every candidate stays rankable.
pub fn parse_precedence(raw: &str) -> Result<Vec<Provenance>> {
    let mut order = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let provenance: Provenance = part
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))
            .context("OWNER_PRECEDENCE is not valid")?;
        if !order.contains(&provenance) {
            order.push(provenance);
        }
    }
    for provenance in [Provenance::Document, Provenance::Registry, Provenance::Secondary] {
        if !order.contains(&provenance) {
            order.push(provenance);
        }
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.max_addresses, 10);
        assert_eq!(config.processing_delay, Duration::from_millis(500));
        assert_eq!(config.stage_max_attempts, 3);
        assert!(config.database_url.is_none());
        assert!(config.stage_urls.is_empty());
    }

    #[test]
    fn reads_overrides_and_stage_urls() {
        let config = Config::from_lookup(lookup(&[
            ("MAX_ADDRESSES", "25"),
            ("PROCESSING_DELAY_MS", "0"),
            ("STAGE_URL_PROPERTY_REGISTRY", "http://zoning:9000/lookup"),
            ("STAGE_URL_PEOPLE_SEARCH", " http://people:9000 "),
            ("CORS_ORIGINS", "https://a.example, https://b.example"),
            ("LOG_FORMAT", "JSON"),
        ]))
        .unwrap();

        assert_eq!(config.max_addresses, 25);
        assert_eq!(config.processing_delay, Duration::ZERO);
        assert_eq!(
            config.stage_urls.get(&StageId::PropertyRegistry).map(String::as_str),
            Some("http://zoning:9000/lookup")
        );
        assert_eq!(
            config.stage_urls.get(&StageId::PeopleSearch).map(String::as_str),
            Some("http://people:9000")
        );
        assert_eq!(config.cors_origins.len(), 2);
        assert!(config.log_json);
    }

    #[test]
    fn retry_delay_is_capped() {
        let config = Config::from_lookup(lookup(&[("STAGE_RETRY_DELAY_MS", "600000")])).unwrap();
        assert_eq!(config.stage_retry_delay, MAX_RETRY_DELAY);
    }

    #[test]
    fn rejects_garbage_numbers() {
        let err = Config::from_lookup(lookup(&[("MAX_ADDRESSES", "lots")])).unwrap_err();
        assert!(err.to_string().contains("MAX_ADDRESSES"));
    }

    #[test]
    fn rejects_zero_max_addresses() {
        assert!(Config::from_lookup(lookup(&[("MAX_ADDRESSES", "0")])).is_err());
    }

    #[test]
    fn precedence_fills_in_missing_entries() {
        let order = parse_precedence("registry").unwrap();
        assert_eq!(
            order,
            vec![Provenance::Registry, Provenance::Document, Provenance::Secondary]
        );
        assert!(parse_precedence("registry,astrology").is_err());
    }
}
