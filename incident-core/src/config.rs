use crate::error::ConfigError;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq)]
pub struct Settings {
    pub api_host: String,
    pub api_port: u16,
    pub prometheus_url: String,
    pub knowledge_url: String,
    pub knowledge_collection: String,
    pub embed_model: String,
    pub disable_retrieval: bool,
    /// Empty means dry run: the ticket sink only logs.
    pub ticketing_url: String,
    pub ticketing_user: String,
    pub ticketing_password: String,
    pub request_timeout: Duration,
    pub enrichment_workers: usize,
    /// Reserved for cross-incident grouping; not used by the pipeline yet.
    pub correlation_window: Duration,
    pub log_json: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_host: "0.0.0.0".into(),
            api_port: 8000,
            prometheus_url: "http://localhost:9090".into(),
            knowledge_url: "http://localhost:8002".into(),
            knowledge_collection: "web_embeddings".into(),
            embed_model: "sentence-transformers/all-MiniLM-L6-v2".into(),
            disable_retrieval: false,
            ticketing_url: String::new(),
            ticketing_user: String::new(),
            ticketing_password: String::new(),
            request_timeout: Duration::from_secs(10),
            enrichment_workers: 4,
            correlation_window: Duration::from_secs(600),
            log_json: false,
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Builds settings from an arbitrary variable lookup, falling back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let string = |var: &str, default: String| lookup(var).unwrap_or(default);
        let flag = |var: &str, default: bool| {
            lookup(var).map(|v| parse_flag(&v)).unwrap_or(default)
        };

        Ok(Self {
            api_host: string("API_HOST", defaults.api_host),
            api_port: parse_var(&lookup, "API_PORT", defaults.api_port)?,
            prometheus_url: string("PROMETHEUS_URL", defaults.prometheus_url),
            knowledge_url: string("KNOWLEDGE_URL", defaults.knowledge_url),
            knowledge_collection: string("KNOWLEDGE_COLLECTION", defaults.knowledge_collection),
            embed_model: string("EMBED_MODEL", defaults.embed_model),
            disable_retrieval: flag("DISABLE_RETRIEVAL", defaults.disable_retrieval),
            ticketing_url: string("TICKETING_URL", defaults.ticketing_url),
            ticketing_user: string("TICKETING_USER", defaults.ticketing_user),
            ticketing_password: string("TICKETING_PASSWORD", defaults.ticketing_password),
            request_timeout: Duration::from_secs(positive(
                "REQUEST_TIMEOUT_SECS",
                parse_var(&lookup, "REQUEST_TIMEOUT_SECS", defaults.request_timeout.as_secs())?,
            )?),
            enrichment_workers: parse_var(&lookup, "ENRICH_WORKERS", defaults.enrichment_workers)?
                .max(1),
            correlation_window: Duration::from_secs(parse_var(
                &lookup,
                "CORRELATION_WINDOW_SECS",
                defaults.correlation_window.as_secs(),
            )?),
            log_json: flag("LOG_JSON", defaults.log_json),
        })
    }

    pub fn ticketing_enabled(&self) -> bool {
        !self.ticketing_url.trim().is_empty()
    }
}

fn parse_var<F, T>(lookup: &F, var: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        None => Ok(default),
        Some(raw) => raw.trim().parse::<T>().map_err(|e| ConfigError::InvalidEnvVar {
            var: var.to_string(),
            message: format!("'{raw}': {e}"),
        }),
    }
}

fn positive(var: &str, value: u64) -> Result<u64, ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidEnvVar {
            var: var.to_string(),
            message: "must be greater than zero".into(),
        });
    }
    Ok(value)
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "1" | "true" | "yes")
}
