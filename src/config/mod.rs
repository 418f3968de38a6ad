//! Loader configuration.
//!
//! [`LoaderConfig`] collects the knobs a host application tunes: cache size,
//! whether controllers consult the cache, and how the default transport
//! talks to servers. It deserializes from JSON and can be read from the
//! environment; either way unset fields take their defaults.

use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;

use crate::cache::{ImageCache, default_capacity};
use crate::controller::{Controller, ImageTarget};
use crate::fetch::Fetcher;
use crate::http::request::DEFAULT_USER_AGENT;
use crate::transport::HttpTransport;
use crate::transport::tcp::DEFAULT_MAX_BODY_SIZE;

/// Errors produced while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid JSON configuration: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid value {value:?} for {var}")]
    InvalidEnv { var: &'static str, value: String },
}

/// Settings for the default HTTP transport.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Let intermediaries answer with cached responses.
    pub use_caches: bool,
    /// Largest body accepted, in bytes.
    pub max_body_size: usize,
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            use_caches: true,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
        }
    }
}

/// Top-level loader settings.
///
/// # Examples
///
/// ```
/// use urlimage::config::LoaderConfig;
///
/// let config = LoaderConfig::from_json(r#"{ "cache_capacity": 1048576, "use_cache": false }"#).unwrap();
/// assert_eq!(config.cache_capacity, Some(1_048_576));
/// assert!(!config.use_cache);
/// assert!(config.transport.use_caches);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Cache capacity in bytes. `None` uses 1/8 of available memory.
    pub cache_capacity: Option<usize>,
    /// Whether controllers look up the cache before fetching.
    pub use_cache: bool,
    pub transport: TransportConfig,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            cache_capacity: None,
            use_cache: true,
            transport: TransportConfig::default(),
        }
    }
}

impl LoaderConfig {
    /// Parses a JSON document. Missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads settings from `URLIMAGE_*` environment variables.
    ///
    /// | Variable                    | Field                      |
    /// |-----------------------------|----------------------------|
    /// | `URLIMAGE_CACHE_BYTES`      | `cache_capacity`           |
    /// | `URLIMAGE_USE_CACHE`        | `use_cache`                |
    /// | `URLIMAGE_TRANSPORT_CACHE`  | `transport.use_caches`     |
    /// | `URLIMAGE_MAX_BODY_BYTES`   | `transport.max_body_size`  |
    /// | `URLIMAGE_USER_AGENT`       | `transport.user_agent`     |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(bytes) = parse_var(&lookup, "URLIMAGE_CACHE_BYTES")? {
            config.cache_capacity = Some(bytes);
        }
        if let Some(flag) = parse_var(&lookup, "URLIMAGE_USE_CACHE")? {
            config.use_cache = flag;
        }
        if let Some(flag) = parse_var(&lookup, "URLIMAGE_TRANSPORT_CACHE")? {
            config.transport.use_caches = flag;
        }
        if let Some(bytes) = parse_var(&lookup, "URLIMAGE_MAX_BODY_BYTES")? {
            config.transport.max_body_size = bytes;
        }
        if let Some(agent) = lookup("URLIMAGE_USER_AGENT") {
            config.transport.user_agent = agent;
        }
        Ok(config)
    }

    /// Resolved cache capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.cache_capacity.unwrap_or_else(default_capacity)
    }

    /// Builds a cache sized by this configuration.
    pub fn build_cache(&self) -> ImageCache {
        ImageCache::new(self.capacity())
    }

    /// Builds the default HTTP transport.
    pub fn build_transport(&self) -> HttpTransport {
        HttpTransport::new()
            .use_caches(self.transport.use_caches)
            .max_body_size(self.transport.max_body_size)
            .user_agent(self.transport.user_agent.as_str())
    }

    /// Builds a controller for `target` that shares `cache`.
    pub fn build_controller<T: ImageTarget>(
        &self,
        target: T,
        cache: Option<Arc<ImageCache>>,
    ) -> Controller<T> {
        let fetcher = Fetcher::new(Arc::new(self.build_transport()));
        let mut controller = Controller::new(target, fetcher);
        controller.set_cache(cache);
        controller.set_use_cache(self.use_cache);
        controller
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { var, value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |var: &str| map.get(var).cloned()
    }

    #[test]
    fn empty_json_is_default() {
        assert_eq!(LoaderConfig::from_json("{}").unwrap(), LoaderConfig::default());
    }

    #[test]
    fn nested_transport_json() {
        let config =
            LoaderConfig::from_json(r#"{ "transport": { "use_caches": false, "max_body_size": 10 } }"#)
                .unwrap();
        assert!(!config.transport.use_caches);
        assert_eq!(config.transport.max_body_size, 10);
        assert_eq!(config.transport.user_agent, DEFAULT_USER_AGENT);
    }

    #[test]
    fn bad_json_is_an_error() {
        assert!(matches!(
            LoaderConfig::from_json(r#"{ "use_cache": "yes" }"#),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn env_overrides() {
        let config = LoaderConfig::from_lookup(lookup(&[
            ("URLIMAGE_CACHE_BYTES", "100"),
            ("URLIMAGE_USE_CACHE", "false"),
            ("URLIMAGE_TRANSPORT_CACHE", "false"),
            ("URLIMAGE_USER_AGENT", "gallery/3"),
        ]))
        .unwrap();
        assert_eq!(config.capacity(), 100);
        assert!(!config.use_cache);
        assert!(!config.transport.use_caches);
        assert_eq!(config.transport.user_agent, "gallery/3");
        assert_eq!(config.build_cache().capacity(), 100);
    }

    #[test]
    fn env_rejects_garbage() {
        let err = LoaderConfig::from_lookup(lookup(&[("URLIMAGE_CACHE_BYTES", "lots")])).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidEnv { var: "URLIMAGE_CACHE_BYTES", .. }
        ));
    }

    #[test]
    fn default_capacity_applies_when_unset() {
        assert!(LoaderConfig::default().capacity() > 0);
    }
}
