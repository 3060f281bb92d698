// Observability Configuration
//
// Configuration for backend adapters, loaded from environment variables.

use lineage_core::TracerConfig;
use std::collections::{BTreeMap, HashMap};
use std::env;
use std::time::Duration;

/// Configuration for observability integrations
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    /// Whether observability is enabled globally
    pub enabled: bool,

    /// Batch ingestion configuration
    pub ingestion: Option<IngestionConfig>,
}

impl ObservabilityConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `OBSERVABILITY_ENABLED`: Enable/disable observability (default: true if any backend configured)
    /// - `LANGFUSE_PUBLIC_KEY`: Langfuse public key (pk-lf-...)
    /// - `LANGFUSE_SECRET_KEY`: Langfuse secret key (sk-lf-...)
    /// - `LANGFUSE_HOST`: Langfuse host (default: https://cloud.langfuse.com)
    /// - `LANGFUSE_RELEASE`: Application release/version tag
    /// - `LANGFUSE_ENVIRONMENT`: Deployment environment attached to traces
    /// - `LANGFUSE_FLUSH_INTERVAL_MS`: Periodic flush interval (default: 5000)
    /// - `LANGFUSE_MAX_BATCH_SIZE`: Pending events that force a flush (default: 100)
    /// - `LANGFUSE_OTLP_HEADERS`: Extra OTLP headers, `key=value` pairs separated by commas
    pub fn from_env() -> Self {
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Same as `from_env`, reading variables through `var`
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let ingestion = IngestionConfig::from_vars(&var);

        // Default enabled if any backend is configured
        let default_enabled = ingestion.is_some();
        let enabled = var("OBSERVABILITY_ENABLED")
            .map(|v| v.to_lowercase() == "true" || v == "1")
            .unwrap_or(default_enabled);

        Self { enabled, ingestion }
    }

    /// Check if any observability backend is configured and enabled
    pub fn is_enabled(&self) -> bool {
        self.enabled && self.ingestion.is_some()
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Batch ingestion configuration
#[derive(Debug, Clone)]
pub struct IngestionConfig {
    /// Public key (pk-lf-...)
    pub public_key: String,

    /// Secret key (sk-lf-...)
    pub secret_key: String,

    /// Host (e.g., https://cloud.langfuse.com)
    pub host: String,

    /// Application release/version tag
    pub release: Option<String>,

    /// Deployment environment
    pub environment: Option<String>,

    /// Batch flush interval in milliseconds
    pub flush_interval_ms: u64,

    /// Maximum batch size before forced flush
    pub max_batch_size: usize,

    /// Extra headers sent with OTLP span exports (Authorization is always added)
    pub otlp_headers: BTreeMap<String, String>,
}

impl IngestionConfig {
    /// Create configuration from environment variables
    ///
    /// Returns None if required variables are not set.
    pub fn from_env() -> Option<Self> {
        Self::from_vars(&|key: &str| env::var(key).ok())
    }

    fn from_vars(var: &impl Fn(&str) -> Option<String>) -> Option<Self> {
        let public_key = var("LANGFUSE_PUBLIC_KEY")?;
        let secret_key = var("LANGFUSE_SECRET_KEY")?;

        // Must have both keys
        if public_key.is_empty() || secret_key.is_empty() {
            return None;
        }

        let host = var("LANGFUSE_HOST").unwrap_or_else(|| "https://cloud.langfuse.com".to_string());

        let flush_interval_ms = var("LANGFUSE_FLUSH_INTERVAL_MS")
            .and_then(|v| v.parse().ok())
            .filter(|ms: &u64| *ms > 0)
            .unwrap_or(5000);

        let max_batch_size = var("LANGFUSE_MAX_BATCH_SIZE")
            .and_then(|v| v.parse().ok())
            .filter(|size: &usize| *size > 0)
            .unwrap_or(100);

        Some(Self {
            public_key,
            secret_key,
            host,
            release: var("LANGFUSE_RELEASE"),
            environment: var("LANGFUSE_ENVIRONMENT"),
            flush_interval_ms,
            max_batch_size,
            otlp_headers: var("LANGFUSE_OTLP_HEADERS")
                .map(|v| parse_headers(&v))
                .unwrap_or_default(),
        })
    }

    /// Ingestion endpoint for this configuration
    pub fn ingestion_url(&self) -> String {
        format!("{}/api/public/ingestion", self.host.trim_end_matches('/'))
    }

    /// Generate the Basic Auth header value
    pub fn auth_header(&self) -> String {
        use base64::Engine;
        let credentials = format!("{}:{}", self.public_key, self.secret_key);
        let encoded = base64::engine::general_purpose::STANDARD.encode(credentials);
        format!("Basic {}", encoded)
    }

    /// Langfuse OTLP/HTTP traces endpoint for this configuration
    pub fn otlp_traces_url(&self) -> String {
        format!("{}/api/public/otel/v1/traces", self.host.trim_end_matches('/'))
    }

    /// Headers for OTLP span export: Basic auth plus any configured extras
    pub fn otlp_export_headers(&self) -> HashMap<String, String> {
        let mut headers: HashMap<String, String> = self
            .otlp_headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        headers.insert("Authorization".to_string(), self.auth_header());
        headers
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    /// Tracer defaults carrying this configuration's release and environment
    pub fn tracer_config(&self) -> TracerConfig {
        TracerConfig {
            release: self.release.clone(),
            environment: self.environment.clone(),
            ..TracerConfig::default()
        }
    }
}

/// Parse `key=value,key2=value2`; malformed pairs are skipped
fn parse_headers(raw: &str) -> BTreeMap<String, String> {
    raw.split(',')
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            let key = key.trim();
            (!key.is_empty()).then(|| (key.to_string(), value.trim().to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    fn test_config() -> IngestionConfig {
        IngestionConfig {
            public_key: "pk-lf-test".to_string(),
            secret_key: "sk-lf-secret".to_string(),
            host: "https://cloud.langfuse.com".to_string(),
            release: None,
            environment: None,
            flush_interval_ms: 5000,
            max_batch_size: 100,
            otlp_headers: BTreeMap::new(),
        }
    }

    #[test]
    fn test_ingestion_config_auth_header() {
        let header = test_config().auth_header();
        assert!(header.starts_with("Basic "));

        // Decode and verify
        use base64::Engine;
        let encoded = header.strip_prefix("Basic ").unwrap();
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .unwrap();
        let decoded_str = String::from_utf8(decoded).unwrap();
        assert_eq!(decoded_str, "pk-lf-test:sk-lf-secret");
    }

    #[test]
    fn test_ingestion_url_trims_trailing_slash() {
        let config = test_config();
        assert_eq!(
            config.ingestion_url(),
            "https://cloud.langfuse.com/api/public/ingestion"
        );

        let config2 = IngestionConfig {
            host: "https://cloud.langfuse.com/".to_string(),
            ..config
        };
        assert_eq!(
            config2.ingestion_url(),
            "https://cloud.langfuse.com/api/public/ingestion"
        );
    }

    #[test]
    fn test_from_vars_requires_both_keys() {
        let config = ObservabilityConfig::from_vars(vars(&[("LANGFUSE_PUBLIC_KEY", "pk")]));
        assert!(config.ingestion.is_none());
        assert!(!config.is_enabled());

        let config = ObservabilityConfig::from_vars(vars(&[
            ("LANGFUSE_PUBLIC_KEY", "pk"),
            ("LANGFUSE_SECRET_KEY", ""),
        ]));
        assert!(config.ingestion.is_none());
    }

    #[test]
    fn test_from_vars_defaults_and_overrides() {
        let config = ObservabilityConfig::from_vars(vars(&[
            ("LANGFUSE_PUBLIC_KEY", "pk"),
            ("LANGFUSE_SECRET_KEY", "sk"),
            ("LANGFUSE_ENVIRONMENT", "staging"),
            ("LANGFUSE_MAX_BATCH_SIZE", "0"),
            ("LANGFUSE_FLUSH_INTERVAL_MS", "250"),
        ]));
        assert!(config.is_enabled());

        let ingestion = config.ingestion.unwrap();
        assert_eq!(ingestion.host, "https://cloud.langfuse.com");
        assert_eq!(ingestion.max_batch_size, 100);
        assert_eq!(ingestion.flush_interval(), Duration::from_millis(250));
        assert_eq!(
            ingestion.tracer_config().environment.as_deref(),
            Some("staging")
        );
    }

    #[test]
    fn test_zero_flush_interval_falls_back_to_default() {
        let config = ObservabilityConfig::from_vars(vars(&[
            ("LANGFUSE_PUBLIC_KEY", "pk"),
            ("LANGFUSE_SECRET_KEY", "sk"),
            ("LANGFUSE_FLUSH_INTERVAL_MS", "0"),
        ]));
        let ingestion = config.ingestion.unwrap();
        assert_eq!(ingestion.flush_interval(), Duration::from_millis(5000));
    }

    #[test]
    fn test_otlp_traces_url() {
        let config = IngestionConfig {
            host: "https://eu.langfuse.example/".to_string(),
            ..test_config()
        };
        assert_eq!(
            config.otlp_traces_url(),
            "https://eu.langfuse.example/api/public/otel/v1/traces"
        );
    }

    #[test]
    fn test_otlp_export_headers_include_auth_and_extras() {
        let config = ObservabilityConfig::from_vars(vars(&[
            ("LANGFUSE_PUBLIC_KEY", "pk-lf-test"),
            ("LANGFUSE_SECRET_KEY", "sk-lf-secret"),
            ("LANGFUSE_OTLP_HEADERS", "x-tenant=acme, x-region = eu ,broken"),
        ]))
        .ingestion
        .unwrap();

        let headers = config.otlp_export_headers();
        assert_eq!(headers.len(), 3);
        assert_eq!(headers["x-tenant"], "acme");
        assert_eq!(headers["x-region"], "eu");
        assert_eq!(headers["Authorization"], config.auth_header());
    }

    #[test]
    fn test_configured_authorization_header_is_overridden() {
        let mut config = test_config();
        config
            .otlp_headers
            .insert("Authorization".to_string(), "Bearer nope".to_string());
        assert_eq!(
            config.otlp_export_headers()["Authorization"],
            config.auth_header()
        );
    }

    #[test]
    fn test_explicit_disable_wins() {
        let config = ObservabilityConfig::from_vars(vars(&[
            ("OBSERVABILITY_ENABLED", "false"),
            ("LANGFUSE_PUBLIC_KEY", "pk"),
            ("LANGFUSE_SECRET_KEY", "sk"),
        ]));
        assert!(config.ingestion.is_some());
        assert!(!config.is_enabled());
    }
}
