use http::Method;
use serde::Deserialize;
use std::time::Duration;
use validator::Validate;

use crate::error::{AppError, Result};

pub const DEFAULT_STORE_NAME: &str = "requestcontroller";
pub const DEFAULT_TTL_SECONDS: u64 = 330;
pub const DEFAULT_HEADER_NAME: &str = "NuxeoIdempotencyKey";
pub const DEFAULT_MAX_CAPTURE_BYTES: usize = 8 * 1024 * 1024;

#[derive(Debug, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub application: ApplicationSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
    pub redis: Option<RedisSettings>,
    #[serde(default)]
    pub idempotency: IdempotencySettings,
}

#[derive(Debug, Deserialize)]
pub struct ApplicationSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoggingSettings {
    pub level: String,
    pub format: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RedisSettings {
    pub url: String,
}

/// Which key-value implementation backs the idempotency store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Redis,
}

/// Raw idempotency settings as loaded. The TTL stays a string here so a malformed value can be
/// reported and replaced instead of failing startup.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(default)]
pub struct IdempotencySettings {
    #[validate(length(min = 1, message = "store name cannot be empty"))]
    pub store: String,
    pub backend: StoreBackend,
    pub ttl_seconds: Option<String>,
    #[validate(length(min = 1, message = "header name cannot be empty"))]
    pub header_name: String,
    #[validate(length(min = 1, message = "at least one method must be configured"))]
    pub methods: Vec<String>,
    #[validate(range(min = 1))]
    pub max_capture_bytes: usize,
}

impl Default for IdempotencySettings {
    fn default() -> Self {
        Self {
            store: DEFAULT_STORE_NAME.to_string(),
            backend: StoreBackend::Memory,
            ttl_seconds: None,
            header_name: DEFAULT_HEADER_NAME.to_string(),
            methods: vec!["POST".to_string()],
            max_capture_bytes: DEFAULT_MAX_CAPTURE_BYTES,
        }
    }
}

impl Settings {
    pub fn new() -> std::result::Result<Self, config::ConfigError> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"));

        builder.build()?.try_deserialize()
    }
}

/// Resolved configuration used by the request interceptor.
#[derive(Debug, Clone)]
pub struct IdempotencyConfig {
    pub store: String,
    pub ttl: Duration,
    pub header_name: String,
    pub methods: Vec<Method>,
    pub max_capture_bytes: usize,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            store: DEFAULT_STORE_NAME.to_string(),
            ttl: Duration::from_secs(DEFAULT_TTL_SECONDS),
            header_name: DEFAULT_HEADER_NAME.to_string(),
            methods: vec![Method::POST],
            max_capture_bytes: DEFAULT_MAX_CAPTURE_BYTES,
        }
    }
}

impl IdempotencyConfig {
    pub fn new(store: impl Into<String>, ttl: Duration) -> Self {
        Self {
            store: store.into(),
            ttl,
            ..Self::default()
        }
    }

    pub fn with_header_name(mut self, header_name: impl Into<String>) -> Self {
        self.header_name = header_name.into();
        self
    }

    pub fn with_methods(mut self, methods: Vec<Method>) -> Self {
        self.methods = methods;
        self
    }

    pub fn with_max_capture_bytes(mut self, max_capture_bytes: usize) -> Self {
        self.max_capture_bytes = max_capture_bytes;
        self
    }

    /// Validates raw settings and resolves them. Only the TTL is forgiving.
    pub fn from_settings(settings: &IdempotencySettings) -> Result<Self> {
        settings
            .validate()
            .map_err(|e| AppError::Validation(e.to_string()))?;

        let methods = settings
            .methods
            .iter()
            .map(|m| {
                Method::from_bytes(m.trim().to_uppercase().as_bytes())
                    .map_err(|_| AppError::Validation(format!("invalid HTTP method '{}'", m)))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            store: settings.store.clone(),
            ttl: Duration::from_secs(parse_ttl_seconds(settings.ttl_seconds.as_deref())),
            header_name: settings.header_name.clone(),
            methods,
            max_capture_bytes: settings.max_capture_bytes,
        })
    }

    pub fn is_mutating(&self, method: &Method) -> bool {
        self.methods.contains(method)
    }
}

/// Parses a TTL in whole seconds. Missing means default; anything that is not a positive
/// integer is logged and replaced by the default.
pub fn parse_ttl_seconds(raw: Option<&str>) -> u64 {
    let Some(raw) = raw else {
        return DEFAULT_TTL_SECONDS;
    };

    match raw.trim().parse::<u64>() {
        Ok(ttl) if ttl > 0 => ttl,
        Ok(_) => {
            tracing::warn!(
                ttl = raw,
                default = DEFAULT_TTL_SECONDS,
                "Idempotency TTL must be positive, using default"
            );
            DEFAULT_TTL_SECONDS
        }
        Err(e) => {
            tracing::warn!(
                ttl = raw,
                default = DEFAULT_TTL_SECONDS,
                error = %e,
                "Invalid idempotency TTL, using default"
            );
            DEFAULT_TTL_SECONDS
        }
    }
}
