use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration build error: {0}")]
    Build(#[from] config::ConfigError),
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// Connection settings for the Hydra admin API.
#[derive(Clone, Debug, Deserialize)]
pub struct HydraConfig {
    /// Base URL of the admin API, e.g. `http://hydra:4445`.
    pub admin_url: String,
    /// Path under which the admin API exposes scope objects.
    #[serde(default = "default_scopes_path")]
    pub scopes_path: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Items requested per listing page.
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

impl HydraConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Tuning knobs for reconciliation runs.
#[derive(Clone, Debug, Deserialize)]
pub struct ReconcileConfig {
    /// Maximum remote operations in flight within a single apply phase.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    /// Total attempts per remote call, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Interval of the scheduled run. `0` disables scheduling.
    #[serde(default)]
    pub schedule_interval_secs: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            schedule_interval_secs: 0,
        }
    }
}

impl ReconcileConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn schedule_interval(&self) -> Option<Duration> {
        (self.schedule_interval_secs > 0).then(|| Duration::from_secs(self.schedule_interval_secs))
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    pub hydra: HydraConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
}

fn default_scopes_path() -> String {
    "/admin/scopes".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_page_size() -> u32 {
    250
}

fn default_max_in_flight() -> usize {
    8
}

fn default_max_attempts() -> u32 {
    4
}

fn default_initial_backoff_ms() -> u64 {
    200
}

fn default_max_backoff_ms() -> u64 {
    5_000
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

impl AppConfig {
    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let admin_url = url::Url::parse(&self.hydra.admin_url)
            .map_err(|e| ConfigError::Validation(format!("hydra.admin_url is invalid: {e}")))?;
        if !matches!(admin_url.scheme(), "http" | "https") {
            return Err(ConfigError::Validation(
                "hydra.admin_url must use http or https".into(),
            ));
        }
        if !self.hydra.scopes_path.starts_with('/') {
            return Err(ConfigError::Validation(
                "hydra.scopes_path must start with '/'".into(),
            ));
        }
        if self.hydra.page_size == 0 {
            return Err(ConfigError::Validation("hydra.page_size must be > 0".into()));
        }
        if self.reconcile.max_in_flight == 0 {
            return Err(ConfigError::Validation(
                "reconcile.max_in_flight must be > 0".into(),
            ));
        }
        if self.reconcile.max_attempts == 0 {
            return Err(ConfigError::Validation(
                "reconcile.max_attempts must be > 0".into(),
            ));
        }
        if self.reconcile.initial_backoff_ms > self.reconcile.max_backoff_ms {
            return Err(ConfigError::Validation(
                "reconcile.initial_backoff_ms must not exceed reconcile.max_backoff_ms".into(),
            ));
        }
        Ok(())
    }
}

/// Load application configuration from `config.yaml` + environment overrides.
///
/// Any environment variable matching the key path separated by double
/// underscores (e.g. `HYDRA__ADMIN_URL`) overrides the file value. A `.env`
/// file in the working directory is read first if present.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    use config::{Config, Environment, File};

    // A missing .env is normal outside of local development.
    let _ = dotenvy::dotenv();

    let cfg = Config::builder()
        .add_source(File::with_name("config.yaml").required(false))
        .add_source(Environment::default().separator("__"))
        .build()?;

    let app: AppConfig = cfg.try_deserialize()?;
    app.validate()?;
    Ok(app)
}

/// Convenience helper for binaries wanting panic-on-error behaviour.
pub fn load_config_or_panic() -> AppConfig {
    match load_config() {
        Ok(c) => c,
        Err(e) => panic!("Failed to load configuration: {e}"),
    }
}
