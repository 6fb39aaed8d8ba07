use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DispatchConfig {
    /// Candidates offered per dispatch before giving up.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// How long a driver has to answer one offer.
    #[serde(default = "default_accept_timeout_secs")]
    pub accept_timeout_secs: u64,
    #[serde(default = "default_search_radius_km")]
    pub search_radius_km: f64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_accept_timeout_secs() -> u64 {
    60
}
fn default_search_radius_km() -> f64 {
    10.0
}
fn default_sweep_interval_secs() -> u64 {
    1
}
fn default_log_level() -> String {
    "info".into()
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            accept_timeout_secs: default_accept_timeout_secs(),
            search_radius_km: default_search_radius_km(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            dispatch: DispatchConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl DispatchConfig {
    pub fn accept_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.accept_timeout_secs as i64)
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_secs)
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            // Base configuration; all keys carry in-code defaults so the
            // file is optional.
            .add_source(config::File::with_name("config/default").required(false))
            // Environment-specific overrides (config/development etc.)
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Local overrides, not checked in
            .add_source(config::File::with_name("config/local").required(false))
            // Environment variables, e.g. STRADA__DISPATCH__MAX_ATTEMPTS=5
            .add_source(config::Environment::with_prefix("STRADA").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
