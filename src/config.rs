use anyhow::{anyhow, Result};
use chrono_tz::Tz;
use serde_derive::Deserialize;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

fn default_log_level() -> String {
    "info".to_string()
}

fn default_tz() -> String {
    "Europe/Dublin".to_string()
}

#[derive(Deserialize, Debug)]
pub struct AppConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    // wall-clock zone of the meter readings
    #[serde(default = "default_tz")]
    pub tz: String,
}

impl AppConfig {
    pub fn log_level(&self) -> tracing::Level {
        tracing::Level::from_str(self.log_level.as_str()).unwrap_or(tracing::Level::INFO)
    }

    pub fn time_zone(&self) -> Result<Tz> {
        Tz::from_str(&self.tz).map_err(|err| anyhow!("Invalid time zone '{}': {}", self.tz, err))
    }
}

pub(crate) fn load_app_config() -> Result<AppConfig> {
    match envy::from_env::<AppConfig>() {
        Ok(config) => Ok(config),
        Err(err) => Err(anyhow!("Failed to load AppConfig: {}", err)),
    }
}

fn default_portal_url() -> String {
    "https://myaccount.esbnetworks.ie".to_string()
}

fn default_login_url() -> String {
    "https://login.esbnetworks.ie".to_string()
}

fn default_tenant() -> String {
    "esbntwkscustportalprdb2c01.onmicrosoft.com".to_string()
}

fn default_policy() -> String {
    "B2C_1A_signup_signin".to_string()
}

fn default_true() -> bool {
    true
}

fn default_connect_timeout_seconds() -> u64 {
    10
}

fn default_request_timeout_seconds() -> u64 {
    120
}

/// Endpoints and behaviour of the ESB Networks portal walk.
#[derive(Deserialize, Debug, Clone)]
pub struct EsbConfig {
    #[serde(default = "default_portal_url")]
    pub portal_url: String,
    #[serde(default = "default_login_url")]
    pub login_url: String,
    #[serde(default = "default_tenant")]
    pub tenant: String,
    #[serde(default = "default_policy")]
    pub policy: String,
    // random human-like pauses between steps
    #[serde(default = "default_true")]
    pub request_delays: bool,
    #[serde(default = "default_connect_timeout_seconds")]
    pub connect_timeout_seconds: u64,
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
    #[serde(default)]
    pub cache_file: Option<PathBuf>,
    #[serde(default)]
    pub use_cache: bool,
}

impl EsbConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    /// Base URL of the B2C policy, e.g. `https://login.../tenant/B2C_1A_signup_signin`.
    pub fn policy_url(&self) -> String {
        format!(
            "{}/{}/{}",
            self.login_url.trim_end_matches('/'),
            self.tenant,
            self.policy
        )
    }
}

pub(crate) fn load_esb_config() -> Result<EsbConfig> {
    match envy::prefixed("ESB_").from_env::<EsbConfig>() {
        Ok(config) => Ok(config),
        Err(err) => Err(anyhow!("Failed to load EsbConfig: {}", err)),
    }
}

/// Credentials supplied directly through the environment and/or an accounts file.
#[derive(Deserialize, Debug, Default)]
pub struct AccountConfig {
    pub mprn: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub accounts_file: Option<PathBuf>,
}

pub(crate) fn load_account_config() -> Result<AccountConfig> {
    match envy::prefixed("ESB_").from_env::<AccountConfig>() {
        Ok(config) => Ok(config),
        Err(err) => Err(anyhow!("Failed to load AccountConfig: {}", err)),
    }
}

fn default_update_interval_sec() -> u64 {
    24 * 60 * 60
}

fn default_task_timeout_seconds() -> u64 {
    30 * 60
}

#[derive(Deserialize, Debug)]
pub struct CoordinatorConfig {
    #[serde(default = "default_update_interval_sec")]
    pub update_interval_sec: u64,
    #[serde(default = "default_task_timeout_seconds")]
    pub task_timeout_seconds: u64,
}

pub fn load_coordinator_config() -> Result<CoordinatorConfig> {
    match envy::prefixed("COORDINATOR_").from_env::<CoordinatorConfig>() {
        Ok(config) => Ok(config),
        Err(err) => Err(anyhow!("Failed to load CoordinatorConfig: {}", err)),
    }
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_cooldown_seconds() -> u64 {
    6 * 60 * 60
}

#[derive(Deserialize, Debug)]
pub struct LoginGuardSettings {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: u64,
}

pub fn load_login_guard_config() -> Result<LoginGuardSettings> {
    match envy::prefixed("LOGIN_GUARD_").from_env::<LoginGuardSettings>() {
        Ok(config) => Ok(config),
        Err(err) => Err(anyhow!("Failed to load LoginGuardSettings: {}", err)),
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    #[default]
    HomeAssistant,
    Influxdb,
}

#[derive(Deserialize, Debug)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
}

pub fn load_store_config() -> Result<StoreConfig> {
    match envy::prefixed("STORE_").from_env::<StoreConfig>() {
        Ok(config) => Ok(config),
        Err(err) => Err(anyhow!("Failed to load StoreConfig: {}", err)),
    }
}

fn default_lookback_days() -> u64 {
    730
}

#[derive(Deserialize, Debug, Clone)]
pub struct HassConfig {
    pub url: String,
    pub token: String,
    // how far back to look for the last stored statistic; a meter whose newest row is
    // older than this restarts its sum at zero
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u64,
}

impl HassConfig {
    pub fn websocket_url(&self) -> String {
        let base = self.url.trim_end_matches('/');
        let base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            base.to_string()
        };
        format!("{}/api/websocket", base)
    }
}

pub fn load_hass_config() -> Result<HassConfig> {
    match envy::prefixed("HASS_").from_env::<HassConfig>() {
        Ok(config) => Ok(config),
        Err(err) => Err(anyhow!("Failed to load HassConfig: {}", err)),
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct InfluxConfig {
    pub url: String,
    pub token: String,
    pub org: String,
    pub bucket: String,
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u64,
}

pub fn load_influx_config() -> Result<InfluxConfig> {
    match envy::prefixed("INFLUXDB_").from_env::<InfluxConfig>() {
        Ok(config) => Ok(config),
        Err(err) => Err(anyhow!("Failed to load InfluxConfig: {}", err)),
    }
}
