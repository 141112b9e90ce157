//! # Engine Configuration
//!
//! Configuration for the sale engine and its invoice worker.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     TALLY_DB_PATH=/var/lib/tally/tally.db                              │
//! │     TALLY_FISCAL_ENABLED=false                                         │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/tally-pos/engine.toml (Linux)                            │
//! │     ~/Library/Application Support/com.tally.pos/engine.toml (macOS)    │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # engine.toml
//! [database]
//! path = "./tally.db"
//! max_connections = 5
//!
//! [pricing]
//! redemption_cents_per_point = 100   # one point is worth 1.00
//! earn_rate_bps = 100                # one point per 100.00 spent
//!
//! [business_day]
//! cutoff = "04:00"                   # sales before 04:00 belong to the previous day
//! utc_offset_minutes = -180
//!
//! [fiscal]
//! enabled = true
//! poll_interval_secs = 30
//! batch_size = 20
//! max_attempts = 8
//! initial_backoff_ms = 2000
//! max_backoff_secs = 900
//!
//! [void]
//! reverse_store_credit = false
//! ```

use chrono::{FixedOffset, NaiveTime};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tally_core::business_day::BusinessDayRule;
use tally_core::Money;
use tally_db::DbConfig;
use tracing::{debug, info, warn};

use crate::error::{EngineError, EngineResult};

// =============================================================================
// Sections
// =============================================================================

/// `[database]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./tally.db")
}

fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: default_db_path(),
            max_connections: default_max_connections(),
        }
    }
}

impl DatabaseSettings {
    pub fn db_config(&self) -> DbConfig {
        DbConfig::new(&self.path).max_connections(self.max_connections)
    }
}

/// `[pricing]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingSettings {
    /// Value of one loyalty point, in cents.
    #[serde(default = "default_redemption_cents")]
    pub redemption_cents_per_point: i64,

    /// Points earned per currency unit, in basis points.
    #[serde(default = "default_earn_rate")]
    pub earn_rate_bps: u32,
}

fn default_redemption_cents() -> i64 {
    100
}

fn default_earn_rate() -> u32 {
    100
}

impl Default for PricingSettings {
    fn default() -> Self {
        PricingSettings {
            redemption_cents_per_point: default_redemption_cents(),
            earn_rate_bps: default_earn_rate(),
        }
    }
}

impl PricingSettings {
    pub fn redemption_rate(&self) -> Money {
        Money::from_cents(self.redemption_cents_per_point)
    }
}

/// `[business_day]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusinessDaySettings {
    /// Local time (`HH:MM`) at which a new business day starts.
    #[serde(default = "default_cutoff")]
    pub cutoff: String,

    #[serde(default)]
    pub utc_offset_minutes: i32,
}

fn default_cutoff() -> String {
    "00:00".to_string()
}

impl Default for BusinessDaySettings {
    fn default() -> Self {
        BusinessDaySettings {
            cutoff: default_cutoff(),
            utc_offset_minutes: 0,
        }
    }
}

/// `[fiscal]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FiscalSettings {
    /// Queue an invoice job for every sale.
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Attempts before a job is given up (job FAILED, invoice left for manual retry).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,
}

fn default_true() -> bool {
    true
}
fn default_poll_interval() -> u64 {
    30
}
fn default_batch_size() -> u32 {
    20
}
fn default_max_attempts() -> u32 {
    8
}
fn default_initial_backoff() -> u64 {
    2000
}
fn default_max_backoff() -> u64 {
    900
}

impl Default for FiscalSettings {
    fn default() -> Self {
        FiscalSettings {
            enabled: default_true(),
            poll_interval_secs: default_poll_interval(),
            batch_size: default_batch_size(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
        }
    }
}

impl FiscalSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// `[void]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VoidSettings {
    /// Give back store credit spent on a voided sale and take back change
    /// that was kept as credit.
    #[serde(default)]
    pub reverse_store_credit: bool,
}

// =============================================================================
// Engine Config
// =============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub pricing: PricingSettings,

    #[serde(default)]
    pub business_day: BusinessDaySettings,

    #[serde(default)]
    pub fiscal: FiscalSettings,

    #[serde(default)]
    pub void: VoidSettings,
}

impl EngineConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (engine.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> EngineResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading engine config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load engine config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> EngineResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| EngineError::invalid_config("No config path available"))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Engine config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> EngineResult<()> {
        if self.database.max_connections == 0 {
            return Err(EngineError::invalid_config(
                "database.max_connections must be greater than 0",
            ));
        }

        if self.pricing.redemption_cents_per_point < 0 {
            return Err(EngineError::invalid_config(
                "pricing.redemption_cents_per_point must not be negative",
            ));
        }

        self.business_day_rule()?;

        if self.fiscal.batch_size == 0 {
            return Err(EngineError::invalid_config(
                "fiscal.batch_size must be greater than 0",
            ));
        }
        if self.fiscal.poll_interval_secs == 0 {
            return Err(EngineError::invalid_config(
                "fiscal.poll_interval_secs must be greater than 0",
            ));
        }
        if self.fiscal.max_attempts == 0 {
            return Err(EngineError::invalid_config(
                "fiscal.max_attempts must be greater than 0",
            ));
        }
        if self.fiscal.initial_backoff_ms > self.fiscal.max_backoff_secs * 1000 {
            return Err(EngineError::invalid_config(
                "fiscal.initial_backoff_ms must not exceed fiscal.max_backoff_secs",
            ));
        }

        Ok(())
    }

    /// The business-day rule described by `[business_day]`.
    pub fn business_day_rule(&self) -> EngineResult<BusinessDayRule> {
        let cutoff = NaiveTime::parse_from_str(&self.business_day.cutoff, "%H:%M").map_err(|_| {
            EngineError::invalid_config(format!(
                "business_day.cutoff must be HH:MM, got: {}",
                self.business_day.cutoff
            ))
        })?;

        let offset = FixedOffset::east_opt(self.business_day.utc_offset_minutes * 60)
            .ok_or_else(|| {
                EngineError::invalid_config(format!(
                    "business_day.utc_offset_minutes out of range: {}",
                    self.business_day.utc_offset_minutes
                ))
            })?;

        Ok(BusinessDayRule::new(offset, cutoff))
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("TALLY_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = PathBuf::from(path);
        }

        if let Ok(rate) = std::env::var("TALLY_EARN_RATE_BPS") {
            if let Ok(r) = rate.parse::<u32>() {
                self.pricing.earn_rate_bps = r;
            }
        }

        if let Ok(cutoff) = std::env::var("TALLY_BUSINESS_DAY_CUTOFF") {
            self.business_day.cutoff = cutoff;
        }

        if let Ok(offset) = std::env::var("TALLY_UTC_OFFSET_MINUTES") {
            if let Ok(m) = offset.parse::<i32>() {
                self.business_day.utc_offset_minutes = m;
            }
        }

        if let Ok(enabled) = std::env::var("TALLY_FISCAL_ENABLED") {
            match enabled.to_lowercase().as_str() {
                "1" | "true" | "yes" => self.fiscal.enabled = true,
                "0" | "false" | "no" => self.fiscal.enabled = false,
                _ => warn!(value = %enabled, "Unknown TALLY_FISCAL_ENABLED value in environment"),
            }
        }

        if let Ok(reverse) = std::env::var("TALLY_REVERSE_STORE_CREDIT") {
            if let Ok(r) = reverse.parse::<bool>() {
                self.void.reverse_store_credit = r;
            }
        }
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "tally", "pos")
            .map(|dirs| dirs.config_dir().join("engine.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.pricing.redemption_cents_per_point, 100);
        assert_eq!(config.pricing.earn_rate_bps, 100);
        assert!(config.fiscal.enabled);
        assert!(!config.void.reverse_store_credit);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
            [fiscal]
            enabled = false

            [void]
            reverse_store_credit = true
            "#,
        )
        .unwrap();

        assert!(!config.fiscal.enabled);
        assert_eq!(config.fiscal.max_attempts, 8);
        assert!(config.void.reverse_store_credit);
        assert_eq!(config.database.path, PathBuf::from("./tally.db"));
    }

    #[test]
    fn test_config_validation() {
        let mut config = EngineConfig::default();
        config.fiscal.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.business_day.cutoff = "25:99".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.message.contains("cutoff"));

        let mut config = EngineConfig::default();
        config.fiscal.initial_backoff_ms = 2_000_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_business_day_rule_from_settings() {
        let mut config = EngineConfig::default();
        config.business_day.cutoff = "04:00".to_string();
        config.business_day.utc_offset_minutes = -180;
        let rule = config.business_day_rule().unwrap();

        // 05:30 UTC is 02:30 local, before the cutoff.
        let at = Utc.with_ymd_and_hms(2024, 3, 10, 5, 30, 0).unwrap();
        assert_eq!(rule.business_date(at), NaiveDate::from_ymd_opt(2024, 3, 9).unwrap());
    }

    #[test]
    fn test_toml_serialization() {
        let config = EngineConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[fiscal]"));
        assert!(toml_str.contains("earn_rate_bps = 100"));

        let parsed: EngineConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, config);
    }
}
