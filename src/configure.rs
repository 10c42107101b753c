use config::{Config, ConfigError, File};
use serde::Deserialize;

use crate::state::{VaultConfig, VaultParams};

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    pub log_level: String,
    pub log_to_file: bool,
    pub log_file: String,
    pub wal_dir: String,
    pub snapshot_dir: String,

    pub venue: String,
    pub currency_decimals: u32,
    pub display_decimals: u32,

    pub owner_account: u64,
    pub operator_account: u64,
    pub treasury_account: u64,

    // Rates in 10^6 precision (100_000 = 10%)
    pub fee_rate: u64,
    pub max_yield_change_rate: u64,
    pub cooldown_secs: u64,
    pub user_cap: u64,
    pub global_cap: u64,
    pub buffer_target: u64,
    pub timelock_delay_secs: u64,
}

impl AppConfig {
    pub fn vault_params(&self) -> VaultParams {
        VaultParams { venue: self.venue.clone(), currency_decimals: self.currency_decimals }
    }

    pub fn vault_config(&self) -> VaultConfig {
        VaultConfig {
            fee_rate: self.fee_rate,
            cooldown_secs: self.cooldown_secs,
            treasury: self.treasury_account,
            user_cap: self.user_cap,
            global_cap: self.global_cap,
            buffer_target: self.buffer_target,
            max_yield_change_rate: self.max_yield_change_rate,
        }
    }
}

pub fn load_config() -> Result<AppConfig, ConfigError> {
    let s = Config::builder()
        // Set defaults
        .set_default("log_level", "info")?
        .set_default("log_to_file", false)?
        .set_default("log_file", "log/vaultd.log")?
        .set_default("wal_dir", "data/wal")?
        .set_default("snapshot_dir", "data/snapshots")?
        .set_default("venue", "custody")?
        .set_default("currency_decimals", 6_i64)?
        .set_default("display_decimals", 2_i64)?
        .set_default("owner_account", 1_i64)?
        .set_default("operator_account", 2_i64)?
        .set_default("treasury_account", 3_i64)?
        .set_default("fee_rate", 100_000_i64)?
        .set_default("max_yield_change_rate", 100_000_i64)?
        .set_default("cooldown_secs", 24 * 3600_i64)?
        .set_default("user_cap", 0_i64)?
        .set_default("global_cap", 0_i64)?
        .set_default("buffer_target", 0_i64)?
        .set_default("timelock_delay_secs", 2 * 24 * 3600_i64)?
        // Add configuration from a file
        .add_source(File::with_name("config/vaultd").required(false))
        // Add configuration from environment variables
        .add_source(config::Environment::with_prefix("VAULT"))
        .build()?;

    s.try_deserialize()
}
