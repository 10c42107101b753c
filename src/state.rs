//! Vault scalar state, operational configuration, and protocol constants.

use serde::{Deserialize, Serialize};

use crate::accounts::AccountId;
use crate::errors::VaultError;

// ==========================================
// 1. Protocol Constants
// ==========================================

/// Share price scale: prices carry 18 decimals of precision.
pub const PRICE_SCALE: u128 = 1_000_000_000_000_000_000;

/// Price of one share before any shares exist: one value unit per share.
pub const INITIAL_SHARE_PRICE: u128 = PRICE_SCALE;

/// Rate scale for fee and yield-bound rates (10_000 = 1%).
pub const RATE_SCALE: u64 = 1_000_000;

/// Hard ceiling on the performance fee rate: 30%.
pub const MAX_FEE_RATE: u64 = 300_000;

/// Max simultaneously pending withdrawal requests per account.
pub const MAX_PENDING_PER_USER: usize = 10;

/// Window after a request during which the requester may self-cancel.
pub const CANCEL_WINDOW_SECS: u64 = 3600;

// ==========================================
// 2. Immutable Identity Parameters
// ==========================================

/// Fixed at initialization, never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultParams {
    /// Name of the external custody venue, for logs and events.
    pub venue: String,
    /// Decimals of the underlying value token (e.g. 6 for a USD stable).
    pub currency_decimals: u32,
}

impl Default for VaultParams {
    fn default() -> Self {
        Self { venue: "custody".to_string(), currency_decimals: 6 }
    }
}

// ==========================================
// 3. Mutable Operational Configuration
// ==========================================

/// Operational parameters. Caps and the buffer target change immediately;
/// fee rate, cooldown and treasury go through the timelock gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Performance fee rate in RATE_SCALE precision (100_000 = 10%).
    pub fee_rate: u64,
    /// Minimum wait between a withdrawal request and fulfillment eligibility.
    pub cooldown_secs: u64,
    /// Account credited with minted fee shares.
    pub treasury: AccountId,
    /// Max value a single account may hold. 0 = unlimited.
    pub user_cap: u64,
    /// Max total assets under management. 0 = unlimited.
    pub global_cap: u64,
    /// Value the vault keeps on hand; deposits above it are forwarded to the
    /// custody venue.
    pub buffer_target: u64,
    /// Per-report yield bound in RATE_SCALE precision. 0 = unbounded.
    pub max_yield_change_rate: u64,
}

impl VaultConfig {
    pub fn validate(&self) -> Result<(), VaultError> {
        if self.fee_rate > MAX_FEE_RATE {
            return Err(VaultError::FeeRateTooHigh { rate: self.fee_rate, max: MAX_FEE_RATE });
        }
        Ok(())
    }
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            fee_rate: 100_000, // 10%
            cooldown_secs: 24 * 3600,
            treasury: 1,
            user_cap: 0,
            global_cap: 0,
            buffer_target: 0,
            max_yield_change_rate: 100_000, // 10% of NAV per report
        }
    }
}

/// A single applied configuration update. Shared by the timelock gate,
/// the WAL, and the event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigUpdate {
    FeeRate(u64),
    CooldownSecs(u64),
    Treasury(AccountId),
    UserCap(u64),
    GlobalCap(u64),
    BufferTarget(u64),
    MaxYieldChangeRate(u64),
}

impl ConfigUpdate {
    /// Fee rate, cooldown and treasury only change after the timelock delay.
    pub fn is_timelocked(&self) -> bool {
        matches!(self, Self::FeeRate(_) | Self::CooldownSecs(_) | Self::Treasury(_))
    }

    pub fn apply(&self, config: &mut VaultConfig) -> Result<(), VaultError> {
        match *self {
            Self::FeeRate(rate) => {
                if rate > MAX_FEE_RATE {
                    return Err(VaultError::FeeRateTooHigh { rate, max: MAX_FEE_RATE });
                }
                config.fee_rate = rate;
            }
            Self::CooldownSecs(secs) => config.cooldown_secs = secs,
            Self::Treasury(account) => config.treasury = account,
            Self::UserCap(cap) => config.user_cap = cap,
            Self::GlobalCap(cap) => config.global_cap = cap,
            Self::BufferTarget(target) => config.buffer_target = target,
            Self::MaxYieldChangeRate(rate) => config.max_yield_change_rate = rate,
        }
        Ok(())
    }
}

// ==========================================
// 4. Accounting Scalars
// ==========================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultState {
    /// Cumulative value ever deposited.
    pub total_deposited: u64,
    /// Cumulative value ever paid out.
    pub total_withdrawn: u64,
    /// Signed accumulated yield reported by the owner.
    pub accumulated_yield: i128,
    /// Shares escrowed for pending withdrawal requests.
    pub pending_withdrawal_shares: u64,
    /// Highest share price at which fees have been assessed.
    pub price_hwm: u128,
    /// Timestamp of the last yield report (unix seconds).
    pub last_yield_report: u64,
    /// Value currently held by the vault itself (the liquidity buffer).
    pub cash: u64,
}

impl Default for VaultState {
    fn default() -> Self {
        Self {
            total_deposited: 0,
            total_withdrawn: 0,
            accumulated_yield: 0,
            pending_withdrawal_shares: 0,
            price_hwm: INITIAL_SHARE_PRICE,
            last_yield_report: 0,
            cash: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_validate_fee_ceiling() {
        let mut config = VaultConfig::default();
        assert!(config.validate().is_ok());

        config.fee_rate = MAX_FEE_RATE + 1;
        assert_eq!(
            config.validate(),
            Err(VaultError::FeeRateTooHigh { rate: MAX_FEE_RATE + 1, max: MAX_FEE_RATE })
        );
    }

    #[test]
    fn test_update_apply_enforces_fee_ceiling() {
        let mut config = VaultConfig::default();
        let result = ConfigUpdate::FeeRate(MAX_FEE_RATE + 1).apply(&mut config);
        assert!(result.is_err());
        assert_eq!(config.fee_rate, VaultConfig::default().fee_rate);

        ConfigUpdate::FeeRate(MAX_FEE_RATE).apply(&mut config).unwrap();
        assert_eq!(config.fee_rate, MAX_FEE_RATE);
    }

    #[test]
    fn test_timelocked_classification() {
        assert!(ConfigUpdate::FeeRate(1).is_timelocked());
        assert!(ConfigUpdate::CooldownSecs(1).is_timelocked());
        assert!(ConfigUpdate::Treasury(2).is_timelocked());
        assert!(!ConfigUpdate::UserCap(1).is_timelocked());
        assert!(!ConfigUpdate::GlobalCap(1).is_timelocked());
        assert!(!ConfigUpdate::BufferTarget(1).is_timelocked());
        assert!(!ConfigUpdate::MaxYieldChangeRate(1).is_timelocked());
    }
}
