//! NAV and share-price computation.
//!
//! Pure functions of (assets, supply) — nothing here is cached, so every
//! operation observes a freshly derived price. Conversions floor in both
//! directions, always in the ledger's favor.

use crate::errors::VaultError;
use crate::math::mul_div;
use crate::state::{INITIAL_SHARE_PRICE, PRICE_SCALE};

/// Total value backing outstanding shares. Clamped at zero: deeply negative
/// reported yield never produces a negative NAV.
pub fn total_assets(total_deposited: u64, total_withdrawn: u64, accumulated_yield: i128) -> u64 {
    let nav = total_deposited as i128 - total_withdrawn as i128 + accumulated_yield;
    nav.clamp(0, u64::MAX as i128) as u64
}

/// Price of one share, scaled by [`PRICE_SCALE`].
pub fn share_price(assets: u64, supply: u64) -> u128 {
    if supply == 0 {
        return INITIAL_SHARE_PRICE;
    }
    (assets as u128) * PRICE_SCALE / (supply as u128)
}

/// Shares minted for `value` at the current rate, floored.
///
/// At zero supply the initial price applies (one share unit per value unit).
/// Zero assets with live supply means the shares are worthless: any deposit
/// converts to zero shares and is rejected upstream.
pub fn value_to_shares(value: u64, assets: u64, supply: u64) -> Result<u64, VaultError> {
    if supply == 0 {
        return Ok(value);
    }
    if assets == 0 {
        return Ok(0);
    }
    mul_div(value, supply, assets).ok_or(VaultError::AmountOverflow)
}

/// Value redeemed for `shares` at the current rate, floored.
pub fn shares_to_value(shares: u64, assets: u64, supply: u64) -> Result<u64, VaultError> {
    if supply == 0 {
        return Ok(0);
    }
    mul_div(shares, assets, supply).ok_or(VaultError::AmountOverflow)
}
