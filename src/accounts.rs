//! Share balances.
//!
//! The ledger is the sole authority over balances: shares only move via
//! mint/burn/transfer issued by the vault. Account 0 is the vault's own
//! escrow account; shares parked there back pending withdrawal requests.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::errors::VaultError;

pub type AccountId = u64;

/// The vault's own account: escrow for pending withdrawals.
pub const VAULT_ACCOUNT: AccountId = 0;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShareLedger {
    balances: FxHashMap<AccountId, u64>,
    total_supply: u64,
}

impl ShareLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance_of(&self, account: AccountId) -> u64 {
        self.balances.get(&account).copied().unwrap_or(0)
    }

    pub fn total_supply(&self) -> u64 {
        self.total_supply
    }

    pub fn mint(&mut self, account: AccountId, shares: u64) -> Result<(), VaultError> {
        let supply = self.total_supply.checked_add(shares).ok_or(VaultError::AmountOverflow)?;
        let entry = self.balances.entry(account).or_insert(0);
        *entry = entry.checked_add(shares).ok_or(VaultError::AmountOverflow)?;
        self.total_supply = supply;
        Ok(())
    }

    pub fn burn(&mut self, account: AccountId, shares: u64) -> Result<(), VaultError> {
        let balance = self.balance_of(account);
        if balance < shares {
            return Err(VaultError::InsufficientShares { available: balance, requested: shares });
        }
        self.balances.insert(account, balance - shares);
        self.total_supply -= shares;
        Ok(())
    }

    pub fn transfer(
        &mut self,
        from: AccountId,
        to: AccountId,
        shares: u64,
    ) -> Result<(), VaultError> {
        let from_balance = self.balance_of(from);
        if from_balance < shares {
            return Err(VaultError::InsufficientShares {
                available: from_balance,
                requested: shares,
            });
        }
        if from == to {
            return Ok(());
        }
        let to_balance =
            self.balance_of(to).checked_add(shares).ok_or(VaultError::AmountOverflow)?;
        self.balances.insert(from, from_balance - shares);
        self.balances.insert(to, to_balance);
        Ok(())
    }

    /// Sum of all balances equals the supply counter. O(n); used by tests
    /// and fatal assertions, not on the hot path.
    pub fn check_conservation(&self) -> bool {
        let mut sum: u128 = 0;
        for balance in self.balances.values() {
            sum += *balance as u128;
        }
        sum == self.total_supply as u128
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mint_and_supply() {
        let mut ledger = ShareLedger::new();
        ledger.mint(1, 1000).unwrap();
        ledger.mint(2, 500).unwrap();
        assert_eq!(ledger.balance_of(1), 1000);
        assert_eq!(ledger.balance_of(2), 500);
        assert_eq!(ledger.total_supply(), 1500);
        assert!(ledger.check_conservation());
    }

    #[test]
    fn test_burn_insufficient() {
        let mut ledger = ShareLedger::new();
        ledger.mint(1, 100).unwrap();
        let result = ledger.burn(1, 101);
        assert_eq!(result, Err(VaultError::InsufficientShares { available: 100, requested: 101 }));
        assert_eq!(ledger.total_supply(), 100);
    }

    #[test]
    fn test_transfer_preserves_supply() {
        let mut ledger = ShareLedger::new();
        ledger.mint(1, 100).unwrap();
        ledger.transfer(1, VAULT_ACCOUNT, 40).unwrap();
        assert_eq!(ledger.balance_of(1), 60);
        assert_eq!(ledger.balance_of(VAULT_ACCOUNT), 40);
        assert_eq!(ledger.total_supply(), 100);
        assert!(ledger.check_conservation());
    }

    #[test]
    fn test_transfer_to_self_is_noop() {
        let mut ledger = ShareLedger::new();
        ledger.mint(1, 100).unwrap();
        ledger.transfer(1, 1, 100).unwrap();
        assert_eq!(ledger.balance_of(1), 100);
    }

    #[test]
    fn test_mint_overflow() {
        let mut ledger = ShareLedger::new();
        ledger.mint(1, u64::MAX).unwrap();
        assert_eq!(ledger.mint(2, 1), Err(VaultError::AmountOverflow));
    }
}
