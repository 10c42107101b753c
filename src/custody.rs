//! Custody venue adapter
//!
//! The venue that actually deploys capital is external. The vault forwards
//! value above its liquidity buffer and recalls value on demand for payouts.
//! A venue that cannot return funds produces the partial-fulfillment path,
//! never a ledger fault.

use crate::errors::VaultError;

pub trait CustodyVenue: Send {
    /// Push value from the vault's buffer to the venue.
    fn forward(&mut self, amount: u64) -> Result<(), VaultError>;

    /// Ask the venue to return up to `amount`. Returns what actually came
    /// back, which may be less than requested or zero.
    fn recall(&mut self, amount: u64) -> u64;

    /// Value the venue reports holding on the vault's behalf.
    fn held(&self) -> u64;

    /// Venue name for logging.
    fn name(&self) -> &str;
}

/// In-process venue used by tests and the demo binary. `locked` models
/// capital the venue cannot return on demand.
#[derive(Debug, Default)]
pub struct MockCustody {
    held: u64,
    pub locked: u64,
}

impl MockCustody {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CustodyVenue for MockCustody {
    fn forward(&mut self, amount: u64) -> Result<(), VaultError> {
        self.held = self.held.checked_add(amount).ok_or(VaultError::AmountOverflow)?;
        Ok(())
    }

    fn recall(&mut self, amount: u64) -> u64 {
        let liquid = self.held.saturating_sub(self.locked);
        let returned = amount.min(liquid);
        self.held -= returned;
        returned
    }

    fn held(&self) -> u64 {
        self.held
    }

    fn name(&self) -> &str {
        "mock"
    }
}
