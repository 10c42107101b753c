//! Capability interface consumed by the vault.
//!
//! Role management itself lives outside the ledger; the vault only asks
//! who the owner is, whether a caller may fulfill withdrawals, and whether
//! an operation class is paused.

use rustc_hash::FxHashSet;

use crate::accounts::AccountId;
use crate::errors::VaultError;

pub trait AccessControl {
    fn owner(&self) -> AccountId;
    fn is_operator(&self, account: AccountId) -> bool;
    fn paused(&self) -> bool;
    fn deposits_paused(&self) -> bool;
    fn withdrawals_paused(&self) -> bool;

    fn require_owner(&self, caller: AccountId) -> Result<(), VaultError> {
        if caller != self.owner() {
            return Err(VaultError::NotOwner(caller));
        }
        Ok(())
    }

    fn require_operator(&self, caller: AccountId) -> Result<(), VaultError> {
        if !self.is_operator(caller) && caller != self.owner() {
            return Err(VaultError::NotOperator(caller));
        }
        Ok(())
    }
}

/// In-process registry: one owner, a set of operators, pause flags.
#[derive(Debug, Clone)]
pub struct StaticAccess {
    owner: AccountId,
    operators: FxHashSet<AccountId>,
    pub pause_all: bool,
    pub pause_deposits: bool,
    pub pause_withdrawals: bool,
}

impl StaticAccess {
    pub fn new(owner: AccountId) -> Self {
        Self {
            owner,
            operators: FxHashSet::default(),
            pause_all: false,
            pause_deposits: false,
            pause_withdrawals: false,
        }
    }

    pub fn with_operator(mut self, operator: AccountId) -> Self {
        self.operators.insert(operator);
        self
    }

    pub fn add_operator(&mut self, operator: AccountId) {
        self.operators.insert(operator);
    }

    pub fn remove_operator(&mut self, operator: AccountId) {
        self.operators.remove(&operator);
    }
}

impl AccessControl for StaticAccess {
    fn owner(&self) -> AccountId {
        self.owner
    }

    fn is_operator(&self, account: AccountId) -> bool {
        self.operators.contains(&account)
    }

    fn paused(&self) -> bool {
        self.pause_all
    }

    fn deposits_paused(&self) -> bool {
        self.pause_all || self.pause_deposits
    }

    fn withdrawals_paused(&self) -> bool {
        self.pause_all || self.pause_withdrawals
    }
}
