use serde::{Deserialize, Serialize};

use crate::accounts::AccountId;
use crate::state::ConfigUpdate;

/// Audit events emitted after every completed mutation, carrying the
/// identities and amounts involved. External consumers (payment rails,
/// statistics, reconciliation) subscribe via [`EventListener`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum VaultEvent {
    Deposited {
        account: AccountId,
        amount: u64,
        shares: u64,
    },
    WithdrawalRequested {
        request_id: u64,
        account: AccountId,
        shares: u64,
    },
    WithdrawalCancelled {
        request_id: u64,
        account: AccountId,
        shares: u64,
    },
    /// Normal FIFO fulfillment and forced out-of-order processing both
    /// emit this; `forced` distinguishes them for auditors.
    WithdrawalFulfilled {
        request_id: u64,
        account: AccountId,
        shares: u64,
        value: u64,
        forced: bool,
    },
    YieldReported {
        delta: i64,
        nav_after: u64,
    },
    FeeCollected {
        treasury: AccountId,
        fee_value: u64,
        fee_shares: u64,
    },
    HwmReset {
        price: u128,
    },
    OrphanedSharesSwept {
        shares: u64,
    },
    ParamChanged {
        update: ConfigUpdate,
    },
}

pub trait EventListener: Send {
    fn on_event(&mut self, event: &VaultEvent);
}

/// Buffers events behind a shared handle, so a clone kept by the test or
/// host stays readable after the vault takes ownership of the listener.
#[derive(Debug, Clone, Default)]
pub struct MemoryListener {
    events: std::sync::Arc<std::sync::Mutex<Vec<VaultEvent>>>,
}

impl MemoryListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<VaultEvent> {
        self.events.lock().expect("listener lock poisoned").clone()
    }
}

impl EventListener for MemoryListener {
    fn on_event(&mut self, event: &VaultEvent) {
        self.events.lock().expect("listener lock poisoned").push(event.clone());
    }
}
