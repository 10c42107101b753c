//! Timelock gate for sensitive parameter changes.
//!
//! Fee rate, cooldown period and treasury follow queue -> wait fixed delay
//! -> execute, with cancellation allowed before execution. Caps, buffer
//! target and the yield bound bypass the gate and apply immediately.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::errors::VaultError;
use crate::state::ConfigUpdate;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingChange {
    pub update: ConfigUpdate,
    pub queued_at: u64,
    pub execute_after: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelockGate {
    delay_secs: u64,
    next_ticket: u64,
    pending: FxHashMap<u64, PendingChange>,
}

impl TimelockGate {
    pub fn new(delay_secs: u64) -> Self {
        Self { delay_secs, next_ticket: 0, pending: FxHashMap::default() }
    }

    pub fn delay_secs(&self) -> u64 {
        self.delay_secs
    }

    /// Ticket the next queued change will receive.
    pub fn peek_next_ticket(&self) -> u64 {
        self.next_ticket
    }

    /// Queue a timelocked update. Returns a ticket for execute/cancel.
    pub fn queue(&mut self, update: ConfigUpdate, now: u64) -> Result<u64, VaultError> {
        if !update.is_timelocked() {
            return Err(VaultError::NotTimelocked);
        }
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.pending.insert(
            ticket,
            PendingChange { update, queued_at: now, execute_after: now + self.delay_secs },
        );
        Ok(ticket)
    }

    pub fn cancel(&mut self, ticket: u64) -> Result<PendingChange, VaultError> {
        self.pending.remove(&ticket).ok_or(VaultError::ChangeNotFound(ticket))
    }

    /// Remove and return a change whose delay has elapsed.
    pub fn take_executable(&mut self, ticket: u64, now: u64) -> Result<ConfigUpdate, VaultError> {
        let change = self.pending.get(&ticket).ok_or(VaultError::ChangeNotFound(ticket))?;
        if now < change.execute_after {
            return Err(VaultError::ChangeNotReady {
                ticket,
                execute_after: change.execute_after,
            });
        }
        Ok(self.pending.remove(&ticket).expect("checked above").update)
    }

    pub fn get(&self, ticket: u64) -> Option<&PendingChange> {
        self.pending.get(&ticket)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
