//! Withdrawal Request Queue
//!
//! Append-only ordered log of withdrawal requests with a forward-only head
//! pointer. Request ids are absolute queue indices and stay valid across
//! storage reclamation: purging cleared entries behind the head only shifts
//! the physical deque, never the id space.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::accounts::AccountId;
use crate::errors::VaultError;

/// Request lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestStatus {
    /// Shares escrowed, waiting for fulfillment
    Pending,
    /// Shares burned and value paid out (normal or forced)
    Fulfilled,
    /// Shares returned to the requester
    Cancelled,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Fulfilled => "fulfilled",
            RequestStatus::Cancelled => "cancelled",
        }
    }

    /// Fulfilled and Cancelled are terminal: no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestStatus::Fulfilled | RequestStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawalRequest {
    pub account: AccountId,
    pub shares: u64,
    pub requested_at: u64,
    pub status: RequestStatus,
}

impl WithdrawalRequest {
    /// Cancelled or fulfilled entries are "cleared": the head skips them
    /// without touching balances.
    pub fn is_cleared(&self) -> bool {
        self.status.is_terminal()
    }

    /// Zero the entry once resolved. The id stays valid; the shares field
    /// no longer backs any escrow.
    fn clear(&mut self, status: RequestStatus) {
        self.status = status;
        self.shares = 0;
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WithdrawalQueue {
    entries: VecDeque<WithdrawalRequest>,
    /// Absolute index of the first entry still physically stored.
    base: u64,
    /// Absolute index of the first unprocessed entry. Never decreases.
    head: u64,
}

impl WithdrawalQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a new pending request. Returns its id.
    pub fn push(&mut self, account: AccountId, shares: u64, requested_at: u64) -> u64 {
        let id = self.end();
        self.entries.push_back(WithdrawalRequest {
            account,
            shares,
            requested_at,
            status: RequestStatus::Pending,
        });
        id
    }

    /// Absolute index one past the last entry ever appended.
    pub fn end(&self) -> u64 {
        self.base + self.entries.len() as u64
    }

    pub fn head(&self) -> u64 {
        self.head
    }

    /// Entries at or past the head that are not yet resolved.
    pub fn is_drained(&self) -> bool {
        self.head >= self.end()
    }

    pub fn get(&self, id: u64) -> Option<&WithdrawalRequest> {
        if id < self.base {
            return None;
        }
        self.entries.get((id - self.base) as usize)
    }

    /// Look up a request that must still be pending.
    pub fn get_pending(&self, id: u64) -> Result<&WithdrawalRequest, VaultError> {
        let request = self.get(id).ok_or(VaultError::RequestNotFound(id))?;
        if request.is_cleared() {
            return Err(VaultError::RequestAlreadyResolved(id));
        }
        Ok(request)
    }

    /// Resolve a pending request, zeroing it. Returns (account, shares) as
    /// they were before clearing.
    pub fn resolve(
        &mut self,
        id: u64,
        status: RequestStatus,
    ) -> Result<(AccountId, u64), VaultError> {
        if id < self.base {
            return Err(VaultError::RequestNotFound(id));
        }
        let request = self
            .entries
            .get_mut((id - self.base) as usize)
            .ok_or(VaultError::RequestNotFound(id))?;
        if request.is_cleared() {
            return Err(VaultError::RequestAlreadyResolved(id));
        }
        let account = request.account;
        let shares = request.shares;
        request.clear(status);
        Ok((account, shares))
    }

    /// Move the head forward by one. The head only ever advances.
    pub fn advance_head(&mut self) {
        debug_assert!(self.head < self.end());
        self.head += 1;
    }

    /// Jump the head to an absolute position (replay only). Monotonic.
    pub fn set_head(&mut self, head: u64) {
        debug_assert!(head >= self.head && head <= self.end());
        self.head = head;
    }

    /// Number of pending requests owned by `account`. Linear scan over the
    /// live window, bounded in practice by MAX_PENDING_PER_USER per account.
    pub fn pending_count(&self, account: AccountId) -> usize {
        self.entries
            .iter()
            .filter(|r| r.account == account && r.status == RequestStatus::Pending)
            .count()
    }

    /// Reclaim storage for cleared entries behind the head. Pure
    /// housekeeping: ids, the head and all accounting are unaffected.
    /// Returns how many entries were dropped.
    pub fn purge_processed(&mut self, limit: usize) -> usize {
        let mut purged = 0;
        while purged < limit && self.base < self.head {
            match self.entries.front() {
                Some(front) if front.is_cleared() => {
                    self.entries.pop_front();
                    self.base += 1;
                    purged += 1;
                }
                _ => break,
            }
        }
        purged
    }

    /// head <= end, base <= head. Checked by tests and fatal assertions.
    pub fn check_bounds(&self) -> bool {
        self.base <= self.head && self.head <= self.end()
    }
}
