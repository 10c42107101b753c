//! The vault ledger: single context object owning all accounting state.
//!
//! Every public operation is one atomic unit of work: validate, append the
//! applied outcome to the WAL, mutate in-memory state, then (and only then)
//! touch the external custody venue. A failed operation mutates nothing.
//! Invariant violations do not come back as errors: they panic with a
//! "Critical:" message because they mean the accounting is broken.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use log::{debug, info, warn};

use crate::access::AccessControl;
use crate::accounts::{AccountId, ShareLedger, VAULT_ACCOUNT};
use crate::custody::CustodyVenue;
use crate::errors::VaultError;
use crate::events::{EventListener, VaultEvent};
use crate::pricing;
use crate::queue::{RequestStatus, WithdrawalQueue};
use crate::state::{
    ConfigUpdate, VaultConfig, VaultParams, VaultState, CANCEL_WINDOW_SECS, MAX_FEE_RATE,
    MAX_PENDING_PER_USER, RATE_SCALE,
};
use crate::timelock::TimelockGate;
use crate::wal::{Snapshot, VaultCommand, VaultWal};

pub struct Vault<C: CustodyVenue, A: AccessControl> {
    params: VaultParams,
    config: VaultConfig,
    state: VaultState,
    shares: ShareLedger,
    queue: WithdrawalQueue,
    gate: TimelockGate,
    custody: C,
    access: A,
    wal: Option<VaultWal>,
    snapshot_dir: Option<PathBuf>,
    listener: Option<Box<dyn EventListener>>,
    in_operation: bool,
    last_seq: u64,
}

impl<C: CustodyVenue, A: AccessControl> Vault<C, A> {
    /// In-memory vault without durability. Used by tests and embedding.
    pub fn new(
        params: VaultParams,
        config: VaultConfig,
        timelock_delay_secs: u64,
        custody: C,
        access: A,
    ) -> Result<Self, VaultError> {
        config.validate()?;
        Ok(Self {
            params,
            config,
            state: VaultState::default(),
            shares: ShareLedger::new(),
            queue: WithdrawalQueue::new(),
            gate: TimelockGate::new(timelock_delay_secs),
            custody,
            access,
            wal: None,
            snapshot_dir: None,
            listener: None,
            in_operation: false,
            last_seq: 0,
        })
    }

    /// Durable vault: recover from the newest snapshot plus WAL replay,
    /// then keep appending.
    pub fn open(
        params: VaultParams,
        config: VaultConfig,
        timelock_delay_secs: u64,
        custody: C,
        access: A,
        wal_dir: &Path,
        snapshot_dir: &Path,
    ) -> Result<Self> {
        config.validate().map_err(|e| anyhow::anyhow!(e.to_string()))?;
        let mut vault = Self::new(params, config, timelock_delay_secs, custody, access)
            .map_err(|e| anyhow::anyhow!(e.to_string()))?;
        vault.snapshot_dir = Some(snapshot_dir.to_path_buf());

        let mut recovered_seq = 0;
        if let Some(snap) = Snapshot::load_latest(snapshot_dir)? {
            info!("Recovering from snapshot at seq {}", snap.last_seq);
            recovered_seq = snap.last_seq;
            vault.shares = snap.shares;
            vault.state = snap.state;
            vault.config = snap.config;
            vault.queue = snap.queue;
            vault.gate = snap.gate;
        }

        let mut replayed = 0;
        for record in VaultWal::replay_iter(wal_dir, recovered_seq)? {
            let (seq, cmd) = record?;
            if seq <= recovered_seq {
                continue;
            }
            if seq != recovered_seq + 1 {
                bail!("WAL sequence gap: expected {}, found {}", recovered_seq + 1, seq);
            }
            vault
                .apply_replay(&cmd)
                .with_context(|| format!("replaying WAL record seq {}", seq))?;
            recovered_seq = seq;
            replayed += 1;
        }
        info!("WAL replay done: {} records, seq {}", replayed, recovered_seq);

        vault.last_seq = recovered_seq;
        vault.wal = Some(VaultWal::open(wal_dir, recovered_seq + 1)?);
        Ok(vault)
    }

    pub fn set_listener(&mut self, listener: Box<dyn EventListener>) {
        self.listener = Some(listener);
    }

    // ==========================================
    // Views
    // ==========================================

    pub fn total_assets(&self) -> u64 {
        pricing::total_assets(
            self.state.total_deposited,
            self.state.total_withdrawn,
            self.state.accumulated_yield,
        )
    }

    pub fn share_price(&self) -> u128 {
        pricing::share_price(self.total_assets(), self.shares.total_supply())
    }

    pub fn balance_of(&self, account: AccountId) -> u64 {
        self.shares.balance_of(account)
    }

    pub fn total_supply(&self) -> u64 {
        self.shares.total_supply()
    }

    pub fn escrow_balance(&self) -> u64 {
        self.shares.balance_of(VAULT_ACCOUNT)
    }

    pub fn state(&self) -> &VaultState {
        &self.state
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    pub fn params(&self) -> &VaultParams {
        &self.params
    }

    pub fn queue(&self) -> &WithdrawalQueue {
        &self.queue
    }

    pub fn custody(&self) -> &C {
        &self.custody
    }

    pub fn custody_mut(&mut self) -> &mut C {
        &mut self.custody
    }

    pub fn access(&self) -> &A {
        &self.access
    }

    pub fn access_mut(&mut self) -> &mut A {
        &mut self.access
    }

    /// Value of an account's holdings at the current price.
    pub fn holdings_value(&self, account: AccountId) -> Result<u64, VaultError> {
        pricing::shares_to_value(
            self.shares.balance_of(account),
            self.total_assets(),
            self.shares.total_supply(),
        )
    }

    // ==========================================
    // Deposit
    // ==========================================

    /// Deposit `amount` of value; mints shares at the current price.
    pub fn deposit(
        &mut self,
        caller: AccountId,
        amount: u64,
        now: u64,
    ) -> Result<u64, VaultError> {
        self.guarded(|v| v.do_deposit(caller, amount, now))
    }

    fn do_deposit(&mut self, caller: AccountId, amount: u64, now: u64) -> Result<u64, VaultError> {
        if self.access.deposits_paused() {
            return Err(VaultError::DepositsPaused);
        }
        if amount == 0 {
            return Err(VaultError::ZeroAmount);
        }

        let assets = self.total_assets();
        let supply = self.shares.total_supply();
        let shares = pricing::value_to_shares(amount, assets, supply)?;
        if shares == 0 {
            return Err(VaultError::ZeroShares);
        }

        if self.config.user_cap > 0 {
            let holdings = self
                .holdings_value(caller)?
                .checked_add(amount)
                .ok_or(VaultError::AmountOverflow)?;
            if holdings > self.config.user_cap {
                return Err(VaultError::UserCapExceeded { holdings, cap: self.config.user_cap });
            }
        }
        if self.config.global_cap > 0 {
            let total = assets.checked_add(amount).ok_or(VaultError::AmountOverflow)?;
            if total > self.config.global_cap {
                return Err(VaultError::GlobalCapExceeded { total, cap: self.config.global_cap });
            }
        }

        // Pre-check every arithmetic step so nothing can fail after the WAL
        // record is written.
        supply.checked_add(shares).ok_or(VaultError::AmountOverflow)?;
        self.shares.balance_of(caller).checked_add(shares).ok_or(VaultError::AmountOverflow)?;
        let new_deposited = self
            .state
            .total_deposited
            .checked_add(amount)
            .ok_or(VaultError::AmountOverflow)?;
        let new_cash = self.state.cash.checked_add(amount).ok_or(VaultError::AmountOverflow)?;

        let excess = new_cash.saturating_sub(self.config.buffer_target);
        let cash_after = new_cash - excess;

        self.log_command(&VaultCommand::Deposit {
            account: caller,
            amount,
            shares,
            cash_after,
            timestamp: now,
        })?;

        self.shares.mint(caller, shares).expect("Critical: mint failed after pre-check");
        self.state.total_deposited = new_deposited;
        self.state.cash = cash_after;

        info!("deposit: account={} amount={} shares={}", caller, amount, shares);
        self.emit(VaultEvent::Deposited { account: caller, amount, shares });

        // State is fully updated before the external transfer runs.
        if excess > 0 {
            if let Err(e) = self.custody.forward(excess) {
                panic!(
                    "Critical: custody venue {} rejected forward of {}: {}",
                    self.custody.name(),
                    excess,
                    e
                );
            }
        }

        Ok(shares)
    }

    // ==========================================
    // Share Transfers
    // ==========================================

    /// Shares are claim tokens and move freely between accounts, including
    /// unsolicited transfers into the escrow account.
    pub fn transfer_shares(
        &mut self,
        caller: AccountId,
        to: AccountId,
        shares: u64,
        now: u64,
    ) -> Result<(), VaultError> {
        self.guarded(|v| {
            if shares == 0 {
                return Err(VaultError::ZeroAmount);
            }
            let available = v.shares.balance_of(caller);
            if available < shares {
                return Err(VaultError::InsufficientShares { available, requested: shares });
            }
            v.shares.balance_of(to).checked_add(shares).ok_or(VaultError::AmountOverflow)?;

            v.log_command(&VaultCommand::SharesTransferred {
                from: caller,
                to,
                shares,
                timestamp: now,
            })?;
            v.shares
                .transfer(caller, to, shares)
                .expect("Critical: transfer failed after pre-check");
            debug!("transfer: from={} to={} shares={}", caller, to, shares);
            Ok(())
        })
    }

    // ==========================================
    // Withdrawal Request & Escrow
    // ==========================================

    /// Escrow `shares` and enqueue a withdrawal request. Returns its id.
    pub fn request_withdrawal(
        &mut self,
        caller: AccountId,
        shares: u64,
        now: u64,
    ) -> Result<u64, VaultError> {
        self.guarded(|v| v.do_request_withdrawal(caller, shares, now))
    }

    fn do_request_withdrawal(
        &mut self,
        caller: AccountId,
        shares: u64,
        now: u64,
    ) -> Result<u64, VaultError> {
        if self.access.withdrawals_paused() {
            return Err(VaultError::WithdrawalsPaused);
        }
        if shares == 0 {
            return Err(VaultError::ZeroAmount);
        }
        let available = self.shares.balance_of(caller);
        if available < shares {
            return Err(VaultError::InsufficientShares { available, requested: shares });
        }
        let pending = self.queue.pending_count(caller);
        if pending >= MAX_PENDING_PER_USER {
            return Err(VaultError::TooManyPendingRequests {
                pending,
                max: MAX_PENDING_PER_USER,
            });
        }
        self.escrow_balance().checked_add(shares).ok_or(VaultError::AmountOverflow)?;
        let new_pending = self
            .state
            .pending_withdrawal_shares
            .checked_add(shares)
            .ok_or(VaultError::AmountOverflow)?;

        let request_id = self.queue.end();
        self.log_command(&VaultCommand::WithdrawalRequested {
            request_id,
            account: caller,
            shares,
            timestamp: now,
        })?;

        // Escrow is a transfer to the vault's own account, not a burn: the
        // requester provably no longer holds the shares.
        self.shares
            .transfer(caller, VAULT_ACCOUNT, shares)
            .expect("Critical: escrow transfer failed after pre-check");
        let id = self.queue.push(caller, shares, now);
        debug_assert_eq!(id, request_id);
        self.state.pending_withdrawal_shares = new_pending;

        info!("withdrawal requested: id={} account={} shares={}", id, caller, shares);
        self.emit(VaultEvent::WithdrawalRequested { request_id: id, account: caller, shares });
        Ok(id)
    }

    /// Return escrowed shares to the requester. The requester may cancel
    /// within the cancellation window; the owner at any time.
    pub fn cancel_withdrawal(
        &mut self,
        caller: AccountId,
        request_id: u64,
        now: u64,
    ) -> Result<(), VaultError> {
        self.guarded(|v| v.do_cancel_withdrawal(caller, request_id, now))
    }

    fn do_cancel_withdrawal(
        &mut self,
        caller: AccountId,
        request_id: u64,
        now: u64,
    ) -> Result<(), VaultError> {
        let request = self.queue.get_pending(request_id)?;
        let requester = request.account;
        let requested_at = request.requested_at;

        if caller != self.access.owner() {
            if caller != requester {
                return Err(VaultError::NotRequester { request_id, caller });
            }
            if now > requested_at.saturating_add(CANCEL_WINDOW_SECS) {
                return Err(VaultError::CancelWindowExpired {
                    request_id,
                    window_secs: CANCEL_WINDOW_SECS,
                });
            }
        }

        self.assert_escrow_coverage();

        self.log_command(&VaultCommand::WithdrawalCancelled { request_id, timestamp: now })?;

        let (account, shares) = self
            .queue
            .resolve(request_id, RequestStatus::Cancelled)
            .expect("Critical: cancel resolve failed after pending check");
        self.shares
            .transfer(VAULT_ACCOUNT, account, shares)
            .expect("Critical: escrow release failed after coverage check");
        self.state.pending_withdrawal_shares -= shares;

        info!("withdrawal cancelled: id={} account={} shares={}", request_id, account, shares);
        self.emit(VaultEvent::WithdrawalCancelled { request_id, account, shares });
        Ok(())
    }

    /// Process up to `count` requests in FIFO order. Stops without error on
    /// an unexpired cooldown or insufficient liquidity; returns how many
    /// requests were fulfilled and the total value paid.
    pub fn fulfill_withdrawals(
        &mut self,
        caller: AccountId,
        count: u64,
        now: u64,
    ) -> Result<(u64, u64), VaultError> {
        self.guarded(|v| v.do_fulfill_withdrawals(caller, count, now))
    }

    fn do_fulfill_withdrawals(
        &mut self,
        caller: AccountId,
        count: u64,
        now: u64,
    ) -> Result<(u64, u64), VaultError> {
        self.access.require_operator(caller)?;
        if self.access.withdrawals_paused() {
            return Err(VaultError::WithdrawalsPaused);
        }
        self.assert_escrow_coverage();

        let head_before = self.queue.head();
        let mut processed = 0u64;
        let mut paid = 0u64;

        while processed < count && !self.queue.is_drained() {
            let id = self.queue.head();
            let request = self.queue.get(id).expect("Critical: head entry missing");

            // Cancelled or force-processed entries are skipped in place.
            if request.is_cleared() {
                self.queue.advance_head();
                continue;
            }

            // FIFO contract: an unexpired head blocks everything behind it.
            // The cooldown in force at fulfillment time applies, not a
            // snapshot from request time.
            if now < request.requested_at.saturating_add(self.config.cooldown_secs) {
                break;
            }

            let shares = request.shares;
            // Arithmetic pathologies degrade like low liquidity: stop the
            // batch, keep what was already paid.
            let Ok(value) =
                pricing::shares_to_value(shares, self.total_assets(), self.shares.total_supply())
            else {
                warn!("fulfillment stopped at request {}: payout overflow", id);
                break;
            };

            if !self.ensure_liquidity(value)? {
                warn!(
                    "fulfillment stopped at request {}: need {} liquidity, have {}",
                    id, value, self.state.cash
                );
                break;
            }

            let Some(new_withdrawn) = self.state.total_withdrawn.checked_add(value) else {
                warn!("fulfillment stopped at request {}: withdrawn counter overflow", id);
                break;
            };
            let cash_after = self.state.cash - value;

            self.log_command(&VaultCommand::WithdrawalFulfilled {
                request_id: id,
                shares,
                value,
                cash_after,
                forced: false,
                timestamp: now,
            })?;

            let (account, shares) = self
                .queue
                .resolve(id, RequestStatus::Fulfilled)
                .expect("Critical: fulfill resolve failed on pending head");
            self.shares
                .burn(VAULT_ACCOUNT, shares)
                .expect("Critical: escrow burn failed after coverage check");
            self.state.pending_withdrawal_shares -= shares;
            self.state.total_withdrawn = new_withdrawn;
            self.state.cash = cash_after;
            self.queue.advance_head();

            info!(
                "withdrawal fulfilled: id={} account={} shares={} value={}",
                id, account, shares, value
            );
            self.emit(VaultEvent::WithdrawalFulfilled {
                request_id: id,
                account,
                shares,
                value,
                forced: false,
            });

            processed += 1;
            paid += value;
        }

        // Skips over cleared entries have no record of their own; persist
        // the final head position so replay lands on the same index.
        if self.queue.head() != head_before {
            self.log_command(&VaultCommand::HeadAdvanced { head: self.queue.head() })?;
        }

        Ok((processed, paid))
    }

    /// Owner emergency path: process one request out of FIFO order,
    /// ignoring the cooldown. Same burn-then-pay sequence and escrow guard.
    pub fn force_process_withdrawal(
        &mut self,
        caller: AccountId,
        request_id: u64,
        now: u64,
    ) -> Result<u64, VaultError> {
        self.guarded(|v| v.do_force_process(caller, request_id, now))
    }

    fn do_force_process(
        &mut self,
        caller: AccountId,
        request_id: u64,
        now: u64,
    ) -> Result<u64, VaultError> {
        self.access.require_owner(caller)?;
        let request = self.queue.get_pending(request_id)?;
        let shares = request.shares;
        self.assert_escrow_coverage();

        let value =
            pricing::shares_to_value(shares, self.total_assets(), self.shares.total_supply())?;
        if !self.ensure_liquidity(value)? {
            return Err(VaultError::InsufficientLiquidity {
                available: self.state.cash,
                required: value,
            });
        }

        let new_withdrawn =
            self.state.total_withdrawn.checked_add(value).ok_or(VaultError::AmountOverflow)?;
        let cash_after = self.state.cash - value;

        self.log_command(&VaultCommand::WithdrawalFulfilled {
            request_id,
            shares,
            value,
            cash_after,
            forced: true,
            timestamp: now,
        })?;

        let (account, shares) = self
            .queue
            .resolve(request_id, RequestStatus::Fulfilled)
            .expect("Critical: force resolve failed after pending check");
        self.shares
            .burn(VAULT_ACCOUNT, shares)
            .expect("Critical: escrow burn failed after coverage check");
        self.state.pending_withdrawal_shares -= shares;
        self.state.total_withdrawn = new_withdrawn;
        self.state.cash = cash_after;

        warn!(
            "withdrawal force-processed: id={} account={} shares={} value={}",
            request_id, account, shares, value
        );
        self.emit(VaultEvent::WithdrawalFulfilled {
            request_id,
            account,
            shares,
            value,
            forced: true,
        });
        Ok(value)
    }

    /// Reclaim storage for cleared entries behind the head. Public
    /// housekeeping with no accounting effect.
    pub fn purge_processed_withdrawals(&mut self, limit: u64) -> Result<u64, VaultError> {
        self.guarded(|v| {
            v.log_command(&VaultCommand::ProcessedPurged { limit })?;
            let purged = v.queue.purge_processed(limit as usize) as u64;
            debug!("purged {} processed withdrawal entries", purged);
            Ok(purged)
        })
    }

    /// Burn any escrow balance in excess of pending withdrawal shares
    /// (recovers shares donated directly to the escrow account).
    pub fn sweep_orphaned_shares(&mut self, caller: AccountId) -> Result<u64, VaultError> {
        self.guarded(|v| {
            v.access.require_owner(caller)?;
            let excess =
                v.escrow_balance().saturating_sub(v.state.pending_withdrawal_shares);
            if excess == 0 {
                return Ok(0);
            }
            v.log_command(&VaultCommand::OrphanedSharesSwept { shares: excess })?;
            v.shares
                .burn(VAULT_ACCOUNT, excess)
                .expect("Critical: orphan sweep burn exceeded escrow balance");
            warn!("swept {} orphaned escrow shares", excess);
            v.emit(VaultEvent::OrphanedSharesSwept { shares: excess });
            Ok(excess)
        })
    }

    // ==========================================
    // Fee & Yield
    // ==========================================

    /// Apply a bounded yield delta and, on profit above the high-water-mark,
    /// mint performance-fee shares to the treasury. Returns the fee shares
    /// minted.
    pub fn report_yield_and_collect_fees(
        &mut self,
        caller: AccountId,
        delta: i64,
        now: u64,
    ) -> Result<u64, VaultError> {
        self.guarded(|v| v.do_report_yield(caller, delta, now))
    }

    fn do_report_yield(
        &mut self,
        caller: AccountId,
        delta: i64,
        now: u64,
    ) -> Result<u64, VaultError> {
        self.access.require_owner(caller)?;

        // Bound against NAV at call time. Several in-bound reports within
        // one reporting pass compound past the nominal bound; that matches
        // the documented behavior of the bound check.
        let nav = self.total_assets();
        if self.config.max_yield_change_rate > 0 {
            let bound = crate::math::mul_div(nav, self.config.max_yield_change_rate, RATE_SCALE)
                .ok_or(VaultError::AmountOverflow)?;
            if delta.unsigned_abs() > bound {
                return Err(VaultError::YieldOutOfBounds { delta, bound });
            }
        }

        let new_yield = self
            .state
            .accumulated_yield
            .checked_add(delta as i128)
            .ok_or(VaultError::AmountOverflow)?;
        let post_nav = pricing::total_assets(
            self.state.total_deposited,
            self.state.total_withdrawn,
            new_yield,
        );
        let supply = self.shares.total_supply();

        let mut fee_value = 0u64;
        let mut fee_shares = 0u64;
        let mut hwm_after = self.state.price_hwm;

        if delta > 0 && supply > 0 {
            let price = pricing::share_price(post_nav, supply);
            if price > self.state.price_hwm {
                // Value the supply at the HWM price; everything above it is
                // gain that has not been charged yet.
                let hwm_value = crate::math::mul_div_u128(
                    self.state.price_hwm,
                    supply as u128,
                    crate::state::PRICE_SCALE,
                )
                .ok_or(VaultError::AmountOverflow)?;
                let gain = (post_nav as u128).saturating_sub(hwm_value).min(u64::MAX as u128) as u64;
                let profit = gain.min(delta as u64);
                fee_value = crate::math::mul_div(profit, self.config.fee_rate, RATE_SCALE)
                    .ok_or(VaultError::AmountOverflow)?;

                // Degenerate guard: never charge a fee at or above NAV.
                if fee_value > 0 && fee_value < post_nav {
                    fee_shares = crate::math::mul_div(fee_value, supply, post_nav - fee_value)
                        .ok_or(VaultError::AmountOverflow)?;
                    supply.checked_add(fee_shares).ok_or(VaultError::AmountOverflow)?;
                } else {
                    fee_value = 0;
                }
                hwm_after = pricing::share_price(post_nav, supply + fee_shares);
            }
        }

        self.log_command(&VaultCommand::YieldReported {
            delta,
            fee_shares,
            hwm_after,
            timestamp: now,
        })?;

        self.state.accumulated_yield = new_yield;
        self.state.last_yield_report = now;
        if fee_shares > 0 {
            self.shares
                .mint(self.config.treasury, fee_shares)
                .expect("Critical: fee mint failed after pre-check");
            self.emit(VaultEvent::FeeCollected {
                treasury: self.config.treasury,
                fee_value,
                fee_shares,
            });
        }
        self.state.price_hwm = hwm_after;

        info!(
            "yield reported: delta={} nav={} fee_value={} fee_shares={}",
            delta, post_nav, fee_value, fee_shares
        );
        self.emit(VaultEvent::YieldReported { delta, nav_after: post_nav });
        Ok(fee_shares)
    }

    /// Owner emergency: rebase the high-water-mark to the current price,
    /// forfeiting any fee owed on yield already accrued.
    pub fn reset_price_hwm(&mut self, caller: AccountId) -> Result<u128, VaultError> {
        self.guarded(|v| {
            v.access.require_owner(caller)?;
            let price = v.share_price();
            v.log_command(&VaultCommand::HwmReset { hwm: price })?;
            v.state.price_hwm = price;
            warn!("price HWM reset to {}", price);
            v.emit(VaultEvent::HwmReset { price });
            Ok(price)
        })
    }

    // ==========================================
    // Configuration
    // ==========================================

    /// Apply an immediate (non-timelocked) parameter update.
    pub fn update_param(
        &mut self,
        caller: AccountId,
        update: ConfigUpdate,
    ) -> Result<(), VaultError> {
        self.guarded(|v| {
            v.access.require_owner(caller)?;
            if update.is_timelocked() {
                return Err(VaultError::TimelockRequired);
            }
            v.log_command(&VaultCommand::ConfigChanged { update })?;
            update.apply(&mut v.config).expect("immediate updates cannot fail validation");
            info!("config updated: {:?}", update);
            v.emit(VaultEvent::ParamChanged { update });
            Ok(())
        })
    }

    /// Queue a timelocked parameter change. Returns the ticket.
    pub fn queue_param_change(
        &mut self,
        caller: AccountId,
        update: ConfigUpdate,
        now: u64,
    ) -> Result<u64, VaultError> {
        self.guarded(|v| {
            v.access.require_owner(caller)?;
            if let ConfigUpdate::FeeRate(rate) = update {
                if rate > MAX_FEE_RATE {
                    return Err(VaultError::FeeRateTooHigh { rate, max: MAX_FEE_RATE });
                }
            }
            if !update.is_timelocked() {
                return Err(VaultError::NotTimelocked);
            }
            // Ticket assignment is deterministic, so log before queueing.
            let ticket = v.gate.peek_next_ticket();
            v.log_command(&VaultCommand::ParamChangeQueued { ticket, update, timestamp: now })?;
            let assigned = v.gate.queue(update, now).expect("timelocked update checked above");
            debug_assert_eq!(assigned, ticket);
            info!("param change queued: ticket={} {:?}", ticket, update);
            Ok(ticket)
        })
    }

    pub fn cancel_param_change(
        &mut self,
        caller: AccountId,
        ticket: u64,
    ) -> Result<(), VaultError> {
        self.guarded(|v| {
            v.access.require_owner(caller)?;
            if v.gate.get(ticket).is_none() {
                return Err(VaultError::ChangeNotFound(ticket));
            }
            v.log_command(&VaultCommand::ParamChangeCancelled { ticket })?;
            v.gate.cancel(ticket).expect("presence checked above");
            info!("param change cancelled: ticket={}", ticket);
            Ok(())
        })
    }

    pub fn execute_param_change(
        &mut self,
        caller: AccountId,
        ticket: u64,
        now: u64,
    ) -> Result<(), VaultError> {
        self.guarded(|v| {
            v.access.require_owner(caller)?;
            let change = v.gate.get(ticket).ok_or(VaultError::ChangeNotFound(ticket))?;
            if now < change.execute_after {
                return Err(VaultError::ChangeNotReady {
                    ticket,
                    execute_after: change.execute_after,
                });
            }
            let update = change.update;

            v.log_command(&VaultCommand::ParamChangeExecuted { ticket, update, timestamp: now })?;
            v.gate.take_executable(ticket, now).expect("readiness checked above");
            update.apply(&mut v.config).expect("rate validated when queued");
            info!("param change executed: ticket={} {:?}", ticket, update);
            v.emit(VaultEvent::ParamChanged { update });
            Ok(())
        })
    }

    pub fn pending_param_change(&self, ticket: u64) -> Option<&crate::timelock::PendingChange> {
        self.gate.get(ticket)
    }

    // ==========================================
    // Durability
    // ==========================================

    /// Write a full-state snapshot. Subsequent recovery replays only WAL
    /// records past this point.
    pub fn trigger_snapshot(&self) -> Result<PathBuf> {
        let dir = self
            .snapshot_dir
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("vault opened without a snapshot directory"))?;
        let snap = Snapshot {
            last_seq: self.last_seq,
            shares: self.shares.clone(),
            state: self.state.clone(),
            config: self.config.clone(),
            queue: self.queue.clone(),
            gate: self.gate.clone(),
        };
        snap.write(dir)
    }

    pub fn last_seq(&self) -> u64 {
        self.last_seq
    }

    // ==========================================
    // Internals
    // ==========================================

    /// Explicit operation-in-progress flag: every mutating entry point runs
    /// under it, so a re-entrant call from a transfer hook is rejected
    /// instead of observing half-applied state.
    fn guarded<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, VaultError>,
    ) -> Result<T, VaultError> {
        if self.in_operation {
            return Err(VaultError::ReentrantCall);
        }
        self.in_operation = true;
        let result = f(self);
        self.in_operation = false;
        result
    }

    fn log_command(&mut self, cmd: &VaultCommand) -> Result<(), VaultError> {
        let seq = self.last_seq + 1;
        if let Some(wal) = &mut self.wal {
            wal.append(seq, cmd).map_err(|e| VaultError::Wal(e.to_string()))?;
            wal.flush().map_err(|e| VaultError::Wal(e.to_string()))?;
        }
        self.last_seq = seq;
        Ok(())
    }

    fn emit(&mut self, event: VaultEvent) {
        if let Some(listener) = &mut self.listener {
            listener.on_event(&event);
        }
    }

    /// Escrow must always cover the pending counter. `>=`, not `==`:
    /// donated shares sit in escrow until swept and must not block
    /// withdrawals. A shortfall means shares left escrow without their
    /// request being resolved.
    fn assert_escrow_coverage(&self) {
        let escrow = self.shares.balance_of(VAULT_ACCOUNT);
        let pending = self.state.pending_withdrawal_shares;
        if escrow < pending {
            panic!(
                "Critical: escrow balance {} below pending withdrawal shares {}",
                escrow, pending
            );
        }
    }

    /// Top the cash buffer up from the custody venue if needed. Returns
    /// whether `value` is now covered. Recalled funds are recorded even
    /// when coverage still fails: they are real cash either way.
    fn ensure_liquidity(&mut self, value: u64) -> Result<bool, VaultError> {
        if self.state.cash >= value {
            return Ok(true);
        }
        let shortfall = value - self.state.cash;
        let recalled = self.custody.recall(shortfall);
        if recalled > 0 {
            let cash_after =
                self.state.cash.checked_add(recalled).ok_or(VaultError::AmountOverflow)?;
            self.log_command(&VaultCommand::LiquidityRecalled { amount: recalled, cash_after })?;
            self.state.cash = cash_after;
            debug!("recalled {} from custody venue {}", recalled, self.custody.name());
        }
        Ok(self.state.cash >= value)
    }

    /// Replay one WAL record. Mirrors the live handlers but applies the
    /// recorded outcomes verbatim: no price math, no capability checks, no
    /// external calls.
    fn apply_replay(&mut self, cmd: &VaultCommand) -> Result<()> {
        match *cmd {
            VaultCommand::Deposit { account, amount, shares, cash_after, .. } => {
                self.shares.mint(account, shares).map_err(replay_err)?;
                self.state.total_deposited = self
                    .state
                    .total_deposited
                    .checked_add(amount)
                    .ok_or_else(|| anyhow::anyhow!("deposit counter overflow"))?;
                self.state.cash = cash_after;
            }
            VaultCommand::SharesTransferred { from, to, shares, .. } => {
                self.shares.transfer(from, to, shares).map_err(replay_err)?;
            }
            VaultCommand::WithdrawalRequested { request_id, account, shares, timestamp } => {
                self.shares.transfer(account, VAULT_ACCOUNT, shares).map_err(replay_err)?;
                let id = self.queue.push(account, shares, timestamp);
                if id != request_id {
                    bail!("request id mismatch on replay: expected {}, got {}", request_id, id);
                }
                self.state.pending_withdrawal_shares += shares;
            }
            VaultCommand::WithdrawalCancelled { request_id, .. } => {
                let (account, shares) =
                    self.queue.resolve(request_id, RequestStatus::Cancelled).map_err(replay_err)?;
                self.shares.transfer(VAULT_ACCOUNT, account, shares).map_err(replay_err)?;
                self.state.pending_withdrawal_shares -= shares;
            }
            VaultCommand::WithdrawalFulfilled { request_id, value, cash_after, .. } => {
                let (_, shares) =
                    self.queue.resolve(request_id, RequestStatus::Fulfilled).map_err(replay_err)?;
                self.shares.burn(VAULT_ACCOUNT, shares).map_err(replay_err)?;
                self.state.pending_withdrawal_shares -= shares;
                self.state.total_withdrawn += value;
                self.state.cash = cash_after;
            }
            VaultCommand::HeadAdvanced { head } => {
                self.queue.set_head(head);
            }
            VaultCommand::LiquidityRecalled { cash_after, .. } => {
                self.state.cash = cash_after;
            }
            VaultCommand::ProcessedPurged { limit } => {
                self.queue.purge_processed(limit as usize);
            }
            VaultCommand::YieldReported { delta, fee_shares, hwm_after, timestamp } => {
                self.state.accumulated_yield += delta as i128;
                self.state.last_yield_report = timestamp;
                if fee_shares > 0 {
                    self.shares.mint(self.config.treasury, fee_shares).map_err(replay_err)?;
                }
                self.state.price_hwm = hwm_after;
            }
            VaultCommand::HwmReset { hwm } => {
                self.state.price_hwm = hwm;
            }
            VaultCommand::OrphanedSharesSwept { shares } => {
                self.shares.burn(VAULT_ACCOUNT, shares).map_err(replay_err)?;
            }
            VaultCommand::ConfigChanged { update } => {
                update.apply(&mut self.config).map_err(replay_err)?;
            }
            VaultCommand::ParamChangeQueued { ticket, update, timestamp } => {
                let assigned = self.gate.queue(update, timestamp).map_err(replay_err)?;
                if assigned != ticket {
                    bail!("ticket mismatch on replay: expected {}, got {}", ticket, assigned);
                }
            }
            VaultCommand::ParamChangeCancelled { ticket } => {
                self.gate.cancel(ticket).map_err(replay_err)?;
            }
            VaultCommand::ParamChangeExecuted { ticket, update, .. } => {
                self.gate.cancel(ticket).map_err(replay_err)?;
                update.apply(&mut self.config).map_err(replay_err)?;
            }
        }
        Ok(())
    }

    /// Full invariant sweep; used by tests after operation sequences.
    pub fn check_invariants(&self) -> bool {
        self.shares.check_conservation()
            && self.escrow_balance() >= self.state.pending_withdrawal_shares
            && self.queue.check_bounds()
            && self.config.fee_rate <= MAX_FEE_RATE
    }
}

fn replay_err(e: VaultError) -> anyhow::Error {
    anyhow::anyhow!("inconsistent WAL record: {}", e)
}
