// Error taxonomy for vault operations.
//
// Recoverable failures (bad input, missing capability) come back as
// VaultError. Invariant violations are NOT represented here: the vault
// panics on those with a "Critical:" message, because they mean the
// accounting itself is broken, not that a caller made a mistake.
use std::fmt;

use crate::accounts::AccountId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VaultError {
    // Input errors
    ZeroAmount,
    ZeroShares,
    AmountOverflow,
    UserCapExceeded { holdings: u64, cap: u64 },
    GlobalCapExceeded { total: u64, cap: u64 },
    InsufficientShares { available: u64, requested: u64 },
    TooManyPendingRequests { pending: usize, max: usize },
    RequestNotFound(u64),
    RequestAlreadyResolved(u64),
    CancelWindowExpired { request_id: u64, window_secs: u64 },
    YieldOutOfBounds { delta: i64, bound: u64 },
    InsufficientLiquidity { available: u64, required: u64 },
    FeeRateTooHigh { rate: u64, max: u64 },

    // Authorization errors
    NotOwner(AccountId),
    NotOperator(AccountId),
    NotRequester { request_id: u64, caller: AccountId },
    DepositsPaused,
    WithdrawalsPaused,
    ReentrantCall,

    // Parameter change errors
    ChangeNotFound(u64),
    ChangeNotReady { ticket: u64, execute_after: u64 },
    NotTimelocked,
    TimelockRequired,

    // System errors
    Wal(String),
}

impl fmt::Display for VaultError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroAmount => write!(f, "Amount must be positive"),
            Self::ZeroShares => write!(f, "Amount too small: would mint zero shares"),
            Self::AmountOverflow => write!(f, "Amount arithmetic overflow"),
            Self::UserCapExceeded { holdings, cap } => {
                write!(f, "Per-user cap exceeded: holdings {} > cap {}", holdings, cap)
            }
            Self::GlobalCapExceeded { total, cap } => {
                write!(f, "Global cap exceeded: total {} > cap {}", total, cap)
            }
            Self::InsufficientShares { available, requested } => {
                write!(f, "Insufficient shares: have {}, need {}", available, requested)
            }
            Self::TooManyPendingRequests { pending, max } => {
                write!(f, "Too many pending requests: {} of max {}", pending, max)
            }
            Self::RequestNotFound(id) => write!(f, "Withdrawal request {} not found", id),
            Self::RequestAlreadyResolved(id) => {
                write!(f, "Withdrawal request {} already resolved", id)
            }
            Self::CancelWindowExpired { request_id, window_secs } => {
                write!(
                    f,
                    "Cancellation window ({}s) expired for request {}",
                    window_secs, request_id
                )
            }
            Self::YieldOutOfBounds { delta, bound } => {
                write!(f, "Yield delta {} exceeds bound {}", delta, bound)
            }
            Self::InsufficientLiquidity { available, required } => {
                write!(f, "Insufficient liquidity: have {}, need {}", available, required)
            }
            Self::FeeRateTooHigh { rate, max } => {
                write!(f, "Fee rate {} exceeds maximum {}", rate, max)
            }
            Self::NotOwner(id) => write!(f, "Account {} is not the owner", id),
            Self::NotOperator(id) => write!(f, "Account {} is not an operator", id),
            Self::NotRequester { request_id, caller } => {
                write!(f, "Account {} did not create request {}", caller, request_id)
            }
            Self::DepositsPaused => write!(f, "Deposits are paused"),
            Self::WithdrawalsPaused => write!(f, "Withdrawals are paused"),
            Self::ReentrantCall => write!(f, "Re-entrant vault call rejected"),
            Self::ChangeNotFound(ticket) => write!(f, "Parameter change {} not found", ticket),
            Self::ChangeNotReady { ticket, execute_after } => {
                write!(f, "Parameter change {} not executable until {}", ticket, execute_after)
            }
            Self::NotTimelocked => write!(f, "Parameter is not subject to the timelock"),
            Self::TimelockRequired => {
                write!(f, "Parameter changes only take effect through the timelock")
            }
            Self::Wal(msg) => write!(f, "WAL error: {}", msg),
        }
    }
}

impl std::error::Error for VaultError {}

// Error code mapping for API/event surfaces
impl VaultError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ZeroAmount => "ZERO_AMOUNT",
            Self::ZeroShares => "ZERO_SHARES",
            Self::AmountOverflow => "AMOUNT_OVERFLOW",
            Self::UserCapExceeded { .. } => "USER_CAP_EXCEEDED",
            Self::GlobalCapExceeded { .. } => "GLOBAL_CAP_EXCEEDED",
            Self::InsufficientShares { .. } => "INSUFFICIENT_SHARES",
            Self::TooManyPendingRequests { .. } => "TOO_MANY_PENDING_REQUESTS",
            Self::RequestNotFound(_) => "REQUEST_NOT_FOUND",
            Self::RequestAlreadyResolved(_) => "REQUEST_ALREADY_RESOLVED",
            Self::CancelWindowExpired { .. } => "CANCEL_WINDOW_EXPIRED",
            Self::YieldOutOfBounds { .. } => "YIELD_OUT_OF_BOUNDS",
            Self::InsufficientLiquidity { .. } => "INSUFFICIENT_LIQUIDITY",
            Self::FeeRateTooHigh { .. } => "FEE_RATE_TOO_HIGH",
            Self::NotOwner(_) => "NOT_OWNER",
            Self::NotOperator(_) => "NOT_OPERATOR",
            Self::NotRequester { .. } => "NOT_REQUESTER",
            Self::DepositsPaused => "DEPOSITS_PAUSED",
            Self::WithdrawalsPaused => "WITHDRAWALS_PAUSED",
            Self::ReentrantCall => "REENTRANT_CALL",
            Self::ChangeNotFound(_) => "CHANGE_NOT_FOUND",
            Self::ChangeNotReady { .. } => "CHANGE_NOT_READY",
            Self::NotTimelocked => "NOT_TIMELOCKED",
            Self::TimelockRequired => "TIMELOCK_REQUIRED",
            Self::Wal(_) => "WAL_ERROR",
        }
    }

    /// Caller-correctable input problem, as opposed to a missing capability
    /// or an internal fault.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::ZeroAmount
                | Self::ZeroShares
                | Self::AmountOverflow
                | Self::UserCapExceeded { .. }
                | Self::GlobalCapExceeded { .. }
                | Self::InsufficientShares { .. }
                | Self::TooManyPendingRequests { .. }
                | Self::RequestNotFound(_)
                | Self::RequestAlreadyResolved(_)
                | Self::CancelWindowExpired { .. }
                | Self::YieldOutOfBounds { .. }
                | Self::InsufficientLiquidity { .. }
                | Self::FeeRateTooHigh { .. }
        )
    }

    pub fn is_authorization_error(&self) -> bool {
        matches!(
            self,
            Self::NotOwner(_)
                | Self::NotOperator(_)
                | Self::NotRequester { .. }
                | Self::DepositsPaused
                | Self::WithdrawalsPaused
                | Self::ReentrantCall
        )
    }
}
