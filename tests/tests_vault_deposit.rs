use poolvault::access::StaticAccess;
use poolvault::accounts::VAULT_ACCOUNT;
use poolvault::custody::{CustodyVenue, MockCustody};
use poolvault::errors::VaultError;
use poolvault::events::{MemoryListener, VaultEvent};
use poolvault::state::{VaultConfig, VaultParams, INITIAL_SHARE_PRICE};
use poolvault::vault::Vault;

const OWNER: u64 = 1;
const OPERATOR: u64 = 2;
const TREASURY: u64 = 3;
const ALICE: u64 = 10;
const BOB: u64 = 11;

const T0: u64 = 1_700_000_000;

fn test_config() -> VaultConfig {
    VaultConfig {
        fee_rate: 100_000, // 10%
        cooldown_secs: 86400,
        treasury: TREASURY,
        user_cap: 0,
        global_cap: 0,
        buffer_target: u64::MAX, // keep all cash in the vault
        max_yield_change_rate: 100_000,
    }
}

fn new_vault(config: VaultConfig) -> Vault<MockCustody, StaticAccess> {
    let access = StaticAccess::new(OWNER).with_operator(OPERATOR);
    Vault::new(VaultParams::default(), config, 0, MockCustody::new(), access).unwrap()
}

#[test]
fn test_first_deposit_mints_at_initial_price() {
    let mut vault = new_vault(test_config());

    let shares = vault.deposit(ALICE, 1_000_000, T0).unwrap();

    assert_eq!(shares, 1_000_000);
    assert_eq!(vault.balance_of(ALICE), 1_000_000);
    assert_eq!(vault.total_supply(), 1_000_000);
    assert_eq!(vault.total_assets(), 1_000_000);
    assert_eq!(vault.share_price(), INITIAL_SHARE_PRICE);
    assert!(vault.check_invariants());
}

#[test]
fn test_zero_amount_rejected() {
    let mut vault = new_vault(test_config());
    assert_eq!(vault.deposit(ALICE, 0, T0), Err(VaultError::ZeroAmount));
}

#[test]
fn test_deposit_after_yield_prices_in_nav() {
    let mut vault = new_vault(test_config());
    vault.deposit(ALICE, 1000, T0).unwrap();
    vault.report_yield_and_collect_fees(OWNER, 100, T0 + 10).unwrap();

    // Fee shares were minted to the treasury, so the price sits slightly
    // below 1.1; a later depositor must not capture the prior gain.
    let assets = vault.total_assets();
    let supply = vault.total_supply();
    assert_eq!(assets, 1100);

    let shares = vault.deposit(BOB, 110, T0 + 20).unwrap();
    assert_eq!(shares as u128, 110u128 * supply as u128 / assets as u128);
    assert!(shares < 110, "Bob must get fewer shares than value at price > 1");
    assert!(vault.check_invariants());
}

#[test]
fn test_dust_deposit_minting_zero_shares_rejected() {
    let mut vault = new_vault(test_config());
    vault.deposit(ALICE, 1000, T0).unwrap();
    vault.report_yield_and_collect_fees(OWNER, 100, T0 + 10).unwrap();

    // 1 value unit converts to 0 shares at price > 1
    assert_eq!(vault.deposit(BOB, 1, T0 + 20), Err(VaultError::ZeroShares));
    assert_eq!(vault.balance_of(BOB), 0);
}

#[test]
fn test_user_cap_enforced() {
    let mut vault = new_vault(VaultConfig { user_cap: 1000, ..test_config() });

    vault.deposit(ALICE, 800, T0).unwrap();
    assert_eq!(
        vault.deposit(ALICE, 300, T0),
        Err(VaultError::UserCapExceeded { holdings: 1100, cap: 1000 })
    );
    // Another account is unaffected
    vault.deposit(BOB, 1000, T0).unwrap();
}

#[test]
fn test_global_cap_enforced() {
    let mut vault = new_vault(VaultConfig { global_cap: 1500, ..test_config() });

    vault.deposit(ALICE, 1000, T0).unwrap();
    assert_eq!(
        vault.deposit(BOB, 600, T0),
        Err(VaultError::GlobalCapExceeded { total: 1600, cap: 1500 })
    );
    vault.deposit(BOB, 500, T0).unwrap();
}

#[test]
fn test_zero_cap_means_unlimited() {
    let mut vault = new_vault(test_config());
    vault.deposit(ALICE, u64::MAX / 4, T0).unwrap();
    assert!(vault.check_invariants());
}

#[test]
fn test_paused_deposits_rejected() {
    let mut vault = new_vault(test_config());
    vault.access_mut().pause_deposits = true;
    assert_eq!(vault.deposit(ALICE, 1000, T0), Err(VaultError::DepositsPaused));

    vault.access_mut().pause_deposits = false;
    vault.deposit(ALICE, 1000, T0).unwrap();
}

#[test]
fn test_excess_over_buffer_forwarded_to_custody() {
    let mut vault = new_vault(VaultConfig { buffer_target: 500, ..test_config() });

    vault.deposit(ALICE, 1200, T0).unwrap();
    assert_eq!(vault.state().cash, 500);
    assert_eq!(vault.custody().held(), 700);

    // Next deposit is already above the buffer: everything forwarded
    vault.deposit(BOB, 300, T0).unwrap();
    assert_eq!(vault.state().cash, 500);
    assert_eq!(vault.custody().held(), 1000);
}

#[test]
fn test_deposit_emits_event() {
    let mut vault = new_vault(test_config());
    let listener = MemoryListener::new();
    vault.set_listener(Box::new(listener.clone()));

    vault.deposit(ALICE, 1000, T0).unwrap();

    let events = listener.events();
    assert_eq!(events.len(), 1);
    match &events[0] {
        VaultEvent::Deposited { account, amount, shares } => {
            assert_eq!((*account, *amount, *shares), (ALICE, 1000, 1000));
        }
        other => panic!("unexpected event: {:?}", other),
    }
}

#[test]
fn test_share_transfer_between_accounts() {
    let mut vault = new_vault(test_config());
    vault.deposit(ALICE, 1000, T0).unwrap();

    vault.transfer_shares(ALICE, BOB, 400, T0).unwrap();
    assert_eq!(vault.balance_of(ALICE), 600);
    assert_eq!(vault.balance_of(BOB), 400);
    assert_eq!(vault.total_supply(), 1000);

    assert_eq!(
        vault.transfer_shares(ALICE, BOB, 601, T0),
        Err(VaultError::InsufficientShares { available: 600, requested: 601 })
    );
    assert!(vault.check_invariants());
}

#[test]
fn test_uniform_pricing_across_holders() {
    // Converting N shares to value must not depend on who holds them.
    let mut vault = new_vault(test_config());
    vault.deposit(ALICE, 10_000, T0).unwrap();
    vault.report_yield_and_collect_fees(OWNER, 500, T0).unwrap();

    vault.transfer_shares(ALICE, BOB, 1000, T0).unwrap();
    vault.transfer_shares(ALICE, VAULT_ACCOUNT, 1000, T0).unwrap();

    let a = vault.holdings_value(BOB).unwrap();
    let b = vault.holdings_value(VAULT_ACCOUNT).unwrap();
    assert_eq!(a, b);
}
