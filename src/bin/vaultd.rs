//! Vault ledger service.
//!
//! Recovers the vault from snapshot + WAL, then serves line-delimited JSON
//! commands on stdin. One command is one atomic unit of work; responses go
//! to stdout, structured logs to the configured appenders.

use std::io::{self, BufRead, Write};
use std::path::Path;

use anyhow::Result;
use clap::Parser;
use log::info;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;

use poolvault::access::StaticAccess;
use poolvault::configure::load_config;
use poolvault::custody::MockCustody;
use poolvault::errors::VaultError;
use poolvault::logger::setup_logger;
use poolvault::units::UnitConverter;
use poolvault::vault::Vault;

#[derive(Parser, Debug)]
#[command(name = "vaultd", about = "Pooled-capital savings vault ledger")]
struct Args {
    /// Write a snapshot after every N commands (0 = only on shutdown)
    #[arg(long, default_value_t = 0)]
    snapshot_every: u64,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Request {
    Deposit { account: u64, amount: Decimal },
    TransferShares { account: u64, to: u64, shares: u64 },
    RequestWithdrawal { account: u64, shares: u64 },
    CancelWithdrawal { account: u64, request_id: u64 },
    FulfillWithdrawals { account: u64, count: u64 },
    ForceProcessWithdrawal { account: u64, request_id: u64 },
    ReportYield { account: u64, delta: Decimal },
    ResetHwm { account: u64 },
    SweepOrphanedShares { account: u64 },
    PurgeProcessed { limit: u64 },
    Status,
    Snapshot,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config()?;
    setup_logger(&config).map_err(|e| anyhow::anyhow!("logger setup failed: {}", e))?;

    let access = StaticAccess::new(config.owner_account).with_operator(config.operator_account);
    let converter = UnitConverter::new(config.currency_decimals, config.display_decimals);

    let mut vault = Vault::open(
        config.vault_params(),
        config.vault_config(),
        config.timelock_delay_secs,
        MockCustody::new(),
        access,
        Path::new(&config.wal_dir),
        Path::new(&config.snapshot_dir),
    )?;

    info!(
        "vaultd up: assets={} supply={} price={} queue_head={}",
        vault.total_assets(),
        vault.total_supply(),
        vault.share_price(),
        vault.queue().head()
    );

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut served = 0u64;

    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => handle(&mut vault, &converter, request),
            Err(e) => json!({ "ok": false, "code": "BAD_REQUEST", "error": e.to_string() }),
        };
        serde_json::to_writer(&mut stdout, &response)?;
        stdout.write_all(b"\n")?;
        stdout.flush()?;

        served += 1;
        if args.snapshot_every > 0 && served % args.snapshot_every == 0 {
            vault.trigger_snapshot()?;
        }
    }

    vault.trigger_snapshot()?;
    info!("vaultd shutting down at seq {}", vault.last_seq());
    Ok(())
}

fn handle(
    vault: &mut Vault<MockCustody, StaticAccess>,
    converter: &UnitConverter,
    request: Request,
) -> serde_json::Value {
    let now = chrono::Utc::now().timestamp() as u64;

    let result = match request {
        Request::Deposit { account, amount } => match converter.to_raw(amount) {
            Ok(raw) => vault
                .deposit(account, raw, now)
                .map(|shares| json!({ "ok": true, "shares": shares })),
            Err(e) => return json!({ "ok": false, "code": "INVALID_AMOUNT", "error": e }),
        },
        Request::TransferShares { account, to, shares } => vault
            .transfer_shares(account, to, shares, now)
            .map(|_| json!({ "ok": true })),
        Request::RequestWithdrawal { account, shares } => vault
            .request_withdrawal(account, shares, now)
            .map(|id| json!({ "ok": true, "request_id": id })),
        Request::CancelWithdrawal { account, request_id } => vault
            .cancel_withdrawal(account, request_id, now)
            .map(|_| json!({ "ok": true })),
        Request::FulfillWithdrawals { account, count } => {
            vault.fulfill_withdrawals(account, count, now).map(|(processed, paid)| {
                json!({
                    "ok": true,
                    "processed": processed,
                    "paid": converter.to_display(paid),
                })
            })
        }
        Request::ForceProcessWithdrawal { account, request_id } => vault
            .force_process_withdrawal(account, request_id, now)
            .map(|value| json!({ "ok": true, "paid": converter.to_display(value) })),
        Request::ReportYield { account, delta } => {
            let raw = match converter.to_raw(delta.abs()) {
                Ok(raw) if raw <= i64::MAX as u64 => raw as i64,
                _ => return json!({ "ok": false, "code": "INVALID_AMOUNT", "error": "bad delta" }),
            };
            let signed = if delta.is_sign_negative() { -raw } else { raw };
            vault
                .report_yield_and_collect_fees(account, signed, now)
                .map(|fee_shares| json!({ "ok": true, "fee_shares": fee_shares }))
        }
        Request::ResetHwm { account } => vault
            .reset_price_hwm(account)
            .map(|price| json!({ "ok": true, "hwm": price.to_string() })),
        Request::SweepOrphanedShares { account } => vault
            .sweep_orphaned_shares(account)
            .map(|swept| json!({ "ok": true, "swept": swept })),
        Request::PurgeProcessed { limit } => vault
            .purge_processed_withdrawals(limit)
            .map(|purged| json!({ "ok": true, "purged": purged })),
        Request::Status => Ok(json!({
            "ok": true,
            "assets": converter.to_display(vault.total_assets()),
            "supply": vault.total_supply(),
            "price": vault.share_price().to_string(),
            "hwm": vault.state().price_hwm.to_string(),
            "cash": converter.to_display(vault.state().cash),
            "pending_shares": vault.state().pending_withdrawal_shares,
            "queue_head": vault.queue().head(),
            "queue_end": vault.queue().end(),
            "seq": vault.last_seq(),
        })),
        Request::Snapshot => match vault.trigger_snapshot() {
            Ok(path) => Ok(json!({ "ok": true, "path": path.display().to_string() })),
            Err(e) => return json!({ "ok": false, "code": "SNAPSHOT_FAILED", "error": e.to_string() }),
        },
    };

    match result {
        Ok(value) => value,
        Err(e) => error_response(&e),
    }
}

fn error_response(e: &VaultError) -> serde_json::Value {
    json!({ "ok": false, "code": e.error_code(), "error": e.to_string() })
}
