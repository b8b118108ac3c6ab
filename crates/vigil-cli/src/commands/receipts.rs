use clap::Args;
use console::style;
use uuid::Uuid;
use vigil_core::{Receipt, ReceiptOutcome, VigilError};
use vigil_store::GovernanceStore;

use super::styled_tier;

#[derive(Args)]
pub struct ReceiptArgs {
    /// Number of entries to show
    #[arg(short = 'n', long, default_value = "50")]
    limit: usize,

    /// Only receipts for this action id
    #[arg(short, long)]
    action: Option<Uuid>,

    /// List batch artifacts instead of individual receipts
    #[arg(long)]
    batches: bool,

    /// Recompute every stored hash and report tampering
    #[arg(long)]
    verify: bool,

    /// Output as JSON
    #[arg(long)]
    json: bool,
}

pub(super) fn run(store: &GovernanceStore, args: ReceiptArgs) -> vigil_core::Result<()> {
    if args.verify {
        return verify(store);
    }

    if args.batches {
        let batches = store.list_batches(args.limit)?;
        if args.json {
            println!("{}", serde_json::to_string_pretty(&batches)?);
            return Ok(());
        }
        if batches.is_empty() {
            println!("No batches.");
            return Ok(());
        }
        println!("{} ({} shown)", style("Receipt batches").bold(), batches.len());
        println!("{}", "-".repeat(80));
        for batch in &batches {
            println!(
                "{}  {}  {} receipts  {}",
                style(batch.created_at.format("%Y-%m-%d %H:%M:%S")).dim(),
                batch.id,
                batch.len(),
                style(&batch.hash[..16.min(batch.hash.len())]).dim()
            );
        }
        return Ok(());
    }

    let receipts = match args.action {
        Some(action_id) => store.receipts_for_action(action_id)?,
        None => store.list_receipts(args.limit)?,
    };
    if args.json {
        println!("{}", serde_json::to_string_pretty(&receipts)?);
        return Ok(());
    }
    if receipts.is_empty() {
        println!("No receipts.");
        return Ok(());
    }

    println!(
        "{} ({} of {} stored)",
        style("Receipts").bold(),
        receipts.len(),
        store.receipt_count()?
    );
    println!("{}", "-".repeat(80));
    for receipt in &receipts {
        print_receipt(receipt);
    }
    Ok(())
}

fn print_receipt(receipt: &Receipt) {
    let outcome = match &receipt.outcome {
        ReceiptOutcome::Verified => style(receipt.outcome.kind()).green(),
        ReceiptOutcome::Cancelled => style(receipt.outcome.kind()).dim(),
        ReceiptOutcome::RolledBack { .. } => style(receipt.outcome.kind()).yellow(),
        ReceiptOutcome::Denied { .. } | ReceiptOutcome::Failed { .. } => {
            style(receipt.outcome.kind()).red()
        }
    };
    println!(
        "{}  {}  {:<12} {:<12} {}  {}",
        style(receipt.created_at.format("%Y-%m-%d %H:%M:%S")).dim(),
        styled_tier(receipt.tier),
        receipt.capability,
        outcome,
        receipt.actor,
        style(receipt.action_id).dim()
    );
    let reason = receipt.outcome.reason();
    if !reason.is_empty() {
        println!("   {}", style(reason).dim());
    }
}

fn verify(store: &GovernanceStore) -> vigil_core::Result<()> {
    let total = store.receipt_count()?;
    let corrupt = store.verify_integrity()?;
    if corrupt.is_empty() {
        println!("{} {total} receipts verified, no tampering found", style("✔").green());
        return Ok(());
    }
    for id in &corrupt {
        println!("{} {id} does not match its stored hash", style("✘").red());
    }
    Err(VigilError::Integrity(format!(
        "{} of the stored records failed verification",
        corrupt.len()
    )))
}
