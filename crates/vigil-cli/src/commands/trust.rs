use clap::Subcommand;
use console::style;
use std::sync::Arc;
use vigil_config::{GovernanceDocument, VigilConfig};
use vigil_core::{EventBus, VigilError};
use vigil_governance::TrustLedger;
use vigil_store::GovernanceStore;

use super::styled_tier;

#[derive(Subcommand)]
pub enum TrustAction {
    /// List trust records and pending graduation proposals
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Authorize the pending graduation for a capability
    Approve { capability: String },
    /// Decline the pending graduation for a capability (starts a cooldown)
    Reject { capability: String },
    /// Drop any granted tier for a capability and start a cooldown
    Revoke {
        capability: String,
        /// Why the grant is being withdrawn
        #[arg(short, long, default_value = "revoked from the command line")]
        reason: String,
    },
}

pub(super) fn run(
    config: &VigilConfig,
    document: &GovernanceDocument,
    store: &GovernanceStore,
    action: TrustAction,
) -> vigil_core::Result<()> {
    let ledger = TrustLedger::new(config.trust.clone(), EventBus::default())
        .with_store(Arc::new(store.clone()))?;
    ledger.sync_with(document);

    match action {
        TrustAction::List { json } => list(&ledger, json),
        TrustAction::Approve { capability } => {
            let tier = ledger.authorize(&capability, true)?;
            println!(
                "{} {capability} graduated to {}",
                style("✔").green(),
                styled_tier(tier)
            );
            Ok(())
        }
        TrustAction::Reject { capability } => {
            let pending = ledger
                .record(&capability)
                .and_then(|r| r.pending_proposal)
                .is_some();
            if !pending {
                return Err(VigilError::GraduationRejected {
                    capability,
                    reason: "no pending graduation proposal".into(),
                });
            }
            match ledger.authorize(&capability, false) {
                Ok(_) | Err(VigilError::GraduationRejected { .. }) => {}
                Err(e) => return Err(e),
            }
            let cooldown = ledger
                .record(&capability)
                .map(|r| r.cooldown_remaining())
                .unwrap_or_default();
            println!(
                "{} graduation of {capability} declined, next proposal after {cooldown} actions",
                style("✔").green()
            );
            Ok(())
        }
        TrustAction::Revoke { capability, reason } => {
            ledger.revoke(&capability, &reason)?;
            println!("{} trust grant for {capability} revoked", style("✔").green());
            Ok(())
        }
    }
}

fn list(ledger: &TrustLedger, json: bool) -> vigil_core::Result<()> {
    let records = ledger.records();
    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }
    if records.is_empty() {
        println!("No trust records.");
        return Ok(());
    }

    println!(
        "{:<20} {:<8} {:<8} {:<8} {:>7} {:>7} {:>9}",
        "capability", "default", "ceiling", "current", "passed", "failed", "cooldown"
    );
    println!("{}", "-".repeat(74));
    for record in &records {
        println!(
            "{:<20} {:<8} {:<8} {:<8} {:>7} {:>7} {:>9}",
            record.capability,
            record.default_tier.to_string(),
            record.tier_ceiling.to_string(),
            styled_tier(record.effective_tier()).to_string(),
            record.success_count,
            record.failure_count,
            record.cooldown_remaining()
        );
        if let Some(proposal) = &record.pending_proposal {
            println!(
                "   {} proposed {} -> {} after {} successes ({})",
                style("pending").yellow(),
                proposal.from,
                proposal.to,
                proposal.evidence,
                proposal.id
            );
        }
    }
    Ok(())
}
