use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};
use console::style;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use vigil_config::{ConfigLoader, DocumentWatcher, GovernanceDocument, VigilConfig};
use vigil_core::{ActionIntent, GovernanceJournal, GovernanceVersion, RiskTier, VigilError};
use vigil_governance::{Governance, Governor, TrustGrants, TrustLedger, classify};
use vigil_store::GovernanceStore;

mod backend;
mod receipts;
mod trust;

pub use backend::DetachedBackend;
pub use receipts::ReceiptArgs;
pub use trust::TrustAction;

/// Vigil: risk-tiered governance for autonomous agent actions
#[derive(Parser)]
#[command(name = "vigil", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to vigil.toml config file
    #[arg(short, long, global = true, env = "VIGIL_CONFIG")]
    config: Option<PathBuf>,

    /// Log level override (e.g. debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Enable verbose output (debug logging)
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress all log output (errors only)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a governance document against the constitution
    Check {
        /// Document to check (defaults to the one the config points at)
        path: Option<PathBuf>,
        /// Keep running and re-check the document whenever it changes
        #[arg(long)]
        watch: bool,
    },
    /// Show how a hypothetical action would be classified
    Classify {
        /// Capability, e.g. fs.write
        capability: String,
        /// Write-style target the action affects
        #[arg(short, long)]
        target: Option<String>,
        /// Acting agent
        #[arg(short, long, default_value = "cli")]
        actor: String,
        /// Extra text checked against pattern rules (repeatable)
        #[arg(long = "hint")]
        hints: Vec<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List stored receipts and batches
    Receipts(ReceiptArgs),
    /// Inspect and manage trust graduation
    Trust {
        #[command(subcommand)]
        action: TrustAction,
    },
    /// Settle verifications and snapshots left unfinished by an unclean shutdown
    Recover,
    /// Show current configuration
    Config {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Generate shell completions for bash, zsh, or fish
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

impl Cli {
    pub async fn run(self) -> vigil_core::Result<()> {
        // Load config first so we can use it for log format
        let loader = ConfigLoader::load(self.config.as_deref())?;
        let config = loader.get();

        // --verbose > --quiet > --log-level > config
        let log_level = if self.verbose {
            "debug"
        } else if self.quiet {
            "error"
        } else {
            self.log_level
                .as_deref()
                .unwrap_or(config.logging.level.as_str())
        };
        init_tracing(log_level, &config.logging.format);

        match self.command {
            Commands::Check { path, watch } => Self::cmd_check(&loader, path, watch).await,
            Commands::Classify {
                capability,
                target,
                actor,
                hints,
                json,
            } => Self::cmd_classify(&loader, capability, target, actor, hints, json),
            Commands::Receipts(args) => receipts::run(&open_store(&config)?, args),
            Commands::Trust { action } => {
                let document = loader.governance_document()?;
                trust::run(&config, &document, &open_store(&config)?, action)
            }
            Commands::Recover => Self::cmd_recover(&loader).await,
            Commands::Config { json } => Self::cmd_config(&config, json),
            Commands::Completions { shell } => Self::cmd_completions(shell),
        }
    }

    async fn cmd_check(
        loader: &ConfigLoader,
        path: Option<PathBuf>,
        watch: bool,
    ) -> vigil_core::Result<()> {
        let path = path.or_else(|| loader.get().governance.document);
        let document = match &path {
            Some(path) => GovernanceDocument::load(path)?,
            None => {
                println!("No governance document configured, checking the built-in baseline.");
                GovernanceDocument::baseline()
            }
        };
        let valid = report_check(&document);

        let Some(path) = path.filter(|_| watch) else {
            return if valid {
                Ok(())
            } else {
                Err(VigilError::Config("governance document rejected".into()))
            };
        };

        let _watcher = DocumentWatcher::watch(&path, |document| {
            report_check(&document);
        })?;
        println!();
        println!("Watching {} for changes (Ctrl+C to stop)", path.display());
        tokio::signal::ctrl_c().await?;
        Ok(())
    }

    fn cmd_classify(
        loader: &ConfigLoader,
        capability: String,
        target: Option<String>,
        actor: String,
        hints: Vec<String>,
        json: bool,
    ) -> vigil_core::Result<()> {
        let config = loader.get();
        let document = loader.governance_document()?;

        // Trust grants and the version in force come from the store when one exists.
        let (grants, version) = if config.store.db_path.exists() {
            let store = Arc::new(open_store(&config)?);
            let ledger = TrustLedger::new(config.trust.clone(), Default::default())
                .with_store(store.clone())?;
            ledger.sync_with(&document);
            (ledger.grants(), store.last_activation()?.unwrap_or_default())
        } else {
            (Arc::new(TrustGrants::empty()), GovernanceVersion::default())
        };
        let (governance, _) = Governance::compile(document, version)?;

        let mut intent = ActionIntent::new(capability, actor);
        if let Some(target) = target {
            intent = intent.with_target(target);
        }
        for hint in hints {
            intent = intent.with_hint(hint);
        }
        let classification = classify(&intent, &governance, &grants)?;
        let decision = classification.decision(false);

        if json {
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "capability": classification.capability,
                    "tier": classification.tier,
                    "scope": classification.bucket.to_string(),
                    "known": classification.known,
                    "allowed": decision.allowed,
                    "requires_approval": classification.requires_approval,
                    "cacheable": classification.is_cacheable(),
                    "governance_version": version.0,
                    "rationale": decision.rationale,
                }))?
            );
            return Ok(());
        }

        println!(
            "{}  {}  ({})",
            style(&classification.capability).bold(),
            styled_tier(classification.tier),
            classification.tier.label()
        );
        println!("   scope:     {}", classification.bucket);
        println!(
            "   decision:  {}",
            if decision.allowed {
                style("allowed").green()
            } else {
                style("denied").red()
            }
        );
        if classification.requires_approval {
            println!("   approval:  {}", style("human approval required").yellow());
        }
        if !classification.known {
            println!("   note:      capability is not declared, treated as irreversible");
        }
        println!("   cacheable: {}", classification.is_cacheable());
        println!("   governance {version}");
        println!("   rationale: {}", decision.rationale);
        Ok(())
    }

    async fn cmd_recover(loader: &ConfigLoader) -> vigil_core::Result<()> {
        let config = loader.get();
        let store = Arc::new(open_store(&config)?);
        let governor = Governor::builder(Arc::new(DetachedBackend))
            .config(config)
            .document(loader.governance_document()?)
            .persistence(store)
            .build()?;

        let report = governor.recover()?;
        governor.shutdown().await?;

        if report.tasks_failed == 0 && report.orphans_rolled_back == 0 {
            println!("{} Nothing to recover.", style("✔").green());
            return Ok(());
        }
        println!("{} Recovery complete", style("✔").green());
        println!("   unfinished verifications failed: {}", report.tasks_failed);
        println!("   of which rolled back:            {}", report.rolled_back);
        println!("   orphaned snapshots rolled back:  {}", report.orphans_rolled_back);
        Ok(())
    }

    fn cmd_config(config: &VigilConfig, json: bool) -> vigil_core::Result<()> {
        if json {
            println!("{}", serde_json::to_string_pretty(config)?);
        } else {
            println!(
                "{}",
                toml::to_string_pretty(config).map_err(|e| VigilError::Config(e.to_string()))?
            );
        }
        Ok(())
    }

    fn cmd_completions(shell: Shell) -> vigil_core::Result<()> {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "vigil", &mut std::io::stdout());
        Ok(())
    }
}

fn init_tracing(level: &str, format: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        "json" => builder.json().with_target(true).init(),
        "compact" => builder.compact().with_target(false).init(),
        _ => builder.pretty().with_target(false).init(),
    }
}

fn open_store(config: &VigilConfig) -> vigil_core::Result<GovernanceStore> {
    GovernanceStore::open(&config.store.db_path)
}

/// Print the outcome of validating one document revision. Returns whether it passed.
fn report_check(document: &GovernanceDocument) -> bool {
    match Governance::compile(document.clone(), GovernanceVersion::default()) {
        Ok((_, findings)) => {
            println!(
                "{} governance document '{}' is valid ({} capabilities, {} pattern rules)",
                style("✔").green(),
                document.label,
                document.capabilities.len(),
                document.pattern_rules.len()
            );
            for finding in &findings {
                println!("   {} {finding}", style("!").yellow());
            }
            info!(
                label = %document.label,
                findings = findings.len(),
                "governance document checked"
            );
            true
        }
        Err(e) => {
            println!("{} {e}", style("✘").red());
            warn!(label = %document.label, error = %e, "governance document rejected");
            false
        }
    }
}

fn styled_tier(tier: RiskTier) -> console::StyledObject<String> {
    let text = tier.to_string();
    match tier {
        RiskTier::Inert => style(text).green(),
        RiskTier::Reversible => style(text).cyan(),
        RiskTier::Controlled => style(text).yellow(),
        RiskTier::Irreversible => style(text).red().bold(),
    }
}
