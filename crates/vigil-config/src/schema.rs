use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use vigil_core::{RiskTier, VigilError};

/// Root configuration, mapped from `vigil.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VigilConfig {
    pub governance: GovernanceConfig,
    pub verification: VerificationConfig,
    pub rollback: RollbackConfig,
    pub receipts: ReceiptsConfig,
    pub trust: TrustConfig,
    pub approval: ApprovalConfig,
    pub store: StoreConfig,
    pub logging: LoggingConfig,
}

// ── Governance ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernanceConfig {
    /// Path to the governance document. `None` uses the built-in baseline.
    pub document: Option<PathBuf>,
    /// Re-activate the document when the file changes on disk.
    pub watch: bool,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            document: None,
            watch: true,
        }
    }
}

// ── Verification ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationConfig {
    /// Background workers verifying T0/T1 outcomes.
    pub workers: usize,
    /// Queue depth past which verification runs on the caller's path.
    pub max_queue_depth: usize,
    /// Budget for a single verification predicate. Exceeding it fails the task.
    pub task_timeout_secs: u64,
    /// Budget for reaching quiescence at a tier boundary.
    pub drain_timeout_secs: u64,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            max_queue_depth: 10,
            task_timeout_secs: 30,
            drain_timeout_secs: 10,
        }
    }
}

// ── Rollback ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RollbackConfig {
    /// Maximum concurrently retained unsettled snapshots.
    pub max_snapshots: usize,
}

impl Default for RollbackConfig {
    fn default() -> Self {
        Self { max_snapshots: 50 }
    }
}

// ── Receipts ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiptsConfig {
    /// Buffered T0/T1 receipts that trigger an automatic flush.
    pub max_batch_size: usize,
    /// Background flush cadence in seconds. 0 disables the flusher.
    pub flush_interval_secs: u64,
}

impl Default for ReceiptsConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 64,
            flush_interval_secs: 5,
        }
    }
}

// ── Trust ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustConfig {
    /// Consecutive successes needed to propose T3 → T2.
    pub t3_to_t2: u64,
    /// Consecutive successes needed to propose T2 → T1.
    pub t2_to_t1: u64,
    /// Consecutive successes needed to propose T1 → T0.
    pub t1_to_t0: u64,
    /// Cooldown length after a failure, counted in subsequent actions.
    pub cooldown_actions: u64,
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            t3_to_t2: 50,
            t2_to_t1: 20,
            t1_to_t0: 10,
            cooldown_actions: 25,
        }
    }
}

impl TrustConfig {
    /// Evidence required to graduate one step down from `from`.
    pub fn threshold_for(&self, from: RiskTier) -> Option<u64> {
        match from {
            RiskTier::Irreversible => Some(self.t3_to_t2),
            RiskTier::Controlled => Some(self.t2_to_t1),
            RiskTier::Reversible => Some(self.t1_to_t0),
            RiskTier::Inert => None,
        }
    }
}

// ── Approval ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalConfig {
    /// Seconds to wait for a human before the request times out (auto-deny).
    pub timeout_secs: u64,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self { timeout_secs: 120 }
    }
}

// ── Store ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path to the SQLite database holding receipts, trust, and the journal.
    pub db_path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("vigil.db"),
        }
    }
}

// ── Logging ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Output format: "pretty", "json", "compact".
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

// ── Validation ─────────────────────────────────────────────────

/// A single config validation issue.
#[derive(Debug)]
pub struct ConfigWarning {
    pub field: String,
    pub message: String,
    pub severity: WarningSeverity,
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningSeverity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self.severity {
            WarningSeverity::Error => "error",
            WarningSeverity::Warning => "warning",
            WarningSeverity::Info => "info",
        };
        write!(f, "[{}] {}: {}", tag, self.field, self.message)?;
        if let Some(ref h) = self.hint {
            write!(f, "\n   ↳ {}", h)?;
        }
        Ok(())
    }
}

impl VigilConfig {
    /// Validate the config and return a list of warnings/errors.
    /// Returns [`VigilError::ConfigValidation`] naming every field at Error severity.
    pub fn validate(&self) -> vigil_core::Result<Vec<ConfigWarning>> {
        let mut warnings = Vec::new();

        // ── Verification ───
        if self.verification.workers == 0 {
            warnings.push(ConfigWarning {
                field: "verification.workers".into(),
                message: "no verification workers — every verification would run inline".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 4".into()),
            });
        }
        if self.verification.max_queue_depth == 0 {
            warnings.push(ConfigWarning {
                field: "verification.max_queue_depth".into(),
                message: "queue depth 0 forces synchronous verification for all actions".into(),
                severity: WarningSeverity::Warning,
                hint: Some("A depth of 10 is typical".into()),
            });
        }
        if self.verification.task_timeout_secs == 0 {
            warnings.push(ConfigWarning {
                field: "verification.task_timeout_secs".into(),
                message: "task timeout is 0 — every verification would time out".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 30".into()),
            });
        }
        if self.verification.drain_timeout_secs == 0 {
            warnings.push(ConfigWarning {
                field: "verification.drain_timeout_secs".into(),
                message: "drain timeout is 0 — every T2/T3 crossing would be refused".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 10".into()),
            });
        }

        // ── Rollback ───
        if self.rollback.max_snapshots == 0 {
            warnings.push(ConfigWarning {
                field: "rollback.max_snapshots".into(),
                message: "snapshot retention is 0 — reversible actions could never be undone".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 50".into()),
            });
        } else if self.rollback.max_snapshots < self.verification.max_queue_depth {
            warnings.push(ConfigWarning {
                field: "rollback.max_snapshots".into(),
                message: format!(
                    "retention {} is below the queue depth {} — queued actions may lose their snapshot",
                    self.rollback.max_snapshots, self.verification.max_queue_depth
                ),
                severity: WarningSeverity::Warning,
                hint: Some("Keep max_snapshots well above max_queue_depth".into()),
            });
        }

        // ── Receipts ───
        if self.receipts.max_batch_size == 0 {
            warnings.push(ConfigWarning {
                field: "receipts.max_batch_size".into(),
                message: "batch size 0 is not allowed".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 64".into()),
            });
        }
        if self.receipts.flush_interval_secs == 0 {
            warnings.push(ConfigWarning {
                field: "receipts.flush_interval_secs".into(),
                message: "background flushing disabled — receipts flush only at boundaries or when full".into(),
                severity: WarningSeverity::Info,
                hint: None,
            });
        }

        // ── Trust ───
        let t = &self.trust;
        if t.t3_to_t2 == 0 || t.t2_to_t1 == 0 || t.t1_to_t0 == 0 {
            warnings.push(ConfigWarning {
                field: "trust".into(),
                message: "a graduation threshold of 0 would propose graduation without evidence".into(),
                severity: WarningSeverity::Error,
                hint: None,
            });
        } else if t.t3_to_t2 < t.t2_to_t1 || t.t2_to_t1 < t.t1_to_t0 {
            warnings.push(ConfigWarning {
                field: "trust".into(),
                message: "higher-tier transitions should require more evidence than lower ones".into(),
                severity: WarningSeverity::Warning,
                hint: Some("e.g. t3_to_t2 = 50, t2_to_t1 = 20, t1_to_t0 = 10".into()),
            });
        }

        // ── Approval ───
        if self.approval.timeout_secs == 0 {
            warnings.push(ConfigWarning {
                field: "approval.timeout_secs".into(),
                message: "approval timeout is 0 — every T3 action would time out".into(),
                severity: WarningSeverity::Warning,
                hint: Some("Set to e.g. 120".into()),
            });
        }

        // ── Logging format ───
        let valid_formats = ["pretty", "json", "compact"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.format".into(),
                message: format!("unknown log format '{}'", self.logging.format),
                severity: WarningSeverity::Warning,
                hint: Some(format!("Valid values: {}", valid_formats.join(", "))),
            });
        }

        // ── Logging level ───
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.level".into(),
                message: format!("unknown log level '{}'", self.logging.level),
                severity: WarningSeverity::Warning,
                hint: Some(format!("Valid values: {}", valid_levels.join(", "))),
            });
        }

        // Check for hard errors
        let errors: Vec<&ConfigWarning> = warnings
            .iter()
            .filter(|w| w.severity == WarningSeverity::Error)
            .collect();

        if !errors.is_empty() {
            let fields: Vec<&str> = errors.iter().map(|w| w.field.as_str()).collect();
            let reasons: Vec<&str> = errors.iter().map(|w| w.message.as_str()).collect();
            return Err(VigilError::ConfigValidation {
                field: fields.join(", "),
                reason: reasons.join("; "),
            });
        }

        Ok(warnings)
    }
}
