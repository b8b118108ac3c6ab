use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::VigilError;

/// Unique identifier for a governed action.
pub type ActionId = Uuid;

/// Unique identifier for a receipt or batch artifact.
pub type ReceiptId = Uuid;

/// Four risk tiers, totally ordered from inert to irreversible:
///
/// - **T0 (Inert)**: read-only, no state change.
/// - **T1 (Reversible)**: state change that can be snapshotted and undone.
/// - **T2 (Controlled)**: needs live context; crosses the tier boundary.
/// - **T3 (Irreversible)**: cannot be undone; requires human approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum RiskTier {
    #[serde(rename = "t0", alias = "inert")]
    Inert = 0,
    #[serde(rename = "t1", alias = "reversible")]
    Reversible = 1,
    #[serde(rename = "t2", alias = "controlled")]
    Controlled = 2,
    #[serde(rename = "t3", alias = "irreversible")]
    Irreversible = 3,
}

impl RiskTier {
    pub const ALL: [RiskTier; 4] = [
        Self::Inert,
        Self::Reversible,
        Self::Controlled,
        Self::Irreversible,
    ];

    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Inert,
            1 => Self::Reversible,
            2 => Self::Controlled,
            _ => Self::Irreversible, // fail-safe
        }
    }

    /// The next tier up, saturating at T3.
    pub fn raised(self) -> Self {
        Self::from_u8(self as u8 + 1)
    }

    /// The next tier down, or `None` at T0.
    pub fn lowered(self) -> Option<Self> {
        match self {
            Self::Inert => None,
            other => Some(Self::from_u8(other as u8 - 1)),
        }
    }

    /// Only T0/T1 decisions can be memoized; T2/T3 need live context.
    pub fn is_cacheable(&self) -> bool {
        *self <= Self::Reversible
    }

    /// Whether a decision at this tier must first cross the tier boundary.
    pub fn requires_boundary_crossing(&self) -> bool {
        *self >= Self::Controlled
    }

    /// Whether receipts at this tier are accumulated into batch artifacts.
    pub fn batches_receipts(&self) -> bool {
        *self <= Self::Reversible
    }

    /// Whether this tier always needs a human in the loop.
    pub fn requires_approval(&self) -> bool {
        *self == Self::Irreversible
    }

    /// Whether actions at this tier are snapshotted before execution.
    pub fn is_reversible(&self) -> bool {
        matches!(self, Self::Reversible | Self::Controlled)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Inert => "inert",
            Self::Reversible => "reversible",
            Self::Controlled => "controlled",
            Self::Irreversible => "irreversible",
        }
    }
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{} ({})", *self as u8, self.label())
    }
}

impl FromStr for RiskTier {
    type Err = VigilError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "t0" | "0" | "inert" => Ok(Self::Inert),
            "t1" | "1" | "reversible" => Ok(Self::Reversible),
            "t2" | "2" | "controlled" => Ok(Self::Controlled),
            "t3" | "3" | "irreversible" => Ok(Self::Irreversible),
            other => Err(VigilError::Classification(format!(
                "unknown risk tier '{other}'"
            ))),
        }
    }
}

/// Monotonically increasing version bound to the active governance document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct GovernanceVersion(pub u64);

impl GovernanceVersion {
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for GovernanceVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Where an action lands relative to the declared workspace boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeBucket {
    /// No target path declared.
    Unscoped,
    InsideBoundary,
    OutsideBoundary,
}

impl ScopeBucket {
    pub const ALL: [ScopeBucket; 3] = [Self::Unscoped, Self::InsideBoundary, Self::OutsideBoundary];
}

impl fmt::Display for ScopeBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unscoped => "unscoped",
            Self::InsideBoundary => "inside",
            Self::OutsideBoundary => "outside",
        })
    }
}

/// Scope descriptor of an action: what it touches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Scope {
    /// Write-style target (file path, key) the action affects, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Free-form arguments forwarded to the execution backend.
    #[serde(default)]
    pub arguments: serde_json::Value,
}

/// A proposed action. Built once through the `with_*` constructors and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionIntent {
    capability: String,
    #[serde(default)]
    scope: Scope,
    #[serde(default)]
    pattern_hints: Vec<String>,
    actor: String,
}

impl ActionIntent {
    pub fn new(capability: impl Into<String>, actor: impl Into<String>) -> Self {
        Self {
            capability: capability.into(),
            scope: Scope::default(),
            pattern_hints: Vec::new(),
            actor: actor.into(),
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.scope.target = Some(target.into());
        self
    }

    pub fn with_arguments(mut self, arguments: serde_json::Value) -> Self {
        self.scope.arguments = arguments;
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.pattern_hints.push(hint.into());
        self
    }

    pub fn capability(&self) -> &str {
        &self.capability
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn target(&self) -> Option<&str> {
        self.scope.target.as_deref()
    }

    pub fn pattern_hints(&self) -> &[String] {
        &self.pattern_hints
    }

    pub fn actor(&self) -> &str {
        &self.actor
    }

    /// Check the intent is well-formed: a non-empty dotted capability made of
    /// lowercase segments, and a non-empty actor.
    pub fn validate(&self) -> crate::Result<()> {
        if self.actor.trim().is_empty() {
            return Err(VigilError::Classification("intent has no actor".into()));
        }
        let well_formed = !self.capability.is_empty()
            && self.capability.split('.').all(|seg| {
                !seg.is_empty()
                    && seg
                        .chars()
                        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
            });
        if !well_formed {
            return Err(VigilError::Classification(format!(
                "malformed capability '{}'",
                self.capability
            )));
        }
        if let Some(target) = &self.scope.target
            && target.trim().is_empty()
        {
            return Err(VigilError::Classification("intent target is empty".into()));
        }
        Ok(())
    }
}

/// The pipeline's verdict on a single action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub tier: RiskTier,
    pub allowed: bool,
    pub rationale: String,
    pub cache_hit: bool,
    pub governance_version: GovernanceVersion,
}

impl PolicyDecision {
    /// The fail-closed decision used when classification itself failed.
    pub fn deny(reason: impl Into<String>, governance_version: GovernanceVersion) -> Self {
        Self {
            tier: RiskTier::Irreversible,
            allowed: false,
            rationale: reason.into(),
            cache_hit: false,
            governance_version,
        }
    }

    /// Same decision, but refused with the given reason appended to the rationale.
    pub fn refused(&self, reason: &str) -> Self {
        Self {
            allowed: false,
            rationale: format!("{}; refused: {reason}", self.rationale),
            ..self.clone()
        }
    }
}

/// Prior state captured for a write-style target before execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PriorState {
    Content { bytes: Vec<u8> },
    /// The target did not exist before the action.
    Absent,
}

/// Pre-execution snapshot of a reversible action's target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub action_id: ActionId,
    pub target: String,
    pub prior: PriorState,
    pub created_at: DateTime<Utc>,
}
