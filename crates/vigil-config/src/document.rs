//! The governance document: default capability tiers, escalation rules, tier
//! ceilings, and static deny rules. Read-only input to the pipeline.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;
use vigil_core::{RiskTier, VigilError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernanceDocument {
    /// Human-readable name of this revision.
    pub label: String,
    /// Declared workspace roots. Targets outside all of them trigger scope escalation.
    pub boundaries: Vec<PathBuf>,
    /// Capabilities that are always denied.
    pub deny: Vec<String>,
    /// Default tier table, keyed by capability.
    pub capabilities: BTreeMap<String, CapabilityRule>,
    pub scope_rules: Vec<ScopeRule>,
    pub pattern_rules: Vec<PatternRule>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityRule {
    /// Default tier.
    pub tier: RiskTier,
    /// Lowest tier graduation may reach. Defaults to the default tier (no graduation).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ceiling: Option<RiskTier>,
    /// Raise-only override applied after escalation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub floor: Option<RiskTier>,
    /// Destroys data; must resolve to T3.
    #[serde(default)]
    pub destructive: bool,
    /// Route through human approval regardless of tier.
    #[serde(default)]
    pub requires_approval: bool,
}

impl CapabilityRule {
    pub fn at(tier: RiskTier) -> Self {
        Self {
            tier,
            ceiling: None,
            floor: None,
            destructive: false,
            requires_approval: false,
        }
    }

    pub fn effective_ceiling(&self) -> RiskTier {
        self.ceiling.unwrap_or(self.tier).min(self.tier)
    }
}

/// Raises the tier of matching capabilities whose target lies outside every boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopeRule {
    pub capabilities: Vec<String>,
    pub outside_boundary: RiskTier,
}

/// Raises the tier of matching capabilities when a target or hint matches `pattern`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternRule {
    pub capabilities: Vec<String>,
    /// Regular expression matched against the target and every pattern hint.
    pub pattern: String,
    pub escalate_to: RiskTier,
}

/// Match a capability against an exact name, a `prefix.*` wildcard, or `*`.
pub fn capability_matches(pattern: &str, capability: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    match pattern.strip_suffix(".*") {
        Some(prefix) => capability
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('.')),
        None => pattern == capability,
    }
}

impl Default for GovernanceDocument {
    fn default() -> Self {
        Self {
            label: "unnamed".into(),
            boundaries: vec![],
            deny: vec![],
            capabilities: BTreeMap::new(),
            scope_rules: vec![],
            pattern_rules: vec![],
        }
    }
}

impl GovernanceDocument {
    /// Built-in document used when no governance file is configured.
    pub fn baseline() -> Self {
        let mut capabilities = BTreeMap::new();
        capabilities.insert("fs.read".into(), CapabilityRule::at(RiskTier::Inert));
        capabilities.insert("fs.list".into(), CapabilityRule::at(RiskTier::Inert));
        capabilities.insert(
            "fs.write".into(),
            CapabilityRule {
                ceiling: Some(RiskTier::Inert),
                ..CapabilityRule::at(RiskTier::Reversible)
            },
        );
        capabilities.insert(
            "fs.delete".into(),
            CapabilityRule {
                destructive: true,
                ..CapabilityRule::at(RiskTier::Irreversible)
            },
        );
        capabilities.insert(
            "shell.exec".into(),
            CapabilityRule {
                ceiling: Some(RiskTier::Reversible),
                ..CapabilityRule::at(RiskTier::Controlled)
            },
        );
        capabilities.insert("net.get".into(), CapabilityRule::at(RiskTier::Inert));
        capabilities.insert("net.post".into(), CapabilityRule::at(RiskTier::Irreversible));

        Self {
            label: "baseline".into(),
            boundaries: vec![PathBuf::from("/workspace")],
            deny: vec![],
            capabilities,
            scope_rules: vec![ScopeRule {
                capabilities: vec!["fs.write".into(), "fs.delete".into()],
                outside_boundary: RiskTier::Irreversible,
            }],
            pattern_rules: vec![
                PatternRule {
                    capabilities: vec!["shell.exec".into()],
                    pattern: r"rm\s+-[a-zA-Z]*r".into(),
                    escalate_to: RiskTier::Irreversible,
                },
                PatternRule {
                    capabilities: vec!["fs.*".into()],
                    pattern: r"(^|/)\.(ssh|gnupg|aws)(/|$)".into(),
                    escalate_to: RiskTier::Irreversible,
                },
            ],
        }
    }

    pub fn from_toml_str(raw: &str) -> vigil_core::Result<Self> {
        toml::from_str::<Self>(raw)
            .map_err(|e| VigilError::Config(format!("failed to parse governance document: {e}")))
    }

    /// Load a governance document from disk.
    pub fn load(path: &Path) -> vigil_core::Result<Self> {
        info!(?path, "loading governance document");
        let raw = std::fs::read_to_string(path)?;
        toml::from_str::<Self>(&raw).map_err(|e| {
            VigilError::Config(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    pub fn rule(&self, capability: &str) -> Option<&CapabilityRule> {
        self.capabilities.get(capability)
    }

    pub fn is_denied(&self, capability: &str) -> bool {
        self.deny.iter().any(|d| capability_matches(d, capability))
    }
}
