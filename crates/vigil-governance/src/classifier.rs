//! Risk classification: maps an intent to a tier from the governance document
//! and the trust grants in force. Pure over its inputs.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use vigil_config::document::capability_matches;
use vigil_config::GovernanceDocument;
use vigil_core::{ActionIntent, GovernanceVersion, PolicyDecision, RiskTier, ScopeBucket};

use crate::governance::Governance;

/// Tiers granted (or imposed) by the trust ledger, keyed by capability.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrustGrants {
    grants: HashMap<String, RiskTier>,
}

impl TrustGrants {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get(&self, capability: &str) -> Option<RiskTier> {
        self.grants.get(capability).copied()
    }

    pub fn len(&self) -> usize {
        self.grants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }

    /// Put `tier` in force for `capability`, or drop its grant.
    pub(crate) fn set(&mut self, capability: &str, tier: Option<RiskTier>) {
        match tier {
            Some(tier) => {
                self.grants.insert(capability.to_string(), tier);
            }
            None => {
                self.grants.remove(capability);
            }
        }
    }
}

impl FromIterator<(String, RiskTier)> for TrustGrants {
    fn from_iter<I: IntoIterator<Item = (String, RiskTier)>>(iter: I) -> Self {
        Self {
            grants: iter.into_iter().collect(),
        }
    }
}

/// Result of classifying one intent.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub capability: String,
    pub tier: RiskTier,
    pub bucket: ScopeBucket,
    /// Whether the capability is declared in the governance document.
    pub known: bool,
    /// Denied outright by a static deny rule.
    pub denied: bool,
    /// Needs a human before execution, regardless of tier.
    pub requires_approval: bool,
    pub governance_version: GovernanceVersion,
    /// One entry per rule that shaped the tier, in the order applied.
    pub steps: Vec<String>,
}

impl Classification {
    pub fn rationale(&self) -> String {
        self.steps.join("; ")
    }

    /// Whether a decision for this classification may be served from the cache.
    pub fn is_cacheable(&self) -> bool {
        self.known && self.tier.is_cacheable() && !self.requires_approval
    }

    /// The decision this classification evaluates to.
    pub fn decision(&self, cache_hit: bool) -> PolicyDecision {
        let mut rationale = self.rationale();
        if self.denied {
            rationale.push_str("; denied by governance");
        }
        PolicyDecision {
            tier: self.tier,
            allowed: !self.denied,
            rationale,
            cache_hit,
            governance_version: self.governance_version,
        }
    }
}

/// Classify an intent against the active governance and the trust grants in force.
///
/// Unknown capabilities resolve to T3 without consulting any other rule.
pub fn classify(
    intent: &ActionIntent,
    governance: &Governance,
    grants: &TrustGrants,
) -> vigil_core::Result<Classification> {
    intent.validate()?;
    let bucket = scope_bucket(intent.target(), governance.document());
    let mut texts: Vec<&str> = intent.pattern_hints().iter().map(String::as_str).collect();
    if let Some(target) = intent.target() {
        texts.push(target);
    }
    Ok(evaluate(intent.capability(), bucket, &texts, governance, grants))
}

/// Classification of a capability in a scope bucket, with `texts` checked
/// against pattern rules. Shared by live classification and cache builds so
/// both arrive at the same answer for the same inputs.
pub fn evaluate(
    capability: &str,
    bucket: ScopeBucket,
    texts: &[&str],
    governance: &Governance,
    grants: &TrustGrants,
) -> Classification {
    let document = governance.document();
    let version = governance.version();
    let denied = document.is_denied(capability);

    let Some(rule) = document.rule(capability) else {
        return Classification {
            capability: capability.to_string(),
            tier: RiskTier::Irreversible,
            bucket,
            known: false,
            denied,
            requires_approval: true,
            governance_version: version,
            steps: vec![format!("unknown capability '{capability}' fails safe to T3")],
        };
    };

    let mut tier = rule.tier;
    let mut steps = vec![format!("default {tier} under governance {version}")];
    let mut escalated = false;

    // (a) scope escalation
    if bucket == ScopeBucket::OutsideBoundary {
        for scope_rule in &document.scope_rules {
            let applies = scope_rule
                .capabilities
                .iter()
                .any(|c| capability_matches(c, capability));
            if applies && scope_rule.outside_boundary > tier {
                tier = scope_rule.outside_boundary;
                escalated = true;
                steps.push(format!("target outside workspace boundaries raises to {tier}"));
            }
        }
    }

    // (b) pattern escalation
    for pattern in governance.patterns() {
        if !pattern.applies_to(capability) || pattern.escalate_to <= tier {
            continue;
        }
        if texts.iter().any(|t| pattern.regex.is_match(t)) {
            tier = pattern.escalate_to;
            escalated = true;
            steps.push(format!("pattern '{}' raises to {tier}", pattern.regex.as_str()));
        }
    }

    // (c) raise-only override
    if let Some(floor) = rule.floor
        && floor > tier
    {
        tier = floor;
        escalated = true;
        steps.push(format!("governance floor raises to {tier}"));
    }

    // (d) trust adjustment
    if let Some(granted) = grants.get(capability) {
        if granted > tier {
            tier = granted;
            steps.push(format!("trust penalty raises to {tier}"));
        } else if granted < tier && !escalated {
            let lowered = granted.max(rule.effective_ceiling());
            if lowered < tier {
                tier = lowered;
                steps.push(format!("graduated trust lowers to {tier}"));
            }
        }
    }

    let requires_approval = tier.requires_approval() || rule.requires_approval || rule.destructive;

    Classification {
        capability: capability.to_string(),
        tier,
        bucket,
        known: true,
        denied,
        requires_approval,
        governance_version: version,
        steps,
    }
}

/// Bucket a target against the document's boundaries.
///
/// Paths are normalized lexically first, so `..` cannot climb out of a
/// boundary unnoticed. Relative targets are treated as outside.
pub fn scope_bucket(target: Option<&str>, document: &GovernanceDocument) -> ScopeBucket {
    let Some(target) = target else {
        return ScopeBucket::Unscoped;
    };
    let path = Path::new(target);
    if !path.is_absolute() {
        return ScopeBucket::OutsideBoundary;
    }
    let normalized = normalize(path);
    let inside = document
        .boundaries
        .iter()
        .any(|b| normalized.starts_with(normalize(b)));
    if inside {
        ScopeBucket::InsideBoundary
    } else {
        ScopeBucket::OutsideBoundary
    }
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}
