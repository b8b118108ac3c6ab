//! Compiled governance documents and the registry that swaps them atomically.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use regex::Regex;
use std::sync::Arc;
use tracing::{info, warn};
use vigil_config::document::capability_matches;
use vigil_config::GovernanceDocument;
use vigil_core::{Event, EventBus, GovernanceVersion, RiskTier, VigilError};

/// A pattern rule with its regex compiled once at activation.
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    pub capabilities: Vec<String>,
    pub regex: Regex,
    pub escalate_to: RiskTier,
}

impl CompiledPattern {
    pub fn applies_to(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| capability_matches(c, capability))
    }
}

/// A validated governance document bound to its version.
#[derive(Debug)]
pub struct Governance {
    version: GovernanceVersion,
    document: GovernanceDocument,
    patterns: Vec<CompiledPattern>,
    activated_at: DateTime<Utc>,
}

impl Governance {
    /// Validate the document against the constitution and compile it.
    /// Returns the compiled governance and any non-fatal findings.
    pub fn compile(
        document: GovernanceDocument,
        version: GovernanceVersion,
    ) -> vigil_core::Result<(Self, Vec<String>)> {
        let findings = validate_constitution(&document)?;
        let patterns = compile_patterns(&document)?;
        Ok((
            Self {
                version,
                document,
                patterns,
                activated_at: Utc::now(),
            },
            findings,
        ))
    }

    pub fn version(&self) -> GovernanceVersion {
        self.version
    }

    pub fn document(&self) -> &GovernanceDocument {
        &self.document
    }

    pub fn patterns(&self) -> &[CompiledPattern] {
        &self.patterns
    }

    pub fn activated_at(&self) -> DateTime<Utc> {
        self.activated_at
    }
}

fn violation(rule: &str, reason: impl Into<String>) -> VigilError {
    VigilError::ConstitutionValidation {
        rule: rule.to_string(),
        reason: reason.into(),
    }
}

fn compile_patterns(document: &GovernanceDocument) -> vigil_core::Result<Vec<CompiledPattern>> {
    document
        .pattern_rules
        .iter()
        .map(|rule| {
            let regex = Regex::new(&rule.pattern).map_err(|e| {
                violation("patterns_compile", format!("pattern '{}': {e}", rule.pattern))
            })?;
            Ok(CompiledPattern {
                capabilities: rule.capabilities.clone(),
                regex,
                escalate_to: rule.escalate_to,
            })
        })
        .collect()
}

/// Check the constitutional invariants every governance document must satisfy.
///
/// The first violated invariant fails validation. Findings that do not make the
/// document unsafe are returned as warnings.
pub fn validate_constitution(document: &GovernanceDocument) -> vigil_core::Result<Vec<String>> {
    let mut findings = Vec::new();

    if document.capabilities.is_empty() {
        return Err(violation(
            "capabilities_declared",
            "the document declares no capabilities",
        ));
    }

    for (name, rule) in &document.capabilities {
        let resolved = rule.floor.map_or(rule.tier, |f| f.max(rule.tier));
        if rule.destructive && resolved != RiskTier::Irreversible {
            return Err(violation(
                "destructive_is_irreversible",
                format!("'{name}' is destructive but resolves to {resolved}"),
            ));
        }
        if let Some(ceiling) = rule.ceiling
            && ceiling > rule.tier
        {
            return Err(violation(
                "ceiling_not_above_default",
                format!("'{name}' has ceiling {ceiling} above its default {}", rule.tier),
            ));
        }
        if let Some(floor) = rule.floor
            && floor < rule.tier
        {
            findings.push(format!(
                "'{name}' has floor {floor} below its default {}; the floor has no effect",
                rule.tier
            ));
        }
    }

    for boundary in &document.boundaries {
        if !boundary.is_absolute() {
            return Err(violation(
                "boundaries_absolute",
                format!("boundary '{}' is not an absolute path", boundary.display()),
            ));
        }
    }

    for rule in &document.scope_rules {
        if rule.outside_boundary == RiskTier::Inert {
            return Err(violation(
                "escalation_raises",
                "a scope rule escalates to T0, which can never raise a tier",
            ));
        }
        if document.boundaries.is_empty() {
            findings.push(
                "scope rules are declared but no boundaries are; every scoped target counts as outside"
                    .into(),
            );
        }
    }

    for rule in &document.pattern_rules {
        if rule.escalate_to == RiskTier::Inert {
            return Err(violation(
                "escalation_raises",
                format!("pattern '{}' escalates to T0", rule.pattern),
            ));
        }
        let covers_known = rule.capabilities.iter().any(|c| {
            document
                .capabilities
                .keys()
                .any(|name| capability_matches(c, name))
        });
        if !covers_known {
            findings.push(format!(
                "pattern '{}' matches no declared capability",
                rule.pattern
            ));
        }
    }

    Ok(findings)
}

/// Holds the active governance and replaces it atomically on activation.
///
/// A document that fails validation never becomes active; the previous
/// version stays in force.
pub struct GovernanceRegistry {
    current: RwLock<Arc<Governance>>,
    events: EventBus,
}

impl GovernanceRegistry {
    /// Activate `document` as the first version after `previous`
    /// (`GovernanceVersion::default()` on a fresh install).
    pub fn new(
        document: GovernanceDocument,
        previous: GovernanceVersion,
        events: EventBus,
    ) -> vigil_core::Result<Self> {
        let label = document.label.clone();
        let (governance, findings) = Governance::compile(document, previous.next())?;
        for finding in &findings {
            warn!(version = %governance.version(), "{}", finding);
        }
        info!(version = %governance.version(), label = %label, "governance activated");
        Ok(Self {
            current: RwLock::new(Arc::new(governance)),
            events,
        })
    }

    /// The active governance. Cheap: clones an `Arc`.
    pub fn current(&self) -> Arc<Governance> {
        self.current.read().clone()
    }

    pub fn version(&self) -> GovernanceVersion {
        self.current.read().version()
    }

    /// Validate and activate a new document under the next version.
    pub fn activate(&self, document: GovernanceDocument) -> vigil_core::Result<Arc<Governance>> {
        let label = document.label.clone();
        let next = self.version().next();
        let (governance, findings) = match Governance::compile(document, next) {
            Ok(compiled) => compiled,
            Err(e) => {
                warn!(
                    error = %e,
                    active = %self.version(),
                    "governance document rejected, keeping active version"
                );
                self.events.publish(Event::GovernanceRejected {
                    reason: e.to_string(),
                });
                return Err(e);
            }
        };
        for finding in &findings {
            warn!(version = %next, "{}", finding);
        }

        let governance = Arc::new(governance);
        {
            let mut current = self.current.write();
            // Concurrent activations: the later one wins, versions stay monotonic.
            if current.version() >= governance.version() {
                return Err(violation(
                    "version_monotonic",
                    format!(
                        "{} is not newer than active {}",
                        governance.version(),
                        current.version()
                    ),
                ));
            }
            *current = governance.clone();
        }

        info!(version = %next, label = %label, "governance activated");
        self.events.publish(Event::GovernanceActivated {
            version: next,
            label,
        });
        Ok(governance)
    }
}
