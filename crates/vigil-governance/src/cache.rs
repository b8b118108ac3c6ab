//! Memoized T0/T1 decisions keyed by (capability, scope bucket, governance version).

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};
use vigil_core::{GovernanceVersion, PolicyDecision, ScopeBucket, VigilError};

use crate::classifier::{evaluate, TrustGrants};
use crate::governance::Governance;

/// Outcome of a cache lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    Hit(PolicyDecision),
    Miss,
}

struct Generation {
    version: GovernanceVersion,
    entries: HashMap<(String, ScopeBucket), PolicyDecision>,
}

/// Policy cache. Readers never wait on a rebuild: a new generation is built
/// off to the side and swapped in under a short write lock.
pub struct PolicyCache {
    generation: RwLock<Arc<Generation>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Default for PolicyCache {
    fn default() -> Self {
        Self::new()
    }
}

impl PolicyCache {
    /// An empty cache. Every lookup misses until the first build.
    pub fn new() -> Self {
        Self {
            generation: RwLock::new(Arc::new(Generation {
                version: GovernanceVersion::default(),
                entries: HashMap::new(),
            })),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Precompute every cacheable (capability, bucket) decision for `governance`.
    /// Returns the number of entries in the new generation.
    pub fn rebuild(&self, governance: &Governance, grants: &TrustGrants) -> usize {
        let mut entries = HashMap::new();
        for capability in governance.document().capabilities.keys() {
            for bucket in ScopeBucket::ALL {
                let classification = evaluate(capability, bucket, &[], governance, grants);
                if classification.is_cacheable() {
                    entries.insert(
                        (capability.clone(), bucket),
                        classification.decision(true),
                    );
                }
            }
        }

        let count = entries.len();
        let generation = Arc::new(Generation {
            version: governance.version(),
            entries,
        });
        {
            let mut current = self.generation.write();
            if current.version > generation.version {
                debug!(
                    stale = %generation.version,
                    active = %current.version,
                    "discarding stale cache build"
                );
                return current.entries.len();
            }
            *current = generation;
        }
        info!(version = %governance.version(), entries = count, "policy cache rebuilt");
        count
    }

    /// Look up a decision. A generation built for another governance version
    /// is never served.
    pub fn lookup(
        &self,
        capability: &str,
        bucket: ScopeBucket,
        version: GovernanceVersion,
    ) -> CacheLookup {
        let generation = self.generation.read().clone();
        if generation.version != version {
            let err = VigilError::CacheInconsistency {
                cached: generation.version.0,
                active: version.0,
            };
            debug!(capability, error = %err, "treating lookup as a miss");
            self.misses.fetch_add(1, Ordering::Relaxed);
            return CacheLookup::Miss;
        }
        match generation.entries.get(&(capability.to_string(), bucket)) {
            Some(decision) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                CacheLookup::Hit(decision.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                CacheLookup::Miss
            }
        }
    }

    /// Record a miss the caller decided on after a hit (e.g. a tier mismatch).
    pub fn note_rejected_hit(&self) {
        self.hits.fetch_sub(1, Ordering::Relaxed);
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn version(&self) -> GovernanceVersion {
        self.generation.read().version
    }

    pub fn len(&self) -> usize {
        self.generation.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// (hits, misses) since construction.
    pub fn stats(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }
}
