#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;
    use vigil_config::{GovernanceDocument, VigilConfig};
    use vigil_core::{ActionIntent, StateStore};
    use vigil_governance::{
        Governor, MemoryJournal, MemoryReceiptSink, MemoryStateStore, MockBackend,
    };

    fn test_config() -> VigilConfig {
        let mut config = VigilConfig::default();
        config.receipts.flush_interval_secs = 0;
        config.approval.timeout_secs = 1;
        config.verification.task_timeout_secs = 2;
        config.verification.drain_timeout_secs = 5;
        config
    }

    struct Harness {
        governor: Arc<Governor>,
        sink: Arc<MemoryReceiptSink>,
        store: Arc<MemoryStateStore>,
        executed: Arc<Mutex<Vec<ActionIntent>>>,
    }

    fn harness(config: VigilConfig) -> Harness {
        harness_with(
            config,
            GovernanceDocument::baseline(),
            Arc::new(MemoryStateStore::new()),
            Arc::new(MemoryJournal::new()),
            &[],
        )
    }

    fn harness_with(
        config: VigilConfig,
        document: GovernanceDocument,
        store: Arc<MemoryStateStore>,
        journal: Arc<MemoryJournal>,
        failing: &[&str],
    ) -> Harness {
        let mut backend = MockBackend::new(store.clone());
        for capability in failing {
            backend = backend.failing_on(capability);
        }
        let executed = backend.executed.clone();
        let sink = Arc::new(MemoryReceiptSink::new());
        let governor = Governor::builder(Arc::new(backend))
            .config(config)
            .document(document)
            .state_store(store.clone())
            .receipt_sink(sink.clone())
            .journal(journal)
            .build()
            .unwrap();
        Harness {
            governor: Arc::new(governor),
            sink,
            store,
            executed,
        }
    }

    fn write_intent(target: &str, content: &str) -> ActionIntent {
        ActionIntent::new("fs.write", "agent-1")
            .with_target(target)
            .with_arguments(serde_json::json!({ "content": content }))
    }

    async fn wait_idle(governor: &Governor) {
        for _ in 0..300 {
            if governor.queue().pending() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("verification queue never went idle");
    }

    fn seed(store: &MemoryStateStore, target: &str, content: &[u8]) {
        store.write(target, content).unwrap();
    }

    // ── Classifier ─────────────────────────────────────────────

    mod classifier {
        use vigil_config::GovernanceDocument;
        use vigil_core::{ActionIntent, GovernanceVersion, RiskTier, ScopeBucket};
        use vigil_governance::{Governance, TrustGrants, classify, scope_bucket};

        fn compile(document: GovernanceDocument) -> Governance {
            Governance::compile(document, GovernanceVersion(1)).unwrap().0
        }

        fn baseline() -> Governance {
            compile(GovernanceDocument::baseline())
        }

        #[test]
        fn test_declared_capability_uses_default_tier() {
            let gov = baseline();
            let intent = ActionIntent::new("fs.read", "agent").with_target("/workspace/a.txt");
            let c = classify(&intent, &gov, &TrustGrants::empty()).unwrap();
            assert_eq!(c.tier, RiskTier::Inert);
            assert_eq!(c.bucket, ScopeBucket::InsideBoundary);
            assert!(c.known);
            assert!(!c.requires_approval);
            assert_eq!(c.governance_version, GovernanceVersion(1));
        }

        #[test]
        fn test_unknown_capability_fails_safe() {
            let gov = baseline();
            let intent = ActionIntent::new("db.drop_table", "agent");
            let c = classify(&intent, &gov, &TrustGrants::empty()).unwrap();
            assert_eq!(c.tier, RiskTier::Irreversible);
            assert!(!c.known);
            assert!(c.requires_approval);
            assert!(!c.is_cacheable());
            assert!(c.rationale().contains("unknown capability"));
        }

        #[test]
        fn test_write_outside_boundary_escalates() {
            let gov = baseline();
            let inside = write("/workspace/notes.txt");
            let outside = write("/etc/passwd");
            let inside = classify(&inside, &gov, &TrustGrants::empty()).unwrap();
            let outside = classify(&outside, &gov, &TrustGrants::empty()).unwrap();
            assert_eq!(inside.tier, RiskTier::Reversible);
            assert_eq!(outside.tier, RiskTier::Irreversible);
            assert_eq!(outside.bucket, ScopeBucket::OutsideBoundary);
            assert!(outside.requires_approval);
        }

        fn write(target: &str) -> ActionIntent {
            ActionIntent::new("fs.write", "agent").with_target(target)
        }

        #[test]
        fn test_parent_segments_cannot_escape_boundary() {
            let gov = baseline();
            let c =
                classify(&write("/workspace/../etc/shadow"), &gov, &TrustGrants::empty()).unwrap();
            assert_eq!(c.bucket, ScopeBucket::OutsideBoundary);
            assert_eq!(c.tier, RiskTier::Irreversible);

            let c =
                classify(&write("/workspace/sub/../ok.txt"), &gov, &TrustGrants::empty()).unwrap();
            assert_eq!(c.bucket, ScopeBucket::InsideBoundary);
        }

        #[test]
        fn test_relative_target_is_outside() {
            let doc = GovernanceDocument::baseline();
            assert_eq!(scope_bucket(Some("notes.txt"), &doc), ScopeBucket::OutsideBoundary);
            assert_eq!(scope_bucket(None, &doc), ScopeBucket::Unscoped);
            assert_eq!(
                scope_bucket(Some("/workspacefoo/a"), &doc),
                ScopeBucket::OutsideBoundary
            );
        }

        #[test]
        fn test_pattern_hint_escalates() {
            let gov = baseline();
            let benign = ActionIntent::new("shell.exec", "agent").with_hint("ls -la");
            let wipe = ActionIntent::new("shell.exec", "agent").with_hint("rm -rf /tmp/build");
            let benign = classify(&benign, &gov, &TrustGrants::empty()).unwrap();
            let wipe = classify(&wipe, &gov, &TrustGrants::empty()).unwrap();
            assert_eq!(benign.tier, RiskTier::Controlled);
            assert_eq!(wipe.tier, RiskTier::Irreversible);
            assert!(wipe.rationale().contains("pattern"));
        }

        #[test]
        fn test_sensitive_path_pattern_applies_to_target() {
            let gov = baseline();
            let intent =
                ActionIntent::new("fs.read", "agent").with_target("/workspace/.ssh/id_ed25519");
            let c = classify(&intent, &gov, &TrustGrants::empty()).unwrap();
            assert_eq!(c.tier, RiskTier::Irreversible);
            assert!(c.requires_approval);
        }

        #[test]
        fn test_floor_raises_tier() {
            let mut doc = GovernanceDocument::baseline();
            doc.capabilities.get_mut("net.get").unwrap().floor = Some(RiskTier::Reversible);
            let gov = compile(doc);
            let c = classify(&ActionIntent::new("net.get", "agent"), &gov, &TrustGrants::empty())
                .unwrap();
            assert_eq!(c.tier, RiskTier::Reversible);
            assert!(c.rationale().contains("floor"));
        }

        #[test]
        fn test_trust_grant_lowers_no_further_than_ceiling() {
            let gov = baseline();
            let grants: TrustGrants = [
                ("fs.write".to_string(), RiskTier::Inert),
                ("shell.exec".to_string(), RiskTier::Inert),
            ]
            .into_iter()
            .collect();

            let c = classify(&write("/workspace/a.txt"), &gov, &grants).unwrap();
            assert_eq!(c.tier, RiskTier::Inert);

            let shell = ActionIntent::new("shell.exec", "agent").with_hint("cargo fmt");
            let c = classify(&shell, &gov, &grants).unwrap();
            assert_eq!(c.tier, RiskTier::Reversible);
        }

        #[test]
        fn test_trust_never_lowers_an_escalated_tier() {
            let gov = baseline();
            let grants: TrustGrants = [("fs.write".to_string(), RiskTier::Inert)]
                .into_iter()
                .collect();
            let c = classify(&write("/etc/hosts"), &gov, &grants).unwrap();
            assert_eq!(c.tier, RiskTier::Irreversible);
        }

        #[test]
        fn test_trust_penalty_raises_tier() {
            let gov = baseline();
            let grants: TrustGrants = [("fs.read".to_string(), RiskTier::Reversible)]
                .into_iter()
                .collect();
            let intent = ActionIntent::new("fs.read", "agent").with_target("/workspace/a");
            let c = classify(&intent, &gov, &grants).unwrap();
            assert_eq!(c.tier, RiskTier::Reversible);
        }

        #[test]
        fn test_malformed_intent_is_rejected() {
            let gov = baseline();
            let none = TrustGrants::empty();
            assert!(classify(&ActionIntent::new("FS.Write", "agent"), &gov, &none).is_err());
            assert!(classify(&ActionIntent::new("fs..read", "agent"), &gov, &none).is_err());
            assert!(classify(&ActionIntent::new("fs.read", " "), &gov, &none).is_err());
        }

        #[test]
        fn test_deny_rule_disallows() {
            let mut doc = GovernanceDocument::baseline();
            doc.deny = vec!["net.*".into()];
            let gov = compile(doc);
            let c = classify(&ActionIntent::new("net.get", "agent"), &gov, &TrustGrants::empty())
                .unwrap();
            assert!(c.denied);
            let decision = c.decision(false);
            assert!(!decision.allowed);
            assert!(decision.rationale.contains("denied by governance"));
        }

        #[test]
        fn test_classification_is_deterministic() {
            let gov = baseline();
            let intent = ActionIntent::new("shell.exec", "agent").with_hint("rm -r target");
            let first = classify(&intent, &gov, &TrustGrants::empty()).unwrap();
            let second = classify(&intent, &gov, &TrustGrants::empty()).unwrap();
            assert_eq!(first, second);
        }
    }

    // ── Governance documents ───────────────────────────────────

    mod governance {
        use std::path::PathBuf;
        use vigil_config::{GovernanceDocument, PatternRule};
        use vigil_core::{EventBus, GovernanceVersion, RiskTier, VigilError};
        use vigil_governance::{Governance, GovernanceRegistry, validate_constitution};

        fn rule_of(err: VigilError) -> String {
            match err {
                VigilError::ConstitutionValidation { rule, .. } => rule,
                other => panic!("expected a constitution violation, got {other}"),
            }
        }

        #[test]
        fn test_baseline_is_valid() {
            let findings = validate_constitution(&GovernanceDocument::baseline()).unwrap();
            assert!(findings.is_empty());
        }

        #[test]
        fn test_empty_document_rejected() {
            let err = validate_constitution(&GovernanceDocument::default()).unwrap_err();
            assert_eq!(rule_of(err), "capabilities_declared");
        }

        #[test]
        fn test_destructive_must_resolve_to_t3() {
            let mut doc = GovernanceDocument::baseline();
            doc.capabilities.get_mut("fs.delete").unwrap().tier = RiskTier::Controlled;
            let err = validate_constitution(&doc).unwrap_err();
            assert_eq!(rule_of(err), "destructive_is_irreversible");

            // A T3 floor satisfies the invariant.
            doc.capabilities.get_mut("fs.delete").unwrap().floor = Some(RiskTier::Irreversible);
            assert!(validate_constitution(&doc).is_ok());
        }

        #[test]
        fn test_ceiling_above_default_rejected() {
            let mut doc = GovernanceDocument::baseline();
            doc.capabilities.get_mut("fs.read").unwrap().ceiling = Some(RiskTier::Controlled);
            assert_eq!(
                rule_of(validate_constitution(&doc).unwrap_err()),
                "ceiling_not_above_default"
            );
        }

        #[test]
        fn test_relative_boundary_rejected() {
            let mut doc = GovernanceDocument::baseline();
            doc.boundaries.push(PathBuf::from("relative/dir"));
            assert_eq!(rule_of(validate_constitution(&doc).unwrap_err()), "boundaries_absolute");
        }

        #[test]
        fn test_escalation_to_t0_rejected() {
            let mut doc = GovernanceDocument::baseline();
            doc.pattern_rules.push(PatternRule {
                capabilities: vec!["net.*".into()],
                pattern: "localhost".into(),
                escalate_to: RiskTier::Inert,
            });
            assert_eq!(rule_of(validate_constitution(&doc).unwrap_err()), "escalation_raises");
        }

        #[test]
        fn test_invalid_pattern_fails_compile() {
            let mut doc = GovernanceDocument::baseline();
            doc.pattern_rules.push(PatternRule {
                capabilities: vec!["shell.exec".into()],
                pattern: "(unclosed".into(),
                escalate_to: RiskTier::Irreversible,
            });
            let err = Governance::compile(doc, GovernanceVersion(1)).unwrap_err();
            assert_eq!(rule_of(err), "patterns_compile");
        }

        #[test]
        fn test_ineffective_floor_is_a_finding() {
            let mut doc = GovernanceDocument::baseline();
            doc.capabilities.get_mut("shell.exec").unwrap().floor = Some(RiskTier::Inert);
            let findings = validate_constitution(&doc).unwrap();
            assert_eq!(findings.len(), 1);
            assert!(findings[0].contains("shell.exec"));
        }

        #[test]
        fn test_registry_versions_increase() {
            let registry = GovernanceRegistry::new(
                GovernanceDocument::baseline(),
                GovernanceVersion::default(),
                EventBus::default(),
            )
            .unwrap();
            assert_eq!(registry.version(), GovernanceVersion(1));

            let mut doc = GovernanceDocument::baseline();
            doc.label = "second".into();
            let active = registry.activate(doc).unwrap();
            assert_eq!(active.version(), GovernanceVersion(2));
            assert_eq!(registry.current().document().label, "second");
        }

        #[test]
        fn test_rejected_document_keeps_previous_version() {
            let registry = GovernanceRegistry::new(
                GovernanceDocument::baseline(),
                GovernanceVersion::default(),
                EventBus::default(),
            )
            .unwrap();

            assert!(registry.activate(GovernanceDocument::default()).is_err());
            assert_eq!(registry.version(), GovernanceVersion(1));
            assert_eq!(registry.current().document().label, "baseline");
        }

        #[test]
        fn test_registry_resumes_after_previous_version() {
            let registry = GovernanceRegistry::new(
                GovernanceDocument::baseline(),
                GovernanceVersion(7),
                EventBus::default(),
            )
            .unwrap();
            assert_eq!(registry.version(), GovernanceVersion(8));
        }
    }

    // ── Policy cache ───────────────────────────────────────────

    mod cache {
        use vigil_config::GovernanceDocument;
        use vigil_core::{GovernanceVersion, RiskTier, ScopeBucket};
        use vigil_governance::{CacheLookup, Governance, PolicyCache, TrustGrants};

        fn built() -> PolicyCache {
            let gov = Governance::compile(GovernanceDocument::baseline(), GovernanceVersion(1))
                .unwrap()
                .0;
            let cache = PolicyCache::new();
            cache.rebuild(&gov, &TrustGrants::empty());
            cache
        }

        #[test]
        fn test_empty_cache_misses() {
            let cache = PolicyCache::new();
            assert!(cache.is_empty());
            assert_eq!(
                cache.lookup("fs.read", ScopeBucket::Unscoped, GovernanceVersion(1)),
                CacheLookup::Miss
            );
        }

        #[test]
        fn test_rebuild_caches_only_low_tiers() {
            let cache = built();
            // fs.read, fs.list, net.get in every bucket; fs.write only inside or unscoped.
            assert_eq!(cache.len(), 11);
            assert_eq!(cache.version(), GovernanceVersion(1));

            match cache.lookup("fs.write", ScopeBucket::InsideBoundary, GovernanceVersion(1)) {
                CacheLookup::Hit(decision) => {
                    assert_eq!(decision.tier, RiskTier::Reversible);
                    assert!(decision.cache_hit);
                    assert!(decision.allowed);
                }
                CacheLookup::Miss => panic!("expected a hit"),
            }
            assert_eq!(
                cache.lookup("fs.write", ScopeBucket::OutsideBoundary, GovernanceVersion(1)),
                CacheLookup::Miss
            );
            assert_eq!(
                cache.lookup("shell.exec", ScopeBucket::Unscoped, GovernanceVersion(1)),
                CacheLookup::Miss
            );
            assert_eq!(
                cache.lookup("fs.delete", ScopeBucket::InsideBoundary, GovernanceVersion(1)),
                CacheLookup::Miss
            );
        }

        #[test]
        fn test_other_version_never_served() {
            let cache = built();
            assert_eq!(
                cache.lookup("fs.read", ScopeBucket::Unscoped, GovernanceVersion(2)),
                CacheLookup::Miss
            );
        }

        #[test]
        fn test_stats_track_hits_and_misses() {
            let cache = built();
            cache.lookup("fs.read", ScopeBucket::Unscoped, GovernanceVersion(1));
            cache.lookup("fs.read", ScopeBucket::Unscoped, GovernanceVersion(1));
            cache.lookup("shell.exec", ScopeBucket::Unscoped, GovernanceVersion(1));
            assert_eq!(cache.stats(), (2, 1));

            cache.note_rejected_hit();
            assert_eq!(cache.stats(), (1, 2));
        }

        #[test]
        fn test_stale_rebuild_is_discarded() {
            let cache = PolicyCache::new();
            let v1 = Governance::compile(GovernanceDocument::baseline(), GovernanceVersion(1))
                .unwrap()
                .0;
            let mut doc = GovernanceDocument::baseline();
            doc.capabilities.remove("net.get");
            let v2 = Governance::compile(doc, GovernanceVersion(2)).unwrap().0;

            assert_eq!(cache.rebuild(&v2, &TrustGrants::empty()), 8);
            cache.rebuild(&v1, &TrustGrants::empty());
            assert_eq!(cache.version(), GovernanceVersion(2));
            assert_eq!(cache.len(), 8);
        }
    }

    // ── Rollback manager ───────────────────────────────────────

    mod rollback {
        use std::sync::Arc;
        use uuid::Uuid;
        use vigil_core::{EventBus, SnapshotDisposition, StateStore, VigilError};
        use vigil_governance::{MemoryJournal, MemoryStateStore, RollbackManager, RollbackOutcome};

        fn manager(store: &Arc<MemoryStateStore>, max_snapshots: usize) -> RollbackManager {
            RollbackManager::new(store.clone(), max_snapshots, EventBus::default())
        }

        struct UnreadableStore;

        impl StateStore for UnreadableStore {
            fn read(&self, _target: &str) -> vigil_core::Result<Option<Vec<u8>>> {
                Err(VigilError::Store("permission denied".into()))
            }
            fn write(&self, _target: &str, _content: &[u8]) -> vigil_core::Result<()> {
                Ok(())
            }
            fn remove(&self, _target: &str) -> vigil_core::Result<()> {
                Ok(())
            }
        }

        #[test]
        fn test_rollback_restores_prior_content() {
            let store = Arc::new(MemoryStateStore::new());
            store.write("/workspace/a.txt", b"original").unwrap();
            let rb = manager(&store, 16);

            let id = Uuid::new_v4();
            rb.snapshot(id, "/workspace/a.txt").unwrap();
            store.write("/workspace/a.txt", b"changed").unwrap();

            assert_eq!(rb.rollback(id).unwrap(), RollbackOutcome::Restored);
            assert_eq!(store.get("/workspace/a.txt").unwrap(), b"original".to_vec());
            assert!(!rb.is_live(id));
        }

        #[test]
        fn test_rollback_removes_created_target() {
            let store = Arc::new(MemoryStateStore::new());
            let rb = manager(&store, 16);

            let id = Uuid::new_v4();
            rb.snapshot(id, "/workspace/new.txt").unwrap();
            store.write("/workspace/new.txt", b"created").unwrap();

            assert_eq!(rb.rollback(id).unwrap(), RollbackOutcome::Removed);
            assert!(!store.contains("/workspace/new.txt"));
        }

        #[test]
        fn test_second_rollback_is_a_noop() {
            let store = Arc::new(MemoryStateStore::new());
            store.write("/workspace/a.txt", b"v1").unwrap();
            let rb = manager(&store, 16);

            let id = Uuid::new_v4();
            rb.snapshot(id, "/workspace/a.txt").unwrap();
            store.write("/workspace/a.txt", b"v2").unwrap();
            rb.rollback(id).unwrap();
            store.write("/workspace/a.txt", b"v3").unwrap();

            assert_eq!(rb.rollback(id).unwrap(), RollbackOutcome::AlreadyRolledBack);
            assert_eq!(store.get("/workspace/a.txt").unwrap(), b"v3".to_vec());
        }

        #[test]
        fn test_released_snapshot_cannot_roll_back() {
            let store = Arc::new(MemoryStateStore::new());
            let rb = manager(&store, 16);
            let id = Uuid::new_v4();
            rb.snapshot(id, "/workspace/a.txt").unwrap();

            assert!(rb.release(id));
            assert!(!rb.release(id));
            assert!(matches!(rb.rollback(id), Err(VigilError::RollbackFailed { .. })));
        }

        #[test]
        fn test_retention_evicts_oldest_live_snapshot() {
            let store = Arc::new(MemoryStateStore::new());
            let journal = Arc::new(MemoryJournal::new());
            let rb = manager(&store, 2).with_journal(journal.clone());

            let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
            for (i, id) in ids.iter().enumerate() {
                rb.snapshot(*id, &format!("/workspace/{i}.txt")).unwrap();
            }

            assert_eq!(rb.live_count(), 2);
            assert!(!rb.is_live(ids[0]));
            assert!(rb.is_live(ids[2]));
            assert!(matches!(rb.rollback(ids[0]), Err(VigilError::RollbackFailed { .. })));
            assert_eq!(journal.snapshot_disposition(ids[0]), Some(SnapshotDisposition::Evicted));
        }

        #[test]
        fn test_unknown_action() {
            let store = Arc::new(MemoryStateStore::new());
            let rb = manager(&store, 4);
            let id = Uuid::new_v4();
            assert!(matches!(rb.rollback(id), Err(VigilError::UnknownAction(a)) if a == id));
        }

        #[test]
        fn test_duplicate_snapshot_rejected() {
            let store = Arc::new(MemoryStateStore::new());
            let rb = manager(&store, 4);
            let id = Uuid::new_v4();
            rb.snapshot(id, "/workspace/a").unwrap();
            assert!(matches!(
                rb.snapshot(id, "/workspace/a"),
                Err(VigilError::SnapshotFailure { .. })
            ));
        }

        #[test]
        fn test_unreadable_target_fails_snapshot() {
            let rb = RollbackManager::new(Arc::new(UnreadableStore), 4, EventBus::default());
            let id = Uuid::new_v4();
            assert!(matches!(
                rb.snapshot(id, "/workspace/a"),
                Err(VigilError::SnapshotFailure { .. })
            ));
            assert!(!rb.has_snapshot(id));
        }

        #[test]
        fn test_concurrent_rollbacks_restore_once() {
            let store = Arc::new(MemoryStateStore::new());
            store.write("/workspace/a.txt", b"original").unwrap();
            let rb = manager(&store, 16);
            let id = Uuid::new_v4();
            rb.snapshot(id, "/workspace/a.txt").unwrap();
            store.write("/workspace/a.txt", b"changed").unwrap();

            let outcomes: Vec<RollbackOutcome> = std::thread::scope(|s| {
                let handles: Vec<_> =
                    (0..8).map(|_| s.spawn(|| rb.rollback(id).unwrap())).collect();
                handles.into_iter().map(|h| h.join().unwrap()).collect()
            });

            let restored = outcomes
                .iter()
                .filter(|o| **o == RollbackOutcome::Restored)
                .count();
            assert_eq!(restored, 1);
            assert_eq!(store.get("/workspace/a.txt").unwrap(), b"original".to_vec());
        }

        #[test]
        fn test_journal_tracks_settlement() {
            use vigil_core::GovernanceJournal;

            let store = Arc::new(MemoryStateStore::new());
            let journal = Arc::new(MemoryJournal::new());
            let rb = manager(&store, 16).with_journal(journal.clone());

            let id = Uuid::new_v4();
            rb.snapshot(id, "/workspace/a.txt").unwrap();
            assert_eq!(journal.unsettled_snapshots().unwrap().len(), 1);

            rb.rollback(id).unwrap();
            assert!(journal.unsettled_snapshots().unwrap().is_empty());
            assert_eq!(journal.snapshot_disposition(id), Some(SnapshotDisposition::RolledBack));
        }
    }

    // ── Verification queue ─────────────────────────────────────

    mod queue {
        use parking_lot::Mutex;
        use std::sync::Arc;
        use std::time::Duration;
        use uuid::Uuid;
        use vigil_config::schema::VerificationConfig;
        use vigil_core::{
            ActionIntent, ActionOutcome, EventBus, GovernanceVersion, PolicyDecision, RiskTier,
            StateStore, TaskRecord, TaskStatus, VigilError,
        };
        use vigil_governance::{
            MemoryStateStore, MockVerifier, RollbackManager, RollbackOutcome, VerificationHook,
            VerificationQueue, VerificationReport, VerificationTask,
        };

        #[derive(Default)]
        struct CollectingHook {
            reports: Mutex<Vec<VerificationReport>>,
        }

        impl VerificationHook for CollectingHook {
            fn on_terminal(&self, report: &VerificationReport) {
                self.reports.lock().push(report.clone());
            }
        }

        struct Fixture {
            queue: VerificationQueue,
            rollback: Arc<RollbackManager>,
            store: Arc<MemoryStateStore>,
            hook: Arc<CollectingHook>,
        }

        fn fixture(config: VerificationConfig) -> Fixture {
            let store = Arc::new(MemoryStateStore::new());
            let rollback = Arc::new(RollbackManager::new(store.clone(), 64, EventBus::default()));
            let hook = Arc::new(CollectingHook::default());
            let queue = VerificationQueue::start(
                &config,
                rollback.clone(),
                hook.clone(),
                None,
                EventBus::default(),
            );
            Fixture {
                queue,
                rollback,
                store,
                hook,
            }
        }

        fn config() -> VerificationConfig {
            VerificationConfig {
                workers: 2,
                max_queue_depth: 16,
                task_timeout_secs: 2,
                drain_timeout_secs: 5,
            }
        }

        fn record(target: &str, tier: RiskTier) -> TaskRecord {
            TaskRecord {
                action_id: Uuid::new_v4(),
                tier,
                intent: ActionIntent::new("fs.write", "agent").with_target(target),
                decision: PolicyDecision {
                    tier,
                    allowed: true,
                    rationale: "default".into(),
                    cache_hit: false,
                    governance_version: GovernanceVersion(1),
                },
                expected_outcome: ActionOutcome::new("written"),
                status: TaskStatus::Pending,
                enqueued_at: chrono::Utc::now(),
            }
        }

        /// Snapshot `target` (holding `before`), then overwrite it with `after`.
        fn mutate(f: &Fixture, target: &str, before: &[u8], after: &[u8]) -> TaskRecord {
            f.store.write(target, before).unwrap();
            let record = record(target, RiskTier::Reversible);
            f.rollback.snapshot(record.action_id, target).unwrap();
            f.store.write(target, after).unwrap();
            record
        }

        const DRAIN: Duration = Duration::from_secs(5);

        #[tokio::test]
        async fn test_passed_task_releases_snapshot() {
            let f = fixture(config());
            let record = mutate(&f, "/workspace/a.txt", b"v1", b"v2");
            let id = record.action_id;

            let handle = f.queue.enqueue(VerificationTask::new(record, MockVerifier::pass())).await;
            assert!(!handle.is_inline());

            assert!(f.queue.drain(DRAIN).await.unwrap().is_empty());
            assert!(!f.rollback.is_live(id));
            assert_eq!(f.store.get("/workspace/a.txt").unwrap(), b"v2".to_vec());

            let reports = f.hook.reports.lock();
            assert_eq!(reports.len(), 1);
            assert_eq!(reports[0].status, TaskStatus::Passed);
        }

        #[tokio::test]
        async fn test_failed_task_rolls_back_and_drain_reports_it() {
            let f = fixture(config());
            let record = mutate(&f, "/workspace/a.txt", b"v1", b"v2");
            let id = record.action_id;

            f.queue.enqueue(VerificationTask::new(record, MockVerifier::reject())).await;
            let failures = f.queue.drain(DRAIN).await.unwrap();
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].action_id, id);
            assert_eq!(f.store.get("/workspace/a.txt").unwrap(), b"v1".to_vec());
            assert_eq!(
                f.hook.reports.lock()[0].rollback,
                Some(RollbackOutcome::Restored)
            );

            // Reported once.
            assert!(f.queue.drain(DRAIN).await.unwrap().is_empty());
        }

        #[tokio::test]
        async fn test_verification_timeout_fails_task() {
            let mut cfg = config();
            cfg.task_timeout_secs = 1;
            let f = fixture(cfg);
            let record = mutate(&f, "/workspace/slow.txt", b"before", b"after");

            f.queue.enqueue(VerificationTask::new(record, MockVerifier::hang())).await;
            let failures = f.queue.drain(DRAIN).await.unwrap();
            assert_eq!(failures.len(), 1);
            assert!(failures[0].reason.contains("timed out"));
            assert_eq!(f.store.get("/workspace/slow.txt").unwrap(), b"before".to_vec());
        }

        #[tokio::test]
        async fn test_saturated_queue_verifies_inline() {
            let mut cfg = config();
            cfg.max_queue_depth = 0;
            let f = fixture(cfg);
            let record = mutate(&f, "/workspace/a.txt", b"v1", b"v2");

            let handle = f
                .queue
                .enqueue(VerificationTask::new(record, MockVerifier::reject()))
                .await;
            let report = handle.report.expect("inline verification");
            assert_eq!(report.status, TaskStatus::Failed);
            assert_eq!(f.queue.pending(), 0);
            // Inline failures go to the caller, not to the next drain.
            assert!(f.queue.drain(DRAIN).await.unwrap().is_empty());
        }

        #[tokio::test]
        async fn test_verify_now_is_not_counted() {
            let f = fixture(config());
            let record = mutate(&f, "/workspace/c.txt", b"v1", b"v2");
            let mut controlled = record;
            controlled.tier = RiskTier::Controlled;

            let report = f
                .queue
                .verify_now(VerificationTask::new(controlled, MockVerifier::reject()))
                .await
                .unwrap();
            assert_eq!(report.status, TaskStatus::Failed);
            assert_eq!(report.rollback, Some(RollbackOutcome::Restored));
            assert_eq!(f.queue.pending(), 0);
            assert!(f.queue.drain(DRAIN).await.unwrap().is_empty());
        }

        #[tokio::test]
        async fn test_cancel_pending_task() {
            let mut cfg = config();
            cfg.workers = 1;
            let f = fixture(cfg);
            let (gated, release) = MockVerifier::gated();

            let first = record("/workspace/first.txt", RiskTier::Reversible);
            let first_id = first.action_id;
            f.queue.enqueue(VerificationTask::new(first, gated)).await;

            let second = mutate(&f, "/workspace/second.txt", b"before", b"after");
            let second_id = second.action_id;
            f.queue.enqueue(VerificationTask::new(second, MockVerifier::pass())).await;

            tokio::time::sleep(Duration::from_millis(50)).await;
            assert_eq!(f.queue.status(first_id), Some(TaskStatus::Running));
            assert!(!f.queue.cancel(first_id));
            assert!(f.queue.cancel(second_id));
            assert!(!f.queue.cancel(second_id));
            assert_eq!(f.store.get("/workspace/second.txt").unwrap(), b"before".to_vec());

            release.notify_one();
            assert!(f.queue.drain(DRAIN).await.unwrap().is_empty());

            let reports = f.hook.reports.lock();
            assert_eq!(reports.len(), 2);
            let cancelled = reports.iter().find(|r| r.action_id() == second_id).unwrap();
            assert_eq!(cancelled.status, TaskStatus::Cancelled);
        }

        #[tokio::test]
        async fn test_drain_times_out_while_work_is_pending() {
            let mut cfg = config();
            cfg.task_timeout_secs = 30;
            let f = fixture(cfg);
            let task = record("/workspace/a.txt", RiskTier::Inert);
            f.queue.enqueue(VerificationTask::new(task, MockVerifier::hang())).await;

            let err = f.queue.drain(Duration::from_millis(200)).await.unwrap_err();
            assert!(matches!(err, VigilError::BoundaryCrossingRefused { .. }));
            assert_eq!(f.queue.pending(), 1);
            f.queue.shutdown(Duration::from_millis(50)).await;
        }

        #[tokio::test]
        async fn test_reserved_work_holds_the_drain() {
            let mut cfg = config();
            cfg.max_queue_depth = 1;
            let f = fixture(cfg);

            let reserved = f.queue.reserve();
            assert_eq!(f.queue.pending(), 1);
            let err = f.queue.drain(Duration::from_millis(100)).await.unwrap_err();
            assert!(matches!(err, VigilError::BoundaryCrossingRefused { .. }));

            // A reservation does not make the queue look saturated.
            let task = record("/workspace/a.txt", RiskTier::Inert);
            let handle = f
                .queue
                .enqueue(VerificationTask::new(task, MockVerifier::pass()))
                .await;
            assert!(!handle.is_inline());

            drop(reserved);
            assert!(f.queue.drain(DRAIN).await.unwrap().is_empty());
            assert_eq!(f.queue.pending(), 0);
        }
    }

    // ── Receipt buffer ─────────────────────────────────────────

    mod receipts {
        use std::sync::Arc;
        use std::time::Duration;
        use uuid::Uuid;
        use vigil_core::{
            BatchArtifact, EventBus, GovernanceVersion, PolicyDecision, Receipt, ReceiptOutcome,
            ReceiptSink, RiskTier, VigilError,
        };
        use vigil_governance::{MemoryReceiptSink, ReceiptBuffer};

        fn receipt(tier: RiskTier) -> Receipt {
            let decision = PolicyDecision {
                tier,
                allowed: true,
                rationale: "default".into(),
                cache_hit: false,
                governance_version: GovernanceVersion(1),
            };
            Receipt::seal(Uuid::new_v4(), "fs.read", "agent", decision, ReceiptOutcome::Verified, 3)
                .unwrap()
        }

        struct BrokenSink;

        impl ReceiptSink for BrokenSink {
            fn append_receipt(&self, _receipt: &Receipt) -> vigil_core::Result<()> {
                Err(VigilError::Store("disk full".into()))
            }
            fn append_batch(&self, _batch: &BatchArtifact) -> vigil_core::Result<()> {
                Err(VigilError::Store("disk full".into()))
            }
        }

        #[test]
        fn test_low_tiers_are_buffered() {
            let sink = Arc::new(MemoryReceiptSink::new());
            let buffer = ReceiptBuffer::new(sink.clone(), 10, EventBus::default());
            buffer.emit(receipt(RiskTier::Inert)).unwrap();
            buffer.emit(receipt(RiskTier::Reversible)).unwrap();
            assert_eq!(buffer.len(), 2);
            assert!(sink.all().is_empty());
        }

        #[test]
        fn test_high_tiers_are_written_individually() {
            let sink = Arc::new(MemoryReceiptSink::new());
            let buffer = ReceiptBuffer::new(sink.clone(), 10, EventBus::default());
            buffer.emit(receipt(RiskTier::Controlled)).unwrap();
            buffer.emit(receipt(RiskTier::Irreversible)).unwrap();
            assert!(buffer.is_empty());
            assert_eq!(sink.receipts().len(), 2);
            assert!(sink.batches().is_empty());
        }

        #[test]
        fn test_flush_writes_one_batch() {
            let sink = Arc::new(MemoryReceiptSink::new());
            let buffer = ReceiptBuffer::new(sink.clone(), 10, EventBus::default());
            for _ in 0..3 {
                buffer.emit(receipt(RiskTier::Reversible)).unwrap();
            }

            let batch = buffer.flush().unwrap().unwrap();
            assert_eq!(batch.len(), 3);
            assert!(batch.verify_integrity());
            assert!(buffer.is_empty());
            assert_eq!(sink.batches().len(), 1);
            assert!(buffer.flush().unwrap().is_none());
        }

        #[test]
        fn test_full_buffer_flushes_itself() {
            let sink = Arc::new(MemoryReceiptSink::new());
            let buffer = ReceiptBuffer::new(sink.clone(), 2, EventBus::default());
            buffer.emit(receipt(RiskTier::Inert)).unwrap();
            assert!(sink.batches().is_empty());
            buffer.emit(receipt(RiskTier::Inert)).unwrap();
            assert_eq!(sink.batches().len(), 1);
            assert!(buffer.is_empty());
        }

        #[test]
        fn test_failed_flush_keeps_receipts_buffered() {
            let buffer = ReceiptBuffer::new(Arc::new(BrokenSink), 10, EventBus::default());
            buffer.emit(receipt(RiskTier::Inert)).unwrap();
            buffer.emit(receipt(RiskTier::Inert)).unwrap();
            assert!(buffer.flush().is_err());
            assert_eq!(buffer.len(), 2);
        }

        #[tokio::test]
        async fn test_flusher_flushes_on_shutdown() {
            let sink = Arc::new(MemoryReceiptSink::new());
            let buffer = Arc::new(ReceiptBuffer::new(sink.clone(), 10, EventBus::default()));
            let (tx, rx) = tokio::sync::watch::channel(false);
            let handle = buffer.clone().spawn_flusher(Duration::from_secs(3600), rx);

            buffer.emit(receipt(RiskTier::Inert)).unwrap();
            tx.send(true).unwrap();
            handle.await.unwrap();

            assert_eq!(sink.batches().len(), 1);
            assert!(buffer.is_empty());
        }
    }

    // ── Trust ledger ───────────────────────────────────────────

    mod trust {
        use std::sync::{Arc, Mutex, mpsc};
        use std::time::{Duration, Instant};
        use vigil_config::GovernanceDocument;
        use vigil_config::schema::TrustConfig;
        use vigil_core::{EventBus, RiskTier, TrustRecord, TrustStore, VigilError};
        use vigil_governance::TrustLedger;

        fn quick() -> TrustConfig {
            TrustConfig {
                t3_to_t2: 5,
                t2_to_t1: 3,
                t1_to_t0: 2,
                cooldown_actions: 3,
            }
        }

        fn ledger() -> TrustLedger {
            let ledger = TrustLedger::new(quick(), EventBus::default());
            ledger.sync_with(&GovernanceDocument::baseline());
            ledger
        }

        #[test]
        fn test_proposal_at_threshold() {
            let ledger = ledger();
            assert!(ledger.record_outcome("fs.write", true).is_none());
            let proposal = ledger.record_outcome("fs.write", true).unwrap();
            assert_eq!(proposal.from, RiskTier::Reversible);
            assert_eq!(proposal.to, RiskTier::Inert);
            assert_eq!(proposal.evidence, 2);

            // Pending proposals are not duplicated.
            assert!(ledger.record_outcome("fs.write", true).is_none());
            assert_eq!(ledger.propose_graduation("fs.write").unwrap().id, proposal.id);
        }

        #[test]
        fn test_authorization_applies_graduation() {
            let ledger = ledger();
            ledger.record_outcome("fs.write", true);
            ledger.record_outcome("fs.write", true);

            assert_eq!(ledger.authorize("fs.write", true).unwrap(), RiskTier::Inert);
            let record = ledger.record("fs.write").unwrap();
            assert_eq!(record.granted_tier, Some(RiskTier::Inert));
            assert!(record.pending_proposal.is_none());
            assert_eq!(ledger.grants().get("fs.write"), Some(RiskTier::Inert));
        }

        #[test]
        fn test_declined_graduation_starts_cooldown() {
            let ledger = ledger();
            ledger.record_outcome("fs.write", true);
            ledger.record_outcome("fs.write", true);

            let err = ledger.authorize("fs.write", false).unwrap_err();
            assert!(matches!(err, VigilError::GraduationRejected { .. }));
            let record = ledger.record("fs.write").unwrap();
            assert!(record.in_cooldown());
            assert!(record.granted_tier.is_none());
            assert!(ledger.authorize("fs.write", true).is_err());
        }

        #[test]
        fn test_ceiling_bounds_graduation() {
            let ledger = ledger();
            for _ in 0..2 {
                ledger.record_outcome("shell.exec", true);
            }
            let proposal = ledger.record_outcome("shell.exec", true).unwrap();
            assert_eq!(proposal.to, RiskTier::Reversible);
            ledger.authorize("shell.exec", true).unwrap();

            for _ in 0..10 {
                assert!(ledger.record_outcome("shell.exec", true).is_none());
            }
            assert!(ledger.propose_graduation("shell.exec").is_none());
        }

        #[test]
        fn test_t0_never_proposes() {
            let ledger = ledger();
            for _ in 0..20 {
                assert!(ledger.record_outcome("fs.read", true).is_none());
            }
        }

        #[test]
        fn test_failure_resets_evidence_and_cools_down() {
            let ledger = ledger();
            ledger.record_outcome("fs.write", true);
            ledger.record_outcome("fs.write", false);

            let record = ledger.record("fs.write").unwrap();
            assert_eq!(record.success_count, 0);
            assert_eq!(record.failure_count, 1);
            assert_eq!(record.cooldown_remaining(), 3);

            // Evidence accumulates during cooldown but no proposal is made.
            assert!(ledger.record_outcome("fs.write", true).is_none());
            assert!(ledger.record_outcome("fs.write", true).is_none());
            assert!(ledger.record_outcome("fs.write", true).is_some());
        }

        #[test]
        fn test_rollback_raises_one_tier() {
            let ledger = ledger();
            ledger.record_rollback("fs.write");
            let record = ledger.record("fs.write").unwrap();
            assert_eq!(record.effective_tier(), RiskTier::Controlled);
            assert_eq!(ledger.grants().get("fs.write"), Some(RiskTier::Controlled));
        }

        #[test]
        fn test_revoke_clears_grant() {
            let ledger = ledger();
            ledger.record_outcome("fs.write", true);
            ledger.record_outcome("fs.write", true);
            ledger.authorize("fs.write", true).unwrap();

            ledger.revoke("fs.write", "operator request").unwrap();
            let record = ledger.record("fs.write").unwrap();
            assert!(record.granted_tier.is_none());
            assert!(record.in_cooldown());
            assert!(ledger.grants().is_empty());
        }

        #[test]
        fn test_revoke_unknown_capability_errors() {
            let ledger = ledger();
            assert!(ledger.revoke("db.drop", "cleanup").is_err());
        }

        #[test]
        fn test_sync_clamps_grant_to_new_ceiling() {
            let ledger = ledger();
            ledger.record_outcome("fs.write", true);
            ledger.record_outcome("fs.write", true);
            ledger.authorize("fs.write", true).unwrap();

            let mut doc = GovernanceDocument::baseline();
            doc.capabilities.get_mut("fs.write").unwrap().ceiling = Some(RiskTier::Reversible);
            ledger.sync_with(&doc);

            let record = ledger.record("fs.write").unwrap();
            assert_eq!(record.tier_ceiling, RiskTier::Reversible);
            assert_eq!(record.effective_tier(), RiskTier::Reversible);
        }

        #[test]
        fn test_undeclared_capability_never_graduates() {
            let ledger = ledger();
            for _ in 0..50 {
                assert!(ledger.record_outcome("db.drop", true).is_none());
            }
            let record = ledger.record("db.drop").unwrap();
            assert_eq!(record.default_tier, RiskTier::Irreversible);
            assert_eq!(record.tier_ceiling, RiskTier::Irreversible);
        }

        #[test]
        fn test_concurrent_outcomes_are_serialized() {
            let ledger = ledger();
            std::thread::scope(|s| {
                for _ in 0..8 {
                    s.spawn(|| {
                        for _ in 0..50 {
                            ledger.record_outcome("fs.read", true);
                        }
                    });
                }
            });
            let record = ledger.record("fs.read").unwrap();
            assert_eq!(record.success_count, 400);
            assert_eq!(record.actions_observed, 400);
        }

        #[test]
        fn test_records_are_sorted() {
            let ledger = ledger();
            let names: Vec<String> = ledger.records().into_iter().map(|r| r.capability).collect();
            let mut sorted = names.clone();
            sorted.sort();
            assert_eq!(names, sorted);
            assert_eq!(names.len(), GovernanceDocument::baseline().capabilities.len());
        }

        /// Signals, then stalls, whenever `net.post` is saved.
        struct SlowStore {
            entered: Mutex<mpsc::Sender<()>>,
        }

        impl TrustStore for SlowStore {
            fn save_trust(&self, record: &TrustRecord) -> vigil_core::Result<()> {
                if record.capability == "net.post" {
                    let _ = self.entered.lock().unwrap().send(());
                    std::thread::sleep(Duration::from_millis(800));
                }
                Ok(())
            }

            fn load_trust(&self) -> vigil_core::Result<Vec<TrustRecord>> {
                Ok(vec![])
            }
        }

        #[test]
        fn test_grants_do_not_wait_on_trust_writes() {
            let (entered_tx, entered_rx) = mpsc::channel();
            let ledger = TrustLedger::new(quick(), EventBus::default())
                .with_store(Arc::new(SlowStore {
                    entered: Mutex::new(entered_tx),
                }))
                .unwrap();
            ledger.sync_with(&GovernanceDocument::baseline());
            ledger.record_outcome("fs.write", true);
            ledger.record_outcome("fs.write", true);
            ledger.authorize("fs.write", true).unwrap();

            std::thread::scope(|s| {
                s.spawn(|| ledger.record_outcome("net.post", true));
                entered_rx.recv().unwrap();

                let started = Instant::now();
                let grants = ledger.grants();
                assert!(started.elapsed() < Duration::from_millis(400));
                assert_eq!(grants.get("fs.write"), Some(RiskTier::Inert));
            });
        }

        #[test]
        fn test_published_grants_follow_penalties_and_revocations() {
            let ledger = ledger();
            ledger.record_rollback("fs.write");
            assert_eq!(ledger.grants().get("fs.write"), Some(RiskTier::Controlled));

            ledger.revoke("fs.write", "manual").unwrap();
            assert_eq!(ledger.grants().get("fs.write"), None);
            assert!(ledger.grants().is_empty());
        }
    }

    // ── Approval gate ──────────────────────────────────────────

    mod approval {
        use std::time::Duration;
        use uuid::Uuid;
        use vigil_core::{ActionIntent, EventBus, GovernanceVersion, PolicyDecision, RiskTier};
        use vigil_governance::{ApprovalGate, ApprovalResponse};

        fn decision() -> PolicyDecision {
            PolicyDecision {
                tier: RiskTier::Irreversible,
                allowed: true,
                rationale: "default T3".into(),
                cache_hit: false,
                governance_version: GovernanceVersion(1),
            }
        }

        #[tokio::test]
        async fn test_approved_request() {
            let gate = ApprovalGate::new(EventBus::default());
            let mut rx = gate.take_receiver().unwrap();
            assert!(gate.take_receiver().is_none());

            tokio::spawn(async move {
                if let Some((request, reply)) = rx.recv().await {
                    let answer = if request.capability == "fs.delete" {
                        ApprovalResponse::Approved
                    } else {
                        ApprovalResponse::Denied
                    };
                    let _ = reply.send(answer);
                }
            });

            let intent = ActionIntent::new("fs.delete", "agent").with_target("/workspace/a");
            let response = gate.request_approval(Uuid::new_v4(), &intent, &decision(), 5).await;
            assert!(response.is_approved());
        }

        #[tokio::test]
        async fn test_unanswered_request_times_out() {
            let gate = ApprovalGate::new(EventBus::default());
            let _rx = gate.take_receiver().unwrap();
            let intent = ActionIntent::new("net.post", "agent");
            let response = gate.request_approval(Uuid::new_v4(), &intent, &decision(), 1).await;
            assert_eq!(response, ApprovalResponse::TimedOut);
        }

        #[tokio::test]
        async fn test_dropped_receiver_denies() {
            let gate = ApprovalGate::new(EventBus::default());
            drop(gate.take_receiver());
            let intent = ActionIntent::new("net.post", "agent");
            let response = gate.request_approval(Uuid::new_v4(), &intent, &decision(), 5).await;
            assert_eq!(response, ApprovalResponse::Denied);
        }

        #[tokio::test]
        async fn test_undrained_receiver_times_out_instead_of_blocking() {
            let gate = ApprovalGate::new(EventBus::default());
            let _rx = gate.take_receiver().unwrap();
            let intent = ActionIntent::new("net.post", "agent");

            // More requests than the channel holds; none is ever read.
            let decision = decision();
            let requests =
                (0..65).map(|_| gate.request_approval(Uuid::new_v4(), &intent, &decision, 1));
            let responses =
                tokio::time::timeout(Duration::from_secs(5), futures::future::join_all(requests))
                    .await
                    .expect("every request resolves within its own timeout");
            assert_eq!(responses.len(), 65);
            assert!(responses.iter().all(|r| *r == ApprovalResponse::TimedOut));
        }
    }

    // ── Governor (end-to-end pipeline) ─────────────────────────

    mod governor {
        use super::*;
        use vigil_core::{GovernanceVersion, ReceiptOutcome, RiskTier, ScopeBucket, TaskStatus};
        use vigil_governance::{
            ActionRequest, ActionState, ActionStatus, ApprovalResponse, CacheLookup, MockVerifier,
            RecoveryReport,
        };

        fn read(target: &str) -> ActionIntent {
            ActionIntent::new("fs.read", "agent-1").with_target(target)
        }

        fn shell(command: &str) -> ActionIntent {
            ActionIntent::new("shell.exec", "agent-1").with_hint(command)
        }

        /// Answer every approval request with `answer`.
        fn approve_all(governor: &Governor, answer: ApprovalResponse) {
            let mut rx = governor.take_approval_receiver().unwrap();
            tokio::spawn(async move {
                while let Some((_request, reply)) = rx.recv().await {
                    let _ = reply.send(answer);
                }
            });
        }

        #[tokio::test]
        async fn test_inert_read_is_served_from_cache() {
            let h = harness(test_config());
            seed(&h.store, "/workspace/a.txt", b"hello");

            let report = h
                .governor
                .govern(ActionRequest::new(read("/workspace/a.txt"), MockVerifier::pass()))
                .await
                .unwrap();

            assert_eq!(report.decision.tier, RiskTier::Inert);
            assert!(report.decision.cache_hit);
            assert_eq!(
                &report.trail[..3],
                &[ActionState::Classified, ActionState::CacheChecked, ActionState::Decided]
            );
            assert!(!report.trail.contains(&ActionState::LiveEvaluated));
            assert!(!h.governor.rollback_manager().has_snapshot(report.action_id));

            h.governor.settle().await.unwrap();
            let receipts = h.sink.for_action(report.action_id);
            assert_eq!(receipts.len(), 1);
            assert_eq!(receipts[0].outcome, ReceiptOutcome::Verified);
            assert!(h.sink.receipts().is_empty());
            assert_eq!(h.sink.batches().len(), 1);
        }

        #[tokio::test]
        async fn test_controlled_action_waits_for_reversible_work() {
            let h = harness(test_config());
            seed(&h.store, "/workspace/notes.txt", b"v1");
            let (gated, release) = MockVerifier::gated();

            let t1 = h
                .governor
                .govern(ActionRequest::new(write_intent("/workspace/notes.txt", "v2"), gated))
                .await
                .unwrap();
            assert_eq!(t1.decision.tier, RiskTier::Reversible);
            assert_eq!(t1.status, ActionStatus::Queued);

            let governor = h.governor.clone();
            let t2 = tokio::spawn(async move {
                governor
                    .govern(ActionRequest::new(shell("ls -la"), MockVerifier::pass()))
                    .await
            });

            tokio::time::sleep(Duration::from_millis(100)).await;
            assert!(!t2.is_finished());
            assert_eq!(h.governor.queue().pending(), 1);

            release.notify_one();
            let t2 = t2.await.unwrap().unwrap();
            assert_eq!(t2.decision.tier, RiskTier::Controlled);
            assert_eq!(t2.status, ActionStatus::Verified);
            assert_eq!(
                t2.trail,
                vec![
                    ActionState::Classified,
                    ActionState::CacheChecked,
                    ActionState::BoundaryCrossed,
                    ActionState::LiveEvaluated,
                    ActionState::Decided,
                    ActionState::Executing,
                    ActionState::Verifying,
                    ActionState::Verified,
                    ActionState::Receipted,
                ]
            );

            // The T1 receipt was flushed as a batch before the T2 receipt was written.
            let batches = h.sink.batches();
            assert_eq!(batches.len(), 1);
            assert_eq!(batches[0].receipts[0].action_id, t1.action_id);
            let individual = h.sink.receipts();
            assert_eq!(individual.len(), 1);
            assert_eq!(individual[0].action_id, t2.action_id);
            assert!(batches[0].created_at <= individual[0].created_at);
        }

        #[tokio::test]
        async fn test_failed_verification_rolls_back_and_resets_trust() {
            let h = harness(test_config());
            seed(&h.store, "/workspace/config.toml", b"original");

            let report = h
                .governor
                .govern(ActionRequest::new(
                    write_intent("/workspace/config.toml", "broken"),
                    MockVerifier::reject(),
                ))
                .await
                .unwrap();
            assert_eq!(report.status, ActionStatus::Queued);

            h.governor.settle().await.unwrap();
            assert_eq!(h.store.get("/workspace/config.toml").unwrap(), b"original".to_vec());

            let receipts = h.sink.for_action(report.action_id);
            assert_eq!(receipts.len(), 1);
            assert!(matches!(receipts[0].outcome, ReceiptOutcome::RolledBack { .. }));

            let record = h.governor.ledger().record("fs.write").unwrap();
            assert_eq!(record.success_count, 0);
            assert_eq!(record.failure_count, 1);
            assert!(record.in_cooldown());
            assert_eq!(record.effective_tier(), RiskTier::Controlled);
        }

        #[tokio::test]
        async fn test_activation_invalidates_cached_decisions() {
            let h = harness(test_config());
            let v1 = h.governor.version();

            let mut doc = GovernanceDocument::baseline();
            doc.label = "tightened".into();
            doc.capabilities.get_mut("fs.write").unwrap().tier = RiskTier::Controlled;
            let v2 = h.governor.activate(doc).unwrap();

            assert!(v2 > v1);
            assert_eq!(h.governor.cache().version(), v2);
            assert_eq!(
                h.governor
                    .cache()
                    .lookup("fs.write", ScopeBucket::InsideBoundary, v2),
                CacheLookup::Miss
            );

            let report = h
                .governor
                .govern(ActionRequest::new(
                    write_intent("/workspace/a.txt", "x"),
                    MockVerifier::pass(),
                ))
                .await
                .unwrap();
            assert_eq!(report.decision.tier, RiskTier::Controlled);
            assert_eq!(report.decision.governance_version, v2);
            assert!(!report.decision.cache_hit);
            assert!(report.trail.contains(&ActionState::BoundaryCrossed));
        }

        #[tokio::test]
        async fn test_stale_cache_generation_is_not_served() {
            let h = harness(test_config());
            let before = h.governor.version();

            // Advance governance without rebuilding the cache.
            h.governor
                .registry()
                .activate(GovernanceDocument::baseline())
                .unwrap();
            let active = h.governor.version();
            assert_eq!(h.governor.cache().version(), before);

            let report = h
                .governor
                .govern(ActionRequest::new(read("/workspace/a.txt"), MockVerifier::pass()))
                .await
                .unwrap();
            assert_eq!(report.decision.tier, RiskTier::Inert);
            assert!(!report.decision.cache_hit);
            assert_eq!(report.decision.governance_version, active);
            assert!(report.trail.contains(&ActionState::LiveEvaluated));
        }

        #[tokio::test]
        async fn test_rejected_document_keeps_active_version() {
            let h = harness(test_config());
            let before = h.governor.version();
            assert!(h.governor.activate(GovernanceDocument::default()).is_err());
            assert_eq!(h.governor.version(), before);
            assert_eq!(h.governor.cache().version(), before);
        }

        #[tokio::test]
        async fn test_irreversible_action_executes_after_approval() {
            let h = harness(test_config());
            approve_all(&h.governor, ApprovalResponse::Approved);
            seed(&h.store, "/workspace/old.log", b"data");

            let intent =
                ActionIntent::new("fs.delete", "agent-1").with_target("/workspace/old.log");
            let report = h
                .governor
                .govern(ActionRequest::new(intent, MockVerifier::pass()))
                .await
                .unwrap();

            assert_eq!(report.decision.tier, RiskTier::Irreversible);
            assert_eq!(report.status, ActionStatus::Verified);
            assert!(report.trail.contains(&ActionState::ApprovalGated));
            assert!(!h.store.contains("/workspace/old.log"));
            assert_eq!(h.sink.receipts().len(), 1);
        }

        #[tokio::test]
        async fn test_denied_approval_never_executes() {
            let h = harness(test_config());
            approve_all(&h.governor, ApprovalResponse::Denied);
            seed(&h.store, "/workspace/old.log", b"data");

            let intent =
                ActionIntent::new("fs.delete", "agent-1").with_target("/workspace/old.log");
            let report = h
                .governor
                .govern(ActionRequest::new(intent, MockVerifier::pass()))
                .await
                .unwrap();

            match &report.status {
                ActionStatus::Denied { reason } => assert!(reason.contains("denied by approver")),
                other => panic!("expected denial, got {other:?}"),
            }
            assert!(h.store.contains("/workspace/old.log"));
            assert!(h.executed.lock().is_empty());
            let receipts = h.sink.for_action(report.action_id);
            assert_eq!(receipts.len(), 1);
            assert!(!receipts[0].decision.allowed);
        }

        #[tokio::test]
        async fn test_unknown_capability_times_out_to_denial() {
            let h = harness(test_config());

            let report = h
                .governor
                .govern(ActionRequest::new(
                    ActionIntent::new("db.drop_table", "agent-1"),
                    MockVerifier::pass(),
                ))
                .await
                .unwrap();

            assert_eq!(report.decision.tier, RiskTier::Irreversible);
            match &report.status {
                ActionStatus::Denied { reason } => assert!(reason.contains("approval timed out")),
                other => panic!("expected denial, got {other:?}"),
            }
            assert!(h.executed.lock().is_empty());
            assert_eq!(h.sink.receipts().len(), 1);
        }

        #[tokio::test]
        async fn test_deny_rule_blocks_execution() {
            let mut doc = GovernanceDocument::baseline();
            doc.deny = vec!["net.*".into()];
            let h = harness_with(
                test_config(),
                doc,
                Arc::new(MemoryStateStore::new()),
                Arc::new(MemoryJournal::new()),
                &[],
            );

            let report = h
                .governor
                .govern(ActionRequest::new(
                    ActionIntent::new("net.get", "agent-1"),
                    MockVerifier::pass(),
                ))
                .await
                .unwrap();
            assert!(matches!(report.status, ActionStatus::Denied { .. }));
            assert!(report.is_receipted());
            assert!(h.executed.lock().is_empty());

            h.governor.settle().await.unwrap();
            let receipts = h.sink.for_action(report.action_id);
            assert_eq!(receipts.len(), 1);
            assert!(matches!(receipts[0].outcome, ReceiptOutcome::Denied { .. }));
        }

        #[tokio::test]
        async fn test_malformed_intent_is_denied_with_receipt() {
            let h = harness(test_config());
            let report = h
                .governor
                .govern(ActionRequest::new(
                    ActionIntent::new("Not A Capability", "agent-1"),
                    MockVerifier::pass(),
                ))
                .await
                .unwrap();
            assert!(matches!(report.status, ActionStatus::Denied { .. }));
            assert_eq!(report.decision.tier, RiskTier::Irreversible);
            assert!(!report.trail.contains(&ActionState::Classified));
            assert_eq!(h.sink.for_action(report.action_id).len(), 1);
        }

        #[tokio::test]
        async fn test_execution_failure_rolls_back() {
            let h = harness_with(
                test_config(),
                GovernanceDocument::baseline(),
                Arc::new(MemoryStateStore::new()),
                Arc::new(MemoryJournal::new()),
                &["fs.write"],
            );
            seed(&h.store, "/workspace/data.json", b"v1");

            let report = h
                .governor
                .govern(ActionRequest::new(
                    write_intent("/workspace/data.json", "half-written"),
                    MockVerifier::pass(),
                ))
                .await
                .unwrap();

            match &report.status {
                ActionStatus::RolledBack { reason } => assert!(reason.contains("execution failed")),
                other => panic!("expected rollback, got {other:?}"),
            }
            assert!(report.trail.contains(&ActionState::RolledBack));
            assert_eq!(h.store.get("/workspace/data.json").unwrap(), b"v1".to_vec());

            h.governor.settle().await.unwrap();
            let receipts = h.sink.for_action(report.action_id);
            assert_eq!(receipts.len(), 1);
            assert!(matches!(receipts[0].outcome, ReceiptOutcome::RolledBack { .. }));
        }

        #[tokio::test]
        async fn test_crossing_refused_after_failed_background_verification() {
            let h = harness(test_config());
            seed(&h.store, "/workspace/a.txt", b"v1");

            h.governor
                .govern(ActionRequest::new(
                    write_intent("/workspace/a.txt", "bad"),
                    MockVerifier::reject(),
                ))
                .await
                .unwrap();
            wait_idle(&h.governor).await;

            let refused = h
                .governor
                .govern(ActionRequest::new(shell("make"), MockVerifier::pass()))
                .await
                .unwrap();
            match &refused.status {
                ActionStatus::Denied { reason } => assert!(reason.contains("failed verification")),
                other => panic!("expected refusal, got {other:?}"),
            }
            assert!(!refused.trail.contains(&ActionState::BoundaryCrossed));
            assert!(h.executed.lock().iter().all(|i| i.capability() != "shell.exec"));

            // The failure was reported once; the next crossing goes through.
            let next = h
                .governor
                .govern(ActionRequest::new(shell("make"), MockVerifier::pass()))
                .await
                .unwrap();
            assert_eq!(next.status, ActionStatus::Verified);
        }

        #[tokio::test]
        async fn test_crossing_refused_while_reversible_execution_hangs() {
            let mut config = test_config();
            config.verification.drain_timeout_secs = 1;
            let store = Arc::new(MemoryStateStore::new());
            let backend = MockBackend::new(store.clone()).hanging_on("fs.write");
            let governor = Arc::new(
                Governor::builder(Arc::new(backend))
                    .config(config)
                    .document(GovernanceDocument::baseline())
                    .state_store(store)
                    .receipt_sink(Arc::new(MemoryReceiptSink::new()))
                    .build()
                    .unwrap(),
            );

            let writer = governor.clone();
            let stuck = tokio::spawn(async move {
                writer
                    .govern(ActionRequest::new(
                        write_intent("/workspace/x", "v1"),
                        MockVerifier::pass(),
                    ))
                    .await
            });
            tokio::time::sleep(Duration::from_millis(100)).await;
            assert_eq!(governor.queue().pending(), 1);

            let refused = tokio::time::timeout(
                Duration::from_secs(5),
                governor.govern(ActionRequest::new(shell("ls"), MockVerifier::pass())),
            )
            .await
            .expect("crossing is refused within the drain timeout")
            .unwrap();
            match &refused.status {
                ActionStatus::Denied { reason } => assert!(reason.contains("pending"), "{reason}"),
                other => panic!("expected refusal, got {other:?}"),
            }

            // Low-risk work is still admitted after the refusal.
            let inert = tokio::time::timeout(
                Duration::from_secs(5),
                governor.govern(ActionRequest::new(read("/workspace/y"), MockVerifier::pass())),
            )
            .await
            .expect("low-risk work is not stalled")
            .unwrap();
            assert_eq!(inert.decision.tier, RiskTier::Inert);
            assert!(!stuck.is_finished());
            stuck.abort();
        }

        #[tokio::test]
        async fn test_low_risk_denial_is_receipted_after_the_crossing() {
            let mut doc = GovernanceDocument::baseline();
            doc.deny = vec!["net.get".into()];
            let h = harness_with(
                test_config(),
                doc,
                Arc::new(MemoryStateStore::new()),
                Arc::new(MemoryJournal::new()),
                &[],
            );
            seed(&h.store, "/workspace/notes.txt", b"v1");
            let (gated, release) = MockVerifier::gated();
            let write = h
                .governor
                .govern(ActionRequest::new(write_intent("/workspace/notes.txt", "v2"), gated))
                .await
                .unwrap();

            let governor = h.governor.clone();
            let controlled = tokio::spawn(async move {
                governor
                    .govern(ActionRequest::new(shell("ls"), MockVerifier::pass()))
                    .await
            });
            tokio::time::sleep(Duration::from_millis(100)).await;

            let governor = h.governor.clone();
            let denied = tokio::spawn(async move {
                governor
                    .govern(ActionRequest::new(
                        ActionIntent::new("net.get", "agent-1"),
                        MockVerifier::pass(),
                    ))
                    .await
            });
            tokio::time::sleep(Duration::from_millis(100)).await;

            // The crossing is draining: the denial's receipt must not reach the buffer.
            assert!(!denied.is_finished());
            assert!(h.governor.receipts().is_empty());

            release.notify_one();
            let controlled = controlled.await.unwrap().unwrap();
            assert_eq!(controlled.status, ActionStatus::Verified);
            let denied = denied.await.unwrap().unwrap();
            assert!(matches!(denied.status, ActionStatus::Denied { .. }));

            h.governor.settle().await.unwrap();
            let batches = h.sink.batches();
            assert_eq!(batches.len(), 2);
            assert_eq!(batches[0].receipts[0].action_id, write.action_id);
            assert_eq!(batches[1].receipts[0].action_id, denied.action_id);
            assert_eq!(h.sink.for_action(controlled.action_id).len(), 1);
        }

        #[tokio::test]
        async fn test_every_action_gets_exactly_one_receipt() {
            let h = harness(test_config());
            approve_all(&h.governor, ApprovalResponse::Approved);
            seed(&h.store, "/workspace/b.txt", b"b");

            let requests = vec![
                ActionRequest::new(read("/workspace/a.txt"), MockVerifier::pass()),
                ActionRequest::new(write_intent("/workspace/b.txt", "b2"), MockVerifier::pass()),
                ActionRequest::new(write_intent("/workspace/c.txt", "c"), MockVerifier::reject()),
                ActionRequest::new(shell("ls"), MockVerifier::pass()),
                ActionRequest::new(shell("ls"), MockVerifier::reject()),
                ActionRequest::new(
                    ActionIntent::new("fs.delete", "agent-1").with_target("/workspace/b.txt"),
                    MockVerifier::pass(),
                ),
                ActionRequest::new(write_intent("/etc/hosts", "x"), MockVerifier::pass()),
                ActionRequest::new(ActionIntent::new("BAD", "agent-1"), MockVerifier::pass()),
                ActionRequest::new(ActionIntent::new("net.get", "agent-1"), MockVerifier::pass()),
            ];
            let mut ids = Vec::new();
            for request in requests {
                let report = h.governor.govern(request).await.unwrap();
                ids.push(report.action_id);
            }

            h.governor.settle().await.unwrap();
            for id in &ids {
                assert_eq!(h.sink.for_action(*id).len(), 1, "action {id}");
            }
            assert_eq!(h.sink.all().len(), ids.len());
            assert!(h.sink.all().iter().all(|r| r.verify_integrity()));
        }

        #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
        async fn test_concurrent_actions_are_each_receipted_once() {
            let h = harness(test_config());
            let writes = (0..12).map(|i| {
                h.governor.govern(ActionRequest::new(
                    write_intent(&format!("/workspace/f{i}.txt"), "x"),
                    MockVerifier::delayed(Duration::from_millis(5 * (i % 3)), i % 4 != 0),
                ))
            });
            let crossings = (0..3).map(|_| {
                h.governor
                    .govern(ActionRequest::new(shell("ls"), MockVerifier::pass()))
            });
            let reports: Vec<_> = futures::future::join_all(writes.chain(crossings))
                .await
                .into_iter()
                .map(Result::unwrap)
                .collect();

            h.governor.settle().await.unwrap();
            for report in &reports {
                assert!(report.is_receipted() || report.status == ActionStatus::Queued);
                assert_eq!(h.sink.for_action(report.action_id).len(), 1);
            }
            assert_eq!(h.governor.queue().pending(), 0);
            assert_eq!(h.governor.rollback_manager().live_count(), 0);
        }

        #[tokio::test]
        async fn test_cancel_queued_verification() {
            let mut config = test_config();
            config.verification.workers = 1;
            let h = harness(config);
            let (gated, release) = MockVerifier::gated();

            let first = h
                .governor
                .govern(ActionRequest::new(write_intent("/workspace/a.txt", "1"), gated))
                .await
                .unwrap();
            seed(&h.store, "/workspace/b.txt", b"before");
            let second = h
                .governor
                .govern(ActionRequest::new(
                    write_intent("/workspace/b.txt", "after"),
                    MockVerifier::pass(),
                ))
                .await
                .unwrap();
            assert_eq!(second.status, ActionStatus::Queued);

            tokio::time::sleep(Duration::from_millis(50)).await;
            assert!(!h.governor.cancel(first.action_id));
            assert!(h.governor.cancel(second.action_id));
            assert_eq!(h.store.get("/workspace/b.txt").unwrap(), b"before".to_vec());

            release.notify_one();
            h.governor.settle().await.unwrap();
            let receipts = h.sink.for_action(second.action_id);
            assert_eq!(receipts.len(), 1);
            assert_eq!(receipts[0].outcome, ReceiptOutcome::Cancelled);
        }

        #[tokio::test]
        async fn test_graduation_lowers_tier_after_authorization() {
            let mut config = test_config();
            config.trust.t1_to_t0 = 3;
            let h = harness(config);

            for i in 0..3 {
                h.governor
                    .govern(ActionRequest::new(
                        write_intent(&format!("/workspace/f{i}.txt"), "x"),
                        MockVerifier::pass(),
                    ))
                    .await
                    .unwrap();
            }
            h.governor.settle().await.unwrap();

            let proposals = h.governor.pending_proposals();
            assert_eq!(proposals.len(), 1);
            assert_eq!(proposals[0].capability, "fs.write");
            assert_eq!(proposals[0].to, RiskTier::Inert);

            // Nothing changes until the proposal is authorized.
            let before = h
                .governor
                .govern(ActionRequest::new(
                    write_intent("/workspace/g.txt", "y"),
                    MockVerifier::pass(),
                ))
                .await
                .unwrap();
            assert_eq!(before.decision.tier, RiskTier::Reversible);

            assert_eq!(
                h.governor.authorize_graduation("fs.write", true).unwrap(),
                RiskTier::Inert
            );
            let after = h
                .governor
                .govern(ActionRequest::new(
                    write_intent("/workspace/h.txt", "z"),
                    MockVerifier::pass(),
                ))
                .await
                .unwrap();
            assert_eq!(after.decision.tier, RiskTier::Inert);
            assert!(!h.governor.rollback_manager().has_snapshot(after.action_id));

            // Escalation still wins over the grant.
            approve_all(&h.governor, ApprovalResponse::Denied);
            let outside = h
                .governor
                .govern(ActionRequest::new(write_intent("/etc/motd", "hi"), MockVerifier::pass()))
                .await
                .unwrap();
            assert_eq!(outside.decision.tier, RiskTier::Irreversible);
        }

        #[tokio::test]
        async fn test_recovery_settles_unfinished_work() {
            let store = Arc::new(MemoryStateStore::new());
            let journal = Arc::new(MemoryJournal::new());
            seed(&store, "/workspace/data.json", b"original");

            let mut config = test_config();
            config.verification.task_timeout_secs = 600;
            let crashed = harness_with(
                config,
                GovernanceDocument::baseline(),
                store.clone(),
                journal.clone(),
                &[],
            );
            let report = crashed
                .governor
                .govern(ActionRequest::new(
                    write_intent("/workspace/data.json", "partial"),
                    MockVerifier::hang(),
                ))
                .await
                .unwrap();
            assert_eq!(report.status, ActionStatus::Queued);
            assert_eq!(store.get("/workspace/data.json").unwrap(), b"partial".to_vec());

            // A second pipeline over the same journal and state stands in for a restart.
            let restarted = harness_with(
                test_config(),
                GovernanceDocument::baseline(),
                store.clone(),
                journal.clone(),
                &[],
            );
            assert!(restarted.governor.version() > crashed.governor.version());

            let recovery = restarted.governor.recover().unwrap();
            assert_eq!(
                recovery,
                RecoveryReport {
                    tasks_failed: 1,
                    rolled_back: 1,
                    orphans_rolled_back: 0,
                }
            );
            assert_eq!(store.get("/workspace/data.json").unwrap(), b"original".to_vec());
            assert_eq!(journal.task_status(report.action_id), Some(TaskStatus::Failed));

            let receipts = restarted.sink.for_action(report.action_id);
            assert_eq!(receipts.len(), 1);
            assert!(matches!(receipts[0].outcome, ReceiptOutcome::RolledBack { .. }));
            assert_eq!(
                restarted.governor.ledger().record("fs.write").unwrap().failure_count,
                1
            );

            assert_eq!(restarted.governor.recover().unwrap(), RecoveryReport::default());
        }

        #[tokio::test]
        async fn test_recovery_rolls_back_orphaned_snapshot() {
            use vigil_core::{GovernanceJournal, PriorState, Snapshot};

            let store = Arc::new(MemoryStateStore::new());
            let journal = Arc::new(MemoryJournal::new());
            seed(&store, "/workspace/x.txt", b"mutated");
            let orphan = Snapshot {
                action_id: uuid::Uuid::new_v4(),
                target: "/workspace/x.txt".into(),
                prior: PriorState::Content {
                    bytes: b"clean".to_vec(),
                },
                created_at: chrono::Utc::now(),
            };
            journal.record_snapshot(&orphan).unwrap();

            let h = harness_with(
                test_config(),
                GovernanceDocument::baseline(),
                store.clone(),
                journal.clone(),
                &[],
            );
            let recovery = h.governor.recover().unwrap();
            assert_eq!(recovery.orphans_rolled_back, 1);
            assert_eq!(store.get("/workspace/x.txt").unwrap(), b"clean".to_vec());
        }

        #[tokio::test]
        async fn test_version_survives_restart() {
            let journal = Arc::new(MemoryJournal::new());
            let first = harness_with(
                test_config(),
                GovernanceDocument::baseline(),
                Arc::new(MemoryStateStore::new()),
                journal.clone(),
                &[],
            );
            let v2 = first.governor.activate(GovernanceDocument::baseline()).unwrap();
            assert_eq!(v2, GovernanceVersion(2));

            let second = harness_with(
                test_config(),
                GovernanceDocument::baseline(),
                Arc::new(MemoryStateStore::new()),
                journal,
                &[],
            );
            assert_eq!(second.governor.version(), GovernanceVersion(3));
        }

        const WATCHED_DOCUMENT: &str = r#"
label = "watched"
boundaries = ["/workspace"]

[capabilities."fs.read"]
tier = "t0"

[capabilities."fs.write"]
tier = "TIER"
"#;

        #[tokio::test]
        async fn test_watch_document_needs_a_configured_path() {
            let h = harness(test_config());
            assert!(h.governor.watch_document().unwrap().is_none());

            let mut config = test_config();
            config.governance.document = Some("/nonexistent/governance.toml".into());
            config.governance.watch = false;
            let h = harness(config);
            assert!(h.governor.watch_document().unwrap().is_none());
        }

        #[tokio::test]
        async fn test_watched_document_is_reactivated_on_change() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("governance.toml");
            std::fs::write(&path, WATCHED_DOCUMENT.replace("TIER", "t1")).unwrap();

            let mut config = test_config();
            config.governance.document = Some(path.clone());
            config.governance.watch = true;
            let h = harness_with(
                config,
                GovernanceDocument::load(&path).unwrap(),
                Arc::new(MemoryStateStore::new()),
                Arc::new(MemoryJournal::new()),
                &[],
            );
            let before = h.governor.version();
            let _watcher = h.governor.watch_document().unwrap().unwrap();

            tokio::time::sleep(Duration::from_millis(100)).await;
            std::fs::write(&path, WATCHED_DOCUMENT.replace("TIER", "t2")).unwrap();

            let mut reactivated = false;
            for _ in 0..100 {
                let current = h.governor.registry().current();
                let tier = current.document().rule("fs.write").map(|r| r.tier);
                if tier == Some(RiskTier::Controlled) {
                    reactivated = true;
                    break;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            assert!(reactivated, "document change was never activated");
            assert!(h.governor.version() > before);
        }
    }
}
