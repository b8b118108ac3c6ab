#[cfg(test)]
mod tests {
    use vigil_core::*;

    fn allowed(tier: RiskTier) -> PolicyDecision {
        PolicyDecision {
            tier,
            allowed: true,
            rationale: "default".into(),
            cache_hit: false,
            governance_version: GovernanceVersion(1),
        }
    }

    // ── Risk tiers ─────────────────────────────────────────────

    #[test]
    fn test_tier_ordering() {
        assert!(RiskTier::Inert < RiskTier::Reversible);
        assert!(RiskTier::Reversible < RiskTier::Controlled);
        assert!(RiskTier::Controlled < RiskTier::Irreversible);
    }

    #[test]
    fn test_from_u8_fails_safe() {
        assert_eq!(RiskTier::from_u8(0), RiskTier::Inert);
        assert_eq!(RiskTier::from_u8(2), RiskTier::Controlled);
        assert_eq!(RiskTier::from_u8(9), RiskTier::Irreversible);
    }

    #[test]
    fn test_raise_and_lower() {
        assert_eq!(RiskTier::Reversible.raised(), RiskTier::Controlled);
        assert_eq!(RiskTier::Irreversible.raised(), RiskTier::Irreversible);
        assert_eq!(RiskTier::Controlled.lowered(), Some(RiskTier::Reversible));
        assert_eq!(RiskTier::Inert.lowered(), None);
    }

    #[test]
    fn test_tier_properties() {
        assert!(RiskTier::Reversible.is_cacheable());
        assert!(!RiskTier::Controlled.is_cacheable());
        assert!(RiskTier::Controlled.requires_boundary_crossing());
        assert!(RiskTier::Inert.batches_receipts());
        assert!(!RiskTier::Irreversible.batches_receipts());
        assert!(RiskTier::Irreversible.requires_approval());
        assert!(!RiskTier::Irreversible.is_reversible());
    }

    #[test]
    fn test_tier_parse_and_serde() {
        assert_eq!("t2".parse::<RiskTier>().unwrap(), RiskTier::Controlled);
        assert_eq!("Irreversible".parse::<RiskTier>().unwrap(), RiskTier::Irreversible);
        assert!("t7".parse::<RiskTier>().is_err());
        let json = serde_json::to_string(&RiskTier::Reversible).unwrap();
        assert_eq!(json, "\"t1\"");
        let restored: RiskTier = serde_json::from_str("\"inert\"").unwrap();
        assert_eq!(restored, RiskTier::Inert);
    }

    #[test]
    fn test_tier_display() {
        let s = format!("{}", RiskTier::Irreversible);
        assert!(s.contains("T3"));
        assert!(s.contains("irreversible"));
    }

    // ── Intents ────────────────────────────────────────────────

    #[test]
    fn test_intent_builder() {
        let intent = ActionIntent::new("fs.write", "agent-1")
            .with_target("/workspace/a.txt")
            .with_hint("hello");
        assert_eq!(intent.capability(), "fs.write");
        assert_eq!(intent.target(), Some("/workspace/a.txt"));
        assert_eq!(intent.pattern_hints(), ["hello".to_string()]);
        assert!(intent.validate().is_ok());
    }

    #[test]
    fn test_malformed_intents_rejected() {
        assert!(ActionIntent::new("", "a").validate().is_err());
        assert!(ActionIntent::new("fs..write", "a").validate().is_err());
        assert!(ActionIntent::new("FS.Write", "a").validate().is_err());
        assert!(ActionIntent::new("fs.write", " ").validate().is_err());
        assert!(
            ActionIntent::new("fs.write", "a")
                .with_target("")
                .validate()
                .is_err()
        );
    }

    // ── Receipts ───────────────────────────────────────────────

    #[test]
    fn test_receipt_hash_detects_tampering() {
        let mut receipt = Receipt::seal(
            uuid::Uuid::new_v4(),
            "fs.write",
            "agent",
            allowed(RiskTier::Reversible),
            ReceiptOutcome::Verified,
            12,
        )
        .unwrap();
        assert!(receipt.verify_integrity());
        receipt.duration_ms = 13;
        assert!(!receipt.verify_integrity());
    }

    #[test]
    fn test_denied_decision_cannot_yield_success_receipt() {
        let decision = PolicyDecision::deny("nope", GovernanceVersion(1));
        let result = Receipt::seal(
            uuid::Uuid::new_v4(),
            "fs.write",
            "agent",
            decision,
            ReceiptOutcome::Verified,
            0,
        );
        assert!(matches!(result, Err(VigilError::Integrity(_))));
    }

    #[test]
    fn test_batch_integrity() {
        let receipts: Vec<Receipt> = (0..3)
            .map(|_| {
                Receipt::seal(
                    uuid::Uuid::new_v4(),
                    "fs.read",
                    "agent",
                    allowed(RiskTier::Inert),
                    ReceiptOutcome::Verified,
                    1,
                )
                .unwrap()
            })
            .collect();
        let mut batch = BatchArtifact::seal(receipts);
        assert_eq!(batch.len(), 3);
        assert!(batch.verify_integrity());
        batch.receipts.pop();
        assert!(!batch.verify_integrity());
    }

    // ── Trust records ──────────────────────────────────────────

    #[test]
    fn test_trust_record_clamps_ceiling_to_default() {
        let record = TrustRecord::new("fs.write", RiskTier::Reversible, RiskTier::Irreversible);
        assert_eq!(record.tier_ceiling, RiskTier::Reversible);
        assert_eq!(record.effective_tier(), RiskTier::Reversible);
        assert!(!record.in_cooldown());
    }

    // ── Errors ─────────────────────────────────────────────────

    #[test]
    fn test_error_display() {
        let err = VigilError::BoundaryCrossingRefused {
            reason: "drain timed out".into(),
            failed_actions: vec![],
        };
        assert!(err.to_string().contains("drain timed out"));
        let err = VigilError::CacheInconsistency { cached: 1, active: 2 };
        assert_eq!(err.to_string(), "policy cache inconsistent: cached 1, active 2");
    }

    #[test]
    fn test_task_status_terminal() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Passed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert_eq!(TaskStatus::parse("failed"), Some(TaskStatus::Failed));
    }

    // ── Event bus ──────────────────────────────────────────────

    #[tokio::test]
    async fn test_event_bus_delivers() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        bus.publish(Event::RolledBack {
            action_id: uuid::Uuid::nil(),
        });
        match rx.recv().await.unwrap() {
            Event::RolledBack { action_id } => assert!(action_id.is_nil()),
            other => panic!("unexpected event {other:?}"),
        }
    }
}
