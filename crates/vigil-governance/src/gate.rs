//! The tier boundary: no T2/T3 decision is made while T0/T1 work is still in flight.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::time::Instant;
use tracing::{info, warn};
use vigil_core::{ActionId, Event, EventBus, RiskTier, VigilError};

use crate::queue::VerificationQueue;
use crate::receipts::ReceiptBuffer;

/// Held by a T2/T3 action from the crossing through its live decision.
/// While held, no T0/T1 work can be admitted.
pub struct BoundaryPass<'a> {
    _exclusive: RwLockWriteGuard<'a, ()>,
}

/// Held by a T0/T1 action from snapshot until its work is counted by the
/// queue, and while it writes a receipt on a path that never reaches the
/// queue. A crossing never misses work that is about to enter either.
pub struct Admission<'a> {
    _shared: RwLockReadGuard<'a, ()>,
}

pub struct TierBoundaryGate {
    admission: RwLock<()>,
    queue: Arc<VerificationQueue>,
    buffer: Arc<ReceiptBuffer>,
    drain_timeout: Duration,
    events: EventBus,
}

impl TierBoundaryGate {
    pub fn new(
        queue: Arc<VerificationQueue>,
        buffer: Arc<ReceiptBuffer>,
        drain_timeout: Duration,
        events: EventBus,
    ) -> Self {
        Self {
            admission: RwLock::new(()),
            queue,
            buffer,
            drain_timeout,
            events,
        }
    }

    /// Admit T0/T1 work. Waits while a crossing is in progress.
    pub async fn admit(&self) -> Admission<'_> {
        Admission {
            _shared: self.admission.read().await,
        }
    }

    /// Flush buffered receipts, drain the verification queue, and flush
    /// again for receipts the drained tasks produced.
    ///
    /// Refuses the crossing if any drained task failed, or if exclusivity and
    /// quiescence are not both reached within the drain timeout. On success
    /// the queue is empty and the buffer is empty.
    pub async fn cross(
        &self,
        action_id: ActionId,
        tier: RiskTier,
    ) -> vigil_core::Result<BoundaryPass<'_>> {
        let deadline = Instant::now() + self.drain_timeout;
        let crossed = match tokio::time::timeout_at(deadline, self.admission.write()).await {
            Ok(exclusive) => self
                .quiesce(deadline.saturating_duration_since(Instant::now()))
                .await
                .map(|()| exclusive),
            Err(_) => Err(VigilError::BoundaryCrossingRefused {
                reason: format!(
                    "low-risk work still being admitted after {}s",
                    self.drain_timeout.as_secs()
                ),
                failed_actions: vec![],
            }),
        };

        match crossed {
            Ok(exclusive) => {
                info!(%action_id, tier = %tier, "tier boundary crossed");
                self.events.publish(Event::BoundaryCrossed { action_id, tier });
                Ok(BoundaryPass {
                    _exclusive: exclusive,
                })
            }
            Err(e) => {
                warn!(%action_id, tier = %tier, error = %e, "tier boundary crossing refused");
                self.events.publish(Event::BoundaryRefused {
                    action_id,
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn quiesce(&self, budget: Duration) -> vigil_core::Result<()> {
        let refused = |reason: String, failed_actions: Vec<ActionId>| {
            VigilError::BoundaryCrossingRefused {
                reason,
                failed_actions,
            }
        };

        self.buffer
            .flush()
            .map_err(|e| refused(format!("receipt flush failed: {e}"), vec![]))?;

        let failures = self.queue.drain(budget).await?;
        // Failed tasks were rolled back and receipted; flush those receipts
        // before reporting, so nothing is left behind either way.
        self.buffer
            .flush()
            .map_err(|e| refused(format!("receipt flush failed: {e}"), vec![]))?;

        if !failures.is_empty() {
            let reasons: Vec<String> = failures
                .iter()
                .map(|f| format!("{} ({}): {}", f.action_id, f.capability, f.reason))
                .collect();
            return Err(refused(
                format!(
                    "{} pending action(s) failed verification: {}",
                    failures.len(),
                    reasons.join("; ")
                ),
                failures.into_iter().map(|f| f.action_id).collect(),
            ));
        }

        let pending = self.queue.pending();
        let buffered = self.buffer.len();
        if pending != 0 || buffered != 0 {
            return Err(refused(
                format!(
                    "not quiescent after drain: {pending} task(s) pending, \
                     {buffered} receipt(s) buffered"
                ),
                vec![],
            ));
        }
        Ok(())
    }
}
