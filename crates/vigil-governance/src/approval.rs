use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::info;
use uuid::Uuid;
use vigil_core::{ActionId, ActionIntent, Event, EventBus, PolicyDecision, RiskTier};

/// A request for human approval of a governed action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: Uuid,
    pub action_id: ActionId,
    pub capability: String,
    pub actor: String,
    pub target: Option<String>,
    pub tier: RiskTier,
    /// Why the pipeline routed this action to a human.
    pub rationale: String,
    pub created_at: DateTime<Utc>,
    /// Timeout in seconds; auto-deny after this.
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalResponse {
    Approved,
    Denied,
    TimedOut,
}

impl ApprovalResponse {
    pub fn is_approved(&self) -> bool {
        *self == Self::Approved
    }
}

pub type PendingApproval = (ApprovalRequest, oneshot::Sender<ApprovalResponse>);

/// Routes approval requests to whoever holds the receiver and waits for an answer.
pub struct ApprovalGate {
    request_tx: mpsc::Sender<PendingApproval>,
    /// Receiver side, consumed by the CLI or an embedding application.
    request_rx: Mutex<Option<mpsc::Receiver<PendingApproval>>>,
    events: EventBus,
}

impl ApprovalGate {
    pub fn new(events: EventBus) -> Self {
        let (tx, rx) = mpsc::channel(64);
        Self {
            request_tx: tx,
            request_rx: Mutex::new(Some(rx)),
            events,
        }
    }

    /// Take the receiver. Only the first caller gets it.
    pub fn take_receiver(&self) -> Option<mpsc::Receiver<PendingApproval>> {
        self.request_rx.lock().take()
    }

    /// Request approval for an action. Waits until approved, denied, or timed out.
    /// If the receiver was dropped, the request is denied.
    pub async fn request_approval(
        &self,
        action_id: ActionId,
        intent: &ActionIntent,
        decision: &PolicyDecision,
        timeout_secs: u64,
    ) -> ApprovalResponse {
        let request = ApprovalRequest {
            id: Uuid::new_v4(),
            action_id,
            capability: intent.capability().to_string(),
            actor: intent.actor().to_string(),
            target: intent.target().map(str::to_string),
            tier: decision.tier,
            rationale: decision.rationale.clone(),
            created_at: Utc::now(),
            timeout_secs,
        };
        let request_id = request.id;

        info!(
            %request_id,
            %action_id,
            capability = %request.capability,
            tier = %request.tier,
            "requesting human approval"
        );
        self.events.publish(Event::ApprovalRequested {
            request_id,
            action_id,
            capability: request.capability.clone(),
        });

        let (response_tx, response_rx) = oneshot::channel();

        // Delivery counts against the timeout too: a receiver that is held
        // but never drained must not park the caller.
        let exchange = async {
            if self.request_tx.send((request, response_tx)).await.is_err() {
                return ApprovalResponse::Denied; // receiver dropped
            }
            response_rx.await.unwrap_or(ApprovalResponse::Denied) // responder dropped
        };
        let timeout = Duration::from_secs(timeout_secs);
        let response = match tokio::time::timeout(timeout, exchange).await {
            Ok(response) => response,
            Err(_) => {
                info!(%request_id, "approval request timed out");
                ApprovalResponse::TimedOut
            }
        };

        self.events.publish(Event::ApprovalResolved {
            request_id,
            approved: response.is_approved(),
        });
        response
    }
}
