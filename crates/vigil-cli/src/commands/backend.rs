use async_trait::async_trait;
use vigil_core::{ActionIntent, ActionOutcome, ExecutionBackend, VigilError};

/// Backend for administrative commands that never execute actions.
///
/// Recovery only rolls back and receipts; anything that reaches `execute`
/// is refused.
pub struct DetachedBackend;

#[async_trait]
impl ExecutionBackend for DetachedBackend {
    async fn execute(&self, intent: &ActionIntent) -> vigil_core::Result<ActionOutcome> {
        Err(VigilError::Execution {
            capability: intent.capability().to_string(),
            reason: "no execution backend is attached to the command line".into(),
        })
    }
}
