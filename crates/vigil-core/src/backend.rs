use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::ActionIntent;

/// What the execution backend reports after running an action.
///
/// The pipeline never trusts this beyond handing it to a [`Verifier`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub summary: String,
    /// Optional structured data returned alongside the summary.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

impl ActionOutcome {
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            data: Value::Null,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

/// The sandboxed tool/storage layer that actually performs approved actions.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    async fn execute(&self, intent: &ActionIntent) -> crate::Result<ActionOutcome>;
}

/// Caller-supplied predicate deciding whether an executed action did what it should.
#[async_trait]
pub trait Verifier: Send + Sync {
    /// `Ok(true)` passes, `Ok(false)` or `Err` fails the verification.
    async fn verify(&self, intent: &ActionIntent, outcome: &ActionOutcome) -> crate::Result<bool>;
}

/// Snapshot/rollback contract of the storage subsystem for write-style targets.
pub trait StateStore: Send + Sync {
    /// Current content of `target`, or `None` if it does not exist.
    fn read(&self, target: &str) -> crate::Result<Option<Vec<u8>>>;

    /// Replace the content of `target`.
    fn write(&self, target: &str, content: &[u8]) -> crate::Result<()>;

    /// Delete `target`. Deleting a missing target is not an error.
    fn remove(&self, target: &str) -> crate::Result<()>;
}
