//! Mock collaborators for deterministic testing.
//!
//! The backend applies `fs.write`/`fs.delete` to a [`StateStore`] and treats
//! every other capability as a no-op, optionally failing or hanging per
//! capability. Verifiers return a fixed verdict, hang, or wait for a signal.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use vigil_core::{ActionIntent, ActionOutcome, ExecutionBackend, StateStore, Verifier, VigilError};

/// A backend that performs writes and deletes against a state store.
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use vigil_governance::mock::MockBackend;
/// use vigil_governance::MemoryStateStore;
/// let backend = MockBackend::new(Arc::new(MemoryStateStore::new())).failing_on("net.post");
/// ```
pub struct MockBackend {
    store: Arc<dyn StateStore>,
    failing: HashSet<String>,
    hanging: HashSet<String>,
    /// Every intent executed, in order (for assertions in tests).
    pub executed: Arc<Mutex<Vec<ActionIntent>>>,
}

impl MockBackend {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            store,
            failing: HashSet::new(),
            hanging: HashSet::new(),
            executed: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Fail every execution of `capability`, after applying its effect.
    pub fn failing_on(mut self, capability: &str) -> Self {
        self.failing.insert(capability.to_string());
        self
    }

    /// Never return from executing `capability`.
    pub fn hanging_on(mut self, capability: &str) -> Self {
        self.hanging.insert(capability.to_string());
        self
    }

    pub fn executed_count(&self) -> usize {
        self.executed.lock().len()
    }
}

#[async_trait]
impl ExecutionBackend for MockBackend {
    async fn execute(&self, intent: &ActionIntent) -> vigil_core::Result<ActionOutcome> {
        self.executed.lock().push(intent.clone());
        if self.hanging.contains(intent.capability()) {
            std::future::pending::<()>().await;
        }
        match (intent.capability(), intent.target()) {
            ("fs.write", Some(target)) => {
                let content = intent
                    .scope()
                    .arguments
                    .get("content")
                    .and_then(|v| v.as_str())
                    .unwrap_or("written");
                self.store.write(target, content.as_bytes())?;
            }
            ("fs.delete", Some(target)) => self.store.remove(target)?,
            _ => {}
        }
        if self.failing.contains(intent.capability()) {
            return Err(VigilError::Execution {
                capability: intent.capability().to_string(),
                reason: "mock failure".into(),
            });
        }
        Ok(ActionOutcome::new(format!("{} done", intent.capability())))
    }
}

enum Behavior {
    Verdict(bool),
    Hang,
    Delayed(Duration, bool),
    Gated(Arc<Notify>),
}

/// A verifier with scripted behavior.
pub struct MockVerifier {
    behavior: Behavior,
}

impl MockVerifier {
    pub fn pass() -> Arc<Self> {
        Arc::new(Self {
            behavior: Behavior::Verdict(true),
        })
    }

    pub fn reject() -> Arc<Self> {
        Arc::new(Self {
            behavior: Behavior::Verdict(false),
        })
    }

    /// Never returns.
    pub fn hang() -> Arc<Self> {
        Arc::new(Self {
            behavior: Behavior::Hang,
        })
    }

    pub fn delayed(delay: Duration, verdict: bool) -> Arc<Self> {
        Arc::new(Self {
            behavior: Behavior::Delayed(delay, verdict),
        })
    }

    /// Passes once the returned [`Notify`] is signalled.
    pub fn gated() -> (Arc<Self>, Arc<Notify>) {
        let notify = Arc::new(Notify::new());
        (
            Arc::new(Self {
                behavior: Behavior::Gated(notify.clone()),
            }),
            notify,
        )
    }
}

#[async_trait]
impl Verifier for MockVerifier {
    async fn verify(
        &self,
        _intent: &ActionIntent,
        _outcome: &ActionOutcome,
    ) -> vigil_core::Result<bool> {
        match &self.behavior {
            Behavior::Verdict(verdict) => Ok(*verdict),
            Behavior::Hang => {
                std::future::pending::<()>().await;
                Ok(false)
            }
            Behavior::Delayed(delay, verdict) => {
                tokio::time::sleep(*delay).await;
                Ok(*verdict)
            }
            Behavior::Gated(notify) => {
                notify.notified().await;
                Ok(true)
            }
        }
    }
}
