//! # vigil-config
//!
//! Configuration system for the Vigil runtime. Reads runtime settings from `vigil.toml`
//! and environment variables, and loads the governance document that drives
//! classification. The governance document can be hot-reloaded via a filesystem watcher.

pub mod document;
pub mod loader;
pub mod schema;

pub use document::{CapabilityRule, GovernanceDocument, PatternRule, ScopeRule};
pub use loader::{ConfigLoader, DocumentWatcher};
pub use schema::{ConfigWarning, VigilConfig, WarningSeverity};
