use notify::{Event as NotifyEvent, EventKind, RecursiveMode, Watcher};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use vigil_core::VigilError;

use crate::document::GovernanceDocument;
use crate::schema::VigilConfig;

/// Loads the Vigil runtime configuration.
pub struct ConfigLoader {
    config: Arc<RwLock<VigilConfig>>,
    config_path: PathBuf,
}

impl ConfigLoader {
    /// Resolve the config path: explicit path > VIGIL_CONFIG env > ~/.vigil/vigil.toml
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(p) = explicit {
            return p.to_path_buf();
        }
        if let Ok(p) = std::env::var("VIGIL_CONFIG") {
            return PathBuf::from(p);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".vigil")
            .join("vigil.toml")
    }

    /// Load the config from disk, falling back to defaults.
    pub fn load(path: Option<&Path>) -> vigil_core::Result<Self> {
        let config_path = Self::resolve_path(path);
        let config = if config_path.exists() {
            info!(?config_path, "loading configuration");
            let raw = std::fs::read_to_string(&config_path)?;
            Self::parse(&raw, &config_path)?
        } else {
            warn!(?config_path, "config file not found, using defaults");
            VigilConfig::default()
        };

        let config = Self::apply_env_overrides(config);

        // Log warnings, fail on errors
        for w in &config.validate()? {
            warn!("{}", w);
        }

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_path,
        })
    }

    fn parse(raw: &str, path: &Path) -> vigil_core::Result<VigilConfig> {
        toml::from_str::<VigilConfig>(raw).map_err(|e| {
            VigilError::Config(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    /// Get a read snapshot of the current config.
    pub fn get(&self) -> VigilConfig {
        self.config.read().clone()
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Apply env var overrides (VIGIL_LOG_LEVEL, VIGIL_DB_PATH, etc.)
    fn apply_env_overrides(mut config: VigilConfig) -> VigilConfig {
        if let Ok(v) = std::env::var("VIGIL_LOG_LEVEL") {
            config.logging.level = v;
        }
        if let Ok(v) = std::env::var("VIGIL_DB_PATH") {
            config.store.db_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("VIGIL_GOVERNANCE_DOCUMENT") {
            config.governance.document = Some(PathBuf::from(v));
        }
        if let Ok(v) = std::env::var("VIGIL_VERIFICATION_WORKERS") {
            if let Ok(workers) = v.parse::<usize>() {
                config.verification.workers = workers;
            }
        }
        config
    }

    /// Reload the config from disk.
    pub fn reload(&self) -> vigil_core::Result<()> {
        if !self.config_path.exists() {
            return Err(VigilError::Config(format!(
                "config file not found: {}",
                self.config_path.display()
            )));
        }
        let raw = std::fs::read_to_string(&self.config_path)?;
        let new_config = Self::apply_env_overrides(Self::parse(&raw, &self.config_path)?);
        new_config.validate()?;
        *self.config.write() = new_config;
        info!("configuration reloaded");
        Ok(())
    }

    /// The governance document the config points at, or the built-in baseline.
    pub fn governance_document(&self) -> vigil_core::Result<GovernanceDocument> {
        match self.config.read().governance.document.clone() {
            Some(path) => GovernanceDocument::load(&path),
            None => Ok(GovernanceDocument::baseline()),
        }
    }
}

/// Watches a governance document on disk and hands every successfully parsed
/// revision to a callback. Activation (and its validation) is the callback's job.
pub struct DocumentWatcher;

impl DocumentWatcher {
    /// Start a background file watcher. Returns a handle to the watcher
    /// (must be kept alive for watching to continue).
    pub fn watch<F>(path: &Path, on_change: F) -> vigil_core::Result<notify::RecommendedWatcher>
    where
        F: Fn(GovernanceDocument) + Send + 'static,
    {
        let document_path = path.to_path_buf();
        info!(?document_path, "starting governance document watcher");

        let path_for_event = document_path.clone();
        let mut watcher = notify::recommended_watcher(
            move |res: Result<NotifyEvent, notify::Error>| match res {
                Ok(event) => {
                    if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                        return;
                    }
                    let is_our_file = event
                        .paths
                        .iter()
                        .any(|p| p.file_name() == path_for_event.file_name());
                    if !is_our_file {
                        return;
                    }

                    info!("governance document changed, reloading");
                    match GovernanceDocument::load(&path_for_event) {
                        Ok(document) => on_change(document),
                        Err(e) => {
                            warn!(
                                error = %e,
                                "governance document has errors, keeping current version"
                            );
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "file watcher error");
                }
            },
        )
        .map_err(|e| VigilError::Config(format!("failed to create file watcher: {}", e)))?;

        // Watch the parent directory (some editors create temp files + rename)
        let watch_path = match document_path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        watcher
            .watch(watch_path, RecursiveMode::NonRecursive)
            .map_err(|e| {
                VigilError::Config(format!("failed to watch governance directory: {}", e))
            })?;

        Ok(watcher)
    }
}
