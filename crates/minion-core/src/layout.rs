use std::path::{Path, PathBuf};

use crate::error::ControlError;

/// Name of the managed executable inside every service directory.
pub const SERVICE_EXECUTABLE: &str = "service";
/// Persisted descriptor inside every service directory.
pub const DESCRIPTOR_FILE: &str = "service.json";
/// Exported contract environment, for operators running the service by hand.
pub const ENV_FILE: &str = "service.env";

/// Filesystem layout under the supervisor root.
///
/// ```text
/// {root}/
///   svc/{id}/       - service directory (executable, service.json, service.env)
///   etc/            - configuration directory handed to services
///   log/            - supervisor logs and event stream
///   src/{locator}/  - legacy fetch cache, removed with the service
///   bin/{id}        - legacy build output, removed with the service
///   go/bin/         - default extra executable search path
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Default root: `~/.minion`
    pub fn default_root() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".minion")
    }

    /// Create the directories the supervisor cannot run without.
    pub async fn init(&self) -> Result<(), ControlError> {
        for dir in [self.services_dir(), self.config_dir(), self.log_dir()] {
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| ControlError::persistence(&dir, e))?;
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn services_dir(&self) -> PathBuf {
        self.root.join("svc")
    }

    pub fn config_dir(&self) -> PathBuf {
        self.root.join("etc")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.root.join("log")
    }

    pub fn tool_bin_dir(&self) -> PathBuf {
        self.root.join("go").join("bin")
    }

    pub fn service_dir(&self, id: &str) -> PathBuf {
        self.services_dir().join(id)
    }

    pub fn executable(&self, id: &str) -> PathBuf {
        self.service_dir(id).join(SERVICE_EXECUTABLE)
    }

    pub fn descriptor_path(&self, id: &str) -> PathBuf {
        self.service_dir(id).join(DESCRIPTOR_FILE)
    }

    pub fn env_file(&self, id: &str) -> PathBuf {
        self.service_dir(id).join(ENV_FILE)
    }

    /// Legacy fetch cache for a source locator.
    ///
    /// Only plain relative components of the locator are used so that a
    /// locator can never address anything outside `{root}/src`.
    pub fn fetch_cache(&self, source_locator: &str) -> Option<PathBuf> {
        let parts: Vec<&str> = source_locator
            .split('/')
            .filter(|p| !p.is_empty() && *p != "." && *p != "..")
            .collect();
        if parts.is_empty() {
            return None;
        }
        Some(parts.iter().fold(self.root.join("src"), |acc, p| acc.join(p)))
    }

    pub fn legacy_bin(&self, id: &str) -> PathBuf {
        self.root.join("bin").join(id)
    }
}
