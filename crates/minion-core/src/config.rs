use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::build::{BuildStep, CommandBuildStep, PrebuiltBuildStep};
use crate::env::{EnvPolicy, default_inherit, default_set_env};
use crate::layout::Layout;
use crate::runner::ProcessRunner;

pub const CONFIG_FILE: &str = "minion.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Contents of `minion.toml`. Every section is optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MinionConfig {
    pub root: Option<PathBuf>,
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub build: BuildConfig,
    #[serde(default)]
    pub broadcast: BroadcastConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunnerConfig {
    #[serde(default = "default_inherit")]
    pub inherit_env: Vec<String>,
    /// Appended to `PATH`; empty means `{root}/go/bin`.
    #[serde(default)]
    pub extra_path: Vec<PathBuf>,
    /// Fixed child variables; values may use `{service_path}` and `{root}`.
    #[serde(default = "default_set_env")]
    pub set_env: BTreeMap<String, String>,
    pub timeout_secs: Option<u64>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            inherit_env: default_inherit(),
            extra_path: Vec::new(),
            set_env: default_set_env(),
            timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BuildConfig {
    #[serde(default = "default_fetch")]
    pub fetch: Vec<String>,
    #[serde(default = "default_build")]
    pub build: Vec<String>,
    #[serde(default = "default_clean")]
    pub clean: Vec<String>,
    /// Copy ready-made executables from here instead of running commands.
    pub prebuilt_dir: Option<PathBuf>,
}

fn default_fetch() -> Vec<String> {
    CommandBuildStep::default().fetch
}
fn default_build() -> Vec<String> {
    CommandBuildStep::default().build
}
fn default_clean() -> Vec<String> {
    CommandBuildStep::default().clean
}

impl Default for BuildConfig {
    fn default() -> Self {
        let step = CommandBuildStep::default();
        Self {
            fetch: step.fetch,
            build: step.build,
            clean: step.clean,
            prebuilt_dir: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BroadcastConfig {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// JSON-lines event log; relative paths resolve against the root.
    pub events_file: Option<PathBuf>,
}

fn default_interval_ms() -> u64 {
    1000
}
fn default_capacity() -> usize {
    256
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            capacity: default_capacity(),
            events_file: None,
        }
    }
}

impl BroadcastConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

impl MinionConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load `explicit` if given, else the first existing of
    /// `./minion.toml` and `~/.config/minion/minion.toml`, else defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        for candidate in Self::search_paths() {
            if candidate.is_file() {
                tracing::debug!(path = %candidate.display(), "Loading config");
                return Self::from_file(&candidate);
            }
        }
        tracing::debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(CONFIG_FILE)];
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".config").join("minion").join(CONFIG_FILE));
        }
        paths
    }

    pub fn layout(&self) -> Layout {
        Layout::new(self.root.clone().unwrap_or_else(Layout::default_root))
    }

    pub fn env_policy(&self, layout: &Layout) -> EnvPolicy {
        let extra_path = if self.runner.extra_path.is_empty() {
            vec![layout.tool_bin_dir()]
        } else {
            self.runner.extra_path.clone()
        };
        EnvPolicy {
            inherit: self.runner.inherit_env.clone(),
            extra_path,
            set: self.runner.set_env.clone(),
        }
    }

    pub fn runner(&self, layout: &Layout) -> ProcessRunner {
        ProcessRunner::new(layout.clone(), self.env_policy(layout))
            .with_timeout(self.runner.timeout_secs.map(Duration::from_secs))
    }

    pub fn build_step(&self, layout: &Layout) -> Arc<dyn BuildStep> {
        match &self.build.prebuilt_dir {
            Some(dir) => Arc::new(PrebuiltBuildStep::new(layout.root().join(dir))),
            None => Arc::new(CommandBuildStep {
                fetch: self.build.fetch.clone(),
                build: self.build.build.clone(),
                clean: self.build.clean.clone(),
            }),
        }
    }

    pub fn events_path(&self, layout: &Layout) -> Option<PathBuf> {
        self.broadcast
            .events_file
            .as_ref()
            .map(|p| layout.root().join(p))
    }
}
