use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use std::sync::Arc;

use minion_service::{Command, Params, ServiceStatus};
use serde_json::Value;

use crate::build::{BuildContext, BuildStep};
use crate::config::MinionConfig;
use crate::descriptor::ServiceDescriptor;
use crate::env::render_env_file;
use crate::error::ControlError;
use crate::layout::Layout;
use crate::metrics::ControlMetrics;
use crate::registry::Registry;
use crate::runner::{ProcessRunner, RunOutput};
use crate::storage::DescriptorStore;

/// The lifecycle facade: every operation a caller can perform on managed
/// services.
///
/// Registry checks happen before any side effect. The registry lock is
/// never held while a build step or managed process runs, so operations on
/// different services proceed concurrently.
///
/// # Threading
///
/// `ControlPlane` is `Send + Sync` and is typically wrapped in `Arc` and
/// shared between transport workers and the stats broadcaster.
pub struct ControlPlane {
    layout: Layout,
    registry: Registry,
    store: DescriptorStore,
    runner: ProcessRunner,
    build: Arc<dyn BuildStep>,
    metrics: Arc<ControlMetrics>,
}

impl std::fmt::Debug for ControlPlane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlPlane")
            .field("root", &self.layout.root())
            .finish_non_exhaustive()
    }
}

impl ControlPlane {
    pub fn new(runner: ProcessRunner, build: Arc<dyn BuildStep>) -> Self {
        let layout = runner.layout().clone();
        Self {
            store: DescriptorStore::new(layout.clone()),
            layout,
            registry: Registry::new(),
            runner,
            build,
            metrics: Arc::new(ControlMetrics::new()),
        }
    }

    pub fn from_config(config: &MinionConfig) -> Self {
        let layout = config.layout();
        Self::new(config.runner(&layout), config.build_step(&layout))
    }

    pub fn with_metrics(mut self, metrics: Arc<ControlMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn runner(&self) -> &ProcessRunner {
        &self.runner
    }

    pub fn metrics(&self) -> &Arc<ControlMetrics> {
        &self.metrics
    }

    /// Populate the registry from `{root}/svc/*/service.json`.
    ///
    /// Services whose executable is missing are logged and skipped.
    /// Returns the number of services registered.
    pub async fn load_persisted(&self) -> Result<usize, ControlError> {
        let mut loaded = 0;
        for descriptor in self.store.load_all().await? {
            let id = descriptor.id.clone();
            if !self.layout.executable(&id).is_file() {
                tracing::warn!(service_id = id, "Service executable missing, skipping");
                continue;
            }
            match self.registry.put(descriptor).await {
                Ok(()) => loaded += 1,
                Err(e) => tracing::warn!(service_id = id, "Not registering persisted service: {e}"),
            }
        }
        tracing::info!(count = loaded, "Loaded persisted services");
        Ok(loaded)
    }

    /// Snapshot of every installed service, keyed by id.
    pub async fn list(&self) -> BTreeMap<String, ServiceDescriptor> {
        self.registry
            .list()
            .await
            .into_iter()
            .map(|d| (d.id.clone(), d))
            .collect()
    }

    pub async fn exists(&self, id: &str) -> bool {
        self.registry.contains(id).await
    }

    /// Fetch, build, persist and initialise a new service.
    ///
    /// The service becomes visible only after its own `install` hook
    /// succeeds. A failed install leaves its directory behind without a
    /// descriptor, so the id is free for another attempt and is not loaded
    /// at startup.
    pub async fn install(&self, descriptor: ServiceDescriptor) -> Result<String, ControlError> {
        descriptor.validate()?;
        let reservation = self.registry.reserve(&descriptor.id).await?;
        self.metrics.record_install_started();
        tracing::info!(service_id = %descriptor.id, source = %descriptor.source_locator, "Installing service");

        match self.install_reserved(&descriptor).await {
            Ok(output) => {
                reservation.commit(descriptor.clone()).await?;
                self.metrics.record_install_completed();
                tracing::info!(service_id = %descriptor.id, "Service installed");
                Ok(output)
            }
            Err(e) => {
                self.store.discard(&descriptor.id).await;
                reservation.release().await;
                self.metrics.record_install_failed();
                tracing::warn!(service_id = %descriptor.id, kind = ?e.kind(), "Install failed: {e}");
                Err(e)
            }
        }
    }

    async fn install_reserved(&self, descriptor: &ServiceDescriptor) -> Result<String, ControlError> {
        let id = descriptor.id.as_str();
        let service_dir = self.layout.service_dir(id);
        tokio::fs::create_dir_all(&service_dir)
            .await
            .map_err(|e| ControlError::persistence(&service_dir, e))?;

        let ctx = self.build_context(descriptor);
        let fetched = self.build.fetch(&ctx).await?;
        tracing::debug!(service_id = id, step = "fetch", output = %fetched, "Fetch finished");
        let built = self.build.build(&ctx).await?;
        tracing::debug!(service_id = id, step = "build", output = %built, "Build finished");

        if !self.layout.executable(id).is_file() {
            return Err(ControlError::BuildFailure {
                id: id.to_string(),
                step: "build",
                message: format!("no executable at {}", self.layout.executable(id).display()),
                output: built,
            });
        }

        self.store.store(descriptor).await?;
        self.store.store_env(id, &render_env_file(&ctx.env)).await?;

        let params = if descriptor.params.is_null() {
            empty_params()
        } else {
            descriptor.params.clone()
        };
        let output = self.run(descriptor, Command::Install, &params).await?;
        Ok(output.combined())
    }

    /// Run the service's `remove` hook, unregister it and delete its files.
    ///
    /// A failing hook leaves the service installed. Once unregistered, every
    /// cleanup step is attempted; the first cleanup failure is returned but
    /// the service stays unregistered.
    pub async fn remove(&self, id: &str) -> Result<String, ControlError> {
        let mut removal = self.registry.begin_removal(id).await?;
        let descriptor = removal.descriptor().clone();

        let output = match self.run(&descriptor, Command::Remove, &empty_params()).await {
            Ok(output) => output,
            Err(e) => {
                removal.release().await;
                return Err(e);
            }
        };

        removal.commit().await;
        self.metrics.record_removal();
        tracing::info!(service_id = id, "Service unregistered");

        let cleaned = self.cleanup(&descriptor).await;
        removal.release().await;
        cleaned?;
        Ok(output.combined())
    }

    async fn cleanup(&self, descriptor: &ServiceDescriptor) -> Result<(), ControlError> {
        let id = descriptor.id.as_str();
        let mut first_failure = None;

        let ctx = self.build_context(descriptor);
        if let Err(e) = self.build.clean(&ctx).await {
            tracing::warn!(service_id = id, step = "clean", "Cleanup failed: {e}");
            first_failure.get_or_insert(e);
        }

        let mut paths = Vec::new();
        paths.extend(self.layout.fetch_cache(&descriptor.source_locator));
        paths.push(self.layout.legacy_bin(id));
        paths.push(self.layout.service_dir(id));

        for path in paths {
            if let Err(e) = remove_path(&path).await {
                tracing::warn!(service_id = id, path = %path.display(), "Cleanup failed: {e}");
                first_failure.get_or_insert(ControlError::persistence(&path, e));
            }
        }

        match first_failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub async fn status(&self, id: &str) -> Result<String, ControlError> {
        self.command(id, Command::Status).await
    }

    pub async fn start(&self, id: &str) -> Result<String, ControlError> {
        self.command(id, Command::Start).await
    }

    pub async fn stop(&self, id: &str) -> Result<String, ControlError> {
        self.command(id, Command::Stop).await
    }

    /// Sample the service's statistics as a JSON object.
    pub async fn stats(&self, id: &str) -> Result<Params, ControlError> {
        let descriptor = self.registry.get(id).await?;
        let output = self.run(&descriptor, Command::Stats, &empty_params()).await?;
        parse_stats(id, &output.stdout)
    }

    async fn command(&self, id: &str, command: Command) -> Result<String, ControlError> {
        let descriptor = self.registry.get(id).await?;
        let output = self.run(&descriptor, command, &empty_params()).await?;
        Ok(output.combined())
    }

    async fn run(
        &self,
        descriptor: &ServiceDescriptor,
        command: Command,
        params: &Value,
    ) -> Result<RunOutput, ControlError> {
        let result = self.runner.run(descriptor, command, params).await;
        self.metrics.record_run(result.is_ok());
        result
    }

    fn build_context(&self, descriptor: &ServiceDescriptor) -> BuildContext {
        BuildContext {
            descriptor: descriptor.clone(),
            service_dir: self.layout.service_dir(&descriptor.id),
            env: self.runner.env_for(descriptor),
        }
    }
}

/// Whether `status` output reports a running service.
pub fn is_running(status_output: &str) -> bool {
    ServiceStatus::from_output(status_output) == ServiceStatus::Running
}

/// Parse `stats` stdout, which must be a single JSON object.
pub fn parse_stats(id: &str, stdout: &str) -> Result<Params, ControlError> {
    serde_json::from_str(stdout.trim()).map_err(|source| ControlError::ParseFailure {
        id: id.to_string(),
        output: stdout.to_string(),
        source,
    })
}

fn empty_params() -> Value {
    Value::Object(Params::new())
}

async fn remove_path(path: &Path) -> io::Result<()> {
    match tokio::fs::symlink_metadata(path).await {
        Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(path).await,
        Ok(_) => tokio::fs::remove_file(path).await,
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
