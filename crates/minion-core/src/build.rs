use std::ffi::OsString;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;

use crate::descriptor::ServiceDescriptor;
use crate::error::ControlError;
use crate::layout::SERVICE_EXECUTABLE;

pub type BuildFuture<'a> = Pin<Box<dyn Future<Output = Result<String, ControlError>> + Send + 'a>>;

/// Everything a build step may look at.
#[derive(Debug, Clone)]
pub struct BuildContext {
    pub descriptor: ServiceDescriptor,
    pub service_dir: PathBuf,
    /// Contract environment, identical to what the managed process sees.
    pub env: Vec<(String, OsString)>,
}

/// Produces (and later cleans up) the `service` executable of a service.
///
/// Each step returns its output text, which the caller logs.
pub trait BuildStep: Send + Sync {
    fn fetch<'a>(&'a self, ctx: &'a BuildContext) -> BuildFuture<'a>;
    fn build<'a>(&'a self, ctx: &'a BuildContext) -> BuildFuture<'a>;
    fn clean<'a>(&'a self, ctx: &'a BuildContext) -> BuildFuture<'a>;
}

/// Runs configured argv templates inside the service directory.
///
/// Templates may use `{source}`, `{id}` and `{service_path}`. An empty
/// template skips the step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandBuildStep {
    pub fetch: Vec<String>,
    pub build: Vec<String>,
    pub clean: Vec<String>,
}

impl Default for CommandBuildStep {
    fn default() -> Self {
        Self {
            fetch: argv(&["go", "get", "-u", "{source}"]),
            build: argv(&["go", "build", "-o", SERVICE_EXECUTABLE, "{source}"]),
            clean: argv(&["go", "clean", "{source}"]),
        }
    }
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|p| p.to_string()).collect()
}

impl CommandBuildStep {
    async fn run(
        &self,
        step: &'static str,
        template: &[String],
        ctx: &BuildContext,
    ) -> Result<String, ControlError> {
        let id = ctx.descriptor.id.as_str();
        let args = render(template, ctx);
        let Some((program, rest)) = args.split_first() else {
            tracing::debug!(service_id = id, step, "Build step not configured, skipping");
            return Ok(String::new());
        };

        tracing::info!(service_id = id, step, command = %args.join(" "), "Running build step");
        let output = tokio::process::Command::new(program)
            .args(rest)
            .current_dir(&ctx.service_dir)
            .env_clear()
            .envs(ctx.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| ControlError::BuildFailure {
                id: id.to_string(),
                step,
                message: format!("failed to run {program}: {e}"),
                output: String::new(),
            })?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            tracing::warn!(service_id = id, step, status = %output.status, output = %text, "Build step failed");
            return Err(ControlError::BuildFailure {
                id: id.to_string(),
                step,
                message: format!("{program} exited with {}", output.status),
                output: text,
            });
        }

        tracing::debug!(service_id = id, step, output = %text, "Build step output");
        Ok(text)
    }
}

impl BuildStep for CommandBuildStep {
    fn fetch<'a>(&'a self, ctx: &'a BuildContext) -> BuildFuture<'a> {
        Box::pin(self.run("fetch", &self.fetch, ctx))
    }

    fn build<'a>(&'a self, ctx: &'a BuildContext) -> BuildFuture<'a> {
        Box::pin(self.run("build", &self.build, ctx))
    }

    fn clean<'a>(&'a self, ctx: &'a BuildContext) -> BuildFuture<'a> {
        Box::pin(self.run("clean", &self.clean, ctx))
    }
}

fn render(template: &[String], ctx: &BuildContext) -> Vec<String> {
    let service_path = ctx.service_dir.to_string_lossy();
    template
        .iter()
        .map(|arg| {
            arg.replace("{source}", &ctx.descriptor.source_locator)
                .replace("{id}", &ctx.descriptor.id)
                .replace("{service_path}", &service_path)
        })
        .collect()
}

/// Installs ready-made executables instead of compiling.
///
/// The source locator names a file, relative to `source_root` unless
/// absolute, which is copied into the service directory as `service`.
#[derive(Debug, Clone)]
pub struct PrebuiltBuildStep {
    source_root: PathBuf,
}

impl PrebuiltBuildStep {
    pub fn new(source_root: impl Into<PathBuf>) -> Self {
        Self {
            source_root: source_root.into(),
        }
    }

    pub fn source_root(&self) -> &Path {
        &self.source_root
    }

    async fn install_binary(&self, ctx: &BuildContext) -> Result<String, ControlError> {
        let id = ctx.descriptor.id.as_str();
        let source = self.source_root.join(&ctx.descriptor.source_locator);
        let target = ctx.service_dir.join(SERVICE_EXECUTABLE);
        let failure = |message: String| ControlError::BuildFailure {
            id: id.to_string(),
            step: "build",
            message,
            output: String::new(),
        };

        tokio::fs::copy(&source, &target)
            .await
            .map_err(|e| failure(format!("cannot copy {}: {e}", source.display())))?;
        make_executable(&target)
            .await
            .map_err(|e| failure(format!("cannot mark {} executable: {e}", target.display())))?;

        tracing::info!(service_id = id, path = %source.display(), "Installed prebuilt executable");
        Ok(format!("copied {}\n", source.display()))
    }
}

impl BuildStep for PrebuiltBuildStep {
    fn fetch<'a>(&'a self, _ctx: &'a BuildContext) -> BuildFuture<'a> {
        Box::pin(async { Ok(String::new()) })
    }

    fn build<'a>(&'a self, ctx: &'a BuildContext) -> BuildFuture<'a> {
        Box::pin(self.install_binary(ctx))
    }

    fn clean<'a>(&'a self, _ctx: &'a BuildContext) -> BuildFuture<'a> {
        Box::pin(async { Ok(String::new()) })
    }
}

#[cfg(unix)]
async fn make_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = tokio::fs::metadata(path).await?.permissions();
    perms.set_mode(0o755);
    tokio::fs::set_permissions(path, perms).await
}

#[cfg(not(unix))]
async fn make_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
