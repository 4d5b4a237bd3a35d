use std::ffi::OsString;
use std::io;
use std::process::Stdio;
use std::time::Duration;

use minion_service::Command;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command as ProcessCommand};

use crate::descriptor::ServiceDescriptor;
use crate::env::{EnvPolicy, service_env};
use crate::error::ControlError;
use crate::layout::Layout;

const SPAWN_RETRIES: u32 = 10;
const SPAWN_RETRY_DELAY: Duration = Duration::from_millis(25);

/// Output captured from a successful managed-process invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOutput {
    pub stdout: String,
    pub stderr: String,
}

impl RunOutput {
    /// stdout followed by stderr.
    pub fn combined(&self) -> String {
        let mut text = self.stdout.clone();
        text.push_str(&self.stderr);
        text
    }
}

/// Invokes managed service executables under the subprocess contract.
///
/// `{service_dir}/service <command>` runs with the service directory as its
/// working directory, the contract environment, and the JSON-encoded
/// parameters on stdin. Without a configured timeout a hung child blocks
/// the caller until it exits.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    layout: Layout,
    env: EnvPolicy,
    timeout: Option<Duration>,
}

impl ProcessRunner {
    pub fn new(layout: Layout, env: EnvPolicy) -> Self {
        Self {
            layout,
            env,
            timeout: None,
        }
    }

    /// Bound every invocation; the child is killed when the limit expires.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn env_for(&self, descriptor: &ServiceDescriptor) -> Vec<(String, OsString)> {
        service_env(&self.layout, &self.env, descriptor)
    }

    pub async fn run(
        &self,
        descriptor: &ServiceDescriptor,
        command: Command,
        params: &serde_json::Value,
    ) -> Result<RunOutput, ControlError> {
        let id = descriptor.id.as_str();
        let executable = self.layout.executable(id);
        let input = serde_json::to_vec(params)?;

        tracing::info!(service_id = id, %command, path = %executable.display(), "Executing service command");
        tracing::debug!(service_id = id, %command, stdin = %String::from_utf8_lossy(&input), "Service command input");

        let mut process = ProcessCommand::new(&executable);
        process
            .arg(command.as_str())
            .current_dir(self.layout.service_dir(id))
            .env_clear()
            .envs(self.env_for(descriptor))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = spawn(&mut process).await.map_err(|e| {
            run_failure(
                id,
                command,
                format!("failed to launch {}: {e}", executable.display()),
                String::new(),
            )
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            // A child that exits without reading stdin closes the pipe first.
            if let Err(e) = stdin.write_all(&input).await
                && e.kind() != io::ErrorKind::BrokenPipe
            {
                return Err(run_failure(id, command, format!("failed to write stdin: {e}"), String::new()));
            }
        }

        let waited = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!(service_id = id, %command, ?limit, "Service command timed out");
                    return Err(run_failure(
                        id,
                        command,
                        format!("timed out after {limit:?}"),
                        String::new(),
                    ));
                }
            },
            None => child.wait_with_output().await,
        };

        let output = waited
            .map_err(|e| run_failure(id, command, format!("failed to collect output: {e}"), String::new()))?;

        let captured = RunOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if !output.status.success() {
            let combined = captured.combined();
            tracing::warn!(service_id = id, %command, status = %output.status, output = %combined, "Service command failed");
            return Err(run_failure(
                id,
                command,
                format!("exited with {}", output.status),
                combined,
            ));
        }

        tracing::debug!(service_id = id, %command, output = %captured.combined(), "Service command succeeded");
        Ok(captured)
    }
}

/// Spawn, retrying while the kernel still considers a freshly written
/// executable busy.
async fn spawn(process: &mut ProcessCommand) -> io::Result<Child> {
    let mut attempt = 0;
    loop {
        match process.spawn() {
            Err(e) if e.kind() == io::ErrorKind::ExecutableFileBusy && attempt < SPAWN_RETRIES => {
                attempt += 1;
                tokio::time::sleep(SPAWN_RETRY_DELAY).await;
            }
            result => return result,
        }
    }
}

fn run_failure(id: &str, command: Command, message: String, output: String) -> ControlError {
    ControlError::RunFailure {
        id: id.to_string(),
        command,
        message,
        output,
    }
}
