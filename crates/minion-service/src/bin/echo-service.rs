//! Reference managed service.
//!
//! Keeps its state in `echo-state.json` inside the service directory and
//! echoes its install parameters back through `stats`.

use std::path::PathBuf;
use std::process::ExitCode;

use minion_service::{ManagedService, Params, ServiceContext, ServiceError, ServiceStatus};
use serde::{Deserialize, Serialize};
use tracing_subscriber::{EnvFilter, fmt};

const STATE_FILE: &str = "echo-state.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct EchoState {
    params: Params,
    running: bool,
    starts: u64,
}

struct EchoService {
    state_path: PathBuf,
}

impl EchoService {
    fn load(&self) -> Result<EchoState, ServiceError> {
        match std::fs::read_to_string(&self.state_path) {
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(EchoState::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, state: &EchoState) -> Result<(), ServiceError> {
        std::fs::write(&self.state_path, serde_json::to_vec_pretty(state)?)?;
        Ok(())
    }
}

impl ManagedService for EchoService {
    fn install(&mut self, params: Params) -> Result<(), ServiceError> {
        self.save(&EchoState {
            params,
            ..Default::default()
        })
    }

    fn remove(&mut self) -> Result<(), ServiceError> {
        match std::fs::remove_file(&self.state_path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    fn status(&mut self) -> Result<ServiceStatus, ServiceError> {
        Ok(if self.load()?.running {
            ServiceStatus::Running
        } else {
            ServiceStatus::Stopped
        })
    }

    fn start(&mut self) -> Result<(), ServiceError> {
        let mut state = self.load()?;
        state.running = true;
        state.starts += 1;
        self.save(&state)
    }

    fn stop(&mut self) -> Result<(), ServiceError> {
        let mut state = self.load()?;
        state.running = false;
        self.save(&state)
    }

    fn stats(&mut self) -> Result<Params, ServiceError> {
        let state = self.load()?;
        let mut stats = state.params;
        stats.insert("running".into(), state.running.into());
        stats.insert("starts".into(), state.starts.into());
        Ok(stats)
    }
}

fn main() -> ExitCode {
    fmt()
        .with_env_filter(EnvFilter::from_env("ECHO_SERVICE_LOG"))
        .with_writer(std::io::stderr)
        .init();

    let ctx = match ServiceContext::from_env() {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    minion_service::run(EchoService {
        state_path: ctx.service_path.join(STATE_FILE),
    })
}
