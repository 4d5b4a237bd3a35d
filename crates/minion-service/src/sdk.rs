use std::io::{Read, Write};
use std::process::ExitCode;

use crate::command::Command;
use crate::error::ServiceError;
use crate::status::ServiceStatus;

/// Free-form key/value document used for install parameters and stats.
pub type Params = serde_json::Map<String, serde_json::Value>;

/// Lifecycle hooks of a managed service.
///
/// Each method corresponds to one [`Command`]. Returning an error makes the
/// process exit non-zero, which the supervisor reports as a run failure.
pub trait ManagedService {
    fn install(&mut self, params: Params) -> Result<(), ServiceError>;
    fn remove(&mut self) -> Result<(), ServiceError>;
    fn status(&mut self) -> Result<ServiceStatus, ServiceError>;
    fn start(&mut self) -> Result<(), ServiceError>;
    fn stop(&mut self) -> Result<(), ServiceError>;
    /// Current statistics. Written to stdout as one JSON object.
    fn stats(&mut self) -> Result<Params, ServiceError>;
}

/// Execute one command against `service`.
///
/// `input` is the process's stdin (a JSON object for `install`, ignored
/// otherwise) and `output` its stdout.
pub fn dispatch<S, R, W>(
    service: &mut S,
    command: Command,
    mut input: R,
    mut output: W,
) -> Result<(), ServiceError>
where
    S: ManagedService + ?Sized,
    R: Read,
    W: Write,
{
    tracing::debug!(%command, "Dispatching service command");
    match command {
        Command::Install => {
            let mut raw = String::new();
            input.read_to_string(&mut raw)?;
            service.install(decode_params(&raw)?)
        }
        Command::Remove => service.remove(),
        Command::Status => {
            let status = service.status()?;
            writeln!(output, "status: {status}")?;
            Ok(())
        }
        Command::Start => service.start(),
        Command::Stop => service.stop(),
        Command::Stats => {
            let stats = service.stats()?;
            serde_json::to_writer(&mut output, &stats)?;
            writeln!(output)?;
            Ok(())
        }
    }
}

/// Process entry point for a managed service binary.
///
/// Reads the command from the first argument, wires stdin/stdout, and maps
/// any error to `error: <message>` on stderr with exit status 1.
pub fn run<S: ManagedService>(mut service: S) -> ExitCode {
    let result = std::env::args()
        .nth(1)
        .ok_or(ServiceError::MissingCommand)
        .and_then(|arg| arg.parse::<Command>())
        .and_then(|command| {
            dispatch(
                &mut service,
                command,
                std::io::stdin().lock(),
                std::io::stdout().lock(),
            )
        });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn decode_params(raw: &str) -> Result<Params, ServiceError> {
    if raw.trim().is_empty() {
        return Ok(Params::new());
    }
    match serde_json::from_str::<serde_json::Value>(raw)? {
        serde_json::Value::Object(map) => Ok(map),
        serde_json::Value::Null => Ok(Params::new()),
        other => Err(ServiceError::InvalidParams(format!(
            "expected a JSON object, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        installed: Option<Params>,
        running: bool,
        fail_stop: bool,
    }

    impl ManagedService for Recorder {
        fn install(&mut self, params: Params) -> Result<(), ServiceError> {
            self.installed = Some(params);
            Ok(())
        }

        fn remove(&mut self) -> Result<(), ServiceError> {
            self.installed = None;
            Ok(())
        }

        fn status(&mut self) -> Result<ServiceStatus, ServiceError> {
            Ok(if self.running {
                ServiceStatus::Running
            } else {
                ServiceStatus::Stopped
            })
        }

        fn start(&mut self) -> Result<(), ServiceError> {
            self.running = true;
            Ok(())
        }

        fn stop(&mut self) -> Result<(), ServiceError> {
            if self.fail_stop {
                return Err(ServiceError::Failed("refusing to stop".into()));
            }
            self.running = false;
            Ok(())
        }

        fn stats(&mut self) -> Result<Params, ServiceError> {
            let mut stats = Params::new();
            stats.insert("running".into(), self.running.into());
            Ok(stats)
        }
    }

    fn exec(service: &mut Recorder, command: Command, stdin: &str) -> Result<String, ServiceError> {
        let mut out = Vec::new();
        dispatch(service, command, stdin.as_bytes(), &mut out)?;
        Ok(String::from_utf8(out).unwrap())
    }

    #[test]
    fn install_reads_params_from_stdin() {
        let mut svc = Recorder::default();
        exec(&mut svc, Command::Install, r#"{"mode":"fast"}"#).unwrap();
        assert_eq!(svc.installed.unwrap()["mode"], "fast");
    }

    #[test]
    fn install_accepts_empty_stdin() {
        let mut svc = Recorder::default();
        exec(&mut svc, Command::Install, "").unwrap();
        assert!(svc.installed.unwrap().is_empty());
    }

    #[test]
    fn install_rejects_non_object_params() {
        let mut svc = Recorder::default();
        let err = exec(&mut svc, Command::Install, "[1, 2]").unwrap_err();
        assert!(matches!(err, ServiceError::InvalidParams(_)));
    }

    #[test]
    fn status_prints_status_line() {
        let mut svc = Recorder::default();
        assert_eq!(exec(&mut svc, Command::Status, "").unwrap(), "status: stopped\n");
        exec(&mut svc, Command::Start, "").unwrap();
        assert_eq!(exec(&mut svc, Command::Status, "").unwrap(), "status: running\n");
    }

    #[test]
    fn stats_prints_json_object() {
        let mut svc = Recorder::default();
        let out = exec(&mut svc, Command::Stats, "").unwrap();
        let parsed: Params = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed["running"], false);
    }

    #[test]
    fn hook_errors_propagate() {
        let mut svc = Recorder {
            fail_stop: true,
            ..Default::default()
        };
        let err = exec(&mut svc, Command::Stop, "").unwrap_err();
        assert_eq!(err.to_string(), "refusing to stop");
    }
}
