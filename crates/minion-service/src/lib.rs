//! The contract shared by the minion supervisor and the services it manages.
//!
//! A managed service is any executable named `service` inside its service
//! directory. The supervisor invokes it as `service <command>` with the
//! environment described in [`env`] and a JSON parameter object on stdin.
//!
//! Services written in Rust can implement [`ManagedService`] and hand it to
//! [`run`], which decodes the command, reads parameters, and writes the
//! output format the supervisor expects.
//!
//! ```rust,no_run
//! use minion_service::{ManagedService, Params, ServiceError, ServiceStatus};
//!
//! struct Noop;
//!
//! impl ManagedService for Noop {
//!     fn install(&mut self, _params: Params) -> Result<(), ServiceError> { Ok(()) }
//!     fn remove(&mut self) -> Result<(), ServiceError> { Ok(()) }
//!     fn status(&mut self) -> Result<ServiceStatus, ServiceError> { Ok(ServiceStatus::Stopped) }
//!     fn start(&mut self) -> Result<(), ServiceError> { Ok(()) }
//!     fn stop(&mut self) -> Result<(), ServiceError> { Ok(()) }
//!     fn stats(&mut self) -> Result<Params, ServiceError> { Ok(Params::new()) }
//! }
//!
//! fn main() -> std::process::ExitCode {
//!     minion_service::run(Noop)
//! }
//! ```

pub mod command;
pub mod env;
pub mod error;
pub mod sdk;
pub mod stats;
pub mod status;

pub use command::Command;
pub use env::ServiceContext;
pub use error::ServiceError;
pub use sdk::{ManagedService, Params, dispatch, run};
pub use status::ServiceStatus;
