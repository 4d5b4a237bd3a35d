//! Service control plane for minion.
//!
//! Provides [`ControlPlane`], the lifecycle facade over installed services,
//! and [`StatsBroadcaster`], the periodic stats sampler. Both share one
//! in-process [`Registry`] and invoke managed services through a
//! [`ProcessRunner`].
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use minion_core::{ControlPlane, MinionConfig, ServiceDescriptor, StatsBroadcaster};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = MinionConfig::load(None)?;
//! let plane = Arc::new(ControlPlane::from_config(&config));
//! plane.layout().init().await?;
//!
//! // Restore services installed in a previous session
//! plane.load_persisted().await?;
//!
//! let descriptor = ServiceDescriptor::new("echo", "example/echo-service")
//!     .with_params(serde_json::json!({"mode": "fast"}));
//! plane.install(descriptor).await?;
//! println!("{}", plane.status("echo").await?);
//!
//! let broadcaster = StatsBroadcaster::new(&plane, config.broadcast.interval(), config.broadcast.capacity);
//! let mut events = broadcaster.subscribe();
//! let shutdown = CancellationToken::new();
//! tokio::spawn(broadcaster.run(shutdown.clone()));
//! let event = events.recv().await?;
//! println!("{}: {}", event.event, event.data);
//! shutdown.cancel();
//! # Ok(())
//! # }
//! ```

pub mod broadcast;
pub mod build;
pub mod config;
pub mod control;
pub mod descriptor;
pub mod env;
pub mod error;
pub mod layout;
pub mod metrics;
pub mod registry;
pub mod runner;
pub mod storage;

#[cfg(all(test, unix))]
mod testing;

pub use broadcast::{StatsBroadcaster, StatsEvent};
pub use build::{BuildContext, BuildStep, CommandBuildStep, PrebuiltBuildStep};
pub use config::{ConfigError, MinionConfig};
pub use control::{ControlPlane, is_running};
pub use descriptor::ServiceDescriptor;
pub use error::{ControlError, ErrorKind};
pub use layout::Layout;
pub use metrics::{ControlMetrics, LoggingMetricsBackend, MetricsBackend, MetricsSnapshot};
pub use registry::Registry;
pub use runner::{ProcessRunner, RunOutput};
pub use storage::DescriptorStore;

pub use minion_service::{Command, Params, ServiceStatus};
