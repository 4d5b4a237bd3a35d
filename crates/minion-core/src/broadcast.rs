use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use minion_service::{Command, Params};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

use crate::control::ControlPlane;
use crate::metrics::ControlMetrics;
use crate::registry::Registry;
use crate::runner::ProcessRunner;

pub const DEFAULT_PERIOD: Duration = Duration::from_secs(1);
pub const DEFAULT_CAPACITY: usize = 256;

/// One successful stats sample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsEvent {
    /// `stats:<id>`
    pub event: String,
    pub service_id: String,
    /// Raw stdout of the `stats` command.
    pub data: String,
    pub sampled_at: DateTime<Utc>,
}

impl StatsEvent {
    pub fn new(service_id: &str, data: String) -> Self {
        Self {
            event: format!("stats:{service_id}"),
            service_id: service_id.to_string(),
            data,
            sampled_at: Utc::now(),
        }
    }
}

/// Periodically samples `stats` from every registered service.
///
/// Each tick works on a snapshot of the registry taken at the start of the
/// tick, so installs and removals never wait for sampling. Services are
/// sampled one after another; a failing service is logged and skipped.
pub struct StatsBroadcaster {
    registry: Registry,
    runner: ProcessRunner,
    metrics: Arc<ControlMetrics>,
    sender: broadcast::Sender<StatsEvent>,
    period: Duration,
}

impl StatsBroadcaster {
    pub fn new(plane: &ControlPlane, period: Duration, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            registry: plane.registry().clone(),
            runner: plane.runner().clone(),
            metrics: Arc::clone(plane.metrics()),
            sender,
            period,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatsEvent> {
        self.sender.subscribe()
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Sample every registered service once. Returns the number of events
    /// emitted.
    pub async fn tick(&self) -> usize {
        let snapshot = self.registry.list().await;
        let empty = serde_json::Value::Object(Params::new());
        let mut emitted = 0;

        for descriptor in snapshot {
            let id = descriptor.id.as_str();
            let result = self.runner.run(&descriptor, Command::Stats, &empty).await;
            self.metrics.record_run(result.is_ok());
            self.metrics.record_stats_sample(result.is_ok());
            match result {
                Ok(output) => {
                    // stdout only: services log to stderr.
                    // No subscribers is not an error; the sample is dropped.
                    if self.sender.send(StatsEvent::new(id, output.stdout)).is_err() {
                        tracing::trace!(service_id = id, "No stats subscribers");
                    }
                    emitted += 1;
                }
                Err(e) => {
                    tracing::warn!(service_id = id, "Stats sampling failed: {e}");
                }
            }
        }
        emitted
    }

    /// Tick every period until `shutdown` fires. A tick in progress is
    /// abandoned on shutdown, killing its child process.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(period = ?self.period, "Stats broadcaster started");

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                emitted = self.tick() => tracing::trace!(emitted, "Stats tick finished"),
            }
        }

        tracing::info!("Stats broadcaster stopped");
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::build::PrebuiltBuildStep;
    use crate::descriptor::ServiceDescriptor;
    use crate::env::EnvPolicy;
    use crate::layout::Layout;
    use crate::testing::write_script;
    use tempfile::TempDir;

    async fn plane_with(tmp: &TempDir, services: &[(&str, &str)]) -> ControlPlane {
        let layout = Layout::new(tmp.path());
        let runner = ProcessRunner::new(layout.clone(), EnvPolicy::for_layout(&layout));
        let plane = ControlPlane::new(runner, Arc::new(PrebuiltBuildStep::new(tmp.path())));
        for (id, script) in services {
            write_script(&layout.executable(id), script);
            plane
                .registry()
                .put(ServiceDescriptor::new(*id, "mock"))
                .await
                .unwrap();
        }
        plane
    }

    #[tokio::test]
    async fn failing_service_does_not_block_others() {
        let tmp = TempDir::new().unwrap();
        let plane = plane_with(
            &tmp,
            &[
                ("bad", "echo broken >&2; exit 1"),
                ("good", r#"echo '{"uptime": 42}'"#),
            ],
        )
        .await;
        let broadcaster = StatsBroadcaster::new(&plane, DEFAULT_PERIOD, DEFAULT_CAPACITY);
        let mut events = broadcaster.subscribe();

        for _ in 0..2 {
            assert_eq!(broadcaster.tick().await, 1);
            let event = events.try_recv().unwrap();
            assert_eq!(event.event, "stats:good");
            assert_eq!(event.service_id, "good");
            assert_eq!(event.data, "{\"uptime\": 42}\n");
            assert!(events.try_recv().is_err());
        }

        let snap = plane.metrics().snapshot();
        assert_eq!(snap.stats_samples, 2);
        assert_eq!(snap.stats_failures, 2);
    }

    #[tokio::test]
    async fn stderr_stays_out_of_event_data() {
        let tmp = TempDir::new().unwrap();
        let plane = plane_with(
            &tmp,
            &[("noisy", r#"echo 'sampling...' >&2; echo '{"uptime": 1}'"#)],
        )
        .await;
        let broadcaster = StatsBroadcaster::new(&plane, DEFAULT_PERIOD, DEFAULT_CAPACITY);
        let mut events = broadcaster.subscribe();

        assert_eq!(broadcaster.tick().await, 1);
        let event = events.try_recv().unwrap();
        assert_eq!(event.data, "{\"uptime\": 1}\n");
        let parsed: serde_json::Value = serde_json::from_str(&event.data).unwrap();
        assert_eq!(parsed["uptime"], 1);
    }

    #[tokio::test]
    async fn tick_without_subscribers_still_counts() {
        let tmp = TempDir::new().unwrap();
        let plane = plane_with(&tmp, &[("good", "echo '{}'")]).await;
        let broadcaster = StatsBroadcaster::new(&plane, DEFAULT_PERIOD, DEFAULT_CAPACITY);
        assert_eq!(broadcaster.tick().await, 1);
    }

    #[tokio::test]
    async fn tick_follows_registry_mutations() {
        let tmp = TempDir::new().unwrap();
        let plane = plane_with(&tmp, &[("a", "echo '{}'"), ("b", "echo '{}'")]).await;
        let broadcaster = StatsBroadcaster::new(&plane, DEFAULT_PERIOD, DEFAULT_CAPACITY);

        assert_eq!(broadcaster.tick().await, 2);
        plane.registry().remove("a").await.unwrap();
        assert_eq!(broadcaster.tick().await, 1);
    }

    #[tokio::test]
    async fn run_emits_until_cancelled() {
        let tmp = TempDir::new().unwrap();
        let plane = plane_with(&tmp, &[("good", "echo '{\"n\": 1}'")]).await;
        let broadcaster = StatsBroadcaster::new(&plane, Duration::from_millis(20), 8);
        let mut events = broadcaster.subscribe();

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(broadcaster.run(shutdown.clone()));

        for _ in 0..2 {
            let event = tokio::time::timeout(Duration::from_secs(10), events.recv())
                .await
                .expect("event within timeout")
                .unwrap();
            assert_eq!(event.service_id, "good");
        }

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(10), handle)
            .await
            .expect("broadcaster stops after cancel")
            .unwrap();
    }

    #[test]
    fn event_serializes_with_tag() {
        let event = StatsEvent::new("echo", "{}".into());
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "stats:echo");
        assert_eq!(json["service_id"], "echo");
        assert!(json["sampled_at"].is_string());
    }
}
