use std::path::PathBuf;

use minion_core::StatsEvent;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast::{Receiver, error::RecvError};
use tokio_util::sync::CancellationToken;

/// Where stats events end up.
#[derive(Debug)]
pub enum EventSink {
    /// Append one JSON object per line.
    File { path: PathBuf, file: tokio::fs::File },
    /// Emit at `debug` level.
    Log,
}

impl EventSink {
    pub async fn open(path: Option<PathBuf>) -> std::io::Result<Self> {
        let Some(path) = path else {
            return Ok(EventSink::Log);
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        tracing::info!(path = %path.display(), "Writing stats events");
        Ok(EventSink::File { path, file })
    }

    async fn write(&mut self, event: &StatsEvent) {
        match self {
            EventSink::Log => {
                tracing::debug!(event = %event.event, data = %event.data.trim_end(), "Stats event");
            }
            EventSink::File { path, file } => {
                let line = match serde_json::to_string(event) {
                    Ok(mut line) => {
                        line.push('\n');
                        line
                    }
                    Err(e) => {
                        tracing::warn!(service_id = %event.service_id, "Cannot encode stats event: {e}");
                        return;
                    }
                };
                if let Err(e) = file.write_all(line.as_bytes()).await {
                    tracing::warn!(path = %path.display(), "Cannot write stats event: {e}");
                    return;
                }
                if let Err(e) = file.flush().await {
                    tracing::warn!(path = %path.display(), "Cannot flush stats events: {e}");
                }
            }
        }
    }
}

/// Drain `events` into `sink` until shutdown or until the broadcaster is
/// gone.
pub async fn forward(mut events: Receiver<StatsEvent>, mut sink: EventSink, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            received = events.recv() => match received {
                Ok(event) => sink.write(&event).await,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Stats event consumer lagged");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast;

    #[tokio::test]
    async fn file_sink_writes_json_lines() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("log").join("events.jsonl");
        let sink = EventSink::open(Some(path.clone())).await.unwrap();

        let (tx, rx) = broadcast::channel(8);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(forward(rx, sink, shutdown.clone()));

        tx.send(StatsEvent::new("a", "{\"n\": 1}\n".into())).unwrap();
        tx.send(StatsEvent::new("b", "{}".into())).unwrap();
        drop(tx);
        task.await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let events: Vec<StatsEvent> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event, "stats:a");
        assert_eq!(events[1].service_id, "b");
    }

    #[tokio::test]
    async fn forward_stops_on_shutdown() {
        let (_tx, rx) = broadcast::channel::<StatsEvent>(8);
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        forward(rx, EventSink::Log, shutdown).await;
    }

    #[tokio::test]
    async fn no_path_means_log_sink() {
        assert!(matches!(EventSink::open(None).await.unwrap(), EventSink::Log));
    }
}
