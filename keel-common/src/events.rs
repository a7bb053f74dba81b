//! Broadcast channel surfacing substrate lifecycle events to observers.
//!
//! Recovery decisions, rotations, quarantines, and sync progress are emitted
//! as JSON lines. Delivery is lossy: a slow subscriber may miss events, and a
//! writer is never blocked by the bus.

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tokio::sync::broadcast;
use tracing::warn;

const DEFAULT_BUFFER: usize = 256;

/// Event kinds emitted by the durable-state subsystems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A store or audit file was recovered on open (torn tail truncated,
    /// backup adopted, or tmp file promoted).
    Recovery,
    /// An unrecoverable file was moved aside.
    Quarantine,
    /// A log or segment was rotated to an archive name.
    Rotation,
    /// A downstream sync cursor advanced.
    SyncAdvance,
    /// A journal record failed checksum verification during replay.
    ChecksumSkip,
    /// A scheduled task's circuit breaker opened.
    CircuitOpen,
    /// Sideline files older than the retention window were removed.
    SidelineGc,
}

/// Broadcast bus for substrate events (JSON lines).
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<String>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER)
    }
}

impl EventBus {
    /// Create a bus with the provided buffer size.
    ///
    /// The effective buffer is clamped to at least `DEFAULT_BUFFER` to avoid
    /// frequent lag/drop behavior for bursty event streams.
    pub fn new(buffer: usize) -> Self {
        let buffer = buffer.max(1).max(DEFAULT_BUFFER);
        let (sender, _) = broadcast::channel(buffer);
        Self { sender }
    }

    /// Subscribe to the event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.sender.subscribe()
    }

    /// Emit a structured event with payload.
    ///
    /// Callers are expected to pass already-redacted payloads; the bus does
    /// not persist anything itself.
    pub fn emit<T: Serialize>(&self, kind: EventKind, component: &str, data: &T) {
        let payload = json!({
            "event": kind,
            "component": component,
            "data": data,
            "timestamp": Utc::now().to_rfc3339(),
        });
        match serde_json::to_string(&payload) {
            Ok(serialized) => {
                let _ = self.sender.send(serialized);
            }
            Err(err) => warn!(?kind, component, "failed to serialize event: {err}"),
        }
    }
}
