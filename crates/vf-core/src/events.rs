//! Pipeline event bus.
//!
//! [`EventBus`] wraps a `tokio::sync::broadcast` channel with a bounded
//! ring-buffer of recent events so that late subscribers (the CLI `status`
//! view, tests) can catch up on what the workers did.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::ids::JobId;
use crate::job::{JobStatus, StorageTier};

/// Maximum number of events retained in the ring buffer.
const MAX_RECENT_EVENTS: usize = 100;

// ---------------------------------------------------------------------------
// EventPayload
// ---------------------------------------------------------------------------

/// Payload describing what happened.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    // -- Conversion ----------------------------------------------------------
    JobQueued {
        job_id: JobId,
    },
    JobStarted {
        job_id: JobId,
    },
    JobProgress {
        job_id: JobId,
        status: JobStatus,
        progress: u8,
    },
    JobCompleted {
        job_id: JobId,
        tier: StorageTier,
    },
    JobFailed {
        job_id: JobId,
        error: String,
    },

    // -- Tiering -------------------------------------------------------------
    MigrationStarted {
        job_id: JobId,
        total_files: usize,
    },
    MigrationProgress {
        job_id: JobId,
        uploaded: usize,
        total: usize,
    },
    MigrationCompleted {
        job_id: JobId,
        remote_prefix: String,
    },
    MigrationFailed {
        job_id: JobId,
        failed: usize,
        total: usize,
    },

    // -- Reconciliation ------------------------------------------------------
    JobReconciled {
        job_id: JobId,
        manifest: String,
    },
}

impl EventPayload {
    /// The job this event refers to.
    pub fn job_id(&self) -> JobId {
        match self {
            EventPayload::JobQueued { job_id }
            | EventPayload::JobStarted { job_id }
            | EventPayload::JobProgress { job_id, .. }
            | EventPayload::JobCompleted { job_id, .. }
            | EventPayload::JobFailed { job_id, .. }
            | EventPayload::MigrationStarted { job_id, .. }
            | EventPayload::MigrationProgress { job_id, .. }
            | EventPayload::MigrationCompleted { job_id, .. }
            | EventPayload::MigrationFailed { job_id, .. }
            | EventPayload::JobReconciled { job_id, .. } => *job_id,
        }
    }
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// A timestamped event ready for broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique event identifier.
    pub id: Uuid,
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
    /// What happened.
    pub payload: EventPayload,
}

impl Event {
    /// Create a new event with a fresh UUID and the current timestamp.
    pub fn new(payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            payload,
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Broadcast channel with a bounded ring buffer of recent events.
pub struct EventBus {
    tx: broadcast::Sender<Event>,
    recent: RwLock<VecDeque<Event>>,
}

impl EventBus {
    /// Create a new event bus.
    ///
    /// `capacity` controls the broadcast channel buffer size (not the ring
    /// buffer, which is always [`MAX_RECENT_EVENTS`]).
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            recent: RwLock::new(VecDeque::with_capacity(MAX_RECENT_EVENTS)),
        }
    }

    /// Subscribe to the broadcast channel.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Broadcast an event to all current subscribers and store it in the
    /// ring buffer.
    pub fn broadcast(&self, payload: EventPayload) {
        let event = Event::new(payload);

        {
            let mut recent = self.recent.write();
            if recent.len() >= MAX_RECENT_EVENTS {
                recent.pop_back();
            }
            recent.push_front(event.clone());
        }

        // No subscribers is fine.
        let _ = self.tx.send(event);
    }

    /// Return the `n` most recent events (newest first).
    pub fn recent_events(&self, n: usize) -> Vec<Event> {
        let recent = self.recent.read();
        recent.iter().take(n).cloned().collect()
    }

    /// Recent events for a single job, newest first.
    pub fn recent_for_job(&self, job_id: JobId) -> Vec<Event> {
        let recent = self.recent.read();
        recent
            .iter()
            .filter(|e| e.payload.job_id() == job_id)
            .cloned()
            .collect()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
