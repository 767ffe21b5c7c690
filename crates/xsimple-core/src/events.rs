use serde::{Deserialize, Serialize};

use crate::types::{CycleId, Intent, Timestamp};

/// All domain events a conversation session can emit.
///
/// Events are published by the conversation controller after state changes
/// and consumed by:
/// - The binary's event logger
/// - Presentation layers that want lifecycle notices without diffing snapshots
#[derive(Clone, Debug, Serialize, Deserialize)]
#[non_exhaustive]
pub enum DomainEvent {
    // =========================================================================
    // Session Lifecycle Events
    // =========================================================================
    /// The conversation log was cleared back to the greeting.
    ConversationReset {
        removed_messages: usize,
        timestamp: Timestamp,
    },

    /// The session was torn down.
    SessionClosed {
        cancelled_cycle: Option<CycleId>,
        timestamp: Timestamp,
    },

    // =========================================================================
    // Submission Events
    // =========================================================================
    /// A query was accepted and a streaming cycle began.
    SubmissionAccepted {
        cycle_id: CycleId,
        intent: Intent,
        query_chars: usize,
        timestamp: Timestamp,
    },

    /// A query was rejected without touching the log.
    SubmissionRejected {
        reason: String,
        timestamp: Timestamp,
    },

    // =========================================================================
    // Streaming Events
    // =========================================================================
    /// Every unit of a cycle's response was delivered.
    StreamCompleted {
        cycle_id: CycleId,
        units: usize,
        duration_ms: u64,
        timestamp: Timestamp,
    },

    /// A cycle was cancelled before its last unit.
    StreamCancelled {
        cycle_id: CycleId,
        delivered: usize,
        kept_partial: bool,
        timestamp: Timestamp,
    },

    /// The chunk source failed mid-cycle; the cycle was discarded.
    StreamFailed {
        cycle_id: CycleId,
        reason: String,
        timestamp: Timestamp,
    },

    // =========================================================================
    // Report Events
    // =========================================================================
    /// A new current report replaced the previous one.
    ReportUpdated {
        cycle_id: CycleId,
        title: String,
        points: usize,
        timestamp: Timestamp,
    },

    /// The current report slot was emptied.
    ReportCleared { timestamp: Timestamp },
}

impl DomainEvent {
    /// Returns the timestamp of the event.
    pub fn timestamp(&self) -> Timestamp {
        match self {
            DomainEvent::ConversationReset { timestamp, .. }
            | DomainEvent::SessionClosed { timestamp, .. }
            | DomainEvent::SubmissionAccepted { timestamp, .. }
            | DomainEvent::SubmissionRejected { timestamp, .. }
            | DomainEvent::StreamCompleted { timestamp, .. }
            | DomainEvent::StreamCancelled { timestamp, .. }
            | DomainEvent::StreamFailed { timestamp, .. }
            | DomainEvent::ReportUpdated { timestamp, .. }
            | DomainEvent::ReportCleared { timestamp } => *timestamp,
        }
    }

    /// Returns a human-readable event name for logging.
    pub fn event_name(&self) -> &'static str {
        match self {
            DomainEvent::ConversationReset { .. } => "conversation_reset",
            DomainEvent::SessionClosed { .. } => "session_closed",
            DomainEvent::SubmissionAccepted { .. } => "submission_accepted",
            DomainEvent::SubmissionRejected { .. } => "submission_rejected",
            DomainEvent::StreamCompleted { .. } => "stream_completed",
            DomainEvent::StreamCancelled { .. } => "stream_cancelled",
            DomainEvent::StreamFailed { .. } => "stream_failed",
            DomainEvent::ReportUpdated { .. } => "report_updated",
            DomainEvent::ReportCleared { .. } => "report_cleared",
        }
    }

    /// The cycle the event refers to, for cycle-scoped events.
    pub fn cycle_id(&self) -> Option<CycleId> {
        match self {
            DomainEvent::SubmissionAccepted { cycle_id, .. }
            | DomainEvent::StreamCompleted { cycle_id, .. }
            | DomainEvent::StreamCancelled { cycle_id, .. }
            | DomainEvent::StreamFailed { cycle_id, .. }
            | DomainEvent::ReportUpdated { cycle_id, .. } => Some(*cycle_id),
            DomainEvent::SessionClosed {
                cancelled_cycle, ..
            } => *cancelled_cycle,
            _ => None,
        }
    }
}
