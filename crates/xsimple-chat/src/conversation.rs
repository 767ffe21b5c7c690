//! Conversation log with a single streaming cycle at a time.
//!
//! Writers are serialized by an internal mutex holding the phase machine;
//! the log itself lives in a `watch` channel so every mutation is published
//! to subscribers as one whole snapshot.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use xsimple_core::config::ConversationConfig;
use xsimple_core::{CancelPolicy, ConversationState, CycleId, Message};

use crate::error::ChatError;
use crate::state::ConversationPhase;

#[derive(Debug)]
struct Inner {
    phase: ConversationPhase,
    next_cycle: u64,
    /// Log length before the active cycle appended its two messages.
    cycle_start: usize,
}

/// Ordered message log plus the streaming flag.
#[derive(Debug)]
pub struct ConversationStore {
    inner: Mutex<Inner>,
    state: watch::Sender<ConversationState>,
    greeting: String,
    max_query_chars: Option<usize>,
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new(&ConversationConfig::default())
    }
}

impl ConversationStore {
    pub fn new(config: &ConversationConfig) -> Self {
        let greeting = config.greeting.clone();
        let (state, _) = watch::channel(Self::initial_state(&greeting));
        Self {
            inner: Mutex::new(Inner {
                phase: ConversationPhase::Idle,
                next_cycle: 1,
                cycle_start: 0,
            }),
            state,
            greeting,
            max_query_chars: config.max_query_chars,
        }
    }

    fn initial_state(greeting: &str) -> ConversationState {
        let mut state = ConversationState::default();
        if !greeting.is_empty() {
            state.messages.push(Message::assistant(greeting));
        }
        state
    }

    /// The phase data is updated in single assignments, so a panic in
    /// another writer cannot leave it half-written.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Conversation lock was poisoned; recovering");
            PoisonError::into_inner(poisoned)
        })
    }

    /// Current snapshot of the log.
    pub fn snapshot(&self) -> ConversationState {
        self.state.borrow().clone()
    }

    /// Feed of snapshots. Receivers should clone out of `borrow()` promptly;
    /// holding the borrow blocks writers.
    pub fn subscribe(&self) -> watch::Receiver<ConversationState> {
        self.state.subscribe()
    }

    pub fn is_streaming(&self) -> bool {
        self.lock().phase.is_streaming()
    }

    pub fn active_cycle(&self) -> Option<CycleId> {
        self.lock().phase.active_cycle()
    }

    pub fn phase(&self) -> ConversationPhase {
        self.lock().phase
    }

    pub fn message_count(&self) -> usize {
        self.state.borrow().messages.len()
    }

    /// Start a streaming cycle for `query`.
    ///
    /// Appends the user message and an empty assistant placeholder in one
    /// snapshot. Rejected submissions leave the log untouched.
    pub fn submit(&self, query: &str) -> Result<CycleId, ChatError> {
        let mut inner = self.lock();

        if let Some(active) = inner.phase.active_cycle() {
            return Err(ChatError::Busy(active));
        }
        if query.trim().is_empty() {
            return Err(ChatError::EmptyQuery);
        }
        if let Some(limit) = self.max_query_chars {
            if query.chars().count() > limit {
                return Err(ChatError::QueryTooLong(limit));
            }
        }

        let cycle_id = CycleId(inner.next_cycle);
        inner.phase.transition(ConversationPhase::Streaming { cycle_id })?;
        inner.next_cycle += 1;
        inner.cycle_start = self.message_count();

        self.state.send_modify(|state| {
            state.messages.push(Message::user(query));
            state.messages.push(Message::assistant(""));
            state.is_streaming = true;
            state.active_cycle = Some(cycle_id);
        });

        tracing::debug!(cycle_id = %cycle_id, "Cycle opened");
        Ok(cycle_id)
    }

    /// Replace the placeholder's text with `content`.
    ///
    /// Fails with `StaleCycle` unless `cycle_id` is the cycle in flight.
    pub fn replace_last_content(&self, cycle_id: CycleId, content: &str) -> Result<(), ChatError> {
        let inner = self.lock();
        inner.phase.ensure_active(cycle_id)?;

        self.state.send_modify(|state| {
            if let Some(last) = state.messages.last_mut() {
                last.content.clear();
                last.content.push_str(content);
            }
        });
        Ok(())
    }

    /// Freeze the placeholder and return to idle.
    pub fn finish_cycle(&self, cycle_id: CycleId) -> Result<(), ChatError> {
        let mut inner = self.lock();
        inner.phase.ensure_active(cycle_id)?;
        inner.phase.transition(ConversationPhase::Idle)?;

        self.state.send_modify(|state| {
            state.is_streaming = false;
            state.active_cycle = None;
        });
        Ok(())
    }

    /// End a cycle that did not complete and return to idle.
    ///
    /// `Discard` rolls the log back to its length before the submission.
    /// `KeepPartial` keeps the user message and whatever text was delivered;
    /// a placeholder that never received text is dropped. Returns the number
    /// of messages removed.
    pub fn abort_cycle(&self, cycle_id: CycleId, policy: CancelPolicy) -> Result<usize, ChatError> {
        let mut inner = self.lock();
        inner.phase.ensure_active(cycle_id)?;
        inner.phase.transition(ConversationPhase::Idle)?;
        let cycle_start = inner.cycle_start;

        let mut removed = 0;
        self.state.send_modify(|state| {
            let before = state.messages.len();
            match policy {
                CancelPolicy::Discard => state.messages.truncate(cycle_start),
                CancelPolicy::KeepPartial => {
                    if state.messages.last().is_some_and(|m| m.content.is_empty()) {
                        state.messages.pop();
                    }
                }
            }
            removed = before - state.messages.len();
            state.is_streaming = false;
            state.active_cycle = None;
        });

        tracing::debug!(cycle_id = %cycle_id, ?policy, removed, "Cycle aborted");
        Ok(removed)
    }

    /// Clear the log back to the greeting. Only allowed while idle.
    ///
    /// Returns the number of messages removed, not counting the greeting.
    pub fn reset(&self) -> Result<usize, ChatError> {
        let inner = self.lock();
        if let Some(active) = inner.phase.active_cycle() {
            return Err(ChatError::Busy(active));
        }

        let fresh = Self::initial_state(&self.greeting);
        let kept = fresh.messages.len();
        let previous = self.state.send_replace(fresh);
        Ok(previous.messages.len().saturating_sub(kept))
    }
}

// =============================================================================
// Tests
// =============================================================================
