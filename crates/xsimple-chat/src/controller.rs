//! Conversation controller: the only component that touches both stores.
//!
//! A cycle is `start`ed synchronously (validation, intent resolution, the
//! two new log entries) and then driven asynchronously until its source is
//! exhausted, it is cancelled, or the source fails. Every one of those exits,
//! and dropping the driving future, returns the conversation to idle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use xsimple_core::{
    CancelPolicy, ConversationState, CycleId, DomainEvent, IntentResult, ReportPayload,
    Timestamp, XSimpleConfig,
};
use xsimple_stream::{deliver, ChunkSource, StreamError, StreamOutcome, StreamingEngine};

use crate::conversation::ConversationStore;
use crate::error::ChatError;
use crate::intent::IntentResolver;
use crate::report::ReportStore;

type ActiveSlot = Arc<Mutex<Option<(CycleId, CancellationToken)>>>;

fn lock_slot(
    slot: &Mutex<Option<(CycleId, CancellationToken)>>,
) -> MutexGuard<'_, Option<(CycleId, CancellationToken)>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// How a driven cycle ended.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Completed {
        cycle_id: CycleId,
        units: usize,
        report_updated: bool,
    },
    Cancelled {
        cycle_id: CycleId,
        delivered: usize,
        kept_partial: bool,
    },
    Failed {
        cycle_id: CycleId,
        error: StreamError,
    },
}

impl CycleOutcome {
    pub fn cycle_id(&self) -> CycleId {
        match self {
            CycleOutcome::Completed { cycle_id, .. }
            | CycleOutcome::Cancelled { cycle_id, .. }
            | CycleOutcome::Failed { cycle_id, .. } => *cycle_id,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, CycleOutcome::Completed { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, CycleOutcome::Cancelled { .. })
    }
}

/// Returns the conversation to idle if a cycle is dropped unfinished.
#[derive(Debug)]
struct CycleGuard {
    cycle_id: CycleId,
    conversation: Arc<ConversationStore>,
    active: ActiveSlot,
    policy: CancelPolicy,
    armed: bool,
}

impl CycleGuard {
    /// Mark the cycle as settled and release the active slot.
    fn settle(&mut self) {
        self.armed = false;
        let mut slot = lock_slot(&self.active);
        // A newer cycle may already own the slot.
        if slot.as_ref().is_some_and(|(id, _)| *id == self.cycle_id) {
            *slot = None;
        }
    }
}

impl Drop for CycleGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        tracing::warn!(cycle_id = %self.cycle_id, "Cycle dropped before finishing; aborting");
        if let Err(e) = self.conversation.abort_cycle(self.cycle_id, self.policy) {
            tracing::debug!(cycle_id = %self.cycle_id, error = %e, "Dropped cycle was already closed");
        }
        self.settle();
    }
}

/// An accepted submission whose answer has not been streamed yet.
///
/// Dropping it without driving it aborts the cycle.
#[derive(Debug)]
pub struct PendingCycle {
    cycle_id: CycleId,
    intent: IntentResult,
    cancel: CancellationToken,
    guard: CycleGuard,
}

impl PendingCycle {
    pub fn cycle_id(&self) -> CycleId {
        self.cycle_id
    }

    /// The resolved answer and report for this cycle.
    pub fn intent(&self) -> &IntentResult {
        &self.intent
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

/// Session-scoped orchestrator wiring the resolver, the streaming engine,
/// and both stores.
#[derive(Debug)]
pub struct ConversationController {
    resolver: IntentResolver,
    engine: StreamingEngine,
    conversation: Arc<ConversationStore>,
    reports: Arc<ReportStore>,
    events: broadcast::Sender<DomainEvent>,
    cancel_policy: CancelPolicy,
    active: ActiveSlot,
    closed: AtomicBool,
}

impl ConversationController {
    pub fn new(config: &XSimpleConfig) -> Self {
        Self::with_resolver(config, IntentResolver::new())
    }

    pub fn with_resolver(config: &XSimpleConfig, resolver: IntentResolver) -> Self {
        let (events, _) = broadcast::channel(config.events.channel_capacity.max(1));
        Self {
            resolver,
            engine: StreamingEngine::from_config(&config.stream),
            conversation: Arc::new(ConversationStore::new(&config.conversation)),
            reports: Arc::new(ReportStore::new()),
            events,
            cancel_policy: config.conversation.cancel_policy,
            active: Arc::new(Mutex::new(None)),
            closed: AtomicBool::new(false),
        }
    }

    pub fn conversation(&self) -> &Arc<ConversationStore> {
        &self.conversation
    }

    pub fn reports(&self) -> &Arc<ReportStore> {
        &self.reports
    }

    pub fn resolver(&self) -> &IntentResolver {
        &self.resolver
    }

    pub fn cancel_policy(&self) -> CancelPolicy {
        self.cancel_policy
    }

    pub fn snapshot(&self) -> ConversationState {
        self.conversation.snapshot()
    }

    pub fn current_report(&self) -> Option<ReportPayload> {
        self.reports.get_current()
    }

    pub fn is_streaming(&self) -> bool {
        self.conversation.is_streaming()
    }

    pub fn active_cycle(&self) -> Option<CycleId> {
        lock_slot(&self.active).as_ref().map(|(id, _)| *id)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn subscribe_conversation(&self) -> watch::Receiver<ConversationState> {
        self.conversation.subscribe()
    }

    pub fn subscribe_report(&self) -> watch::Receiver<Option<ReportPayload>> {
        self.reports.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<DomainEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: DomainEvent) {
        tracing::trace!(event = event.event_name(), "Publishing event");
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn reject(&self, err: ChatError) -> ChatError {
        tracing::warn!(error = %err, "Submission rejected");
        self.publish(DomainEvent::SubmissionRejected {
            reason: err.to_string(),
            timestamp: Timestamp::now(),
        });
        err
    }

    /// Validate `query` and open a cycle for it without streaming anything.
    pub fn start(&self, query: &str) -> Result<PendingCycle, ChatError> {
        // Held across the closed check and the store submit so `cancel` and
        // `shutdown` never miss a cycle that is streaming.
        let mut slot = lock_slot(&self.active);
        if self.is_closed() {
            drop(slot);
            return Err(self.reject(ChatError::Closed));
        }
        let cycle_id = match self.conversation.submit(query) {
            Ok(id) => id,
            Err(err) => {
                drop(slot);
                return Err(self.reject(err));
            }
        };
        let cancel = CancellationToken::new();
        *slot = Some((cycle_id, cancel.clone()));
        drop(slot);

        let intent = self.resolver.resolve(query);
        tracing::info!(
            cycle_id = %cycle_id,
            intent = %intent.intent,
            has_report = intent.report.is_some(),
            "Submission accepted"
        );
        self.publish(DomainEvent::SubmissionAccepted {
            cycle_id,
            intent: intent.intent,
            query_chars: query.chars().count(),
            timestamp: Timestamp::now(),
        });

        Ok(PendingCycle {
            cycle_id,
            intent,
            cancel,
            guard: CycleGuard {
                cycle_id,
                conversation: Arc::clone(&self.conversation),
                active: Arc::clone(&self.active),
                policy: self.cancel_policy,
                armed: true,
            },
        })
    }

    /// Stream the cycle's canned answer with the configured pacing.
    pub async fn drive(&self, cycle: PendingCycle) -> CycleOutcome {
        let mut source = self.engine.timed_source(&cycle.intent.response_text);
        self.drive_from(cycle, &mut source).await
    }

    /// Stream the cycle's answer from an arbitrary source.
    pub async fn drive_from<S>(&self, cycle: PendingCycle, source: &mut S) -> CycleOutcome
    where
        S: ChunkSource + ?Sized,
    {
        let cycle_id = cycle.cycle_id;
        let started = Instant::now();
        let conversation = &self.conversation;
        let stop = cycle.cancel.clone();

        let result = deliver(
            source,
            |partial| {
                if let Err(e) = conversation.replace_last_content(cycle_id, partial) {
                    tracing::warn!(cycle_id = %cycle_id, error = %e, "Chunk rejected; stopping cycle");
                    stop.cancel();
                }
            },
            &cycle.cancel,
        )
        .await;

        match result {
            Ok(StreamOutcome::Completed { units }) => {
                self.complete(cycle, units, started.elapsed())
            }
            Ok(StreamOutcome::Cancelled { delivered }) => self.cancelled(cycle, delivered),
            Err(error) => self.failed(cycle, error),
        }
    }

    fn complete(&self, mut cycle: PendingCycle, units: usize, elapsed: Duration) -> CycleOutcome {
        let cycle_id = cycle.cycle_id;

        // The report lands before the busy flag clears, so an idle snapshot
        // never precedes its report.
        let report_updated = match cycle.intent.report.take() {
            Some(report) => {
                let title = report.title.clone();
                let points = report.series.len();
                self.reports.set_current(Some(report));
                self.publish(DomainEvent::ReportUpdated {
                    cycle_id,
                    title,
                    points,
                    timestamp: Timestamp::now(),
                });
                true
            }
            None => false,
        };

        if let Err(e) = self.conversation.finish_cycle(cycle_id) {
            tracing::warn!(cycle_id = %cycle_id, error = %e, "Completed cycle was already closed");
        }
        cycle.guard.settle();

        let duration_ms = elapsed.as_millis() as u64;
        tracing::info!(cycle_id = %cycle_id, units, duration_ms, report_updated, "Stream completed");
        self.publish(DomainEvent::StreamCompleted {
            cycle_id,
            units,
            duration_ms,
            timestamp: Timestamp::now(),
        });

        CycleOutcome::Completed {
            cycle_id,
            units,
            report_updated,
        }
    }

    fn cancelled(&self, mut cycle: PendingCycle, delivered: usize) -> CycleOutcome {
        let cycle_id = cycle.cycle_id;
        let kept_partial = self.cancel_policy == CancelPolicy::KeepPartial && delivered > 0;

        match self.conversation.abort_cycle(cycle_id, self.cancel_policy) {
            Ok(removed) => {
                tracing::info!(cycle_id = %cycle_id, delivered, removed, "Stream cancelled")
            }
            Err(e) => {
                tracing::warn!(cycle_id = %cycle_id, error = %e, "Cancelled cycle was already closed")
            }
        }
        cycle.guard.settle();

        self.publish(DomainEvent::StreamCancelled {
            cycle_id,
            delivered,
            kept_partial,
            timestamp: Timestamp::now(),
        });

        CycleOutcome::Cancelled {
            cycle_id,
            delivered,
            kept_partial,
        }
    }

    fn failed(&self, mut cycle: PendingCycle, error: StreamError) -> CycleOutcome {
        let cycle_id = cycle.cycle_id;
        tracing::warn!(cycle_id = %cycle_id, error = %error, "Stream failed; discarding cycle");

        if let Err(e) = self.conversation.abort_cycle(cycle_id, CancelPolicy::Discard) {
            tracing::warn!(cycle_id = %cycle_id, error = %e, "Failed cycle was already closed");
        }
        cycle.guard.settle();

        self.publish(DomainEvent::StreamFailed {
            cycle_id,
            reason: error.to_string(),
            timestamp: Timestamp::now(),
        });

        CycleOutcome::Failed { cycle_id, error }
    }

    /// Submit `query` and drive its cycle to the end on the current task.
    pub async fn submit(&self, query: &str) -> Result<CycleOutcome, ChatError> {
        let cycle = self.start(query)?;
        Ok(self.drive(cycle).await)
    }

    /// Submit `query` and drive its cycle on a spawned task.
    ///
    /// Validation happens before this returns; aborting the returned handle
    /// aborts the cycle.
    pub fn spawn_submit(
        self: &Arc<Self>,
        query: &str,
    ) -> Result<JoinHandle<CycleOutcome>, ChatError> {
        let cycle = self.start(query)?;
        let controller = Arc::clone(self);
        Ok(tokio::spawn(async move { controller.drive(cycle).await }))
    }

    /// Cancel the cycle in flight. Returns whether there was one.
    pub fn cancel(&self) -> bool {
        self.cancel_active().is_some()
    }

    fn cancel_active(&self) -> Option<CycleId> {
        let slot = lock_slot(&self.active);
        let (cycle_id, token) = slot.as_ref()?;
        tracing::info!(cycle_id = %cycle_id, "Cancelling cycle");
        token.cancel();
        Some(*cycle_id)
    }

    /// Clear the log back to the greeting and drop the current report.
    ///
    /// Fails with `Busy` while a cycle is streaming.
    pub fn reset(&self) -> Result<usize, ChatError> {
        let removed = self.conversation.reset()?;
        let previous = self.reports.set_current(None);

        tracing::info!(removed, "Conversation reset");
        self.publish(DomainEvent::ConversationReset {
            removed_messages: removed,
            timestamp: Timestamp::now(),
        });
        if previous.is_some() {
            self.publish(DomainEvent::ReportCleared {
                timestamp: Timestamp::now(),
            });
        }
        Ok(removed)
    }

    /// Cancel any cycle in flight and refuse further submissions.
    ///
    /// Returns the cancelled cycle, if any. Calling it again is a no-op.
    pub fn shutdown(&self) -> Option<CycleId> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return None;
        }
        let cancelled_cycle = self.cancel_active();

        tracing::info!(cancelled_cycle = ?cancelled_cycle, "Session closed");
        self.publish(DomainEvent::SessionClosed {
            cancelled_cycle,
            timestamp: Timestamp::now(),
        });
        cancelled_cycle
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use xsimple_core::Role;
    use xsimple_stream::ChannelSource;

    fn test_config() -> XSimpleConfig {
        let mut config = XSimpleConfig::default();
        config.conversation.greeting = String::new();
        config
    }

    #[test]
    fn test_start_opens_cycle() {
        let controller = ConversationController::new(&test_config());
        let cycle = controller.start("本月销售情况").unwrap();

        assert_eq!(cycle.cycle_id(), CycleId(1));
        assert!(cycle.intent().response_text.contains("销售报表"));
        assert!(controller.is_streaming());
        assert_eq!(controller.active_cycle(), Some(CycleId(1)));
        assert_eq!(controller.snapshot().messages.len(), 2);
    }

    #[test]
    fn test_dropping_pending_cycle_aborts_it() {
        let controller = ConversationController::new(&test_config());
        let cycle = controller.start("销售").unwrap();
        drop(cycle);

        assert!(!controller.is_streaming());
        assert_eq!(controller.active_cycle(), None);
        assert!(controller.snapshot().messages.is_empty());
        assert!(!controller.cancel());
    }

    #[test]
    fn test_start_rejects_while_busy() {
        let controller = ConversationController::new(&test_config());
        let _cycle = controller.start("销售").unwrap();
        let err = controller.start("财务").unwrap_err();
        assert!(matches!(err, ChatError::Busy(CycleId(1))));
        assert_eq!(controller.snapshot().messages.len(), 2);
    }

    #[test]
    fn test_rejection_is_published() {
        let controller = ConversationController::new(&test_config());
        let mut events = controller.subscribe_events();
        assert!(controller.start("   ").is_err());

        let event = events.try_recv().unwrap();
        assert_eq!(event.event_name(), "submission_rejected");
    }

    #[test]
    fn test_zero_capacity_events_channel_is_clamped() {
        let mut config = test_config();
        config.events.channel_capacity = 0;
        let controller = ConversationController::new(&config);
        let mut events = controller.subscribe_events();
        controller.start("你好").unwrap();
        assert_eq!(events.try_recv().unwrap().event_name(), "submission_accepted");
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_streams_full_answer() {
        let controller = ConversationController::new(&test_config());
        let outcome = controller.submit("你好").await.unwrap();

        let expected = controller.resolver().resolve("你好").response_text;
        match outcome {
            CycleOutcome::Completed {
                units,
                report_updated,
                ..
            } => {
                assert_eq!(units, expected.chars().count());
                assert!(!report_updated);
            }
            other => panic!("Expected completion, got {:?}", other),
        }

        let snapshot = controller.snapshot();
        assert!(!snapshot.is_streaming);
        let last = snapshot.last_message().unwrap();
        assert_eq!(last.role, Role::Assistant);
        assert_eq!(last.content, expected);
    }

    #[tokio::test]
    async fn test_channel_source_failure_discards_cycle() {
        let controller = ConversationController::new(&test_config());
        let cycle = controller.start("销售").unwrap();
        let (tx, mut source) = ChannelSource::channel(4);
        tx.send(Ok("好的".to_string())).await.unwrap();
        tx.send(Err(StreamError::Source("connection reset".to_string())))
            .await
            .unwrap();

        let outcome = controller.drive_from(cycle, &mut source).await;
        assert!(matches!(outcome, CycleOutcome::Failed { .. }));
        assert!(!controller.is_streaming());
        assert!(controller.snapshot().messages.is_empty());
        assert!(controller.current_report().is_none());
    }

    #[tokio::test]
    async fn test_shutdown_closes_session() {
        let controller = ConversationController::new(&test_config());
        let mut events = controller.subscribe_events();

        assert_eq!(controller.shutdown(), None);
        assert!(controller.is_closed());
        assert!(matches!(
            controller.submit("销售").await,
            Err(ChatError::Closed)
        ));
        assert_eq!(controller.shutdown(), None);

        assert_eq!(events.try_recv().unwrap().event_name(), "session_closed");
        assert_eq!(events.try_recv().unwrap().event_name(), "submission_rejected");
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_start_waiting_on_slot_sees_shutdown_flag() {
        let controller = ConversationController::new(&test_config());

        std::thread::scope(|scope| {
            let slot = lock_slot(&controller.active);
            let pending = scope.spawn(|| controller.start("销售").map(|c| c.cycle_id()));
            std::thread::sleep(Duration::from_millis(50));
            // Shutdown flips the flag before it reaches the slot.
            controller.closed.store(true, Ordering::SeqCst);
            drop(slot);

            assert!(matches!(pending.join().unwrap(), Err(ChatError::Closed)));
        });
        assert!(!controller.is_streaming());
        assert!(controller.snapshot().messages.is_empty());
    }
}
