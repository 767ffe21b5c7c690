//! Terminal view: follows the conversation, report, and event feeds and
//! writes them to stdout.

use std::io::Write;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use xsimple_chat::ConversationController;
use xsimple_core::{ConversationState, DomainEvent, ReportPayload};

use crate::render::{render_report, AnswerPrinter};

fn emit(text: &str) {
    let mut stdout = std::io::stdout().lock();
    let _ = stdout.write_all(text.as_bytes());
    let _ = stdout.flush();
}

/// Text to show for an event, if it is one the user should see.
fn notice(event: &DomainEvent) -> Option<String> {
    match event {
        DomainEvent::StreamCancelled {
            delivered,
            kept_partial,
            ..
        } => Some(if *kept_partial {
            format!("[cancelled after {} units; partial answer kept]\n", delivered)
        } else {
            "[cancelled]\n".to_string()
        }),
        DomainEvent::StreamFailed { reason, .. } => Some(format!("[failed: {}]\n", reason)),
        DomainEvent::ConversationReset { .. } => Some("[conversation reset]\n".to_string()),
        _ => None,
    }
}

/// Subscribed to every feed of one controller.
///
/// Built before the first submission so no report update can slip past it.
pub struct View {
    printer: AnswerPrinter,
    conversation: watch::Receiver<ConversationState>,
    report: watch::Receiver<Option<ReportPayload>>,
    events: broadcast::Receiver<DomainEvent>,
}

impl View {
    pub fn new(controller: &ConversationController) -> Self {
        Self {
            printer: AnswerPrinter::new(),
            conversation: controller.subscribe_conversation(),
            report: controller.subscribe_report(),
            events: controller.subscribe_events(),
        }
    }

    fn show_conversation(&mut self) {
        let state = self.conversation.borrow_and_update().clone();
        if let Some(text) = self.printer.update(&state) {
            emit(&text);
        }
    }

    fn show_report(&mut self) {
        let report = self.report.borrow_and_update().clone();
        if let Some(report) = report {
            emit(&render_report(&report));
        }
    }

    fn show_event(&mut self, event: &DomainEvent) {
        match serde_json::to_string(event) {
            Ok(json) => tracing::debug!(event = event.event_name(), payload = %json, "Domain event"),
            Err(e) => tracing::debug!(event = event.event_name(), error = %e, "Domain event"),
        }
        if let Some(text) = notice(event) {
            // Close a cut-off answer line before the notice.
            if matches!(
                event,
                DomainEvent::StreamCancelled { .. } | DomainEvent::StreamFailed { .. }
            ) {
                self.show_conversation();
                if let Some(newline) = self.printer.interrupt() {
                    emit(&newline);
                }
            }
            emit(&text);
        }
    }

    /// Render every feed until `stop` fires, then flush what is left.
    pub async fn run(mut self, stop: CancellationToken) {
        // The greeting, if any.
        self.show_conversation();

        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                changed = self.conversation.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    self.show_conversation();
                }
                changed = self.report.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    self.show_report();
                }
                received = self.events.recv() => match received {
                    Ok(event) => self.show_event(&event),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Event feed lagged");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }

        // Final flush: the last snapshot and report, then any queued events.
        self.show_conversation();
        if self.report.has_changed().unwrap_or(false) {
            self.show_report();
        }
        while let Ok(event) = self.events.try_recv() {
            self.show_event(&event);
        }
    }
}
