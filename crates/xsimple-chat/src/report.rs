//! Single-slot store for the current report.

use tokio::sync::watch;
use xsimple_core::ReportPayload;

/// Holds the most recent report, or none. No history.
#[derive(Debug)]
pub struct ReportStore {
    current: watch::Sender<Option<ReportPayload>>,
}

impl Default for ReportStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportStore {
    pub fn new() -> Self {
        let (current, _) = watch::channel(None);
        Self { current }
    }

    /// Replace the current report, returning the previous one.
    pub fn set_current(&self, payload: Option<ReportPayload>) -> Option<ReportPayload> {
        self.current.send_replace(payload)
    }

    pub fn get_current(&self) -> Option<ReportPayload> {
        self.current.borrow().clone()
    }

    pub fn has_current(&self) -> bool {
        self.current.borrow().is_some()
    }

    /// Feed of the current report.
    pub fn subscribe(&self) -> watch::Receiver<Option<ReportPayload>> {
        self.current.subscribe()
    }
}
