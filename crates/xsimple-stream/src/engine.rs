//! Streaming engine: drives a chunk source into a cumulative-text callback.
//!
//! Guarantees, for every source:
//! - the callback sees strictly growing prefixes, in source order;
//! - it is called once per non-empty chunk, the last call carrying the whole text;
//! - after cancellation is observed it is never called again, and any pending
//!   timer is dropped with the source future.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use xsimple_core::config::StreamConfig;
use xsimple_core::UnitGranularity;

use crate::error::StreamError;
use crate::source::{ChunkSource, TimedSource};

/// How a streaming cycle ended, when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    /// The source was exhausted; `units` chunks were delivered.
    Completed { units: usize },
    /// Cancellation was observed after `delivered` chunks.
    Cancelled { delivered: usize },
}

impl StreamOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, StreamOutcome::Completed { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, StreamOutcome::Cancelled { .. })
    }

    /// Number of callback invocations made during the cycle.
    pub fn units_delivered(&self) -> usize {
        match self {
            StreamOutcome::Completed { units } => *units,
            StreamOutcome::Cancelled { delivered } => *delivered,
        }
    }
}

/// Pull chunks from `source` until it ends or `cancel` fires, calling
/// `on_chunk` with the text accumulated so far after each one.
pub async fn deliver<S, F>(
    source: &mut S,
    mut on_chunk: F,
    cancel: &CancellationToken,
) -> Result<StreamOutcome, StreamError>
where
    S: ChunkSource + ?Sized,
    F: FnMut(&str),
{
    let mut buffer = String::new();
    let mut delivered = 0usize;

    loop {
        // The callback itself may have cancelled.
        if cancel.is_cancelled() {
            tracing::debug!(delivered, "Stream cancelled");
            return Ok(StreamOutcome::Cancelled { delivered });
        }

        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(delivered, "Stream cancelled while waiting for chunk");
                return Ok(StreamOutcome::Cancelled { delivered });
            }
            next = source.next_chunk() => next?,
        };

        match next {
            Some(chunk) if chunk.is_empty() => continue,
            Some(chunk) => {
                buffer.push_str(&chunk);
                delivered += 1;
                on_chunk(&buffer);
            }
            None => {
                tracing::debug!(units = delivered, bytes = buffer.len(), "Stream completed");
                return Ok(StreamOutcome::Completed { units: delivered });
            }
        }
    }
}

/// Pacing and unit size for timer-driven delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSettings {
    pub unit_delay: Duration,
    pub granularity: UnitGranularity,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self::from(&StreamConfig::default())
    }
}

impl From<&StreamConfig> for StreamSettings {
    fn from(config: &StreamConfig) -> Self {
        Self {
            unit_delay: Duration::from_millis(config.unit_delay_ms),
            granularity: config.granularity,
        }
    }
}

/// Entry point for incremental delivery of responses.
#[derive(Debug, Clone, Default)]
pub struct StreamingEngine {
    settings: StreamSettings,
}

impl StreamingEngine {
    pub fn new(settings: StreamSettings) -> Self {
        Self { settings }
    }

    pub fn from_config(config: &StreamConfig) -> Self {
        Self::new(StreamSettings::from(config))
    }

    pub fn settings(&self) -> StreamSettings {
        self.settings
    }

    /// A timer-paced source over `full_text` using this engine's settings.
    pub fn timed_source(&self, full_text: &str) -> TimedSource {
        TimedSource::new(full_text, self.settings.granularity, self.settings.unit_delay)
    }

    /// Stream `full_text` on a spawned task, one unit per tick.
    pub fn stream<F>(&self, full_text: &str, on_chunk: F) -> StreamHandle
    where
        F: FnMut(&str) + Send + 'static,
    {
        self.stream_from(self.timed_source(full_text), on_chunk)
    }

    /// Stream an arbitrary source on a spawned task.
    pub fn stream_from<S, F>(&self, mut source: S, on_chunk: F) -> StreamHandle
    where
        S: ChunkSource + 'static,
        F: FnMut(&str) + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task = tokio::spawn(async move { deliver(&mut source, on_chunk, &token).await });
        StreamHandle {
            cancel,
            task: Some(task),
        }
    }
}

/// Cancellable, awaitable handle to a spawned stream.
///
/// Dropping the handle before the stream finishes cancels it.
#[derive(Debug)]
pub struct StreamHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<Result<StreamOutcome, StreamError>>>,
}

impl StreamHandle {
    /// Request cancellation. No chunk is delivered after the stream task
    /// observes it.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the stream to complete or observe cancellation.
    pub async fn join(mut self) -> Result<StreamOutcome, StreamError> {
        let result = match self.task.as_mut() {
            Some(task) => task
                .await
                .map_err(|e| StreamError::Aborted(e.to_string()))?,
            None => Err(StreamError::Aborted("stream already joined".to_string())),
        };
        self.task = None;
        result
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        if self.task.is_some() {
            self.cancel.cancel();
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::ChannelSource;
    use crate::units::count_units;
    use std::sync::{Arc, Mutex};

    const SALES_TEXT: &str = "好的，我正在为您生成**2023年度销售报表**。";

    fn fast_engine() -> StreamingEngine {
        StreamingEngine::new(StreamSettings {
            unit_delay: Duration::ZERO,
            granularity: UnitGranularity::Char,
        })
    }

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl FnMut(&str) + Send + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |partial: &str| sink.lock().unwrap().push(partial.to_string()))
    }

    #[test]
    fn test_settings_from_config() {
        let settings = StreamSettings::default();
        assert_eq!(settings.unit_delay, Duration::from_millis(30));
        assert_eq!(settings.granularity, UnitGranularity::Char);
    }

    #[test]
    fn test_outcome_helpers() {
        let done = StreamOutcome::Completed { units: 4 };
        assert!(done.is_completed());
        assert_eq!(done.units_delivered(), 4);

        let cancelled = StreamOutcome::Cancelled { delivered: 1 };
        assert!(cancelled.is_cancelled());
        assert_eq!(cancelled.units_delivered(), 1);
    }

    #[tokio::test]
    async fn test_deliver_prefixes_strictly_grow_to_full_text() {
        let engine = fast_engine();
        let mut source = engine.timed_source(SALES_TEXT);
        let mut seen: Vec<String> = Vec::new();
        let cancel = CancellationToken::new();

        let outcome = deliver(&mut source, |p| seen.push(p.to_string()), &cancel)
            .await
            .unwrap();

        let units = count_units(SALES_TEXT, UnitGranularity::Char);
        assert_eq!(outcome, StreamOutcome::Completed { units });
        assert_eq!(seen.len(), units);
        for pair in seen.windows(2) {
            assert!(pair[1].len() > pair[0].len());
            assert!(pair[1].starts_with(pair[0].as_str()));
        }
        assert_eq!(seen.last().map(String::as_str), Some(SALES_TEXT));
    }

    #[tokio::test]
    async fn test_deliver_empty_text_completes_without_callback() {
        let engine = fast_engine();
        let mut source = engine.timed_source("");
        let mut calls = 0;
        let outcome = deliver(&mut source, |_| calls += 1, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, StreamOutcome::Completed { units: 0 });
        assert_eq!(calls, 0);
    }

    #[tokio::test]
    async fn test_cancel_after_k_chunks_stops_delivery() {
        let engine = fast_engine();
        let mut source = engine.timed_source("abcdefgh");
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let mut seen: Vec<String> = Vec::new();

        let outcome = deliver(
            &mut source,
            |p| {
                seen.push(p.to_string());
                if seen.len() == 3 {
                    token.cancel();
                }
            },
            &cancel,
        )
        .await
        .unwrap();

        assert_eq!(outcome, StreamOutcome::Cancelled { delivered: 3 });
        assert_eq!(seen, vec!["a", "ab", "abc"]);
    }

    #[tokio::test]
    async fn test_cancel_before_start_delivers_nothing() {
        let engine = fast_engine();
        let mut source = engine.timed_source("abc");
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut calls = 0;
        let outcome = deliver(&mut source, |_| calls += 1, &cancel).await.unwrap();
        assert_eq!(outcome, StreamOutcome::Cancelled { delivered: 0 });
        assert_eq!(calls, 0);
    }

    #[tokio::test]
    async fn test_grapheme_granularity_counts_clusters() {
        let engine = StreamingEngine::new(StreamSettings {
            unit_delay: Duration::ZERO,
            granularity: UnitGranularity::Grapheme,
        });
        let text = "e\u{301}e\u{301}";
        let mut source = engine.timed_source(text);
        let mut seen: Vec<String> = Vec::new();
        let outcome = deliver(&mut source, |p| seen.push(p.to_string()), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, StreamOutcome::Completed { units: 2 });
        assert_eq!(seen, vec!["e\u{301}", "e\u{301}e\u{301}"]);
    }

    #[tokio::test]
    async fn test_deliver_from_channel_source() {
        let (tx, mut source) = ChannelSource::channel(4);
        let producer = tokio::spawn(async move {
            for chunk in ["收到", "，", "但我是一个演示模型。"] {
                tx.send(Ok(chunk.to_string())).await.unwrap();
            }
        });

        let mut seen: Vec<String> = Vec::new();
        let outcome = deliver(&mut source, |p| seen.push(p.to_string()), &CancellationToken::new())
            .await
            .unwrap();
        producer.await.unwrap();

        assert_eq!(outcome, StreamOutcome::Completed { units: 3 });
        assert_eq!(seen, vec!["收到", "收到，", "收到，但我是一个演示模型。"]);
    }

    #[tokio::test]
    async fn test_deliver_propagates_source_error() {
        let (tx, mut source) = ChannelSource::channel(4);
        tx.send(Ok("partial".to_string())).await.unwrap();
        tx.send(Err(StreamError::Source("transport closed".to_string())))
            .await
            .unwrap();

        let mut seen: Vec<String> = Vec::new();
        let result = deliver(&mut source, |p| seen.push(p.to_string()), &CancellationToken::new()).await;
        assert_eq!(
            result,
            Err(StreamError::Source("transport closed".to_string()))
        );
        assert_eq!(seen, vec!["partial"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handle_join_completes() {
        let engine = StreamingEngine::default();
        let (seen, sink) = recorder();
        let handle = engine.stream("abc", sink);

        let outcome = handle.join().await.unwrap();
        assert_eq!(outcome, StreamOutcome::Completed { units: 3 });
        assert_eq!(*seen.lock().unwrap(), vec!["a", "ab", "abc"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handle_cancel_mid_stream_stops_delivery() {
        let engine = StreamingEngine::default();
        let (seen, sink) = recorder();
        let text = "x".repeat(50);
        let handle = engine.stream(&text, sink);

        tokio::time::sleep(Duration::from_millis(95)).await;
        handle.cancel();
        let outcome = handle.join().await.unwrap();

        let delivered = outcome.units_delivered();
        assert!(outcome.is_cancelled());
        assert!(delivered > 0 && delivered < 50);
        assert_eq!(seen.lock().unwrap().len(), delivered);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(seen.lock().unwrap().len(), delivered);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handle_cancels_stream() {
        let engine = StreamingEngine::default();
        let (seen, sink) = recorder();
        let handle = engine.stream(&"y".repeat(20), sink);
        let token = handle.cancellation_token();

        tokio::time::sleep(Duration::from_millis(40)).await;
        drop(handle);
        assert!(token.is_cancelled());

        tokio::time::sleep(Duration::from_millis(10)).await;
        let after_drop = seen.lock().unwrap().len();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(seen.lock().unwrap().len(), after_drop);
        assert!(after_drop < 20);
    }
}
