//! Chunk sources feeding the delivery loop.
//!
//! [`TimedSource`] paces a known response with a fixed delay before each
//! unit. [`ChannelSource`] forwards chunks pushed by an external transport.
//! Both satisfy the same [`ChunkSource`] contract, so consumers of the
//! delivery loop do not know which one is in use.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use xsimple_core::UnitGranularity;

use crate::error::StreamError;
use crate::units::split_units;

/// Producer of text chunks for one streaming cycle.
///
/// `Ok(None)` marks the end of the response. Implementations must be
/// cancel-safe: dropping the future returned by `next_chunk` (which happens
/// when a cycle is cancelled) must not lose a chunk that was already
/// returned.
#[async_trait]
pub trait ChunkSource: Send {
    async fn next_chunk(&mut self) -> Result<Option<String>, StreamError>;
}

#[async_trait]
impl<S: ChunkSource + ?Sized> ChunkSource for Box<S> {
    async fn next_chunk(&mut self) -> Result<Option<String>, StreamError> {
        (**self).next_chunk().await
    }
}

/// Timer-paced split of a complete response.
#[derive(Debug, Clone)]
pub struct TimedSource {
    units: Vec<String>,
    next: usize,
    delay: Duration,
}

impl TimedSource {
    pub fn new(full_text: &str, granularity: UnitGranularity, delay: Duration) -> Self {
        Self {
            units: split_units(full_text, granularity)
                .into_iter()
                .map(str::to_string)
                .collect(),
            next: 0,
            delay,
        }
    }

    /// Total units this source yields.
    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Units not yet yielded.
    pub fn remaining(&self) -> usize {
        self.units.len() - self.next
    }
}

#[async_trait]
impl ChunkSource for TimedSource {
    async fn next_chunk(&mut self) -> Result<Option<String>, StreamError> {
        if self.next >= self.units.len() {
            return Ok(None);
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let unit = std::mem::take(&mut self.units[self.next]);
        self.next += 1;
        Ok(Some(unit))
    }
}

/// Chunks pushed by an external transport through an mpsc channel.
///
/// The response ends when every sender is dropped. A sender reports a
/// transport failure by sending an `Err`. Empty chunks are skipped so every
/// delivered prefix is strictly longer than the last.
#[derive(Debug)]
pub struct ChannelSource {
    rx: mpsc::Receiver<Result<String, StreamError>>,
}

impl ChannelSource {
    pub fn new(rx: mpsc::Receiver<Result<String, StreamError>>) -> Self {
        Self { rx }
    }

    /// Create a bounded channel and the source reading from it.
    pub fn channel(buffer: usize) -> (mpsc::Sender<Result<String, StreamError>>, Self) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (tx, Self::new(rx))
    }
}

#[async_trait]
impl ChunkSource for ChannelSource {
    async fn next_chunk(&mut self) -> Result<Option<String>, StreamError> {
        loop {
            match self.rx.recv().await {
                Some(Ok(chunk)) if chunk.is_empty() => continue,
                Some(Ok(chunk)) => return Ok(Some(chunk)),
                Some(Err(e)) => return Err(e),
                None => return Ok(None),
            }
        }
    }
}
