//! Incremental text delivery.
//!
//! A [`ChunkSource`] yields pieces of text (a timer-paced split of a full
//! response, or chunks arriving from an external transport) and
//! [`deliver`] feeds the cumulative text to a callback until the source is
//! exhausted or the cycle is cancelled.

pub mod engine;
pub mod error;
pub mod source;
pub mod units;

pub use engine::{deliver, StreamHandle, StreamOutcome, StreamSettings, StreamingEngine};
pub use error::StreamError;
pub use source::{ChannelSource, ChunkSource, TimedSource};
pub use units::{count_units, split_units};
