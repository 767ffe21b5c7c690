//! Conversation engine for the XSimple report assistant.
//!
//! Resolves the intent of a query, streams the canned answer into the
//! conversation log one unit at a time, and publishes the report payload
//! once the answer is complete.

pub mod controller;
pub mod conversation;
pub mod error;
pub mod intent;
pub mod report;
pub mod state;

pub use controller::{ConversationController, CycleOutcome, PendingCycle};
pub use conversation::ConversationStore;
pub use error::ChatError;
pub use intent::{IntentResolver, IntentRule};
pub use report::ReportStore;
pub use state::ConversationPhase;
