//! Shared types, configuration, errors, and domain events for the XSimple
//! report assistant.

pub mod config;
pub mod error;
pub mod events;
pub mod types;

pub use config::XSimpleConfig;
pub use error::{Result, XSimpleError};
pub use events::DomainEvent;
pub use types::*;
