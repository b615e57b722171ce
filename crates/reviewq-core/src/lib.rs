//! # reviewq-core
//!
//! Core types, traits, and abstractions for the reviewq task queue.
//!
//! This crate provides the foundational data structures and trait definitions
//! that the storage, job, and API crates depend on.

pub mod chunking;
pub mod credential;
pub mod defaults;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;
pub mod traits;
pub mod uuid_utils;

// Re-export commonly used types at crate root
pub use chunking::{split_equally, split_into_chunks, split_text_into_parts, ChecklistChunk};
pub use credential::CredentialHash;
pub use error::{Error, Result};
pub use events::{
    event_types, BrokerEvent, EventBroker, EventCallback, InMemoryEventBroker, PushFrame,
    SubscriptionId,
};
pub use models::*;
pub use traits::*;
pub use uuid_utils::new_v7;
