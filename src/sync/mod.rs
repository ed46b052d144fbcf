//! Delivery of embeddings and metadata to the external Core system.

pub mod client;
pub mod orchestrator;

pub use client::{CoreClient, PushResult, SyncType};
pub use orchestrator::{SyncOrchestrator, SyncReport};
