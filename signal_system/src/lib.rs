//! Signal system for row-level change subscriptions
//!
//! This crate provides change event types and the subscription registry
//! that deduplicates upstream change channels per query signature.

pub mod event;
pub mod prelude;
pub mod registry;

pub use event::{ChangeEvent, EventType, Record};
pub use registry::{
    ChangeCallback, Registration, RegistryStats, SubscriptionHandle, SubscriptionRegistry,
    Teardown,
};
