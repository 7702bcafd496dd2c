//! Convenience re-exports for common signal-system usage

// Core signal system components
pub use crate::event::{ChangeEvent, EventType, Record};
pub use crate::registry::{
    ChangeCallback, Registration, RegistryStats, SubscriptionHandle, SubscriptionRegistry,
    Teardown,
};

// Common external dependencies
pub use serde::{Deserialize, Serialize};
pub use serde_json;
