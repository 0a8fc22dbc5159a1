//! In-process issue event bus and the TTL query cache it keeps fresh.

pub mod bus;
pub mod cache;

pub use bus::{EventBus, IssueEvent};
pub use cache::{CacheInvalidator, QueryCache};
