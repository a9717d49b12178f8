//! Async level queue service.
//!
//! Wraps the pure domain from `levelq-core` in a single-writer service,
//! connects it to the chat platform's roster through [`PresenceProvider`],
//! and persists every change through `levelq-persistence`.

pub mod error;
pub mod presence;
pub mod service;
pub mod startup;
pub mod ticker;

pub use error::ServiceError;
pub use presence::{OnlinePresence, PresenceError, PresenceProvider, StaticPresence};
pub use service::{Availability, QueueService, ServiceConfig};
pub use startup::{start, Runtime};
pub use ticker::WaitTicker;
