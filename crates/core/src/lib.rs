//! Level queue domain logic.
//!
//! Pure, synchronous building blocks shared by the persistence and service
//! crates:
//!
//! - [`codec`]: level code extraction and structural validation.
//! - [`queue`]: the pending list plus current item, with outcome enums.
//! - [`presence`]: roster merging into a [`presence::PresenceSnapshot`].
//! - [`selection`]: selection policies and the wait-weighted lottery.
//! - [`wait`]: the wait-time ledger.
//! - [`config`]: typed settings.

pub mod codec;
pub mod config;
pub mod custom_codes;
pub mod error;
pub mod item;
pub mod presence;
pub mod queue;
pub mod selection;
pub mod timer;
pub mod types;
pub mod wait;

pub use config::{ConfigError, Settings};
pub use error::CoreError;
pub use item::{Item, Submitter};
pub use queue::QueueState;
pub use selection::{Selection, SelectionPolicy};
pub use wait::{WaitLedger, WaitRecord};
