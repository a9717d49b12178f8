//! Versioned storage for the level queue.
//!
//! - [`chain`]: the generic version-chain engine.
//! - [`queue_doc`] and [`custom_codes_doc`]: concrete document schemas.
//! - [`store`]: startup hydration and the runtime [`store::Persister`].
//! - [`writer`]: the serialized background writer.

pub mod atomic;
pub mod chain;
pub mod context;
pub mod custom_codes_doc;
pub mod error;
pub mod layout;
pub mod queue_doc;
pub mod store;
pub mod writer;

pub use chain::{Loaded, SchemaVersion, UpgradeHooks, Upgraded, VersionChain};
pub use context::{IdentityResolver, LoadContext, LoginResolver, StaticResolver};
pub use error::PersistenceError;
pub use layout::DataDir;
pub use queue_doc::{QueueDocument, QueueSnapshot};
pub use store::{hydrate, reload_queue, Hydrated, Persister};
pub use writer::DocumentWriter;
