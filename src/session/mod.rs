//! Console sessions
//!
//! Identity comes from an external provider; the console role and crew
//! assignment are kept locally, keyed by the provider's uid.

pub mod identity;
pub mod models;
pub mod storage;
pub mod store;

pub use identity::{IdentityProvider, MockIdentityProvider, RestIdentityProvider};
pub use models::{Identity, Role, RoleRecord, Session, SessionState};
pub use storage::{FileStorage, KeyValueStore, MemoryStorage};
pub use store::{SessionSettings, SessionStore};
