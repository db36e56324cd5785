#![forbid(unsafe_code)]

pub mod error;
pub mod inmemory;
pub mod model;
#[cfg(feature = "redis")]
pub mod redis_store;
pub mod scope;
pub mod store;

pub use error::{SessionError, SessionResult};
pub use model::{Event, EventWindow, Session, SessionKey, SessionSummary, StateMap};
pub use scope::StateScope;
pub use store::{AppendOutcome, SessionStore};
