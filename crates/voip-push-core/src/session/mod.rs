//! Call session tracking: the authoritative store and the action debouncer
//! that owns every state transition.

pub mod debounce;
pub mod store;

pub use debounce::{ActionDebouncer, ActionOutcome, AppliedAction};
pub use store::{SessionStore, SessionStoreStats, Transition};
