//! Document lifecycle: the `uploaded -> processing -> completed | error`
//! state machine and the operations callers drive it with.

pub mod manager;

pub use manager::{DocumentManager, SubmitRequest};
