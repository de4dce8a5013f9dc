//! Session connections and their retry policy
//!
//! Handles per-connection negotiation, the per-channel connection map, and
//! the adaptive timeout/retry budget.

pub mod connection;
pub mod lifecycle;
pub mod manager;

pub use connection::{ConnectionEvent, ConnectionId, ConnectionNotice, SessionConnection};
pub use lifecycle::{RetryDecision, RetryPolicy, RetryState};
pub use manager::{ConnectionEntry, ConnectionKey, ConnectionSet};
