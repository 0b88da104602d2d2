//! Event types published to host-side subscribers.
//!
//! All types derive `serde::Serialize` + `serde::Deserialize` so a host can
//! forward them as JSON.

pub mod events;
