//! Feature controllers.
//!
//! Each controller subscribes to the session bus, picks out the inbound tags it
//! owns, keeps its own slice of state and exposes the outbound commands for
//! its feature. Controllers never read each other's state.

pub mod explosion;
pub mod question;
