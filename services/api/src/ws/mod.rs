//! WebSocket Training Sessions
//!
//! A browser client hosts the streamed simulation and relays its data channel
//! over this socket. Each connection owns one `TrainingSession`:
//!
//! - `protocol`: the JSON messages exchanged with the browser.
//! - `session`: connection lifecycle, resume and persistence of progress.

pub mod protocol;
pub mod session;

pub use session::ws_handler;
