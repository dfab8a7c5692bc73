//! Simulation Training API Library Crate
//!
//! Everything the training web service needs: configuration, database access,
//! REST handlers, the WebSocket bridge to the training core, and routing. The
//! binaries under `bin/` are thin wrappers around this library.

pub mod config;
pub mod db;
pub mod handlers;
pub mod models;
pub mod router;
pub mod state;
pub mod ws;
