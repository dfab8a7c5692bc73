//! Shared Application State
//!
//! Holds the resources every handler and WebSocket session needs: the
//! database, the task sequence sessions run against and the loaded config.

use crate::config::Config;
use simtrain_core::sequence::TaskSequence;
use std::sync::Arc;

/// Created once at startup and shared by all handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<crate::db::Db>,
    pub sequence: Arc<TaskSequence>,
    pub config: Arc<Config>,
}
