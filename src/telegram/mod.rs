//! Telegram command surface.
//!
//! ```text
//! telegram/
//! ├── mod.rs       # public API + shared command context
//! ├── commands.rs  # command parsing and handlers
//! └── polling.rs   # update polling loop
//! ```
//!
//! Commands are consumed from the configured chat only; every command
//! returns a structured reply string rather than touching engine internals
//! directly.

pub mod commands;
pub mod polling;

pub use commands::{handle_command, Command};
pub use polling::run_polling;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::sync::Arc;

use crate::chain::ChainClient;
use crate::checkpoint::CheckpointStore;
use crate::claim::Orchestrator;
use crate::config::ScheduleSettings;
use crate::registry::InstanceRegistry;

/// Everything a command handler may consult
pub struct CommandContext {
    pub registry: Arc<InstanceRegistry>,
    pub chain: Arc<dyn ChainClient>,
    pub orchestrator: Arc<Orchestrator>,
    pub checkpoints: Arc<CheckpointStore>,
    pub schedule: ScheduleSettings,
    pub timezone: Tz,
    pub started_at: DateTime<Utc>,
}
