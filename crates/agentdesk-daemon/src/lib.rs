//! AgentDesk daemon library exports.
//!
//! # Modules
//!
//! - `cli`: Command-line argument parsing with clap
//! - `commands`: Command implementations (start, validate-cron, notify, config)
//! - `settings`: Layered configuration

pub mod cli;
pub mod commands;
pub mod settings;

pub use cli::{Cli, Commands};
pub use commands::{
    deliver_notification, load_settings, register_recurring_jobs, send_notification, show_config,
    start_daemon, validate_cron,
};
pub use settings::{RecurringJobSettings, Settings, SettingsError};
