//! CLI argument parsing for the agentdesk daemon.
//!
//! CLI flags override all other config sources.

use clap::{Parser, Subcommand};

use agentdesk_notify::NotificationKind;

/// AgentDesk job daemon
///
/// Runs the in-process job manager: named queues and recurring jobs.
#[derive(Parser, Debug)]
#[command(name = "agentdesk-daemon")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default ~/.config/agentdesk/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Daemon commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the job manager and run the configured recurring jobs
    Start,

    /// Check a 6-field cron expression
    ValidateCron {
        /// Cron expression, e.g. "0 0 8 * * *"
        expression: String,
    },

    /// Queue one authentication email and wait for delivery
    Notify {
        /// password-reset, password-reset-alert, email-verification-code, welcome or login-alert
        kind: NotificationKind,

        /// Recipient address
        #[arg(long)]
        to: String,

        /// Recipient first name
        #[arg(long, default_value = "there")]
        name: String,

        /// Password reset token (password-reset)
        #[arg(long)]
        token: Option<String>,

        /// Verification code (email-verification-code)
        #[arg(long)]
        code: Option<String>,
    },

    /// Print the resolved settings as TOML
    Config,
}
