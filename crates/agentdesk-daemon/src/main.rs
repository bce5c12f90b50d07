//! AgentDesk Daemon
//!
//! Runs the in-process job manager: named queues and recurring jobs.
//!
//! # Usage
//!
//! ```bash
//! agentdesk-daemon start
//! agentdesk-daemon validate-cron "0 0 8 * * *"
//! agentdesk-daemon notify welcome --to ada@example.com --name Ada
//! agentdesk-daemon config
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (~/.config/agentdesk/config.toml)
//! 3. Config file given with --config
//! 4. Environment variables (AGENTDESK_*)
//! 5. CLI flags

use anyhow::Result;
use clap::Parser;

use agentdesk_daemon::{send_notification, show_config, start_daemon, validate_cron, Cli, Commands};
use agentdesk_notify::Recipient;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start => {
            start_daemon(cli.config.as_deref(), cli.log_level.as_deref()).await?;
        }
        Commands::ValidateCron { expression } => {
            validate_cron(&expression)?;
        }
        Commands::Notify {
            kind,
            to,
            name,
            token,
            code,
        } => {
            let mut recipient = Recipient::new(to, name);
            recipient.reset_password_token = token;
            recipient.email_verification_code = code;
            send_notification(
                cli.config.as_deref(),
                cli.log_level.as_deref(),
                kind,
                recipient,
            )
            .await?;
        }
        Commands::Config => {
            show_config(cli.config.as_deref(), cli.log_level.as_deref())?;
        }
    }

    Ok(())
}
