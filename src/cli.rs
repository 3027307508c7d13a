//! Command-line interface definition for Vitalgate
//!
//! This module defines the CLI structure using clap's derive API,
//! providing commands to run the broker and to inspect or reset the
//! stored upstream credentials.

use clap::{Parser, Subcommand};

/// Vitalgate - OAuth2/PKCE broker and tool gateway for a health-data API
#[derive(Parser, Debug, Clone)]
#[command(name = "vitalgate")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/config.yaml")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub json_logs: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for Vitalgate
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the HTTP server until interrupted
    Serve {
        /// Override the bind address from config
        #[arg(long)]
        host: Option<String>,

        /// Override the listen port from config
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Show whether an upstream account is connected
    Status,

    /// Forget the stored upstream credentials
    Logout,

    /// Print a fresh random encryption key (base64, 32 bytes)
    Keygen,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            config: Some("config/config.yaml".to_string()),
            verbose: false,
            json_logs: false,
            command: Commands::Status,
        }
    }
}
