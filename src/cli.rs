use clap::{Parser, Subcommand};

/// SSRF canary: records every request that dereferences an issued token URL
#[derive(Parser)]
#[command(name = "ssrf-canary", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the canary server
    Serve {
        /// Port to bind (defaults to APP_PORT)
        #[arg(short, long)]
        port: Option<u16>,
        /// Keep tokens and events in memory instead of the database
        #[arg(long)]
        in_memory: bool,
    },

    /// Manage canary tokens
    Token {
        #[command(subcommand)]
        command: TokenCommands,
    },

    /// Inspect recorded hits
    Events {
        #[command(subcommand)]
        command: EventCommands,
    },
}

#[derive(Subcommand)]
pub enum TokenCommands {
    /// Issue a new token
    Create {
        #[arg(long, default_value = "default")]
        owner: String,
        /// Lifetime in seconds; 0 = never expires (defaults to TOKEN_EXPIRY_SECONDS)
        #[arg(long)]
        expires_in: Option<u64>,
    },
    /// List the newest tokens
    List,
    /// Deactivate a token
    Deactivate { token: String },
}

#[derive(Subcommand)]
pub enum EventCommands {
    /// List recorded hits, newest first
    List {
        #[arg(long, default_value_t = 1)]
        page: i64,
        #[arg(long, default_value_t = 50)]
        per: i64,
    },
}
