use clap::{Parser, Subcommand};
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "optiboard", version, about = "optiboard dashboard API")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start the HTTP server (default if no subcommand given).
    Serve {
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
        #[arg(long, default_value = "8000")]
        port: u16,
    },

    /// Mint a remote-service API key for an account (prints the plaintext once).
    CreateKey {
        /// Account id (UUID) the key belongs to.
        #[arg(long)]
        user_id: Uuid,

        /// Friendly name for the key.
        #[arg(long)]
        name: String,
    },

    /// Print current configuration (redacted secrets).
    Config,
}
