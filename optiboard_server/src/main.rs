use clap::Parser;
use optiboard_core::{DashboardConfig, UserId};
use optiboard_server::cli::{Cli, Commands};
use std::net::SocketAddr;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let cmd = cli.command.unwrap_or(Commands::Serve {
        host: "0.0.0.0".to_string(),
        port: 8000,
    });

    match cmd {
        Commands::Serve { host, port } => {
            let addr: SocketAddr = format!("{host}:{port}").parse()?;
            let cfg = DashboardConfig::from_env()?;
            let state = optiboard_server::server::build_state(&cfg).await?;
            optiboard_server::server::serve(addr, state).await?;
        }
        Commands::CreateKey { user_id, name } => {
            let cfg = DashboardConfig::from_env()?;
            let state = optiboard_server::server::build_state(&cfg).await?;

            let (record, secret) = state.vault.create(UserId(user_id), &name).await?;
            println!("key_id: {}", record.key_id);
            println!("prefix: {}", record.key_prefix);
            // Shown once; only the ciphertext survives.
            println!("secret: {secret}");
        }
        Commands::Config => {
            let cfg = serde_json::json!({
                "OPTIBOARD_MASTER_SECRET": std::env::var("OPTIBOARD_MASTER_SECRET").ok().map(|_| "<set>".to_string()),
                "OPTIBOARD_REMOTE_URL": std::env::var("OPTIBOARD_REMOTE_URL").ok(),
                "OPTIBOARD_REMOTE_TIMEOUT_MS": std::env::var("OPTIBOARD_REMOTE_TIMEOUT_MS").ok(),
                "OPTIBOARD_DB_PATH": std::env::var("OPTIBOARD_DB_PATH").ok(),
            });
            println!("{}", serde_json::to_string_pretty(&cfg)?);
        }
    }

    Ok(())
}
