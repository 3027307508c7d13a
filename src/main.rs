//! Vitalgate - OAuth2/PKCE broker and tool gateway
//!
#![doc = "Main entry point for the Vitalgate broker."]

use anyhow::Result;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use vitalgate::auth::crypto::EncryptionKey;
use vitalgate::auth::TokenStore;
use vitalgate::cli::{Cli, Commands};
use vitalgate::config::Config;
use vitalgate::server::{self, AppContext};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    init_tracing(cli.verbose, cli.json_logs);

    // Key generation needs no configuration at all
    if let Commands::Keygen = cli.command {
        println!("{}", EncryptionKey::generate().to_base64());
        return Ok(());
    }

    // Load configuration
    let config_path = cli.config.as_deref().unwrap_or("config/config.yaml");
    let config = Config::load(config_path, &cli)?;

    match cli.command {
        Commands::Serve { .. } => {
            config.validate()?;
            tracing::info!(
                host = %config.server.host,
                port = config.server.port,
                "Starting Vitalgate server"
            );
            let ctx = AppContext::init(config)?;
            server::serve(ctx).await
        }
        Commands::Status => {
            let store = open_store(&config)?;
            let status = store.status().await;
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
        Commands::Logout => {
            let store = open_store(&config)?;
            store.clear().await?;
            println!("Stored credentials removed from {}", store.path().display());
            Ok(())
        }
        Commands::Keygen => Ok(()),
    }
}

/// Opens the token store using only the storage section of the config.
fn open_store(config: &Config) -> Result<TokenStore> {
    config.validate_storage()?;
    Ok(TokenStore::new(
        config.storage.token_path.clone(),
        config.encryption_key()?,
    ))
}

/// Initialize tracing subscriber with environment filter
fn init_tracing(verbose: bool, json: bool) {
    let default_level = if verbose { "vitalgate=debug" } else { "vitalgate=info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
