use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use faceswap_artifacts::ArtifactStore;
use faceswap_tokens::TokenStore;
use faceswapd::Config;

#[derive(Parser)]
#[command(name = "faceswap", about = "faceswap service administration")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage API tokens
    Token {
        #[command(subcommand)]
        action: TokenAction,
    },
    /// Delete expired images now, without waiting for the daemon's sweep
    Sweep,
    /// Print the effective configuration (admin key omitted)
    Config,
}

#[derive(Subcommand)]
enum TokenAction {
    /// Issue a new token
    Create,
    /// Show a token and its request count
    Show {
        /// Token ID
        id: String,
    },
    /// Revoke a token
    Delete {
        /// Token ID
        id: String,
    },
    /// List a token's requests, newest first
    Usage {
        /// Token ID
        id: String,
        /// Show at most this many entries
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command {
        Commands::Token { action } => {
            let store = TokenStore::open(&config.db_path)
                .await
                .with_context(|| format!("opening token store {}", config.db_path.display()))?;
            run_token(&store, action).await?;
        }
        Commands::Sweep => {
            let artifacts = ArtifactStore::open(config.artifact_config()).await?;
            let report = artifacts.sweep().await?;
            tracing::info!(
                staging = report.staging_deleted,
                output = report.output_deleted,
                debug = report.debug_deleted,
                failures = report.failures,
                "manual sweep finished"
            );
            println!(
                "deleted {} file(s): staging {}, output {}, debug {}",
                report.total_deleted(),
                report.staging_deleted,
                report.output_deleted,
                report.debug_deleted
            );
            if report.failures > 0 {
                bail!("{} file(s) could not be removed", report.failures);
            }
        }
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            if config.uses_default_admin_key() {
                eprintln!("warning: FACESWAP_ADMIN_API_KEY is not set; the default admin key is in use");
            }
        }
    }

    Ok(())
}

async fn run_token(store: &TokenStore, action: TokenAction) -> Result<()> {
    match action {
        TokenAction::Create => {
            let token_id = store.create().await?;
            tracing::info!(token = %token_id, "token created");
            println!("{token_id}");
        }
        TokenAction::Show { id } => {
            let Some(record) = store.get(&id).await? else {
                bail!("token not found: {id}");
            };
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        TokenAction::Delete { id } => {
            if !store.delete(&id).await? {
                bail!("token not found: {id}");
            }
            tracing::info!(token = %id, "token deleted");
            println!("Token deleted: {id}");
        }
        TokenAction::Usage { id, limit } => {
            let Some(record) = store.get(&id).await? else {
                bail!("token not found: {id}");
            };
            println!("{} request(s) total", record.total_requests);
            for entry in store.usage(&id).await?.into_iter().take(limit) {
                println!("{}  {}", entry.timestamp.to_rfc3339(), entry.endpoint);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_token_usage() {
        let cli = Cli::try_parse_from(["faceswap", "token", "usage", "abc", "--limit", "5"]).unwrap();
        match cli.command {
            Commands::Token { action: TokenAction::Usage { id, limit } } => {
                assert_eq!(id, "abc");
                assert_eq!(limit, 5);
            }
            _ => panic!("wrong command"),
        }
    }

    #[tokio::test]
    async fn token_commands_against_store() {
        let store = TokenStore::open_in_memory().await.unwrap();
        run_token(&store, TokenAction::Create).await.unwrap();
        assert!(run_token(&store, TokenAction::Show { id: "missing".into() }).await.is_err());
        assert!(run_token(&store, TokenAction::Delete { id: "missing".into() }).await.is_err());
    }

    #[tokio::test]
    async fn delete_revokes_token() {
        let store = TokenStore::open_in_memory().await.unwrap();
        let id = store.create().await.unwrap();
        run_token(&store, TokenAction::Delete { id: id.clone() }).await.unwrap();
        assert!(store.get(&id).await.unwrap().is_none());
        assert!(run_token(&store, TokenAction::Usage { id, limit: 5 }).await.is_err());
    }
}
