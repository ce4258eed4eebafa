use std::{fs, path::PathBuf};

use clap::{Parser, Subcommand};
use portkey_engine::{FederationGateway, GraphQLRequest};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "portkey-engine", version, about = "Plans federated GraphQL operations")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Prints the upstream operations planned for a client operation
    Plan {
        /// Engine configuration (YAML)
        #[arg(short, long)]
        config: PathBuf,
        /// File holding the client operation
        #[arg(short, long)]
        operation: PathBuf,
        #[arg(long)]
        operation_name: Option<String>,
        /// Client variables as a JSON object
        #[arg(long)]
        variables: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    match Cli::parse().command {
        Command::Plan {
            config,
            operation,
            operation_name,
            variables,
        } => {
            let gateway = FederationGateway::from_config_file(&config, CancellationToken::new())?;
            let request = GraphQLRequest {
                query: fs::read_to_string(&operation)?,
                variables: variables
                    .as_deref()
                    .map(serde_json::from_str::<Value>)
                    .transpose()?,
                operation_name,
                ..Default::default()
            };
            info!(config = ?config, operation = ?operation, "planning operation");

            let plan = gateway.plan_request(&request).await?;
            for fetch in &plan.fetches {
                println!("fetch {} at {:?}", fetch.config.data_source, fetch.path);
                println!("  {}", fetch.config.input.input);
            }
            if let Some(subscription) = &plan.subscription {
                println!("subscription {}", subscription.data_source);
                println!("  {}", subscription.input.input);
            }
        }
    }
    Ok(())
}
