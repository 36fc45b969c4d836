//! bleepstore-ubns -- operator CLI for the bucket naming authority.
//!
//! Issues single naming RPCs (`add`, `delete`, `update`) or runs the full
//! create/delete protocols without a physical step (`reserve`, `release`),
//! using the same channel and client the gateway uses.

use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;

use bleepstore_ubns::config::{Config, LoggingConfig};
use bleepstore_ubns::ubns::{
    BucketEntryStatus, CreateProtocol, CreateState, DeleteProtocol, DeleteState, OperationResult,
    RequestContext,
};
use bleepstore_ubns::UbnsState;

/// Command-line arguments for the UBNS CLI.
#[derive(Parser, Debug)]
#[command(
    name = "bleepstore-ubns",
    version,
    about = "Bucket naming authority client"
)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long)]
    config: Option<String>,

    /// Override the naming authority endpoint (host:port or URI).
    #[arg(short, long)]
    uri: Option<String>,

    /// Override the cluster id.
    #[arg(long)]
    cluster_id: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// AddBucketEntry: reserve a name without confirming it.
    Add { bucket: String, owner: String },
    /// DeleteBucketEntry: release a name.
    Delete { bucket: String },
    /// UpdateBucketEntry: move a name to a new status.
    Update {
        bucket: String,
        #[arg(long, value_enum)]
        status: StatusArg,
    },
    /// Run the create protocol: reserve, then confirm.
    Reserve { bucket: String, owner: String },
    /// Run the delete protocol: mark deleting, then release.
    Release { bucket: String, owner: String },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum StatusArg {
    Created,
    Deleting,
}

impl From<StatusArg> for BucketEntryStatus {
    fn from(arg: StatusArg) -> Self {
        match arg {
            StatusArg::Created => BucketEntryStatus::Created,
            StatusArg::Deleting => BucketEntryStatus::Deleting,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => bleepstore_ubns::config::load_config(path)
            .with_context(|| format!("loading configuration from {path}"))?,
        None => Config::default(),
    };

    init_tracing(&config.logging);
    if let Some(path) = &cli.config {
        info!("Loaded configuration from {}", path);
    }

    // The CLI always talks to the authority.
    config.ubns.enabled = true;
    if let Some(uri) = cli.uri {
        config.ubns.uri = uri;
    }
    if let Some(cluster_id) = cli.cluster_id {
        config.ubns.cluster_id = cluster_id;
    }

    bleepstore_ubns::metrics::describe_metrics();
    let state = UbnsState::with_grpc(config.ubns)?;

    let outcome = run(&state, cli.command).await;
    state.shutdown();
    outcome
}

/// Install the tracing subscriber.  `RUST_LOG` wins over `logging.level`.
fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));

    if logging.format.eq_ignore_ascii_case("json") {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn run(state: &UbnsState, command: Command) -> anyhow::Result<()> {
    let cluster_id = state.config.cluster_id.as_str();
    let client = Arc::clone(&state.client);

    match command {
        Command::Add { bucket, owner } => {
            report("AddBucketEntry", &bucket, client.add_entry(&bucket, cluster_id, &owner).await)
        }
        Command::Delete { bucket } => {
            report("DeleteBucketEntry", &bucket, client.delete_entry(&bucket, cluster_id).await)
        }
        Command::Update { bucket, status } => report(
            "UpdateBucketEntry",
            &bucket,
            client.update_entry(&bucket, cluster_id, status.into()).await,
        ),
        Command::Reserve { bucket, owner } => {
            let mut protocol =
                CreateProtocol::new(RequestContext::new(), client, &bucket, cluster_id, &owner);
            for target in [CreateState::CreateStart, CreateState::UpdateStart, CreateState::Complete] {
                if !protocol.set_state(target).await {
                    break;
                }
            }
            let outcome = protocol.finish().await;
            if outcome.state != CreateState::Complete {
                bail!(
                    "reserve '{}' stopped in {}: {}",
                    bucket,
                    outcome.state,
                    outcome.saved_result.unwrap_or_default()
                );
            }
            println!("{bucket}: reserved");
            Ok(())
        }
        Command::Release { bucket, owner } => {
            let mut protocol =
                DeleteProtocol::new(RequestContext::new(), client, &bucket, cluster_id, &owner);
            for target in [DeleteState::UpdateStart, DeleteState::DeleteStart, DeleteState::Complete] {
                if !protocol.set_state(target).await {
                    break;
                }
            }
            let outcome = protocol.finish().await;
            if outcome.state != DeleteState::Complete {
                bail!(
                    "release '{}' stopped in {}: {}",
                    bucket,
                    outcome.state,
                    outcome.saved_result.unwrap_or_default()
                );
            }
            println!("{bucket}: released");
            Ok(())
        }
    }
}

fn report(rpc: &str, bucket: &str, result: OperationResult) -> anyhow::Result<()> {
    if result.is_err() {
        bail!("{rpc} for '{bucket}' failed: {result}");
    }
    println!("{bucket}: {rpc} ok");
    Ok(())
}
