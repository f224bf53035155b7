//! CLI binary for the gce-metadata crate.

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use gce_metadata::{default_client, on_gce, CancellationToken, MetadataError};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "gce-metadata")]
#[command(
    author,
    version,
    about = "Query the Google Compute Engine metadata server"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Report whether this process runs on GCE
    Detect,

    /// Fetch a metadata value
    Get {
        /// Key below /computeMetadata/v1/, e.g. instance/zone
        key: String,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Print the project ID
    ProjectId,

    /// Print the instance ID
    InstanceId,

    /// Print a value and every change to it until it is deleted
    Watch {
        /// Key below /computeMetadata/v1/
        key: String,
    },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum OutputFormat {
    #[default]
    Text,
    Lines,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "lines" => Ok(OutputFormat::Lines),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("unknown format: {}", s)),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_ctrl_c.cancel();
        }
    });

    match run(cli, &cancel).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, cancel: &CancellationToken) -> Result<(), MetadataError> {
    let client = default_client();

    match cli.command {
        Commands::Detect => {
            println!("{}", on_gce(cancel).await);
            Ok(())
        }

        Commands::Get { key, format } => {
            match format {
                OutputFormat::Text => {
                    println!("{}", client.get(cancel, &key).await?);
                }
                OutputFormat::Lines => {
                    for line in client.get_lines(cancel, &key).await? {
                        println!("{}", line);
                    }
                }
                OutputFormat::Json => {
                    let value: serde_json::Value = client.get_json(cancel, &key).await?;
                    println!("{}", serde_json::to_string_pretty(&value)?);
                }
            }
            Ok(())
        }

        Commands::ProjectId => {
            println!("{}", client.project_id(cancel).await?);
            Ok(())
        }

        Commands::InstanceId => {
            println!("{}", client.instance_id(cancel).await?);
            Ok(())
        }

        Commands::Watch { key } => {
            let result = client
                .subscribe(cancel, &key, |_, value, exists| {
                    if exists {
                        println!("{}", value);
                    } else {
                        println!("{} deleted", key);
                    }
                    Ok(())
                })
                .await;
            match result {
                Err(MetadataError::Cancelled) => Ok(()),
                other => other,
            }
        }
    }
}
