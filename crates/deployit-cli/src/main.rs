//! DeployIt CLI tool.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "deployit")]
#[command(about = "Declarative deployments for small cluster applications", long_about = None)]
struct Cli {
    /// Path to the deployment file
    #[arg(long, global = true, env = "DEPLOYIT_CONFIG", default_value = "deployit.kdl")]
    config: PathBuf,

    /// Stack to operate on; may be omitted when the file declares one stack
    #[arg(long, global = true, env = "DEPLOYIT_STACK")]
    stack: Option<String>,

    /// Emit JSON logs and reports
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check the deployment file and every stack's dependency graph
    Validate,
    /// Show the apply order without changing anything
    Plan,
    /// Converge the selected stack
    Apply {
        /// Resources applied at once; overrides the settings value
        #[arg(long)]
        concurrency: Option<usize>,
        /// Kubeconfig context for cluster and helm calls
        #[arg(long, env = "DEPLOYIT_KUBE_CONTEXT")]
        kube_context: Option<String>,
    },
    /// Print the persisted state
    State,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json);

    let target = commands::Target {
        config: cli.config,
        stack: cli.stack,
        json: cli.json,
    };

    match cli.command {
        Commands::Validate => commands::validate::run(&target)?,
        Commands::Plan => commands::plan::run(&target).await?,
        Commands::Apply {
            concurrency,
            kube_context,
        } => {
            let success = commands::apply::run(&target, concurrency, kube_context).await?;
            if !success {
                std::process::exit(1);
            }
        }
        Commands::State => commands::state::run(&target).await?,
    }

    Ok(())
}
