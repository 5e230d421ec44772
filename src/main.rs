use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};

use kubemcp_k8s::{DEFAULT_FAN_OUT_LIMIT, ProviderConfig, Registry};

mod commands;

/// kubemcp - Kubernetes context resolution and CRD discovery for MCP tool servers
#[derive(Parser, Debug)]
#[command(name = "kubemcp")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Never cache API clients between requests
    #[arg(long, global = true)]
    stateless: bool,

    /// Default log level when RUST_LOG is not set
    #[arg(long, global = true, default_value = "warn")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List contexts available to the configured provider
    Contexts,

    /// Show the current context
    Current,

    /// Resolve a context name the way tool requests do
    Validate {
        /// Context name (empty resolves to the current context)
        #[arg(default_value = "")]
        context: String,
    },

    /// Detect installed ecosystem CRD groups
    Crds {
        #[arg(long, default_value = "")]
        context: String,

        /// Ignore the cached result and probe the cluster again
        #[arg(long)]
        refresh: bool,
    },

    /// List toolsets enabled by installed CRDs
    Toolsets {
        #[arg(long, default_value = "", conflicts_with = "all_contexts")]
        context: String,

        /// Query every context concurrently
        #[arg(long)]
        all_contexts: bool,

        /// Maximum clusters queried at once with --all-contexts
        #[arg(long, default_value_t = DEFAULT_FAN_OUT_LIMIT)]
        concurrency: usize,
    },

    /// Check whether a single CRD is installed
    CrdExists {
        /// Full CRD name, e.g. certificates.cert-manager.io
        name: String,

        #[arg(long, default_value = "")]
        context: String,
    },

    /// Print the effective configuration as TOML
    Config,

    /// Watch kubeconfig and log changes until interrupted
    Watch {
        /// Poll interval in seconds (defaults to MCP_KUBECONFIG_WATCH_INTERVAL or 5)
        #[arg(long)]
        interval: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr; stdout carries command output
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(args.log_level.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = run(args).await;

    if let Err(e) = &result {
        eprintln!("Error: {:#}", e);
    }

    result
}

async fn run(args: Args) -> Result<()> {
    let mut config = ProviderConfig::load_from_environment();
    if args.stateless {
        config.stateless = true;
    }

    let registry = Registry::from_config(config).await?;

    match args.command {
        Command::Contexts => commands::contexts(&registry),
        Command::Current => commands::current(&registry),
        Command::Validate { context } => commands::validate(&registry, &context),
        Command::Crds { context, refresh } => commands::crds(&registry, &context, refresh).await,
        Command::Toolsets {
            context,
            all_contexts,
            concurrency,
        } => {
            if all_contexts {
                commands::toolsets_all(&registry, concurrency).await
            } else {
                commands::toolsets(&registry, &context).await
            }
        }
        Command::CrdExists { name, context } => {
            commands::crd_exists(&registry, &name, &context).await
        }
        Command::Config => commands::config(&registry),
        Command::Watch { interval } => {
            commands::watch(&registry, interval.map(Duration::from_secs)).await
        }
    }
}
