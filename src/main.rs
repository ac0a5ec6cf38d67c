use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use logtally_audit::{Reconciler, ReportFormat, render};
use logtally_k8s::KubeClient;
use logtally_loki::LokiClient;

mod config;

use config::{Config, FileConfig, Overrides};

/// Logtally - reconcile pods' expected log line counts against Loki
#[derive(Parser, Debug)]
#[command(name = "logtally")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file (defaults to ./logtally.toml when present)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Only audit namespaces starting with this prefix
    #[arg(long, value_name = "PREFIX")]
    namespace_prefix: Option<String>,

    /// Loki base address, e.g. http://loki:3100
    #[arg(long, value_name = "URL")]
    loki_address: Option<String>,

    /// Kubeconfig file
    #[arg(long, value_name = "FILE")]
    kubeconfig: Option<PathBuf>,

    /// Kubeconfig context
    #[arg(long)]
    context: Option<String>,

    /// Final report format: text or json
    #[arg(long, default_value = "text")]
    format: ReportFormat,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Progress goes to stderr, the report to stdout
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let file = FileConfig::load(args.config.as_deref())?;
    let config = Config::resolve(
        file,
        Overrides {
            namespace_prefix: args.namespace_prefix,
            loki_address: args.loki_address,
            kubeconfig_path: args.kubeconfig,
            context: args.context,
        },
    )
    .context("Invalid configuration")?;

    let cluster = KubeClient::connect(&config.connect_options()).await?;
    let loki = LokiClient::new(&config.loki_address, config.timeout)?;
    info!(loki = %loki.endpoint(), "Starting log count audit");

    let reconciler = Reconciler::new(cluster, loki, config.settings);
    let summary = reconciler.run().await?;

    info!(
        processed = summary.processed(),
        matched = summary.matched,
        mismatched = summary.mismatched(),
        skipped = summary.skipped,
        "Audit complete"
    );

    let report = render(&summary, args.format).context("Failed to render report")?;
    print!("{report}");

    Ok(())
}
