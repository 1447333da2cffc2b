use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use nginx_conf_generator::apply::{Publisher, TemplatePublisher};
use nginx_conf_generator::controller::Registry;
use nginx_conf_generator::options::{GeneratorOptions, LogFormat, RunArgs};
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Watch the configured clusters and keep the Nginx configuration in sync
    Run(RunArgs),
    /// Show version and build information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    match args.command {
        Commands::Version => {
            println!("nginx-conf-generator v{}", env!("CARGO_PKG_VERSION"));
            println!("Build Date: {}", env!("BUILD_DATE"));
            println!("Git SHA: {}", env!("GIT_SHA"));
            println!("Rust Version: {}", env!("RUST_VERSION"));
            Ok(())
        }
        Commands::Run(run_args) => run_generator(run_args).await,
    }
}

fn init_tracing(args: &RunArgs) {
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let env_filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let registry = tracing_subscriber::registry().with(env_filter);
    match args.log_format {
        LogFormat::Json => registry.with(fmt::layer().json().with_target(true)).init(),
        LogFormat::Text => registry.with(fmt::layer().with_target(true)).init(),
    }
}

async fn run_generator(args: RunArgs) -> anyhow::Result<()> {
    init_tracing(&args);

    let opts = Arc::new(GeneratorOptions::try_from(&args).context("invalid options")?);
    info!(
        "Starting nginx-conf-generator v{} for {} cluster(s)",
        env!("CARGO_PKG_VERSION"),
        opts.kubeconfig_paths.len()
    );

    let registry = Registry::connect(&opts)
        .await
        .context("failed to connect to the configured clusters")?;

    #[cfg(feature = "rest-api")]
    {
        let server_opts = opts.clone();
        let topology = registry.topology();
        tokio::spawn(async move {
            if let Err(e) = nginx_conf_generator::rest_api::run_server(&server_opts, topology).await
            {
                tracing::error!("Metrics server error: {:?}", e);
            }
        });
    }

    let publisher: Arc<dyn Publisher> = Arc::new(TemplatePublisher::from_options(&opts));

    tokio::select! {
        result = registry.run(opts.clone(), publisher) => {
            result.context("cluster reconciliation stopped")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received interrupt, shutting down");
        }
    }

    Ok(())
}
