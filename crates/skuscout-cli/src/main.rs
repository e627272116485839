mod run;
mod sites;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// Exit status for configuration or setup failures.
const EXIT_CONFIG: u8 = 2;

#[derive(Debug, Parser)]
#[command(name = "skuscout")]
#[command(about = "Look up product records by SKU across vendor sites")]
struct Cli {
    /// Site registry file; overrides SKUSCOUT_SITES_PATH.
    #[arg(long, global = true)]
    registry: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one batch of SKUs against a site.
    Run {
        /// Site id from the registry.
        #[arg(long)]
        site: String,
        /// Input JSON (`{"skus": [...], "batch_size": n}`), or `-` for stdin.
        #[arg(long)]
        input: PathBuf,
        /// Output file for the record array; stdout when omitted.
        #[arg(long)]
        output: Option<PathBuf>,
        /// Pause at each checkpoint and wait for enter.
        #[arg(long)]
        debug_step: bool,
        /// Request a visible browser where the backend supports one.
        #[arg(long)]
        headed: bool,
    },
    /// List the sites in the registry.
    Sites,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut config = match skuscout_core::load_engine_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };
    if let Some(path) = &cli.registry {
        config.sites_path.clone_from(path);
    }

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let outcome = match cli.command {
        Commands::Run {
            site,
            input,
            output,
            debug_step,
            headed,
        } => {
            config.debug_step |= debug_step;
            if headed {
                config.headless = false;
            }
            run::run_batch_command(config, &site, &input, output.as_deref()).await
        }
        Commands::Sites => sites::list_sites(&config).map(|()| 0),
    };

    match outcome {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(EXIT_CONFIG)
        }
    }
}

#[cfg(test)]
mod tests;
