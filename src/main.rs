use clap::Parser;
use color_eyre::Result;
use dynamic_inventory::orchestrator;
use env_logger::Env;
use log::{debug, info};
use std::path::PathBuf;

/// Generate a deployment inventory from a configuration directory
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Print the generated inventory as JSON on stdout
    #[arg(long)]
    list: bool,

    /// Directory holding user_config.yml, conf.d/ and env.d/
    #[arg(long, env = "DEPLOY_CONFIG_DIR", default_value = "/etc/deploy")]
    config: PathBuf,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

fn main() -> Result<()> {
    // Initialize error handling
    color_eyre::install()?;

    let args = Args::parse();

    // Logs go to stderr so --list output stays parseable
    let level = if args.debug { "debug" } else { "warn" };
    env_logger::Builder::from_env(Env::default().default_filter_or(level)).init();

    info!("Configuration directory: {:?}", args.config);
    debug!("Arguments: {:?}", args);

    match orchestrator::generate_inventory(&args.config) {
        Ok(json) => {
            if args.list {
                println!("{}", json);
            }
            Ok(())
        }
        Err(err) => {
            eprintln!("{}", err);
            std::process::exit(1);
        }
    }
}
