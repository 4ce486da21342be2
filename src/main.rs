use anyhow::Result;
use clap::Parser;

use cpack::cli::{Cli, Commands};
use cpack::cli_utils::{cpack_prefix, fail_mark};
use cpack::error::ValidationErrors;
use cpack::{commands, config_discovery, logging};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    logging::init();

    let cli = Cli::parse();

    if let Err(e) = dispatch(cli).await {
        report(&e);
        std::process::exit(1);
    }
}

async fn dispatch(cli: Cli) -> Result<()> {
    let config = config_discovery::load_config_with_discovery(cli.config.as_deref())?;

    match cli.command {
        Commands::Pack(args) => commands::pack::run(&args, config.as_ref()),
        Commands::Unpack(args) => commands::unpack::run(&args, config.as_ref(), cli.verbose),
        Commands::Info(args) => commands::info::run(&args),
        Commands::Run(args) => commands::run::run(&args, config, cli.verbose).await,
        Commands::Snapshot(args) => commands::snapshot::run(&args, config.as_ref()),
        Commands::Hash(args) => commands::hash::run(&args, config.as_ref()),
    }
}

fn report(error: &anyhow::Error) {
    if let Some(validation) = error.downcast_ref::<ValidationErrors>() {
        eprintln!("{} {} Validation failed!", cpack_prefix(), fail_mark());
        for field in &validation.errors {
            eprintln!("- {}: {}", field.field, field.message);
        }
        return;
    }
    eprintln!("{} {} {:#}", cpack_prefix(), fail_mark(), error);
}
