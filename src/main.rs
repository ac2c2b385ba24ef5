mod cli;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};

use vodforge::commands;
use vodforge::Config;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins; otherwise the default depends on --verbose.
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "vodforge=trace,vf_worker=trace,vf_av=debug,vf_storage=debug,vf_db=debug,vf_media=debug"
                .to_string()
        } else {
            "vodforge=info,vf_worker=info,vf_av=info,vf_storage=info,vf_db=warn,vf_media=info"
                .to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Start => {
            let config = Config::load_or_default(config_path);
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(vf_worker::start(config))?;
            Ok(())
        }
        Commands::Submit {
            file,
            category,
            name,
        } => {
            let config = Config::load_or_default(config_path);
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(commands::submit(config, &file, &category, name.as_deref()))
        }
        Commands::Status { job, resolve } => {
            let config = Config::load_or_default(config_path);
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(commands::status(config, job, resolve))
        }
        Commands::Retry { job } => {
            let config = Config::load_or_default(config_path);
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(commands::retry(config, job))
        }
        Commands::Migrate { job } => {
            let config = Config::load_or_default(config_path);
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(commands::migrate(config, job))
        }
        Commands::Delete { job } => {
            let config = Config::load_or_default(config_path);
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(commands::delete(config, job))
        }
        Commands::Reconcile => {
            let config = Config::load_or_default(config_path);
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(commands::reconcile(config))
        }
        Commands::Normalize { manifest } => {
            let config = Config::load_or_default(config_path);
            commands::normalize(&config, &manifest)
        }
        Commands::CheckTools => {
            let config = Config::load_or_default(config_path);
            commands::check_tools(&config)
        }
        Commands::Validate {
            config: validate_path,
        } => {
            let path = validate_path.or(cli.config);
            commands::validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("vodforge {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
