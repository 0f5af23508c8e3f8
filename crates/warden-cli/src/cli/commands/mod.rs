use std::path::Path;

use anyhow::Context;
use warden_core::{PolicyServices, WardenConfig};

use super::args::*;
use crate::exit_codes::SUCCESS;

pub mod declared;
pub mod matching;
pub mod rules;

const LOCAL_CONFIG: &str = "warden.yaml";

pub fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    match cli.cmd {
        Command::Match(args) => matching::run(args),
        Command::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(SUCCESS)
        }
        Command::Rules(args) => {
            let services = open_services(cli.config.as_deref(), cli.data_dir.as_deref())?;
            rules::run(args.cmd, &services)
        }
        Command::Declared(args) => {
            let services = open_services(cli.config.as_deref(), cli.data_dir.as_deref())?;
            declared::run_declared(args.cmd, &services)
        }
        Command::Default(args) => {
            let services = open_services(cli.config.as_deref(), cli.data_dir.as_deref())?;
            declared::run_default(args.cmd, &services)
        }
    }
}

/// Defaults, then the config file, then the environment, then `--data-dir`.
pub fn resolve_config(config: Option<&Path>, data_dir: Option<&Path>) -> anyhow::Result<WardenConfig> {
    let config = match config {
        Some(path) => WardenConfig::from_file(path)?,
        None if Path::new(LOCAL_CONFIG).is_file() => WardenConfig::from_file(Path::new(LOCAL_CONFIG))?,
        None => WardenConfig::from_env(),
    };
    Ok(match data_dir {
        Some(dir) => config.with_data_dir(dir),
        None => config,
    })
}

fn open_services(config: Option<&Path>, data_dir: Option<&Path>) -> anyhow::Result<PolicyServices> {
    let config = resolve_config(config, data_dir)?;
    tracing::debug!(data_dir = %config.data_dir.display(), "opening policy services");
    PolicyServices::open(&config)
        .with_context(|| format!("failed to open data directory {}", config.data_dir.display()))
}
