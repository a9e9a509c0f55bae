//! cascade deploys interdependent contracts in dependency order, once.

mod cli;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use cascade_deploy::{CASCADE_CONFIG_FILENAME, Deployer, DeploymentResult, call};
use clap::{CommandFactory, Parser};
use comfy_table::{Table, presets::UTF8_FULL};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

use cli::{Cli, Command, OutputFormat};

/// Resolve the configuration: defaults, then the TOML file, then `CASCADE_` environment
/// variables, then command line flags.
fn load_config(cli: &Cli) -> Result<Deployer> {
    let path = config_file(&cli.config);

    let mut deployer: Deployer = Figment::new()
        .merge(Serialized::defaults(Deployer::default()))
        .merge(Toml::file(&path))
        .merge(Env::prefixed("CASCADE_").split("__"))
        .extract()
        .context(format!("Failed to load configuration from {}", path.display()))?;

    cli.overrides.clone().apply(&mut deployer);
    Ok(deployer)
}

fn config_file(path: &Path) -> PathBuf {
    if path.is_dir() {
        path.join(CASCADE_CONFIG_FILENAME)
    } else {
        path.to_path_buf()
    }
}

fn print_deployment(deployment: &DeploymentResult, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(deployment)?);
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table.load_preset(UTF8_FULL).set_header(vec!["Role", "Address"]);
            for (role, address) in deployment.iter() {
                table.add_row(vec![role.clone(), address.to_string()]);
            }
            println!("{table}");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    match &cli.command {
        Command::Deploy {
            save_config,
            format,
        } => {
            let deployer = load_config(&cli)?;
            if *save_config {
                deployer.save_config()?;
            }

            let deployment = deployer.deploy().await?;
            print_deployment(&deployment, *format)?;
        }
        Command::Show { format } => {
            let deployer = load_config(&cli)?;
            let record = deployer.load_snapshot().await?.with_context(|| {
                format!(
                    "No snapshot `{}` in {}",
                    deployer.snapshot_key(),
                    deployer.snapshots.display()
                )
            })?;

            tracing::info!(
                config_hash = %record.config_hash,
                deployed_at = record.deployed_at,
                version = %record.version,
                "Snapshot loaded"
            );
            print_deployment(&record.deployment, *format)?;
        }
        Command::EncodeBatch => {
            let deployer = load_config(&cli)?;
            for (phase, tx) in deployer.preview().await? {
                println!("phase:    {phase}");
                println!("to:       {}", tx.to);
                println!("value:    {}", tx.value);
                println!("calldata: {}", tx.data);

                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL)
                    .set_header(vec!["Target", "Value", "Call data"]);
                for call in call::decode_batch(&tx.data)? {
                    table.add_row(vec![
                        call.target.to_string(),
                        call.value.to_string(),
                        call.calldata.to_string(),
                    ]);
                }
                println!("{table}");
            }
        }
        Command::Completions { shell } => {
            clap_complete::generate(*shell, &mut Cli::command(), "cascade", &mut std::io::stdout());
        }
    }

    Ok(())
}
