use std::path::PathBuf;

use alloy_core::primitives::Address;
use cascade_deploy::{CASCADE_CONFIG_FILENAME, Deployer};
use clap::{Parser, Subcommand};
use tracing::level_filters::LevelFilter;

/// How command results are printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum OutputFormat {
    Table,
    Json,
}

#[derive(Parser)]
#[command(name = "cascade")]
#[command(
    author,
    version,
    about = "Deploy interdependent contracts in order, once"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(
        short,
        long,
        global = true,
        env = "CASCADE_VERBOSITY",
        default_value_t = LevelFilter::INFO
    )]
    pub verbosity: LevelFilter,

    /// Path to the configuration file (or a directory containing `Cascade.toml`).
    ///
    /// Missing files are ignored and defaults are used instead.
    #[arg(
        short,
        long,
        global = true,
        alias = "conf",
        env = "CASCADE_CONFIG",
        default_value = CASCADE_CONFIG_FILENAME
    )]
    pub config: PathBuf,

    /// Settings overriding the configuration file and environment.
    #[clap(flatten)]
    pub overrides: ConfigOverrides,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the deployment pipeline and print the deployed units.
    Deploy {
        /// Write the resolved configuration next to the snapshots before deploying.
        #[arg(long)]
        save_config: bool,

        #[arg(long, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },
    /// Print the stored deployment snapshot.
    Show {
        #[arg(long, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },
    /// Print the configuration batches for the stored deployment without sending them.
    EncodeBatch,
    /// Generate shell completions.
    Completions {
        shell: clap_complete::Shell,
    },
}

/// Command line overrides, applied on top of the file and environment configuration.
#[derive(Debug, Clone, Default, Parser)]
pub struct ConfigOverrides {
    /// The JSON-RPC endpoint to deploy through.
    #[arg(long, global = true)]
    pub rpc_url: Option<String>,

    /// Account sending transactions.
    #[arg(long, global = true)]
    pub sender: Option<Address>,

    /// Root of the contract workspace holding the build artifacts.
    #[arg(long, global = true)]
    pub artifacts: Option<PathBuf>,

    /// Directory deployment snapshots are stored in.
    #[arg(long, global = true)]
    pub snapshots: Option<PathBuf>,

    /// Name of the snapshot to read and write.
    #[arg(long, global = true)]
    pub snapshot: Option<String>,

    /// `false` reuses an existing snapshot, `true` always redeploys.
    #[arg(long, global = true)]
    pub force_redeploy: Option<bool>,

    /// Identity sending configuration batches.
    #[arg(long, global = true)]
    pub caller: Option<Address>,
}

impl ConfigOverrides {
    pub fn apply(self, deployer: &mut Deployer) {
        if let Some(rpc_url) = self.rpc_url {
            deployer.rpc_url = rpc_url;
        }
        if let Some(sender) = self.sender {
            deployer.sender = Some(sender);
        }
        if let Some(artifacts) = self.artifacts {
            deployer.artifacts = artifacts;
        }
        if let Some(snapshots) = self.snapshots {
            deployer.snapshots = snapshots;
        }
        if let Some(snapshot) = self.snapshot {
            deployer.run.snapshot = snapshot;
        }
        if let Some(force_redeploy) = self.force_redeploy {
            deployer.run.force_redeploy = Some(force_redeploy);
        }
        if let Some(caller) = self.caller {
            deployer.run.caller = Some(caller);
        }
    }
}
