//! # CLI Interface
//!
//! Defines the command-line argument structure for `ipfs-storage-node`
//! using `clap` derive. Every flag can also come from an `IPFS_STORAGE_*`
//! environment variable.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// IPFS hash registry node.
///
/// Hosts the registry contract, serves the REST/JSON-RPC API and exposes
/// Prometheus metrics. Offline subcommands drive the same registry directly
/// from the data directory while the node is stopped.
#[derive(Parser, Debug)]
#[command(
    name = "ipfs-storage-node",
    about = "IPFS hash registry node",
    version,
    propagate_version = true
)]
pub struct StorageNodeCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a data directory: deployer key and `config.toml`.
    Init(InitArgs),
    /// Start the node, deploying the registry on first start.
    Run(RunArgs),
    /// Pin a file and record its hash on the registry.
    Upload(UploadArgs),
    /// List files stored for an address.
    Files(FilesArgs),
    /// Register an address (owner only).
    Register(MembershipArgs),
    /// Unregister an address (owner only).
    Unregister(MembershipArgs),
    /// Generate a new account key file.
    Keygen(KeygenArgs),
    /// Query the status of a running node via its API.
    Status(StatusArgs),
    /// Print version information and exit.
    Version,
}

/// Location of the node's data directory.
#[derive(Args, Debug, Clone)]
pub struct DataDirArg {
    /// Directory holding the chain store, keys, blobs and `config.toml`.
    #[arg(
        long,
        short = 'd',
        env = "IPFS_STORAGE_DATA_DIR",
        default_value = ".ipfs-storage"
    )]
    pub data_dir: PathBuf,
}

/// Arguments for the `init` subcommand.
#[derive(Parser, Debug)]
pub struct InitArgs {
    #[command(flatten)]
    pub data: DataDirArg,

    /// Network preset: rsk-testnet, rsk-mainnet or devnet.
    #[arg(long, env = "IPFS_STORAGE_NETWORK", default_value = "devnet")]
    pub network: String,

    /// Overwrite an existing deployer key and config.
    #[arg(long)]
    pub force: bool,
}

/// Arguments for the `run` subcommand. Flags override `config.toml`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub data: DataDirArg,

    /// Path to the node configuration file (TOML).
    ///
    /// When omitted, the node looks for `config.toml` in the data directory.
    #[arg(long, short = 'c', env = "IPFS_STORAGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Network preset.
    #[arg(long, env = "IPFS_STORAGE_NETWORK")]
    pub network: Option<String>,

    /// Address to bind the API and metrics listeners on.
    #[arg(long, env = "IPFS_STORAGE_BIND")]
    pub bind: Option<String>,

    /// Port for the REST / JSON-RPC API.
    #[arg(long, env = "IPFS_STORAGE_RPC_PORT")]
    pub rpc_port: Option<u16>,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "IPFS_STORAGE_METRICS_PORT")]
    pub metrics_port: Option<u16>,

    /// Log format: pretty or json.
    #[arg(long, env = "IPFS_STORAGE_LOG_FORMAT")]
    pub log_format: Option<String>,

    /// Deployer key file. Defaults to `deployer.key` in the data directory.
    #[arg(long, env = "IPFS_STORAGE_DEPLOYER_KEY")]
    pub deployer_key: Option<PathBuf>,
}

/// Arguments for the `upload` subcommand.
#[derive(Parser, Debug)]
pub struct UploadArgs {
    #[command(flatten)]
    pub data: DataDirArg,

    /// Key file of the uploading account.
    #[arg(long, short = 'k', env = "IPFS_STORAGE_KEY")]
    pub key: PathBuf,

    /// File to upload.
    pub file: PathBuf,

    /// Name to record. Defaults to the file's own name.
    #[arg(long)]
    pub name: Option<String>,

    /// Network the client expects the registry to be on.
    #[arg(long, env = "IPFS_STORAGE_NETWORK")]
    pub network: Option<String>,
}

/// Arguments for the `files` subcommand.
#[derive(Parser, Debug)]
pub struct FilesArgs {
    #[command(flatten)]
    pub data: DataDirArg,

    /// Key file of the reading account.
    #[arg(long, short = 'k', env = "IPFS_STORAGE_KEY")]
    pub key: PathBuf,

    /// Address whose files to list. Defaults to the reading account.
    #[arg(long)]
    pub address: Option<String>,
}

/// Arguments for `register` and `unregister`.
#[derive(Parser, Debug)]
pub struct MembershipArgs {
    #[command(flatten)]
    pub data: DataDirArg,

    /// Owner key file. Defaults to `deployer.key` in the data directory.
    #[arg(long, short = 'k', env = "IPFS_STORAGE_KEY")]
    pub key: Option<PathBuf>,

    /// Address to register or unregister.
    pub address: String,
}

/// Arguments for the `keygen` subcommand.
#[derive(Parser, Debug)]
pub struct KeygenArgs {
    /// Where to write the key file.
    #[arg(long, short = 'o')]
    pub out: PathBuf,

    /// Overwrite an existing file.
    #[arg(long)]
    pub force: bool,
}

/// Arguments for the `status` subcommand.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// API endpoint of the running node.
    #[arg(long, env = "IPFS_STORAGE_RPC_URL", default_value = "http://127.0.0.1:8545")]
    pub rpc_url: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli_structure() {
        // Ensures the derive macros produce a valid CLI definition.
        StorageNodeCli::command().debug_assert();
    }

    #[test]
    fn upload_takes_positional_file() {
        let cli = StorageNodeCli::try_parse_from([
            "ipfs-storage-node",
            "upload",
            "--key",
            "user.key",
            "notes.txt",
        ])
        .unwrap();
        match cli.command {
            Commands::Upload(args) => {
                assert_eq!(args.file, PathBuf::from("notes.txt"));
                assert!(args.name.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn run_flags_are_optional_overrides() {
        let cli =
            StorageNodeCli::try_parse_from(["ipfs-storage-node", "run", "--rpc-port", "9000"])
                .unwrap();
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.rpc_port, Some(9000));
                assert!(args.metrics_port.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
