use crate::init_config::CmdConfig;
use crate::remote::{RemoteArgs, RemoteCmd};
use anyhow::Context;
use clap::{Parser, Subcommand};
use clap_verbosity_flag::InfoLevel;
use directories::ProjectDirs;
use s5_pins_service::config::PinsNodeConfig;
use std::path::PathBuf;

mod init_config;
mod remote;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Node config file, defaults to `node.toml` in the platform config dir
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(flatten)]
    verbosity: clap_verbosity_flag::Verbosity<InfoLevel>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Modify the pinning node's config
    Config {
        #[command(subcommand)]
        cmd: CmdConfig,
    },
    /// Start the pinning service and resume outstanding pin requests
    Start,
    /// Manage pins on a remote pinning service
    Remote {
        #[command(flatten)]
        args: RemoteArgs,
        #[command(subcommand)]
        cmd: RemoteCmd,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    // - Config under: ~/.config/s5-pins/node.toml
    // - Data under:   ~/.local/share/s5-pins/
    let dirs = ProjectDirs::from("", "", "s5-pins")
        .context("failed to determine config directory path")?;
    let node_config_file = cli
        .config
        .unwrap_or_else(|| dirs.config_dir().join("node.toml"));

    match cli.cmd {
        Commands::Config { cmd } => cmd.run(node_config_file, dirs.data_dir()),
        Commands::Start => {
            let toml_content = std::fs::read_to_string(&node_config_file)
                .with_context(|| format!("could not read {}", node_config_file.display()))?;
            let config: PinsNodeConfig =
                toml::from_str(&toml_content).context("could not parse node config file")?;
            s5_pins_service::run_server(config).await
        }
        Commands::Remote { args, cmd } => remote::run(args, cmd).await,
    }
}
