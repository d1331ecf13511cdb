use clap::{Parser, Subcommand};
use log::{error, info};
use mini_rendezvous::console::{run_directory_console, run_peer_console};
use mini_rendezvous::core::load_toml;
use mini_rendezvous::utils::setup_logging;
use mini_rendezvous::{DirectoryConfig, DirectoryService, PeerConfig, PeerNode, Result, VERSION};
use std::path::PathBuf;
use tokio::io::BufReader;

#[derive(Parser)]
#[command(name = "mini-rendezvous")]
#[command(about = "Peer-to-peer file sharing through a central rendezvous directory")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the rendezvous directory
    Directory {
        /// Address to listen on (host:port)
        #[arg(short, long)]
        listen: Option<String>,
        /// Maximum number of peers the directory admits
        #[arg(long)]
        max_peers: Option<usize>,
        /// TOML config file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Run a peer
    Peer {
        /// Address to listen on (host:port)
        #[arg(short, long)]
        listen: Option<String>,
        /// Address other peers should dial, if different from --listen
        #[arg(short, long)]
        advertise: Option<String>,
        /// Directory address (host:port)
        #[arg(short, long)]
        directory: Option<String>,
        /// Where fetched files are written
        #[arg(short, long)]
        storage: Option<PathBuf>,
        /// TOML config file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging();

    let cli = Cli::parse();
    info!("mini-rendezvous v{}", VERSION);

    match cli.command {
        Commands::Directory {
            listen,
            max_peers,
            config,
        } => {
            let mut config: DirectoryConfig = match config {
                Some(path) => load_toml(&path)?,
                None => DirectoryConfig::default(),
            };
            if let Some(listen) = listen {
                config.listen_addr = listen;
            }
            if let Some(max_peers) = max_peers {
                config.max_peers = max_peers;
            }

            let (service, handle) = DirectoryService::start(config).await?;
            println!("Directory listening on {}", handle.local_addr());

            let stdin = BufReader::new(tokio::io::stdin());
            tokio::select! {
                result = run_directory_console(&service, stdin) => {
                    if let Err(e) = result {
                        error!("Directory console failed: {}", e);
                    }
                }
                _ = tokio::signal::ctrl_c() => info!("Interrupted"),
            }
            handle.shutdown();
        }
        Commands::Peer {
            listen,
            advertise,
            directory,
            storage,
            config,
        } => {
            let mut config: PeerConfig = match config {
                Some(path) => load_toml(&path)?,
                None => PeerConfig::default(),
            };
            if let Some(listen) = listen {
                config.listen_addr = listen;
            }
            if advertise.is_some() {
                config.advertise_addr = advertise;
            }
            if let Some(directory) = directory {
                config.directory_addr = directory;
            }
            if let Some(storage) = storage {
                config.storage_dir = storage;
            }

            let (node, handle) = PeerNode::start(config).await?;
            let peer_id = node.connect_to_directory().await?;
            println!("Connected as Peer {} on {}", peer_id, node.address());

            let stdin = BufReader::new(tokio::io::stdin());
            tokio::select! {
                result = run_peer_console(&node, stdin) => {
                    if let Err(e) = result {
                        error!("Peer console failed: {}", e);
                    }
                }
                _ = tokio::signal::ctrl_c() => info!("Interrupted"),
            }
            handle.shutdown();
        }
    }

    Ok(())
}
