use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use surfstore_rs::config::{default_log_file_path, Config, ConfigOverrides};
use surfstore_rs::http::ApiClient;
use surfstore_rs::server::{self, SurfServer};
use surfstore_rs::{logging, sync};

#[derive(Parser, Debug)]
#[command(name = "surfstore", version)]
struct Cli {
    /// Path to config file
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Server address override (takes precedence over config)
    #[arg(long = "server")]
    server: Option<String>,

    /// Base directory override (takes precedence over config)
    #[arg(long = "basedir")]
    basedir: Option<PathBuf>,

    /// Block size override (takes precedence over config)
    #[arg(long = "blocksize")]
    blocksize: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the block and metadata server
    Serve {
        /// Address to bind
        #[arg(short = 'a', long = "addr", default_value = "127.0.0.1:8080")]
        addr: String,
    },

    /// Run one sync pass against the server
    Sync,

    /// Print the server's file info map
    Status,

    /// Print the resolved config file path
    ConfigPath,

    /// Print version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = Config::resolve_config_path(cli.config.as_deref());
    let overrides = ConfigOverrides {
        server_url: cli.server.clone(),
        base_dir: cli.basedir.clone(),
        block_size: cli.blocksize,
    };

    match cli.command {
        Commands::Serve { addr } => {
            logging::init_log_file(&default_log_file_path())?;
            server::serve(&addr, SurfServer::in_memory()).await
        }

        Commands::Sync => {
            let cfg = Config::load_with_overrides(&config_path, overrides)?;
            logging::init_log_file(&default_log_file_path())?;
            logging::info_kv(
                "sync start",
                &[
                    ("server", cfg.server_url.as_str()),
                    ("base_dir", &cfg.base_dir.display().to_string()),
                    ("block_size", &cfg.block_size.to_string()),
                ],
            );
            let api = ApiClient::new(&cfg.server_url)?;
            sync::sync_once(&api, &cfg.base_dir, cfg.block_size).await?;
            logging::info("sync complete");
            Ok(())
        }

        Commands::Status => {
            let cfg = Config::load_with_overrides(&config_path, overrides)?;
            let api = ApiClient::new(&cfg.server_url)?;
            let remote = api.get_file_info_map().await?;

            let mut names: Vec<&String> = remote.keys().collect();
            names.sort();
            for name in names {
                let meta = &remote[name];
                println!("{} v{} {}", name, meta.version, meta.block_hash_list.join(" "));
            }
            Ok(())
        }

        Commands::ConfigPath => {
            println!("{}", config_path.display());
            Ok(())
        }

        Commands::Version => {
            println!("surfstore {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
