//! DSDir - dataset directory node
//!
//! Opens the node's local metadata cache, connects the configured
//! directory backend, republishes what this node already serves and then
//! runs one admin command against the directory. `serve` keeps the node
//! up as a DHT peer until interrupted.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use dsdir_common::{Config, DatasetId, DatasetRef};
use dsdir_data::DriverFactory;
use dsdir_directory::{
    DataGateway, DatasetService, DhtPeerService, DirectoryBackend, Resolution, build_backend,
};
use dsdir_proto::dht::dht_service_server::DhtServiceServer;
use dsdir_store::RedbCache;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tonic::transport::Server;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "dsdir")]
#[command(about = "Dataset metadata directory")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "dsdir.toml", env = "DSDIR_CONFIG")]
    config: String,

    /// Log level (overrides the config file)
    #[arg(long)]
    log_level: Option<String>,

    /// Do not register the datasets listed in the config file
    #[arg(long)]
    skip_defaults: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Read a dataset through its driver and publish its metadata
    Register {
        /// Dataset name
        name: String,
        /// Path handed to the driver
        path: String,
        /// Driver type
        #[arg(short, long, default_value = "csv")]
        driver: String,
    },
    /// Look a single dataset up
    Find {
        /// Dataset name
        name: String,
    },
    /// Resolve a group of datasets under the resolution timeout
    Resolve {
        /// Dataset names
        #[arg(required = true)]
        names: Vec<String>,
        /// Resolution timeout in seconds (overrides the config file)
        #[arg(short, long)]
        timeout: Option<u64>,
    },
    /// List datasets held in the local cache
    List,
    /// Fetch a dataset the way the transfer layer does
    Fetch {
        /// Dataset name
        name: String,
    },
    /// Delete a dataset
    Delete {
        /// Dataset name
        name: String,
    },
    /// Serve values for the other DHT peers until interrupted
    Serve,
}

/// Everything a command runs against
struct Node {
    config: Config,
    nodelet_addr: String,
    backend: Arc<dyn DirectoryBackend>,
    drivers: Arc<DriverFactory>,
    service: DatasetService,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_found = Path::new(&args.config).exists();
    let config = if config_found {
        Config::load(&args.config)?
    } else {
        Config::default()
    };

    let log_level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if !config_found {
        warn!("Config file {} not found, using defaults", args.config);
    }

    let nodelet_addr = config.node.nodelet_addr();
    info!("Starting dsdir node {}", nodelet_addr);

    let cache_path = config.storage.cache_path();
    let cache = Arc::new(RedbCache::open(&cache_path)?);
    info!("Local meta cache at {}", cache_path.display());

    let backend = build_backend(&config, cache)?;
    let drivers = Arc::new(DriverFactory::new());

    let service = DatasetService::new(Arc::clone(&backend), Arc::clone(&drivers), &nodelet_addr)
        .with_poll_interval(config.directory.poll_interval());
    service.set_resolution_timeout(config.directory.resolution_timeout());

    service.restore_from_local_storage().await?;
    if !args.skip_defaults && !config.datasets.is_empty() {
        let loaded = service.load_default_datasets(&config.datasets).await;
        info!("Loaded {}/{} default datasets", loaded, config.datasets.len());
    }

    let node = Node {
        config,
        nodelet_addr,
        backend,
        drivers,
        service,
    };
    let outcome = node.run(args.command).await;

    // Publishes still in flight would die with the process
    node.backend.flush().await;
    outcome
}

impl Node {
    async fn run(&self, command: Commands) -> Result<()> {
        let Self {
            config,
            nodelet_addr,
            backend,
            drivers,
            service,
        } = self;

        match command {
            Commands::Register { name, path, driver } => {
                let driver = drivers.get_driver(&driver, nodelet_addr)?;
                let (dataset, meta) = service.new_dataset(driver, &path, &name).await?;
                println!("Registered {} ({} rows)", name, dataset.num_rows());
                println!("{}", serde_json::to_string_pretty(&meta)?);
            }
            Commands::Find { name } => match service.find_dataset(&DatasetId::from_name(&name)).await? {
                Some(meta) => println!("{}", serde_json::to_string_pretty(&meta)?),
                None => bail!("dataset {name} not found"),
            },
            Commands::Resolve { names, timeout } => {
                if let Some(secs) = timeout {
                    service.set_resolution_timeout(Duration::from_secs(secs));
                }
                let refs = names
                    .iter()
                    .enumerate()
                    .map(|(idx, name)| DatasetRef::new(name.clone(), idx))
                    .collect();
                match service.resolve(refs).await {
                    Resolution::Complete(entries) => {
                        for (meta, idx) in entries {
                            println!("{}\t{}\t{}", names[idx], meta.id(), meta.data_url());
                        }
                    }
                    Resolution::TimedOut { resolved, missing } => {
                        for (meta, idx) in resolved {
                            println!("{}\t{}\t{}", names[idx], meta.id(), meta.data_url());
                        }
                        bail!("resolution timed out, unresolved: {}", missing.join(", "));
                    }
                }
            }
            Commands::List => {
                let metas = backend.list_local()?;
                println!("Local datasets ({})", metas.len());
                println!("==============");
                for meta in metas {
                    println!(
                        "{}\t{:?}\t{}\t{}",
                        meta.description(),
                        meta.visibility(),
                        meta.driver_type(),
                        meta.data_url()
                    );
                }
            }
            Commands::Fetch { name } => {
                let gateway = DataGateway::new(Arc::clone(backend), Arc::clone(drivers), nodelet_addr);
                let stream = gateway
                    .do_get(DatasetId::from_name(&name).as_bytes())
                    .await?;
                let schema = stream.schema();
                let mut rows = 0;
                let mut batches = 0;
                for batch in stream {
                    rows += batch?.num_rows();
                    batches += 1;
                }
                println!("Dataset {name}: {rows} rows in {batches} batches");
                for field in schema.fields() {
                    println!("  {}: {}", field.name(), field.data_type());
                }
            }
            Commands::Delete { name } => {
                service.delete_dataset(&DatasetId::from_name(&name)).await?;
            }
            Commands::Serve => {
                let addr: SocketAddr = config
                    .dht
                    .listen
                    .parse()
                    .with_context(|| format!("invalid dht.listen address {}", config.dht.listen))?;
                let values_path = config.storage.dht_path();
                let values = Arc::new(RedbCache::open(&values_path)?);
                info!("DHT peer values at {}", values_path.display());

                info!("DHT peer service listening on {}", addr);
                Server::builder()
                    .add_service(DhtServiceServer::new(DhtPeerService::new(values)))
                    .serve_with_shutdown(addr, async {
                        tokio::signal::ctrl_c().await.ok();
                        info!("Shutting down...");
                    })
                    .await
                    .context("gRPC server error")?;
            }
        }

        Ok(())
    }
}
