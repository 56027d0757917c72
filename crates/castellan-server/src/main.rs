use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use castellan_controller::ModelController;
use castellan_protocol::{DomainConnection, ManagementServer};
use castellan_server::config::ServerConfig;
use castellan_server::build_controller;

/// Castellan management server.
#[derive(Parser, Debug)]
#[command(name = "castellan")]
#[command(about = "Management control plane for a clustered application server")]
struct Args {
    /// Path to a JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the server name
    #[arg(long)]
    name: Option<String>,

    /// Override the management protocol port
    #[arg(long)]
    management_port: Option<u16>,

    /// Override the HTTP API port
    #[arg(long)]
    http_port: Option<u16>,

    /// Register with a domain controller at host:port
    #[arg(long)]
    domain_controller: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let mut config = ServerConfig::load(args.config.as_ref())?;
    if let Some(name) = args.name {
        config.name = name;
    }
    if let Some(port) = args.management_port {
        config.management.port = port;
    }
    if let Some(port) = args.http_port {
        config.http.port = port;
    }
    if let Some(domain) = args.domain_controller {
        config.domain_controller = Some(domain);
    }
    config.validate()?;

    let controller = build_controller(&config)?;

    let mut servers = tokio::task::JoinSet::new();

    if config.management.enabled {
        let listener = TcpListener::bind(config.management.socket_addr()).await?;
        let server = ManagementServer::with_domain(
            Arc::clone(&controller) as Arc<dyn ModelController>,
            controller.clone(),
        );
        servers.spawn(async move {
            if let Err(e) = server.serve(listener).await {
                error!("management protocol server failed: {e}");
            }
        });
    }

    if config.http.enabled {
        let gateway_controller = Arc::clone(&controller) as Arc<dyn ModelController>;
        let address = config.http.socket_addr();
        servers.spawn(async move {
            if let Err(e) = castellan_gateway::serve(gateway_controller, address).await {
                error!("http gateway failed: {e}");
            }
        });
    }

    // join a domain when one is configured
    let domain = config.domain_controller_addr().map(|address| {
        DomainConnection::new(address, config.name.clone())
    });
    if let Some(connection) = &domain {
        let snapshot = connection
            .register(Arc::clone(&controller) as Arc<dyn ModelController>)
            .await?;
        info!(
            domain = %config.domain_controller.as_deref().unwrap_or_default(),
            "joined domain; snapshot has {} top-level keys",
            snapshot.keys().len()
        );
    }

    info!(name = %config.name, "server started; press ctrl-c to stop");
    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    if let Some(connection) = &domain {
        if let Err(e) = connection.unregister().await {
            error!("failed to unregister from the domain controller: {e}");
        }
    }
    servers.shutdown().await;
    Ok(())
}
