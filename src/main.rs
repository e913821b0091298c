use clap::Parser;
use std::error::Error;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use craftdock::branding::BrandingIcon;
use craftdock::config::ManagerConfig;
use craftdock::dns::{CloudflareDns, DnsAutomation, DnsReconciler};
use craftdock::meta::MetadataService;
use craftdock::mods::ModService;
use craftdock::registry::{ContentRegistry, ModrinthClient};
use craftdock::runtime::{ContainerRuntime, DockerRuntime};
use craftdock::servers::ServerManager;
use craftdock::web::{create_axum_router, AppState};

/// Minecraft server manager: containers, DNS, mods and modpacks over HTTP.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Optional TOML configuration file. Environment variables override it.
    #[arg(short, long)]
    config: Option<String>,
}

fn init_logging(log_dir: &str) -> WorkerGuard {
    // JSON file log, rotated daily
    let (file_writer, guard) = tracing_appender::non_blocking(rolling::daily(log_dir, "craftdock.log"));
    let file_layer = fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .json();

    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();
    guard
}

fn build_dns(config: &ManagerConfig) -> DnsAutomation {
    if !config.auto_dns_enabled {
        return DnsAutomation::disabled();
    }
    if config.mc_parent_domain.trim().is_empty() {
        warn!("AUTO_DNS_ENABLED is set but MC_PARENT_DOMAIN is empty; DNS automation disabled.");
        return DnsAutomation::disabled();
    }
    match CloudflareDns::new(
        config.cf_api_token.as_deref(),
        config.cf_zone_id.as_deref(),
        config.cf_zone_name.as_deref(),
    ) {
        Ok(provider) => {
            info!(parent_domain = %config.mc_parent_domain, "DNS automation enabled.");
            DnsAutomation::new(Arc::new(provider), config.mc_parent_domain.clone())
        }
        Err(e) => {
            error!(error = %e, "Cloudflare misconfigured; DNS automation disabled.");
            DnsAutomation::disabled()
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal.");
    }
    info!("Shutdown signal received.");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    let config = Arc::new(ManagerConfig::load(args.config.as_deref())?);
    let _log_guard = init_logging(&config.log_dir);
    info!(version = env!("CARGO_PKG_VERSION"), "Starting craftdock...");

    let runtime: Arc<dyn ContainerRuntime> =
        Arc::new(DockerRuntime::connect(config.docker_host.as_deref())?);
    let registry: Arc<dyn ContentRegistry> =
        Arc::new(ModrinthClient::new(&config.modrinth_base_url)?);
    let dns = build_dns(&config);

    let servers = Arc::new(ServerManager::new(
        runtime.clone(),
        dns.clone(),
        BrandingIcon::new(config.branding_icon_path.clone()),
        config.clone(),
    ));
    let mods = Arc::new(ModService::new(registry, servers.clone()));
    let meta = Arc::new(MetadataService::new()?);

    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let reconciler = DnsReconciler::new(runtime, dns, config.clone());
    let reconciler_handle = tokio::spawn(reconciler.run(shutdown_rx));

    let app_state = Arc::new(AppState {
        servers,
        mods,
        meta,
        config: config.clone(),
    });
    let app = create_axum_router(app_state);

    let listener = tokio::net::TcpListener::bind(config.listen_address.as_str()).await?;
    info!(address = %config.listen_address, "HTTP server listening.");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(());
    if let Err(e) = reconciler_handle.await {
        warn!(error = %e, "DNS reconciler task ended abnormally.");
    }
    info!("craftdock stopped.");
    Ok(())
}
