//! Gateway entry point.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use mysql_rpc_gateway::be::RpcBackend;
use mysql_rpc_gateway::config::DEFAULT_CONFIG_FILE;
use mysql_rpc_gateway::mysql::AcceptAllAuth;
use mysql_rpc_gateway::{Config, GatewayServer, Handler};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Address to listen on for MySQL clients
    #[arg(short, long)]
    listen: Option<String>,

    /// Upstream host or URL of the database service
    #[arg(short = 'H', long)]
    host: Option<String>,

    #[arg(short, long)]
    username: Option<String>,

    #[arg(short, long)]
    password: Option<String>,

    /// Compression for backend calls (gzip or identity)
    #[arg(short = 'C', long)]
    compress: Option<String>,

    /// Log level, overridden by RUST_LOG
    #[arg(long)]
    log_level: Option<String>,

    /// PEM certificate for the MySQL listener; requires --tls-key
    #[arg(long)]
    tls_cert: Option<PathBuf>,

    #[arg(long)]
    tls_key: Option<PathBuf>,
}

impl Args {
    fn apply(self, config: &mut Config) {
        let overrides = [
            (self.listen, &mut config.listen),
            (self.host, &mut config.upstream),
            (self.username, &mut config.username),
            (self.password, &mut config.password),
            (self.compress, &mut config.compression),
            (self.log_level, &mut config.log_level),
        ];
        for (value, field) in overrides {
            if let Some(value) = value {
                *field = value;
            }
        }
        if self.tls_cert.is_some() {
            config.tls_cert = self.tls_cert;
        }
        if self.tls_key.is_some() {
            config.tls_key = self.tls_key;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = Config::load(&args.config)?;
    args.apply(&mut config);
    init_logging(&config.log_level)?;
    config.validate()?;

    info!("Starting MySQL gateway {}", env!("CARGO_PKG_VERSION"));

    let backend = RpcBackend::connect_lazy(&config.backend_options()?)?;
    let handler = Arc::new(Handler::new(Arc::new(backend)));
    let auth = AcceptAllAuth::new(config.auth_method()?);
    let server = Arc::new(GatewayServer::new(handler, auth, config.server_options()?));

    let serving = {
        let server = server.clone();
        tokio::spawn(async move { server.listen_and_serve().await })
    };

    tokio::select! {
        result = serving => {
            match result? {
                Ok(()) => info!("MySQL gateway stopped"),
                Err(e) => {
                    error!("MySQL gateway failed: {}", e);
                    return Err(e.into());
                }
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutting down MySQL gateway");
            server.close();
        }
    }

    Ok(())
}

fn init_logging(log_level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(log_level))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true).with_line_number(true))
        .try_init()?;

    Ok(())
}

/// Waits for SIGINT or SIGTERM.
async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C signal"),
        _ = terminate => info!("Received SIGTERM signal"),
    }
}
