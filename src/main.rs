use std::sync::Arc;

use pgwire::tokio::TlsAcceptor;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use staybook::config::ServerConfig;
use staybook::observability;
use staybook::tenant::TenantManager;
use staybook::wire;

/// Resolves on ctrl-c, or SIGTERM where the platform has it.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!("failed to register SIGTERM handler: {e}");
                ctrl_c.await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}

struct Server {
    config: ServerConfig,
    tenants: Arc<TenantManager>,
    tls: Option<TlsAcceptor>,
    permits: Arc<Semaphore>,
}

impl Server {
    fn handle(&self, socket: TcpStream, peer: std::net::SocketAddr) {
        // Over the limit: close before the startup handshake.
        let Ok(permit) = self.permits.clone().try_acquire_owned() else {
            warn!("connection limit reached, rejecting {peer}");
            metrics::counter!(observability::CONNECTIONS_REJECTED_TOTAL).increment(1);
            return;
        };

        info!("connection from {peer}");
        metrics::counter!(observability::CONNECTIONS_TOTAL).increment(1);
        metrics::gauge!(observability::CONNECTIONS_ACTIVE).increment(1.0);
        let tenants = self.tenants.clone();
        let password = self.config.password.clone();
        let admin = self.config.admin_user.clone();
        let tls = self.tls.clone();
        tokio::spawn(async move {
            if let Err(e) = wire::process_connection(socket, tenants, password, admin, tls).await {
                error!("connection error from {peer}: {e}");
            }
            metrics::gauge!(observability::CONNECTIONS_ACTIVE).decrement(1.0);
            drop(permit);
        });
    }

    async fn accept_until_shutdown(&self, listener: TcpListener) {
        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((socket, peer)) => self.handle(socket, peer),
                    Err(e) => error!("accept error: {e}"),
                },
                _ = &mut shutdown => {
                    info!("shutdown signal received, no longer accepting");
                    return;
                }
            }
        }
    }

    /// Every permit back means every connection has closed.
    async fn drain(&self) {
        let max = self.config.max_connections as u32;
        info!("draining connections for up to {:?}", self.config.drain_timeout);
        match tokio::time::timeout(self.config.drain_timeout, self.permits.acquire_many(max)).await {
            Ok(_) => info!("all connections drained"),
            Err(_) => {
                let open = self.config.max_connections - self.permits.available_permits();
                warn!("drain timeout, {open} connections still open");
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = ServerConfig::from_env()?;
    observability::init(config.metrics_port);
    let tls = config.tls_acceptor()?;
    std::fs::create_dir_all(&config.data_dir)?;

    let listener = TcpListener::bind(config.addr()).await?;
    info!(
        "staybook listening on {} (data_dir {}, admin {}, max_connections {}, tls {})",
        config.addr(),
        config.data_dir.display(),
        config.admin_user,
        config.max_connections,
        if tls.is_some() { "on" } else { "off" },
    );
    if let Some(port) = config.metrics_port {
        info!("metrics on http://0.0.0.0:{port}/metrics");
    }

    let server = Server {
        tenants: Arc::new(TenantManager::new(config.data_dir.clone(), config.compact_threshold)),
        permits: Arc::new(Semaphore::new(config.max_connections)),
        tls,
        config,
    };
    server.accept_until_shutdown(listener).await;
    server.drain().await;

    info!("staybook stopped");
    Ok(())
}
