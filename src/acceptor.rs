use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::channel::{Channel, CloseReason};
use crate::config::{Role, TunnelConfig};
use crate::core::observability;
use crate::error::{Result, TunnelError};
use crate::registry::ChannelRegistry;
use crate::tunnel_stats::TunnelStats;

const LISTEN_BACKLOG: i32 = 128;

/// How long a connection waits for its peer's channel to finish an earlier relay.
pub const BUSY_CHANNEL_WAIT: Duration = Duration::from_secs(2);

/// Listener that pairs every accepted connection with a fresh outbound
/// connection to the configured endpoint and relays between them.
pub struct TunnelAcceptor {
    config: Arc<TunnelConfig>,
    listener: TcpListener,
    registry: ChannelRegistry,
    stats: Arc<TunnelStats>,
}

impl TunnelAcceptor {
    /// Bind to the configured listen address
    pub async fn bind(config: TunnelConfig) -> Result<Self> {
        config.validate()?;
        let addr = config.listen_addr();
        let listener = bind_listener(addr)?;
        tracing::info!(
            role = ?config.role,
            %addr,
            endpoint = %config.endpoint,
            "tunnel listener bound"
        );

        Ok(Self {
            config: Arc::new(config),
            listener,
            registry: ChannelRegistry::new(),
            stats: TunnelStats::new(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn registry(&self) -> ChannelRegistry {
        self.registry.clone()
    }

    pub fn stats(&self) -> Arc<TunnelStats> {
        Arc::clone(&self.stats)
    }

    /// Accepts connections until `shutdown` resolves, then closes the listener.
    /// Relays already running keep going until their sockets close.
    pub async fn serve<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("tunnel listener shutting down");
                    break;
                }
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            observability::record_error(observability::ErrorClass::SOCKET_IO);
                            tracing::warn!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    tracing::debug!(%peer, "accepted connection");

                    let config = Arc::clone(&self.config);
                    let registry = self.registry.clone();
                    let stats = Arc::clone(&self.stats);
                    tokio::spawn(
                        async move {
                            match handle_connection(stream, peer, config, registry, stats).await {
                                Ok(reason) => tracing::debug!(?reason, "relay finished"),
                                Err(e) => tracing::warn!(error = %e, "relay terminated"),
                            }
                        }
                        .instrument(tracing::info_span!("channel", %peer)),
                    );
                }
            }
        }

        self.stats.log_stats();
        let counters = observability::snapshot();
        tracing::info!(
            frames_sent = counters.frames_sent,
            frames_received = counters.frames_received,
            busy = counters.errors_of(observability::ErrorClass::CHANNEL_BUSY),
            health = ?counters.health,
            "relay counters"
        );
        Ok(())
    }
}

/// Takes the peer's channel, dials the endpoint, assigns tunnel and service
/// roles, and drives the channel over the new pair.
///
/// The endpoint is dialled only while the channel is held, so a client's
/// upstream connections for one peer reach the server in the order their
/// relays run. A connection that cannot take the channel within
/// [`BUSY_CHANNEL_WAIT`] is dropped without dialling.
async fn handle_connection(
    accepted: TcpStream,
    peer: SocketAddr,
    config: Arc<TunnelConfig>,
    registry: ChannelRegistry,
    stats: Arc<TunnelStats>,
) -> Result<CloseReason> {
    let (channel, reused) = registry.checkout(peer.ip(), || Channel::for_config(&config));
    tracing::debug!(reused, "channel checked out");

    let mut channel = match tokio::time::timeout(BUSY_CHANNEL_WAIT, channel.lock()).await {
        Ok(channel) => channel,
        Err(_) => {
            stats.tunnel_rejected();
            let e = TunnelError::ChannelBusy(peer.ip());
            observability::record_error(e.class());
            return Err(e);
        }
    };

    let outbound = match TcpStream::connect(config.endpoint.as_str()).await {
        Ok(outbound) => outbound,
        Err(e) => {
            let e = TunnelError::from(e);
            observability::record_error(e.class());
            return Err(e);
        }
    };

    let (tunnel, service) = match config.role {
        Role::Server => (accepted, outbound),
        Role::Client => (outbound, accepted),
    };
    channel.bind(tunnel, service);

    let before = channel.traffic();
    stats.tunnel_started();
    let result = channel.run().await;
    let after = channel.traffic();
    stats.tunnel_closed(
        after.tunnel_in - before.tunnel_in,
        after.service_in - before.service_in,
        result.is_err(),
    );
    result
}

fn bind_listener(addr: SocketAddr) -> Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    Ok(TcpListener::from_std(socket.into())?)
}

/// A running acceptor task.
pub struct TunnelHandle {
    local_addr: SocketAddr,
    registry: ChannelRegistry,
    stats: Arc<TunnelStats>,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<Result<()>>,
}

impl TunnelHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    pub fn stats(&self) -> &Arc<TunnelStats> {
        &self.stats
    }

    /// Closes the listener and waits for the accept loop to exit.
    pub async fn stop(self) -> Result<()> {
        let _ = self.shutdown.send(());
        self.task
            .await
            .map_err(|e| TunnelError::Io(std::io::Error::other(e)))?
    }
}

/// Binds an acceptor for `config` and serves it on a background task.
pub async fn spawn_tunnel(config: TunnelConfig) -> Result<TunnelHandle> {
    let acceptor = TunnelAcceptor::bind(config).await?;
    let local_addr = acceptor.local_addr()?;
    let registry = acceptor.registry();
    let stats = acceptor.stats();
    let (shutdown, signal) = oneshot::channel::<()>();
    let task = tokio::spawn(acceptor.serve(async move {
        let _ = signal.await;
    }));

    Ok(TunnelHandle {
        local_addr,
        registry,
        stats,
        shutdown,
        task,
    })
}
