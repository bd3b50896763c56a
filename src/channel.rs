//! Duplex relay between a tunnel-facing and a service-facing socket.
//!
//! Bytes read from the service socket are encrypted, wrapped in a Data
//! message and framed onto the tunnel socket. Frames read from the tunnel
//! socket are decoded and their Data bodies decrypted onto the service socket.

use scopeguard::defer;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::cipher::{cipher_pair, CipherOp, CipherRole, PayloadCipher};
use crate::config::TunnelConfig;
use crate::core::observability;
use crate::error::{Result, TunnelError};
use crate::relay_protocol::{make_frame, Message, PacketFramer};

const TUNNEL_READ_SIZE: usize = 1024;
const SERVICE_READ_SIZE: usize = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// No socket pair bound yet
    Idle,
    Active,
    /// The bound pair has been released; only a fresh `bind` revives the channel
    Closed,
}

/// Which side ended the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    TunnelEof,
    ServiceEof,
}

enum Readable {
    Tunnel(usize),
    Service(usize),
}

/// Byte counters for one channel, summed over every pair it has relayed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Traffic {
    /// Bytes read from the tunnel socket
    pub tunnel_in: u64,
    /// Bytes read from the service socket
    pub service_in: u64,
}

pub struct Channel<S = TcpStream> {
    tunnel: Option<S>,
    service: Option<S>,
    send: CipherRole,
    recv: CipherRole,
    framer: PacketFramer,
    state: ChannelState,
    traffic: Traffic,
}

impl<S> Channel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(send: CipherRole, recv: CipherRole) -> Self {
        Self {
            tunnel: None,
            service: None,
            send,
            recv,
            framer: PacketFramer::new(),
            state: ChannelState::Idle,
            traffic: Traffic::default(),
        }
    }

    /// Channel with freshly seeded ciphers for the configured role and mode.
    pub fn for_config(config: &TunnelConfig) -> Self {
        let (send, recv) = cipher_pair(config.secret.as_bytes(), config.cipher_mode, config.role);
        Self::new(send, recv)
    }

    /// Attaches a new socket pair. Cipher state carries over from earlier
    /// pairs; bytes left from a previous tunnel socket are discarded.
    pub fn bind(&mut self, tunnel: S, service: S) {
        if self.framer.buffered() > 0 {
            tracing::debug!(
                discarded = self.framer.buffered(),
                "dropping partial frame from previous pair"
            );
        }
        self.framer.clear();
        self.tunnel = Some(tunnel);
        self.service = Some(service);
        self.state = ChannelState::Active;
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn traffic(&self) -> Traffic {
        self.traffic
    }

    /// Relays until either socket reaches end-of-stream or any error occurs.
    /// Both sockets are released on every exit path.
    pub async fn run(&mut self) -> Result<CloseReason> {
        let (Some(mut tunnel), Some(mut service)) = (self.tunnel.take(), self.service.take()) else {
            self.state = ChannelState::Closed;
            return Err(TunnelError::NotBound);
        };

        observability::record_connection_opened();
        defer! {
            observability::record_connection_closed();
        }

        let result = self.relay(&mut tunnel, &mut service).await;
        self.state = ChannelState::Closed;

        // Best effort; the peer may already be gone.
        let _ = tunnel.shutdown().await;
        let _ = service.shutdown().await;

        match &result {
            Ok(reason) => tracing::debug!(?reason, traffic = ?self.traffic, "channel closed"),
            Err(e) => {
                observability::record_error(e.class());
                tracing::debug!(error = %e, traffic = ?self.traffic, "channel failed");
            }
        }
        result
    }

    async fn relay(&mut self, tunnel: &mut S, service: &mut S) -> Result<CloseReason> {
        let mut tunnel_buf = [0u8; TUNNEL_READ_SIZE];
        let mut service_buf = [0u8; SERVICE_READ_SIZE];

        loop {
            let ready = tokio::select! {
                biased;
                read = tunnel.read(&mut tunnel_buf) => Readable::Tunnel(read?),
                read = service.read(&mut service_buf) => Readable::Service(read?),
            };

            match ready {
                Readable::Tunnel(0) => return Ok(CloseReason::TunnelEof),
                Readable::Service(0) => return Ok(CloseReason::ServiceEof),
                Readable::Tunnel(n) => {
                    self.traffic.tunnel_in += n as u64;
                    self.on_tunnel_bytes(&tunnel_buf[..n], service).await?;
                }
                Readable::Service(n) => {
                    self.traffic.service_in += n as u64;
                    self.on_service_bytes(&service_buf[..n], tunnel).await?;
                }
            }
        }
    }

    async fn on_tunnel_bytes(&mut self, bytes: &[u8], service: &mut S) -> Result<()> {
        self.framer.push(bytes);
        while let Some(message) = self.framer.extract_message()? {
            match message {
                Message::Data { bytes } => {
                    observability::record_frame_received(bytes.len());
                    let plaintext = self.recv.process(&bytes, CipherOp::Decrypt);
                    service.write_all(&plaintext).await?;
                }
                Message::Reseed { iv } => {
                    tracing::warn!(iv_len = iv.len(), "peer requested reseed");
                    return Err(TunnelError::UnimplementedReseed);
                }
            }
        }
        Ok(())
    }

    async fn on_service_bytes(&mut self, bytes: &[u8], tunnel: &mut S) -> Result<()> {
        let ciphertext = self.send.process(bytes, CipherOp::Encrypt);
        let frame = make_frame(&Message::Data { bytes: ciphertext }.encode())?;
        if observability::OBS_DEV {
            tracing::trace!(frame_len = frame.len(), "frame to tunnel");
        }
        tunnel.write_all(&frame).await?;
        observability::record_frame_sent(bytes.len());
        Ok(())
    }
}
