//! Encrypted TCP tunnel.
//!
//! A tunnel client accepts plaintext connections and relays their bytes as
//! length-prefixed frames to a tunnel server, which forwards them to a
//! backend service. Payloads are protected by a stream cipher built from
//! several LFSRs combined through an S-box. The construction exists for
//! wire compatibility with existing peers and offers no real security.

pub mod acceptor;
pub mod channel;
pub mod cipher;
pub mod config;
pub mod core;
pub mod error;
pub mod keystream;
pub mod logging;
pub mod registry;
pub mod relay_protocol;
pub mod tunnel_stats;

pub use acceptor::{spawn_tunnel, TunnelAcceptor, TunnelHandle};
pub use channel::{Channel, ChannelState, CloseReason};
pub use config::{CipherMode, Role, TunnelConfig};
pub use error::{FramingFault, Result, TunnelError};
