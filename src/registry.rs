use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::net::TcpStream;

use crate::channel::Channel;

/// A registry entry. Holding the async lock is what entitles a task to
/// rebind and drive the channel, so one channel never has two relays.
pub type SharedChannel<S = TcpStream> = Arc<tokio::sync::Mutex<Channel<S>>>;

/// Peer address to channel mapping shared by every accept task.
///
/// Entries are keyed by IP only; a peer reconnecting from a new source port
/// picks up its previous channel and cipher state. Entries are never evicted:
/// dropping one would desynchronize the peer's keystream, so the registry
/// holds one channel per distinct peer address for the acceptor's lifetime.
pub struct ChannelRegistry<S = TcpStream> {
    channels: Arc<Mutex<HashMap<IpAddr, SharedChannel<S>>>>,
}

impl<S> Clone for ChannelRegistry<S> {
    fn clone(&self) -> Self {
        Self {
            channels: Arc::clone(&self.channels),
        }
    }
}

impl<S> Default for ChannelRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> ChannelRegistry<S> {
    pub fn new() -> Self {
        Self {
            channels: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Returns the peer's channel, creating and inserting one with `make` if
    /// none exists. The boolean is true when an existing entry was reused.
    ///
    /// Lookup and insert happen under one lock, so concurrent accepts from the
    /// same peer always agree on a single channel.
    pub fn checkout<F>(&self, peer: IpAddr, make: F) -> (SharedChannel<S>, bool)
    where
        F: FnOnce() -> Channel<S>,
    {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = channels.get(&peer) {
            return (Arc::clone(existing), true);
        }
        let channel = Arc::new(tokio::sync::Mutex::new(make()));
        channels.insert(peer, Arc::clone(&channel));
        (channel, false)
    }

    pub fn len(&self) -> usize {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
