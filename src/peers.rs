//! Known peer addresses.

use parking_lot::Mutex;
use rand::seq::IteratorRandom;
use std::collections::HashSet;

/// Flat set of `host:port` strings shared by the server and the sync task.
///
/// Entries only change through explicit [`add`](PeerRegistry::add) and
/// [`remove`](PeerRegistry::remove) calls; unreachable peers are kept.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: Mutex<HashSet<String>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_peers<I, S>(peers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let registry = Self::new();
        for peer in peers {
            registry.add(peer.as_ref());
        }
        registry
    }

    /// `false` when the address is blank or already known.
    pub fn add(&self, address: &str) -> bool {
        let address = address.trim();
        if address.is_empty() {
            return false;
        }
        self.peers.lock().insert(address.to_string())
    }

    pub fn remove(&self, address: &str) -> bool {
        self.peers.lock().remove(address.trim())
    }

    pub fn contains(&self, address: &str) -> bool {
        self.peers.lock().contains(address.trim())
    }

    /// Sorted snapshot; callers never hold the lock while doing I/O.
    pub fn list(&self) -> Vec<String> {
        let mut peers: Vec<String> = self.peers.lock().iter().cloned().collect();
        peers.sort();
        peers
    }

    pub fn random_pick(&self) -> Option<String> {
        self.peers.lock().iter().choose(&mut rand::thread_rng()).cloned()
    }

    pub fn len(&self) -> usize {
        self.peers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.lock().is_empty()
    }
}
