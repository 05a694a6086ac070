//! Peer selection strategies.

use std::collections::HashMap;

use parking_lot::{Mutex, RwLock};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::atomic::Uint32;

/// Seed used by [`StaticPeerSelector::new`].
pub const DEFAULT_SEED: u64 = 1;

/// Maps a service name to the address of a peer that serves it.
///
/// The relay calls `select` once per call request, from the reader task of
/// the inbound connection, so implementations must tolerate concurrent
/// calls to both methods.
pub trait PeerSelector: Send + Sync {
    /// Pick a `host:port` for `service`, or `None` if no host is known.
    fn select(&self, service: &str) -> Option<String>;

    /// Add `host_port` as a candidate for `service`.
    fn register(&self, service: &str, host_port: &str);
}

/// Uniform random choice among registered hosts, reproducible from a seed.
#[derive(Debug)]
pub struct StaticPeerSelector {
    hosts: RwLock<HashMap<String, Vec<String>>>,
    rng: Mutex<ChaCha8Rng>,
}

impl StaticPeerSelector {
    /// Create an empty selector seeded with [`DEFAULT_SEED`].
    pub fn new() -> Self {
        Self::with_seed(DEFAULT_SEED)
    }

    /// Create an empty selector with an explicit seed.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            hosts: RwLock::new(HashMap::new()),
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
        }
    }

    /// Create a selector from a service → hosts mapping.
    pub fn with_hosts<I, S, H>(hosts: I) -> Self
    where
        I: IntoIterator<Item = (S, Vec<H>)>,
        S: Into<String>,
        H: Into<String>,
    {
        let selector = Self::new();
        {
            let mut map = selector.hosts.write();
            for (service, list) in hosts {
                map.entry(service.into())
                    .or_default()
                    .extend(list.into_iter().map(Into::into));
            }
        }
        selector
    }

    /// Hosts registered for `service`.
    pub fn hosts(&self, service: &str) -> Vec<String> {
        self.hosts.read().get(service).cloned().unwrap_or_default()
    }
}

impl Default for StaticPeerSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerSelector for StaticPeerSelector {
    fn select(&self, service: &str) -> Option<String> {
        let hosts = self.hosts.read();
        let candidates = hosts.get(service).filter(|list| !list.is_empty())?;
        let index = self.rng.lock().gen_range(0..candidates.len());
        Some(candidates[index].clone())
    }

    fn register(&self, service: &str, host_port: &str) {
        self.hosts
            .write()
            .entry(service.to_owned())
            .or_default()
            .push(host_port.to_owned());
    }
}

#[derive(Debug, Default)]
struct Rotation {
    hosts: Vec<String>,
    cursor: Uint32,
}

/// Rotates through each service's hosts in registration order.
#[derive(Debug, Default)]
pub struct RoundRobinPeerSelector {
    services: RwLock<HashMap<String, Rotation>>,
}

impl RoundRobinPeerSelector {
    /// Create an empty selector.
    pub fn new() -> Self {
        Self::default()
    }
}

impl PeerSelector for RoundRobinPeerSelector {
    fn select(&self, service: &str) -> Option<String> {
        let services = self.services.read();
        let rotation = services.get(service).filter(|r| !r.hosts.is_empty())?;
        // inc returns the new value; subtract one so the first pick is index 0.
        let turn = rotation.cursor.inc().wrapping_sub(1) as usize;
        Some(rotation.hosts[turn % rotation.hosts.len()].clone())
    }

    fn register(&self, service: &str, host_port: &str) {
        self.services
            .write()
            .entry(service.to_owned())
            .or_default()
            .hosts
            .push(host_port.to_owned());
    }
}
