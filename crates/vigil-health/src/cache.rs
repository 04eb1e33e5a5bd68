//! Per-port memo of the HTTP path that last answered.
//!
//! The cache is only a hint: no lock is held across network calls and the
//! last writer wins.

use std::collections::HashMap;
use std::sync::RwLock;

/// What discovery learned about a port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CachedEndpoint {
    /// This path answered healthy.
    Path(String),
    /// No candidate path answered; skip the sweep.
    NoEndpoint,
}

#[derive(Debug, Default)]
pub struct EndpointCache {
    entries: RwLock<HashMap<String, CachedEndpoint>>,
}

fn key(port: u16) -> String {
    format!("port:{port}")
}

impl EndpointCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, port: u16) -> Option<CachedEndpoint> {
        self.entries
            .read()
            .expect("endpoint cache lock")
            .get(&key(port))
            .cloned()
    }

    pub fn remember(&self, port: u16, path: impl Into<String>) {
        self.entries
            .write()
            .expect("endpoint cache lock")
            .insert(key(port), CachedEndpoint::Path(path.into()));
    }

    pub fn remember_none(&self, port: u16) {
        self.entries
            .write()
            .expect("endpoint cache lock")
            .insert(key(port), CachedEndpoint::NoEndpoint);
    }

    pub fn invalidate(&self, port: u16) {
        self.entries
            .write()
            .expect("endpoint cache lock")
            .remove(&key(port));
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("endpoint cache lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remember_and_invalidate() {
        let cache = EndpointCache::new();
        assert!(cache.get(8080).is_none());

        cache.remember(8080, "/healthz");
        assert_eq!(cache.get(8080), Some(CachedEndpoint::Path("/healthz".into())));

        cache.invalidate(8080);
        assert!(cache.get(8080).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn sentinel_is_per_port() {
        let cache = EndpointCache::new();
        cache.remember_none(9000);
        cache.remember(9001, "/ready");
        assert_eq!(cache.get(9000), Some(CachedEndpoint::NoEndpoint));
        assert_eq!(cache.get(9001), Some(CachedEndpoint::Path("/ready".into())));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn last_writer_wins() {
        let cache = EndpointCache::new();
        cache.remember_none(7000);
        cache.remember(7000, "/health");
        assert_eq!(cache.get(7000), Some(CachedEndpoint::Path("/health".into())));
    }
}
