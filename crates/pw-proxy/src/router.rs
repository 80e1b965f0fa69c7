//! Hostname→local-port route table

use dashmap::DashMap;

/// One published route
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// Local port of the live tunnel session
    pub port: u16,
    /// Name of the forwarder that owns this route
    pub owner: String,
}

/// Routes locally-run tools from a stable hostname to whichever local
/// port the live tunnel currently uses.
///
/// Rebinds are atomic per hostname: the map's entry locking serializes
/// concurrent writers on a key, and a lookup observes either the old
/// port or the new one, never a torn entry. Routes are refreshed only
/// by their owning forwarder and removed when it stops.
#[derive(Debug, Default)]
pub struct ProxyRouter {
    routes: DashMap<String, Route>,
}

impl ProxyRouter {
    /// Create an empty router
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind or atomically rebind a hostname to a local port
    pub fn bind_route(&self, hostname: impl Into<String>, port: u16, owner: impl Into<String>) {
        let hostname = hostname.into();
        let route = Route {
            port,
            owner: owner.into(),
        };
        tracing::debug!(hostname = %hostname, port, owner = %route.owner, "binding proxy route");
        self.routes.insert(hostname, route);
    }

    /// Resolve a hostname to the local port of its live session
    pub fn lookup(&self, hostname: &str) -> Option<u16> {
        self.routes.get(hostname).map(|r| r.port)
    }

    /// Remove a single route
    pub fn remove_route(&self, hostname: &str) -> Option<Route> {
        self.routes.remove(hostname).map(|(_, r)| r)
    }

    /// Remove every route owned by the given forwarder
    pub fn remove_owner(&self, owner: &str) {
        self.routes.retain(|_, route| route.owner != owner);
    }

    /// Drop every route, regardless of owner
    pub fn clear(&self) {
        self.routes.clear();
    }

    /// Number of published routes
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Check if the table is empty
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_bind_and_lookup() {
        let router = ProxyRouter::new();
        assert!(router.is_empty());

        router.bind_route("api.proxy", 8080, "api");
        assert_eq!(router.lookup("api.proxy"), Some(8080));
        assert_eq!(router.lookup("unknown.proxy"), None);
    }

    #[test]
    fn test_rebind_replaces_port() {
        let router = ProxyRouter::new();
        router.bind_route("api.proxy", 8080, "api");
        router.bind_route("api.proxy", 9090, "api");

        assert_eq!(router.lookup("api.proxy"), Some(9090));
        assert_eq!(router.len(), 1);
    }

    #[test]
    fn test_remove_owner_only_touches_its_routes() {
        let router = ProxyRouter::new();
        router.bind_route("api.proxy", 8080, "api");
        router.bind_route("db.proxy", 5432, "db");

        router.remove_owner("api");
        assert_eq!(router.lookup("api.proxy"), None);
        assert_eq!(router.lookup("db.proxy"), Some(5432));
    }

    #[tokio::test]
    async fn test_concurrent_rebinds_leave_one_route() {
        let router = Arc::new(ProxyRouter::new());

        let mut tasks = Vec::new();
        for port in 9000..9032u16 {
            let router = Arc::clone(&router);
            tasks.push(tokio::spawn(async move {
                router.bind_route("api.proxy", port, "api");
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(router.len(), 1);
        let port = router.lookup("api.proxy").unwrap();
        assert!((9000..9032).contains(&port));
    }
}
