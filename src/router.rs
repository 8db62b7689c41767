//! Prefix routing: the [`Router`] table and the router-backed
//! [`RoutedNetwork`] that dispatches binds across independent fabrics.

use crate::{
    endpoint::Endpoint,
    handler::{same_handler, HandlerError, SharedInterfaceHandler},
    network::{BindError, Network},
    Port,
};
use dashmap::DashMap;
use std::{
    collections::{btree_map::Entry, BTreeMap},
    sync::{Arc, RwLock},
};
use thiserror::Error as ThisError;

/// Identity test for values stored in a [`Router`]: unregistering a prefix
/// requires presenting the very value that was registered there.
pub trait RouteTarget: Clone {
    fn same_target(&self, other: &Self) -> bool;
}

impl<T: ?Sized> RouteTarget for Arc<T> {
    fn same_target(&self, other: &Self) -> bool {
        std::ptr::eq(Arc::as_ptr(self).cast::<()>(), Arc::as_ptr(other).cast::<()>())
    }
}

/// A table mapping `/`-delimited address prefixes to registered values.
pub struct Router<V> {
    routes: BTreeMap<String, V>,
}

impl<V> Router<V> {
    pub fn new() -> Self {
        Self {
            routes: BTreeMap::new(),
        }
    }
}

impl<V> Default for Router<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: RouteTarget> Router<V> {
    /// Registers `value` at `prefix`. Each prefix can be registered once.
    pub fn register(&mut self, prefix: impl Into<String>, value: V) -> Result<(), RouterError> {
        match self.routes.entry(prefix.into()) {
            Entry::Occupied(entry) => Err(RouterError::DuplicatePrefix(entry.key().clone())),
            Entry::Vacant(entry) => {
                entry.insert(value);
                Ok(())
            }
        }
    }

    /// Removes the registration at `prefix`. Fails unless `value` is the
    /// value registered there, so a caller can only drop its own route.
    pub fn unregister(&mut self, prefix: &str, value: &V) -> Result<(), RouterError> {
        match self.routes.get(prefix) {
            Some(registered) if registered.same_target(value) => {
                self.routes.remove(prefix);
                Ok(())
            }
            _ => Err(RouterError::TargetMismatch(prefix.to_string())),
        }
    }

    /// Resolves `address` to the ordered list of matching registrations,
    /// most specific first.
    ///
    /// Each segment level is probed twice: the exact prefix made of the
    /// leading segments, then that prefix's directory default (everything
    /// up to and including its last `/`). An exact registration therefore
    /// always sorts before the catch-all covering the same directory.
    pub fn get_routes(&self, address: &Endpoint) -> Vec<(String, V)> {
        let parts: Vec<&str> = address.as_str().split('/').collect();
        let mut routes = Vec::new();
        for i in (1..=parts.len()).rev() {
            let prefix = parts[..i].join("/");
            if let Some(value) = self.routes.get(&prefix) {
                routes.push((prefix.clone(), value.clone()));
            }
            let default = match prefix.rfind('/') {
                Some(index) => &prefix[..=index],
                None => "",
            };
            if let Some(value) = self.routes.get(default) {
                routes.push((default.to_string(), value.clone()));
            }
        }
        routes
    }
}

/// Composes independent [`Network`] fabrics under one namespace, each
/// owning a disjoint address prefix. Binds are delegated to whichever
/// fabric owns the address's most specific matching prefix.
#[derive(Default)]
pub struct RoutedNetwork {
    router: RwLock<Router<Arc<Network>>>,
    networks: DashMap<String, Arc<Network>>,
    handlers: DashMap<String, SharedInterfaceHandler>,
}

impl RoutedNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a fresh [`Network`] from `handler` and registers it to own
    /// `prefix`. Returns the constructed network.
    pub async fn register_interface_handler(
        &self,
        prefix: impl Into<String>,
        handler: SharedInterfaceHandler,
    ) -> Result<Arc<Network>, RouterError> {
        let prefix = prefix.into();
        let network = Network::new(handler.clone()).await?;
        self.router
            .write()
            .unwrap()
            .register(prefix.clone(), network.clone())?;
        self.networks.insert(prefix.clone(), network.clone());
        self.handlers.insert(prefix, handler);
        Ok(network)
    }

    /// Removes the registration at `prefix`. Fails unless `handler` is the
    /// handler registered there.
    pub fn unregister_interface_handler(
        &self,
        prefix: &str,
        handler: &SharedInterfaceHandler,
    ) -> Result<(), RouterError> {
        let registered = match self.handlers.get(prefix) {
            Some(entry) => entry.value().clone(),
            None => return Err(RouterError::TargetMismatch(prefix.to_string())),
        };
        if !same_handler(&registered, handler) {
            return Err(RouterError::TargetMismatch(prefix.to_string()));
        }
        let network = match self.networks.get(prefix) {
            Some(entry) => entry.value().clone(),
            None => return Err(RouterError::TargetMismatch(prefix.to_string())),
        };
        self.router.write().unwrap().unregister(prefix, &network)?;
        self.networks.remove(prefix);
        self.handlers.remove(prefix);
        Ok(())
    }

    /// Delegates `bind` to the network owning the most specific matching
    /// prefix.
    pub async fn bind(&self, local_addr: impl Into<Endpoint>) -> Result<Arc<Port>, BindError> {
        let local_addr = local_addr.into();
        let network = {
            let router = self.router.read().unwrap();
            router
                .get_routes(&local_addr)
                .into_iter()
                .next()
                .map(|(_, network)| network)
        };
        match network {
            Some(network) => network.bind(local_addr).await,
            None => Err(BindError::NoRoute(local_addr)),
        }
    }
}

#[derive(Debug, ThisError, Clone, PartialEq, Eq)]
pub enum RouterError {
    #[error("Prefix {0} is already registered")]
    DuplicatePrefix(String),
    #[error("The registration at {0} does not match the provided value")]
    TargetMismatch(String),
    #[error("A handler failed while registering: {0}")]
    Handler(#[from] HandlerError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_prefix_fails() {
        let mut router = Router::new();
        router.register("/a", Arc::new(1)).unwrap();
        assert!(matches!(
            router.register("/a", Arc::new(2)),
            Err(RouterError::DuplicatePrefix(_))
        ));
    }

    #[test]
    fn unregister_checks_identity() {
        let mut router = Router::new();
        let value = Arc::new(1);
        router.register("/a", value.clone()).unwrap();
        assert!(matches!(
            router.unregister("/a", &Arc::new(1)),
            Err(RouterError::TargetMismatch(_))
        ));
        router.unregister("/a", &value).unwrap();
        assert!(router.get_routes(&Endpoint::new("/a/b")).is_empty());
    }

    #[test]
    fn unregistered_prefix_mismatches() {
        let mut router: Router<Arc<i32>> = Router::new();
        assert!(matches!(
            router.unregister("/a", &Arc::new(1)),
            Err(RouterError::TargetMismatch(_))
        ));
    }

    #[test]
    fn longest_prefix_sorts_first() {
        let mut router = Router::new();
        router.register("/a", Arc::new(1)).unwrap();
        router.register("/a/b", Arc::new(2)).unwrap();
        let routes = router.get_routes(&Endpoint::new("/a/b/c"));
        let prefixes: Vec<&str> = routes.iter().map(|(prefix, _)| prefix.as_str()).collect();
        assert_eq!(prefixes, ["/a/b", "/a"]);
    }

    #[test]
    fn directory_default_sorts_after_the_exact_match() {
        let mut router = Router::new();
        router.register("/svc/here", Arc::new(1)).unwrap();
        router.register("/svc/", Arc::new(2)).unwrap();
        let routes = router.get_routes(&Endpoint::new("/svc/here"));
        let prefixes: Vec<&str> = routes.iter().map(|(prefix, _)| prefix.as_str()).collect();
        assert_eq!(prefixes, ["/svc/here", "/svc/"]);
    }

    #[test]
    fn unmatched_address_yields_nothing() {
        let mut router = Router::new();
        router.register("/a", Arc::new(1)).unwrap();
        assert!(router.get_routes(&Endpoint::new("/b/c")).is_empty());
    }
}
