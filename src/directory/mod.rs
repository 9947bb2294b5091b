//! Immutable service name to network target lookup
//!
//! The directory is built once from configuration and never mutated. It is
//! owned by whoever constructs the pool and shared behind an `Arc`; nothing
//! here takes a lock.

use std::collections::HashMap;

use crate::config::ServiceConfig;

/// Immutable lookup table mapping logical service names to dialable targets
#[derive(Debug, Clone)]
pub struct ServiceDirectory {
    services: HashMap<String, ServiceConfig>,
    namespace: Option<String>,
}

impl ServiceDirectory {
    /// Build a directory from the configured services.
    ///
    /// With a namespace, targets resolve to the Kubernetes headless-service
    /// DNS name `{name}.{namespace}.svc.cluster.local:{port}`. Without one,
    /// the configured host is used, falling back to localhost for local
    /// development.
    pub fn new(services: Vec<ServiceConfig>, namespace: Option<String>) -> Self {
        let services = services
            .into_iter()
            .map(|svc| (svc.name.clone(), svc))
            .collect();

        Self { services, namespace }
    }

    /// Resolve the dial target for a service name, or `None` if the name is
    /// not configured
    pub fn target(&self, service_name: &str) -> Option<String> {
        let config = self.services.get(service_name)?;

        let target = match &self.namespace {
            Some(namespace) => format!(
                "{}.{}.svc.cluster.local:{}",
                config.name, namespace, config.port
            ),
            None if config.host.is_empty() => format!("localhost:{}", config.port),
            None => format!("{}:{}", config.host, config.port),
        };

        Some(target)
    }

    /// Look up the raw configuration for a service name
    pub fn get(&self, service_name: &str) -> Option<&ServiceConfig> {
        self.services.get(service_name)
    }

    pub fn contains(&self, service_name: &str) -> bool {
        self.services.contains_key(service_name)
    }

    /// Iterate over all configured service names
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.services.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}
