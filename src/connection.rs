use crate::config::{DatabaseDescriptor, MAIN_DATABASE};
use crate::driver::{Database, Driver};
use crate::error::BootstrapError;
use futures::future::join_all;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Resolved connections keyed by descriptor name, in declaration order.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    order: Vec<String>,
    connections: HashMap<String, Arc<dyn Database>>,
}

impl ConnectionRegistry {
    /// Connects every descriptor in parallel. Any failure fails the whole
    /// call: connections that did open are closed and no registry is
    /// produced.
    pub async fn connect_all(
        driver: &dyn Driver,
        descriptors: &[DatabaseDescriptor],
    ) -> Result<Self, BootstrapError> {
        let mut seen = BTreeSet::new();
        for descriptor in descriptors {
            if descriptor.name.trim().is_empty() {
                return Err(BootstrapError::config("database name must not be empty"));
            }
            if descriptor.uri.trim().is_empty() {
                return Err(BootstrapError::config(format!(
                    "database '{}' has no uri",
                    descriptor.name
                )));
            }
            if !seen.insert(descriptor.name.as_str()) {
                return Err(BootstrapError::config(format!(
                    "database '{}' is declared more than once",
                    descriptor.name
                )));
            }
        }

        let results = join_all(descriptors.iter().map(|descriptor| async move {
            debug!(database = %descriptor.name, "connecting database");
            driver
                .connect(&descriptor.uri, &descriptor.options)
                .await
                .map(|db| (descriptor.name.clone(), db))
                .map_err(|e| BootstrapError::Connection {
                    name: descriptor.name.clone(),
                    message: e.to_string(),
                })
        }))
        .await;

        let mut registry = Self::default();
        let mut first_err = None;
        for result in results {
            match result {
                Ok((name, db)) => registry.insert(name, db),
                Err(err) => {
                    warn!(error = %err, "database connection failed");
                    first_err.get_or_insert(err);
                }
            }
        }
        if let Some(err) = first_err {
            registry.close_all().await;
            return Err(err);
        }
        info!(count = registry.len(), "databases connected");
        Ok(registry)
    }

    /// Adds an already-open connection. A later insert under the same name
    /// replaces the handle but keeps its position.
    pub fn insert(&mut self, name: impl Into<String>, db: Arc<dyn Database>) {
        let name = name.into();
        if self.connections.insert(name.clone(), db).is_none() {
            self.order.push(name);
        }
    }

    /// Looks up a connection by name. `MAIN` falls back to the first declared
    /// connection when nothing is registered under that name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Database>> {
        match self.connections.get(name) {
            Some(db) => Some(db.clone()),
            None if name == MAIN_DATABASE => self.main(),
            None => None,
        }
    }

    pub fn main(&self) -> Option<Arc<dyn Database>> {
        if let Some(db) = self.connections.get(MAIN_DATABASE) {
            return Some(db.clone());
        }
        self.order
            .first()
            .and_then(|name| self.connections.get(name))
            .cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.order.iter().map(String::as_str).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<dyn Database>)> {
        self.order
            .iter()
            .filter_map(|name| self.connections.get(name).map(|db| (name.as_str(), db)))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Closes every connection. Close failures are logged, not returned.
    pub async fn close_all(&self) {
        join_all(self.iter().map(|(name, db)| async move {
            if let Err(err) = db.close().await {
                warn!(database = %name, error = %err, "failed to close database connection");
            }
        }))
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::ConnectionRegistry;
    use crate::config::DatabaseDescriptor;
    use crate::driver::memory::MemoryDriver;
    use crate::error::ErrorCode;

    #[tokio::test]
    async fn connects_every_descriptor_in_declaration_order() {
        let driver = MemoryDriver::new();
        let registry = ConnectionRegistry::connect_all(
            &driver,
            &[
                DatabaseDescriptor::new("APP", "memory://local/app"),
                DatabaseDescriptor::new("RAW", "memory://local/raw"),
            ],
        )
        .await
        .expect("connect");
        assert_eq!(registry.names(), vec!["APP", "RAW"]);
        assert_eq!(registry.get("RAW").map(|db| db.name().to_string()), Some("raw".into()));
        // No descriptor named MAIN: the first one stands in for it.
        assert_eq!(registry.get("MAIN").map(|db| db.name().to_string()), Some("app".into()));
        assert!(registry.get("OTHER").is_none());
    }

    #[tokio::test]
    async fn one_failed_connection_fails_the_registry() {
        let driver = MemoryDriver::new();
        driver.set_unreachable("memory://down/raw");
        let err = ConnectionRegistry::connect_all(
            &driver,
            &[
                DatabaseDescriptor::new("MAIN", "memory://local/app"),
                DatabaseDescriptor::new("RAW", "memory://down/raw"),
            ],
        )
        .await
        .err()
        .expect("connection error");
        assert_eq!(err.code(), ErrorCode::Connection);
        assert!(err.to_string().contains("RAW"));
        // MAIN did connect and is released again.
        assert_eq!(driver.connect_count(), 1);
        assert_eq!(driver.close_count(), 1);
    }

    #[tokio::test]
    async fn invalid_descriptors_are_configuration_errors() {
        let driver = MemoryDriver::new();
        for descriptors in [
            vec![DatabaseDescriptor::new("", "memory://local/app")],
            vec![DatabaseDescriptor::new("MAIN", " ")],
            vec![
                DatabaseDescriptor::new("MAIN", "memory://local/a"),
                DatabaseDescriptor::new("MAIN", "memory://local/b"),
            ],
        ] {
            let err = ConnectionRegistry::connect_all(&driver, &descriptors)
                .await
                .err()
                .expect("invalid");
            assert_eq!(err.code(), ErrorCode::Configuration);
        }
        assert_eq!(driver.connect_count(), 0);
    }

    #[tokio::test]
    async fn close_all_closes_each_connection_once() {
        let driver = MemoryDriver::new();
        let main = driver.open("memory://local/app").expect("open");
        let mut registry = ConnectionRegistry::default();
        registry.insert("MAIN", main.clone());
        registry.close_all().await;
        assert!(main.is_closed());
        assert_eq!(main.close_calls(), 1);
    }
}
