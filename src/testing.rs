//! Helpers available when the bootstrap runs in test mode.

use crate::connection::ConnectionRegistry;
use crate::document::{Filter, get_path};
use crate::error::BootstrapError;
use crate::fixtures::{FixtureReport, LoadOptions, LoaderRegistry, LoaderSpec};
use futures::future::try_join_all;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, trace, warn};

/// Removes documents from `collection` whose `key` appears among the
/// `ref_key` values of reference documents selected by `select`.
#[derive(Debug, Clone, PartialEq)]
pub struct RefSpec {
    /// Reference collection queried with `select`.
    pub collection: String,
    pub key: String,
    /// Field read from reference documents; `key` when unset.
    pub ref_key: Option<String>,
    pub select: Filter,
}

impl RefSpec {
    pub fn new(collection: impl Into<String>, key: impl Into<String>, select: Filter) -> Self {
        Self {
            collection: collection.into(),
            key: key.into(),
            ref_key: None,
            select,
        }
    }

    pub fn with_ref_key(mut self, ref_key: impl Into<String>) -> Self {
        self.ref_key = Some(ref_key.into());
        self
    }
}

#[derive(Clone)]
pub struct TestMode {
    connections: ConnectionRegistry,
    fixtures_root: PathBuf,
}

impl TestMode {
    pub fn new(connections: ConnectionRegistry, fixtures_root: impl Into<PathBuf>) -> Self {
        Self {
            connections,
            fixtures_root: fixtures_root.into(),
        }
    }

    /// Loads `<fixtures_root>/<database name>` into every connected database
    /// that has such a directory. Loaders are tracked in `loaders`.
    pub async fn setup(
        connections: ConnectionRegistry,
        fixtures_root: &Path,
        loaders: &LoaderRegistry,
    ) -> Result<(Self, BTreeMap<String, FixtureReport>), BootstrapError> {
        info!(fixtures = %fixtures_root.display(), "initializing test mode data");
        let mut reports = BTreeMap::new();
        for (name, db) in connections.iter() {
            let dir = fixtures_root.join(name);
            if !dir.is_dir() {
                debug!(database = %name, dir = %dir.display(), "no fixture directory for database");
                continue;
            }
            let loader = loaders.load(LoaderSpec::connection(db.clone())).await?;
            let report = loader.load_fixtures(&dir, LoadOptions::default()).await?;
            reports.insert(name.to_string(), report);
        }
        Ok((Self::new(connections, fixtures_root), reports))
    }

    pub fn fixtures_root(&self) -> &Path {
        &self.fixtures_root
    }

    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    /// Deletes every document, or those matching `filter`, from each
    /// collection. An unknown database is logged and ignored.
    pub async fn clean_up(
        &self,
        database: &str,
        collections: &[&str],
        filter: Option<&Filter>,
    ) -> Result<u64, BootstrapError> {
        debug!(database = %database, collections = ?collections, "cleaning up test data");
        let Some(db) = self.connections.get(database) else {
            warn!(database = %database, "requested database has never been registered");
            return Ok(0);
        };
        let all = Filter::All;
        let filter = filter.unwrap_or(&all);
        let removed = try_join_all(collections.iter().map(|name| {
            let coll = db.collection(name);
            async move {
                trace!(collection = %name, "cleaning up test data in collection");
                coll.delete_many(filter).await
            }
        }))
        .await?;
        Ok(removed.into_iter().sum())
    }

    pub async fn clean_up_ref(
        &self,
        database: &str,
        collection: &str,
        spec: &RefSpec,
    ) -> Result<u64, BootstrapError> {
        debug!(database = %database, collection = %collection, reference = %spec.collection, "cleaning up referenced test data");
        let Some(db) = self.connections.get(database) else {
            warn!(database = %database, "requested database has never been registered");
            return Ok(0);
        };
        let refs = db.collection(&spec.collection).find(&spec.select).await?;
        debug!(count = refs.len(), "found references to remove");
        let ref_key = spec.ref_key.as_deref().unwrap_or(&spec.key);
        let keys = refs
            .iter()
            .filter_map(|r| get_path(r, ref_key).cloned())
            .collect();
        let removed = db
            .collection(collection)
            .delete_many(&Filter::in_values(spec.key.clone(), keys))
            .await?;
        Ok(removed)
    }
}
