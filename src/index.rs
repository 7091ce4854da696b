//! Index ledger: declared indexes, applied once a database is connected.
//!
//! Entries are never mutated after registration apart from their state, and
//! applying one twice is harmless since the driver treats an identical index
//! as already present.

use crate::config::MAIN_DATABASE;
use crate::connection::ConnectionRegistry;
use crate::driver::{Database, IndexKey, IndexModel, IndexOptions};
use crate::error::BootstrapError;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct IndexRequest {
    pub database: String,
    pub collection: String,
    pub model: IndexModel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexState {
    Registered,
    Applying,
    Applied,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexFailure {
    pub collection: String,
    pub index: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IndexReport {
    pub database: String,
    pub applied: usize,
    pub failed: Vec<IndexFailure>,
}

struct Entry {
    request: IndexRequest,
    state: Mutex<IndexState>,
}

impl Entry {
    fn set(&self, state: IndexState) {
        *self.state.lock() = state;
    }

    fn targets(&self, names: &[&str]) -> bool {
        names.contains(&self.request.database.as_str())
    }
}

#[derive(Default)]
pub struct IndexLedger {
    entries: RwLock<Vec<Arc<Entry>>>,
    attached: RwLock<Option<ConnectionRegistry>>,
}

impl IndexLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hands the ledger the live connections. Indexes registered from now on
    /// are applied right away.
    pub fn attach(&self, registry: ConnectionRegistry) {
        *self.attached.write() = Some(registry);
    }

    pub fn is_attached(&self) -> bool {
        self.attached.read().is_some()
    }

    /// Records an index for `database.collection`. `background` is turned on
    /// unless the caller set it. When the database is already connected the
    /// index is built on a spawned task; its handle resolves to the final
    /// state.
    pub fn register_index(
        &self,
        database: impl Into<String>,
        collection: impl Into<String>,
        keys: Vec<IndexKey>,
        mut options: IndexOptions,
    ) -> Option<JoinHandle<IndexState>> {
        if options.background.is_none() {
            options.background = Some(true);
        }
        let entry = Arc::new(Entry {
            request: IndexRequest {
                database: database.into(),
                collection: collection.into(),
                model: IndexModel { keys, options },
            },
            state: Mutex::new(IndexState::Registered),
        });
        debug!(
            database = %entry.request.database,
            collection = %entry.request.collection,
            index = %entry.request.model.name(),
            "index registered"
        );
        self.entries.write().push(entry.clone());

        let db = self
            .attached
            .read()
            .as_ref()
            .and_then(|registry| registry.get(&entry.request.database))?;
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => Some(runtime.spawn(async move { apply(&entry, db.as_ref()).await })),
            Err(_) => {
                debug!(
                    database = %entry.request.database,
                    "no runtime available, index left for the next ensure pass"
                );
                None
            }
        }
    }

    /// Applies every entry for `database` on `db`, in registration order.
    /// Failures are logged and reported; the remaining entries still run.
    pub async fn ensure_indexes(&self, db: &dyn Database, database: &str) -> IndexReport {
        self.ensure_for(db, database, &[database]).await
    }

    /// Runs [`ensure_indexes`](Self::ensure_indexes) for every connection,
    /// databases in parallel. Entries declared for `MAIN` go to the main
    /// connection when no connection carries that name.
    pub async fn ensure_all(&self, registry: &ConnectionRegistry) -> Vec<IndexReport> {
        let main_alias = registry
            .names()
            .first()
            .copied()
            .filter(|_| !registry.names().contains(&MAIN_DATABASE));
        let runs = registry.iter().map(|(name, db)| {
            let names: Vec<&str> = if Some(name) == main_alias {
                vec![name, MAIN_DATABASE]
            } else {
                vec![name]
            };
            async move { self.ensure_for(db.as_ref(), name, &names).await }
        });
        let reports = join_all(runs).await;
        let failed: usize = reports.iter().map(|r| r.failed.len()).sum();
        info!(databases = reports.len(), failed, "indexes ensured");
        reports
    }

    async fn ensure_for(&self, db: &dyn Database, database: &str, names: &[&str]) -> IndexReport {
        let entries: Vec<Arc<Entry>> = self
            .entries
            .read()
            .iter()
            .filter(|e| e.targets(names))
            .cloned()
            .collect();
        let mut report = IndexReport {
            database: database.to_string(),
            ..IndexReport::default()
        };
        for entry in entries {
            match apply(&entry, db).await {
                IndexState::Failed(message) => report.failed.push(IndexFailure {
                    collection: entry.request.collection.clone(),
                    index: entry.request.model.name(),
                    message,
                }),
                _ => report.applied += 1,
            }
        }
        report
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Snapshot of every entry with its current state.
    pub fn entries(&self) -> Vec<(IndexRequest, IndexState)> {
        self.entries
            .read()
            .iter()
            .map(|e| (e.request.clone(), e.state.lock().clone()))
            .collect()
    }

    pub fn state_of(&self, database: &str, collection: &str, index: &str) -> Option<IndexState> {
        self.entries
            .read()
            .iter()
            .rev()
            .find(|e| {
                e.request.database == database
                    && e.request.collection == collection
                    && e.request.model.name() == index
            })
            .map(|e| e.state.lock().clone())
    }
}

async fn apply(entry: &Entry, db: &dyn Database) -> IndexState {
    entry.set(IndexState::Applying);
    let request = &entry.request;
    let result = if request.model.keys.is_empty() {
        Err(BootstrapError::IndexCreation {
            database: request.database.clone(),
            collection: request.collection.clone(),
            message: "index declares no keys".into(),
        })
    } else {
        db.collection(&request.collection)
            .create_index(&request.model)
            .await
            .map_err(|e| BootstrapError::IndexCreation {
                database: request.database.clone(),
                collection: request.collection.clone(),
                message: e.to_string(),
            })
    };
    let state = match result {
        Ok(name) => {
            debug!(
                database = %request.database,
                collection = %request.collection,
                index = %name,
                "index applied"
            );
            IndexState::Applied
        }
        Err(err) => {
            warn!(
                database = %request.database,
                collection = %request.collection,
                error = %err,
                "unable to create index"
            );
            IndexState::Failed(err.to_string())
        }
    };
    entry.set(state.clone());
    state
}
