//! Fixture loading for test databases.
//!
//! A [`FixtureLoader`] either borrows an existing connection or opens its own
//! from a URI; only connections it opened are closed by [`FixtureLoader::close`].
//! Loaders are tracked by a caller-owned [`LoaderRegistry`].

pub mod source;

pub use source::{collect_fixture_files, read_fixture_dir, read_fixture_file};

use crate::config::DEFAULT_FIXTURE_CONCURRENCY;
use crate::document::{Document, Filter, ID_FIELD};
use crate::driver::{ConnectOptions, Database, Driver};
use crate::error::BootstrapError;
use futures::future::{BoxFuture, join_all};
use futures::{FutureExt, StreamExt, stream};
use parking_lot::Mutex;
use std::future::Future;
use std::panic::{AssertUnwindSafe, resume_unwind};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct FixtureSpec {
    pub collection: String,
    pub data: Vec<Document>,
    /// Replace documents by `_id` instead of inserting them.
    pub upsert: bool,
}

impl FixtureSpec {
    pub fn new(collection: impl Into<String>, data: Vec<Document>) -> Self {
        Self {
            collection: collection.into(),
            data,
            upsert: false,
        }
    }

    pub fn upserting(mut self) -> Self {
        self.upsert = true;
        self
    }
}

pub type FixtureGenerator = Arc<
    dyn Fn(Arc<dyn Database>, LoadOptions) -> BoxFuture<'static, Result<FixtureSpec, BootstrapError>>
        + Send
        + Sync,
>;

#[derive(Clone)]
pub enum FixtureDefinition {
    Static(FixtureSpec),
    /// Builds its spec from the loader's connection when loaded.
    Generator(FixtureGenerator),
}

impl FixtureDefinition {
    pub fn generator<F, Fut>(f: F) -> Self
    where
        F: Fn(Arc<dyn Database>, LoadOptions) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<FixtureSpec, BootstrapError>> + Send + 'static,
    {
        FixtureDefinition::Generator(Arc::new(move |db, options| Box::pin(f(db, options))))
    }
}

impl From<FixtureSpec> for FixtureDefinition {
    fn from(spec: FixtureSpec) -> Self {
        FixtureDefinition::Static(spec)
    }
}

/// Where a loader gets its connection from.
#[derive(Clone)]
pub enum LoaderTarget {
    Connection(Arc<dyn Database>),
    Uri {
        uri: String,
        options: ConnectOptions,
    },
}

#[derive(Clone)]
pub struct LoaderSpec {
    pub target: Option<LoaderTarget>,
    /// Clear each collection before loading it. Defaults to `true`.
    pub clear: bool,
    /// Documents written in parallel per collection. `None` takes the
    /// registry's setting.
    pub concurrency: Option<usize>,
}

impl Default for LoaderSpec {
    fn default() -> Self {
        Self {
            target: None,
            clear: true,
            concurrency: None,
        }
    }
}

impl LoaderSpec {
    pub fn connection(db: Arc<dyn Database>) -> Self {
        Self {
            target: Some(LoaderTarget::Connection(db)),
            ..Self::default()
        }
    }

    pub fn uri(uri: impl Into<String>) -> Self {
        Self {
            target: Some(LoaderTarget::Uri {
                uri: uri.into(),
                options: ConnectOptions::default(),
            }),
            ..Self::default()
        }
    }

    pub fn with_clear(mut self, clear: bool) -> Self {
        self.clear = clear;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadOptions {
    /// Forces clearing even when the loader was opened with `clear = false`.
    pub clear: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CollectionLoad {
    pub collection: String,
    pub cleared: bool,
    pub inserted: u64,
    pub upserted: u64,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FixtureReport {
    /// Sorted by collection name.
    pub collections: Vec<CollectionLoad>,
}

impl FixtureReport {
    pub fn collection(&self, name: &str) -> Option<&CollectionLoad> {
        self.collections.iter().find(|c| c.collection == name)
    }

    pub fn written(&self) -> u64 {
        self.collections
            .iter()
            .map(|c| c.inserted + c.upserted)
            .sum()
    }

    pub fn has_errors(&self) -> bool {
        self.collections.iter().any(|c| !c.errors.is_empty())
    }

    fn merge(&mut self, other: FixtureReport) {
        self.collections.extend(other.collections);
        self.collections
            .sort_by(|a, b| a.collection.cmp(&b.collection));
    }
}

pub struct FixtureLoader {
    db: Arc<dyn Database>,
    owned: bool,
    clear: bool,
    concurrency: usize,
    closed: AtomicBool,
}

impl FixtureLoader {
    /// Reuses the given connection or connects from the target URI. Missing
    /// both is a configuration error.
    pub async fn open(driver: &dyn Driver, spec: LoaderSpec) -> Result<Self, BootstrapError> {
        let (db, owned) = match spec.target {
            Some(LoaderTarget::Connection(db)) => (db, false),
            Some(LoaderTarget::Uri { uri, options }) => {
                let db = driver
                    .connect(&uri, &options)
                    .await
                    .map_err(|e| BootstrapError::Connection {
                        name: uri.clone(),
                        message: e.to_string(),
                    })?;
                (db, true)
            }
            None => {
                return Err(BootstrapError::config(
                    "uri or connection must be specified in fixture loader spec",
                ));
            }
        };
        Ok(Self {
            db,
            owned,
            clear: spec.clear,
            concurrency: spec
                .concurrency
                .unwrap_or(DEFAULT_FIXTURE_CONCURRENCY)
                .max(1),
            closed: AtomicBool::new(false),
        })
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn db(&self) -> &Arc<dyn Database> {
        &self.db
    }

    pub fn owns_connection(&self) -> bool {
        self.owned
    }

    /// Loads every `*.json` and `*.toml` fixture under `dir`.
    pub async fn load_fixtures(
        &self,
        dir: &Path,
        options: LoadOptions,
    ) -> Result<FixtureReport, BootstrapError> {
        let specs = read_fixture_dir(dir)?;
        debug!(dir = %dir.display(), fixtures = specs.len(), "loading fixtures");
        self.load_definitions(specs.into_iter().map(FixtureDefinition::Static).collect(), options)
            .await
    }

    /// Resolves generators, then loads each target collection once: clear,
    /// then insert or upsert its documents. Document failures are recorded
    /// in the report and do not stop the load.
    pub async fn load_definitions(
        &self,
        definitions: Vec<FixtureDefinition>,
        options: LoadOptions,
    ) -> Result<FixtureReport, BootstrapError> {
        let mut groups: Vec<(String, Vec<FixtureSpec>)> = Vec::new();
        for definition in definitions {
            let spec = match definition {
                FixtureDefinition::Static(spec) => spec,
                FixtureDefinition::Generator(generate) => generate(self.db.clone(), options).await?,
            };
            match groups.iter_mut().find(|(name, _)| *name == spec.collection) {
                Some((_, specs)) => specs.push(spec),
                None => groups.push((spec.collection.clone(), vec![spec])),
            }
        }

        let clear = options.clear || self.clear;
        let mut collections: Vec<CollectionLoad> = stream::iter(groups)
            .map(|(name, specs)| self.load_collection(name, specs, clear))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        collections.sort_by(|a, b| a.collection.cmp(&b.collection));

        let report = FixtureReport { collections };
        info!(
            collections = report.collections.len(),
            documents = report.written(),
            "fixtures loaded"
        );
        Ok(report)
    }

    async fn load_collection(
        &self,
        name: String,
        specs: Vec<FixtureSpec>,
        clear: bool,
    ) -> CollectionLoad {
        let coll = self.db.collection(&name);
        let mut load = CollectionLoad {
            collection: name,
            ..CollectionLoad::default()
        };
        if clear {
            match coll.delete_many(&Filter::All).await {
                Ok(_) => load.cleared = true,
                Err(err) => {
                    warn!(collection = %load.collection, error = %err, "unable to clear fixture collection");
                    load.errors.push(err.to_string());
                    return load;
                }
            }
        }
        for spec in specs {
            for document in spec.data {
                let result = if spec.upsert {
                    match document.get(ID_FIELD).cloned() {
                        Some(id) => coll
                            .upsert_one(&Filter::by_id(id), document)
                            .await
                            .map(|_| load.upserted += 1)
                            .map_err(|e| e.to_string()),
                        None => Err("upsert fixture document has no _id".to_string()),
                    }
                } else {
                    coll.insert_one(document)
                        .await
                        .map(|_| load.inserted += 1)
                        .map_err(|e| e.to_string())
                };
                if let Err(message) = result {
                    warn!(collection = %load.collection, error = %message, "fixture document rejected");
                    load.errors.push(message);
                }
            }
        }
        load
    }

    /// Closes the connection if this loader opened it. Later calls do
    /// nothing.
    pub async fn close(&self) -> Result<(), BootstrapError> {
        if self.closed.swap(true, Ordering::SeqCst) || !self.owned {
            return Ok(());
        }
        self.db.close().await?;
        Ok(())
    }
}

/// Loaders opened on behalf of one caller. Clones share the same list.
#[derive(Clone)]
pub struct LoaderRegistry {
    driver: Arc<dyn Driver>,
    concurrency: usize,
    loaders: Arc<Mutex<Vec<Arc<FixtureLoader>>>>,
}

impl LoaderRegistry {
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        Self {
            driver,
            concurrency: DEFAULT_FIXTURE_CONCURRENCY,
            loaders: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Write concurrency for loaders whose spec does not set one.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Opens a loader and tracks it until [`close_all`](Self::close_all).
    pub async fn load(&self, mut spec: LoaderSpec) -> Result<Arc<FixtureLoader>, BootstrapError> {
        spec.concurrency.get_or_insert(self.concurrency);
        let loader = Arc::new(FixtureLoader::open(self.driver.as_ref(), spec).await?);
        self.loaders.lock().push(loader.clone());
        Ok(loader)
    }

    pub fn len(&self) -> usize {
        self.loaders.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.loaders.lock().is_empty()
    }

    /// Closes and forgets every tracked loader.
    pub async fn close_all(&self) {
        let loaders = std::mem::take(&mut *self.loaders.lock());
        join_all(loaders.iter().map(|loader| async move {
            if let Err(err) = loader.close().await {
                warn!(error = %err, "failed to close fixture loader");
            }
        }))
        .await;
    }

    /// Runs `f` with this registry and closes every loader afterwards, also
    /// when `f` panics. The panic is resumed once the loaders are closed.
    pub async fn scope<F, Fut, T>(&self, f: F) -> T
    where
        F: FnOnce(LoaderRegistry) -> Fut,
        Fut: Future<Output = T>,
    {
        let registry = self.clone();
        let out = AssertUnwindSafe(async move { f(registry).await })
            .catch_unwind()
            .await;
        self.close_all().await;
        match out {
            Ok(value) => value,
            Err(panic) => resume_unwind(panic),
        }
    }
}

/// Loads several directories through one loader and merges the reports.
pub async fn load_dirs(
    loader: &FixtureLoader,
    dirs: &[&Path],
    options: LoadOptions,
) -> Result<FixtureReport, BootstrapError> {
    let mut report = FixtureReport::default();
    for dir in dirs {
        report.merge(loader.load_fixtures(dir, options).await?);
    }
    Ok(report)
}
