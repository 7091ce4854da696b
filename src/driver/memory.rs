//! In-process driver keeping every database in memory.
//!
//! Connections to the same URI share data, so a fixture loader that opens its
//! own connection sees what another connection wrote. Writes honour `_id`
//! uniqueness and unique indexes the way a real server does.

use super::{Collection, ConnectOptions, Database, Driver, DriverError, IndexModel};
use crate::document::{Document, Filter, ID_FIELD, get_path};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[derive(Clone, Default)]
pub struct MemoryDriver {
    state: Arc<DriverState>,
}

#[derive(Default)]
struct DriverState {
    stores: Mutex<HashMap<String, Arc<Store>>>,
    unreachable: Mutex<HashSet<String>>,
    connects: AtomicUsize,
    closes: Arc<AtomicUsize>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every later `connect` to `uri` fail.
    pub fn set_unreachable(&self, uri: impl Into<String>) {
        self.state.unreachable.lock().insert(uri.into());
    }

    pub fn connect_count(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    /// Close calls across every handle this driver opened.
    pub fn close_count(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    /// Opens a handle without going through the trait object, for tests that
    /// need to inspect close calls.
    pub fn open(&self, uri: &str) -> Result<Arc<MemoryDatabase>, DriverError> {
        if self.state.unreachable.lock().contains(uri) {
            return Err(DriverError::Connect {
                uri: uri.to_string(),
                message: "server unreachable".into(),
            });
        }
        let name = database_name(uri).ok_or_else(|| DriverError::Connect {
            uri: uri.to_string(),
            message: "uri does not name a database".into(),
        })?;
        let key = uri.split('?').next().unwrap_or(uri).to_string();
        let store = self
            .state
            .stores
            .lock()
            .entry(key)
            .or_insert_with(|| Arc::new(Store::default()))
            .clone();
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MemoryDatabase {
            name,
            store,
            handle: Arc::new(HandleState {
                driver_closes: self.state.closes.clone(),
                ..HandleState::default()
            }),
        }))
    }
}

#[async_trait]
impl Driver for MemoryDriver {
    async fn connect(
        &self,
        uri: &str,
        _options: &ConnectOptions,
    ) -> Result<Arc<dyn Database>, DriverError> {
        let db: Arc<dyn Database> = self.open(uri)?;
        Ok(db)
    }
}

/// `scheme://host/name?opts` -> `name`
fn database_name(uri: &str) -> Option<String> {
    let (_, rest) = uri.split_once("://")?;
    let path = rest.split('?').next()?;
    let (_, name) = path.split_once('/')?;
    let name = name.trim_matches('/');
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

#[derive(Default)]
struct Store {
    collections: Mutex<BTreeMap<String, Arc<CollectionData>>>,
}

#[derive(Default)]
struct CollectionData {
    documents: Mutex<Vec<Document>>,
    indexes: Mutex<Vec<IndexModel>>,
}

#[derive(Default)]
struct HandleState {
    closed: AtomicBool,
    close_calls: AtomicUsize,
    driver_closes: Arc<AtomicUsize>,
}

pub struct MemoryDatabase {
    name: String,
    store: Arc<Store>,
    handle: Arc<HandleState>,
}

impl MemoryDatabase {
    pub fn is_closed(&self) -> bool {
        self.handle.closed.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.handle.close_calls.load(Ordering::SeqCst)
    }

    pub fn collection_names(&self) -> Vec<String> {
        self.store.collections.lock().keys().cloned().collect()
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    fn name(&self) -> &str {
        &self.name
    }

    fn collection(&self, name: &str) -> Arc<dyn Collection> {
        let data = self
            .store
            .collections
            .lock()
            .entry(name.to_string())
            .or_default()
            .clone();
        Arc::new(MemoryCollection {
            name: name.to_string(),
            data,
            handle: self.handle.clone(),
        })
    }

    async fn close(&self) -> Result<(), DriverError> {
        self.handle.close_calls.fetch_add(1, Ordering::SeqCst);
        self.handle.driver_closes.fetch_add(1, Ordering::SeqCst);
        self.handle.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

pub struct MemoryCollection {
    name: String,
    data: Arc<CollectionData>,
    handle: Arc<HandleState>,
}

impl MemoryCollection {
    fn ensure_open(&self) -> Result<(), DriverError> {
        if self.handle.closed.load(Ordering::SeqCst) {
            return Err(DriverError::Closed);
        }
        Ok(())
    }

    fn check_unique(
        &self,
        documents: &[Document],
        indexes: &[IndexModel],
        candidate: &Document,
        skip: Option<usize>,
    ) -> Result<(), DriverError> {
        let id = candidate.get(ID_FIELD);
        for (pos, existing) in documents.iter().enumerate() {
            if Some(pos) == skip {
                continue;
            }
            if id.is_some() && existing.get(ID_FIELD) == id {
                return Err(self.duplicate(ID_FIELD, id.cloned().unwrap_or(Value::Null)));
            }
            for index in indexes.iter().filter(|i| i.options.unique) {
                if let Some(key) = unique_key(index, candidate)
                    && unique_key(index, existing).as_ref() == Some(&key)
                {
                    return Err(self.duplicate(&index.name(), Value::Array(key)));
                }
            }
        }
        Ok(())
    }

    fn duplicate(&self, index: &str, key: Value) -> DriverError {
        DriverError::DuplicateKey {
            collection: self.name.clone(),
            key: format!("{index}: {key}"),
        }
    }

    fn insert_locked(
        &self,
        documents: &mut Vec<Document>,
        indexes: &[IndexModel],
        mut document: Document,
    ) -> Result<(), DriverError> {
        if !document.contains_key(ID_FIELD) {
            document.insert(
                ID_FIELD.to_string(),
                Value::String(uuid::Uuid::new_v4().simple().to_string()),
            );
        }
        self.check_unique(documents, indexes, &document, None)?;
        documents.push(document);
        Ok(())
    }
}

/// Key tuple of `document` under a unique index; `None` when a sparse index
/// does not cover the document.
fn unique_key(index: &IndexModel, document: &Document) -> Option<Vec<Value>> {
    let values: Vec<Option<&Value>> = index
        .keys
        .iter()
        .map(|k| get_path(document, &k.field))
        .collect();
    if index.options.sparse && values.iter().all(Option::is_none) {
        return None;
    }
    Some(
        values
            .into_iter()
            .map(|v| v.cloned().unwrap_or(Value::Null))
            .collect(),
    )
}

#[async_trait]
impl Collection for MemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn count(&self, filter: &Filter) -> Result<u64, DriverError> {
        self.ensure_open()?;
        let documents = self.data.documents.lock();
        Ok(documents.iter().filter(|d| filter.matches(d)).count() as u64)
    }

    async fn find(&self, filter: &Filter) -> Result<Vec<Document>, DriverError> {
        self.ensure_open()?;
        let documents = self.data.documents.lock();
        Ok(documents
            .iter()
            .filter(|d| filter.matches(d))
            .cloned()
            .collect())
    }

    async fn find_one(&self, filter: &Filter) -> Result<Option<Document>, DriverError> {
        self.ensure_open()?;
        let documents = self.data.documents.lock();
        Ok(documents.iter().find(|d| filter.matches(d)).cloned())
    }

    async fn insert_one(&self, document: Document) -> Result<(), DriverError> {
        self.ensure_open()?;
        let indexes = self.data.indexes.lock().clone();
        let mut documents = self.data.documents.lock();
        self.insert_locked(&mut documents, &indexes, document)
    }

    async fn insert_many(&self, batch: Vec<Document>) -> Result<u64, DriverError> {
        self.ensure_open()?;
        let indexes = self.data.indexes.lock().clone();
        let mut documents = self.data.documents.lock();
        let mut inserted = 0;
        // Ordered insert: documents before the first failure stay written.
        for document in batch {
            self.insert_locked(&mut documents, &indexes, document)?;
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn upsert_one(&self, filter: &Filter, mut document: Document) -> Result<(), DriverError> {
        self.ensure_open()?;
        let indexes = self.data.indexes.lock().clone();
        let mut documents = self.data.documents.lock();
        match documents.iter().position(|d| filter.matches(d)) {
            Some(pos) => {
                if let Some(id) = documents[pos].get(ID_FIELD).cloned() {
                    document.insert(ID_FIELD.to_string(), id);
                }
                self.check_unique(&documents, &indexes, &document, Some(pos))?;
                documents[pos] = document;
                Ok(())
            }
            None => {
                if !document.contains_key(ID_FIELD)
                    && let Filter::Eq { field, value } = filter
                    && field == ID_FIELD
                {
                    document.insert(ID_FIELD.to_string(), value.clone());
                }
                self.insert_locked(&mut documents, &indexes, document)
            }
        }
    }

    async fn delete_many(&self, filter: &Filter) -> Result<u64, DriverError> {
        self.ensure_open()?;
        let mut documents = self.data.documents.lock();
        let before = documents.len();
        documents.retain(|d| !filter.matches(d));
        Ok((before - documents.len()) as u64)
    }

    async fn create_index(&self, index: &IndexModel) -> Result<String, DriverError> {
        self.ensure_open()?;
        if index.keys.is_empty() {
            return Err(DriverError::InvalidIndex {
                collection: self.name.clone(),
                message: "index key specification must not be empty".into(),
            });
        }
        let name = index.name();
        let mut indexes = self.data.indexes.lock();
        for existing in indexes.iter() {
            let same_name = existing.name() == name;
            let same_keys = existing.keys == index.keys;
            if same_name && same_keys {
                if existing.options.unique != index.options.unique
                    || existing.options.sparse != index.options.sparse
                {
                    return Err(DriverError::IndexConflict {
                        collection: self.name.clone(),
                        name,
                        message: "same keys with different options".into(),
                    });
                }
                return Ok(name);
            }
            if same_name || same_keys {
                return Err(DriverError::IndexConflict {
                    collection: self.name.clone(),
                    name,
                    message: format!("existing index '{}'", existing.name()),
                });
            }
        }
        if index.options.unique {
            let documents = self.data.documents.lock();
            let mut seen = HashSet::new();
            for document in documents.iter() {
                if let Some(key) = unique_key(index, document)
                    && !seen.insert(Value::Array(key.clone()).to_string())
                {
                    return Err(self.duplicate(&name, Value::Array(key)));
                }
            }
        }
        indexes.push(index.clone());
        Ok(name)
    }

    async fn list_indexes(&self) -> Result<Vec<IndexModel>, DriverError> {
        self.ensure_open()?;
        Ok(self.data.indexes.lock().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::{MemoryDriver, database_name};
    use crate::document::{Filter, doc};
    use crate::driver::{
        Collection, ConnectOptions, Database, Driver, DriverError, IndexDirection, IndexKey,
        IndexModel, IndexOptions,
    };
    use serde_json::json;

    fn email_index(unique: bool) -> IndexModel {
        IndexModel {
            keys: vec![IndexKey {
                field: "email".into(),
                direction: IndexDirection::Ascending,
            }],
            options: IndexOptions {
                unique,
                ..IndexOptions::default()
            },
        }
    }

    #[test]
    fn database_name_is_taken_from_uri_path() {
        assert_eq!(
            database_name("mongodb://localhost:27017/app_test?w=1").as_deref(),
            Some("app_test")
        );
        assert_eq!(database_name("memory://local/main").as_deref(), Some("main"));
        assert_eq!(database_name("mongodb://localhost:27017"), None);
    }

    #[tokio::test]
    async fn connections_to_the_same_uri_share_documents() {
        let driver = MemoryDriver::new();
        let a = driver
            .connect("memory://local/app", &ConnectOptions::default())
            .await
            .expect("connect a");
        let b = driver
            .connect("memory://local/app", &ConnectOptions::default())
            .await
            .expect("connect b");
        a.collection("users")
            .insert_one(doc(json!({"_id": 1})))
            .await
            .expect("insert");
        assert_eq!(
            b.collection("users").count(&Filter::All).await.expect("count"),
            1
        );
        assert_eq!(driver.connect_count(), 2);
    }

    #[tokio::test]
    async fn unreachable_uri_fails_to_connect() {
        let driver = MemoryDriver::new();
        driver.set_unreachable("memory://down/app");
        let err = driver
            .connect("memory://down/app", &ConnectOptions::default())
            .await
            .err()
            .expect("connect must fail");
        assert!(matches!(err, DriverError::Connect { .. }));
    }

    #[tokio::test]
    async fn duplicate_ids_and_unique_indexes_are_rejected() {
        let driver = MemoryDriver::new();
        let db = driver.open("memory://local/app").expect("open");
        let users = db.collection("users");
        users
            .create_index(&email_index(true))
            .await
            .expect("create index");
        users
            .insert_one(doc(json!({"_id": 1, "email": "a@x.com"})))
            .await
            .expect("insert");

        let dup_id = users.insert_one(doc(json!({"_id": 1}))).await;
        assert!(matches!(dup_id, Err(DriverError::DuplicateKey { .. })));

        let dup_email = users
            .insert_one(doc(json!({"_id": 2, "email": "a@x.com"})))
            .await;
        assert!(matches!(dup_email, Err(DriverError::DuplicateKey { .. })));
    }

    #[tokio::test]
    async fn create_index_is_idempotent_but_rejects_conflicting_options() {
        let driver = MemoryDriver::new();
        let db = driver.open("memory://local/app").expect("open");
        let users = db.collection("users");
        assert_eq!(
            users.create_index(&email_index(false)).await.expect("first"),
            "email_1"
        );
        assert_eq!(
            users.create_index(&email_index(false)).await.expect("again"),
            "email_1"
        );
        assert_eq!(users.list_indexes().await.expect("list").len(), 1);
        assert!(matches!(
            users.create_index(&email_index(true)).await,
            Err(DriverError::IndexConflict { .. })
        ));
    }

    #[tokio::test]
    async fn closed_handles_reject_operations() {
        let driver = MemoryDriver::new();
        let db = driver.open("memory://local/app").expect("open");
        db.close().await.expect("close");
        assert!(db.is_closed());
        assert_eq!(db.close_calls(), 1);
        assert_eq!(driver.close_count(), 1);
        assert!(matches!(
            db.collection("users").count(&Filter::All).await,
            Err(DriverError::Closed)
        ));
    }

    #[tokio::test]
    async fn upsert_replaces_by_filter_or_inserts() {
        let driver = MemoryDriver::new();
        let db = driver.open("memory://local/app").expect("open");
        let users = db.collection("users");
        users
            .upsert_one(&Filter::by_id(json!(7)), doc(json!({"name": "a"})))
            .await
            .expect("insert via upsert");
        users
            .upsert_one(&Filter::by_id(json!(7)), doc(json!({"_id": 7, "name": "b"})))
            .await
            .expect("replace via upsert");
        let all = users.find(&Filter::All).await.expect("find");
        assert_eq!(all, vec![doc(json!({"_id": 7, "name": "b"}))]);
    }
}
