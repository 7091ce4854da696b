use super::{
    Collection, ConnectOptions, Database, Driver, DriverError, IndexDirection, IndexKey,
    IndexModel, IndexOptions, ReadPreference,
};
use crate::document::{Document, Filter};
use async_trait::async_trait;
use bson::Bson;
use futures::TryStreamExt;
use mongodb::Client;
use mongodb::options::ClientOptions;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Driver backed by the official MongoDB client.
#[derive(Debug, Clone, Default)]
pub struct MongoDriver;

impl MongoDriver {
    pub fn new() -> Self {
        Self
    }
}

fn read_preference_param(preference: ReadPreference) -> &'static str {
    match preference {
        ReadPreference::Primary => "primary",
        ReadPreference::PrimaryPreferred => "primaryPreferred",
        ReadPreference::SecondaryPreferred => "secondaryPreferred",
        ReadPreference::Secondary => "secondary",
        ReadPreference::Nearest => "nearest",
    }
}

/// Appends the read preference unless the URI already carries one.
fn uri_with_read_preference(uri: &str, preference: ReadPreference) -> String {
    if uri.contains("readPreference=") {
        return uri.to_string();
    }
    let sep = if uri.contains('?') { '&' } else { '?' };
    format!(
        "{uri}{sep}readPreference={}",
        read_preference_param(preference)
    )
}

fn backend(err: impl std::fmt::Display) -> DriverError {
    let message = err.to_string();
    if message.contains("E11000") {
        return DriverError::DuplicateKey {
            collection: String::new(),
            key: message,
        };
    }
    DriverError::Backend(message)
}

fn to_bson(document: &Document) -> Result<bson::Document, DriverError> {
    bson::to_document(&Value::Object(document.clone())).map_err(backend)
}

fn from_bson(document: bson::Document) -> Document {
    match Bson::Document(document).into_relaxed_extjson() {
        Value::Object(map) => map,
        _ => Document::new(),
    }
}

#[async_trait]
impl Driver for MongoDriver {
    async fn connect(
        &self,
        uri: &str,
        options: &ConnectOptions,
    ) -> Result<Arc<dyn Database>, DriverError> {
        let connect_err = |message: String| DriverError::Connect {
            uri: uri.to_string(),
            message,
        };
        let full_uri = uri_with_read_preference(uri, options.read_preference);
        let mut client_options = ClientOptions::parse(&full_uri)
            .await
            .map_err(|e| connect_err(e.to_string()))?;
        if let Some(app_name) = &options.app_name {
            client_options.app_name = Some(app_name.clone());
        }
        let client = Client::with_options(client_options).map_err(|e| connect_err(e.to_string()))?;
        let db = client
            .default_database()
            .ok_or_else(|| connect_err("uri does not name a database".into()))?;
        // Fail at connect time rather than on the first operation.
        db.run_command(bson::doc! { "ping": 1 })
            .await
            .map_err(|e| connect_err(e.to_string()))?;
        Ok(Arc::new(MongoDatabase {
            name: db.name().to_string(),
            client,
            db,
        }))
    }
}

pub struct MongoDatabase {
    name: String,
    client: Client,
    db: mongodb::Database,
}

#[async_trait]
impl Database for MongoDatabase {
    fn name(&self) -> &str {
        &self.name
    }

    fn collection(&self, name: &str) -> Arc<dyn Collection> {
        Arc::new(MongoCollection {
            name: name.to_string(),
            inner: self.db.collection::<bson::Document>(name),
        })
    }

    async fn close(&self) -> Result<(), DriverError> {
        self.client.clone().shutdown().await;
        Ok(())
    }
}

pub struct MongoCollection {
    name: String,
    inner: mongodb::Collection<bson::Document>,
}

fn key_document(keys: &[IndexKey]) -> bson::Document {
    let mut out = bson::Document::new();
    for key in keys {
        let value = match key.direction {
            IndexDirection::Ascending => Bson::Int32(1),
            IndexDirection::Descending => Bson::Int32(-1),
            IndexDirection::Text => Bson::String("text".into()),
            IndexDirection::Hashed => Bson::String("hashed".into()),
        };
        out.insert(key.field.clone(), value);
    }
    out
}

fn keys_from_document(keys: &bson::Document) -> Vec<IndexKey> {
    keys.iter()
        .map(|(field, value)| {
            let direction = match value {
                Bson::String(s) if s == "text" => IndexDirection::Text,
                Bson::String(s) if s == "hashed" => IndexDirection::Hashed,
                Bson::Int32(n) if *n < 0 => IndexDirection::Descending,
                Bson::Int64(n) if *n < 0 => IndexDirection::Descending,
                Bson::Double(n) if *n < 0.0 => IndexDirection::Descending,
                _ => IndexDirection::Ascending,
            };
            IndexKey {
                field: field.clone(),
                direction,
            }
        })
        .collect()
}

#[async_trait]
impl Collection for MongoCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn count(&self, filter: &Filter) -> Result<u64, DriverError> {
        let query = to_bson(&filter.to_query())?;
        self.inner.count_documents(query).await.map_err(backend)
    }

    async fn find(&self, filter: &Filter) -> Result<Vec<Document>, DriverError> {
        let query = to_bson(&filter.to_query())?;
        let cursor = self.inner.find(query).await.map_err(backend)?;
        let documents: Vec<bson::Document> = cursor.try_collect().await.map_err(backend)?;
        Ok(documents.into_iter().map(from_bson).collect())
    }

    async fn find_one(&self, filter: &Filter) -> Result<Option<Document>, DriverError> {
        let query = to_bson(&filter.to_query())?;
        let found = self.inner.find_one(query).await.map_err(backend)?;
        Ok(found.map(from_bson))
    }

    async fn insert_one(&self, document: Document) -> Result<(), DriverError> {
        self.inner
            .insert_one(to_bson(&document)?)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn insert_many(&self, documents: Vec<Document>) -> Result<u64, DriverError> {
        if documents.is_empty() {
            return Ok(0);
        }
        let batch = documents
            .iter()
            .map(to_bson)
            .collect::<Result<Vec<_>, _>>()?;
        let result = self.inner.insert_many(batch).await.map_err(backend)?;
        Ok(result.inserted_ids.len() as u64)
    }

    async fn upsert_one(&self, filter: &Filter, document: Document) -> Result<(), DriverError> {
        let query = to_bson(&filter.to_query())?;
        self.inner
            .replace_one(query, to_bson(&document)?)
            .upsert(true)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn delete_many(&self, filter: &Filter) -> Result<u64, DriverError> {
        let query = to_bson(&filter.to_query())?;
        let result = self.inner.delete_many(query).await.map_err(backend)?;
        Ok(result.deleted_count)
    }

    async fn create_index(&self, index: &IndexModel) -> Result<String, DriverError> {
        if index.keys.is_empty() {
            return Err(DriverError::InvalidIndex {
                collection: self.name.clone(),
                message: "index key specification must not be empty".into(),
            });
        }
        let mut options = mongodb::options::IndexOptions::default();
        options.name = Some(index.name());
        options.background = index.options.background;
        options.unique = index.options.unique.then_some(true);
        options.sparse = index.options.sparse.then_some(true);
        options.expire_after = index.options.expire_after_secs.map(Duration::from_secs);
        if let Some(partial) = &index.options.partial_filter {
            options.partial_filter_expression = Some(to_bson(partial)?);
        }
        let mut model = mongodb::IndexModel::default();
        model.keys = key_document(&index.keys);
        model.options = Some(options);
        let result = self.inner.create_index(model).await.map_err(|e| {
            let message = e.to_string();
            if message.contains("IndexOptionsConflict") || message.contains("IndexKeySpecsConflict")
            {
                DriverError::IndexConflict {
                    collection: self.name.clone(),
                    name: index.name(),
                    message,
                }
            } else {
                backend(message)
            }
        })?;
        Ok(result.index_name)
    }

    async fn list_indexes(&self) -> Result<Vec<IndexModel>, DriverError> {
        let cursor = self.inner.list_indexes().await.map_err(backend)?;
        let models: Vec<mongodb::IndexModel> = cursor.try_collect().await.map_err(backend)?;
        Ok(models
            .into_iter()
            .map(|m| {
                let opts = m.options.unwrap_or_default();
                IndexModel {
                    keys: keys_from_document(&m.keys),
                    options: IndexOptions {
                        background: opts.background,
                        unique: opts.unique.unwrap_or(false),
                        sparse: opts.sparse.unwrap_or(false),
                        name: opts.name,
                        expire_after_secs: opts.expire_after.map(|d| d.as_secs()),
                        partial_filter: opts.partial_filter_expression.map(from_bson),
                    },
                }
            })
            .collect())
    }
}
