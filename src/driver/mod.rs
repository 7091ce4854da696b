//! Driver seam between the bootstrap engine and a document database.
//!
//! The engine only ever talks to [`Driver`], [`Database`] and [`Collection`].
//! [`memory::MemoryDriver`] is always available; the MongoDB driver is gated
//! behind the `mongodb` feature.

pub mod memory;
#[cfg(feature = "mongodb")]
pub mod mongo;

use crate::document::{Document, Filter};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    #[error("unable to connect to {uri}: {message}")]
    Connect { uri: String, message: String },
    #[error("duplicate key in collection '{collection}': {key}")]
    DuplicateKey { collection: String, key: String },
    #[error("index '{name}' on '{collection}' conflicts with an existing index: {message}")]
    IndexConflict {
        collection: String,
        name: String,
        message: String,
    },
    #[error("invalid index on '{collection}': {message}")]
    InvalidIndex { collection: String, message: String },
    #[error("connection is closed")]
    Closed,
    #[error("driver error: {0}")]
    Backend(String),
}

/// Where reads may be served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadPreference {
    Primary,
    PrimaryPreferred,
    /// Replica members are acceptable for reads.
    #[default]
    SecondaryPreferred,
    Secondary,
    Nearest,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectOptions {
    pub read_preference: ReadPreference,
    pub app_name: Option<String>,
    /// Driver-specific options passed through untouched.
    #[serde(flatten)]
    pub extra: Document,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexDirection {
    Ascending,
    Descending,
    Text,
    Hashed,
}

impl IndexDirection {
    fn name_part(self) -> &'static str {
        match self {
            IndexDirection::Ascending => "1",
            IndexDirection::Descending => "-1",
            IndexDirection::Text => "text",
            IndexDirection::Hashed => "hashed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexKey {
    pub field: String,
    pub direction: IndexDirection,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexOptions {
    /// `None` means the engine default (background build).
    pub background: Option<bool>,
    pub unique: bool,
    pub sparse: bool,
    pub name: Option<String>,
    pub expire_after_secs: Option<u64>,
    pub partial_filter: Option<Document>,
}

impl IndexOptions {
    pub fn unique() -> Self {
        Self {
            unique: true,
            ..Self::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_background(mut self, background: bool) -> Self {
        self.background = Some(background);
        self
    }

    pub fn with_sparse(mut self, sparse: bool) -> Self {
        self.sparse = sparse;
        self
    }

    pub fn with_expire_after_secs(mut self, secs: u64) -> Self {
        self.expire_after_secs = Some(secs);
        self
    }

    pub fn with_partial_filter(mut self, filter: Document) -> Self {
        self.partial_filter = Some(filter);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexModel {
    pub keys: Vec<IndexKey>,
    pub options: IndexOptions,
}

impl IndexModel {
    /// Explicit name, or the conventional `field_1_other_-1` form.
    pub fn name(&self) -> String {
        if let Some(name) = &self.options.name {
            return name.clone();
        }
        self.keys
            .iter()
            .map(|k| format!("{}_{}", k.field, k.direction.name_part()))
            .collect::<Vec<_>>()
            .join("_")
    }
}

#[async_trait]
pub trait Driver: Send + Sync {
    async fn connect(
        &self,
        uri: &str,
        options: &ConnectOptions,
    ) -> Result<Arc<dyn Database>, DriverError>;
}

#[async_trait]
pub trait Database: Send + Sync {
    fn name(&self) -> &str;

    fn collection(&self, name: &str) -> Arc<dyn Collection>;

    async fn close(&self) -> Result<(), DriverError>;
}

#[async_trait]
pub trait Collection: Send + Sync {
    fn name(&self) -> &str;

    async fn count(&self, filter: &Filter) -> Result<u64, DriverError>;

    async fn find(&self, filter: &Filter) -> Result<Vec<Document>, DriverError>;

    async fn find_one(&self, filter: &Filter) -> Result<Option<Document>, DriverError>;

    async fn insert_one(&self, document: Document) -> Result<(), DriverError>;

    /// Inserts documents in order and returns the inserted count.
    async fn insert_many(&self, documents: Vec<Document>) -> Result<u64, DriverError>;

    /// Replaces the first document matching `filter`, inserting when none does.
    async fn upsert_one(&self, filter: &Filter, document: Document) -> Result<(), DriverError>;

    async fn delete_many(&self, filter: &Filter) -> Result<u64, DriverError>;

    /// Creates the index if it does not exist yet and returns its name.
    async fn create_index(&self, index: &IndexModel) -> Result<String, DriverError>;

    async fn list_indexes(&self) -> Result<Vec<IndexModel>, DriverError>;
}

#[cfg(test)]
mod tests {
    use super::{IndexDirection, IndexKey, IndexModel, IndexOptions};

    #[test]
    fn index_names_follow_key_layout() {
        let model = IndexModel {
            keys: vec![
                IndexKey {
                    field: "email".into(),
                    direction: IndexDirection::Ascending,
                },
                IndexKey {
                    field: "created".into(),
                    direction: IndexDirection::Descending,
                },
            ],
            options: IndexOptions::default(),
        };
        assert_eq!(model.name(), "email_1_created_-1");

        let named = IndexModel {
            options: IndexOptions::unique().with_name("uniq_email"),
            ..model
        };
        assert_eq!(named.name(), "uniq_email");
    }
}
