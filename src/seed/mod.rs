pub mod script;
pub mod toolset;

pub use script::{Call, ScriptError, parse_call, preprocess_document};
pub use toolset::{SeedingToolset, encrypt_password};

use crate::connection::ConnectionRegistry;
use crate::document::{Document, Filter};
use crate::driver::Database;
use crate::error::BootstrapError;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Per-database force setting: one flag for every collection, or one per
/// collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DatabaseForce {
    All(bool),
    PerCollection(BTreeMap<String, bool>),
}

/// Configured force flag: `true`, `{db: true}` or `{db: {collection: true}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ForceFlag {
    Global(bool),
    PerDatabase(BTreeMap<String, DatabaseForce>),
}

impl Default for ForceFlag {
    fn default() -> Self {
        ForceFlag::Global(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedForce {
    Forced,
    NotForced,
}

impl ForceFlag {
    /// Global flag first, then the database entry, then the collection entry.
    /// A level that is absent resolves to `NotForced`.
    pub fn resolve(&self, database: &str, collection: &str) -> SeedForce {
        let forced = match self {
            ForceFlag::Global(flag) => *flag,
            ForceFlag::PerDatabase(databases) => match databases.get(database) {
                None => false,
                Some(DatabaseForce::All(flag)) => *flag,
                Some(DatabaseForce::PerCollection(collections)) => {
                    collections.get(collection).copied().unwrap_or(false)
                }
            },
        };
        if forced {
            SeedForce::Forced
        } else {
            SeedForce::NotForced
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CollectionSeed {
    pub name: String,
    pub documents: Vec<Document>,
}

/// Documents a database should hold on first run, in collection order.
#[derive(Debug, Clone, PartialEq)]
pub struct SeedSpec {
    pub database: String,
    pub collections: Vec<CollectionSeed>,
}

impl SeedSpec {
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collections: Vec::new(),
        }
    }

    pub fn collection(mut self, name: impl Into<String>, documents: Vec<Document>) -> Self {
        self.collections.push(CollectionSeed {
            name: name.into(),
            documents,
        });
        self
    }

    /// Reads `{"collection": [documents...], ...}`, keeping collection order.
    pub fn from_json(database: impl Into<String>, value: Value) -> Result<Self, BootstrapError> {
        let database = database.into();
        let parse_err = |message: String| BootstrapError::Parse {
            source_name: format!("seed spec for '{database}'"),
            message,
        };
        let Value::Object(collections) = value else {
            return Err(parse_err("seed spec must be an object".into()));
        };
        let mut spec = SeedSpec::new(database.clone());
        for (name, documents) in collections {
            let Value::Array(items) = documents else {
                return Err(parse_err(format!("collection '{name}' must be an array")));
            };
            let documents = items
                .into_iter()
                .map(|item| match item {
                    Value::Object(map) => Ok(map),
                    other => Err(parse_err(format!(
                        "collection '{name}' holds a non-document value: {other}"
                    ))),
                })
                .collect::<Result<Vec<_>, _>>()?;
            spec = spec.collection(name, documents);
        }
        Ok(spec)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedCheck {
    pub needed: bool,
    pub current_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeedOutcome {
    Seeded { inserted: u64, cleared: bool },
    Skipped { current_count: u64 },
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionOutcome {
    pub collection: String,
    pub outcome: SeedOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SeedReport {
    pub database: String,
    pub collections: Vec<CollectionOutcome>,
}

impl SeedReport {
    pub fn outcome(&self, collection: &str) -> Option<&SeedOutcome> {
        self.collections
            .iter()
            .find(|c| c.collection == collection)
            .map(|c| &c.outcome)
    }

    pub fn failed(&self) -> impl Iterator<Item = &CollectionOutcome> {
        self.collections
            .iter()
            .filter(|c| matches!(c.outcome, SeedOutcome::Failed(_)))
    }
}

pub struct Seeder {
    db: Arc<dyn Database>,
    spec: SeedSpec,
    force: ForceFlag,
    toolset: Arc<SeedingToolset>,
}

impl Seeder {
    pub fn new(
        db: Arc<dyn Database>,
        spec: SeedSpec,
        force: ForceFlag,
        toolset: Arc<SeedingToolset>,
    ) -> Self {
        Self {
            db,
            spec,
            force,
            toolset,
        }
    }

    fn database(&self) -> &str {
        &self.spec.database
    }

    fn seed_error(&self, collection: &str, err: impl std::fmt::Display) -> BootstrapError {
        BootstrapError::Seed {
            database: self.database().to_string(),
            collection: collection.to_string(),
            message: err.to_string(),
        }
    }

    pub async fn seed_needed(&self, collection: &str) -> Result<SeedCheck, BootstrapError> {
        let forced = self.force.resolve(self.database(), collection) == SeedForce::Forced;
        let current_count = self
            .db
            .collection(collection)
            .count(&Filter::All)
            .await
            .map_err(|e| self.seed_error(collection, e))?;
        Ok(SeedCheck {
            needed: forced || current_count == 0,
            current_count,
        })
    }

    /// Seeds every collection in order. Each collection fails on its own;
    /// the rest still run.
    pub async fn seed(&self) -> SeedReport {
        let mut report = SeedReport {
            database: self.database().to_string(),
            collections: Vec::with_capacity(self.spec.collections.len()),
        };
        for seed in &self.spec.collections {
            let outcome = match self.seed_collection(seed).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    warn!(
                        database = %self.database(),
                        collection = %seed.name,
                        error = %err,
                        "seeding failed for collection"
                    );
                    SeedOutcome::Failed(err.to_string())
                }
            };
            report.collections.push(CollectionOutcome {
                collection: seed.name.clone(),
                outcome,
            });
        }
        report
    }

    async fn seed_collection(&self, seed: &CollectionSeed) -> Result<SeedOutcome, BootstrapError> {
        let check = self.seed_needed(&seed.name).await?;
        if !check.needed {
            debug!(
                database = %self.database(),
                collection = %seed.name,
                count = check.current_count,
                "seeding not needed for collection"
            );
            return Ok(SeedOutcome::Skipped {
                current_count: check.current_count,
            });
        }
        debug!(database = %self.database(), collection = %seed.name, "seeding data for collection");

        // Markers are resolved before anything is deleted so a bad script
        // leaves existing data in place.
        let documents = seed
            .documents
            .iter()
            .cloned()
            .map(|d| preprocess_document(d, &self.toolset))
            .collect::<Result<Vec<_>, _>>()?;

        let coll = self.db.collection(&seed.name);
        let cleared = check.current_count > 0;
        if cleared {
            coll.delete_many(&Filter::All)
                .await
                .map_err(|e| self.seed_error(&seed.name, e))?;
        }
        let inserted = if documents.is_empty() {
            0
        } else {
            coll.insert_many(documents)
                .await
                .map_err(|e| self.seed_error(&seed.name, e))?
        };
        debug!(
            database = %self.database(),
            collection = %seed.name,
            inserted,
            "document(s) inserted in collection"
        );
        Ok(SeedOutcome::Seeded { inserted, cleared })
    }
}

/// Runs every seed spec. Databases seed in parallel, collections of one
/// database one after the other.
pub async fn seed_all(
    connections: &ConnectionRegistry,
    specs: &[SeedSpec],
    force: &ForceFlag,
    toolset: Arc<SeedingToolset>,
) -> Vec<SeedReport> {
    let mut by_database: BTreeMap<&str, Vec<&SeedSpec>> = BTreeMap::new();
    for spec in specs {
        by_database.entry(spec.database.as_str()).or_default().push(spec);
    }

    let runs = by_database.into_iter().map(|(database, specs)| {
        let db = connections.get(database);
        let toolset = toolset.clone();
        async move {
            let mut reports = Vec::new();
            for spec in specs {
                let Some(db) = db.clone() else {
                    warn!(database = %database, "seed spec targets a database that is not connected");
                    reports.push(SeedReport {
                        database: database.to_string(),
                        collections: spec
                            .collections
                            .iter()
                            .map(|c| CollectionOutcome {
                                collection: c.name.clone(),
                                outcome: SeedOutcome::Failed("database is not connected".into()),
                            })
                            .collect(),
                    });
                    continue;
                };
                let seeder = Seeder::new(db, spec.clone(), force.clone(), toolset.clone());
                reports.push(seeder.seed().await);
            }
            reports
        }
    });

    let reports: Vec<SeedReport> = join_all(runs).await.into_iter().flatten().collect();
    let seeded: usize = reports
        .iter()
        .flat_map(|r| &r.collections)
        .filter(|c| matches!(c.outcome, SeedOutcome::Seeded { .. }))
        .count();
    info!(collections = seeded, "seeding complete");
    reports
}
