use crate::config::MAIN_DATABASE;
use crate::connection::ConnectionRegistry;
use crate::document::{Document, Filter};
use crate::error::BootstrapError;
use tracing::debug;

pub const DEFAULT_CONFLICT_MESSAGE: &str = "provided value must be unique";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UniqueOptions {
    /// Conflict when any one field matches, instead of all of them.
    pub or: bool,
    pub msg: Option<String>,
}

impl UniqueOptions {
    pub fn any() -> Self {
        Self {
            or: true,
            msg: None,
        }
    }

    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.msg = Some(msg.into());
        self
    }
}

/// Pre-write check that no stored document already holds the given values.
///
/// The lookup and the caller's later insert are separate round trips, so two
/// concurrent writers can both pass. A unique index is the only hard
/// guarantee.
#[derive(Clone)]
pub struct UniquenessGuard {
    connections: ConnectionRegistry,
}

impl UniquenessGuard {
    pub fn new(connections: ConnectionRegistry) -> Self {
        Self { connections }
    }

    pub async fn check(
        &self,
        database: Option<&str>,
        collection: &str,
        fields: &Document,
        options: &UniqueOptions,
    ) -> Result<(), BootstrapError> {
        if fields.is_empty() {
            return Err(BootstrapError::config(
                "uniqueness check needs at least one field",
            ));
        }
        let database = database.unwrap_or(MAIN_DATABASE);
        let db = self.connections.get(database).ok_or_else(|| {
            BootstrapError::config(format!("database '{database}' is not connected"))
        })?;
        let filter = if options.or {
            Filter::any_of(fields)
        } else {
            Filter::all_of(fields)
        };
        let existing = db.collection(collection).find_one(&filter).await?;
        if existing.is_some() {
            debug!(database = %database, collection = %collection, "uniqueness conflict");
            return Err(BootstrapError::Conflict {
                fields: fields.clone(),
                message: options
                    .msg
                    .clone()
                    .unwrap_or_else(|| DEFAULT_CONFLICT_MESSAGE.to_string()),
            });
        }
        Ok(())
    }
}
