pub mod bootstrap;
pub mod config;
pub mod connection;
pub mod document;
pub mod driver;
pub mod error;
pub mod fixtures;
pub mod index;
pub mod schema;
pub mod seed;
pub mod testing;
pub mod unique;

pub use bootstrap::{Bootstrap, Services};
pub use config::{BootstrapConfig, ConfigSource, DatabaseDescriptor, ValueSource};
pub use connection::ConnectionRegistry;
pub use document::{Document, Filter, doc};
pub use driver::{Collection, Database, Driver, DriverError};
pub use error::{BootstrapError, ErrorCode, Phase};
pub use fixtures::{
    FixtureDefinition, FixtureLoader, FixtureReport, FixtureSpec, LoadOptions, LoaderRegistry,
    LoaderSpec,
};
pub use index::{IndexLedger, IndexReport, IndexState};
pub use schema::{Schema, SchemaRegistry, ValidateOptions};
pub use seed::{ForceFlag, SeedForce, SeedReport, SeedSpec, Seeder, SeedingToolset};
pub use testing::{RefSpec, TestMode};
pub use unique::{UniqueOptions, UniquenessGuard};
