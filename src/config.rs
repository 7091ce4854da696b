use crate::driver::ConnectOptions;
use crate::error::BootstrapError;
use crate::seed::ForceFlag;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_FIXTURES_PATH: &str = "./test/fixtures";
pub const DEFAULT_FIXTURE_CONCURRENCY: usize = 4;
/// Name given to the connection built from a bare `MONGODB_URI`.
pub const MAIN_DATABASE: &str = "MAIN";

pub const DATABASES_PATH: &str = "plugins:mongodb:databases";
pub const TEST_MODE_PATH: &str = "plugins:mongodb:test_mode";
pub const FORCE_PATH: &str = "plugins:mongodb:seeding:force";
pub const FIXTURES_PATH: &str = "plugins:mongodb:fixtures";
pub const PHASE_TIMEOUT_PATH: &str = "plugins:mongodb:phase_timeout_ms";
pub const FIXTURE_CONCURRENCY_PATH: &str = "plugins:mongodb:fixture_concurrency";
pub const MONGODB_URI_PATH: &str = "MONGODB_URI";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseDescriptor {
    pub name: String,
    pub uri: String,
    #[serde(default)]
    pub options: ConnectOptions,
}

impl DatabaseDescriptor {
    pub fn new(name: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uri: uri.into(),
            options: ConnectOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ConnectOptions) -> Self {
        self.options = options;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SeedingConfig {
    pub force: ForceFlag,
}

/// Startup configuration, resolved once before the bootstrap sequence runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    pub databases: Vec<DatabaseDescriptor>,
    pub test_mode: bool,
    pub seeding: SeedingConfig,
    pub fixtures: PathBuf,
    /// Deadline for each bootstrap phase; `None` leaves timeouts to the driver.
    pub phase_timeout_ms: Option<u64>,
    pub fixture_concurrency: usize,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            databases: Vec::new(),
            test_mode: false,
            seeding: SeedingConfig::default(),
            fixtures: PathBuf::from(DEFAULT_FIXTURES_PATH),
            phase_timeout_ms: None,
            fixture_concurrency: DEFAULT_FIXTURE_CONCURRENCY,
        }
    }
}

impl BootstrapConfig {
    pub fn production(databases: Vec<DatabaseDescriptor>) -> Self {
        Self {
            databases,
            test_mode: false,
            phase_timeout_ms: Some(30_000),
            ..Self::default()
        }
    }

    pub fn test(databases: Vec<DatabaseDescriptor>, fixtures: impl Into<PathBuf>) -> Self {
        Self {
            databases,
            test_mode: true,
            fixtures: fixtures.into(),
            ..Self::default()
        }
    }

    pub fn with_force(mut self, force: ForceFlag) -> Self {
        self.seeding.force = force;
        self
    }

    pub fn with_phase_timeout(mut self, timeout: Duration) -> Self {
        self.phase_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn phase_timeout(&self) -> Option<Duration> {
        self.phase_timeout_ms.map(Duration::from_millis)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, BootstrapError> {
        let config: Self = toml::from_str(text).map_err(|e| BootstrapError::Parse {
            source_name: "bootstrap config".into(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, BootstrapError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text).map_err(|err| match err {
            BootstrapError::Parse { message, .. } => BootstrapError::Parse {
                source_name: path.display().to_string(),
                message,
            },
            other => other,
        })
    }

    /// Reads the recognized paths from a host configuration source. A bare
    /// `MONGODB_URI` stands in for the database list when none is declared.
    pub fn from_source(source: &dyn ConfigSource) -> Result<Self, BootstrapError> {
        let defaults = Self::default();
        let mut databases: Vec<DatabaseDescriptor> =
            typed(source, DATABASES_PATH)?.unwrap_or_default();
        if databases.is_empty()
            && let Some(uri) = typed::<String>(source, MONGODB_URI_PATH)?
        {
            databases.push(DatabaseDescriptor::new(MAIN_DATABASE, uri));
        }
        let config = Self {
            databases,
            test_mode: typed(source, TEST_MODE_PATH)?.unwrap_or(defaults.test_mode),
            seeding: SeedingConfig {
                force: typed(source, FORCE_PATH)?.unwrap_or_default(),
            },
            fixtures: typed(source, FIXTURES_PATH)?.unwrap_or(defaults.fixtures),
            phase_timeout_ms: typed(source, PHASE_TIMEOUT_PATH)?,
            fixture_concurrency: typed(source, FIXTURE_CONCURRENCY_PATH)?
                .unwrap_or(defaults.fixture_concurrency),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), BootstrapError> {
        let mut names = BTreeSet::new();
        for db in &self.databases {
            if db.name.trim().is_empty() {
                return Err(BootstrapError::config("database name must not be empty"));
            }
            if db.uri.trim().is_empty() {
                return Err(BootstrapError::config(format!(
                    "database '{}' has no uri",
                    db.name
                )));
            }
            if !names.insert(db.name.as_str()) {
                return Err(BootstrapError::config(format!(
                    "database '{}' is declared more than once",
                    db.name
                )));
            }
        }
        if self.fixture_concurrency == 0 {
            return Err(BootstrapError::config(
                "fixture_concurrency must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Read-only, path-addressed configuration provided by the host.
pub trait ConfigSource: Send + Sync {
    /// Looks up a colon-separated path such as `plugins:mongodb:fixtures`.
    fn get(&self, path: &str) -> Option<Value>;

    fn get_or(&self, path: &str, default: Value) -> Value {
        self.get(path).unwrap_or(default)
    }
}

fn typed<T: DeserializeOwned>(
    source: &dyn ConfigSource,
    path: &str,
) -> Result<Option<T>, BootstrapError> {
    match source.get(path) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|e| BootstrapError::Parse {
                source_name: path.to_string(),
                message: e.to_string(),
            }),
    }
}

/// Configuration tree held in memory, loaded from TOML or JSON.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValueSource {
    root: Value,
}

impl ValueSource {
    pub fn from_json(root: Value) -> Self {
        Self { root }
    }

    pub fn from_toml_str(text: &str) -> Result<Self, BootstrapError> {
        let parsed: toml::Value = toml::from_str(text).map_err(|e| BootstrapError::Parse {
            source_name: "toml source".into(),
            message: e.to_string(),
        })?;
        let root = serde_json::to_value(parsed).map_err(|e| BootstrapError::Parse {
            source_name: "toml source".into(),
            message: e.to_string(),
        })?;
        Ok(Self { root })
    }
}

impl ConfigSource for ValueSource {
    fn get(&self, path: &str) -> Option<Value> {
        let mut current = &self.root;
        for part in path.split(':').filter(|p| !p.is_empty()) {
            current = current.as_object()?.get(part)?;
        }
        Some(current.clone())
    }
}
