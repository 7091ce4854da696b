//! Startup sequence: connect, ensure indexes, then seed (production) or load
//! fixtures (test mode).

use crate::config::BootstrapConfig;
use crate::connection::ConnectionRegistry;
use crate::driver::Driver;
use crate::error::{BootstrapError, Phase};
use crate::fixtures::{FixtureReport, LoaderRegistry};
use crate::index::{IndexLedger, IndexReport};
use crate::schema::SchemaRegistry;
use crate::seed::{SeedReport, SeedSpec, SeedingToolset, seed_all};
use crate::testing::TestMode;
use crate::unique::UniquenessGuard;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

pub struct Bootstrap {
    driver: Arc<dyn Driver>,
    config: BootstrapConfig,
    schema_registry: Arc<SchemaRegistry>,
    index_ledger: Arc<IndexLedger>,
    seed_specs: Vec<SeedSpec>,
    toolset: Arc<SeedingToolset>,
}

/// Everything the host gets back from a successful bootstrap.
pub struct Services {
    pub connections: ConnectionRegistry,
    pub schema_registry: Arc<SchemaRegistry>,
    pub index_ledger: Arc<IndexLedger>,
    pub unique_guard: UniquenessGuard,
    /// Empty in test mode.
    pub seed_report: Vec<SeedReport>,
    pub index_reports: Vec<IndexReport>,
    /// Present in test mode only.
    pub test_mode: Option<TestMode>,
    pub fixture_reports: BTreeMap<String, FixtureReport>,
    pub loaders: Option<LoaderRegistry>,
}

impl Services {
    /// Closes fixture loaders, then every connection.
    pub async fn shutdown(self) {
        if let Some(loaders) = &self.loaders {
            loaders.close_all().await;
        }
        self.connections.close_all().await;
        info!("database services shut down");
    }
}

impl Bootstrap {
    pub fn new(driver: Arc<dyn Driver>, config: BootstrapConfig) -> Self {
        Self {
            driver,
            config,
            schema_registry: Arc::new(SchemaRegistry::new()),
            index_ledger: Arc::new(IndexLedger::new()),
            seed_specs: Vec::new(),
            toolset: Arc::new(SeedingToolset::default()),
        }
    }

    pub fn with_schema_registry(mut self, registry: Arc<SchemaRegistry>) -> Self {
        self.schema_registry = registry;
        self
    }

    pub fn with_index_ledger(mut self, ledger: Arc<IndexLedger>) -> Self {
        self.index_ledger = ledger;
        self
    }

    pub fn with_seed_specs(mut self, specs: Vec<SeedSpec>) -> Self {
        self.seed_specs = specs;
        self
    }

    pub fn with_toolset(mut self, toolset: SeedingToolset) -> Self {
        self.toolset = Arc::new(toolset);
        self
    }

    pub fn config(&self) -> &BootstrapConfig {
        &self.config
    }

    pub async fn initialize(self) -> Result<Services, BootstrapError> {
        self.config.validate()?;
        let deadline = self.config.phase_timeout();
        info!(
            databases = self.config.databases.len(),
            test_mode = self.config.test_mode,
            "bootstrapping databases"
        );

        let connections = within(
            deadline,
            Phase::Connect,
            ConnectionRegistry::connect_all(self.driver.as_ref(), &self.config.databases),
        )
        .await
        .inspect_err(|err| error!(error = %err, "unable to connect databases"))?;

        match self.after_connect(&connections, deadline).await {
            Ok(services) => Ok(services),
            Err(err) => {
                error!(error = %err, "bootstrap failed");
                connections.close_all().await;
                Err(err)
            }
        }
    }

    async fn after_connect(
        &self,
        connections: &ConnectionRegistry,
        deadline: Option<Duration>,
    ) -> Result<Services, BootstrapError> {
        self.index_ledger.attach(connections.clone());
        let index_reports = within(deadline, Phase::Index, async {
            Ok(self.index_ledger.ensure_all(connections).await)
        })
        .await?;

        let mut services = Services {
            connections: connections.clone(),
            schema_registry: self.schema_registry.clone(),
            index_ledger: self.index_ledger.clone(),
            unique_guard: UniquenessGuard::new(connections.clone()),
            seed_report: Vec::new(),
            index_reports,
            test_mode: None,
            fixture_reports: BTreeMap::new(),
            loaders: None,
        };

        if self.config.test_mode {
            info!("configuring databases in test mode");
            let loaders = LoaderRegistry::new(self.driver.clone())
                .with_concurrency(self.config.fixture_concurrency);
            let setup = within(
                deadline,
                Phase::Fixtures,
                TestMode::setup(connections.clone(), &self.config.fixtures, &loaders),
            )
            .await;
            let (test_mode, reports) = match setup {
                Ok(done) => done,
                Err(err) => {
                    loaders.close_all().await;
                    return Err(err);
                }
            };
            services.test_mode = Some(test_mode);
            services.fixture_reports = reports;
            services.loaders = Some(loaders);
        } else {
            services.seed_report = within(deadline, Phase::Seed, async {
                Ok(seed_all(
                    connections,
                    &self.seed_specs,
                    &self.config.seeding.force,
                    self.toolset.clone(),
                )
                .await)
            })
            .await?;
        }
        info!("databases ready");
        Ok(services)
    }
}

async fn within<F, T>(deadline: Option<Duration>, phase: Phase, fut: F) -> Result<T, BootstrapError>
where
    F: Future<Output = Result<T, BootstrapError>>,
{
    match deadline {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| BootstrapError::Timeout { phase })?,
        None => fut.await,
    }
}

#[cfg(test)]
mod tests {
    use super::{Bootstrap, within};
    use crate::config::{BootstrapConfig, DatabaseDescriptor};
    use crate::driver::memory::MemoryDriver;
    use crate::error::{BootstrapError, ErrorCode, Phase};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn slow_phase_times_out_with_its_name() {
        let err = within(Some(Duration::from_millis(50)), Phase::Seed, async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, BootstrapError>(())
        })
        .await
        .expect_err("timeout");
        assert_eq!(err.code(), ErrorCode::Timeout);
        assert_eq!(err.to_string(), "seed phase timed out");
    }

    #[tokio::test]
    async fn unreachable_database_is_fatal() {
        let driver = MemoryDriver::new();
        driver.set_unreachable("memory://down/app");
        let config = BootstrapConfig::production(vec![DatabaseDescriptor::new(
            "MAIN",
            "memory://down/app",
        )]);
        let err = Bootstrap::new(Arc::new(driver), config)
            .initialize()
            .await
            .err()
            .expect("fatal");
        assert!(err.code().is_fatal());
        assert_eq!(err.code(), ErrorCode::Connection);
    }
}
