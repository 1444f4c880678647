//! Registry binding service names to driver instances.
//!
//! The registry is built once at startup and never changes afterwards, so
//! lookups take `&self` and need no locking. Services keep the order in
//! which they were configured; aggregate replies follow that order.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::config::{ServiceConfig, StevedoreConfig};
use crate::driver::{DriverDeps, DriverRegistry, StorageDriver};
use crate::error::{Result, StorageError};
use crate::types::{DriverInfo, InstanceId, ServiceInfo};

/// One configured service and its driver instance.
pub struct Service {
    config: ServiceConfig,
    driver: Arc<dyn StorageDriver>,
    instance_id: OnceCell<InstanceId>,
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("name", &self.config.name)
            .field("driver", &self.driver.name())
            .finish_non_exhaustive()
    }
}

impl Service {
    /// Binds `config` to an already constructed driver.
    #[must_use]
    pub fn new(config: ServiceConfig, driver: Arc<dyn StorageDriver>) -> Self {
        Self {
            config,
            driver,
            instance_id: OnceCell::new(),
        }
    }

    /// Service name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Options the service was configured with.
    #[must_use]
    pub const fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// The service's driver.
    #[must_use]
    pub fn driver(&self) -> &dyn StorageDriver {
        self.driver.as_ref()
    }

    /// This process's instance ID for the service's driver, computed once.
    ///
    /// # Errors
    ///
    /// Returns whatever the driver raises. Failures are not cached.
    pub async fn instance_id(&self) -> Result<InstanceId> {
        self.instance_id
            .get_or_try_init(|| self.driver.instance_id())
            .await
            .cloned()
    }
}

/// Ordered, read-only set of services.
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    services: Vec<Service>,
    index: BTreeMap<String, usize>,
}

impl ServiceRegistry {
    /// Builds every service with the driver its configuration names.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Config`] when no services are configured, a
    /// name repeats, or a driver cannot be constructed.
    pub fn build(configs: Vec<ServiceConfig>, drivers: &DriverRegistry, deps: &DriverDeps) -> Result<Self> {
        if configs.is_empty() {
            return Err(StorageError::Config(String::from("no services configured")));
        }
        let mut registry = Self::default();
        for config in configs {
            let driver = drivers.create_driver(&config, deps)?;
            registry.insert(Service::new(config, driver))?;
        }
        info!(services = ?registry.names(), "service registry ready");
        Ok(registry)
    }

    /// Loads service declarations from process configuration and builds
    /// them with real process runners.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Config`] for unreadable or invalid services.
    pub fn from_config(config: &StevedoreConfig, drivers: &DriverRegistry) -> Result<Self> {
        let services = config.service_configs()?;
        Self::build(services, drivers, &DriverDeps::from_config(config))
    }

    /// Adds a service with a prebuilt driver.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Config`] when the name is already taken.
    pub fn insert(&mut self, service: Service) -> Result<()> {
        if self.index.contains_key(service.name()) {
            return Err(StorageError::Config(format!(
                "service {} is declared twice",
                service.name()
            )));
        }
        debug!(service = service.name(), driver = service.driver().name(), "service registered");
        self.index.insert(service.name().to_owned(), self.services.len());
        self.services.push(service);
        Ok(())
    }

    /// Looks a service up by name.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] for unknown names.
    pub fn get(&self, name: &str) -> Result<&Service> {
        self.index
            .get(name)
            .and_then(|position| self.services.get(*position))
            .ok_or_else(|| StorageError::not_found("service", name))
    }

    /// Services in configuration order.
    pub fn iter(&self) -> impl Iterator<Item = &Service> {
        self.services.iter()
    }

    /// Service names in configuration order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.services.iter().map(Service::name).collect()
    }

    /// Number of services.
    #[must_use]
    pub fn len(&self) -> usize {
        self.services.len()
    }

    /// Whether no service is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Number of services backed by `driver`.
    #[must_use]
    pub fn driver_services(&self, driver: &str) -> usize {
        self.services
            .iter()
            .filter(|service| service.driver().name() == driver)
            .count()
    }

    /// Describes one service.
    #[must_use]
    pub fn describe(&self, service: &Service) -> ServiceInfo {
        let driver = service.driver();
        ServiceInfo {
            name: service.name().to_owned(),
            driver: DriverInfo {
                name: driver.name().to_owned(),
                next_device: driver.next_device_info(),
                executor_ops: driver.executor_ops(),
                services: self.driver_services(driver.name()),
            },
        }
    }

    /// Describes every service in configuration order.
    #[must_use]
    pub fn services(&self) -> Vec<ServiceInfo> {
        self.services.iter().map(|service| self.describe(service)).collect()
    }

    /// Describes the service called `name`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] for unknown names.
    pub fn inspect(&self, name: &str) -> Result<ServiceInfo> {
        self.get(name).map(|service| self.describe(service))
    }
}
