use std::collections::BTreeMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use crate::bigquery::BigQueryDriver;
use crate::bail;
use crate::driver::{Connection, Connector, Driver};
use crate::error::{ErrorKind, WarehouseResult};
use crate::warehouse_error;

/// Maps connection string schemes to drivers.
///
/// The registry is an ordinary value owned by the caller, so independent registries can coexist
/// in the same process.
#[derive(Debug, Default, Clone)]
pub struct DriverRegistry {
    drivers: BTreeMap<&'static str, Arc<dyn Driver>>,
}

impl DriverRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with every driver shipped by this crate.
    pub fn with_default_drivers() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(BigQueryDriver));

        registry
    }

    /// Registers `driver` under its scheme, returning the driver it replaced.
    pub fn register(&mut self, driver: Arc<dyn Driver>) -> Option<Arc<dyn Driver>> {
        let scheme = driver.scheme();
        debug!(scheme, "registering warehouse driver");

        self.drivers.insert(scheme, driver)
    }

    pub fn get(&self, scheme: &str) -> Option<Arc<dyn Driver>> {
        self.drivers.get(scheme).cloned()
    }

    /// Registered schemes in lexical order.
    pub fn schemes(&self) -> Vec<&'static str> {
        self.drivers.keys().copied().collect()
    }

    /// Opens a connector for `uri` using the driver registered for its scheme.
    pub fn open_connector(&self, uri: &str) -> WarehouseResult<Box<dyn Connector>> {
        let scheme = match Url::parse(uri) {
            Ok(url) => url.scheme().to_string(),
            Err(err) => {
                return Err(warehouse_error!(
                    ErrorKind::ConfigError,
                    "Invalid connection string",
                    format!("`{uri}` is not an absolute uri"),
                    source: err
                ));
            }
        };

        let Some(driver) = self.get(&scheme) else {
            bail!(
                ErrorKind::DriverNotFound,
                "No driver registered for scheme",
                format!(
                    "scheme `{scheme}` is not registered, known schemes: {}",
                    self.schemes().join(", ")
                )
            );
        };

        driver.open_connector(uri)
    }

    /// Opens a connector for `uri` and connects with it.
    pub async fn connect(
        &self,
        uri: &str,
        cancel: &CancellationToken,
    ) -> WarehouseResult<Box<dyn Connection>> {
        let connector = self.open_connector(uri)?;

        connector.connect(cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct NamedDriver(&'static str);

    impl Driver for NamedDriver {
        fn scheme(&self) -> &'static str {
            self.0
        }

        fn open_connector(&self, _uri: &str) -> WarehouseResult<Box<dyn Connector>> {
            Err(warehouse_error!(ErrorKind::NotSupported, "Test driver"))
        }
    }

    #[test]
    fn test_default_drivers_include_bigquery() {
        let registry = DriverRegistry::with_default_drivers();

        assert_eq!(registry.schemes(), vec!["bigquery"]);
        assert!(registry.get("bigquery").is_some());
    }

    #[test]
    fn test_register_returns_replaced_driver() {
        let mut registry = DriverRegistry::new();

        assert!(registry.register(Arc::new(NamedDriver("snowflake"))).is_none());
        let replaced = registry.register(Arc::new(NamedDriver("snowflake")));

        assert_eq!(replaced.map(|driver| driver.scheme()), Some("snowflake"));
        assert_eq!(registry.schemes(), vec!["snowflake"]);
    }

    #[test]
    fn test_unknown_scheme_is_driver_not_found() {
        let registry = DriverRegistry::with_default_drivers();

        let err = registry.open_connector("redshift://cluster").err().unwrap();

        assert_eq!(err.kind(), ErrorKind::DriverNotFound);
    }

    #[test]
    fn test_uri_without_scheme_is_config_error() {
        let registry = DriverRegistry::with_default_drivers();

        let err = registry.open_connector("my-project").err().unwrap();

        assert_eq!(err.kind(), ErrorKind::ConfigError);
    }

    #[test]
    fn test_registries_are_independent() {
        let mut first = DriverRegistry::new();
        let second = DriverRegistry::new();

        first.register(Arc::new(NamedDriver("databricks")));

        assert!(first.get("databricks").is_some());
        assert!(second.get("databricks").is_none());
    }
}
