use crate::error::{ErrorKind, Result};
use imgstore_storage::BackendHandle;
use std::collections::BTreeMap;

/// Driver name → backend map, built once from an explicit list.
///
/// Lookups never touch storage: an unknown name fails straight away.
#[derive(Clone, Default)]
pub struct Registry {
    drivers: BTreeMap<String, BackendHandle>,
}

impl Registry {
    pub fn new(drivers: impl IntoIterator<Item = BackendHandle>) -> Result<Self> {
        let mut registry = Self::default();
        for driver in drivers {
            registry.insert(driver)?;
        }
        Ok(registry)
    }

    pub fn insert(&mut self, driver: BackendHandle) -> Result<()> {
        let name = driver.name().to_string();
        if self.drivers.contains_key(&name) {
            exn::bail!(ErrorKind::DuplicateDriver(name));
        }
        tracing::debug!(driver = %name, "Registered storage driver");
        self.drivers.insert(name, driver);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&BackendHandle> {
        match self.drivers.get(name) {
            Some(driver) => Ok(driver),
            None => exn::bail!(ErrorKind::UnknownDriver(name.to_string())),
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.drivers.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use imgstore_storage::backend::MockBackend;
    use std::sync::Arc;

    #[test]
    fn test_lookup_by_name() {
        let registry = Registry::new([
            Arc::new(MockBackend::default().with_name("a")) as BackendHandle,
            Arc::new(MockBackend::default().with_name("b")) as BackendHandle,
        ])
        .unwrap();
        assert_eq!(registry.get("b").unwrap().name(), "b");
        assert_eq!(registry.names().collect::<Vec<_>>(), ["a", "b"]);
        let Err(err) = registry.get("c") else {
            panic!("`c` was never registered");
        };
        assert!(matches!(&*err, ErrorKind::UnknownDriver(name) if name == "c"));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let err = Registry::new([
            Arc::new(MockBackend::default()) as BackendHandle,
            Arc::new(MockBackend::default()) as BackendHandle,
        ])
        .unwrap_err();
        assert!(matches!(&*err, ErrorKind::DuplicateDriver(_)));
    }
}
