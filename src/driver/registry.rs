//! Mounted-driver registry: the host's name-to-driver table.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::info;

use crate::error::{FsError, FsResult};

use super::FilesystemDriver;

/// Tracks mounted drivers by mount name. Registration hands back a token
/// whose `withdraw` removes the entry; dropping the token without
/// withdrawing leaves the driver registered, matching a mount that
/// outlives the code that created it.
#[derive(Default)]
pub struct DriverRegistry {
    inner: Mutex<HashMap<String, Arc<dyn FilesystemDriver>>>,
}

/// Token returned by `register`; names the entry it can withdraw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    name: String,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a mounted driver under `name`. A name can be held by at
    /// most one driver at a time.
    pub fn register(
        &self,
        name: &str,
        driver: Arc<dyn FilesystemDriver>,
    ) -> FsResult<Registration> {
        if name.is_empty() {
            return Err(FsError::InvalidArgument("empty mount name"));
        }
        let mut table = self.inner.lock().unwrap();
        if table.contains_key(name) {
            return Err(FsError::AlreadyExists);
        }
        info!("registering {} mount {name:?}", driver.fs_type());
        table.insert(name.to_string(), driver);
        Ok(Registration {
            name: name.to_string(),
        })
    }

    /// Remove the registration. Withdrawing twice is an error.
    pub fn withdraw(&self, registration: Registration) -> FsResult<()> {
        let mut table = self.inner.lock().unwrap();
        match table.remove(&registration.name) {
            Some(driver) => {
                info!("withdrew {} mount {:?}", driver.fs_type(), registration.name);
                Ok(())
            }
            None => Err(FsError::NotFound),
        }
    }

    /// Look up a registered driver by mount name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn FilesystemDriver>> {
        self.inner.lock().unwrap().get(name).cloned()
    }

    /// Mount names currently registered, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::FerroFs;
    use crate::mount::MountOptions;
    use crate::store::mem::MemBlockDevice;

    fn mounted() -> Arc<dyn FilesystemDriver> {
        FerroFs::mount(MemBlockDevice::new(4), MountOptions::default()).unwrap()
    }

    #[tokio::test]
    async fn register_lookup_withdraw() {
        let registry = DriverRegistry::new();
        let token = registry.register("data", mounted()).unwrap();
        assert!(registry.get("data").is_some());
        assert_eq!(registry.names(), vec!["data"]);

        registry.withdraw(token.clone()).unwrap();
        assert!(registry.get("data").is_none());
        assert!(matches!(registry.withdraw(token), Err(FsError::NotFound)));
    }

    #[tokio::test]
    async fn duplicate_name_rejected() {
        let registry = DriverRegistry::new();
        let _token = registry.register("data", mounted()).unwrap();
        assert!(matches!(
            registry.register("data", mounted()),
            Err(FsError::AlreadyExists)
        ));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn name_reusable_after_withdraw() {
        let registry = DriverRegistry::new();
        let token = registry.register("scratch", mounted()).unwrap();
        registry.withdraw(token).unwrap();
        registry.register("scratch", mounted()).unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn empty_name_rejected() {
        let registry = DriverRegistry::new();
        assert!(registry.is_empty());
        assert!(matches!(
            registry.register(
                "",
                FerroFs::mount(MemBlockDevice::new(1), MountOptions::default()).unwrap()
                    as Arc<dyn FilesystemDriver>
            ),
            Err(FsError::InvalidArgument(_))
        ));
    }
}
