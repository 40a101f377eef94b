use std::{
    any::{Any, TypeId},
    collections::HashMap,
    sync::Arc,
};

use wrapp_container::{Service, TypeInfo};

use crate::errors::ConfigError;

/// A provider to register all configs.
///
/// Configs can be registered and retrieved based on type. Register the provider
/// with `Factory::service` to make its configs injectable through [`crate::Config`].
#[derive(Clone, Default)]
pub struct ConfigProvider {
    configs: HashMap<TypeId, (TypeInfo, Arc<dyn Any + Send + Sync>)>,
}
impl Service for ConfigProvider {}
impl std::fmt::Debug for ConfigProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set()
            .entries(self.configs.values().map(|(info, _)| info.type_name))
            .finish()
    }
}

impl ConfigProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Retrieve a config with specified type, `None` if it was never added
    pub fn get_config<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        let (_, config) = self.configs.get(&TypeId::of::<T>())?;
        config.clone().downcast::<T>().ok()
    }

    /// Same as [`ConfigProvider::get_config`], failing with [`ConfigError::Missing`]
    pub fn require_config<T: Send + Sync + 'static>(&self) -> Result<Arc<T>, ConfigError> {
        self.get_config()
            .ok_or_else(|| ConfigError::Missing(TypeInfo::of::<T>()))
    }

    /// Add a config to the registry.
    ///
    /// If the config type is already registered, it will return [`ConfigError::AlreadyRegistered`]
    pub fn add_config<T: Send + Sync + 'static>(
        &mut self,
        config: T,
    ) -> Result<&mut Self, ConfigError> {
        let info = TypeInfo::of::<T>();
        if self.configs.contains_key(&info.type_id) {
            return Err(ConfigError::AlreadyRegistered(info));
        }

        tracing::debug!("Registered config {}", info);
        self.configs.insert(info.type_id, (info, Arc::new(config)));
        Ok(self)
    }

    /// Consuming version of [`ConfigProvider::add_config`], for building a provider in one expression
    pub fn with_config<T: Send + Sync + 'static>(mut self, config: T) -> Result<Self, ConfigError> {
        self.add_config(config)?;
        Ok(self)
    }

    /// Can optionally add a config to the registry.
    ///
    /// If the config provided is `Some(T)`, it will be the same as calling [`ConfigProvider::add_config`]
    /// If the config provided is `None`, then the function just returns `Ok(self)` for chaining
    pub fn maybe_add_config<T: Send + Sync + 'static>(
        &mut self,
        config: Option<T>,
    ) -> Result<&mut Self, ConfigError> {
        match config {
            Some(c) => self.add_config(c),
            None => Ok(self),
        }
    }

    pub fn len(&self) -> usize {
        self.configs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[derive(Debug, PartialEq)]
    struct Database {
        url: String,
    }

    #[test]
    fn configs_are_retrieved_by_type() {
        let mut provider = ConfigProvider::new();
        provider
            .add_config(Database {
                url: "postgres://localhost".to_string(),
            })
            .unwrap()
            .add_config(8080_u16)
            .unwrap();

        assert_eq!(provider.len(), 2);
        assert_eq!(provider.get_config::<Database>().unwrap().url, "postgres://localhost");
        assert_eq!(*provider.get_config::<u16>().unwrap(), 8080);
        assert!(provider.get_config::<u32>().is_none());
    }

    #[test]
    fn registering_twice_fails() {
        let mut provider = ConfigProvider::new().with_config(1_u8).unwrap();

        let error = provider.add_config(2_u8).unwrap_err();

        assert_eq!(error, ConfigError::AlreadyRegistered(TypeInfo::of::<u8>()));
        assert_eq!(*provider.get_config::<u8>().unwrap(), 1);
    }

    #[rstest]
    #[case::some(Some(5_u8), 1)]
    #[case::none(None, 0)]
    fn maybe_add_config(#[case] config: Option<u8>, #[case] expected: usize) {
        let mut provider = ConfigProvider::new();
        provider.maybe_add_config(config).unwrap();

        assert_eq!(provider.len(), expected);
        assert_eq!(provider.is_empty(), expected == 0);
    }

    #[test]
    fn require_config_reports_missing_type() {
        let provider = ConfigProvider::new();
        let error = provider.require_config::<Database>().unwrap_err();
        assert!(error.to_string().contains("Database"));
    }
}
