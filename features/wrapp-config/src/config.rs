use std::{ops::Deref, sync::Arc};

use wrapp_container::{Dependency, Error, Inject, Scope, TypeInfo};

use crate::provider::ConfigProvider;

/// A wrapper type to allow for config injections
///
/// This provides a simple way to retrieve configs from the [`ConfigProvider`],
/// and inject them on a factory as a dependency
///
/// # Example
/// ```rust,ignore
/// #[derive(Clone)]
/// pub struct MyModuleConfig {
///     enabled: bool,
/// }
///
/// let provider = ConfigProvider::new().with_config(MyModuleConfig { enabled: true })?;
/// let container = Container::new([
///     Factory::service(provider),
///     Factory::new(|config: Config<MyModuleConfig>| MyModule::new(config.enabled)),
/// ])?;
/// ```
pub struct Config<T> {
    inner: Arc<T>,
}
impl<T> Clone for Config<T> {
    fn clone(&self) -> Self {
        Config {
            inner: self.inner.clone(),
        }
    }
}
impl<T: std::fmt::Debug> std::fmt::Debug for Config<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Config").field(&self.inner).finish()
    }
}
impl<T> Deref for Config<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}
impl<T> Config<T> {
    pub fn inner(&self) -> Arc<T> {
        self.inner.clone()
    }

    pub fn into_inner(self) -> Arc<T> {
        self.inner
    }
}

impl<T: Send + Sync + 'static> Inject for Config<T> {
    /// Validation only knows about the provider, individual configs are checked on injection
    fn dependency() -> Dependency {
        Dependency::required::<ConfigProvider>()
    }

    fn inject(scope: &Scope<'_>) -> Result<Self, Error> {
        let provider = scope.resolve::<Arc<ConfigProvider>>()?;
        let inner = provider.get_config::<T>().ok_or_else(|| {
            tracing::warn!("Config {} is not registered", TypeInfo::of::<T>());
            Error::ServiceNotResolved(TypeInfo::of::<T>())
        })?;

        Ok(Config { inner })
    }
}

#[cfg(test)]
mod tests {
    use wrapp_container::{Container, ErrorKind, Factory};

    use super::*;

    #[derive(Debug)]
    struct Server {
        host: String,
        port: u16,
    }

    fn provider() -> ConfigProvider {
        ConfigProvider::new()
            .with_config(Server {
                host: "localhost".to_string(),
                port: 8080,
            })
            .unwrap()
    }

    #[test]
    fn factories_receive_configs() {
        let container = Container::new([
            Factory::service(provider()),
            Factory::new(|server: Config<Server>| format!("{}:{}", server.host, server.port)),
        ])
        .unwrap();
        container.start().unwrap();

        assert_eq!(*container.resolve::<Arc<String>>().unwrap(), "localhost:8080");
        let config = container.resolve::<Config<Server>>().unwrap();
        assert_eq!(config.into_inner().port, 8080);
    }

    #[test]
    fn missing_config_is_not_resolved() {
        let container = Container::new([
            Factory::service(ConfigProvider::new()),
            Factory::new(|server: Config<Server>| server.port),
        ])
        .unwrap();

        let error = container.start().unwrap_err();

        assert!(error.is(ErrorKind::ServiceNotResolved));
        assert!(error.to_string().contains("Server"));
    }

    #[test]
    fn missing_provider_fails_validation() {
        let container = Container::new([Factory::new(|server: Config<Server>| server.port)]).unwrap();

        let error = container.validate().unwrap_err();
        assert!(error.to_string().contains("ConfigProvider"));
    }
}
