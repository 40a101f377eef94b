//! Wrapp Config provides a registry of configs that can be injected into factories.
//!
//! Wrapp Config is split into two major parts:
//! 1. ConfigProvider: holds every config value, keyed by type
//! 2. Config<T>: factory parameter resolving a single config from the provider
//!
//! # Examples
//!
//! ```rust,ignore
//! #[derive(Clone)]
//! struct AppConfig {
//!     host: String,
//!     port: u16,
//! }
//!
//! let provider = ConfigProvider::new().with_config(AppConfig {
//!     host: "localhost".to_string(),
//!     port: 8080,
//! })?;
//!
//! let container = Container::new([
//!     Factory::service(provider),
//!     Factory::new(|config: Config<AppConfig>| format!("{}:{}", config.host, config.port)),
//! ])?;
//! container.start()?;
//! ```

pub mod config;
pub mod errors;
pub mod provider;

pub use config::Config;
pub use errors::ConfigError;
pub use provider::ConfigProvider;
