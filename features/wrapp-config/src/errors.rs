use wrapp_container::TypeInfo;

/// Errors when registering or requiring a config
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A config of the same type was registered before
    #[error("config '{0}' is already registered")]
    AlreadyRegistered(TypeInfo),

    #[error("config '{0}' is not registered")]
    Missing(TypeInfo),
}
