use crate::{
    container::Container,
    errors::Error,
    factories::Factory,
    registry::DEFAULT_STACK_LIMIT,
    types::Service,
};

/// Collects factories and container options
///
/// ```rust,ignore
/// let container = ContainerBuilder::new()
///     .add_service(AppConfig::default())
///     .add_factory(Factory::new(|config: Arc<AppConfig>| Server::new(&config)))
///     .build()?;
/// container.start()?;
/// ```
pub struct ContainerBuilder {
    /// Registered factories, in declaration order
    factories: Vec<Factory>,
    stack_limit: usize,
    validate_on_start: bool,
}
impl Default for ContainerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerBuilder {
    pub fn new() -> Self {
        ContainerBuilder {
            factories: Vec::new(),
            stack_limit: DEFAULT_STACK_LIMIT,
            validate_on_start: true,
        }
    }

    pub fn add_factory(mut self, factory: Factory) -> Self {
        self.factories.push(factory);
        self
    }

    pub fn add_factories(mut self, factories: impl IntoIterator<Item = Factory>) -> Self {
        self.factories.extend(factories);
        self
    }

    /// Registers an already created value
    pub fn add_service<T: Service>(self, service: T) -> Self {
        self.add_factory(Factory::service(service))
    }

    /// Maximum depth of nested factory spawns before resolution fails
    pub fn stack_limit(mut self, stack_limit: usize) -> Self {
        self.stack_limit = stack_limit;
        self
    }

    /// Whether `start` validates the dependency graph before spawning, enabled by default
    pub fn validate_on_start(mut self, validate: bool) -> Self {
        self.validate_on_start = validate;
        self
    }

    /// Registers all factories, failing if any of them is invalid
    pub fn build(self) -> Result<Container, Error> {
        Container::build(self.factories, self.stack_limit, self.validate_on_start)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::errors::ErrorKind;

    #[test]
    fn default_matches_new() {
        let builder = ContainerBuilder::default();
        assert!(builder.factories.is_empty());
        assert_eq!(builder.stack_limit, DEFAULT_STACK_LIMIT);
        assert!(builder.validate_on_start);
    }

    #[test]
    fn options_reach_the_container() {
        let container = ContainerBuilder::new()
            .add_service(3_u8)
            .add_factories([
                Factory::new(|| 'x'),
                Factory::new(|letter: Arc<char>| letter.to_string()),
            ])
            .add_factory(Factory::new(|_: Arc<bool>| 1_u16))
            .validate_on_start(false)
            .stack_limit(0)
            .build()
            .unwrap();

        assert_eq!(*container.resolve::<Arc<u8>>().unwrap(), 3);
        assert!(container
            .resolve::<Arc<String>>()
            .unwrap_err()
            .is(ErrorKind::StackLimitReached));
        // Not validated, the missing dependency of u16 only shows up while spawning
        let error = container.start().unwrap_err();
        assert!(error.is(ErrorKind::ServiceNotResolved));
        assert!(!error.is(ErrorKind::ServiceDuplicated));
    }
}
