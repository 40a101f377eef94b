//! Wrapp Container is a dependency injection container for long lived services.
//!
//! Factories declare their dependencies as parameters and their services as return values.
//! The container validates the resulting graph, spawns every factory at most once in
//! dependency order and closes the services in reverse order.
//!
//! ```rust,ignore
//! let container = Container::new([
//!     Factory::new(|| 42_i32),
//!     Factory::new(|| Ok::<_, std::io::Error>(true)),
//!     Factory::new(|number: Arc<i32>, flag: Arc<bool>| format!("{number}-{flag}")),
//! ])?;
//!
//! container.start()?;
//! assert_eq!(*container.resolve::<Arc<String>>()?, "42-true");
//! container.close()?;
//! ```
//!
//! Wrapp Container consists of the following components:
//!
//! 1. Factories - describe what a function needs and what it produces
//! 2. Registry - spawns factories on demand and closes them again
//! 3. Resolver and Invoker - resolve services for code outside of factories
//! 4. Events - lifecycle notifications
//! 5. Container - ties everything together

pub mod builder;
pub mod container;
pub mod dependency_graph;
pub mod errors;
pub mod events;
pub mod factories;
pub mod invoker;
pub mod lifetime;
mod registry;
pub mod resolver;
pub mod service_fn;
pub mod types;

pub use builder::ContainerBuilder;
pub use container::Container;
pub use errors::{Error, ErrorKind, Errors};
pub use events::{Event, EventArgs, Events};
pub use factories::{Factory, FactoryMetadata};
pub use invoker::{InvokeResult, Invoker};
pub use lifetime::Lifetime;
pub use registry::{Resolved, DEFAULT_STACK_LIMIT};
pub use resolver::{Inject, Multiple, Optional, Resolver, Scope};
pub use service_fn::{ServiceFn, ServiceHandle};
pub use types::{Dependency, DependencyKind, DynError, Instance, Service, TypeInfo};
