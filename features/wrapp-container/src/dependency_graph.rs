use std::collections::{HashSet, VecDeque};

use crate::{
    errors::{Error, Errors},
    factories::Factory,
    types::{Dependency, OutputInfo, TypeInfo},
};

/// Static view of all registered factories, used to validate them before spawning
pub struct DependencyGraph {
    nodes: Vec<GraphNode>,
}

/// Shape of a single factory
#[derive(Debug, Clone)]
pub struct GraphNode {
    pub name: String,
    pub origin: String,
    pub dependencies: Vec<Dependency>,
    pub outputs: Vec<OutputInfo>,
}
impl From<&Factory> for GraphNode {
    fn from(factory: &Factory) -> Self {
        GraphNode {
            name: factory.name().to_string(),
            origin: factory.source().to_string(),
            dependencies: factory.dependencies().to_vec(),
            outputs: factory.outputs().to_vec(),
        }
    }
}

impl DependencyGraph {
    pub fn new(nodes: Vec<GraphNode>) -> Self {
        Self { nodes }
    }

    pub fn from_factories<'a>(factories: impl IntoIterator<Item = &'a Factory>) -> Self {
        Self::new(factories.into_iter().map(GraphNode::from).collect())
    }

    /// Validate the graph
    ///
    /// Returns a list of all issues: unresolved arguments first, then duplicated
    /// outputs, then circular factories.
    pub fn check(&self) -> Result<(), Errors> {
        let mut errors = Errors::default();
        self.check_resolvable(&mut errors);
        self.check_unique(&mut errors);
        self.check_acyclic(&mut errors);

        if !errors.is_empty() {
            return Err(errors);
        }

        Ok(())
    }

    /// Indices of the factories producing the type, in declaration order
    fn producers<'a>(&'a self, type_info: &'a TypeInfo) -> impl Iterator<Item = usize> + 'a {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| node.outputs.iter().any(|output| output.provides(type_info)))
            .map(|(index, _)| index)
    }

    fn check_resolvable(&self, errors: &mut Errors) {
        for node in &self.nodes {
            for (index, dependency) in node.dependencies.iter().enumerate() {
                if !dependency.is_required() {
                    continue;
                }

                if self.producers(&dependency.type_info).next().is_none() {
                    errors.push(Error::UnresolvedArgument {
                        factory: node.name.clone(),
                        origin: node.origin.clone(),
                        index,
                        dependency: dependency.type_info,
                    });
                }
            }
        }
    }

    fn check_unique(&self, errors: &mut Errors) {
        for node in &self.nodes {
            for (index, output) in node.outputs.iter().enumerate() {
                if output.is_duplicate_exempt() {
                    continue;
                }

                let producers = self
                    .nodes
                    .iter()
                    .flat_map(|other| &other.outputs)
                    .filter(|other| other.type_info == output.type_info)
                    .count();

                if producers > 1 {
                    errors.push(Error::ServiceDuplicated {
                        factory: node.name.clone(),
                        origin: node.origin.clone(),
                        index,
                        output: output.type_info,
                    });
                }
            }
        }
    }

    fn check_acyclic(&self, errors: &mut Errors) {
        for root in self.circular_roots() {
            let node = &self.nodes[root];
            errors.push(Error::CircularDependency {
                factory: node.name.clone(),
                origin: node.origin.clone(),
            });
        }
    }

    /// Indices of every factory which transitively depends on itself
    pub fn circular_roots(&self) -> Vec<usize> {
        (0..self.nodes.len())
            .filter(|&root| self.reaches_itself(root))
            .collect()
    }

    /// Breadth first walk over the dependency types of `root`.
    ///
    /// Every producer of a type is expanded, since resolution spawns all of them.
    /// Types are only expanded once per walk.
    fn reaches_itself(&self, root: usize) -> bool {
        let mut visited = HashSet::new();
        let mut queue: VecDeque<TypeInfo> = self.nodes[root]
            .dependencies
            .iter()
            .filter_map(Dependency::inner)
            .collect();

        while let Some(type_info) = queue.pop_front() {
            if !visited.insert(type_info.type_id) {
                continue;
            }

            for producer in self.producers(&type_info) {
                if producer == root {
                    return true;
                }

                queue.extend(
                    self.nodes[producer]
                        .dependencies
                        .iter()
                        .filter_map(Dependency::inner),
                );
            }
        }

        false
    }
}
