//! Start order derived from `depends_on` relations

use crate::config::ServiceSpec;
use indexmap::IndexMap;
use std::collections::VecDeque;

/// Services in dependency order
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    /// Service names, dependencies before dependents
    order: Vec<String>,
    /// service -> the service it depends on
    edges: IndexMap<String, Option<String>>,
}

impl DependencyGraph {
    /// Build the graph from service specs
    pub fn build(specs: &[ServiceSpec]) -> Result<Self, DependencyError> {
        let edges: IndexMap<String, Option<String>> = specs
            .iter()
            .map(|s| (s.name.clone(), s.depends_on.clone()))
            .collect();

        for (name, dep) in &edges {
            if let Some(dep) = dep {
                if dep == name {
                    return Err(DependencyError::SelfDependency(name.clone()));
                }
                if !edges.contains_key(dep) {
                    return Err(DependencyError::UnknownDependency {
                        service: name.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        let order = Self::topological_sort(&edges)?;
        Ok(Self { order, edges })
    }

    /// Kahn's algorithm; ties keep declaration order
    fn topological_sort(
        edges: &IndexMap<String, Option<String>>,
    ) -> Result<Vec<String>, DependencyError> {
        let mut in_degree: IndexMap<&str, usize> = edges
            .iter()
            .map(|(name, dep)| (name.as_str(), usize::from(dep.is_some())))
            .collect();

        let mut queue: VecDeque<&str> = in_degree
            .iter()
            .filter(|(_, &degree)| degree == 0)
            .map(|(name, _)| *name)
            .collect();

        let mut sorted = Vec::with_capacity(edges.len());

        while let Some(name) = queue.pop_front() {
            sorted.push(name.to_string());
            for (dependent, dep) in edges {
                if dep.as_deref() == Some(name) {
                    if let Some(degree) = in_degree.get_mut(dependent.as_str()) {
                        *degree -= 1;
                        if *degree == 0 {
                            queue.push_back(dependent.as_str());
                        }
                    }
                }
            }
        }

        if sorted.len() != edges.len() {
            let cycle: Vec<String> = edges
                .keys()
                .filter(|name| !sorted.contains(name))
                .cloned()
                .collect();
            return Err(DependencyError::CyclicDependency(cycle));
        }

        Ok(sorted)
    }

    /// Service that `service` depends on
    pub fn dependency_of(&self, service: &str) -> Option<&str> {
        self.edges.get(service).and_then(|d| d.as_deref())
    }

    /// Services that depend on `service`
    pub fn dependents(&self, service: &str) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|(_, dep)| dep.as_deref() == Some(service))
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Start order: providers before consumers
    pub fn launch_order(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Stop order: consumers before providers
    pub fn shutdown_order(&self) -> impl Iterator<Item = &str> {
        self.order.iter().rev().map(String::as_str)
    }
}

/// Errors that can occur when building the dependency graph
#[derive(Debug, thiserror::Error)]
pub enum DependencyError {
    #[error("Service '{service}' depends on unknown service '{dependency}'")]
    UnknownDependency { service: String, dependency: String },

    #[error("Service '{0}' depends on itself")]
    SelfDependency(String),

    #[error("Cyclic dependency detected involving services: {}", .0.join(", "))]
    CyclicDependency(Vec<String>),
}
