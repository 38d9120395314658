use std::collections::HashSet;

use heck::ToSnakeCase as _;
use prost_reflect::{MethodDescriptor, ServiceDescriptor};

use crate::proto::{LoadedProto, PackageNode};

/// A method's transport-safe identifier and its proto-declared name.
///
/// Both are valid lookup keys for the bound method; they are equal when the proto name is
/// already transport-safe.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodNamePair {
    pub name: String,
    pub original_name: String,
}

impl MethodNamePair {
    #[must_use]
    pub fn is_aliased(&self) -> bool {
        self.name != self.original_name
    }
}

/// One service to bind: its descriptor, dotted path and methods in declaration order.
#[derive(Debug, Clone)]
pub struct BindingPlanEntry {
    descriptor: ServiceDescriptor,
    package_name: String,
    methods: Vec<MethodNamePair>,
}

impl BindingPlanEntry {
    #[must_use]
    pub fn descriptor(&self) -> &ServiceDescriptor {
        &self.descriptor
    }

    /// Dotted path of the service, e.g. `helloworld.Greeter`.
    #[must_use]
    pub fn package_name(&self) -> &str {
        &self.package_name
    }

    #[must_use]
    pub fn methods(&self) -> &[MethodNamePair] {
        &self.methods
    }

    #[must_use]
    pub fn method_descriptor(&self, pair: &MethodNamePair) -> Option<MethodDescriptor> {
        self.descriptor
            .methods()
            .find(|m| m.name() == pair.original_name)
    }
}

/// Flatten loaded proto files into a binding plan.
///
/// Files are visited in order, each depth-first in declaration order. A service reachable
/// from more than one file (same full name) is planned once, at its first occurrence.
#[must_use]
pub fn walk(loaded: &[LoadedProto]) -> Vec<BindingPlanEntry> {
    let mut seen = HashSet::new();
    let mut plan = Vec::new();

    for proto in loaded {
        walk_node(&proto.root, &mut Vec::new(), &mut seen, &mut plan);
    }

    plan
}

fn walk_node<'a>(
    node: &'a PackageNode,
    path: &mut Vec<&'a str>,
    seen: &mut HashSet<String>,
    plan: &mut Vec<BindingPlanEntry>,
) {
    let pushed = !node.name.is_empty();
    if pushed {
        path.push(&node.name);
    }

    for service in &node.services {
        let mut segments = path.clone();
        segments.push(service.name());
        let package_name = segments.join(".");

        if !seen.insert(package_name.clone()) {
            continue;
        }

        plan.push(BindingPlanEntry {
            descriptor: service.clone(),
            package_name,
            methods: method_names(service),
        });
    }

    for child in &node.packages {
        walk_node(child, path, seen, plan);
    }

    if pushed {
        path.pop();
    }
}

fn method_names(service: &ServiceDescriptor) -> Vec<MethodNamePair> {
    let originals: Vec<String> = service.methods().map(|m| m.name().to_string()).collect();

    let mut taken: HashSet<String> = originals.iter().cloned().collect();
    let mut out = Vec::with_capacity(originals.len());

    for original_name in originals {
        let snake = original_name.to_snake_case();
        let name = if snake == original_name {
            snake
        } else if taken.insert(snake.clone()) {
            snake
        } else {
            original_name.clone()
        };

        out.push(MethodNamePair {
            name,
            original_name,
        });
    }

    out
}
