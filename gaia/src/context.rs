use std::collections::BTreeMap;

use gaia_core::{NamespaceTree, ServiceClient};

/// Shared application context handed to every controller call.
///
/// Holds the user state plus the bound clients of every configured remote service, keyed
/// by the name the service was given in the config.
#[derive(Debug)]
pub struct Context<S> {
    state: S,
    services: BTreeMap<String, NamespaceTree<ServiceClient>>,
}

impl<S> Context<S> {
    pub(crate) fn new(state: S, services: BTreeMap<String, NamespaceTree<ServiceClient>>) -> Self {
        Self { state, services }
    }

    #[must_use]
    pub fn state(&self) -> &S {
        &self.state
    }

    /// Client tree of the remote service configured as `name`.
    #[must_use]
    pub fn service(&self, name: &str) -> Option<&NamespaceTree<ServiceClient>> {
        self.services.get(name)
    }

    /// Shortcut for `service(name)` then the client at dotted `path` inside it.
    #[must_use]
    pub fn client(&self, name: &str, path: &str) -> Option<&ServiceClient> {
        self.service(name).and_then(|tree| tree.get(path))
    }

    pub fn service_names(&self) -> impl Iterator<Item = &str> {
        self.services.keys().map(String::as_str)
    }
}
