use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use futures::FutureExt as _;
use futures::future::BoxFuture;
use serde_json::Value;
use tonic::metadata::MetadataMap;

use crate::error::ApplicationError;
use crate::walker::MethodNamePair;

pub type ControllerFuture = BoxFuture<'static, Result<Value, ApplicationError>>;

/// The call object handed to a controller next to the request.
#[derive(Debug, Clone)]
pub struct CallInfo {
    pub service: String,
    pub method: MethodNamePair,
    pub metadata: MetadataMap,
    pub remote_addr: Option<SocketAddr>,
}

/// One controller method. `C` is the shared application context.
pub trait Handler<C>: Send + Sync + 'static {
    fn call(&self, context: Arc<C>, request: Value, call: CallInfo) -> ControllerFuture;
}

impl<C, F, Fut> Handler<C> for F
where
    C: Send + Sync + 'static,
    F: Fn(Arc<C>, Value, CallInfo) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ApplicationError>> + Send + 'static,
{
    fn call(&self, context: Arc<C>, request: Value, call: CallInfo) -> ControllerFuture {
        (self)(context, request, call).boxed()
    }
}

/// The method implementations of one service, plus where they were resolved from.
pub struct Controller<C> {
    location: String,
    methods: HashMap<String, Arc<dyn Handler<C>>>,
}

impl<C> Clone for Controller<C> {
    fn clone(&self) -> Self {
        Self {
            location: self.location.clone(),
            methods: self.methods.clone(),
        }
    }
}

impl<C> std::fmt::Debug for Controller<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.methods.keys().collect();
        names.sort();
        f.debug_struct("Controller")
            .field("location", &self.location)
            .field("methods", &names)
            .finish()
    }
}

impl<C> Controller<C> {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            methods: HashMap::new(),
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Handler<C>>> {
        self.methods.get(name)
    }

    /// Look up by transport-safe name, then by proto name.
    #[must_use]
    pub fn find(&self, pair: &MethodNamePair) -> Option<&Arc<dyn Handler<C>>> {
        self.get(&pair.name).or_else(|| self.get(&pair.original_name))
    }

    #[must_use]
    pub fn location(&self) -> &str {
        &self.location
    }
}

impl<C: Send + Sync + 'static> Controller<C> {
    /// Add an async closure under `name`; either the transport-safe or the proto name may be
    /// used.
    #[must_use]
    pub fn method<F, Fut>(self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Arc<C>, Value, CallInfo) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ApplicationError>> + Send + 'static,
    {
        self.handler(name, handler)
    }

    #[must_use]
    pub fn handler(mut self, name: impl Into<String>, handler: impl Handler<C>) -> Self {
        self.methods.insert(name.into(), Arc::new(handler));
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("no controller for '{package}' at {location}")]
    NotFound { package: String, location: String },

    #[error("failed to load controller for '{package}': {source}")]
    Failed {
        package: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Maps a dotted service path to its controller.
pub trait ControllerResolver<C> {
    fn resolve(&self, package_name: &str) -> Result<Controller<C>, ResolveError>;
}

impl<C, F> ControllerResolver<C> for F
where
    F: Fn(&str) -> Result<Controller<C>, ResolveError>,
{
    fn resolve(&self, package_name: &str) -> Result<Controller<C>, ResolveError> {
        self(package_name)
    }
}

/// In-memory controllers keyed by dotted service path.
///
/// Locations are reported as `<root>/<path segments joined by '/'>`, the layout a
/// controller directory would have.
pub struct ControllerRegistry<C> {
    root: String,
    controllers: HashMap<String, Controller<C>>,
}

impl<C> std::fmt::Debug for ControllerRegistry<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerRegistry")
            .field("root", &self.root)
            .field("controllers", &self.controllers)
            .finish()
    }
}

impl<C> ControllerRegistry<C> {
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            controllers: HashMap::new(),
        }
    }

    #[must_use]
    pub fn location_of(&self, package_name: &str) -> String {
        format!("{}/{}", self.root, package_name.replace('.', "/"))
    }

    /// Start a controller for `package_name` located where this registry would report it.
    #[must_use]
    pub fn controller(&self, package_name: &str) -> Controller<C> {
        Controller::new(self.location_of(package_name))
    }

    pub fn register(&mut self, package_name: impl Into<String>, controller: Controller<C>) {
        self.controllers.insert(package_name.into(), controller);
    }

    /// Build and register a controller in one go.
    #[must_use]
    pub fn with(
        mut self,
        package_name: &str,
        build: impl FnOnce(Controller<C>) -> Controller<C>,
    ) -> Self {
        let controller = build(self.controller(package_name));
        self.register(package_name, controller);
        self
    }
}

impl<C> ControllerResolver<C> for ControllerRegistry<C> {
    fn resolve(&self, package_name: &str) -> Result<Controller<C>, ResolveError> {
        self.controllers
            .get(package_name)
            .cloned()
            .ok_or_else(|| ResolveError::NotFound {
                package: package_name.to_string(),
                location: self.location_of(package_name),
            })
    }
}
