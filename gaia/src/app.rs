use std::collections::BTreeMap;
use std::sync::Arc;

use gaia_core::{BindError, ControllerResolver, ControllerTree, RpcServer, ServeError};
use tokio::net::TcpListener;

use crate::config::{ConfigError, ResolvedConfig};
use crate::context::Context;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to bind clients for service '{service}': {source}")]
    Client {
        service: String,
        #[source]
        source: BindError,
    },

    #[error("failed to bind controllers: {0}")]
    Controllers(#[source] BindError),

    #[error(transparent)]
    Serve(#[from] ServeError),
}

/// Builder returned by [`App::builder`].
///
/// `R` only has to be a resolver for `Context<S>` by the time [`AppBuilder::build`] runs, so
/// `state` and `controllers` can be given in either order.
#[derive(Debug)]
pub struct AppBuilder<S, R> {
    config: ResolvedConfig,
    state: S,
    controllers: R,
}

impl<S, R> AppBuilder<S, R> {
    #[must_use]
    pub fn state<T>(self, state: T) -> AppBuilder<T, R> {
        AppBuilder {
            config: self.config,
            state,
            controllers: self.controllers,
        }
    }

    #[must_use]
    pub fn controllers<T>(self, controllers: T) -> AppBuilder<S, T> {
        AppBuilder {
            config: self.config,
            state: self.state,
            controllers,
        }
    }
}

impl<S, R> AppBuilder<S, R>
where
    S: Send + Sync + 'static,
    R: ControllerResolver<Context<S>>,
{
    /// Bind remote clients, then local controllers. Must run inside a tokio runtime.
    pub fn build(self) -> Result<App<S>, AppError> {
        let Self {
            config,
            state,
            controllers,
        } = self;

        let mut services = BTreeMap::new();
        for service in &config.services {
            let clients = gaia_core::connect(
                &service.protos.plan,
                &service.host,
                &service.protos.error_props,
            )
            .map_err(|source| AppError::Client {
                service: service.name.clone(),
                source,
            })?;
            services.insert(service.name.clone(), clients);
        }

        let context = Arc::new(Context::new(state, services));

        let mut server = RpcServer::new();
        let tree = gaia_core::bind(
            &config.protos.plan,
            &controllers,
            Arc::clone(&context),
            &config.protos.error_props,
            &mut server,
        )
        .map_err(AppError::Controllers)?;

        tracing::info!(
            root = %config.root.display(),
            services = server.services().len(),
            remotes = config.services.len(),
            "gaia app ready"
        );

        Ok(App {
            context,
            controllers: tree,
            server,
        })
    }
}

/// A bound application: controllers registered, remote clients ready.
pub struct App<S> {
    context: Arc<Context<S>>,
    controllers: ControllerTree,
    server: RpcServer,
}

impl<S> std::fmt::Debug for App<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("server", &self.server)
            .finish_non_exhaustive()
    }
}

impl App<()> {
    #[must_use]
    pub fn builder(config: ResolvedConfig) -> AppBuilder<(), ()> {
        AppBuilder {
            config,
            state: (),
            controllers: (),
        }
    }
}

impl<S> App<S> {
    #[must_use]
    pub fn context(&self) -> &Arc<Context<S>> {
        &self.context
    }

    #[must_use]
    pub fn controllers(&self) -> &ControllerTree {
        &self.controllers
    }

    /// Full names of the services this app serves.
    #[must_use]
    pub fn services(&self) -> &[String] {
        self.server.services()
    }

    /// Serve on `listener` until `shutdown` resolves.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<(), AppError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.server.serve_with_shutdown(listener, shutdown).await?;
        Ok(())
    }
}
