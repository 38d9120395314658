use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::Request;
use axum::routing::{MethodRouter, post};
use futures::FutureExt as _;
use futures::future::BoxFuture;
use prost_reflect::{DynamicMessage, ServiceDescriptor};
use tokio::net::TcpListener;

use super::codec::DynamicMessageCodec;
use crate::namespace::MethodSet;
use crate::server::ServerHandler;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegisterError {
    #[error("service '{0}' is already registered")]
    DuplicateService(String),

    #[error("service '{service}' has no method '{method}'")]
    UnknownMethod { service: String, method: String },
}

#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error("failed to read listener address: {0}")]
    LocalAddr(#[source] std::io::Error),

    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}

/// The server-side registration hook: makes a service's wrapped handlers dispatchable.
pub trait ServiceRegistrar {
    fn add_service(
        &mut self,
        service: &ServiceDescriptor,
        handlers: &MethodSet<ServerHandler>,
    ) -> Result<(), RegisterError>;
}

impl<F> ServiceRegistrar for F
where
    F: FnMut(&ServiceDescriptor, &MethodSet<ServerHandler>) -> Result<(), RegisterError>,
{
    fn add_service(
        &mut self,
        service: &ServiceDescriptor,
        handlers: &MethodSet<ServerHandler>,
    ) -> Result<(), RegisterError> {
        self(service, handlers)
    }
}

struct UnaryRoute(Arc<ServerHandler>);

impl tonic::server::UnaryService<DynamicMessage> for UnaryRoute {
    type Response = DynamicMessage;
    type Future = BoxFuture<'static, Result<tonic::Response<DynamicMessage>, tonic::Status>>;

    fn call(&mut self, request: tonic::Request<DynamicMessage>) -> Self::Future {
        let handler = Arc::clone(&self.0);
        async move { handler.handle(request).await }.boxed()
    }
}

async fn unimplemented_method(req: Request) -> axum::response::Response {
    tonic::Status::unimplemented(format!("unknown method {}", req.uri().path())).into_http()
}

/// gRPC server dispatching on `/<service>/<method>` paths to bound handlers.
#[derive(Default)]
pub struct RpcServer {
    routes: Vec<(String, MethodRouter)>,
    services: Vec<String>,
}

impl std::fmt::Debug for RpcServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcServer")
            .field("services", &self.services)
            .field("routes", &self.routes.iter().map(|(p, _)| p).collect::<Vec<_>>())
            .finish()
    }
}

impl ServiceRegistrar for RpcServer {
    fn add_service(
        &mut self,
        service: &ServiceDescriptor,
        handlers: &MethodSet<ServerHandler>,
    ) -> Result<(), RegisterError> {
        let name = service.full_name().to_string();
        if self.services.contains(&name) {
            return Err(RegisterError::DuplicateService(name));
        }

        let mut routes = Vec::with_capacity(handlers.len());
        for (pair, handler) in handlers.iter() {
            if !service.methods().any(|m| m.name() == pair.original_name) {
                return Err(RegisterError::UnknownMethod {
                    service: name,
                    method: pair.original_name.clone(),
                });
            }

            let path = format!("/{name}/{}", pair.original_name);
            let handler = Arc::clone(handler);
            let route = post(move |req: Request| {
                let handler = Arc::clone(&handler);
                async move {
                    let codec = DynamicMessageCodec::new(handler.input().clone());
                    let mut grpc = tonic::server::Grpc::new(codec);
                    grpc.unary(UnaryRoute(handler), req).await
                }
            });
            routes.push((path, route));
        }

        tracing::debug!(service = %name, methods = routes.len(), "registered service");
        self.routes.extend(routes);
        self.services.push(name);
        Ok(())
    }
}

impl RpcServer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Full names of the registered services, in registration order.
    #[must_use]
    pub fn services(&self) -> &[String] {
        &self.services
    }

    #[must_use]
    pub fn into_router(self) -> axum::Router {
        self.routes
            .into_iter()
            .fold(axum::Router::new(), |router, (path, route)| {
                router.route(&path, route)
            })
            .fallback(unimplemented_method)
    }

    /// Serve on `listener` until `shutdown` resolves.
    pub async fn serve_with_shutdown<F>(
        self,
        listener: TcpListener,
        shutdown: F,
    ) -> Result<(), ServeError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr().map_err(ServeError::LocalAddr)?;
        tracing::info!(%addr, services = ?self.services, "gaia server listening");

        let app = self
            .into_router()
            .into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(ServeError::Serve)?;

        tracing::info!(%addr, "gaia server stopped");
        Ok(())
    }
}
