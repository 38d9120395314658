#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use gaia_core::{
    BindingPlanEntry, ControllerResolver, ControllerTree, ErrorFields, ProtoSchema, RpcServer,
};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

pub type TestResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

pub fn plan_for(
    set: prost_types::FileDescriptorSet,
) -> Result<Vec<BindingPlanEntry>, gaia_core::ProtoError> {
    let schema = ProtoSchema::from_file_descriptor_set(set)?;
    Ok(gaia_core::walk(&schema.loaded_protos()))
}

/// A bound RPC server on an ephemeral local port.
pub struct TestServer {
    addr: SocketAddr,
    controllers: ControllerTree,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<tokio::task::JoinHandle<Result<(), gaia_core::ServeError>>>,
}

impl TestServer {
    pub async fn start<C, R>(
        plan: &[BindingPlanEntry],
        resolver: &R,
        context: C,
        fields: &ErrorFields,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>>
    where
        C: Send + Sync + 'static,
        R: ControllerResolver<C>,
    {
        let mut server = RpcServer::new();
        let controllers = gaia_core::bind(plan, resolver, Arc::new(context), fields, &mut server)?;

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(server.serve_with_shutdown(listener, async move {
            let _ = shutdown_rx.await;
        }));

        Ok(Self {
            addr,
            controllers,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }

    pub fn target(&self) -> String {
        format!("{}:{}", self.addr.ip(), self.addr.port())
    }

    pub fn controllers(&self) -> &ControllerTree {
        &self.controllers
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if self.shutdown_tx.is_some()
            && let Some(task) = self.task.take()
        {
            task.abort();
        }
    }
}
