use http::uri::PathAndQuery;
use prost_reflect::{DynamicMessage, MessageDescriptor, MethodDescriptor};
use tonic::transport::{Channel, Endpoint};

use super::codec::DynamicMessageCodec;

/// gRPC request path of `method`: `/<package>.<Service>/<Method>`.
pub(crate) fn method_path(method: &MethodDescriptor) -> Result<PathAndQuery, http::uri::InvalidUri> {
    PathAndQuery::try_from(format!(
        "/{}/{}",
        method.parent_service().full_name(),
        method.name()
    ))
}

/// A plaintext, lazily connected channel to one remote service.
#[derive(Debug, Clone)]
pub struct ServiceChannel {
    channel: Channel,
}

impl ServiceChannel {
    /// Prepare a channel to `host` without touching the network.
    ///
    /// Connection failures surface as `UNAVAILABLE` statuses on the first call. Must be
    /// called from within a tokio runtime.
    pub fn connect_lazy(host: &str) -> Result<Self, tonic::transport::Error> {
        let uri = if host.contains("://") {
            host.to_string()
        } else {
            format!("http://{host}")
        };

        let endpoint = Endpoint::from_shared(uri)?.tcp_nodelay(true);

        Ok(Self {
            channel: endpoint.connect_lazy(),
        })
    }

    pub(crate) async fn unary(
        &self,
        path: &PathAndQuery,
        response_desc: MessageDescriptor,
        request: tonic::Request<DynamicMessage>,
    ) -> Result<DynamicMessage, tonic::Status> {
        let mut grpc = tonic::client::Grpc::new(self.channel.clone());

        grpc.ready()
            .await
            .map_err(|e| tonic::Status::unknown(format!("Service was not ready: {e}")))?;

        let codec = DynamicMessageCodec::new(response_desc);
        let res = grpc.unary(request, path.clone(), codec).await?;
        Ok(res.into_inner())
    }
}
