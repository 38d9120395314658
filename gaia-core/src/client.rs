use http::uri::PathAndQuery;
use prost_reflect::MethodDescriptor;
use serde_json::Value;
use tonic::metadata::MetadataMap;

use crate::envelope::{self, ErrorFields};
use crate::error::{BindError, CallError};
use crate::namespace::{MethodSet, NamespaceTree};
use crate::server::unary_methods;
use crate::transport::{ServiceChannel, message, method_path};
use crate::walker::{BindingPlanEntry, MethodNamePair};

/// The bound methods of one remote service, reachable under both method names.
pub type ServiceClient = MethodSet<UnaryMethod>;

/// A callable remote unary method.
#[derive(Debug, Clone)]
pub struct UnaryMethod {
    channel: ServiceChannel,
    method: MethodDescriptor,
    path: PathAndQuery,
    pair: MethodNamePair,
    fields: ErrorFields,
}

impl UnaryMethod {
    #[must_use]
    pub fn pair(&self) -> &MethodNamePair {
        &self.pair
    }

    /// gRPC path the method is called on.
    #[must_use]
    pub fn path(&self) -> &str {
        self.path.as_str()
    }

    pub async fn call(&self, request: Value) -> Result<Value, CallError> {
        self.call_with_metadata(request, MetadataMap::new()).await
    }

    /// Call the method, sending `metadata` as request headers.
    ///
    /// Failures carrying the error envelope come back as [`CallError::Application`]; every
    /// other failure, including a request that does not fit the input type, is
    /// [`CallError::Transport`].
    pub async fn call_with_metadata(
        &self,
        request: Value,
        metadata: MetadataMap,
    ) -> Result<Value, CallError> {
        let message = message::to_message(&self.method.input(), request).map_err(|e| {
            CallError::Transport(tonic::Status::invalid_argument(format!(
                "invalid {} request: {e}",
                self.method.input().full_name()
            )))
        })?;

        let mut request = tonic::Request::new(message);
        *request.metadata_mut() = metadata;

        let response = match self
            .channel
            .unary(&self.path, self.method.output(), request)
            .await
        {
            Ok(response) => response,
            Err(status) => {
                let err = envelope::decode(status, &self.fields);
                tracing::debug!(path = %self.path, class = %err.class(), error = %err, "call failed");
                return Err(err);
            }
        };

        message::to_json(&response).map_err(|e| {
            CallError::Transport(tonic::Status::internal(format!(
                "failed to read {} response: {e}",
                self.method.output().full_name()
            )))
        })
    }
}

/// Bind every planned service to a client for `host`.
///
/// Each service gets its own lazily connected channel, so nothing touches the network until
/// the first call.
pub fn connect(
    plan: &[BindingPlanEntry],
    host: &str,
    fields: &ErrorFields,
) -> Result<NamespaceTree<ServiceClient>, BindError> {
    let mut tree = NamespaceTree::new();

    for entry in plan {
        let channel = ServiceChannel::connect_lazy(host).map_err(|source| BindError::Endpoint {
            host: host.to_string(),
            source,
        })?;

        let mut client = ServiceClient::new();
        for (pair, method) in unary_methods(entry)? {
            let path = method_path(&method).map_err(|source| BindError::MethodPath {
                method: pair.original_name.clone(),
                source,
            })?;

            client.insert_aliased(
                pair.clone(),
                UnaryMethod {
                    channel: channel.clone(),
                    method,
                    path,
                    pair: pair.clone(),
                    fields: fields.clone(),
                },
            );
        }

        tracing::debug!(service = %entry.package_name(), %host, methods = entry.methods().len(), "bound client");
        tree.insert(entry.package_name(), client)?;
    }

    Ok(tree)
}
