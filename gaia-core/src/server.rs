use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt as _;
use prost_reflect::{DynamicMessage, MessageDescriptor, MethodDescriptor};
use serde_json::Value;

use crate::controller::{CallInfo, ControllerFuture, ControllerResolver, Handler};
use crate::envelope::{self, ErrorFields};
use crate::error::{ApplicationError, BindError};
use crate::namespace::{MethodSet, NamespaceTree};
use crate::transport::{ServiceRegistrar, message};
use crate::walker::{BindingPlanEntry, MethodNamePair};

pub type Result<T, E = BindError> = std::result::Result<T, E>;

/// Bound controller tree: dotted service path → wrapped handlers.
pub type ControllerTree = NamespaceTree<MethodSet<ServerHandler>>;

trait Invoke: Send + Sync {
    fn invoke(&self, request: Value, call: CallInfo) -> ControllerFuture;
}

struct BoundHandler<C> {
    handler: Arc<dyn Handler<C>>,
    context: Arc<C>,
}

impl<C: Send + Sync + 'static> Invoke for BoundHandler<C> {
    fn invoke(&self, request: Value, call: CallInfo) -> ControllerFuture {
        self.handler.call(Arc::clone(&self.context), request, call)
    }
}

/// A controller method bound to the application context and the error whitelist.
pub struct ServerHandler {
    service: String,
    method: MethodNamePair,
    input: MessageDescriptor,
    output: MessageDescriptor,
    fields: ErrorFields,
    invoke: Box<dyn Invoke>,
}

impl std::fmt::Debug for ServerHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerHandler")
            .field("service", &self.service)
            .field("method", &self.method)
            .field("input", &self.input.full_name())
            .field("output", &self.output.full_name())
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

impl ServerHandler {
    #[must_use]
    pub fn method(&self) -> &MethodNamePair {
        &self.method
    }

    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    #[must_use]
    pub fn input(&self) -> &MessageDescriptor {
        &self.input
    }

    #[must_use]
    pub fn output(&self) -> &MessageDescriptor {
        &self.output
    }

    /// Run the controller. Panics, whether raised while starting the call or while awaiting
    /// it, come back as an `INTERNAL` application error.
    pub async fn invoke(&self, request: Value, call: CallInfo) -> Result<Value, ApplicationError> {
        let started = std::panic::catch_unwind(AssertUnwindSafe(|| {
            self.invoke.invoke(request, call)
        }));

        let outcome = match started {
            Ok(fut) => AssertUnwindSafe(fut).catch_unwind().await,
            Err(payload) => Err(payload),
        };

        outcome.unwrap_or_else(|payload| {
            tracing::error!(
                service = %self.service,
                method = %self.method.name,
                panic = %panic_message(payload.as_ref()),
                "controller panicked"
            );
            Err(ApplicationError::new("controller panicked").with("code", "INTERNAL"))
        })
    }

    pub(crate) async fn handle(
        &self,
        request: tonic::Request<DynamicMessage>,
    ) -> std::result::Result<tonic::Response<DynamicMessage>, tonic::Status> {
        let remote_addr = request
            .extensions()
            .get::<axum::extract::ConnectInfo<SocketAddr>>()
            .map(|info| info.0)
            .or_else(|| request.remote_addr());
        let (metadata, _extensions, message) = request.into_parts();

        let request = message::to_json(&message).map_err(|e| {
            tonic::Status::internal(format!("failed to read {} request: {e}", self.method.name))
        })?;

        let call = CallInfo {
            service: self.service.clone(),
            method: self.method.clone(),
            metadata,
            remote_addr,
        };

        match self.invoke(request, call).await {
            Ok(value) => {
                let response = message::to_message(&self.output, value).map_err(|e| {
                    tracing::error!(
                        service = %self.service,
                        method = %self.method.name,
                        error = %e,
                        "controller returned a response that does not match {}",
                        self.output.full_name()
                    );
                    tonic::Status::internal(format!(
                        "invalid {} response: {e}",
                        self.output.full_name()
                    ))
                })?;
                Ok(tonic::Response::new(response))
            }
            Err(err) => {
                tracing::debug!(
                    service = %self.service,
                    method = %self.method.name,
                    error = %err,
                    "controller failed"
                );
                Err(envelope::encode(&err, &self.fields))
            }
        }
    }
}

fn unary_method(entry: &BindingPlanEntry, pair: &MethodNamePair) -> Result<MethodDescriptor> {
    let method = entry
        .method_descriptor(pair)
        .ok_or_else(|| BindError::MethodNotFound {
            method: pair.original_name.clone(),
            location: entry.package_name().to_string(),
        })?;

    if method.is_client_streaming() || method.is_server_streaming() {
        return Err(BindError::Streaming {
            service: entry.package_name().to_string(),
            method: pair.original_name.clone(),
        });
    }

    Ok(method)
}

pub(crate) fn unary_methods(
    entry: &BindingPlanEntry,
) -> Result<Vec<(&MethodNamePair, MethodDescriptor)>> {
    entry
        .methods()
        .iter()
        .map(|pair| unary_method(entry, pair).map(|m| (pair, m)))
        .collect()
}

/// Bind every planned service to its controller and register the result with `registrar`.
///
/// All controllers are resolved and wrapped before the first registration, so a failure
/// leaves `registrar` untouched.
pub fn bind<C, R, G>(
    plan: &[BindingPlanEntry],
    resolver: &R,
    context: Arc<C>,
    fields: &ErrorFields,
    registrar: &mut G,
) -> Result<ControllerTree>
where
    C: Send + Sync + 'static,
    R: ControllerResolver<C> + ?Sized,
    G: ServiceRegistrar + ?Sized,
{
    let mut tree = ControllerTree::new();

    for entry in plan {
        let package = entry.package_name();
        let controller = resolver
            .resolve(package)
            .map_err(|source| BindError::Resolve {
                package: package.to_string(),
                source,
            })?;

        let mut handlers = MethodSet::new();
        for (pair, method) in unary_methods(entry)? {
            let handler = controller
                .find(pair)
                .ok_or_else(|| BindError::MethodNotFound {
                    method: pair.name.clone(),
                    location: controller.location().to_string(),
                })?;

            handlers.insert(
                pair.clone(),
                ServerHandler {
                    service: package.to_string(),
                    method: pair.clone(),
                    input: method.input(),
                    output: method.output(),
                    fields: fields.clone(),
                    invoke: Box::new(BoundHandler {
                        handler: Arc::clone(handler),
                        context: Arc::clone(&context),
                    }),
                },
            );
        }

        tracing::debug!(service = %package, methods = handlers.len(), "bound controller");
        tree.insert(package, handlers)?;
    }

    for entry in plan {
        if let Some(handlers) = tree.get(entry.package_name()) {
            registrar.add_service(entry.descriptor(), handlers)?;
        }
    }

    Ok(tree)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::{Controller, ControllerRegistry, ResolveError};
    use crate::error::UNKNOWN_ERROR_MESSAGE;
    use crate::proto::ProtoSchema;
    use crate::transport::RegisterError;
    use crate::walker::walk;
    use prost_reflect::ServiceDescriptor;
    use serde_json::json;
    use tonic::metadata::MetadataMap;

    fn plan_for(set: prost_types::FileDescriptorSet) -> Vec<BindingPlanEntry> {
        match ProtoSchema::from_file_descriptor_set(set) {
            Ok(schema) => walk(&schema.loaded_protos()),
            Err(err) => panic!("load fixture failed: {err}"),
        }
    }

    fn greeter_controller(c: Controller<String>) -> Controller<String> {
        c.method("say_hello", |ctx: Arc<String>, req: Value, _call| async move {
            let name = req["name"].as_str().unwrap_or_default().to_string();
            Ok(json!({"greeting": format!("{ctx} {name}")}))
        })
        .method("ping", |_ctx, _req, _call| async {
            Err(ApplicationError::new("nope").with("code", "E_PING"))
        })
        .method("CountLetters", |_ctx, _req, _call| async {
            Ok(json!({"letters": "not a number"}))
        })
    }

    #[derive(Default)]
    struct Recorder {
        services: Vec<String>,
    }

    impl ServiceRegistrar for Recorder {
        fn add_service(
            &mut self,
            service: &ServiceDescriptor,
            _handlers: &MethodSet<ServerHandler>,
        ) -> std::result::Result<(), RegisterError> {
            self.services.push(service.full_name().to_string());
            Ok(())
        }
    }

    fn call_info(name: &str, original_name: &str) -> CallInfo {
        CallInfo {
            service: gaia_testkit::GREETER_SERVICE.to_string(),
            method: MethodNamePair {
                name: name.to_string(),
                original_name: original_name.to_string(),
            },
            metadata: MetadataMap::new(),
            remote_addr: None,
        }
    }

    #[tokio::test]
    async fn bound_handlers_see_the_shared_context() {
        let plan = plan_for(gaia_testkit::greeter_set());
        let registry = ControllerRegistry::new("controllers")
            .with(gaia_testkit::GREETER_SERVICE, greeter_controller);

        let mut recorder = Recorder::default();
        let tree = match bind(
            &plan,
            &registry,
            Arc::new("Hello".to_string()),
            &ErrorFields::default(),
            &mut recorder,
        ) {
            Ok(v) => v,
            Err(err) => panic!("bind failed: {err}"),
        };

        assert_eq!(recorder.services, vec![gaia_testkit::GREETER_SERVICE]);

        let Some(handlers) = tree.get(gaia_testkit::GREETER_SERVICE) else {
            panic!("expected Greeter handlers");
        };
        // Server handlers are keyed by transport-safe name only.
        assert!(handlers.get("SayHello").is_none());
        let Some(say_hello) = handlers.get("say_hello") else {
            panic!("expected say_hello handler");
        };

        let got = say_hello
            .invoke(json!({"name": "Ada"}), call_info("say_hello", "SayHello"))
            .await;
        assert_eq!(got, Ok(json!({"greeting": "Hello Ada"})));
    }

    #[tokio::test]
    async fn controller_errors_become_envelopes() {
        let plan = plan_for(gaia_testkit::greeter_set());
        let registry = ControllerRegistry::new("controllers")
            .with(gaia_testkit::GREETER_SERVICE, greeter_controller);

        let Ok(tree) = bind(
            &plan,
            &registry,
            Arc::new(String::new()),
            &ErrorFields::default(),
            &mut Recorder::default(),
        ) else {
            panic!("bind failed");
        };
        let Some(ping) = tree
            .get(gaia_testkit::GREETER_SERVICE)
            .and_then(|h| h.get("ping"))
        else {
            panic!("expected ping handler");
        };

        let req = match message::to_message(ping.input(), json!({"name": "x"})) {
            Ok(v) => v,
            Err(err) => panic!("request build failed: {err}"),
        };
        let Err(status) = ping.handle(tonic::Request::new(req)).await else {
            panic!("expected failure");
        };

        assert_eq!(status.code(), tonic::Code::Unknown);
        let Some(err) = envelope::decode_metadata(status.metadata(), &ErrorFields::default())
        else {
            panic!("expected an error envelope");
        };
        assert_eq!(err.code(), Some("E_PING"));
        assert_eq!(err.message(), "nope");
    }

    #[tokio::test]
    async fn mismatched_response_is_an_internal_transport_failure() {
        let plan = plan_for(gaia_testkit::greeter_set());
        let registry = ControllerRegistry::new("controllers")
            .with(gaia_testkit::GREETER_SERVICE, greeter_controller);

        let Ok(tree) = bind(
            &plan,
            &registry,
            Arc::new(String::new()),
            &ErrorFields::default(),
            &mut Recorder::default(),
        ) else {
            panic!("bind failed");
        };
        let Some(count) = tree
            .get(gaia_testkit::GREETER_SERVICE)
            .and_then(|h| h.get("count_letters"))
        else {
            panic!("expected count_letters handler");
        };

        let req = DynamicMessage::new(count.input().clone());
        let Err(status) = count.handle(tonic::Request::new(req)).await else {
            panic!("expected failure");
        };
        assert_eq!(status.code(), tonic::Code::Internal);
        assert!(status.metadata().get(envelope::MARKER_KEY).is_none());
    }

    fn boom() -> Result<Value, ApplicationError> {
        panic!("boom")
    }

    #[tokio::test]
    async fn panics_are_caught_and_reported_as_internal() {
        let plan = plan_for(gaia_testkit::greeter_set());
        let resolver = |package: &str| -> std::result::Result<Controller<()>, ResolveError> {
            Ok(Controller::new(format!("controllers/{package}"))
                .method("SayHello", |_ctx, _req, _call| async { boom() })
                .method(
                    "ping",
                    |_ctx, _req, _call| -> futures::future::Ready<Result<Value, ApplicationError>> {
                        panic!("sync boom")
                    },
                )
                .method("CountLetters", |_ctx, _req, _call| async { Ok(json!({})) }))
        };

        let Ok(tree) = bind(
            &plan,
            &resolver,
            Arc::new(()),
            &ErrorFields::default(),
            &mut Recorder::default(),
        ) else {
            panic!("bind failed");
        };
        let Some(handlers) = tree.get(gaia_testkit::GREETER_SERVICE) else {
            panic!("expected handlers");
        };

        for (name, original) in [("say_hello", "SayHello"), ("ping", "ping")] {
            let Some(handler) = handlers.get(name) else {
                panic!("expected {name}");
            };
            let Err(err) = handler.invoke(json!({}), call_info(name, original)).await else {
                panic!("expected {name} to fail");
            };
            assert_eq!(err.code(), Some("INTERNAL"));
            assert_ne!(err.message(), UNKNOWN_ERROR_MESSAGE);
        }
    }

    #[test]
    fn missing_method_aborts_before_any_registration() {
        let mut set = gaia_testkit::catalog_set();
        // Put Billing first so a later entry is the one that fails.
        set.file.swap(0, 1);
        let plan = plan_for(set);

        let registry: ControllerRegistry<()> = ControllerRegistry::new("controllers")
            .with("demo.beta.Billing", |c| {
                c.method("charge", |_ctx, _req, _call| async { Ok(json!({})) })
            })
            .with("demo.alpha.Inventory", |c| {
                c.method("GetItem", |_ctx, _req, _call| async { Ok(json!({})) })
            });

        let mut recorder = Recorder::default();
        let got = bind(
            &plan,
            &registry,
            Arc::new(()),
            &ErrorFields::default(),
            &mut recorder,
        );

        let Err(BindError::MethodNotFound { method, location }) = got else {
            panic!("expected method-not-found");
        };
        assert_eq!(method, "list_items");
        assert_eq!(location, "controllers/demo/alpha/Inventory");
        assert!(recorder.services.is_empty());
    }

    #[test]
    fn unresolvable_controller_is_fatal() {
        let plan = plan_for(gaia_testkit::catalog_set());
        let registry: ControllerRegistry<()> = ControllerRegistry::new("controllers");

        let mut calls = 0;
        let mut registrar = |_: &ServiceDescriptor,
                             _: &MethodSet<ServerHandler>|
         -> std::result::Result<(), RegisterError> {
            calls += 1;
            Ok(())
        };

        let got = bind(
            &plan,
            &registry,
            Arc::new(()),
            &ErrorFields::default(),
            &mut registrar,
        );
        let Err(BindError::Resolve { package, .. }) = got else {
            panic!("expected resolve failure");
        };
        assert_eq!(package, "demo.alpha.Inventory");
        assert_eq!(calls, 0);
    }

    #[test]
    fn streaming_methods_are_rejected() {
        let plan = plan_for(gaia_testkit::streaming_set());
        let registry: ControllerRegistry<()> = ControllerRegistry::new("controllers")
            .with("demo.stream.Ticker", |c| {
                c.method("subscribe", |_ctx, _req, _call| async { Ok(json!({})) })
            });

        let got = bind(
            &plan,
            &registry,
            Arc::new(()),
            &ErrorFields::default(),
            &mut Recorder::default(),
        );
        assert!(matches!(got, Err(BindError::Streaming { .. })));
    }

    #[test]
    fn empty_plan_binds_nothing() {
        let registry: ControllerRegistry<()> = ControllerRegistry::new("controllers");
        let mut recorder = Recorder::default();
        let Ok(tree) = bind(
            &[],
            &registry,
            Arc::new(()),
            &ErrorFields::default(),
            &mut recorder,
        ) else {
            panic!("empty bind failed");
        };
        assert!(tree.is_empty());
        assert!(recorder.services.is_empty());
    }
}
