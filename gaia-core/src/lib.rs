#![forbid(unsafe_code)]

//! Protobuf-driven RPC binding.
//!
//! Loaded proto files are walked into a binding plan ([`walk`]); the plan is then bound
//! either to remote clients ([`client::connect`]) or to local controllers
//! ([`server::bind`]). Application errors cross the wire as whitelisted metadata fields
//! (see [`envelope`]).

pub mod client;
pub mod controller;
pub mod envelope;
mod error;
pub mod namespace;
mod proto;
pub mod server;
mod transport;
mod walker;

pub use client::{ServiceClient, UnaryMethod, connect};
pub use controller::{
    CallInfo, Controller, ControllerFuture, ControllerRegistry, ControllerResolver, Handler,
    ResolveError,
};
pub use envelope::{ErrorFields, FieldsError};
pub use error::{ApplicationError, BindError, CallError, ErrorClass, UNKNOWN_ERROR_MESSAGE};
pub use namespace::{Entry, Error as NamespaceError, MethodSet, Namespace, NamespaceTree};
pub use proto::{Error as ProtoError, LoadedProto, PackageNode, ProtoSchema};
pub use server::{ControllerTree, ServerHandler, bind};
pub use transport::{RegisterError, RpcServer, ServeError, ServiceChannel, ServiceRegistrar};
pub use walker::{BindingPlanEntry, MethodNamePair, walk};

/// Re-exported so callers can build metadata without depending on tonic directly.
pub use tonic::metadata::MetadataMap;
