#![forbid(unsafe_code)]

//! Hosting for gaia services: config resolution, shared context and the server app.

mod app;
pub mod config;
mod context;

pub use app::{App, AppBuilder, AppError};
pub use config::{ConfigError, GaiaConfig, ResolvedConfig, ResolvedProtos, ResolvedService};
pub use context::Context;

pub use gaia_core::{
    ApplicationError, CallError, CallInfo, Controller, ControllerRegistry, ControllerResolver,
    ErrorClass, ErrorFields, MetadataMap, ResolveError, ServiceClient, UnaryMethod,
};
