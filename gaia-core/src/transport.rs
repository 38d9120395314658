mod channel;
mod codec;
pub(crate) mod message;
mod server;

pub use channel::ServiceChannel;
pub(crate) use channel::method_path;
pub use server::{RegisterError, RpcServer, ServeError, ServiceRegistrar};
