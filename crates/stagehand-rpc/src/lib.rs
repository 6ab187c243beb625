//! Process boundary for plugins.
//!
//! A plugin process serves [`TaskExecutionService`] over gRPC and keeps its live task
//! instances in an [`InstanceTable`]. The master talks to it through [`RemotePlugin`], whose
//! tasks ([`RemoteTask`]) carry only an opaque reference and exchange property deltas on
//! every call.

mod proto {
    tonic::include_proto!("stagehand.v1");
}

mod error;
pub use error::RpcError;

mod convert;

mod instance;
pub use instance::{Instance, InstanceTable};

mod server;
pub use server::TaskExecutionService;

mod client;
pub use client::{RemotePlugin, RemoteTask};

mod handshake;
pub use handshake::{COOKIE_KEY, COOKIE_VALUE, Handshake, PROTOCOL_VERSION, verify_cookie};

mod process;
pub use process::{PluginProcess, PluginRegistry};

mod serve;
pub use serve::{serve_plugin, serve_with_listener};

pub use proto::task_execution_server::TaskExecutionServer;

pub use tonic;
