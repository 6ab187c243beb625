use std::{future::Future, io::Write, sync::Arc};

use stagehand_core::Plugin;
use tokio::net::TcpListener;
use tonic::transport::{Server, server::TcpIncoming};
use tracing::info;

use crate::{
    error::RpcError,
    handshake::{Handshake, verify_cookie},
    proto::task_execution_server::TaskExecutionServer,
    server::TaskExecutionService,
};

/// Entry point of a plugin binary.
///
/// Verifies the launch cookie, binds an ephemeral local port, prints the handshake line on
/// stdout and serves until interrupted.
pub async fn serve_plugin<P>(plugin: P) -> Result<(), RpcError>
where
    P: Plugin + 'static,
{
    verify_cookie()?;

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let handshake = Handshake::new(listener.local_addr()?);
    {
        let mut out = std::io::stdout().lock();
        writeln!(out, "{handshake}")?;
        out.flush()?;
    }

    serve_with_listener(Arc::new(plugin), listener, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await
}

/// Serve `plugin` on an already bound listener until `shutdown` resolves.
pub async fn serve_with_listener<P, F>(
    plugin: Arc<P>,
    listener: TcpListener,
    shutdown: F,
) -> Result<(), RpcError>
where
    P: Plugin + 'static,
    F: Future<Output = ()>,
{
    let addr = listener.local_addr()?;
    let incoming = TcpIncoming::from_listener(listener, true, None)
        .map_err(|e| RpcError::Io(std::io::Error::other(e)))?;
    info!(%addr, "plugin serving");

    Server::builder()
        .add_service(TaskExecutionServer::new(TaskExecutionService::new(plugin)))
        .serve_with_incoming_shutdown(incoming, shutdown)
        .await?;

    info!("plugin stopped");
    Ok(())
}
