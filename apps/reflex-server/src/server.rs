use std::future::Future;
use std::io;
use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// A server running on its own task.
pub(crate) struct ServerHandle {
    local_addr: SocketAddr,
    task: JoinHandle<io::Result<()>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait for the server to stop.
    pub async fn join(self) -> io::Result<()> {
        self.task.await.map_err(io::Error::other)?
    }
}

/// Bind, spawn the accept loop, and return once the task reports it has
/// started. The server stops when `shutdown` resolves.
pub(crate) async fn serve<F>(
    app: axum::Router,
    addr: SocketAddr,
    shutdown: F,
) -> io::Result<ServerHandle>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    let (started_tx, started_rx) = oneshot::channel();
    let task = tokio::spawn(async move {
        let _ = started_tx.send(());
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await
    });
    started_rx
        .await
        .map_err(|_| io::Error::other("server task ended before start"))?;
    Ok(ServerHandle { local_addr, task })
}
