//! Server shell (component G): accepts TCP connections, frames them with
//! [`LinesCodec`] (one self-delimited JSON object per line, per spec.md
//! §4.A), and wires each decoded command into the dispatcher/router. Owns
//! nothing the core needs to function correctly — it exists only to turn
//! bytes on a socket into calls against [`crate::router::Router`] and
//! [`crate::registry::Registry`].

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use log::{info, warn};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::{Framed, LinesCodec};

use crate::dispatcher::dispatch;
use crate::errors::Result;
use crate::registry::{next_conn_id, ConnectionHandle};
use crate::router::Router;
use crate::wire::Command;

/// Runs the accept loop until the listener errors. Each accepted socket
/// gets its own task; a connection's lifetime never blocks another
/// connection's.
pub async fn serve(listener: TcpListener, router: Arc<Router>) -> Result<()> {
    loop {
        let (socket, addr) = listener.accept().await?;
        let router = router.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(socket, router).await {
                warn!(target: "chatserver_core::server", "connection {addr} ended with an error: {e}");
            }
        });
    }
}

async fn handle_connection(socket: TcpStream, router: Arc<Router>) -> Result<()> {
    let conn_id = next_conn_id();
    let framed = Framed::new(socket, LinesCodec::new_with_max_length(64 * 1024));
    let (mut sink, mut stream) = framed.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
    let handle = ConnectionHandle::new(conn_id, outbound_tx);

    // Owns the socket's write half; every reply/forward funnels through
    // `outbound_tx` so at most one task ever writes to this socket.
    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            if sink.send(frame).await.is_err() {
                break;
            }
        }
    });

    while let Some(line) = stream.next().await {
        match line {
            Ok(line) => match Command::parse(&line) {
                Ok(command) => dispatch(&router, &handle, command).await,
                Err(e) => {
                    // Malformed frame: logged, connection preserved
                    // (spec.md §4.A).
                    warn!(target: "chatserver_core::server", "conn {conn_id}: {e}");
                }
            },
            Err(e) => {
                warn!(target: "chatserver_core::server", "conn {conn_id} read error: {e}");
                break;
            }
        }
    }

    // The sole cancellation signal the core layer recognizes (spec.md
    // §5): whether the client sent LOGINOUT or not, this always runs and
    // is a no-op if the user already logged out explicitly.
    router.handle_abnormal_close(conn_id).await;
    writer.abort();
    Ok(())
}

/// Logged once at startup so operators can see which address came out of
/// config resolution.
pub fn log_listening_on(addr: &str) {
    info!(target: "chatserver_core::server", "listening on {addr}");
}
