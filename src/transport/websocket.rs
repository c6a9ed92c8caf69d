//! WebSocket transport
//!
//! One task per client. The read side feeds text frames to the dispatcher
//! in arrival order; the write side drains the session's outbound queue
//! into the socket. Whichever side fails first closes the session, and the
//! write side finishes once every sender for the session is gone.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tracing::{debug, error, info, trace};
use tungstenite::protocol::Message as WsMessage;

use crate::bus::ChannelBus;
use crate::dispatcher::Dispatcher;
use crate::session::{Session, resolve_remote_addr};

#[derive(Clone)]
pub struct WsTransport {
    dispatcher: Arc<Dispatcher>,
    bus: Arc<ChannelBus>,
    path: Arc<str>,
}

impl WsTransport {
    pub fn new(dispatcher: Arc<Dispatcher>, bus: Arc<ChannelBus>, path: &str) -> Self {
        Self {
            dispatcher,
            bus,
            path: Arc::from(path),
        }
    }

    /// Accept clients on `listener` until `shutdown` resolves. Open
    /// connections are then told to close.
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        if let Ok(addr) = listener.local_addr() {
            info!(addr = %addr, path = %self.path, "WebSocket server listening");
        }
        let (stop_tx, stop_rx) = watch::channel(false);

        tokio::select! {
            _ = shutdown => {
                info!("Shutdown signal received");
            }
            _ = self.accept_loop(&listener, &stop_rx) => {}
        }

        let _ = stop_tx.send(true);
    }

    async fn accept_loop(&self, listener: &TcpListener, stop: &watch::Receiver<bool>) {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    tokio::spawn(self.clone().handle_connection(stream, peer, stop.clone()));
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    async fn handle_connection(
        self,
        stream: TcpStream,
        peer: SocketAddr,
        mut stop: watch::Receiver<bool>,
    ) {
        let mut remote_addr = peer.ip().to_string();
        let path = Arc::clone(&self.path);
        let check_path = |request: &Request, response: Response| {
            if request.uri().path() != &*path {
                debug!(peer = %peer, path = %request.uri().path(), "Rejecting upgrade on unknown path");
                return Err(not_found());
            }
            remote_addr = resolve_remote_addr(request.headers(), peer);
            Ok(response)
        };

        let ws_stream = match accept_hdr_async(stream, check_path).await {
            Ok(ws) => ws,
            Err(e) => {
                debug!(peer = %peer, error = %e, "WebSocket handshake failed");
                return;
            }
        };
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();
        let session = Session::new(Arc::clone(&self.bus), remote_addr, tx);
        info!(session = %session.id(), remote = %session.remote_addr(), "Client connected");

        let weak = session.downgrade();
        let session_id = session.id().clone();
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let Err(e) = ws_sender.send(msg).await {
                    debug!(session = %session_id, error = %e, "Send failed, closing session");
                    if let Some(session) = weak.upgrade() {
                        session.close().await;
                    }
                    return;
                }
            }
            let _ = ws_sender.close().await;
            trace!(session = %session_id, "Send loop closed");
        });

        loop {
            tokio::select! {
                frame = ws_receiver.next() => match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        self.dispatcher.dispatch(&session, text.as_str()).await;
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => {
                        trace!(session = %session.id(), "Ignoring non-text frame");
                    }
                    Some(Err(e)) => {
                        debug!(session = %session.id(), error = %e, "Read failed");
                        break;
                    }
                },
                _ = stop.changed() => {
                    debug!(session = %session.id(), "Server stopping, closing session");
                    break;
                }
            }
        }

        session.close().await;
        info!(session = %session.id(), remote = %session.remote_addr(), "Client disconnected");
    }
}

fn not_found() -> ErrorResponse {
    let mut response = ErrorResponse::new(Some("Not Found".to_string()));
    *response.status_mut() = StatusCode::NOT_FOUND;
    response
}
