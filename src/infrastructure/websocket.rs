//! WebSocket egress: fans signal events out to connected clients.
//!
//! A plain TCP accept loop upgrades each connection and forwards every
//! event from the bus as a JSON text frame. Slow clients that lag past the
//! broadcast buffer are disconnected rather than allowed to apply
//! backpressure to the scanner.

use crate::infrastructure::event_bus::SignalEventBus;
use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

pub struct WebSocketServer {
    bus: SignalEventBus,
    bind_addr: String,
}

impl WebSocketServer {
    pub fn new(bus: SignalEventBus, bind_addr: impl Into<String>) -> Self {
        Self {
            bus,
            bind_addr: bind_addr.into(),
        }
    }

    /// Accept loop; runs until the task is aborted at shutdown.
    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(&self.bind_addr)
            .await
            .with_context(|| format!("failed to bind WebSocket listener on {}", self.bind_addr))?;
        info!(addr = %self.bind_addr, "WebSocket fan-out listening");

        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, "WebSocket accept failed");
                    continue;
                }
            };

            let bus = self.bus.clone();
            tokio::spawn(async move {
                if let Err(e) = serve_connection(stream, bus).await {
                    debug!(%peer, error = %e, "WebSocket connection ended");
                }
            });
        }
    }
}

async fn serve_connection(stream: TcpStream, bus: SignalEventBus) -> Result<()> {
    let ws = tokio_tungstenite::accept_async(stream)
        .await
        .context("WebSocket handshake failed")?;
    let (mut sink, mut source) = ws.split();
    let mut events = bus.subscribe();

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        let payload = serde_json::to_string(&event)
                            .context("event serialization failed")?;
                        if sink.send(Message::text(payload)).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "WebSocket client lagged, disconnecting");
                        break;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            incoming = source.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sink.send(Message::Pong(data)).await;
                    }
                    Some(Ok(_)) => {} // Feed is one-way; ignore client chatter
                    Some(Err(e)) => {
                        debug!(error = %e, "WebSocket read error");
                        break;
                    }
                }
            }
        }
    }

    let _ = sink.send(Message::Close(None)).await;
    Ok(())
}
