//! WebSocket gateway for match commands and live updates.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::{accept_async, tungstenite::Message, WebSocketStream};
use tracing::{debug, error, info};

use coinduel_core::{MatchStore, PriceSource};
use coinduel_types::{ClientCommand, GatewayEvent, PriceUpdate};

use crate::session::Session;

/// Seconds between standings pushes and expiry sweeps per client.
const TICK_SECS: u64 = 1;

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

/// Run the WebSocket gateway for match play.
pub async fn run_gateway(
    addr: &str,
    store: Arc<MatchStore>,
    source: Arc<dyn PriceSource>,
    price_tx: broadcast::Sender<PriceUpdate>,
) {
    let listener = match TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind gateway to {}: {}", addr, e);
            return;
        }
    };

    info!("Match gateway listening on {}", addr);

    loop {
        let (stream, peer_addr) = match listener.accept().await {
            Ok(s) => s,
            Err(e) => {
                error!("Failed to accept connection: {}", e);
                continue;
            }
        };

        let store = store.clone();
        let source = source.clone();
        let price_rx = price_tx.subscribe();

        tokio::spawn(async move {
            if let Err(e) = handle_client(stream, peer_addr, store, source, price_rx).await {
                debug!("Client {} error: {}", peer_addr, e);
            }
        });
    }
}

async fn handle_client(
    stream: TcpStream,
    peer_addr: SocketAddr,
    store: Arc<MatchStore>,
    source: Arc<dyn PriceSource>,
    mut price_rx: broadcast::Receiver<PriceUpdate>,
) -> anyhow::Result<()> {
    let ws_stream = accept_async(stream).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    debug!("Client {} connected", peer_addr);

    let mut changes = store.subscribe();
    let mut session = Session::new(store, source);
    let mut tick = tokio::time::interval(Duration::from_secs(TICK_SECS));

    send_event(&mut ws_sender, &GatewayEvent::Connected).await?;

    loop {
        tokio::select! {
            // Client commands
            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let now = chrono::Utc::now().timestamp();
                        let events = match serde_json::from_str::<ClientCommand>(&text) {
                            Ok(cmd) => session.handle_command(cmd, now),
                            Err(e) => vec![GatewayEvent::Error {
                                message: format!("Bad command: {}", e),
                            }],
                        };
                        for event in &events {
                            send_event(&mut ws_sender, event).await?;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }

            // Store change feed, filtered to this client's watched matches
            change = changes.recv() => {
                match change {
                    Some(change) => {
                        if let Some(row) = session.apply_change(&change) {
                            send_event(&mut ws_sender, &GatewayEvent::MatchState(row)).await?;
                        }
                    }
                    None => break,
                }
            }

            // Price ticks for coins in watched matches
            update = price_rx.recv() => {
                match update {
                    Ok(update) => {
                        if session.involves_symbol(&update.symbol) {
                            send_event(&mut ws_sender, &GatewayEvent::Price(update)).await?;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }

            // Periodic standings push and expiry sweep
            _ = tick.tick() => {
                let now = chrono::Utc::now().timestamp();
                for event in session.settle_expired(now) {
                    send_event(&mut ws_sender, &event).await?;
                }
                for view in session.views(now) {
                    send_event(&mut ws_sender, &GatewayEvent::View(view)).await?;
                }
            }
        }
    }

    debug!("Client {} disconnected", peer_addr);
    Ok(())
}

async fn send_event(sink: &mut WsSink, event: &GatewayEvent) -> anyhow::Result<()> {
    let json = serde_json::to_string(event)?;
    sink.send(Message::Text(json)).await?;
    Ok(())
}
