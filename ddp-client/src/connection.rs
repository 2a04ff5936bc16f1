//! WebSocket transport and reconnection supervisor.
//!
//! One task owns the socket lifecycle: connect, send the DDP handshake,
//! then run a select loop over inbound frames, the outbound send queue, and
//! the shutdown signal. Heartbeats are answered inline on this lane so a
//! `ping` is never queued behind the dispatch backlog. Everything else is
//! forwarded to the dispatch lane in arrival order.
//!
//! On close the supervisor reports the closure to the dispatcher (so
//! lifecycle events stay ordered relative to document traffic), waits out
//! the backoff interval, and retries. The backoff resets to baseline only
//! when a `connected` handshake reply arrives (see the dispatcher).

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::client::ClientInner;
use crate::dispatcher::DispatchItem;
use crate::message::{Message, MessageKind};

/// How a single socket session ended.
struct Closure {
    code: Option<u16>,
    reason: String,
    clean: bool,
}

pub(crate) async fn run(
    inner: Arc<ClientInner>,
    mut out_rx: mpsc::UnboundedReceiver<String>,
    dispatch_tx: mpsc::UnboundedSender<DispatchItem>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut first_attempt = true;
    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        if !first_attempt {
            let delay = inner.backoff.lock().next_interval();
            tracing::info!(delay_ms = delay.as_millis() as u64, "scheduling reconnect");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
            if *shutdown_rx.borrow() {
                break;
            }
        }
        first_attempt = false;

        tracing::debug!(url = %inner.config.url, "opening websocket");
        let ws = match tokio_tungstenite::connect_async(inner.config.url.as_str()).await {
            Ok((ws, _)) => ws,
            Err(e) => {
                tracing::warn!(error = %e, "websocket connect failed");
                let _ = dispatch_tx.send(DispatchItem::TransportClosed {
                    code: None,
                    reason: e.to_string(),
                    clean: false,
                });
                continue;
            }
        };

        let closure = run_session(&inner, ws, &mut out_rx, &dispatch_tx, &mut shutdown_rx).await;
        let _ = dispatch_tx.send(DispatchItem::TransportClosed {
            code: closure.code,
            reason: closure.reason,
            clean: closure.clean,
        });
    }
    tracing::debug!("connection supervisor stopped");
}

async fn run_session(
    inner: &Arc<ClientInner>,
    ws: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    out_rx: &mut mpsc::UnboundedReceiver<String>,
    dispatch_tx: &mpsc::UnboundedSender<DispatchItem>,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> Closure {
    let (mut sink, mut stream) = ws.split();

    // DDP handshake; only a `connected` reply moves the state machine to
    // Connected (the dispatcher handles that).
    let hello = json!({"msg": "connect", "version": "1", "support": ["1"]});
    if let Err(e) = sink.send(WsMessage::Text(hello.to_string().into())).await {
        return Closure {
            code: None,
            reason: e.to_string(),
            clean: false,
        };
    }

    loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    let _ = sink.send(WsMessage::Close(None)).await;
                    return Closure { code: None, reason: "client disconnect".into(), clean: true };
                }
            }

            frame = stream.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    let msg = Message::parse(text.as_str());
                    match msg.kind() {
                        // Heartbeats are handled here, on the transport
                        // lane, never behind the dispatch backlog.
                        MessageKind::Ping => {
                            let pong = match msg.id() {
                                Some(id) => json!({"msg": "pong", "id": id}),
                                None => json!({"msg": "pong"}),
                            };
                            if let Err(e) = sink.send(WsMessage::Text(pong.to_string().into())).await {
                                return Closure { code: None, reason: e.to_string(), clean: false };
                            }
                        }
                        MessageKind::Pong => inner.record_pong(),
                        _ => {
                            let _ = dispatch_tx.send(DispatchItem::Frame(msg));
                        }
                    }
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    let (code, reason) = match frame {
                        Some(cf) => (Some(u16::from(cf.code)), cf.reason.to_string()),
                        None => (None, String::new()),
                    };
                    return Closure { code, reason, clean: true };
                }
                // Binary and ws-level ping/pong frames are not part of DDP;
                // tungstenite answers ws-level pings itself.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    return Closure { code: None, reason: e.to_string(), clean: false };
                }
                None => {
                    return Closure { code: None, reason: "EOF".into(), clean: false };
                }
            },

            outbound = out_rx.recv() => match outbound {
                Some(text) => {
                    if let Err(e) = sink.send(WsMessage::Text(text.into())).await {
                        return Closure { code: None, reason: e.to_string(), clean: false };
                    }
                }
                // All senders dropped: the client is gone.
                None => {
                    let _ = sink.send(WsMessage::Close(None)).await;
                    return Closure { code: None, reason: "client dropped".into(), clean: true };
                }
            },
        }
    }
}
