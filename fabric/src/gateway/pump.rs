//! Read pump and write pump: the two tasks that move frames across one
//! connection's socket in a single direction each (`spec.md` §4.3/§5).

use crate::config::WebSocketConfig;
use axum::extract::ws::{CloseFrame, Message};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, Notify, mpsc};

type WsSink = SplitSink<axum::extract::ws::WebSocket, Message>;
type WsStream = futures::stream::SplitStream<axum::extract::ws::WebSocket>;

const GOING_AWAY: u16 = 1001;

/// Reads inbound frames. This gateway does not accept application-level
/// client→server messages (§6: "first frame not required"); the read pump's
/// only job is to track liveness (`Pong`) and notice when the peer closes.
pub async fn read_pump(mut stream: WsStream, last_pong: Arc<Mutex<Instant>>, close: Arc<Notify>) {
    loop {
        match stream.next().await {
            Some(Ok(Message::Pong(_))) => {
                *last_pong.lock().await = Instant::now();
            }
            Some(Ok(Message::Close(_))) => {
                tracing::debug!("peer sent close frame");
                close.notify_one();
                return;
            }
            Some(Ok(_)) => {
                // Text/Binary/Ping frames from the client carry no protocol
                // meaning here; ignore and keep reading.
            }
            Some(Err(error)) => {
                tracing::debug!(%error, "read pump error, closing connection");
                close.notify_one();
                return;
            }
            None => {
                close.notify_one();
                return;
            }
        }
    }
}

/// Owns the socket's write half: forwards queued frames, sends periodic
/// pings, enforces the pong deadline, and emits the final close frame.
pub async fn write_pump(
    mut sink: WsSink,
    mut queue: mpsc::Receiver<Message>,
    close: Arc<Notify>,
    last_pong: Arc<Mutex<Instant>>,
    config: WebSocketConfig,
) {
    let mut ping_interval = tokio::time::interval(config.ping_period());
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // First tick fires immediately; skip it so the first real ping waits a
    // full period.
    ping_interval.tick().await;

    loop {
        tokio::select! {
            biased;

            () = close.notified() => {
                let _ = tokio::time::timeout(
                    config.write_wait(),
                    sink.send(Message::Close(Some(CloseFrame {
                        code: GOING_AWAY,
                        reason: "server shutting down".into(),
                    }))),
                )
                .await;
                return;
            }

            frame = queue.recv() => {
                match frame {
                    Some(message) => {
                        if tokio::time::timeout(config.write_wait(), sink.send(message))
                            .await
                            .is_err()
                        {
                            tracing::warn!("write deadline exceeded, closing connection");
                            return;
                        }
                    }
                    None => return,
                }
            }

            _ = ping_interval.tick() => {
                let elapsed = last_pong.lock().await.elapsed();
                if elapsed > config.pong_wait() {
                    tracing::debug!(?elapsed, "pong deadline exceeded, closing connection");
                    return;
                }
                if tokio::time::timeout(config.write_wait(), sink.send(Message::Ping(Vec::new())))
                    .await
                    .is_err()
                {
                    tracing::warn!("ping write deadline exceeded, closing connection");
                    return;
                }
            }
        }
    }
}
