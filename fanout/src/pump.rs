//! Per-connection reader and writer loops.
//!
//! The writer drains the connection's outbound queue onto the transport. The
//! reader exists only to notice the peer going away: inbound frames are never
//! interpreted. Either loop may tear the connection down; deregistration is
//! idempotent so it does not matter which one gets there first.

use crate::connection::{ConnectionId, Outbox};
use crate::manager::Manager;
use crate::Payload;
use axum::extract::ws::{Message, WebSocket};
use futures::{Sink, SinkExt, Stream, StreamExt};
use log::*;
use std::fmt::Display;
use std::sync::Arc;

/// Serve one upgraded WebSocket until either side closes it.
pub async fn serve(socket: WebSocket, manager: Arc<Manager>) {
    let (mut sink, stream) = socket.split();

    let (connection_id, outbox) = match manager.open_connection() {
        Ok(opened) => opened,
        Err(e) => {
            warn!("Refusing live connection: {e}");
            let _ = sink.send(Message::Close(None)).await;
            return;
        }
    };

    let writer = tokio::spawn(write_loop(
        connection_id.clone(),
        sink,
        outbox,
        manager.clone(),
    ));
    let reader = tokio::spawn(read_loop(connection_id.clone(), stream, manager.clone()));

    // The writer always finishes: deregistration closes the queue and fires the
    // termination signal, and a failed write ends it directly. A peer that never
    // sends anything would otherwise keep the reader parked forever.
    if let Err(e) = writer.await {
        error!("Writer for live connection {connection_id} panicked: {e}");
    }
    reader.abort();
    manager.unregister_connection(&connection_id);
    debug!("Live connection {connection_id} finished");
}

/// Text frame for UTF-8 payloads (JSON in practice), binary frame otherwise.
/// Frames own their buffer, so this is the one copy made per connection.
fn frame(payload: Payload) -> Message {
    match std::str::from_utf8(&payload) {
        Ok(text) => Message::Text(text.to_owned()),
        Err(_) => Message::Binary(payload.to_vec()),
    }
}

/// Write every queued payload to `sink`. On queue closure sends a close frame;
/// on a write failure deregisters the connection. Consumes the transport half
/// either way so it is released when this returns.
///
/// Once the connection is deregistered a write that cannot complete right away
/// is abandoned, so a peer that stopped reading cannot pin the writer.
pub async fn write_loop<S>(
    connection_id: ConnectionId,
    mut sink: S,
    mut outbox: Outbox,
    manager: Arc<Manager>,
) where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    while let Some(payload) = outbox.recv().await {
        let sent = tokio::select! {
            biased;
            sent = sink.send(frame(payload)) => sent,
            _ = outbox.terminated() => {
                debug!("Abandoning blocked write to live connection {connection_id}");
                return;
            }
        };

        if let Err(e) = sent {
            debug!("Write to live connection {connection_id} failed: {e}");
            manager.unregister_connection(&connection_id);
            return;
        }
    }

    trace!("Outbound queue for live connection {connection_id} closed");
    let goodbye = async {
        let _ = sink.send(Message::Close(None)).await;
        let _ = sink.close().await;
    };
    tokio::select! {
        biased;
        _ = goodbye => {}
        _ = outbox.terminated() => {}
    }
}

/// Block on inbound frames until the peer closes or the transport errors, then
/// deregister the connection.
pub async fn read_loop<R, E>(connection_id: ConnectionId, mut stream: R, manager: Arc<Manager>)
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Close(_)) => {
                debug!("Live connection {connection_id} closed by peer");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                debug!("Live connection {connection_id} read error: {e}");
                break;
            }
        }
    }

    manager.unregister_connection(&connection_id);
}
