//! Per-connection read loop.
//!
//! Drives framed reads against one client, enforces the shared-secret gate,
//! hands payloads to the caller's message handler, and on any exit runs the
//! teardown sequence exactly once: counter decrement, registry and
//! unauthenticated-set removal, disconnect callback, record disposal.

use std::io;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use log::*;
use tokio::io::ReadHalf;

use crate::metrics::METRICS;
use crate::protocol::{Message, Status};

use super::client::{BoxedConn, ClientRecord};
use super::server::ServerInner;

pub(crate) const AUTH_REQUIRED_PROMPT: &[u8] = b"Authentication required";
const AUTH_SUCCESS_REPLY: &[u8] = b"Authentication successful";
const AUTH_DECLINED_REPLY: &[u8] = b"Authentication declined";
const AUTH_NO_MATERIAL_REPLY: &[u8] = b"No authentication material";

/// Read loop for one connection. Exits on peer close, read failure, or
/// cancellation (administrative disconnect and server shutdown both cancel
/// the record's token).
pub(crate) async fn run(
    inner: Arc<ServerInner>,
    record: Arc<ClientRecord>,
    mut read_half: ReadHalf<BoxedConn>,
) {
    let identity = record.identity().to_string();
    let max_frame = inner.cfg.limits.max_frame_bytes;

    loop {
        let msg = tokio::select! {
            _ = record.cancel.cancelled() => {
                debug!("{}: connection cancelled", identity);
                break;
            }
            res = Message::read_from(&mut read_half, max_frame) => match res {
                Ok(m) => m,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    debug!("{}: peer closed connection", identity);
                    break;
                }
                Err(e) => {
                    debug!("{}: read failed: {}", identity, e);
                    break;
                }
            },
        };

        if let Some(secret) = inner.secret.as_deref() {
            if inner.registry.is_unauthenticated(&identity) {
                handle_auth(&inner, &record, &identity, secret, msg).await;
                continue;
            }
        }

        METRICS.dispatched_msgs.fetch_add(1, Ordering::Relaxed);
        if let Some(cb) = inner.message_callback() {
            let id = identity.clone();
            let payload = msg.payload;
            tokio::spawn(async move { cb(id, payload) });
        }
    }

    teardown(&inner, &record, &identity);
}

/// Shared-secret gate for one inbound message. Nothing here reaches the
/// message handler; the client either advances past the gate or is answered
/// with a failure or a fresh prompt.
async fn handle_auth(
    inner: &Arc<ServerInner>,
    record: &Arc<ClientRecord>,
    identity: &str,
    secret: &str,
    msg: Message,
) {
    let reply = match msg.status {
        Status::AuthRequired if !msg.auth_data.is_empty() => {
            match std::str::from_utf8(&msg.auth_data) {
                Ok(material) if material.trim() == secret.trim() => {
                    inner.registry.clear_unauthenticated(identity);
                    METRICS.auth_successes.fetch_add(1, Ordering::Relaxed);
                    info!("{}: authenticated", identity);
                    Message::with_status(Status::AuthSuccess, AUTH_SUCCESS_REPLY.to_vec())
                }
                _ => {
                    METRICS.auth_failures.fetch_add(1, Ordering::Relaxed);
                    warn!("{}: authentication declined", identity);
                    Message::with_status(Status::AuthFailure, AUTH_DECLINED_REPLY.to_vec())
                }
            }
        }
        Status::AuthRequired => {
            METRICS.auth_failures.fetch_add(1, Ordering::Relaxed);
            warn!("{}: no authentication material", identity);
            Message::with_status(Status::AuthFailure, AUTH_NO_MATERIAL_REPLY.to_vec())
        }
        _ => {
            debug!("{}: message before authentication; re-prompting", identity);
            Message::with_status(Status::AuthRequired, AUTH_REQUIRED_PROMPT.to_vec())
        }
    };

    if let Err(e) = inner.send_to_record(record, &reply).await {
        debug!("{}: auth reply failed: {}", identity, e);
    }
}

/// Teardown for one record; a no-op on the second call.
fn teardown(inner: &Arc<ServerInner>, record: &Arc<ClientRecord>, identity: &str) {
    if !record.begin_teardown() {
        return;
    }

    inner.active_clients.fetch_sub(1, Ordering::SeqCst);
    METRICS.disconnects.fetch_add(1, Ordering::Relaxed);

    // A record displaced by a reconnect is no longer current; its
    // replacement owns the unauthenticated entry.
    if inner.registry.remove_if_current(identity, record) {
        inner.registry.clear_unauthenticated(identity);
    }

    if let Some(cb) = inner.disconnected_callback() {
        let id = identity.to_string();
        tokio::spawn(async move { cb(id) });
    }

    record.dispose();
    debug!("{}: disconnected", identity);
}
