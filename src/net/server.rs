//! Framed message server.
//!
//! Accepts TCP connections, optionally terminates TLS and runs a
//! shared-secret handshake, keeps live clients in a registry, and lets the
//! caller push messages to individual clients, enumerate them, and force
//! disconnects. One long-running acceptor task plus one reader task per
//! connection; all outbound writes are serialized through a single
//! server-wide lock.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock};
use std::time::Duration;

use log::*;
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::common::error::ConfigError;
use crate::config::Config;
use crate::metrics::METRICS;
use crate::protocol::{Message, Status};

use super::client::{BoxedConn, ClientRecord};
use super::reader;
use super::registry::Registry;
use super::tls;

/// Invoked on a detached task when a client completes connection setup.
pub type ConnectedCallback = Arc<dyn Fn(String) + Send + Sync>;
/// Invoked on a detached task after a client's teardown.
pub type DisconnectedCallback = Arc<dyn Fn(String) + Send + Sync>;
/// Invoked on a detached task for each dispatched message, with the client
/// identity and the payload bytes.
pub type MessageCallback = Arc<dyn Fn(String, Vec<u8>) + Send + Sync>;

/// Cadence of the unauthenticated-grace sweeper.
const GRACE_SWEEP_INTERVAL: Duration = Duration::from_millis(250);

/// Framed message-passing TCP server.
///
/// Cheap to clone; clones share the same server. Shutdown is explicit via
/// [`Server::shutdown`] and idempotent.
#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

pub(crate) struct ServerInner {
    pub(crate) cfg: Config,
    /// Non-empty shared secret, or `None` when the auth gate is disabled.
    pub(crate) secret: Option<String>,
    allow: Vec<IpAddr>,
    tls: Option<tokio_rustls::TlsAcceptor>,
    pub(crate) registry: Registry,
    /// The single server-wide send lock; every outbound write holds it.
    send_gate: Semaphore,
    cancel: CancellationToken,
    tracker: TaskTracker,
    pub(crate) active_clients: AtomicU64,
    started: AtomicBool,
    disposed: AtomicBool,
    local_addr: StdMutex<Option<SocketAddr>>,
    handle: StdMutex<Option<Handle>>,
    on_connected: RwLock<Option<ConnectedCallback>>,
    on_disconnected: RwLock<Option<DisconnectedCallback>>,
    on_message: RwLock<Option<MessageCallback>>,
}

impl Server {
    /// Construct a server from configuration.
    ///
    /// Fails on invalid configuration (zero port, TLS without an identity,
    /// unparseable allow-list entries) or unreadable certificate material.
    pub fn new(cfg: Config) -> Result<Self, ConfigError> {
        cfg.validate()?;

        let mut allow = Vec::with_capacity(cfg.allow_ips.len());
        for ip in &cfg.allow_ips {
            allow.push(
                ip.parse::<IpAddr>()
                    .map_err(|_| ConfigError::BadAllowIp(ip.clone()))?,
            );
        }

        let tls_acceptor = if cfg.tls.enabled {
            Some(tls::build_tls_acceptor(&cfg.tls)?)
        } else {
            None
        };

        let secret = if cfg.auth.shared_secret.is_empty() {
            None
        } else {
            Some(cfg.auth.shared_secret.clone())
        };

        Ok(Self {
            inner: Arc::new(ServerInner {
                cfg,
                secret,
                allow,
                tls: tls_acceptor,
                registry: Registry::new(),
                send_gate: Semaphore::new(1),
                cancel: CancellationToken::new(),
                tracker: TaskTracker::new(),
                active_clients: AtomicU64::new(0),
                started: AtomicBool::new(false),
                disposed: AtomicBool::new(false),
                local_addr: StdMutex::new(None),
                handle: StdMutex::new(None),
                on_connected: RwLock::new(None),
                on_disconnected: RwLock::new(None),
                on_message: RwLock::new(None),
            }),
        })
    }

    /// Set the handler fired after a client completes connection setup.
    pub fn on_client_connected(&self, cb: impl Fn(String) + Send + Sync + 'static) {
        *self.inner.on_connected.write().unwrap() = Some(Arc::new(cb));
    }

    /// Set the handler fired after a client's teardown.
    pub fn on_client_disconnected(&self, cb: impl Fn(String) + Send + Sync + 'static) {
        *self.inner.on_disconnected.write().unwrap() = Some(Arc::new(cb));
    }

    /// Set the handler for inbound payloads.
    ///
    /// Invoked on a detached task per message, so a slow handler never
    /// stalls the connection; a handler that needs strict per-connection
    /// ordering must sequence messages itself.
    pub fn on_message_received(&self, cb: impl Fn(String, Vec<u8>) + Send + Sync + 'static) {
        *self.inner.on_message.write().unwrap() = Some(Arc::new(cb));
    }

    /// Bind the listener and start accepting connections.
    ///
    /// Returns the bound local address.
    pub async fn start(&self) -> io::Result<SocketAddr> {
        if self.inner.disposed.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "server disposed"));
        }
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "server already started",
            ));
        }

        let listener = TcpListener::bind(self.inner.cfg.bind_addr()).await?;
        let local = listener.local_addr()?;
        *self.inner.local_addr.lock().unwrap() = Some(local);
        *self.inner.handle.lock().unwrap() = Some(Handle::current());

        info!(
            "listening on {} (TLS={}, auth={})",
            local,
            self.inner.tls.is_some(),
            self.inner.secret.is_some()
        );

        self.inner
            .tracker
            .spawn(accept_loop(Arc::clone(&self.inner), listener));

        if self.inner.secret.is_some() && self.inner.cfg.auth.grace_ms > 0 {
            self.inner
                .tracker
                .spawn(grace_sweeper(Arc::clone(&self.inner)));
        }

        Ok(local)
    }

    /// The bound address, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.inner.local_addr.lock().unwrap()
    }

    /// Send a payload to one client as a `Normal` message.
    ///
    /// False when the client is unknown or the write fails; a failed write
    /// never tears the connection down here, the reader notices on its next
    /// read.
    pub async fn send(&self, identity: &str, payload: impl Into<Vec<u8>>) -> bool {
        self.send_message(identity, Message::normal(payload.into()))
            .await
    }

    /// Send a pre-built message to one client.
    pub async fn send_message(&self, identity: &str, msg: Message) -> bool {
        let Some(record) = self.inner.registry.get(identity) else {
            warn!("send to unknown client {}", identity);
            return false;
        };

        match self.inner.send_to_record(&record, &msg).await {
            Ok(()) => {
                METRICS.sent_msgs.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(e) => {
                warn!("{}: send failed: {}", identity, e);
                METRICS.send_failures.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Blocking variant of [`Server::send`] for synchronous callers.
    ///
    /// Panics when called from an async context, like tokio's own
    /// `blocking_*` entry points.
    pub fn blocking_send(&self, identity: &str, payload: impl Into<Vec<u8>>) -> bool {
        self.blocking_send_message(identity, Message::normal(payload.into()))
    }

    /// Blocking variant of [`Server::send_message`].
    pub fn blocking_send_message(&self, identity: &str, msg: Message) -> bool {
        let handle = { self.inner.handle.lock().unwrap().clone() };
        let Some(handle) = handle else {
            warn!("send before server start");
            return false;
        };
        handle.block_on(self.send_message(identity, msg))
    }

    /// Whether a client with this identity is currently connected.
    pub fn is_client_connected(&self, identity: &str) -> bool {
        self.inner.registry.contains(identity)
    }

    /// Snapshot of connected client identities; order unspecified.
    pub fn list_clients(&self) -> Vec<String> {
        self.inner.registry.identities()
    }

    /// Number of live client connections.
    pub fn active_clients(&self) -> u64 {
        self.inner.active_clients.load(Ordering::SeqCst)
    }

    /// Forcibly disconnect one client. The reader observes the closure and
    /// runs its teardown; false if the identity is unknown.
    pub fn disconnect_client(&self, identity: &str) -> bool {
        match self.inner.registry.get(identity) {
            Some(record) => {
                info!("{}: administrative disconnect", identity);
                record.dispose();
                true
            }
            None => {
                warn!("disconnect for unknown client {}", identity);
                false
            }
        }
    }

    /// Stop accepting, dispose every live client, and wait until all
    /// connection tasks have finished. Idempotent.
    pub async fn shutdown(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        info!("shutting down");
        self.inner.cancel.cancel();
        self.inner.send_gate.close();

        for record in self.inner.registry.records() {
            record.dispose();
        }

        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        debug!("all connection tasks finished");
    }
}

impl ServerInner {
    fn ip_allowed(&self, ip: IpAddr) -> bool {
        self.allow.is_empty() || self.allow.contains(&ip)
    }

    /// Serialize and write one message under the server-wide send lock.
    pub(crate) async fn send_to_record(
        &self,
        record: &ClientRecord,
        msg: &Message,
    ) -> io::Result<()> {
        let frame = msg.serialize();
        let _permit = self
            .send_gate
            .acquire()
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::NotConnected, "server disposed"))?;
        record.write_frame(&frame).await
    }

    pub(crate) fn connected_callback(&self) -> Option<ConnectedCallback> {
        self.on_connected.read().unwrap().clone()
    }

    pub(crate) fn disconnected_callback(&self) -> Option<DisconnectedCallback> {
        self.on_disconnected.read().unwrap().clone()
    }

    pub(crate) fn message_callback(&self) -> Option<MessageCallback> {
        self.on_message.read().unwrap().clone()
    }
}

/// Accept connections until cancelled. One accept failure never stops the
/// loop; the listener closes when the loop returns.
async fn accept_loop(inner: Arc<ServerInner>, listener: TcpListener) {
    loop {
        let (socket, peer) = tokio::select! {
            _ = inner.cancel.cancelled() => break,
            res = listener.accept() => match res {
                Ok(pair) => pair,
                Err(e) => {
                    error!("accept: {}", e);
                    continue;
                }
            },
        };

        if let Err(e) = socket.set_nodelay(true) {
            warn!("failed to set TCP_NODELAY: {}", e);
        }
        if let Err(e) = socket.set_linger(None) {
            warn!("failed to clear SO_LINGER: {}", e);
        }

        if !inner.ip_allowed(peer.ip()) {
            warn!("{}: IP not permitted; closing", peer);
            METRICS.rejected_ips.fetch_add(1, Ordering::Relaxed);
            drop(socket);
            continue;
        }

        METRICS.accepted_conns.fetch_add(1, Ordering::Relaxed);
        inner
            .tracker
            .spawn(init_connection(Arc::clone(&inner), socket, peer));
    }
    debug!("acceptor stopped");
}

/// One-shot connection setup: TLS handshake and policy check, registry
/// insertion, auth prompt, connected callback, reader spawn. Any failure
/// before the reader starts releases the socket by dropping it.
async fn init_connection(inner: Arc<ServerInner>, socket: TcpStream, peer: SocketAddr) {
    let identity = peer.to_string();

    let stream: BoxedConn = match &inner.tls {
        Some(acceptor) => {
            let hs = Duration::from_millis(inner.cfg.limits.tls_handshake_timeout_ms);
            let accepted = tokio::select! {
                _ = inner.cancel.cancelled() => return,
                res = timeout(hs, acceptor.accept(socket)) => res,
            };
            match accepted {
                Ok(Ok(tls_stream)) => {
                    if let Err(e) = tls::verify_policy(&tls_stream, &inner.cfg.tls) {
                        warn!("{}: TLS policy: {}", identity, e);
                        METRICS.tls_failures.fetch_add(1, Ordering::Relaxed);
                        return;
                    }
                    debug!("{}: TLS handshake completed", identity);
                    Box::new(tls_stream)
                }
                Ok(Err(e)) => {
                    if tls::is_benign_handshake_error(&e) {
                        debug!("{}: TLS handshake failed: {}", identity, e);
                    } else {
                        warn!("{}: TLS handshake failed: {}", identity, e);
                    }
                    METRICS.tls_failures.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                Err(_) => {
                    debug!("{}: TLS handshake timeout", identity);
                    METRICS.tls_failures.fetch_add(1, Ordering::Relaxed);
                    return;
                }
            }
        }
        None => Box::new(socket),
    };

    let (read_half, write_half) = tokio::io::split(stream);
    let record = Arc::new(ClientRecord::new(
        identity.clone(),
        inner.cancel.child_token(),
        write_half,
    ));

    if let Some(old) = inner.registry.insert(Arc::clone(&record)) {
        debug!("{}: displacing stale record", identity);
        old.dispose();
    }
    inner.active_clients.fetch_add(1, Ordering::SeqCst);

    if inner.secret.is_some() {
        inner.registry.mark_unauthenticated(&identity);
        let prompt = Message::with_status(
            Status::AuthRequired,
            reader::AUTH_REQUIRED_PROMPT.to_vec(),
        );
        if let Err(e) = inner.send_to_record(&record, &prompt).await {
            debug!("{}: auth prompt failed: {}", identity, e);
        }
    }

    if let Some(cb) = inner.connected_callback() {
        let id = identity.clone();
        tokio::spawn(async move { cb(id) });
    }

    debug!("{}: connected", identity);
    inner
        .tracker
        .spawn(reader::run(Arc::clone(&inner), record, read_half));
}

/// Periodically drop clients that sat unauthenticated past the grace period.
async fn grace_sweeper(inner: Arc<ServerInner>) {
    let grace = inner.cfg.auth.grace_ms;
    let mut tick = tokio::time::interval(GRACE_SWEEP_INTERVAL);

    loop {
        tokio::select! {
            _ = inner.cancel.cancelled() => break,
            _ = tick.tick() => {
                for identity in inner.registry.expired_unauthenticated(grace) {
                    if let Some(record) = inner.registry.get(&identity) {
                        info!("{}: unauthenticated past grace period; disconnecting", identity);
                        record.dispose();
                    }
                }
            }
        }
    }
}
