//! Per-connection client record.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, WriteHalf};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Any bidirectional byte stream a connection can ride on.
pub trait Conn: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> Conn for T {}

/// Boxed connection stream, TLS-wrapped or plain TCP.
pub type BoxedConn = Box<dyn Conn>;

/// State for one live client connection.
///
/// Owns the outbound half of the stream; the inbound half is moved into the
/// connection's reader task. The cancellation token is a child of the
/// server-wide token, so both administrative disconnect and server shutdown
/// wake the reader.
pub struct ClientRecord {
    identity: String,
    writer: Mutex<WriteHalf<BoxedConn>>,
    pub(crate) cancel: CancellationToken,
    disposed: AtomicBool,
    torn_down: AtomicBool,
}

impl ClientRecord {
    pub(crate) fn new(
        identity: String,
        cancel: CancellationToken,
        writer: WriteHalf<BoxedConn>,
    ) -> Self {
        Self {
            identity,
            writer: Mutex::new(writer),
            cancel,
            disposed: AtomicBool::new(false),
            torn_down: AtomicBool::new(false),
        }
    }

    /// The client's `host:port` identity.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Write one serialized frame and flush.
    ///
    /// Callers hold the server-wide send lock; this only guards the write
    /// half against a concurrent writer of the same record.
    pub(crate) async fn write_frame(&self, buf: &[u8]) -> io::Result<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "client disposed",
            ));
        }
        let mut w = self.writer.lock().await;
        tokio::select! {
            _ = self.cancel.cancelled() => Err(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "client disposed",
            )),
            res = async {
                w.write_all(buf).await?;
                w.flush().await
            } => res,
        }
    }

    /// Release the connection. Idempotent; the reader observes the
    /// cancellation and runs its teardown.
    pub(crate) fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::SeqCst) {
            self.cancel.cancel();
        }
    }

    /// Claim the one-shot teardown; false if it already ran.
    pub(crate) fn begin_teardown(&self) -> bool {
        !self.torn_down.swap(true, Ordering::SeqCst)
    }
}
