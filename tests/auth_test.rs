//! Shared-secret handshake tests over real sockets.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tokio::time::{sleep, timeout};

use perun::config::{Auth, Config, Listen};
use perun::Server;

const STATUS_NORMAL: u8 = 0x00;
const STATUS_AUTH_REQUIRED: u8 = 0x01;
const STATUS_AUTH_SUCCESS: u8 = 0x02;
const STATUS_AUTH_FAILURE: u8 = 0x03;

fn config(port: u16, secret: &str) -> Config {
    Config {
        listen: Listen {
            ip: "127.0.0.1".into(),
            port,
        },
        auth: Auth {
            shared_secret: secret.into(),
            grace_ms: 0,
        },
        ..Default::default()
    }
}

fn server_with_messages(cfg: Config) -> (Server, UnboundedReceiver<(String, Vec<u8>)>) {
    let server = Server::new(cfg).expect("valid config");
    let (tx, rx) = unbounded_channel();
    server.on_message_received(move |id, payload| {
        let _ = tx.send((id, payload));
    });
    (server, rx)
}

// Minimal frame encoder matching perun's wire format
fn frame(status: u8, auth: &[u8], payload: &[u8]) -> Vec<u8> {
    let body = 1 + 4 + auth.len() + 4 + payload.len();
    let mut buf = Vec::with_capacity(4 + body);
    buf.extend_from_slice(&(body as u32).to_be_bytes());
    buf.push(status);
    buf.extend_from_slice(&(auth.len() as u32).to_le_bytes());
    buf.extend_from_slice(auth);
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(payload);
    buf
}

async fn read_frame<R: AsyncReadExt + Unpin>(r: &mut R) -> std::io::Result<(u8, Vec<u8>, Vec<u8>)> {
    let mut head = [0u8; 4];
    r.read_exact(&mut head).await?;
    let len = u32::from_be_bytes(head) as usize;
    let mut body = vec![0u8; len];
    r.read_exact(&mut body).await?;

    let status = body[0];
    let alen = u32::from_le_bytes(body[1..5].try_into().unwrap()) as usize;
    let auth = body[5..5 + alen].to_vec();
    let poff = 5 + alen;
    let plen = u32::from_le_bytes(body[poff..poff + 4].try_into().unwrap()) as usize;
    let payload = body[poff + 4..poff + 4 + plen].to_vec();

    Ok((status, auth, payload))
}

async fn expect_frame<R: AsyncReadExt + Unpin>(r: &mut R) -> (u8, Vec<u8>, Vec<u8>) {
    timeout(Duration::from_secs(5), read_frame(r))
        .await
        .expect("timed out waiting for frame")
        .expect("read failed")
}

#[tokio::test]
async fn test_shared_secret_happy_path() {
    let (server, mut rx) = server_with_messages(config(19021, "s3cr3t"));
    server.start().await.unwrap();

    let mut client = TcpStream::connect("127.0.0.1:19021").await.unwrap();

    // Unprompted clients are challenged first.
    let (status, _auth, payload) = expect_frame(&mut client).await;
    assert_eq!(status, STATUS_AUTH_REQUIRED);
    assert_eq!(payload, b"Authentication required");

    client
        .write_all(&frame(STATUS_AUTH_REQUIRED, b"s3cr3t", &[]))
        .await
        .unwrap();
    let (status, _auth, payload) = expect_frame(&mut client).await;
    assert_eq!(status, STATUS_AUTH_SUCCESS);
    assert_eq!(payload, b"Authentication successful");

    // Data now reaches the handler.
    client
        .write_all(&frame(STATUS_NORMAL, &[], &[0xAA]))
        .await
        .unwrap();
    let (_id, payload) = timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("message not dispatched")
        .unwrap();
    assert_eq!(payload, vec![0xAA]);

    server.shutdown().await;
}

#[tokio::test]
async fn test_shared_secret_mismatch_keeps_gate_closed() {
    let (server, mut rx) = server_with_messages(config(19022, "s3cr3t"));
    server.start().await.unwrap();

    let mut client = TcpStream::connect("127.0.0.1:19022").await.unwrap();
    let (status, ..) = expect_frame(&mut client).await;
    assert_eq!(status, STATUS_AUTH_REQUIRED);

    client
        .write_all(&frame(STATUS_AUTH_REQUIRED, b"wrong", &[]))
        .await
        .unwrap();
    let (status, _auth, payload) = expect_frame(&mut client).await;
    assert_eq!(status, STATUS_AUTH_FAILURE);
    assert_eq!(payload, b"Authentication declined");

    // A data message before authentication only draws a fresh prompt.
    client
        .write_all(&frame(STATUS_NORMAL, &[], &[0x01]))
        .await
        .unwrap();
    let (status, _auth, payload) = expect_frame(&mut client).await;
    assert_eq!(status, STATUS_AUTH_REQUIRED);
    assert_eq!(payload, b"Authentication required");

    sleep(Duration::from_millis(100)).await;
    assert!(rx.try_recv().is_err(), "nothing may be dispatched before auth");

    server.shutdown().await;
}

#[tokio::test]
async fn test_missing_auth_material() {
    let (server, _rx) = server_with_messages(config(19023, "s3cr3t"));
    server.start().await.unwrap();

    let mut client = TcpStream::connect("127.0.0.1:19023").await.unwrap();
    let (status, ..) = expect_frame(&mut client).await;
    assert_eq!(status, STATUS_AUTH_REQUIRED);

    client
        .write_all(&frame(STATUS_AUTH_REQUIRED, &[], &[]))
        .await
        .unwrap();
    let (status, _auth, payload) = expect_frame(&mut client).await;
    assert_eq!(status, STATUS_AUTH_FAILURE);
    assert_eq!(payload, b"No authentication material");

    server.shutdown().await;
}

#[tokio::test]
async fn test_auth_material_is_trimmed() {
    let (server, _rx) = server_with_messages(config(19024, "s3cr3t"));
    server.start().await.unwrap();

    let mut client = TcpStream::connect("127.0.0.1:19024").await.unwrap();
    let (status, ..) = expect_frame(&mut client).await;
    assert_eq!(status, STATUS_AUTH_REQUIRED);

    client
        .write_all(&frame(STATUS_AUTH_REQUIRED, b"  s3cr3t\n", &[]))
        .await
        .unwrap();
    let (status, ..) = expect_frame(&mut client).await;
    assert_eq!(status, STATUS_AUTH_SUCCESS);

    server.shutdown().await;
}

#[tokio::test]
async fn test_no_secret_skips_gate() {
    let (server, mut rx) = server_with_messages(config(19025, ""));
    server.start().await.unwrap();

    let mut client = TcpStream::connect("127.0.0.1:19025").await.unwrap();

    // No prompt arrives without a configured secret.
    let mut head = [0u8; 4];
    assert!(
        timeout(Duration::from_millis(300), client.read(&mut head))
            .await
            .is_err(),
        "server must not prompt when auth is disabled"
    );

    client
        .write_all(&frame(STATUS_NORMAL, &[], &[0xBB]))
        .await
        .unwrap();
    let (_id, payload) = timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("message not dispatched")
        .unwrap();
    assert_eq!(payload, vec![0xBB]);

    server.shutdown().await;
}

#[tokio::test]
async fn test_unauthenticated_grace_expiry() {
    let mut cfg = config(19026, "s3cr3t");
    cfg.auth.grace_ms = 300;
    let (server, _rx) = server_with_messages(cfg);
    server.start().await.unwrap();

    let mut client = TcpStream::connect("127.0.0.1:19026").await.unwrap();
    let (status, ..) = expect_frame(&mut client).await;
    assert_eq!(status, STATUS_AUTH_REQUIRED);

    // Never authenticate; the sweeper drops the connection.
    let mut buf = [0u8; 16];
    let start = std::time::Instant::now();
    loop {
        match timeout(Duration::from_secs(5), client.read(&mut buf))
            .await
            .expect("unauthenticated client never dropped")
        {
            Ok(0) | Err(_) => break,
            Ok(_) => continue,
        }
    }
    assert!(start.elapsed() < Duration::from_secs(3));
    for _ in 0..200 {
        if server.list_clients().is_empty() {
            break;
        }
        sleep(Duration::from_millis(25)).await;
    }
    assert!(server.list_clients().is_empty());

    server.shutdown().await;
}
