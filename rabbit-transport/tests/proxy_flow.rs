//! End-to-end tests over loopback TCP
//!
//! A client and a proxy server speak the full protocol: encrypted handshake,
//! target dial, then a bidirectional relay to an upstream echo service.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rabbit_protocol::{AuthType, ConnectType, EncryptionMode, PlainEncryption, ProtocolType};
use rabbit_transport::handshake::{recv_auth, recv_connect, send_message};
use rabbit_transport::{
    read_exact, relay_bidirectional, CancellableConn, CancellableSocket, CancellationToken, Config,
    Conn, CryptSocket, StreamSocket,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const TOKEN: &str = "helloworldJack";

type ProxySocket = CryptSocket<CancellableConn<StreamSocket<TcpStream>>>;

fn test_config() -> Config {
    Config::from_toml(
        r#"
[crypt]
mode = "aes256"
key = "integration-key"
iv = "0123456789abcdef"

[buffer]
size = 2048

[relay]
idle_timeout_secs = 5
"#,
    )
    .unwrap()
}

fn wrap(tcp: TcpStream, config: &Config) -> ProxySocket {
    CryptSocket::new(
        CancellableConn::new(StreamSocket::tcp(tcp, Arc::new(PlainEncryption)).unwrap()),
        config.encryption().unwrap(),
    )
}

/// Upstream service that echoes everything back
async fn spawn_echo() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let (mut r, mut w) = stream.split();
                let _ = tokio::io::copy(&mut r, &mut w).await;
            });
        }
    });
    addr
}

/// Proxy server handling a single client; returns the relay result
async fn spawn_proxy(
    config: Config,
    shutdown: CancellationToken,
) -> (SocketAddr, tokio::task::JoinHandle<io::Result<(u64, u64)>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let pool = config.buffer_pool();
        let (tcp, _) = listener.accept().await?;
        let socket = wrap(tcp, &config);
        let peer = socket.get_ref().get_ref().peer_addr().unwrap();
        assert!(peer.ip().is_loopback());
        let client = (&socket).with_cancel(shutdown);

        let auth = match recv_auth(&client, &pool).await {
            Ok(auth) if auth.token == TOKEN => auth,
            _ => {
                client.close().await?;
                return Err(io::Error::new(io::ErrorKind::PermissionDenied, "bad auth"));
            }
        };
        assert!(!auth.is_mux());

        let target = match recv_connect(&client, &pool).await {
            Ok(target) => target,
            Err(_) => {
                client.close().await?;
                return Err(io::Error::new(io::ErrorKind::InvalidData, "bad target"));
            }
        };
        assert_eq!(target.protocol, ProtocolType::Tcp);

        let upstream = StreamSocket::plain(TcpStream::connect(target.target()).await?);
        relay_bidirectional(&client, &upstream, &pool, config.idle_timeout()).await
    });

    (addr, handle)
}

#[tokio::test]
async fn test_proxy_round_trip() {
    let config = test_config();
    let echo = spawn_echo().await;
    let (proxy, server) = spawn_proxy(config.clone(), CancellationToken::new()).await;

    let pool = config.buffer_pool();
    let socket = wrap(TcpStream::connect(proxy).await.unwrap(), &config);
    let client = (&socket).with_cancel(CancellationToken::new());

    send_message(&client, &pool, &AuthType::new(TOKEN)).await.unwrap();
    send_message(&client, &pool, &ConnectType::from_socket_addr(ProtocolType::Tcp, echo))
        .await
        .unwrap();

    for msg in [&b"first request"[..], b"second", &[0xABu8; 3000][..]] {
        let mut out = msg.to_vec();
        client.write(&mut out).await.unwrap();

        let mut back = vec![0u8; msg.len()];
        read_exact(&client, &mut back).await.unwrap();
        assert_eq!(back, msg);
    }

    client.close().await.unwrap();
    let (up, down) = tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(up, 13 + 6 + 3000);
    assert_eq!(down, 13 + 6 + 3000);
}

#[tokio::test]
async fn test_wrong_token_closes_connection() {
    let config = test_config();
    let (proxy, server) = spawn_proxy(config.clone(), CancellationToken::new()).await;

    let pool = config.buffer_pool();
    let socket = wrap(TcpStream::connect(proxy).await.unwrap(), &config);
    let client = (&socket).with_cancel(CancellationToken::new());
    send_message(&client, &pool, &AuthType::new("intruder")).await.unwrap();

    let err = server.await.unwrap().unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);

    let mut buf = [0u8; 8];
    assert_eq!(client.read(&mut buf).await.unwrap(), 0);
}

#[tokio::test]
async fn test_garbage_handshake_rejected() {
    let config = test_config();
    let (proxy, server) = spawn_proxy(config, CancellationToken::new()).await;

    // Unencrypted bytes decrypt to noise on the server side
    let mut raw = TcpStream::connect(proxy).await.unwrap();
    raw.write_all(&[0x00, 0x03, b'a', b'b', b'c', 0x00]).await.unwrap();
    raw.write_all(&[0xFF; 512]).await.unwrap();

    let res = tokio::time::timeout(Duration::from_secs(5), server).await.unwrap().unwrap();
    assert!(res.is_err());

    let mut rest = Vec::new();
    let _ = raw.read_to_end(&mut rest).await;
}

#[tokio::test]
async fn test_shutdown_token_stops_relay() {
    let config = test_config();
    let echo = spawn_echo().await;
    let shutdown = CancellationToken::new();
    let (proxy, server) = spawn_proxy(config.clone(), shutdown.clone()).await;

    let pool = config.buffer_pool();
    let socket = wrap(TcpStream::connect(proxy).await.unwrap(), &config);
    let client = (&socket).with_cancel(CancellationToken::new());
    send_message(&client, &pool, &AuthType::new(TOKEN)).await.unwrap();
    send_message(&client, &pool, &ConnectType::from_socket_addr(ProtocolType::Tcp, echo))
        .await
        .unwrap();

    let mut ping = *b"ping";
    client.write(&mut ping).await.unwrap();
    let mut pong = [0u8; 4];
    read_exact(&client, &mut pong).await.unwrap();
    assert_eq!(&pong, b"ping");

    // The client goes quiet; only the shutdown token can end the relay now
    shutdown.cancel();
    let res = tokio::time::timeout(Duration::from_secs(2), server)
        .await
        .expect("relay should stop promptly")
        .unwrap();
    assert_eq!(res.unwrap_err().kind(), io::ErrorKind::TimedOut);

    let mut buf = [0u8; 4];
    assert_eq!(client.read(&mut buf).await.unwrap(), 0);
}

#[tokio::test]
async fn test_plain_mode_interoperates_with_raw_tcp() {
    let config = Config::from_toml("[crypt]\nmode = \"plain\"\n").unwrap();
    assert_eq!(config.crypt.mode().unwrap(), EncryptionMode::Plain);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
        let (mut tcp, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 8];
        tcp.read_exact(&mut buf).await.unwrap();
        buf
    });

    let pool = config.buffer_pool();
    let socket = wrap(TcpStream::connect(addr).await.unwrap(), &config);
    let client = (&socket).with_cancel(CancellationToken::new());
    send_message(&client, &pool, &ConnectType::tcp("10.0.0.1", 8080)).await.unwrap();

    let wire = server.await.unwrap();
    assert_eq!(wire, [0x01, 0x01, 10, 0, 0, 1, 0x1F, 0x90]);
}
