//! End-to-end handler tests: real listeners, real SOCKS5 sessions, chains
//! dialing through our own server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use kubetun_chain::socks5::{
    self, AUTH_FAILURE, AUTH_VERSION, CMD_UDP_ASSOCIATE, METHOD_USER_PASS, REPLY_SUCCEEDED,
    VERSION,
};
use kubetun_chain::{Chain, Credentials, Node};
use kubetun_handler::{HandlerOptions, Server};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .with_test_writer()
        .try_init();
}

struct TcpEchoServer {
    addr: SocketAddr,
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

impl TcpEchoServer {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let shutdown_task = shutdown.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    res = listener.accept() => {
                        if let Ok((mut stream, _)) = res {
                            tokio::spawn(async move {
                                let mut buf = [0u8; 4096];
                                loop {
                                    match stream.read(&mut buf).await {
                                        Ok(0) | Err(_) => break,
                                        Ok(n) => {
                                            if stream.write_all(&buf[..n]).await.is_err() {
                                                break;
                                            }
                                        }
                                    }
                                }
                            });
                        }
                    }
                    _ = shutdown_task.cancelled() => break,
                }
            }
        });
        Self {
            addr,
            shutdown,
            handle,
        }
    }

    async fn stop(self) {
        self.shutdown.cancel();
        let _ = self.handle.await;
    }
}

async fn start_handler(options: HandlerOptions) -> (SocketAddr, CancellationToken) {
    let server = Server::bind(options).await.unwrap();
    let addr = server.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    let serve_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let _ = server.serve(serve_shutdown).await;
    });
    (addr, shutdown)
}

fn open_options() -> HandlerOptions {
    HandlerOptions::builder()
        .addr("127.0.0.1:0")
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}

#[tokio::test]
async fn connect_round_trip_no_auth() {
    init_tracing();
    let echo = TcpEchoServer::start().await;
    let (proxy_addr, shutdown) = start_handler(open_options()).await;

    let mut stream = TcpStream::connect(proxy_addr).await.unwrap();
    socks5::client_handshake(
        &mut stream,
        socks5::CMD_CONNECT,
        &echo.addr.to_string(),
        None,
    )
    .await
    .unwrap();

    stream.write_all(b"through the tunnel").await.unwrap();
    let mut buf = [0u8; 18];
    stream.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"through the tunnel");

    shutdown.cancel();
    echo.stop().await;
}

#[tokio::test]
async fn connect_through_chained_upstream() {
    init_tracing();
    let echo = TcpEchoServer::start().await;

    // Upstream hop: a second instance of our own handler.
    let (upstream_addr, upstream_shutdown) = start_handler(open_options()).await;

    let node = Arc::new(Node::from_url(&format!("socks5://{upstream_addr}")).unwrap());
    let chain = Chain::with_nodes(vec![node]);

    let outbound = chain.dial("tcp", &echo.addr.to_string()).await.unwrap();
    let mut stream = outbound.into_stream().unwrap();

    stream.write_all(b"chained").await.unwrap();
    let mut buf = [0u8; 7];
    stream.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"chained");

    upstream_shutdown.cancel();
    echo.stop().await;
}

#[tokio::test]
async fn userpass_round_trip_and_single_rejection() {
    init_tracing();
    let echo = TcpEchoServer::start().await;
    let options = HandlerOptions::builder()
        .addr("127.0.0.1:0")
        .timeout(Duration::from_secs(5))
        .users(vec![
            Credentials {
                username: "alice".into(),
                password: "secret".into(),
            },
            Credentials {
                username: "bob".into(),
                password: "hunter2".into(),
            },
        ])
        .build()
        .unwrap();
    let (proxy_addr, shutdown) = start_handler(options).await;

    // Correct credentials tunnel traffic.
    let mut stream = TcpStream::connect(proxy_addr).await.unwrap();
    let good = Credentials {
        username: "alice".into(),
        password: "secret".into(),
    };
    socks5::client_handshake(
        &mut stream,
        socks5::CMD_CONNECT,
        &echo.addr.to_string(),
        Some(&good),
    )
    .await
    .unwrap();
    stream.write_all(b"authed").await.unwrap();
    let mut buf = [0u8; 6];
    stream.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"authed");

    // Wrong credentials: exactly one failure status, then EOF.
    let mut stream = TcpStream::connect(proxy_addr).await.unwrap();
    stream
        .write_all(&[VERSION, 1, METHOD_USER_PASS])
        .await
        .unwrap();
    let mut reply = [0u8; 2];
    stream.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply, [VERSION, METHOD_USER_PASS]);

    stream
        .write_all(&[AUTH_VERSION, 5, b'a', b'l', b'i', b'c', b'e', 3, b'b', b'a', b'd'])
        .await
        .unwrap();
    let mut status = [0u8; 2];
    stream.read_exact(&mut status).await.unwrap();
    assert_eq!(status, [AUTH_VERSION, AUTH_FAILURE]);

    let mut rest = [0u8; 8];
    let n = stream.read(&mut rest).await.unwrap();
    assert_eq!(n, 0, "connection must close after the rejection");

    shutdown.cancel();
    echo.stop().await;
}

#[tokio::test]
async fn unknown_first_byte_closes_connection() {
    init_tracing();
    let (proxy_addr, shutdown) = start_handler(open_options()).await;

    let mut stream = TcpStream::connect(proxy_addr).await.unwrap();
    stream.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();

    // Clean EOF or a reset both mean the handler dropped the connection.
    let mut buf = [0u8; 16];
    let closed = tokio::time::timeout(Duration::from_secs(2), stream.read(&mut buf))
        .await
        .expect("handler must drop non-SOCKS5 traffic promptly");
    match closed {
        Ok(n) => assert_eq!(n, 0, "non-SOCKS5 traffic must be dropped"),
        Err(e) => assert_eq!(e.kind(), std::io::ErrorKind::ConnectionReset),
    }

    shutdown.cancel();
}

#[tokio::test]
async fn unknown_first_byte_knocks_to_decoy() {
    init_tracing();

    // Decoy backend that records what it saw and answers like a web server.
    let decoy = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let decoy_addr = decoy.local_addr().unwrap();
    let decoy_task = tokio::spawn(async move {
        let (mut stream, _) = decoy.accept().await.unwrap();
        let mut buf = [0u8; 5];
        stream.read_exact(&mut buf).await.unwrap();
        stream.write_all(b"HTTP/1.1 200 OK\r\n\r\n").await.unwrap();
        buf.to_vec()
    });

    let options = HandlerOptions::builder()
        .addr("127.0.0.1:0")
        .timeout(Duration::from_secs(5))
        .knock_host(decoy_addr.to_string())
        .build()
        .unwrap();
    let (proxy_addr, shutdown) = start_handler(options).await;

    let mut stream = TcpStream::connect(proxy_addr).await.unwrap();
    stream.write_all(b"GET /").await.unwrap();

    let mut reply = [0u8; 19];
    stream.read_exact(&mut reply).await.unwrap();
    assert_eq!(&reply, b"HTTP/1.1 200 OK\r\n\r\n");

    // The peeked byte was replayed: the decoy saw the whole request.
    let seen = decoy_task.await.unwrap();
    assert_eq!(seen, b"GET /");

    shutdown.cancel();
}

#[tokio::test]
async fn udp_associate_relays_datagrams() {
    init_tracing();

    let udp_echo = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let echo_addr = udp_echo.local_addr().unwrap();
    tokio::spawn(async move {
        let mut buf = vec![0u8; 65536];
        loop {
            let Ok((n, from)) = udp_echo.recv_from(&mut buf).await else {
                break;
            };
            let _ = udp_echo.send_to(&buf[..n], from).await;
        }
    });

    let (proxy_addr, shutdown) = start_handler(open_options()).await;

    // Control connection: UDP ASSOCIATE with an unspecified address.
    let mut control = TcpStream::connect(proxy_addr).await.unwrap();
    control.write_all(&[VERSION, 1, 0x00]).await.unwrap();
    let mut reply = [0u8; 2];
    control.read_exact(&mut reply).await.unwrap();
    control
        .write_all(&[VERSION, CMD_UDP_ASSOCIATE, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
        .await
        .unwrap();

    let mut head = [0u8; 4];
    control.read_exact(&mut head).await.unwrap();
    assert_eq!(head[1], REPLY_SUCCEEDED);
    assert_eq!(head[3], 0x01);
    let mut bind = [0u8; 6];
    control.read_exact(&mut bind).await.unwrap();
    let relay_port = u16::from_be_bytes([bind[4], bind[5]]);
    let relay_addr: SocketAddr = format!("127.0.0.1:{relay_port}").parse().unwrap();

    // Encapsulated datagram out, encapsulated echo back.
    let local = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let packet = socks5::encode_udp_datagram(
        &echo_addr.ip().to_string(),
        echo_addr.port(),
        b"ping-through-relay",
    )
    .unwrap();
    local.send_to(&packet, relay_addr).await.unwrap();

    let mut buf = vec![0u8; 65536];
    let (n, _) = tokio::time::timeout(Duration::from_secs(2), local.recv_from(&mut buf))
        .await
        .expect("relay reply")
        .unwrap();
    let (from_target, payload) = socks5::parse_udp_datagram(&buf[..n]).unwrap();
    assert_eq!(from_target, echo_addr.to_string());
    assert_eq!(payload, b"ping-through-relay");

    shutdown.cancel();
}
