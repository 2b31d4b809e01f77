//! Server-side SOCKS5 handler (RFC 1928, RFC 1929).

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, trace};

use kubetun_chain::{ChainError, Socks5Error};
use kubetun_chain::socks5::{
    AUTH_FAILURE, AUTH_SUCCESS, AUTH_VERSION, CMD_CONNECT, CMD_UDP_ASSOCIATE, METHOD_NO_ACCEPTABLE,
    METHOD_NO_AUTH, METHOD_USER_PASS, REPLY_COMMAND_NOT_SUPPORTED, REPLY_CONNECTION_REFUSED,
    REPLY_GENERAL_FAILURE, REPLY_HOST_UNREACHABLE, REPLY_NETWORK_UNREACHABLE, REPLY_SUCCEEDED,
    REPLY_TTL_EXPIRED, VERSION, encode_udp_datagram, parse_udp_datagram, read_addr, send_reply,
    send_reply_unspecified,
};
use kubetun_core::AsyncStream;
use kubetun_core::defaults::{DEFAULT_RELAY_BUFFER_SIZE, DEFAULT_UDP_TIMEOUT, MAX_PACKET_SIZE};
use kubetun_core::io::relay_bidirectional;

use crate::error::HandlerError;
use crate::options::HandlerOptions;

/// Owns a SOCKS5 session: method negotiation, optional username/password
/// sub-negotiation, then CONNECT or UDP ASSOCIATE through the options'
/// chain.
pub struct Socks5Handler {
    options: Arc<HandlerOptions>,
}

impl Socks5Handler {
    pub fn new(options: Arc<HandlerOptions>) -> Self {
        Self { options }
    }

    pub async fn handle<S: AsyncStream>(
        &self,
        mut stream: S,
        peer: SocketAddr,
    ) -> Result<(), HandlerError> {
        let (command, target) =
            tokio::time::timeout(self.options.timeout, self.handshake(&mut stream, peer))
                .await
                .map_err(|_| HandlerError::Timeout)??;

        match command {
            CMD_CONNECT => self.handle_connect(stream, &target, peer).await,
            CMD_UDP_ASSOCIATE => self.handle_udp_associate(stream, peer).await,
            other => {
                let _ = send_reply_unspecified(&mut stream, REPLY_COMMAND_NOT_SUPPORTED).await;
                Err(Socks5Error::UnsupportedCommand(other).into())
            }
        }
    }

    /// Negotiate the method, authenticate if required, and read the
    /// request. Returns the command and the target as `host:port`.
    async fn handshake<S: AsyncStream>(
        &self,
        stream: &mut S,
        peer: SocketAddr,
    ) -> Result<(u8, String), HandlerError> {
        let mut head = [0u8; 2];
        stream.read_exact(&mut head).await?;
        if head[0] != VERSION {
            return Err(Socks5Error::InvalidVersion(head[0]).into());
        }
        let mut methods = vec![0u8; head[1] as usize];
        stream.read_exact(&mut methods).await?;

        match &self.options.authenticator {
            Some(authenticator) => {
                if !methods.contains(&METHOD_USER_PASS) {
                    let _ = stream.write_all(&[VERSION, METHOD_NO_ACCEPTABLE]).await;
                    return Err(Socks5Error::NoAcceptableMethods.into());
                }
                stream.write_all(&[VERSION, METHOD_USER_PASS]).await?;
                stream.flush().await?;
                self.authenticate(stream, authenticator.as_ref(), peer)
                    .await?;
            }
            None => {
                // No users configured: every client is let through.
                if !methods.contains(&METHOD_NO_AUTH) {
                    let _ = stream.write_all(&[VERSION, METHOD_NO_ACCEPTABLE]).await;
                    return Err(Socks5Error::NoAcceptableMethods.into());
                }
                stream.write_all(&[VERSION, METHOD_NO_AUTH]).await?;
                stream.flush().await?;
            }
        }

        let mut request = [0u8; 3];
        stream.read_exact(&mut request).await?;
        if request[0] != VERSION {
            return Err(Socks5Error::InvalidVersion(request[0]).into());
        }
        let target = read_addr(stream).await?;
        Ok((request[1], target))
    }

    /// RFC 1929 sub-negotiation. A rejected client gets exactly one failure
    /// status before the connection is torn down.
    async fn authenticate<S: AsyncStream>(
        &self,
        stream: &mut S,
        authenticator: &dyn crate::auth::Authenticator,
        peer: SocketAddr,
    ) -> Result<(), HandlerError> {
        let mut head = [0u8; 2];
        stream.read_exact(&mut head).await?;
        if head[0] != AUTH_VERSION {
            return Err(Socks5Error::InvalidVersion(head[0]).into());
        }
        let mut user = vec![0u8; head[1] as usize];
        stream.read_exact(&mut user).await?;
        let pass_len = stream.read_u8().await? as usize;
        let mut pass = vec![0u8; pass_len];
        stream.read_exact(&mut pass).await?;

        let user = String::from_utf8_lossy(&user).into_owned();
        let pass = String::from_utf8_lossy(&pass).into_owned();

        if authenticator.check(&user, &pass).await {
            stream.write_all(&[AUTH_VERSION, AUTH_SUCCESS]).await?;
            stream.flush().await?;
            trace!(peer = %peer, user = %user, "authenticated");
            Ok(())
        } else {
            stream.write_all(&[AUTH_VERSION, AUTH_FAILURE]).await?;
            stream.flush().await?;
            Err(HandlerError::Auth(user))
        }
    }

    async fn handle_connect<S: AsyncStream>(
        &self,
        mut stream: S,
        target: &str,
        peer: SocketAddr,
    ) -> Result<(), HandlerError> {
        debug!(peer = %peer, target = %target, "CONNECT");

        let remote = match self.options.chain.dial("tcp", target).await {
            Ok(outbound) => outbound.into_stream()?,
            Err(e) => {
                let _ = send_reply_unspecified(&mut stream, reply_code_for(&e)).await;
                return Err(e.into());
            }
        };

        send_reply_unspecified(&mut stream, REPLY_SUCCEEDED).await?;

        let stats = relay_bidirectional(
            stream,
            remote,
            self.options.timeout,
            DEFAULT_RELAY_BUFFER_SIZE,
        )
        .await?;
        debug!(
            peer = %peer,
            target = %target,
            uplink = stats.uplink,
            downlink = stats.downlink,
            "CONNECT finished"
        );
        Ok(())
    }

    /// UDP ASSOCIATE: bind a datagram relay via the chain and shuttle
    /// RFC 1928 §7 encapsulated datagrams between the client and its
    /// targets. The association lives as long as the control connection.
    async fn handle_udp_associate<S: AsyncStream>(
        &self,
        mut stream: S,
        peer: SocketAddr,
    ) -> Result<(), HandlerError> {
        let socket = match self.options.chain.dial("udp", "").await {
            Ok(outbound) => outbound.into_datagram()?,
            Err(e) => {
                let _ = send_reply_unspecified(&mut stream, REPLY_GENERAL_FAILURE).await;
                return Err(e.into());
            }
        };
        let bind = socket.local_addr()?;
        send_reply(&mut stream, REPLY_SUCCEEDED, bind).await?;
        debug!(peer = %peer, relay = %bind, "UDP ASSOCIATE");

        let mut udp_buf = vec![0u8; MAX_PACKET_SIZE];
        let mut tcp_buf = [0u8; 256];
        let mut client_addr: Option<SocketAddr> = None;

        loop {
            tokio::select! {
                read = stream.read(&mut tcp_buf) => {
                    // Control-connection close ends the association.
                    match read {
                        Ok(0) | Err(_) => break,
                        Ok(_) => {}
                    }
                }
                received = socket.recv_from(&mut udp_buf) => {
                    let (n, from) = received?;
                    let from_client = match client_addr {
                        None => {
                            client_addr = Some(from);
                            true
                        }
                        Some(c) => c == from,
                    };
                    if from_client {
                        match parse_udp_datagram(&udp_buf[..n]) {
                            Ok((target, payload)) => {
                                let _ = socket.send_to(payload, target.as_str()).await;
                            }
                            Err(e) => trace!(peer = %peer, error = %e, "bad datagram"),
                        }
                    } else if let Some(client) = client_addr {
                        let host = from.ip().to_string();
                        if let Ok(packet) = encode_udp_datagram(&host, from.port(), &udp_buf[..n]) {
                            let _ = socket.send_to(&packet, client).await;
                        }
                    }
                }
                _ = tokio::time::sleep(DEFAULT_UDP_TIMEOUT) => break,
            }
        }
        Ok(())
    }
}

fn reply_code_for(error: &ChainError) -> u8 {
    match error {
        ChainError::DialTimeout { .. } => REPLY_TTL_EXPIRED,
        ChainError::Dial { source, .. } => match source.kind() {
            std::io::ErrorKind::ConnectionRefused => REPLY_CONNECTION_REFUSED,
            std::io::ErrorKind::NetworkUnreachable => REPLY_NETWORK_UNREACHABLE,
            std::io::ErrorKind::HostUnreachable => REPLY_HOST_UNREACHABLE,
            std::io::ErrorKind::TimedOut => REPLY_TTL_EXPIRED,
            _ => REPLY_GENERAL_FAILURE,
        },
        _ => REPLY_GENERAL_FAILURE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    fn peer() -> SocketAddr {
        "192.0.2.20:5151".parse().unwrap()
    }

    #[tokio::test]
    async fn refuses_clients_without_an_acceptable_method() {
        let options = Arc::new(
            HandlerOptions::builder()
                .users(vec![kubetun_chain::Credentials {
                    username: "alice".into(),
                    password: "secret".into(),
                }])
                .build()
                .unwrap(),
        );
        let (mut client, server) = duplex(256);

        let session = tokio::spawn(async move {
            Socks5Handler::new(options).handle(server, peer()).await
        });

        // Client offers only NO AUTH although the server requires user/pass.
        client.write_all(&[VERSION, 1, METHOD_NO_AUTH]).await.unwrap();

        let mut reply = [0u8; 2];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, [VERSION, METHOD_NO_ACCEPTABLE]);

        assert!(session.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn bad_credentials_get_one_rejection_then_close() {
        let options = Arc::new(
            HandlerOptions::builder()
                .users(vec![kubetun_chain::Credentials {
                    username: "alice".into(),
                    password: "secret".into(),
                }])
                .build()
                .unwrap(),
        );
        let (mut client, server) = duplex(256);

        let session = tokio::spawn(async move {
            Socks5Handler::new(options).handle(server, peer()).await
        });

        client
            .write_all(&[VERSION, 1, METHOD_USER_PASS])
            .await
            .unwrap();
        let mut reply = [0u8; 2];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, [VERSION, METHOD_USER_PASS]);

        // alice / wrong
        client
            .write_all(&[AUTH_VERSION, 5, b'a', b'l', b'i', b'c', b'e', 5, b'w', b'r', b'o', b'n', b'g'])
            .await
            .unwrap();

        let mut status = [0u8; 2];
        client.read_exact(&mut status).await.unwrap();
        assert_eq!(status, [AUTH_VERSION, AUTH_FAILURE]);

        let err = session.await.unwrap().unwrap_err();
        assert!(matches!(err, HandlerError::Auth(user) if user == "alice"));

        // Exactly one rejection: nothing else arrives before EOF.
        let mut rest = [0u8; 8];
        let n = client.read(&mut rest).await.unwrap();
        assert_eq!(n, 0);
    }
}
