//! SOCKS5 wire primitives (RFC 1928) and the client-side handshake.
//!
//! The server side of the protocol lives in the handler framework; both
//! sides share the constants and address codec defined here.

use std::net::{IpAddr, SocketAddr};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::Socks5Error;
use crate::node::Credentials;

/// Protocol version byte; also the detection byte for the auto handler.
pub const VERSION: u8 = 0x05;

pub const METHOD_NO_AUTH: u8 = 0x00;
pub const METHOD_USER_PASS: u8 = 0x02;
pub const METHOD_NO_ACCEPTABLE: u8 = 0xFF;

/// Username/password sub-negotiation version (RFC 1929).
pub const AUTH_VERSION: u8 = 0x01;
pub const AUTH_SUCCESS: u8 = 0x00;
pub const AUTH_FAILURE: u8 = 0x01;

pub const CMD_CONNECT: u8 = 0x01;
pub const CMD_BIND: u8 = 0x02;
pub const CMD_UDP_ASSOCIATE: u8 = 0x03;

pub const ATYP_IPV4: u8 = 0x01;
pub const ATYP_DOMAIN: u8 = 0x03;
pub const ATYP_IPV6: u8 = 0x04;

pub const REPLY_SUCCEEDED: u8 = 0x00;
pub const REPLY_GENERAL_FAILURE: u8 = 0x01;
pub const REPLY_CONNECTION_NOT_ALLOWED: u8 = 0x02;
pub const REPLY_NETWORK_UNREACHABLE: u8 = 0x03;
pub const REPLY_HOST_UNREACHABLE: u8 = 0x04;
pub const REPLY_CONNECTION_REFUSED: u8 = 0x05;
pub const REPLY_TTL_EXPIRED: u8 = 0x06;
pub const REPLY_COMMAND_NOT_SUPPORTED: u8 = 0x07;
pub const REPLY_ADDRESS_TYPE_NOT_SUPPORTED: u8 = 0x08;

/// Format a host and port back into dialable `host:port` form.
pub fn format_target(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

/// Append `ATYP + address + port` for a `host:port` target.
///
/// IP literals are encoded natively; everything else goes out as a domain.
pub fn encode_addr(buf: &mut Vec<u8>, host: &str, port: u16) -> Result<(), Socks5Error> {
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => {
            buf.push(ATYP_IPV4);
            buf.extend_from_slice(&ip.octets());
        }
        Ok(IpAddr::V6(ip)) => {
            buf.push(ATYP_IPV6);
            buf.extend_from_slice(&ip.octets());
        }
        Err(_) => {
            if host.is_empty() || host.len() > 255 {
                return Err(Socks5Error::UnsupportedAddressType(ATYP_DOMAIN));
            }
            buf.push(ATYP_DOMAIN);
            buf.push(host.len() as u8);
            buf.extend_from_slice(host.as_bytes());
        }
    }
    buf.extend_from_slice(&port.to_be_bytes());
    Ok(())
}

/// Read `ATYP + address + port`, returning the target as `host:port`.
pub async fn read_addr<S>(stream: &mut S) -> Result<String, Socks5Error>
where
    S: AsyncRead + Unpin,
{
    let atyp = stream.read_u8().await?;
    let host = match atyp {
        ATYP_IPV4 => {
            let mut octets = [0u8; 4];
            stream.read_exact(&mut octets).await?;
            std::net::Ipv4Addr::from(octets).to_string()
        }
        ATYP_DOMAIN => {
            let len = stream.read_u8().await? as usize;
            let mut name = vec![0u8; len];
            stream.read_exact(&mut name).await?;
            String::from_utf8(name).map_err(|_| Socks5Error::UnsupportedAddressType(atyp))?
        }
        ATYP_IPV6 => {
            let mut octets = [0u8; 16];
            stream.read_exact(&mut octets).await?;
            std::net::Ipv6Addr::from(octets).to_string()
        }
        other => return Err(Socks5Error::UnsupportedAddressType(other)),
    };
    let port = stream.read_u16().await?;
    Ok(format_target(&host, port))
}

/// Send a reply with the given code and bind address.
pub async fn send_reply<S>(
    stream: &mut S,
    code: u8,
    bind: SocketAddr,
) -> Result<(), Socks5Error>
where
    S: AsyncWrite + Unpin,
{
    let mut buf = Vec::with_capacity(22);
    buf.push(VERSION);
    buf.push(code);
    buf.push(0x00);
    encode_addr(&mut buf, &bind.ip().to_string(), bind.port())?;
    stream.write_all(&buf).await?;
    stream.flush().await?;
    Ok(())
}

/// Send a reply with a zeroed bind address.
pub async fn send_reply_unspecified<S>(stream: &mut S, code: u8) -> Result<(), Socks5Error>
where
    S: AsyncWrite + Unpin,
{
    send_reply(stream, code, SocketAddr::from(([0, 0, 0, 0], 0))).await
}

/// Perform the client side of the SOCKS5 handshake on `stream`, requesting
/// `command` toward `target` (`host:port`).
///
/// Offers username/password alongside no-auth when credentials are present;
/// fails if the server picks a method we did not offer, rejects the
/// credentials, or answers the request with a non-success code.
pub async fn client_handshake<S>(
    stream: &mut S,
    command: u8,
    target: &str,
    creds: Option<&Credentials>,
) -> Result<(), Socks5Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    // Method negotiation.
    let greeting: &[u8] = match creds {
        Some(_) => &[VERSION, 2, METHOD_NO_AUTH, METHOD_USER_PASS],
        None => &[VERSION, 1, METHOD_NO_AUTH],
    };
    stream.write_all(greeting).await?;
    stream.flush().await?;

    let mut choice = [0u8; 2];
    stream.read_exact(&mut choice).await?;
    if choice[0] != VERSION {
        return Err(Socks5Error::InvalidVersion(choice[0]));
    }
    match choice[1] {
        METHOD_NO_AUTH => {}
        METHOD_USER_PASS => {
            let creds = creds.ok_or(Socks5Error::NoAcceptableMethods)?;
            authenticate(stream, creds).await?;
        }
        _ => return Err(Socks5Error::NoAcceptableMethods),
    }

    // Request.
    let (host, port) = crate::node::split_host_port(target)
        .ok_or(Socks5Error::UnsupportedAddressType(ATYP_DOMAIN))?;
    let mut request = Vec::with_capacity(32);
    request.extend_from_slice(&[VERSION, command, 0x00]);
    encode_addr(&mut request, host, port)?;
    stream.write_all(&request).await?;
    stream.flush().await?;

    // Reply: VER REP RSV, then the bind address we must consume.
    let mut head = [0u8; 3];
    stream.read_exact(&mut head).await?;
    if head[0] != VERSION {
        return Err(Socks5Error::InvalidVersion(head[0]));
    }
    if head[1] != REPLY_SUCCEEDED {
        return Err(Socks5Error::Rejected(head[1]));
    }
    let _bind = read_addr(stream).await?;
    Ok(())
}

/// RFC 1929 username/password sub-negotiation, client side.
async fn authenticate<S>(stream: &mut S, creds: &Credentials) -> Result<(), Socks5Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let user = creds.username.as_bytes();
    let pass = creds.password.as_bytes();
    if user.len() > 255 || pass.len() > 255 {
        return Err(Socks5Error::AuthRejected);
    }

    let mut msg = Vec::with_capacity(3 + user.len() + pass.len());
    msg.push(AUTH_VERSION);
    msg.push(user.len() as u8);
    msg.extend_from_slice(user);
    msg.push(pass.len() as u8);
    msg.extend_from_slice(pass);
    stream.write_all(&msg).await?;
    stream.flush().await?;

    let mut status = [0u8; 2];
    stream.read_exact(&mut status).await?;
    if status[1] != AUTH_SUCCESS {
        return Err(Socks5Error::AuthRejected);
    }
    Ok(())
}

/// Encapsulate a payload into an RFC 1928 §7 UDP datagram.
pub fn encode_udp_datagram(
    host: &str,
    port: u16,
    payload: &[u8],
) -> Result<Vec<u8>, Socks5Error> {
    let mut buf = Vec::with_capacity(10 + payload.len());
    // RSV RSV FRAG
    buf.extend_from_slice(&[0x00, 0x00, 0x00]);
    encode_addr(&mut buf, host, port)?;
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Parse an RFC 1928 §7 UDP datagram into target and payload.
///
/// Fragmented datagrams are refused.
pub fn parse_udp_datagram(buf: &[u8]) -> Result<(String, &[u8]), Socks5Error> {
    if buf.len() < 4 {
        return Err(Socks5Error::Truncated);
    }
    if buf[2] != 0x00 {
        return Err(Socks5Error::UnsupportedCommand(buf[2]));
    }
    let atyp = buf[3];
    let mut offset = 4;
    let host = match atyp {
        ATYP_IPV4 => {
            if buf.len() < offset + 4 {
                return Err(Socks5Error::Truncated);
            }
            let octets: [u8; 4] = buf[offset..offset + 4].try_into().unwrap();
            offset += 4;
            std::net::Ipv4Addr::from(octets).to_string()
        }
        ATYP_DOMAIN => {
            if buf.len() < offset + 1 {
                return Err(Socks5Error::Truncated);
            }
            let len = buf[offset] as usize;
            offset += 1;
            if buf.len() < offset + len {
                return Err(Socks5Error::Truncated);
            }
            let name = std::str::from_utf8(&buf[offset..offset + len])
                .map_err(|_| Socks5Error::UnsupportedAddressType(atyp))?
                .to_string();
            offset += len;
            name
        }
        ATYP_IPV6 => {
            if buf.len() < offset + 16 {
                return Err(Socks5Error::Truncated);
            }
            let octets: [u8; 16] = buf[offset..offset + 16].try_into().unwrap();
            offset += 16;
            std::net::Ipv6Addr::from(octets).to_string()
        }
        other => return Err(Socks5Error::UnsupportedAddressType(other)),
    };
    if buf.len() < offset + 2 {
        return Err(Socks5Error::Truncated);
    }
    let port = u16::from_be_bytes([buf[offset], buf[offset + 1]]);
    offset += 2;
    Ok((format_target(&host, port), &buf[offset..]))
}
