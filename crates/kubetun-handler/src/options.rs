//! Handler options.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use kubetun_chain::{Chain, Credentials, Node};
use kubetun_core::defaults::{
    DEFAULT_FAIL_TIMEOUT, DEFAULT_IDLE_TIMEOUT, DEFAULT_MAX_FAILS, DEFAULT_RETRIES,
};
use kubetun_core::net::Cidr;

use crate::auth::{Authenticator, LocalAuthenticator};
use crate::error::HandlerError;

/// A tunneled route: destination network plus an optional gateway hint.
#[derive(Debug, Clone, Copy)]
pub struct IpRoute {
    pub dest: Cidr,
    pub gateway: Option<IpAddr>,
}

/// Options shared by every handler on one listener. Immutable once built.
pub struct HandlerOptions {
    /// Listen address (`host:port`).
    pub addr: String,
    /// Chain used to reach targets.
    pub chain: Arc<Chain>,
    /// Users configured for this listener.
    pub users: Vec<Credentials>,
    /// Credential checker. `None` permits every client (trusted network).
    pub authenticator: Option<Arc<dyn Authenticator>>,
    /// TLS acceptor config for listeners that terminate TLS.
    pub tls: Option<Arc<tokio_rustls::rustls::ServerConfig>>,
    /// Consecutive-failure threshold for the serve node.
    pub max_fails: u32,
    /// Window after which failure counts reset.
    pub fail_timeout: Duration,
    /// Whole-dial attempts when reaching targets.
    pub retries: usize,
    /// Handshake and relay idle timeout.
    pub timeout: Duration,
    /// Probe-resistance decoy: unknown traffic is proxied here.
    pub knock_host: Option<String>,
    /// The serve node this handler fronts.
    pub node: Option<Arc<Node>>,
    /// Target host for SNI proxying.
    pub host: Option<String>,
    /// IP list for port forwarding.
    pub ips: Vec<String>,
    /// Carry tun/tap traffic over TCP instead of UDP.
    pub tcp_mode: bool,
    /// Routes served through the tunnel.
    pub ip_routes: Vec<IpRoute>,
}

impl HandlerOptions {
    pub fn builder() -> HandlerOptionsBuilder {
        HandlerOptionsBuilder::default()
    }
}

/// Builder for [`HandlerOptions`]; all validation happens in [`build`].
///
/// Setting users derives a [`LocalAuthenticator`] unless an authenticator
/// was installed explicitly — the explicit one always wins, and deriving is
/// idempotent.
///
/// [`build`]: HandlerOptionsBuilder::build
#[derive(Default)]
pub struct HandlerOptionsBuilder {
    addr: Option<String>,
    chain: Option<Arc<Chain>>,
    users: Vec<Credentials>,
    authenticator: Option<Arc<dyn Authenticator>>,
    tls: Option<Arc<tokio_rustls::rustls::ServerConfig>>,
    max_fails: Option<u32>,
    fail_timeout: Option<Duration>,
    retries: Option<usize>,
    timeout: Option<Duration>,
    knock_host: Option<String>,
    node: Option<Arc<Node>>,
    host: Option<String>,
    ips: Vec<String>,
    tcp_mode: bool,
    ip_routes: Vec<IpRoute>,
}

impl HandlerOptionsBuilder {
    pub fn addr(mut self, addr: impl Into<String>) -> Self {
        self.addr = Some(addr.into());
        self
    }

    pub fn chain(mut self, chain: Arc<Chain>) -> Self {
        self.chain = Some(chain);
        self
    }

    pub fn users(mut self, users: Vec<Credentials>) -> Self {
        self.users = users;
        self
    }

    pub fn authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    pub fn tls(mut self, config: Arc<tokio_rustls::rustls::ServerConfig>) -> Self {
        self.tls = Some(config);
        self
    }

    pub fn max_fails(mut self, n: u32) -> Self {
        self.max_fails = Some(n);
        self
    }

    pub fn fail_timeout(mut self, d: Duration) -> Self {
        self.fail_timeout = Some(d);
        self
    }

    pub fn retries(mut self, n: usize) -> Self {
        self.retries = Some(n);
        self
    }

    pub fn timeout(mut self, d: Duration) -> Self {
        self.timeout = Some(d);
        self
    }

    /// Decoy host for probe resistance.
    pub fn knock_host(mut self, host: impl Into<String>) -> Self {
        self.knock_host = Some(host.into());
        self
    }

    pub fn node(mut self, node: Arc<Node>) -> Self {
        self.node = Some(node);
        self
    }

    /// Target host for SNI proxying.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// IP list for port forwarding.
    pub fn ips(mut self, ips: Vec<String>) -> Self {
        self.ips = ips;
        self
    }

    /// Carry tun/tap traffic over TCP.
    pub fn tcp_mode(mut self, enabled: bool) -> Self {
        self.tcp_mode = enabled;
        self
    }

    /// Routes served through the tunnel.
    pub fn ip_routes(mut self, routes: Vec<IpRoute>) -> Self {
        self.ip_routes = routes;
        self
    }

    pub fn build(self) -> Result<HandlerOptions, HandlerError> {
        let timeout = self.timeout.unwrap_or(DEFAULT_IDLE_TIMEOUT);
        let fail_timeout = self.fail_timeout.unwrap_or(DEFAULT_FAIL_TIMEOUT);
        if timeout.is_zero() {
            return Err(HandlerError::Options("timeout must be positive".into()));
        }
        if fail_timeout.is_zero() {
            return Err(HandlerError::Options(
                "fail timeout must be positive".into(),
            ));
        }

        let authenticator = match self.authenticator {
            Some(explicit) => Some(explicit),
            None if !self.users.is_empty() => Some(Arc::new(
                LocalAuthenticator::from_credentials(&self.users),
            ) as Arc<dyn Authenticator>),
            None => None,
        };

        Ok(HandlerOptions {
            addr: self.addr.unwrap_or_default(),
            chain: self.chain.unwrap_or_else(|| Arc::new(Chain::new())),
            users: self.users,
            authenticator,
            tls: self.tls,
            max_fails: self.max_fails.unwrap_or(DEFAULT_MAX_FAILS),
            fail_timeout,
            retries: self.retries.unwrap_or(DEFAULT_RETRIES).max(1),
            timeout,
            knock_host: self.knock_host,
            node: self.node,
            host: self.host,
            ips: self.ips,
            tcp_mode: self.tcp_mode,
            ip_routes: self.ip_routes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds(user: &str, pass: &str) -> Credentials {
        Credentials {
            username: user.into(),
            password: pass.into(),
        }
    }

    #[test]
    fn option_order_does_not_matter() {
        let a = HandlerOptions::builder()
            .addr(":1080")
            .retries(4)
            .timeout(Duration::from_secs(30))
            .tcp_mode(true)
            .build()
            .unwrap();
        let b = HandlerOptions::builder()
            .tcp_mode(true)
            .timeout(Duration::from_secs(30))
            .retries(4)
            .addr(":1080")
            .build()
            .unwrap();

        assert_eq!(a.addr, b.addr);
        assert_eq!(a.retries, b.retries);
        assert_eq!(a.timeout, b.timeout);
        assert_eq!(a.tcp_mode, b.tcp_mode);
    }

    #[tokio::test]
    async fn users_derive_an_authenticator() {
        let options = HandlerOptions::builder()
            .users(vec![creds("alice", "secret"), creds("bob", "hunter2")])
            .build()
            .unwrap();

        let auth = options.authenticator.expect("authenticator derived");
        assert!(auth.check("alice", "secret").await);
        assert!(!auth.check("alice", "wrong").await);
    }

    #[tokio::test]
    async fn explicit_authenticator_wins_over_derivation() {
        let mut explicit = LocalAuthenticator::new();
        explicit.insert("svc", "token");

        let options = HandlerOptions::builder()
            .users(vec![creds("alice", "secret")])
            .authenticator(Arc::new(explicit))
            .build()
            .unwrap();

        let auth = options.authenticator.unwrap();
        assert!(auth.check("svc", "token").await);
        assert!(!auth.check("alice", "secret").await);
    }

    #[test]
    fn no_users_means_no_authenticator() {
        let options = HandlerOptions::builder().build().unwrap();
        assert!(options.authenticator.is_none());
    }

    #[test]
    fn zero_timeouts_are_rejected() {
        assert!(
            HandlerOptions::builder()
                .timeout(Duration::ZERO)
                .build()
                .is_err()
        );
        assert!(
            HandlerOptions::builder()
                .fail_timeout(Duration::ZERO)
                .build()
                .is_err()
        );
    }

    #[test]
    fn retries_floor_at_one() {
        let options = HandlerOptions::builder().retries(0).build().unwrap();
        assert_eq!(options.retries, 1);
    }
}
