//! Listener loop feeding accepted connections into the auto handler.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::auto::AutoHandler;
use crate::error::HandlerError;
use crate::options::HandlerOptions;

/// One serve endpoint: a bound listener plus the handler options every
/// accepted connection shares.
pub struct Server {
    listener: TcpListener,
    options: Arc<HandlerOptions>,
    tls: Option<TlsAcceptor>,
}

impl Server {
    /// Bind the listener at `options.addr`.
    pub async fn bind(options: HandlerOptions) -> Result<Self, HandlerError> {
        let listener = TcpListener::bind(&options.addr).await?;
        let tls = options.tls.as_ref().map(|c| TlsAcceptor::from(c.clone()));
        Ok(Self {
            listener,
            options: Arc::new(options),
            tls,
        })
    }

    /// The bound local address.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `shutdown` fires, spawning one task per
    /// connection. Per-connection failures are logged; the loop continues.
    pub async fn serve(self, shutdown: CancellationToken) -> Result<(), HandlerError> {
        info!(address = %self.local_addr()?, "handler listening");

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("shutdown signal received, stopping accept loop");
                    return Ok(());
                }

                result = self.listener.accept() => {
                    let (tcp, peer) = match result {
                        Ok(pair) => pair,
                        Err(e) => {
                            error!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    debug!(peer = %peer, "accepted");

                    let handler = AutoHandler::new(Arc::clone(&self.options));
                    let tls = self.tls.clone();
                    tokio::spawn(async move {
                        match tls {
                            Some(acceptor) => match acceptor.accept(tcp).await {
                                Ok(stream) => handler.handle(stream, peer).await,
                                Err(e) => {
                                    debug!(peer = %peer, error = %e, "TLS accept failed");
                                }
                            },
                            None => handler.handle(tcp, peer).await,
                        }
                    });
                }
            }
        }
    }
}
