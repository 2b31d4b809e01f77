//! TLS client configuration for nodes with a TLS or WSS carrier.
//!
//! Key exchange is owned by an external layer; this module only turns the
//! node's TLS settings into a `rustls::ClientConfig` for the hop dial.

use std::sync::Arc;

use rustls::pki_types::ServerName;

use crate::error::ChainError;
use crate::node::{NodeTlsSettings, split_host_port};

/// Build the client TLS config for one node.
///
/// Trusts the node's CA bundle when one is given, the webpki roots
/// otherwise. `skip_verify` swaps in a verifier that accepts anything.
pub fn build_client_tls(settings: &NodeTlsSettings) -> Result<rustls::ClientConfig, ChainError> {
    let mut roots = rustls::RootCertStore::empty();

    if let Some(ca_path) = &settings.ca {
        let pem = std::fs::read(ca_path)
            .map_err(|e| ChainError::InvalidNode(format!("read CA bundle: {e}")))?;
        let certs = rustls_pemfile::certs(&mut std::io::Cursor::new(&pem))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ChainError::InvalidNode(format!("parse CA bundle: {e}")))?;
        for cert in certs {
            roots
                .add(cert)
                .map_err(|e| ChainError::InvalidNode(format!("add CA cert: {e}")))?;
        }
    } else {
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }

    let config = if settings.skip_verify {
        rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCert))
            .with_no_client_auth()
    } else {
        rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth()
    };

    Ok(config)
}

/// SNI for a node: the configured override, or the node's host part.
pub fn server_name_for(
    settings: &NodeTlsSettings,
    addr: &str,
) -> Result<ServerName<'static>, ChainError> {
    let host = match &settings.sni {
        Some(sni) => sni.clone(),
        None => split_host_port(addr)
            .map(|(h, _)| h.to_string())
            .unwrap_or_else(|| addr.to_string()),
    };
    ServerName::try_from(host)
        .map_err(|e| ChainError::InvalidNode(format!("invalid SNI hostname: {e}")))
}

/// Verifier used by `skip_verify`: accepts any server certificate.
#[derive(Debug)]
struct AcceptAnyCert;

impl rustls::client::danger::ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::CryptoProvider::get_default()
            .map(|provider| {
                provider
                    .signature_verification_algorithms
                    .supported_schemes()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sni_defaults_to_node_host() {
        let settings = NodeTlsSettings::default();
        let name = server_name_for(&settings, "gw.cluster.local:443").unwrap();
        assert_eq!(format!("{name:?}"), "DnsName(\"gw.cluster.local\")");
    }

    #[test]
    fn sni_override_wins() {
        let settings = NodeTlsSettings {
            sni: Some("front.example.com".into()),
            ..Default::default()
        };
        let name = server_name_for(&settings, "10.0.0.9:443").unwrap();
        assert_eq!(format!("{name:?}"), "DnsName(\"front.example.com\")");
    }

    #[test]
    fn sni_accepts_ip_literals() {
        let settings = NodeTlsSettings::default();
        server_name_for(&settings, "[::1]:443").unwrap();
        server_name_for(&settings, "203.0.113.7:443").unwrap();
    }
}
