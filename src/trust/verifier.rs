//! rustls adapter that routes certificate verification through
//! [`TrustValidator`].
//!
//! Both the HTTP client and the WebSocket connector use the config from
//! [`client_config`], so every handshake the transport makes is subject to
//! the same pinning policy.

use std::sync::Arc;

use anyhow::{Context, Result};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{CertificateError, ClientConfig, DigitallySignedStruct, SignatureScheme};

use super::{CertificateChain, TrustValidator};

/// `ServerCertVerifier` that delegates the trust decision to a
/// [`TrustValidator`] and handshake signatures to the crypto provider.
#[derive(Debug)]
pub struct PinningCertVerifier {
    trust: Arc<TrustValidator>,
    provider: Arc<CryptoProvider>,
}

impl PinningCertVerifier {
    /// Wrap `trust`, checking handshake signatures with `provider`.
    pub fn new(trust: Arc<TrustValidator>, provider: Arc<CryptoProvider>) -> Self {
        Self { trust, provider }
    }
}

fn host_of(server_name: &ServerName<'_>) -> Option<String> {
    match server_name {
        ServerName::DnsName(name) => Some(name.as_ref().to_string()),
        ServerName::IpAddress(ip) => Some(std::net::IpAddr::from(*ip).to_string()),
        _ => None,
    }
}

impl ServerCertVerifier for PinningCertVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let mut certificates = Vec::with_capacity(intermediates.len() + 1);
        certificates.push(end_entity.as_ref().to_vec());
        certificates.extend(intermediates.iter().map(|der| der.as_ref().to_vec()));
        let chain = CertificateChain::new(certificates);

        let host = host_of(server_name);
        if self.trust.verify(&chain, host.as_deref()) {
            Ok(ServerCertVerified::assertion())
        } else {
            log::warn!(
                "[Trust] Rejected server certificate for {}",
                host.as_deref().unwrap_or("<unknown host>")
            );
            Err(rustls::Error::InvalidCertificate(
                CertificateError::ApplicationVerificationFailure,
            ))
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider.signature_verification_algorithms.supported_schemes()
    }
}

/// Build the client TLS config shared by the HTTP and WebSocket transports.
pub fn client_config(trust: Arc<TrustValidator>) -> Result<ClientConfig> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let verifier = Arc::new(PinningCertVerifier::new(trust, Arc::clone(&provider)));

    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .context("crypto provider does not support the default TLS versions")?
        .dangerous()
        .with_custom_certificate_verifier(verifier)
        .with_no_client_auth();
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trust::{ChainValidator, HostPattern, KeyExtractor, PinnedTrustEntry, PublicKey};

    #[derive(Debug)]
    struct AcceptAll;

    impl ChainValidator for AcceptAll {
        fn validate(&self, _chain: &CertificateChain, _host: &str) -> bool {
            true
        }
    }

    #[derive(Debug)]
    struct LeafIsKey;

    impl KeyExtractor for LeafIsKey {
        fn leaf_public_key(&self, chain: &CertificateChain) -> Option<PublicKey> {
            chain.leaf().map(PublicKey::from_der)
        }
    }

    fn verifier(pinned: &[u8]) -> PinningCertVerifier {
        let entry = PinnedTrustEntry::new(HostPattern::equals("example.com"), PublicKey::from_der(pinned.to_vec()));
        let trust = TrustValidator::new(vec![entry], Arc::new(AcceptAll), Arc::new(LeafIsKey));
        PinningCertVerifier::new(Arc::new(trust), Arc::new(rustls::crypto::ring::default_provider()))
    }

    #[test]
    fn test_matching_pin_is_accepted() {
        let v = verifier(b"leaf");
        let name = ServerName::try_from("example.com").unwrap();
        let result = v.verify_server_cert(
            &CertificateDer::from(&b"leaf"[..]),
            &[],
            &name,
            &[],
            UnixTime::now(),
        );
        assert!(result.is_ok());
    }

    #[test]
    fn test_mismatched_pin_maps_to_invalid_certificate() {
        let v = verifier(b"pinned");
        let name = ServerName::try_from("example.com").unwrap();
        let err = v
            .verify_server_cert(&CertificateDer::from(&b"other"[..]), &[], &name, &[], UnixTime::now())
            .unwrap_err();
        assert_eq!(
            err,
            rustls::Error::InvalidCertificate(CertificateError::ApplicationVerificationFailure)
        );
    }

    #[test]
    fn test_ip_server_name_is_passed_as_host() {
        let name = ServerName::try_from("127.0.0.1").unwrap();
        assert_eq!(host_of(&name).as_deref(), Some("127.0.0.1"));
    }

    #[test]
    fn test_client_config_builds() {
        let trust = TrustValidator::new(vec![], Arc::new(AcceptAll), Arc::new(LeafIsKey));
        let config = client_config(Arc::new(trust)).unwrap();
        assert!(config.alpn_protocols.is_empty());
    }
}
