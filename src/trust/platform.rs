//! Real capability implementations backed by rustls' webpki verifier and
//! `x509-parser`.

use std::sync::Arc;

use anyhow::{Context, Result};
use rustls::client::danger::ServerCertVerifier;
use rustls::client::WebPkiServerVerifier;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::RootCertStore;
use x509_parser::prelude::FromDer;
use x509_parser::x509::SubjectPublicKeyInfo;

use super::{CertificateChain, ChainValidator, KeyExtractor, PublicKey};

/// Chain validation through rustls' webpki verifier.
#[derive(Debug, Clone)]
pub struct WebPkiChainValidator {
    verifier: Arc<WebPkiServerVerifier>,
}

impl WebPkiChainValidator {
    /// Validate against the bundled Mozilla root program.
    pub fn with_webpki_roots() -> Result<Self> {
        let roots = RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.into(),
        };
        Self::with_roots(roots)
    }

    /// Validate against a caller-supplied root store.
    pub fn with_roots(roots: RootCertStore) -> Result<Self> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let verifier = WebPkiServerVerifier::builder_with_provider(Arc::new(roots), provider)
            .build()
            .context("failed to build webpki verifier")?;
        Ok(Self { verifier })
    }
}

impl ChainValidator for WebPkiChainValidator {
    fn validate(&self, chain: &CertificateChain, host: &str) -> bool {
        let Some(leaf) = chain.leaf() else {
            return false;
        };
        let Ok(server_name) = ServerName::try_from(host) else {
            log::debug!("[Trust] {host} is not a valid server name");
            return false;
        };

        let end_entity = CertificateDer::from(leaf);
        let intermediates: Vec<CertificateDer<'_>> = chain
            .intermediates()
            .iter()
            .map(|der| CertificateDer::from(der.as_slice()))
            .collect();

        match self.verifier.verify_server_cert(
            &end_entity,
            &intermediates,
            &server_name,
            &[],
            UnixTime::now(),
        ) {
            Ok(_) => true,
            Err(e) => {
                log::debug!("[Trust] webpki rejected chain for {host}: {e}");
                false
            }
        }
    }
}

/// Leaf key extraction by parsing the certificate with `x509-parser`.
#[derive(Debug, Clone, Copy, Default)]
pub struct X509KeyExtractor;

impl KeyExtractor for X509KeyExtractor {
    fn leaf_public_key(&self, chain: &CertificateChain) -> Option<PublicKey> {
        let leaf = chain.leaf()?;
        match x509_parser::parse_x509_certificate(leaf) {
            Ok((_, cert)) => Some(PublicKey::from_der(cert.public_key().raw.to_vec())),
            Err(e) => {
                log::debug!("[Trust] Failed to parse leaf certificate: {e}");
                None
            }
        }
    }
}

/// Fail unless `der` is exactly one SubjectPublicKeyInfo.
pub(super) fn check_spki(der: &[u8]) -> Result<()> {
    let (rest, _) = SubjectPublicKeyInfo::from_der(der)
        .map_err(|e| anyhow::anyhow!("not a SubjectPublicKeyInfo: {e}"))?;
    anyhow::ensure!(rest.is_empty(), "trailing bytes after SubjectPublicKeyInfo");
    Ok(())
}
