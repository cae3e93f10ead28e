// Pinning decisions against real certificate chains issued by a throwaway
// rcgen CA, both through TrustValidator directly and through a full
// in-memory rustls handshake.

use std::sync::Arc;

use backend_transport::trust::{
    client_config, CertificateChain, HostPattern, PinnedTrustEntry, PublicKey,
    TrustValidator, WebPkiChainValidator, X509KeyExtractor,
};
use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, KeyPair};
use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer, ServerName};
use rustls::{CertificateError, ClientConnection, RootCertStore, ServerConnection};

const HOST: &str = "backend.test";

struct Pki {
    ca: rcgen::Certificate,
    leaf: rcgen::Certificate,
    leaf_key: KeyPair,
}

impl Pki {
    fn issue(host: &str) -> Self {
        let ca_key = KeyPair::generate().unwrap();
        let mut ca_params = CertificateParams::new(Vec::<String>::new()).unwrap();
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        ca_params
            .distinguished_name
            .push(DnType::CommonName, "Transport Test CA");
        let ca = ca_params.self_signed(&ca_key).unwrap();

        let leaf_key = KeyPair::generate().unwrap();
        let leaf = CertificateParams::new(vec![host.to_string()])
            .unwrap()
            .signed_by(&leaf_key, &ca, &ca_key)
            .unwrap();

        Self { ca, leaf, leaf_key }
    }

    fn roots(&self) -> RootCertStore {
        let mut roots = RootCertStore::empty();
        roots.add(self.ca.der().clone()).unwrap();
        roots
    }

    fn chain(&self) -> CertificateChain {
        CertificateChain::new(vec![self.leaf.der().to_vec(), self.ca.der().to_vec()])
    }

    fn leaf_public_key(&self) -> PublicKey {
        PublicKey::from_der(self.leaf_key.public_key_der())
    }

    fn validator(&self, entries: Vec<PinnedTrustEntry>) -> TrustValidator {
        let chain = WebPkiChainValidator::with_roots(self.roots()).unwrap();
        TrustValidator::new(entries, Arc::new(chain), Arc::new(X509KeyExtractor))
    }
}

fn pin(host: &str, key: PublicKey) -> PinnedTrustEntry {
    PinnedTrustEntry::new(HostPattern::equals(host), key)
}

fn other_key() -> PublicKey {
    PublicKey::from_der(KeyPair::generate().unwrap().public_key_der())
}

#[test]
fn test_unpinned_host_follows_chain_validation() {
    let pki = Pki::issue(HOST);
    let trust = pki.validator(vec![pin("elsewhere.test", other_key())]);

    assert!(trust.verify(&pki.chain(), Some(HOST)));
}

#[test]
fn test_pinned_host_with_matching_leaf_key() {
    let pki = Pki::issue(HOST);
    let trust = pki.validator(vec![pin(HOST, pki.leaf_public_key())]);

    assert!(trust.verify(&pki.chain(), Some(HOST)));
}

#[test]
fn test_pinned_host_with_other_key_is_rejected() {
    let pki = Pki::issue(HOST);
    let trust = pki.validator(vec![pin(HOST, other_key())]);

    assert!(!trust.verify(&pki.chain(), Some(HOST)));
}

#[test]
fn test_any_of_several_pins_is_enough() {
    let pki = Pki::issue(HOST);
    let trust = pki.validator(vec![
        pin(HOST, other_key()),
        PinnedTrustEntry::new(HostPattern::ends_with(".test"), pki.leaf_public_key()),
    ]);

    assert!(trust.verify(&pki.chain(), Some(HOST)));
}

#[test]
fn test_missing_host_is_rejected_even_with_valid_chain() {
    let pki = Pki::issue(HOST);
    let trust = pki.validator(vec![]);

    assert!(!trust.verify(&pki.chain(), None));
}

#[test]
fn test_untrusted_issuer_is_rejected_despite_matching_pin() {
    let pki = Pki::issue(HOST);
    let stranger = Pki::issue(HOST);
    // Roots from one CA, chain from another.
    let chain = WebPkiChainValidator::with_roots(stranger.roots()).unwrap();
    let trust = TrustValidator::new(
        vec![pin(HOST, pki.leaf_public_key())],
        Arc::new(chain),
        Arc::new(X509KeyExtractor),
    );

    assert!(!trust.verify(&pki.chain(), Some(HOST)));
}

#[test]
fn test_host_mismatch_fails_chain_validation() {
    let pki = Pki::issue(HOST);
    let trust = pki.validator(vec![]);

    assert!(!trust.verify(&pki.chain(), Some("not-the-backend.test")));
}

// ---------------------------------------------------------------------------
// Full handshake
// ---------------------------------------------------------------------------

fn server_connection(pki: &Pki) -> ServerConnection {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(pki.leaf_key.serialize_der()));
    let config = rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(vec![pki.leaf.der().clone(), pki.ca.der().clone()], key)
        .unwrap();
    ServerConnection::new(Arc::new(config)).unwrap()
}

/// Shuttle records between the two ends until both finish or the client
/// fails.
fn handshake(trust: TrustValidator, pki: &Pki) -> Result<(), rustls::Error> {
    let config = client_config(Arc::new(trust)).unwrap();
    let name = ServerName::try_from(HOST).unwrap();
    let mut client = ClientConnection::new(Arc::new(config), name).unwrap();
    let mut server = server_connection(pki);

    for _ in 0..10 {
        let mut buf = Vec::new();
        client.write_tls(&mut buf).unwrap();
        if !buf.is_empty() {
            server.read_tls(&mut buf.as_slice()).unwrap();
            server.process_new_packets()?;
        }

        let mut buf = Vec::new();
        server.write_tls(&mut buf).unwrap();
        if !buf.is_empty() {
            client.read_tls(&mut buf.as_slice()).unwrap();
            client.process_new_packets()?;
        }

        if !client.is_handshaking() && !server.is_handshaking() {
            return Ok(());
        }
    }
    panic!("handshake did not finish");
}

#[test]
fn test_handshake_succeeds_with_matching_pin() {
    let pki = Pki::issue(HOST);
    let trust = pki.validator(vec![pin(HOST, pki.leaf_public_key())]);

    handshake(trust, &pki).unwrap();
}

#[test]
fn test_handshake_aborts_on_pin_mismatch() {
    let pki = Pki::issue(HOST);
    let trust = pki.validator(vec![pin(HOST, other_key())]);

    let err = handshake(trust, &pki).unwrap_err();
    assert_eq!(
        err,
        rustls::Error::InvalidCertificate(CertificateError::ApplicationVerificationFailure)
    );
}

#[test]
fn test_handshake_with_system_roots_rejects_private_ca() {
    let pki = Pki::issue(HOST);
    let trust = TrustValidator::with_webpki_roots(vec![]).unwrap();

    assert!(handshake(trust, &pki).is_err());
}
