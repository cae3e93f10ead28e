//! Server trust evaluation with public-key pinning.
//!
//! [`TrustValidator::verify`] decides whether a server's certificate chain
//! is acceptable for a host. It runs standard chain validation first and
//! then, if the host appears in the pinning table, requires the leaf
//! certificate's public key to be one of the pinned keys.
//!
//! # Architecture
//!
//! ```text
//!   rustls handshake ──► PinningCertVerifier ──► TrustValidator::verify
//!                                                   │
//!                              ┌────────────────────┼──────────────────┐
//!                              ▼                    ▼                  ▼
//!                     pinning table        ChainValidator        KeyExtractor
//!                  (Arc<[PinnedTrustEntry]>) (webpki roots)    (x509 leaf SPKI)
//! ```
//!
//! Chain validation and key extraction are capabilities behind traits, so
//! the pinning decision itself can be exercised with fake chains and keys.
//! The table is immutable after construction and shared read-only across
//! every handshake.

// Rust guideline compliant 2026-02

mod verifier;
mod platform;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use base64::Engine;
use serde::{Deserialize, Serialize};

pub use verifier::{client_config, PinningCertVerifier};
pub use platform::{WebPkiChainValidator, X509KeyExtractor};

/// A public key, held as the DER encoding of its SubjectPublicKeyInfo.
///
/// Equality is byte-exact over the encoding.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PublicKey(Vec<u8>);

impl PublicKey {
    /// Wrap DER-encoded SubjectPublicKeyInfo bytes.
    pub fn from_der(der: impl Into<Vec<u8>>) -> Self {
        Self(der.into())
    }

    /// Parse a PEM `PUBLIC KEY` block or bare base64 DER.
    ///
    /// The decoded bytes must be a well-formed SubjectPublicKeyInfo.
    pub fn from_pem(text: &str) -> Result<Self> {
        let body: String = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with("-----"))
            .collect();
        let der = base64::engine::general_purpose::STANDARD
            .decode(body.as_bytes())
            .context("public key is not valid base64")?;
        platform::check_spki(&der)?;
        Ok(Self(der))
    }

    /// DER bytes.
    pub fn as_der(&self) -> &[u8] {
        &self.0
    }

    /// Base64 of the DER bytes, the form written back to config files.
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.0)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({} bytes)", self.0.len())
    }
}

/// How a pinning entry selects hosts. Matching ignores ASCII case and a
/// trailing root dot on the host.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HostPattern {
    /// The host must equal the name.
    Equals(String),
    /// The host must end with the suffix (for example `.example.com`).
    EndsWith(String),
}

impl HostPattern {
    /// Exact-match pattern.
    pub fn equals(name: &str) -> Self {
        Self::Equals(name.to_ascii_lowercase())
    }

    /// Suffix-match pattern.
    pub fn ends_with(suffix: &str) -> Self {
        Self::EndsWith(suffix.to_ascii_lowercase())
    }

    /// Whether `host` is covered by this pattern.
    pub fn matches(&self, host: &str) -> bool {
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        match self {
            Self::Equals(name) => host == *name,
            Self::EndsWith(suffix) => host.ends_with(suffix.as_str()),
        }
    }
}

impl FromStr for HostPattern {
    type Err = anyhow::Error;

    /// `*.example.com` and `.example.com` parse as suffix matches on
    /// `.example.com`; anything else is an exact match.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() || s == "*" || s == "*." {
            anyhow::bail!("empty host pattern");
        }
        if let Some(suffix) = s.strip_prefix('*') {
            return Ok(Self::ends_with(suffix));
        }
        if s.starts_with('.') {
            return Ok(Self::ends_with(s));
        }
        Ok(Self::equals(s))
    }
}

impl fmt::Display for HostPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equals(name) => f.write_str(name),
            Self::EndsWith(suffix) => write!(f, "*{suffix}"),
        }
    }
}

/// One row of the pinning table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "PinnedTrustEntryRepr", into = "PinnedTrustEntryRepr")]
pub struct PinnedTrustEntry {
    /// Hosts the key applies to.
    pub host_pattern: HostPattern,
    /// Accepted leaf public key.
    pub public_key: PublicKey,
}

impl PinnedTrustEntry {
    /// Pin `public_key` for `host_pattern`.
    pub fn new(host_pattern: HostPattern, public_key: PublicKey) -> Self {
        Self {
            host_pattern,
            public_key,
        }
    }
}

/// Config-file form: `{ "host": "*.example.com", "public_key": "<PEM or base64>" }`.
#[derive(Serialize, Deserialize)]
struct PinnedTrustEntryRepr {
    host: String,
    public_key: String,
}

impl TryFrom<PinnedTrustEntryRepr> for PinnedTrustEntry {
    type Error = anyhow::Error;

    fn try_from(repr: PinnedTrustEntryRepr) -> Result<Self> {
        let host_pattern = repr.host.parse()?;
        let public_key = PublicKey::from_pem(&repr.public_key)
            .with_context(|| format!("invalid pinned key for {}", repr.host))?;
        Ok(Self::new(host_pattern, public_key))
    }
}

impl From<PinnedTrustEntry> for PinnedTrustEntryRepr {
    fn from(entry: PinnedTrustEntry) -> Self {
        Self {
            host: entry.host_pattern.to_string(),
            public_key: entry.public_key.to_base64(),
        }
    }
}

/// DER certificates presented by a server, leaf first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertificateChain {
    certificates: Vec<Vec<u8>>,
}

impl CertificateChain {
    /// Build a chain from DER certificates, leaf first.
    pub fn new(certificates: Vec<Vec<u8>>) -> Self {
        Self { certificates }
    }

    /// The leaf (end-entity) certificate.
    pub fn leaf(&self) -> Option<&[u8]> {
        self.certificates.first().map(Vec::as_slice)
    }

    /// Certificates after the leaf.
    pub fn intermediates(&self) -> &[Vec<u8>] {
        self.certificates.get(1..).unwrap_or_default()
    }

    /// Returns `true` when no certificate was presented.
    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty()
    }
}

/// Standard certificate-chain validation (expiry, signatures, root of trust,
/// name).
pub trait ChainValidator: Send + Sync + fmt::Debug {
    /// Returns `true` if `chain` is valid for `host`.
    fn validate(&self, chain: &CertificateChain, host: &str) -> bool;
}

/// Extraction of the leaf certificate's public key.
pub trait KeyExtractor: Send + Sync + fmt::Debug {
    /// Public key of the leaf certificate, if the chain has a parseable leaf.
    fn leaf_public_key(&self, chain: &CertificateChain) -> Option<PublicKey>;
}

/// Pinning-aware trust decision shared by every TLS handshake.
#[derive(Debug, Clone)]
pub struct TrustValidator {
    entries: Arc<[PinnedTrustEntry]>,
    chain_validator: Arc<dyn ChainValidator>,
    key_extractor: Arc<dyn KeyExtractor>,
}

impl TrustValidator {
    /// Build a validator over `entries` with the given capabilities.
    pub fn new(
        entries: Vec<PinnedTrustEntry>,
        chain_validator: Arc<dyn ChainValidator>,
        key_extractor: Arc<dyn KeyExtractor>,
    ) -> Self {
        Self {
            entries: entries.into(),
            chain_validator,
            key_extractor,
        }
    }

    /// Build a validator using the bundled Mozilla roots and x509 key
    /// extraction.
    pub fn with_webpki_roots(entries: Vec<PinnedTrustEntry>) -> Result<Self> {
        let chain_validator = WebPkiChainValidator::with_webpki_roots()?;
        Ok(Self::new(
            entries,
            Arc::new(chain_validator),
            Arc::new(X509KeyExtractor),
        ))
    }

    /// Decide whether `chain` is trusted for `host`.
    ///
    /// - No host: rejected.
    /// - Chain validation failure: rejected, whatever the pins say.
    /// - Host without pins: accepted.
    /// - Pinned host: accepted iff the leaf key equals one of its pinned keys.
    pub fn verify(&self, chain: &CertificateChain, host: Option<&str>) -> bool {
        let Some(host) = host else {
            log::debug!("[Trust] No host for trust evaluation, rejecting");
            return false;
        };

        if !self.chain_validator.validate(chain, host) {
            log::debug!("[Trust] Chain validation failed for {host}");
            return false;
        }

        let mut pinned = self.pinned_keys(host).peekable();
        if pinned.peek().is_none() {
            return true;
        }

        let Some(leaf_key) = self.key_extractor.leaf_public_key(chain) else {
            log::debug!("[Trust] Could not extract leaf key for pinned host {host}");
            return false;
        };

        let trusted = pinned.any(|key| *key == leaf_key);
        if !trusted {
            log::debug!("[Trust] Leaf key for {host} matches no pinned key");
        }
        trusted
    }

    /// Keys pinned for `host`, across all matching entries.
    pub fn pinned_keys<'a>(&'a self, host: &'a str) -> impl Iterator<Item = &'a PublicKey> + 'a {
        self.entries
            .iter()
            .filter(move |entry| entry.host_pattern.matches(host))
            .map(|entry| &entry.public_key)
    }

    /// The full pinning table.
    pub fn entries(&self) -> &[PinnedTrustEntry] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct FixedChain(bool);

    impl ChainValidator for FixedChain {
        fn validate(&self, _chain: &CertificateChain, _host: &str) -> bool {
            self.0
        }
    }

    /// Treats the leaf certificate bytes as the key.
    #[derive(Debug)]
    struct LeafIsKey;

    impl KeyExtractor for LeafIsKey {
        fn leaf_public_key(&self, chain: &CertificateChain) -> Option<PublicKey> {
            chain.leaf().map(PublicKey::from_der)
        }
    }

    fn validator(entries: Vec<PinnedTrustEntry>, chain_ok: bool) -> TrustValidator {
        TrustValidator::new(entries, Arc::new(FixedChain(chain_ok)), Arc::new(LeafIsKey))
    }

    fn chain(leaf: &[u8]) -> CertificateChain {
        CertificateChain::new(vec![leaf.to_vec(), b"intermediate".to_vec()])
    }

    #[test]
    fn test_host_pattern_parsing() {
        assert_eq!("example.com".parse::<HostPattern>().unwrap(), HostPattern::equals("example.com"));
        assert_eq!(
            "*.Example.com".parse::<HostPattern>().unwrap(),
            HostPattern::EndsWith(".example.com".into())
        );
        assert_eq!(
            ".example.com".parse::<HostPattern>().unwrap(),
            HostPattern::EndsWith(".example.com".into())
        );
        assert!("".parse::<HostPattern>().is_err());
        assert!("*".parse::<HostPattern>().is_err());
    }

    #[test]
    fn test_host_pattern_matching() {
        let exact = HostPattern::equals("example.com");
        assert!(exact.matches("EXAMPLE.com"));
        assert!(exact.matches("example.com."));
        assert!(!exact.matches("api.example.com"));

        let suffix = HostPattern::ends_with(".example.com");
        assert!(suffix.matches("api.Example.com"));
        assert!(!suffix.matches("example.com"));
        assert!(!suffix.matches("evilexample.com"));
    }

    #[test]
    fn test_host_pattern_display_round_trips() {
        let suffix = HostPattern::ends_with(".example.com");
        assert_eq!(suffix.to_string(), "*.example.com");
        assert_eq!(suffix.to_string().parse::<HostPattern>().unwrap(), suffix);
    }

    #[test]
    fn test_chain_accessors() {
        let chain = chain(b"leaf");
        assert_eq!(chain.leaf(), Some(&b"leaf"[..]));
        assert_eq!(chain.intermediates().len(), 1);
        assert!(CertificateChain::default().leaf().is_none());
        assert!(CertificateChain::default().intermediates().is_empty());
    }

    #[test]
    fn test_missing_host_is_rejected() {
        let v = validator(vec![], true);
        assert!(!v.verify(&chain(b"k"), None));
    }

    #[test]
    fn test_failed_chain_overrides_matching_pin() {
        let pin = PinnedTrustEntry::new(HostPattern::equals("example.com"), PublicKey::from_der(b"k".to_vec()));
        let v = validator(vec![pin], false);
        assert!(!v.verify(&chain(b"k"), Some("example.com")));
    }

    #[test]
    fn test_multiple_entries_any_key_matches() {
        let entries = vec![
            PinnedTrustEntry::new(HostPattern::equals("example.com"), PublicKey::from_der(b"old".to_vec())),
            PinnedTrustEntry::new(HostPattern::ends_with(".com"), PublicKey::from_der(b"new".to_vec())),
        ];
        let v = validator(entries, true);
        assert!(v.verify(&chain(b"old"), Some("example.com")));
        assert!(v.verify(&chain(b"new"), Some("example.com")));
        assert!(!v.verify(&chain(b"other"), Some("example.com")));
        assert_eq!(v.pinned_keys("example.com").count(), 2);
    }

    #[test]
    fn test_pinned_host_without_leaf_is_rejected() {
        let pin = PinnedTrustEntry::new(HostPattern::equals("example.com"), PublicKey::from_der(b"k".to_vec()));
        let v = validator(vec![pin], true);
        assert!(!v.verify(&CertificateChain::default(), Some("example.com")));
    }

    #[test]
    fn test_public_key_debug_hides_bytes() {
        let key = PublicKey::from_der(vec![1, 2, 3]);
        assert_eq!(format!("{key:?}"), "PublicKey(3 bytes)");
    }
}
