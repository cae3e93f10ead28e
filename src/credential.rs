//! Push channel credentials.
//!
//! The access token is zeroized on drop and never printed by `Debug`.
//! The push channel reads credentials through [`CredentialSource`] on every
//! connection attempt; [`CredentialHolder`] is the in-memory source the
//! session owner updates.

use std::fmt;
use std::sync::{PoisonError, RwLock};

use zeroize::Zeroizing;

/// Bearer-style access token.
#[derive(Clone)]
pub struct AccessToken {
    token: Zeroizing<String>,
    token_type: String,
}

impl AccessToken {
    /// Token of the given type (usually `Bearer`).
    pub fn new(token: impl Into<String>, token_type: impl Into<String>) -> Self {
        Self {
            token: Zeroizing::new(token.into()),
            token_type: token_type.into(),
        }
    }

    /// `Bearer` token.
    pub fn bearer(token: impl Into<String>) -> Self {
        Self::new(token, "Bearer")
    }

    /// Token type, e.g. `Bearer`.
    pub fn token_type(&self) -> &str {
        &self.token_type
    }

    /// Raw token value.
    pub fn secret(&self) -> &str {
        &self.token
    }

    /// Value for the `Authorization` header: `<type> <token>`.
    pub fn authorization_header(&self) -> Zeroizing<String> {
        Zeroizing::new(format!("{} {}", self.token_type, self.token.as_str()))
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("token_type", &self.token_type)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

/// Everything needed to authorize the push connection.
#[derive(Debug, Clone)]
pub struct Credential {
    /// Token sent in the `Authorization` header.
    pub access_token: AccessToken,
    /// Client identifier sent as the `client` query parameter.
    pub client_id: Option<String>,
}

impl Credential {
    /// Credential for `client_id`.
    pub fn new(access_token: AccessToken, client_id: impl Into<String>) -> Self {
        Self {
            access_token,
            client_id: Some(client_id.into()),
        }
    }

    /// Credential without a registered client yet.
    pub fn without_client(access_token: AccessToken) -> Self {
        Self {
            access_token,
            client_id: None,
        }
    }
}

/// Supplies the current credential, or `None` when signed out.
pub trait CredentialSource: Send + Sync + fmt::Debug {
    /// Current credential.
    fn current(&self) -> Option<Credential>;
}

/// In-memory credential source.
#[derive(Debug, Default)]
pub struct CredentialHolder {
    current: RwLock<Option<Credential>>,
}

impl CredentialHolder {
    /// Holder starting with `credential`.
    pub fn new(credential: Option<Credential>) -> Self {
        Self {
            current: RwLock::new(credential),
        }
    }

    /// Replace the stored credential.
    pub fn replace(&self, credential: Option<Credential>) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = credential;
    }
}

impl CredentialSource for CredentialHolder {
    fn current(&self) -> Option<Credential> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authorization_header() {
        let token = AccessToken::bearer("abc123");
        assert_eq!(token.authorization_header().as_str(), "Bearer abc123");
        assert_eq!(token.secret(), "abc123");
    }

    #[test]
    fn test_debug_redacts_token() {
        let credential = Credential::new(AccessToken::bearer("super-secret"), "client-1");
        let debug = format!("{credential:?}");
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("[REDACTED]"));
        assert!(debug.contains("client-1"));
    }

    #[test]
    fn test_holder_replace() {
        let holder = CredentialHolder::default();
        assert!(holder.current().is_none());

        holder.replace(Some(Credential::without_client(AccessToken::bearer("t"))));
        let current = holder.current().unwrap();
        assert!(current.client_id.is_none());

        holder.replace(None);
        assert!(holder.current().is_none());
    }
}
