//! Credential seam between the launcher core and the account layer.
//!
//! The core never logs in or out; it only asks whether a credential exists and
//! borrows it for official-source requests.

use std::fmt;

/// Bearer token for the official download API.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Value for an `Authorization` header
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

// Tokens end up in logs through Debug formatting of request structs.
impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthToken(***)")
    }
}

/// Supplies the download credential, if the player is signed in.
pub trait CredentialProvider: Send + Sync {
    fn has_credential(&self) -> bool {
        self.credential().is_some()
    }

    fn credential(&self) -> Option<AuthToken>;
}

/// Provider for signed-out sessions and tests.
pub struct NoCredential;

impl CredentialProvider for NoCredential {
    fn credential(&self) -> Option<AuthToken> {
        None
    }
}

/// Fixed token, mostly useful in tests and headless tooling.
pub struct StaticCredential(pub AuthToken);

impl CredentialProvider for StaticCredential {
    fn credential(&self) -> Option<AuthToken> {
        Some(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_redacts_token() {
        let token = AuthToken::new("secret-value");
        assert_eq!(format!("{:?}", token), "AuthToken(***)");
        assert_eq!(token.bearer(), "Bearer secret-value");
    }

    #[test]
    fn has_credential_follows_credential() {
        assert!(!NoCredential.has_credential());
        assert!(StaticCredential(AuthToken::new("t")).has_credential());
    }
}
