//! Bearer-token check for administrative cache operations.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing bearer token")]
    Missing,
    #[error("invalid bearer token")]
    Invalid,
    #[error("administrative token is not configured")]
    NotConfigured,
}

/// Compares presented tokens against the configured admin secret.
///
/// Without a configured secret every request is rejected.
#[derive(Clone, Default)]
pub struct AdminGuard {
    hashed_secret: Option<Vec<u8>>,
}

impl AdminGuard {
    pub fn new(secret: Option<&str>) -> Self {
        Self {
            hashed_secret: secret
                .filter(|secret| !secret.is_empty())
                .map(hash_secret),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.hashed_secret.is_some()
    }

    pub fn authorize(&self, token: Option<&str>) -> Result<(), AuthError> {
        let expected = self.hashed_secret.as_ref().ok_or(AuthError::NotConfigured)?;
        let token = token
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or(AuthError::Missing)?;

        if expected.ct_eq(&hash_secret(token)).unwrap_u8() == 0 {
            return Err(AuthError::Invalid);
        }
        Ok(())
    }
}

impl std::fmt::Debug for AdminGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminGuard")
            .field("configured", &self.is_configured())
            .finish()
    }
}

fn hash_secret(secret: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.finalize().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_matching_token() {
        let guard = AdminGuard::new(Some("s3cret-token"));
        assert_eq!(guard.authorize(Some("s3cret-token")), Ok(()));
    }

    #[test]
    fn rejects_wrong_or_missing_token() {
        let guard = AdminGuard::new(Some("s3cret-token"));
        assert_eq!(guard.authorize(Some("guess")), Err(AuthError::Invalid));
        assert_eq!(guard.authorize(Some("  ")), Err(AuthError::Missing));
        assert_eq!(guard.authorize(None), Err(AuthError::Missing));
    }

    #[test]
    fn fails_closed_without_secret() {
        for guard in [AdminGuard::new(None), AdminGuard::new(Some(""))] {
            assert!(!guard.is_configured());
            assert_eq!(
                guard.authorize(Some("anything")),
                Err(AuthError::NotConfigured)
            );
        }
    }

    #[test]
    fn debug_hides_secret() {
        let rendered = format!("{:?}", AdminGuard::new(Some("s3cret-token")));
        assert!(!rendered.contains("s3cret"));
    }
}
