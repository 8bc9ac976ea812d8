use std::fmt;

use p256::ecdsa::SigningKey;
use p256::{PublicKey, SecretKey};

use super::certificate::Certificate;

/// A P-256 private key owned by exactly one certificate or authority.
#[derive(Clone, PartialEq, Eq)]
pub struct PrivateKey {
    secret: SecretKey,
}

impl PrivateKey {
    pub fn new(secret: SecretKey) -> Self {
        Self { secret }
    }

    pub fn secret_key(&self) -> &SecretKey {
        &self.secret
    }

    pub fn public_key(&self) -> PublicKey {
        self.secret.public_key()
    }

    pub(crate) fn signing_key(&self) -> SigningKey {
        SigningKey::from(&self.secret)
    }

    /// Whether the certificate embeds the public half of this key.
    pub fn matches(&self, certificate: &Certificate) -> bool {
        certificate
            .public_key()
            .map(|public_key| public_key == self.public_key())
            .unwrap_or(false)
    }
}

impl From<SecretKey> for PrivateKey {
    fn from(secret: SecretKey) -> Self {
        Self::new(secret)
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKey")
            .field("curve", &"P-256")
            .finish_non_exhaustive()
    }
}
