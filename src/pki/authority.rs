use super::certificate::Certificate;
use super::private_key::PrivateKey;
use crate::error::{PkiError, Result};

/// Anything able to sign certificates: the root, or a namespace intermediate.
pub trait CertificateAuthority {
    fn certificate(&self) -> Option<&Certificate>;

    fn private_key(&self) -> Option<&PrivateKey>;

    /// Borrows the signing material, rejecting an authority that has not
    /// been generated or parsed yet.
    fn issuer(&self) -> Result<Issuer<'_>> {
        match (self.certificate(), self.private_key()) {
            (Some(certificate), Some(private_key)) => Ok(Issuer {
                certificate,
                private_key,
            }),
            (None, _) => Err(PkiError::invalid_authority(
                "certificate authority has no certificate; it needs to be generated",
            )),
            (_, None) => Err(PkiError::invalid_authority(
                "certificate authority has no private key; it needs to be generated",
            )),
        }
    }
}

/// Signing material of a parent authority.
#[derive(Debug, Clone, Copy)]
pub struct Issuer<'a> {
    pub certificate: &'a Certificate,
    pub private_key: &'a PrivateKey,
}
