use thiserror::Error;

pub type Result<T> = std::result::Result<T, PkiError>;

#[derive(Error, Debug)]
pub enum PkiError {
    /// Malformed PEM, wrong block type, failed decryption or a DER payload
    /// that is not the expected key/certificate type.
    #[error("invalid PEM: {reason}")]
    InvalidPem { reason: String },

    /// A generation or encoding step has no implementation configured.
    #[error("function not implemented")]
    FunctionNotImplemented,

    #[error("missing required field: {field}")]
    MissingRequired { field: &'static str },

    /// The parent CA lacks a usable certificate or private key.
    #[error("invalid certificate authority: {reason}")]
    InvalidCertificateAuthority { reason: String },

    #[error("entropy source failure: {reason}")]
    Entropy { reason: String },

    #[error("certificate generation failed: {reason}")]
    CertificateGeneration { reason: String },

    #[error("certificate validation failed: {reason}")]
    CertificateValidation { reason: String },

    #[error("encoding error: {reason}")]
    Encoding { reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PkiError {
    pub(crate) fn invalid_pem(reason: impl Into<String>) -> Self {
        PkiError::InvalidPem { reason: reason.into() }
    }

    pub(crate) fn invalid_authority(reason: impl Into<String>) -> Self {
        PkiError::InvalidCertificateAuthority { reason: reason.into() }
    }

    pub(crate) fn generation(reason: impl Into<String>) -> Self {
        PkiError::CertificateGeneration { reason: reason.into() }
    }

    pub(crate) fn validation(reason: impl Into<String>) -> Self {
        PkiError::CertificateValidation { reason: reason.into() }
    }
}
