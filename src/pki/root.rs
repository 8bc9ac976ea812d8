use std::sync::Arc;

use tracing::info;

use super::authority::CertificateAuthority;
use super::certificate::Certificate;
use super::encoding::{unmarshal_certificate, unmarshal_private_key, PemBundle};
use super::generator::{
    default_generator, CertificateProfile, CertificateTemplate, Generator, ValidityWindow,
};
use super::private_key::PrivateKey;
use super::validation;
use crate::config::PkiConfig;
use crate::error::{PkiError, Result};

/// The self-signed trust anchor of the hierarchy.
///
/// Both fields stay `None` until [`generate`](Self::generate) succeeds or the
/// authority is restored with [`parse`](Self::parse); a half-initialized root
/// is rejected by every signing operation.
#[derive(Debug, Clone)]
pub struct RootCertificateAuthority {
    pub certificate: Option<Certificate>,
    pub private_key: Option<PrivateKey>,
    generator: Arc<dyn Generator>,
    config: PkiConfig,
}

impl RootCertificateAuthority {
    pub fn new() -> Self {
        Self::with_generator(default_generator(), PkiConfig::default())
    }

    pub fn with_generator(generator: Arc<dyn Generator>, config: PkiConfig) -> Self {
        Self {
            certificate: None,
            private_key: None,
            generator,
            config,
        }
    }

    pub fn config(&self) -> &PkiConfig {
        &self.config
    }

    /// Creates the key pair and the self-signed certificate.
    ///
    /// Nothing is stored unless all three generation steps succeed; their
    /// errors are returned unchanged.
    pub fn generate(&mut self) -> Result<()> {
        let private_key = self.generator.generate_key()?;
        let serial_number = self.generator.generate_serial_number()?;

        let validity = ValidityWindow::starting_at(
            self.generator.now(),
            self.config.clock_skew_tolerance(),
            self.config.root_validity(),
        );
        let template = CertificateTemplate::new(
            CertificateProfile::Root,
            serial_number,
            self.config.root_common_name.clone(),
            validity,
        );
        let certificate = self
            .generator
            .generate_certificate(&template, &private_key, None)?;

        info!(
            "Generated root CA certificate: {} (serial {})",
            template.common_name, serial_number
        );
        self.certificate = Some(certificate);
        self.private_key = Some(private_key);
        Ok(())
    }

    /// Restores a root from its stored PEM key and certificate.
    pub fn parse(private_key: &[u8], certificate: &[u8], password: Option<&str>) -> Result<Self> {
        Self::parse_with(
            private_key,
            certificate,
            password,
            default_generator(),
            PkiConfig::default(),
        )
    }

    /// Like [`parse`](Self::parse), keeping `generator` and `config` for
    /// whatever the restored root issues next.
    pub fn parse_with(
        private_key: &[u8],
        certificate: &[u8],
        password: Option<&str>,
        generator: Arc<dyn Generator>,
        config: PkiConfig,
    ) -> Result<Self> {
        let mut root = Self::with_generator(generator, config);
        root.certificate = Some(unmarshal_certificate(certificate)?);
        root.private_key = Some(unmarshal_private_key(private_key, password)?);
        Ok(root)
    }

    pub fn to_pem(&self, password: Option<&str>) -> Result<PemBundle> {
        let issuer = self.issuer().map_err(|_| PkiError::MissingRequired {
            field: "root certificate and private key",
        })?;
        PemBundle::encode(issuer.private_key, issuer.certificate, password)
    }

    pub fn is_valid(&self) -> bool {
        validation::root_is_valid(self)
    }
}

impl Default for RootCertificateAuthority {
    fn default() -> Self {
        Self::new()
    }
}

impl CertificateAuthority for RootCertificateAuthority {
    fn certificate(&self) -> Option<&Certificate> {
        self.certificate.as_ref()
    }

    fn private_key(&self) -> Option<&PrivateKey> {
        self.private_key.as_ref()
    }
}
