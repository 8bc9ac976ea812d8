use std::sync::Arc;

use tracing::info;

use super::authority::CertificateAuthority;
use super::certificate::Certificate;
use super::encoding::{unmarshal_certificate, unmarshal_private_key, PemBundle};
use super::generator::{
    default_generator, CertificateProfile, CertificateTemplate, Generator, ValidityWindow,
};
use super::private_key::PrivateKey;
use super::root::RootCertificateAuthority;
use super::validation;
use crate::config::PkiConfig;
use crate::error::{PkiError, Result};

/// A namespace-scoped CA signed by the root. Its path length of zero
/// forbids it from signing further CAs.
#[derive(Debug, Clone)]
pub struct IntermediateCertificateAuthority {
    pub certificate: Option<Certificate>,
    pub private_key: Option<PrivateKey>,
    pub namespace: String,
    generator: Arc<dyn Generator>,
    config: PkiConfig,
}

impl IntermediateCertificateAuthority {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self::with_generator(namespace, default_generator(), PkiConfig::default())
    }

    pub fn with_generator(
        namespace: impl Into<String>,
        generator: Arc<dyn Generator>,
        config: PkiConfig,
    ) -> Self {
        Self {
            certificate: None,
            private_key: None,
            namespace: namespace.into(),
            generator,
            config,
        }
    }

    /// Subject common name of the intermediate for `namespace`.
    pub fn common_name_for(namespace: &str, root_common_name: &str) -> String {
        format!("{}.{}", namespace, root_common_name)
    }

    pub fn generate(&mut self, root: &RootCertificateAuthority) -> Result<()> {
        if self.namespace.is_empty() {
            return Err(PkiError::MissingRequired { field: "namespace" });
        }
        let issuer = root.issuer()?;

        let private_key = self.generator.generate_key()?;
        let serial_number = self.generator.generate_serial_number()?;

        let validity = ValidityWindow::starting_at(
            self.generator.now(),
            self.config.clock_skew_tolerance(),
            self.config.intermediate_validity(),
        );
        let common_name =
            Self::common_name_for(&self.namespace, &issuer.certificate.common_name());
        let template = CertificateTemplate::new(
            CertificateProfile::Intermediate,
            serial_number,
            common_name,
            validity,
        );
        let certificate =
            self.generator
                .generate_certificate(&template, &private_key, Some(issuer))?;

        info!(
            "Generated intermediate CA certificate: {} (serial {})",
            template.common_name, serial_number
        );
        self.certificate = Some(certificate);
        self.private_key = Some(private_key);
        Ok(())
    }

    pub fn parse(
        namespace: impl Into<String>,
        private_key: &[u8],
        certificate: &[u8],
        password: Option<&str>,
    ) -> Result<Self> {
        Self::parse_with(
            namespace,
            private_key,
            certificate,
            password,
            default_generator(),
            PkiConfig::default(),
        )
    }

    pub fn parse_with(
        namespace: impl Into<String>,
        private_key: &[u8],
        certificate: &[u8],
        password: Option<&str>,
        generator: Arc<dyn Generator>,
        config: PkiConfig,
    ) -> Result<Self> {
        let mut intermediate = Self::with_generator(namespace, generator, config);
        intermediate.certificate = Some(unmarshal_certificate(certificate)?);
        intermediate.private_key = Some(unmarshal_private_key(private_key, password)?);
        Ok(intermediate)
    }

    pub fn to_pem(&self, password: Option<&str>) -> Result<PemBundle> {
        let issuer = self.issuer().map_err(|_| PkiError::MissingRequired {
            field: "intermediate certificate and private key",
        })?;
        PemBundle::encode(issuer.private_key, issuer.certificate, password)
    }

    pub fn is_valid(&self, root: &RootCertificateAuthority) -> bool {
        validation::intermediate_is_valid(self, root)
    }
}

impl CertificateAuthority for IntermediateCertificateAuthority {
    fn certificate(&self) -> Option<&Certificate> {
        self.certificate.as_ref()
    }

    fn private_key(&self) -> Option<&PrivateKey> {
        self.private_key.as_ref()
    }
}
