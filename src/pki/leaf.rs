use std::net::IpAddr;
use std::sync::Arc;

use tracing::info;

use super::authority::CertificateAuthority;
use super::certificate::Certificate;
use super::encoding::{unmarshal_certificate, unmarshal_private_key, PemBundle};
use super::generator::{
    default_generator, CertificateProfile, CertificateTemplate, Generator, ValidityWindow,
};
use super::private_key::PrivateKey;
use crate::config::PkiConfig;
use crate::error::{PkiError, Result};

/// A short-lived end-entity certificate identifying one workload.
#[derive(Debug, Clone)]
pub struct LeafCertificate {
    pub certificate: Option<Certificate>,
    pub private_key: Option<PrivateKey>,
    pub common_name: String,
    pub dns_names: Vec<String>,
    pub ip_addresses: Vec<IpAddr>,
    generator: Arc<dyn Generator>,
    config: PkiConfig,
}

impl LeafCertificate {
    pub fn new(
        common_name: impl Into<String>,
        dns_names: Vec<String>,
        ip_addresses: Vec<IpAddr>,
    ) -> Self {
        Self::with_generator(
            common_name,
            dns_names,
            ip_addresses,
            default_generator(),
            PkiConfig::default(),
        )
    }

    pub fn with_generator(
        common_name: impl Into<String>,
        dns_names: Vec<String>,
        ip_addresses: Vec<IpAddr>,
        generator: Arc<dyn Generator>,
        config: PkiConfig,
    ) -> Self {
        Self {
            certificate: None,
            private_key: None,
            common_name: common_name.into(),
            dns_names,
            ip_addresses,
            generator,
            config,
        }
    }

    /// Issues the certificate from `parent`, an intermediate or the root.
    pub fn generate(&mut self, parent: &dyn CertificateAuthority) -> Result<()> {
        if self.common_name.is_empty() {
            return Err(PkiError::MissingRequired { field: "common name" });
        }
        let issuer = parent.issuer()?;

        let private_key = self.generator.generate_key()?;
        let serial_number = self.generator.generate_serial_number()?;

        let validity = ValidityWindow::starting_at(
            self.generator.now(),
            self.config.clock_skew_tolerance(),
            self.config.leaf_validity(),
        );
        let template = CertificateTemplate::new(
            CertificateProfile::Leaf,
            serial_number,
            self.common_name.clone(),
            validity,
        )
        .with_alternative_names(self.dns_names.clone(), self.ip_addresses.clone());
        let certificate =
            self.generator
                .generate_certificate(&template, &private_key, Some(issuer))?;

        info!(
            "Issued leaf certificate: {} (serial {}, issuer {})",
            self.common_name,
            serial_number,
            issuer.certificate.common_name()
        );
        self.certificate = Some(certificate);
        self.private_key = Some(private_key);
        Ok(())
    }

    /// Restores a stored leaf; its subject is read back from the certificate.
    pub fn parse(private_key: &[u8], certificate: &[u8], password: Option<&str>) -> Result<Self> {
        Self::parse_with(
            private_key,
            certificate,
            password,
            default_generator(),
            PkiConfig::default(),
        )
    }

    pub fn parse_with(
        private_key: &[u8],
        certificate: &[u8],
        password: Option<&str>,
        generator: Arc<dyn Generator>,
        config: PkiConfig,
    ) -> Result<Self> {
        let certificate = unmarshal_certificate(certificate)?;
        let private_key = unmarshal_private_key(private_key, password)?;

        let mut leaf = Self::with_generator(
            certificate.common_name(),
            certificate.dns_names(),
            certificate.ip_addresses(),
            generator,
            config,
        );
        leaf.certificate = Some(certificate);
        leaf.private_key = Some(private_key);
        Ok(leaf)
    }

    pub fn to_pem(&self, password: Option<&str>) -> Result<PemBundle> {
        match (&self.certificate, &self.private_key) {
            (Some(certificate), Some(private_key)) => {
                PemBundle::encode(private_key, certificate, password)
            }
            _ => Err(PkiError::MissingRequired {
                field: "leaf certificate and private key",
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pki::intermediate::IntermediateCertificateAuthority;
    use crate::pki::root::RootCertificateAuthority;
    use crate::pki::test_utils::{FaultyGenerator, Step};
    use pretty_assertions::assert_eq;

    fn generated_root() -> RootCertificateAuthority {
        let mut root = RootCertificateAuthority::new();
        root.generate().expect("Root generation should succeed");
        root
    }

    #[test]
    fn test_generate_leaf_from_intermediate() {
        let root = generated_root();
        let mut intermediate = IntermediateCertificateAuthority::new("ns1");
        intermediate.generate(&root).unwrap();

        let dns_names = vec!["svc.ns1".to_string(), "svc.ns1.svc".to_string()];
        let ips: Vec<IpAddr> = vec!["10.1.2.3".parse().unwrap()];
        let mut leaf = LeafCertificate::new("svc.ns1", dns_names.clone(), ips.clone());
        leaf.generate(&intermediate).expect("Leaf generation should succeed");

        let certificate = leaf.certificate.as_ref().unwrap();
        let parent = intermediate.certificate.as_ref().unwrap();
        assert_eq!(certificate.common_name(), "svc.ns1");
        assert_eq!(certificate.issuer_common_name(), parent.common_name());
        assert_eq!(certificate.dns_names(), dns_names);
        assert_eq!(certificate.ip_addresses(), ips);
        assert_eq!(certificate.basic_constraints(), Some((false, None)));
        assert_eq!(certificate.authority_key_id(), parent.subject_key_id());
        assert!(leaf.private_key.as_ref().unwrap().matches(certificate));
    }

    #[test]
    fn test_leaf_validity_window() {
        let root = generated_root();
        let mut leaf = LeafCertificate::new("svc", Vec::new(), Vec::new());
        leaf.generate(&root).unwrap();

        let certificate = leaf.certificate.as_ref().unwrap();
        let lifetime = certificate
            .not_after()
            .duration_since(certificate.not_before())
            .unwrap();
        let config = PkiConfig::default();
        assert_eq!(lifetime, config.leaf_validity() + config.clock_skew_tolerance());
    }

    #[test]
    fn test_missing_common_name() {
        let root = generated_root();
        let mut leaf = LeafCertificate::new("", vec!["svc".to_string()], Vec::new());
        let result = leaf.generate(&root);
        assert!(matches!(result, Err(PkiError::MissingRequired { field: "common name" })));

        // Checked before the parent.
        let result = leaf.generate(&RootCertificateAuthority::new());
        assert!(matches!(result, Err(PkiError::MissingRequired { .. })));
    }

    #[test]
    fn test_invalid_parent() {
        let mut root = generated_root();
        root.private_key = None;

        let mut leaf = LeafCertificate::new("svc", Vec::new(), Vec::new());
        let result = leaf.generate(&root);
        assert!(matches!(result, Err(PkiError::InvalidCertificateAuthority { .. })));
        assert!(leaf.certificate.is_none());
        assert!(leaf.private_key.is_none());

        let intermediate = IntermediateCertificateAuthority::new("ns1");
        let result = leaf.generate(&intermediate);
        assert!(matches!(result, Err(PkiError::InvalidCertificateAuthority { .. })));
    }

    #[test]
    fn test_generation_errors_are_returned_verbatim() {
        let root = generated_root();

        for step in [Step::Key, Step::Serial, Step::Certificate] {
            let generator = FaultyGenerator::new().without(step).shared();
            let mut leaf = LeafCertificate::with_generator(
                "svc",
                Vec::new(),
                Vec::new(),
                generator,
                PkiConfig::default(),
            );
            assert!(matches!(leaf.generate(&root), Err(PkiError::FunctionNotImplemented)));

            let generator = FaultyGenerator::new().failing(step, "no entropy").shared();
            let mut leaf = LeafCertificate::with_generator(
                "svc",
                Vec::new(),
                Vec::new(),
                generator,
                PkiConfig::default(),
            );
            match leaf.generate(&root) {
                Err(PkiError::Entropy { reason }) => assert_eq!(reason, "no entropy"),
                other => panic!("Expected Entropy error, got {:?}", other),
            }
            assert!(leaf.certificate.is_none());
        }
    }

    #[test]
    fn test_parse_roundtrip() {
        let root = generated_root();
        let ips: Vec<IpAddr> = vec!["::1".parse().unwrap()];
        let mut leaf = LeafCertificate::new("svc", vec!["svc.ns1".to_string()], ips.clone());
        leaf.generate(&root).unwrap();

        let bundle = leaf.to_pem(None).unwrap();
        let parsed = LeafCertificate::parse(&bundle.private_key, &bundle.certificate, None).unwrap();

        assert_eq!(parsed.common_name, "svc");
        assert_eq!(parsed.dns_names, vec!["svc.ns1".to_string()]);
        assert_eq!(parsed.ip_addresses, ips);
        assert_eq!(parsed.certificate, leaf.certificate);
        assert_eq!(parsed.private_key, leaf.private_key);
    }

    #[test]
    fn test_parse_with_keeps_config() {
        let root = generated_root();
        let mut leaf = LeafCertificate::new("svc", vec!["svc.ns1".to_string()], Vec::new());
        leaf.generate(&root).unwrap();
        let bundle = leaf.to_pem(None).unwrap();

        let config = PkiConfig {
            leaf_validity_days: 7,
            ..Default::default()
        };
        let mut restored = LeafCertificate::parse_with(
            &bundle.private_key,
            &bundle.certificate,
            None,
            default_generator(),
            config.clone(),
        )
        .unwrap();
        assert_eq!(restored.certificate, leaf.certificate);

        restored.generate(&root).unwrap();
        let certificate = restored.certificate.as_ref().unwrap();
        let lifetime = certificate
            .not_after()
            .duration_since(certificate.not_before())
            .unwrap();
        assert_eq!(lifetime, config.leaf_validity() + config.clock_skew_tolerance());
        assert_eq!(certificate.dns_names(), vec!["svc.ns1".to_string()]);
    }

    #[test]
    fn test_to_pem_requires_generation() {
        let leaf = LeafCertificate::new("svc", Vec::new(), Vec::new());
        assert!(matches!(leaf.to_pem(None), Err(PkiError::MissingRequired { .. })));
    }
}
