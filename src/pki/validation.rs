//! Structural validity checks and chain verification.
//!
//! The `*_is_valid` functions answer yes or no and never fail; the reason a
//! certificate was rejected is logged at debug level. [`TrustChain`] exposes
//! the underlying chain verification with its error for callers that need it.

use std::time::{SystemTime, UNIX_EPOCH};

use rustls_pki_types::{CertificateDer, ServerName, UnixTime};
use tracing::debug;
use x509_parser::prelude::*;

use super::authority::{CertificateAuthority, Issuer};
use super::certificate::Certificate;
use super::intermediate::IntermediateCertificateAuthority;
use super::leaf::LeafCertificate;
use super::renewal::{is_due_for_renewal, renewal_deadline};
use super::root::RootCertificateAuthority;
use crate::error::{PkiError, Result};

/// The trust anchor and, when leaves are issued by a namespace CA, that
/// intermediate.
#[derive(Debug, Clone, Copy)]
pub struct TrustChain<'a> {
    root: &'a RootCertificateAuthority,
    intermediate: Option<&'a IntermediateCertificateAuthority>,
}

impl<'a> TrustChain<'a> {
    pub fn new(root: &'a RootCertificateAuthority) -> Self {
        Self {
            root,
            intermediate: None,
        }
    }

    pub fn with_intermediate(mut self, intermediate: &'a IntermediateCertificateAuthority) -> Self {
        self.intermediate = Some(intermediate);
        self
    }

    pub fn root(&self) -> &'a RootCertificateAuthority {
        self.root
    }

    pub fn intermediate(&self) -> Option<&'a IntermediateCertificateAuthority> {
        self.intermediate
    }

    /// The authority that signs leaves for this chain.
    pub fn issuing_authority(&self) -> &'a dyn CertificateAuthority {
        match self.intermediate {
            Some(intermediate) => intermediate,
            None => self.root,
        }
    }

    pub fn verify_leaf(&self, leaf: &Certificate, dns_name: Option<&str>) -> Result<()> {
        self.verify_leaf_at(leaf, dns_name, SystemTime::now())
    }

    /// Verifies `leaf` up to the root as sole trust anchor, with the
    /// intermediate supplied as an intermediate, and optionally checks that
    /// it is valid for `dns_name`.
    pub fn verify_leaf_at(&self, leaf: &Certificate, dns_name: Option<&str>, now: SystemTime) -> Result<()> {
        let root = self.root.certificate.as_ref().ok_or_else(|| {
            PkiError::invalid_authority("root certificate authority has no certificate")
        })?;
        let root_der = CertificateDer::from(root.der());
        let anchor = webpki::anchor_from_trusted_cert(&root_der).map_err(|e| {
            PkiError::validation(format!("root is not a usable trust anchor: {:?}", e))
        })?;

        let intermediates = match self.intermediate {
            Some(intermediate) => {
                let certificate = intermediate.certificate.as_ref().ok_or_else(|| {
                    PkiError::invalid_authority("intermediate certificate authority has no certificate")
                })?;
                vec![CertificateDer::from(certificate.der())]
            }
            None => Vec::new(),
        };

        let leaf_der = CertificateDer::from(leaf.der());
        let end_entity = webpki::EndEntityCert::try_from(&leaf_der)
            .map_err(|e| PkiError::validation(format!("cannot parse leaf certificate: {:?}", e)))?;

        let time = UnixTime::since_unix_epoch(now.duration_since(UNIX_EPOCH).unwrap_or_default());
        end_entity
            .verify_for_usage(
                webpki::ALL_VERIFICATION_ALGS,
                &[anchor],
                &intermediates,
                time,
                webpki::KeyUsage::server_auth(),
                None,
                None,
            )
            .map_err(|e| PkiError::validation(format!("chain verification failed: {:?}", e)))?;

        if let Some(name) = dns_name {
            let server_name = ServerName::try_from(name)
                .map_err(|e| PkiError::validation(format!("invalid DNS name {:?}: {}", name, e)))?;
            end_entity
                .verify_is_valid_for_subject_name(&server_name)
                .map_err(|e| {
                    PkiError::validation(format!("certificate is not valid for {}: {:?}", name, e))
                })?;
        }

        Ok(())
    }
}

impl<'a> From<&'a RootCertificateAuthority> for TrustChain<'a> {
    fn from(root: &'a RootCertificateAuthority) -> Self {
        TrustChain::new(root)
    }
}

pub fn root_is_valid(root: &RootCertificateAuthority) -> bool {
    root_is_valid_at(root, SystemTime::now())
}

pub fn root_is_valid_at(root: &RootCertificateAuthority, now: SystemTime) -> bool {
    log_rejection("Root CA", check_root(root, now))
}

pub fn intermediate_is_valid(
    intermediate: &IntermediateCertificateAuthority,
    root: &RootCertificateAuthority,
) -> bool {
    intermediate_is_valid_at(intermediate, root, SystemTime::now())
}

pub fn intermediate_is_valid_at(
    intermediate: &IntermediateCertificateAuthority,
    root: &RootCertificateAuthority,
    now: SystemTime,
) -> bool {
    log_rejection("Intermediate CA", check_intermediate(intermediate, root, now))
}

/// Whether the leaf chains to the trust anchor, is an end entity, matches
/// its key and is not yet due for renewal.
pub fn leaf_is_valid(chain: &TrustChain<'_>, leaf: &LeafCertificate) -> bool {
    leaf_is_valid_at(chain, leaf, SystemTime::now())
}

pub fn leaf_is_valid_at(chain: &TrustChain<'_>, leaf: &LeafCertificate, now: SystemTime) -> bool {
    log_rejection("Leaf certificate", check_leaf(chain, leaf, now))
}

fn log_rejection(what: &str, result: Result<()>) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            debug!("{} is not valid: {}", what, e);
            false
        }
    }
}

fn check_root(root: &RootCertificateAuthority, now: SystemTime) -> Result<()> {
    let issuer = root.issuer()?;
    let cert = issuer.certificate.parsed()?;

    if cert.subject().as_raw() != cert.issuer().as_raw() {
        return Err(PkiError::validation("root certificate is not self-issued"));
    }
    cert.verify_signature(None)
        .map_err(|e| PkiError::validation(format!("root signature does not verify: {}", e)))?;

    check_time(&cert, now)?;
    check_critical_extensions(&cert)?;
    check_authority_constraints(&cert)?;
    check_subject_key_id(issuer.certificate)?;

    check_key_pair(issuer)
}

fn check_intermediate(
    intermediate: &IntermediateCertificateAuthority,
    root: &RootCertificateAuthority,
    now: SystemTime,
) -> Result<()> {
    let issuer = intermediate.issuer()?;
    let root_certificate = root.certificate.as_ref().ok_or_else(|| {
        PkiError::invalid_authority("root certificate authority has no certificate")
    })?;

    let cert = issuer.certificate.parsed()?;
    let root_cert = root_certificate.parsed()?;

    if cert.issuer().as_raw() != root_cert.subject().as_raw() {
        return Err(PkiError::validation("issuer does not match the root subject"));
    }
    cert.verify_signature(Some(root_cert.public_key())).map_err(|e| {
        PkiError::validation(format!("intermediate is not signed by the root: {}", e))
    })?;

    check_time(&cert, now)?;
    check_critical_extensions(&cert)?;
    check_authority_constraints(&cert)?;

    if issuer.certificate.basic_constraints() != Some((true, Some(0))) {
        return Err(PkiError::validation("intermediate may sign further authorities"));
    }
    check_subject_key_id(issuer.certificate)?;

    let expected = IntermediateCertificateAuthority::common_name_for(
        &intermediate.namespace,
        &root_certificate.common_name(),
    );
    if issuer.certificate.common_name() != expected {
        return Err(PkiError::validation(format!(
            "common name {:?} does not match {:?}",
            issuer.certificate.common_name(),
            expected
        )));
    }

    check_key_pair(issuer)
}

fn check_leaf(chain: &TrustChain<'_>, leaf: &LeafCertificate, now: SystemTime) -> Result<()> {
    let (certificate, private_key) = match (&leaf.certificate, &leaf.private_key) {
        (Some(certificate), Some(private_key)) => (certificate, private_key),
        _ => return Err(PkiError::validation("leaf has not been generated")),
    };

    chain.verify_leaf_at(certificate, None, now)?;

    match certificate.basic_constraints() {
        Some((false, _)) => {}
        Some((true, _)) => return Err(PkiError::validation("leaf certificate is a CA")),
        None => return Err(PkiError::validation("leaf certificate has no basic constraints")),
    }

    if !private_key.matches(certificate) {
        return Err(PkiError::validation("private key does not match certificate"));
    }

    let (not_before, not_after) = (certificate.not_before(), certificate.not_after());
    if is_due_for_renewal(not_before, not_after, now) {
        let deadline = chrono::DateTime::<chrono::Utc>::from(renewal_deadline(not_before, not_after));
        return Err(PkiError::validation(format!(
            "due for renewal since {}",
            deadline.to_rfc3339()
        )));
    }

    Ok(())
}

fn check_time(cert: &X509Certificate<'_>, now: SystemTime) -> Result<()> {
    let now = super::certificate::unix_timestamp(now);
    let validity = cert.validity();

    if now < validity.not_before.timestamp() {
        return Err(PkiError::validation("certificate is not yet valid"));
    }
    if now > validity.not_after.timestamp() {
        return Err(PkiError::validation("certificate has expired"));
    }
    Ok(())
}

fn check_critical_extensions(cert: &X509Certificate<'_>) -> Result<()> {
    for extension in cert.extensions().iter().filter(|ext| ext.critical) {
        match extension.parsed_extension() {
            ParsedExtension::UnsupportedExtension { oid } => {
                return Err(PkiError::validation(format!(
                    "unhandled critical extension {}",
                    oid.to_id_string()
                )))
            }
            ParsedExtension::ParseError { error } => {
                return Err(PkiError::validation(format!(
                    "malformed critical extension {}: {}",
                    extension.oid.to_id_string(),
                    error
                )))
            }
            _ => {}
        }
    }
    Ok(())
}

fn check_authority_constraints(cert: &X509Certificate<'_>) -> Result<()> {
    match cert.basic_constraints() {
        Ok(Some(constraints)) if constraints.value.ca => {}
        Ok(_) => return Err(PkiError::validation("certificate is not a CA")),
        Err(e) => {
            return Err(PkiError::validation(format!("invalid basic constraints: {}", e)));
        }
    }

    match cert.key_usage() {
        Ok(Some(usage)) if !usage.value.key_cert_sign() => {
            Err(PkiError::validation("key usage does not permit certificate signing"))
        }
        Ok(_) => Ok(()),
        Err(e) => Err(PkiError::validation(format!("invalid key usage: {}", e))),
    }
}

fn check_subject_key_id(certificate: &Certificate) -> Result<()> {
    if certificate.subject_key_id().map_or(true, |id| id.is_empty()) {
        return Err(PkiError::validation("certificate has no subject key identifier"));
    }
    Ok(())
}

fn check_key_pair(issuer: Issuer<'_>) -> Result<()> {
    if issuer.private_key.matches(issuer.certificate) {
        Ok(())
    } else {
        Err(PkiError::validation("private key does not match certificate"))
    }
}
