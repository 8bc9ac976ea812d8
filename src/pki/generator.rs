//! Key, serial number and certificate generation.
//!
//! Every authority and leaf drives these three steps through a [`Generator`]
//! supplied at construction. [`SecureGenerator`] is the production
//! implementation backed by the operating system's CSPRNG; tests substitute
//! their own to simulate entropy or signing failures. A step a generator does
//! not implement fails with [`PkiError::FunctionNotImplemented`].
//!
//! Certificates are signed with ECDSA over SHA-384 (`ecdsa-with-SHA384`) using
//! P-256 keys; the 384-bit digest is truncated to the curve order as FIPS 186
//! prescribes.

use std::fmt::{self, Debug};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use const_oid::db::{rfc4519, rfc5912};
use const_oid::AssociatedOid;
use p256::ecdsa::signature::hazmat::PrehashSigner;
use p256::ecdsa::Signature;
use p256::pkcs8::EncodePublicKey;
use p256::SecretKey;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256, Sha384};
use tracing::debug;
use x509_cert::attr::AttributeTypeAndValue;
use x509_cert::certificate::{TbsCertificate, Version};
use x509_cert::der::asn1::{
    Any, BitString, GeneralizedTime, Ia5String, OctetString, SetOfVec, UtcTime,
};
use x509_cert::der::{DateTime, Decode, Encode, Tag};
use x509_cert::ext::pkix::name::GeneralName;
use x509_cert::ext::pkix::{
    AuthorityKeyIdentifier, BasicConstraints, KeyUsage, KeyUsages, SubjectAltName,
    SubjectKeyIdentifier,
};
use x509_cert::ext::Extension;
use x509_cert::name::{Name, RdnSequence, RelativeDistinguishedName};
use x509_cert::serial_number::SerialNumber as X509SerialNumber;
use x509_cert::spki::{AlgorithmIdentifierOwned, SubjectPublicKeyInfoOwned};
use x509_cert::time::{Time, Validity};
use zeroize::Zeroizing;

use super::authority::Issuer;
use super::certificate::Certificate;
use super::private_key::PrivateKey;
use crate::error::{PkiError, Result};

/// Root certificates may sign exactly one level of intermediates.
pub const ROOT_PATH_LEN: u8 = 1;

/// Validity dates from this year on are encoded as GeneralizedTime (RFC 5280 4.1.2.5).
const GENERALIZED_TIME_FROM_YEAR: u16 = 2050;

/// Length of the key identifiers placed in SKI/AKI extensions (RFC 7093 method 1).
const KEY_IDENTIFIER_LEN: usize = 20;

/// A positive 128-bit certificate serial number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SerialNumber(u128);

impl SerialNumber {
    /// Zero is not a valid serial number.
    pub fn new(value: u128) -> Option<Self> {
        (value != 0).then_some(Self(value))
    }

    pub fn value(self) -> u128 {
        self.0
    }

    /// Minimal big-endian encoding, without leading zero bytes.
    pub fn to_be_bytes(self) -> Vec<u8> {
        let bytes = self.0.to_be_bytes();
        let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len() - 1);
        bytes[start..].to_vec()
    }
}

impl fmt::Display for SerialNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The tier a certificate is issued for; decides its extensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertificateProfile {
    Root,
    Intermediate,
    Leaf,
}

impl CertificateProfile {
    pub fn is_ca(self) -> bool {
        !matches!(self, CertificateProfile::Leaf)
    }

    fn basic_constraints(self) -> BasicConstraints {
        match self {
            CertificateProfile::Root => BasicConstraints {
                ca: true,
                path_len_constraint: Some(ROOT_PATH_LEN),
            },
            // Intermediates only sign leaves; no further CAs below them.
            CertificateProfile::Intermediate => BasicConstraints {
                ca: true,
                path_len_constraint: Some(0),
            },
            CertificateProfile::Leaf => BasicConstraints {
                ca: false,
                path_len_constraint: None,
            },
        }
    }

    fn key_usage(self) -> KeyUsage {
        match self {
            CertificateProfile::Root | CertificateProfile::Intermediate => {
                KeyUsage(KeyUsages::KeyCertSign | KeyUsages::CRLSign)
            }
            CertificateProfile::Leaf => {
                KeyUsage(KeyUsages::DigitalSignature | KeyUsages::KeyEncipherment)
            }
        }
    }
}

/// `[not_before, not_after]` of a certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidityWindow {
    pub not_before: SystemTime,
    pub not_after: SystemTime,
}

impl ValidityWindow {
    /// Starts `skew` before `now` and ends `lifetime` after it.
    pub fn starting_at(now: SystemTime, skew: Duration, lifetime: Duration) -> Self {
        Self {
            not_before: now.checked_sub(skew).unwrap_or(now),
            not_after: now + lifetime,
        }
    }
}

/// Everything about a certificate except its keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateTemplate {
    pub profile: CertificateProfile,
    pub serial_number: SerialNumber,
    pub common_name: String,
    pub dns_names: Vec<String>,
    pub ip_addresses: Vec<IpAddr>,
    pub validity: ValidityWindow,
}

impl CertificateTemplate {
    pub fn new(
        profile: CertificateProfile,
        serial_number: SerialNumber,
        common_name: impl Into<String>,
        validity: ValidityWindow,
    ) -> Self {
        Self {
            profile,
            serial_number,
            common_name: common_name.into(),
            dns_names: Vec::new(),
            ip_addresses: Vec::new(),
            validity,
        }
    }

    pub fn with_alternative_names(mut self, dns_names: Vec<String>, ip_addresses: Vec<IpAddr>) -> Self {
        self.dns_names = dns_names;
        self.ip_addresses = ip_addresses;
        self
    }
}

/// The generation capability injected into every authority and leaf.
pub trait Generator: Debug + Send + Sync {
    fn generate_key(&self) -> Result<PrivateKey> {
        Err(PkiError::FunctionNotImplemented)
    }

    fn generate_serial_number(&self) -> Result<SerialNumber> {
        Err(PkiError::FunctionNotImplemented)
    }

    /// Signs `template` for `subject_key`. Without an issuer the
    /// certificate is self-signed by `subject_key`.
    fn generate_certificate(
        &self,
        _template: &CertificateTemplate,
        _subject_key: &PrivateKey,
        _issuer: Option<Issuer<'_>>,
    ) -> Result<Certificate> {
        Err(PkiError::FunctionNotImplemented)
    }

    /// Reference time for validity windows.
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SecureGenerator;

impl Generator for SecureGenerator {
    fn generate_key(&self) -> Result<PrivateKey> {
        generate_key()
    }

    fn generate_serial_number(&self) -> Result<SerialNumber> {
        generate_serial_number()
    }

    fn generate_certificate(
        &self,
        template: &CertificateTemplate,
        subject_key: &PrivateKey,
        issuer: Option<Issuer<'_>>,
    ) -> Result<Certificate> {
        sign_certificate(template, subject_key, issuer)
    }
}

pub fn default_generator() -> Arc<dyn Generator> {
    Arc::new(SecureGenerator)
}

/// Generates a P-256 private key from the operating system's CSPRNG.
pub fn generate_key() -> Result<PrivateKey> {
    let mut bytes = Zeroizing::new([0u8; 32]);
    loop {
        OsRng
            .try_fill_bytes(bytes.as_mut())
            .map_err(|e| PkiError::Entropy {
                reason: format!("failed to read key material: {}", e),
            })?;

        // Zero and values at or above the curve order are not valid scalars.
        if let Ok(secret) = SecretKey::from_slice(bytes.as_ref()) {
            return Ok(PrivateKey::new(secret));
        }
    }
}

/// Generates a random positive 128-bit serial number.
pub fn generate_serial_number() -> Result<SerialNumber> {
    let mut bytes = [0u8; 16];
    loop {
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|e| PkiError::Entropy {
                reason: format!("failed to read serial number: {}", e),
            })?;

        if let Some(serial) = SerialNumber::new(u128::from_be_bytes(bytes)) {
            return Ok(serial);
        }
    }
}

/// Builds and signs an X.509 v3 certificate.
pub fn sign_certificate(
    template: &CertificateTemplate,
    subject_key: &PrivateKey,
    issuer: Option<Issuer<'_>>,
) -> Result<Certificate> {
    let subject = distinguished_name(&template.common_name)?;
    let subject_public_key_info = public_key_info(subject_key)?;

    let (issuer_name, authority_key_id, signing_key) = match issuer {
        Some(issuer) => {
            let parent = x509_cert::Certificate::from_der(issuer.certificate.der()).map_err(|e| {
                PkiError::invalid_authority(format!("cannot parse issuer certificate: {}", e))
            })?;
            let authority_key_id = issuer
                .certificate
                .subject_key_id()
                .unwrap_or_else(|| key_identifier(&parent.tbs_certificate.subject_public_key_info));
            (
                parent.tbs_certificate.subject,
                Some(authority_key_id),
                issuer.private_key.signing_key(),
            )
        }
        None => (subject.clone(), None, subject_key.signing_key()),
    };

    let mut extensions = vec![
        extension(&template.profile.basic_constraints(), true)?,
        extension(&template.profile.key_usage(), true)?,
    ];
    if template.profile.is_ca() {
        let subject_key_id = key_identifier(&subject_public_key_info);
        extensions.push(extension(&SubjectKeyIdentifier(octets(subject_key_id)?), false)?);
    }
    if let Some(key_id) = authority_key_id {
        let authority = AuthorityKeyIdentifier {
            key_identifier: Some(octets(key_id)?),
            authority_cert_issuer: None,
            authority_cert_serial_number: None,
        };
        extensions.push(extension(&authority, false)?);
    }
    if let Some(names) = subject_alt_name(&template.dns_names, &template.ip_addresses)? {
        extensions.push(extension(&names, false)?);
    }

    let tbs_certificate = TbsCertificate {
        version: Version::V3,
        serial_number: X509SerialNumber::new(&template.serial_number.to_be_bytes())
            .map_err(der_error)?,
        signature: signature_algorithm(),
        issuer: issuer_name,
        validity: Validity {
            not_before: validity_time(template.validity.not_before)?,
            not_after: validity_time(template.validity.not_after)?,
        },
        subject,
        subject_public_key_info,
        issuer_unique_id: None,
        subject_unique_id: None,
        extensions: Some(extensions),
    };

    let tbs_der = tbs_certificate.to_der().map_err(der_error)?;
    let digest = Sha384::digest(&tbs_der);
    let signature = PrehashSigner::<Signature>::sign_prehash(&signing_key, &digest)
        .map_err(|e| PkiError::generation(format!("failed to sign certificate: {}", e)))?;

    let certificate = x509_cert::Certificate {
        tbs_certificate,
        signature_algorithm: signature_algorithm(),
        signature: BitString::from_bytes(signature.to_der().as_bytes()).map_err(der_error)?,
    };

    let der = certificate.to_der().map_err(der_error)?;
    debug!(
        "Signed {:?} certificate for {} (serial {})",
        template.profile, template.common_name, template.serial_number
    );
    Certificate::from_der(der)
}

pub(crate) fn signature_algorithm() -> AlgorithmIdentifierOwned {
    AlgorithmIdentifierOwned {
        oid: rfc5912::ECDSA_WITH_SHA_384,
        parameters: None,
    }
}

fn validity_time(time: SystemTime) -> Result<Time> {
    let date_time = DateTime::from_system_time(time).map_err(der_error)?;
    if date_time.year() < GENERALIZED_TIME_FROM_YEAR {
        let utc = UtcTime::from_date_time(date_time).map_err(der_error)?;
        Ok(Time::UtcTime(utc))
    } else {
        Ok(Time::GeneralTime(GeneralizedTime::from_date_time(date_time)))
    }
}

fn distinguished_name(common_name: &str) -> Result<Name> {
    let attribute = AttributeTypeAndValue {
        oid: rfc4519::CN,
        value: Any::new(Tag::Utf8String, common_name.as_bytes()).map_err(der_error)?,
    };
    let rdn = RelativeDistinguishedName(SetOfVec::try_from(vec![attribute]).map_err(der_error)?);
    Ok(RdnSequence(vec![rdn]))
}

fn public_key_info(key: &PrivateKey) -> Result<SubjectPublicKeyInfoOwned> {
    let document = key
        .public_key()
        .to_public_key_der()
        .map_err(|e| PkiError::generation(format!("failed to encode public key: {}", e)))?;
    SubjectPublicKeyInfoOwned::from_der(document.as_bytes()).map_err(der_error)
}

fn key_identifier(spki: &SubjectPublicKeyInfoOwned) -> Vec<u8> {
    let digest = Sha256::digest(spki.subject_public_key.raw_bytes());
    digest[..KEY_IDENTIFIER_LEN].to_vec()
}

fn subject_alt_name(dns_names: &[String], ip_addresses: &[IpAddr]) -> Result<Option<SubjectAltName>> {
    if dns_names.is_empty() && ip_addresses.is_empty() {
        return Ok(None);
    }

    let mut names = Vec::with_capacity(dns_names.len() + ip_addresses.len());
    for name in dns_names {
        let dns = Ia5String::new(name)
            .map_err(|e| PkiError::generation(format!("invalid DNS name {:?}: {}", name, e)))?;
        names.push(GeneralName::DnsName(dns));
    }
    for address in ip_addresses {
        let bytes = match address {
            IpAddr::V4(v4) => v4.octets().to_vec(),
            IpAddr::V6(v6) => v6.octets().to_vec(),
        };
        names.push(GeneralName::IpAddress(octets(bytes)?));
    }

    Ok(Some(SubjectAltName(names)))
}

fn extension<T: AssociatedOid + Encode>(value: &T, critical: bool) -> Result<Extension> {
    Ok(Extension {
        extn_id: T::OID,
        critical,
        extn_value: octets(value.to_der().map_err(der_error)?)?,
    })
}

fn octets(bytes: Vec<u8>) -> Result<OctetString> {
    OctetString::new(bytes).map_err(der_error)
}

fn der_error(e: x509_cert::der::Error) -> PkiError {
    PkiError::generation(format!("DER encoding failed: {}", e))
}
