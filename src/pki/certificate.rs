use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use p256::PublicKey;
use x509_parser::prelude::*;

use super::generator::SerialNumber;
use crate::error::{PkiError, Result};

/// A DER-encoded X.509 certificate.
///
/// The bytes are checked to parse as a certificate on construction; every
/// accessor re-parses them on demand so the value itself never changes.
/// Equality is byte equality of the DER encoding.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Certificate {
    der: Vec<u8>,
}

impl Certificate {
    pub fn from_der(der: impl Into<Vec<u8>>) -> Result<Self> {
        let der = der.into();
        X509Certificate::from_der(&der)
            .map_err(|e| PkiError::invalid_pem(format!("not a valid X.509 certificate: {}", e)))?;
        Ok(Self { der })
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    pub fn into_der(self) -> Vec<u8> {
        self.der
    }

    pub(crate) fn parsed(&self) -> Result<X509Certificate<'_>> {
        X509Certificate::from_der(&self.der)
            .map(|(_, cert)| cert)
            .map_err(|e| PkiError::invalid_pem(format!("not a valid X.509 certificate: {}", e)))
    }

    /// Subject common name, or an empty string when there is none.
    pub fn common_name(&self) -> String {
        self.parsed()
            .ok()
            .and_then(|cert| first_common_name(cert.subject()))
            .unwrap_or_default()
    }

    pub fn issuer_common_name(&self) -> String {
        self.parsed()
            .ok()
            .and_then(|cert| first_common_name(cert.issuer()))
            .unwrap_or_default()
    }

    /// DNS names of the Subject Alternative Name extension, in order.
    pub fn dns_names(&self) -> Vec<String> {
        self.subject_alternative_names(|name| match name {
            GeneralName::DNSName(dns) => Some(dns.to_string()),
            _ => None,
        })
    }

    pub fn ip_addresses(&self) -> Vec<IpAddr> {
        self.subject_alternative_names(|name| match name {
            GeneralName::IPAddress(bytes) => ip_from_bytes(bytes),
            _ => None,
        })
    }

    fn subject_alternative_names<T>(&self, select: impl Fn(&GeneralName<'_>) -> Option<T>) -> Vec<T> {
        let Ok(cert) = self.parsed() else {
            return Vec::new();
        };

        match cert.subject_alternative_name() {
            Ok(Some(san)) => san.value.general_names.iter().filter_map(&select).collect(),
            _ => Vec::new(),
        }
    }

    /// Whether the subject is exactly this common name and ordered DNS list.
    pub fn has_subject(&self, common_name: &str, dns_names: &[String]) -> bool {
        self.common_name() == common_name && self.dns_names() == dns_names
    }

    /// The serial number, when it fits the 128-bit positive range issued here.
    pub fn serial_number(&self) -> Option<SerialNumber> {
        let cert = self.parsed().ok()?;
        let raw = cert.raw_serial();
        let start = raw.iter().position(|b| *b != 0).unwrap_or(raw.len());
        let significant = &raw[start..];
        if significant.len() > 16 {
            return None;
        }

        let mut bytes = [0u8; 16];
        bytes[16 - significant.len()..].copy_from_slice(significant);
        SerialNumber::new(u128::from_be_bytes(bytes))
    }

    pub fn serial_hex(&self) -> String {
        self.parsed()
            .map(|cert| hex::encode_upper(cert.raw_serial()))
            .unwrap_or_default()
    }

    pub fn not_before(&self) -> SystemTime {
        self.parsed()
            .map(|cert| system_time(cert.validity().not_before.timestamp()))
            .unwrap_or(UNIX_EPOCH)
    }

    pub fn not_after(&self) -> SystemTime {
        self.parsed()
            .map(|cert| system_time(cert.validity().not_after.timestamp()))
            .unwrap_or(UNIX_EPOCH)
    }

    /// CA flag of the basic constraints; false when the extension is absent.
    pub fn is_ca(&self) -> bool {
        self.basic_constraints().map(|(ca, _)| ca).unwrap_or(false)
    }

    /// `(ca, path_len_constraint)` when a basic constraints extension is present.
    pub fn basic_constraints(&self) -> Option<(bool, Option<u32>)> {
        let cert = self.parsed().ok()?;
        let constraints = cert.basic_constraints().ok()??;
        Some((constraints.value.ca, constraints.value.path_len_constraint))
    }

    pub fn subject_key_id(&self) -> Option<Vec<u8>> {
        let cert = self.parsed().ok()?;
        cert.extensions().iter().find_map(|ext| match ext.parsed_extension() {
            ParsedExtension::SubjectKeyIdentifier(id) => Some(id.0.to_vec()),
            _ => None,
        })
    }

    pub fn authority_key_id(&self) -> Option<Vec<u8>> {
        let cert = self.parsed().ok()?;
        cert.extensions().iter().find_map(|ext| match ext.parsed_extension() {
            ParsedExtension::AuthorityKeyIdentifier(aki) => {
                aki.key_identifier.as_ref().map(|id| id.0.to_vec())
            }
            _ => None,
        })
    }

    pub fn public_key(&self) -> Option<PublicKey> {
        let cert = self.parsed().ok()?;
        PublicKey::from_sec1_bytes(&cert.public_key().subject_public_key.data).ok()
    }
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("common_name", &self.common_name())
            .field("serial", &self.serial_hex())
            .field("len", &self.der.len())
            .finish()
    }
}

fn first_common_name(name: &X509Name<'_>) -> Option<String> {
    name.iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_string)
}

fn ip_from_bytes(bytes: &[u8]) -> Option<IpAddr> {
    match bytes.len() {
        4 => {
            let octets: [u8; 4] = bytes.try_into().ok()?;
            Some(IpAddr::V4(Ipv4Addr::from(octets)))
        }
        16 => {
            let octets: [u8; 16] = bytes.try_into().ok()?;
            Some(IpAddr::V6(Ipv6Addr::from(octets)))
        }
        _ => None,
    }
}

pub(crate) fn system_time(timestamp: i64) -> SystemTime {
    if timestamp >= 0 {
        UNIX_EPOCH + Duration::from_secs(timestamp as u64)
    } else {
        UNIX_EPOCH - Duration::from_secs(timestamp.unsigned_abs())
    }
}

pub(crate) fn unix_timestamp(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_secs() as i64,
        Err(before) => -(before.duration().as_secs() as i64),
    }
}
