//! Private certificate authority hierarchy.
//!
//! A self-signed root signs one intermediate per namespace, and each
//! intermediate signs short-lived leaf certificates for the workloads in its
//! namespace. Everything here works on in-memory objects and PEM byte
//! buffers; persisting those buffers is up to the caller.
//!
//! The free functions below are the call surface used by reconcilers:
//!
//! ```ignore
//! let root = pki::generate_root()?;
//! let intermediate = pki::generate_intermediate("ns1", &root)?;
//! let chain = TrustChain::new(&root).with_intermediate(&intermediate);
//! let leaf = pki::regenerate_leaf_when_necessary(chain, stored.as_ref(), "svc.ns1", &dns_names)?;
//! ```

pub mod authority;
pub mod certificate;
pub mod encoding;
pub mod generator;
pub mod intermediate;
pub mod leaf;
pub mod legacy_encryption;
pub mod private_key;
pub mod renewal;
pub mod root;
pub mod validation;

#[cfg(test)]
pub(crate) mod test_utils;

use std::net::IpAddr;

pub use authority::{CertificateAuthority, Issuer};
pub use certificate::Certificate;
pub use encoding::{
    marshal_certificate, marshal_private_key, marshal_private_key_with, unmarshal_certificate,
    unmarshal_private_key, unmarshal_private_key_with, KeyEncoding, PemBundle, Sec1Encoding,
};
pub use generator::{
    default_generator, generate_key, generate_serial_number, CertificateProfile,
    CertificateTemplate, Generator, SecureGenerator, SerialNumber, ValidityWindow,
};
pub use intermediate::IntermediateCertificateAuthority;
pub use leaf::LeafCertificate;
pub use private_key::PrivateKey;
pub use renewal::{is_due_for_renewal, renewal_deadline, RenewalPolicy};
pub use root::RootCertificateAuthority;
pub use validation::{intermediate_is_valid, leaf_is_valid, root_is_valid, TrustChain};

use crate::error::Result;

pub fn generate_root() -> Result<RootCertificateAuthority> {
    let mut root = RootCertificateAuthority::new();
    root.generate()?;
    Ok(root)
}

pub fn parse_root(
    private_key: &[u8],
    certificate: &[u8],
    password: Option<&str>,
) -> Result<RootCertificateAuthority> {
    RootCertificateAuthority::parse(private_key, certificate, password)
}

pub fn generate_intermediate(
    namespace: &str,
    root: &RootCertificateAuthority,
) -> Result<IntermediateCertificateAuthority> {
    let mut intermediate = IntermediateCertificateAuthority::new(namespace);
    intermediate.generate(root)?;
    Ok(intermediate)
}

pub fn parse_intermediate(
    namespace: &str,
    private_key: &[u8],
    certificate: &[u8],
    password: Option<&str>,
) -> Result<IntermediateCertificateAuthority> {
    IntermediateCertificateAuthority::parse(namespace, private_key, certificate, password)
}

pub fn generate_leaf(
    common_name: &str,
    dns_names: Vec<String>,
    ip_addresses: Vec<IpAddr>,
    parent: &dyn CertificateAuthority,
) -> Result<LeafCertificate> {
    let mut leaf = LeafCertificate::new(common_name, dns_names, ip_addresses);
    leaf.generate(parent)?;
    Ok(leaf)
}

/// Keeps `leaf` when it is valid for `chain` and already has this subject,
/// otherwise issues a replacement. `chain` may be a bare root.
pub fn regenerate_leaf_when_necessary<'a>(
    chain: impl Into<TrustChain<'a>>,
    leaf: Option<&LeafCertificate>,
    common_name: &str,
    dns_names: &[String],
) -> Result<LeafCertificate> {
    RenewalPolicy::new().regenerate_leaf_when_necessary(&chain.into(), leaf, common_name, dns_names)
}

pub fn is_root_valid(root: &RootCertificateAuthority) -> bool {
    root_is_valid(root)
}
