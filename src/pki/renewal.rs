//! Time-based renewal policy.
//!
//! A certificate is due for renewal once only a third of its validity window
//! remains, so a 90 day leaf is rotated from day 60 onwards.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tracing::info;

use super::generator::{default_generator, Generator};
use super::leaf::LeafCertificate;
use super::validation::{leaf_is_valid_at, TrustChain};
use crate::config::PkiConfig;
use crate::error::Result;

/// Denominator of the fraction of the window left at the renewal deadline.
pub const RENEWAL_RATIO: u32 = 3;

/// `not_after - (not_after - not_before) / 3`
pub fn renewal_deadline(not_before: SystemTime, not_after: SystemTime) -> SystemTime {
    let window = not_after
        .duration_since(not_before)
        .unwrap_or(Duration::ZERO);
    not_after - window / RENEWAL_RATIO
}

pub fn is_due_for_renewal(not_before: SystemTime, not_after: SystemTime, now: SystemTime) -> bool {
    now >= renewal_deadline(not_before, not_after)
}

/// Decides whether a stored leaf can be kept and issues its replacement
/// otherwise.
#[derive(Debug, Clone)]
pub struct RenewalPolicy {
    generator: Arc<dyn Generator>,
    config: PkiConfig,
}

impl RenewalPolicy {
    pub fn new() -> Self {
        Self::with_generator(default_generator(), PkiConfig::default())
    }

    /// `generator` issues replacement leaves and provides the clock.
    pub fn with_generator(generator: Arc<dyn Generator>, config: PkiConfig) -> Self {
        Self { generator, config }
    }

    pub fn leaf_is_valid(&self, chain: &TrustChain<'_>, leaf: &LeafCertificate) -> bool {
        leaf_is_valid_at(chain, leaf, self.generator.now())
    }

    /// Returns `leaf` unchanged when it is still valid and already has
    /// exactly this common name and ordered DNS list; otherwise issues a new
    /// leaf from the chain's issuing authority. The IP addresses of the
    /// previous leaf carry over.
    pub fn regenerate_leaf_when_necessary(
        &self,
        chain: &TrustChain<'_>,
        leaf: Option<&LeafCertificate>,
        common_name: &str,
        dns_names: &[String],
    ) -> Result<LeafCertificate> {
        if let Some(existing) = leaf {
            let matches_subject = existing
                .certificate
                .as_ref()
                .map(|certificate| certificate.has_subject(common_name, dns_names))
                .unwrap_or(false);

            if matches_subject && self.leaf_is_valid(chain, existing) {
                info!("Reusing leaf certificate for {}", common_name);
                return Ok(existing.clone());
            }
        }

        let ip_addresses = leaf
            .map(|existing| existing.ip_addresses.clone())
            .unwrap_or_default();
        let mut replacement = LeafCertificate::with_generator(
            common_name,
            dns_names.to_vec(),
            ip_addresses,
            self.generator.clone(),
            self.config.clone(),
        );
        replacement.generate(chain.issuing_authority())?;

        info!("Regenerated leaf certificate for {}", common_name);
        Ok(replacement)
    }
}

impl Default for RenewalPolicy {
    fn default() -> Self {
        Self::new()
    }
}
