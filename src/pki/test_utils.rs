//! Generation doubles used to inject failures into the hierarchy.

use std::sync::Arc;
use std::time::SystemTime;

use super::authority::Issuer;
use super::certificate::Certificate;
use super::generator::{
    generate_key, generate_serial_number, sign_certificate, CertificateTemplate, Generator,
    SerialNumber,
};
use super::private_key::PrivateKey;
use crate::error::{PkiError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Key,
    Serial,
    Certificate,
}

/// Wraps the secure primitives and breaks the steps it is told to break.
#[derive(Debug, Default, Clone)]
pub struct FaultyGenerator {
    missing: Vec<Step>,
    failing: Option<(Step, String)>,
    now: Option<SystemTime>,
}

impl FaultyGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// The step behaves as if it had no implementation.
    pub fn without(mut self, step: Step) -> Self {
        self.missing.push(step);
        self
    }

    /// The step fails with an entropy error carrying `message`.
    pub fn failing(mut self, step: Step, message: impl Into<String>) -> Self {
        self.failing = Some((step, message.into()));
        self
    }

    /// Pins the generation clock.
    pub fn at(mut self, now: SystemTime) -> Self {
        self.now = Some(now);
        self
    }

    pub fn shared(self) -> Arc<dyn Generator> {
        Arc::new(self)
    }

    fn check(&self, step: Step) -> Result<()> {
        if self.missing.contains(&step) {
            return Err(PkiError::FunctionNotImplemented);
        }
        match &self.failing {
            Some((failing, message)) if *failing == step => Err(PkiError::Entropy {
                reason: message.clone(),
            }),
            _ => Ok(()),
        }
    }
}

impl Generator for FaultyGenerator {
    fn generate_key(&self) -> Result<PrivateKey> {
        self.check(Step::Key)?;
        generate_key()
    }

    fn generate_serial_number(&self) -> Result<SerialNumber> {
        self.check(Step::Serial)?;
        generate_serial_number()
    }

    fn generate_certificate(
        &self,
        template: &CertificateTemplate,
        subject_key: &PrivateKey,
        issuer: Option<Issuer<'_>>,
    ) -> Result<Certificate> {
        self.check(Step::Certificate)?;
        sign_certificate(template, subject_key, issuer)
    }

    fn now(&self) -> SystemTime {
        self.now.unwrap_or_else(SystemTime::now)
    }
}

/// Implements key generation only; everything else is left unconfigured.
#[derive(Debug, Default)]
pub struct KeyOnlyGenerator;

impl Generator for KeyOnlyGenerator {
    fn generate_key(&self) -> Result<PrivateKey> {
        generate_key()
    }
}
