pub mod config;
pub mod error;
pub mod pki;

pub use config::PkiConfig;
pub use error::{PkiError, Result};
