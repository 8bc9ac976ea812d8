//! Operator PKI tool - issues and inspects the CA hierarchy on disk
//!
//! Every object is stored as a directory holding `tls.key` and `tls.crt`.
//! Private keys are encrypted when `PKI_KEY_PASSWORD` (or `--password`) is set.

use std::fs;
use std::io::Write;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use operator_pki::pki::{
    default_generator, intermediate_is_valid, is_due_for_renewal, leaf_is_valid, renewal_deadline,
    root_is_valid, Certificate, IntermediateCertificateAuthority, LeafCertificate, PemBundle,
    RenewalPolicy, RootCertificateAuthority, TrustChain,
};
use operator_pki::PkiConfig;

const KEY_FILE: &str = "tls.key";
const CERT_FILE: &str = "tls.crt";
#[cfg(unix)]
const KEY_FILE_MODE: u32 = 0o600;

#[derive(Parser)]
#[command(name = "pki-tool")]
#[command(about = "Issue, inspect and renew the operator certificate hierarchy")]
#[command(version)]
struct Cli {
    /// TOML configuration file (PKI_* environment variables override it)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Password protecting private keys
    #[arg(long, env = "PKI_KEY_PASSWORD", global = true, hide_env_values = true)]
    password: Option<String>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a new self-signed root CA
    Root {
        /// Output directory
        #[arg(long)]
        out: PathBuf,
    },
    /// Generate a namespace intermediate CA signed by the root
    Intermediate {
        #[arg(long)]
        root_dir: PathBuf,
        #[arg(long)]
        namespace: String,
        /// Output directory
        #[arg(long)]
        out: PathBuf,
    },
    /// Issue a leaf certificate
    Leaf {
        #[command(flatten)]
        chain: ChainArgs,
        #[command(flatten)]
        subject: SubjectArgs,
        /// IP address SAN, repeatable
        #[arg(long = "ip")]
        ip_addresses: Vec<IpAddr>,
        /// Output directory
        #[arg(long)]
        out: PathBuf,
    },
    /// Report validity and renewal status as JSON
    Check {
        #[command(flatten)]
        chain: ChainArgs,
        #[arg(long)]
        leaf_dir: Option<PathBuf>,
        /// Also require the leaf to be valid for this DNS name
        #[arg(long, requires = "leaf_dir")]
        server_name: Option<String>,
    },
    /// Reissue a stored leaf when it is invalid, due or its subject changed
    Renew {
        #[command(flatten)]
        chain: ChainArgs,
        #[command(flatten)]
        subject: SubjectArgs,
        #[arg(long)]
        leaf_dir: PathBuf,
    },
}

#[derive(Args)]
struct ChainArgs {
    /// Directory holding the root CA
    #[arg(long)]
    root_dir: PathBuf,
    /// Directory holding the issuing intermediate CA
    #[arg(long, requires = "namespace")]
    intermediate_dir: Option<PathBuf>,
    /// Namespace of the intermediate CA
    #[arg(long)]
    namespace: Option<String>,
}

#[derive(Args)]
struct SubjectArgs {
    #[arg(long)]
    common_name: String,
    /// DNS SAN, repeatable; order is significant
    #[arg(long = "dns-name")]
    dns_names: Vec<String>,
}

struct StoredChain {
    root: RootCertificateAuthority,
    intermediate: Option<IntermediateCertificateAuthority>,
}

impl StoredChain {
    fn load(args: &ChainArgs, password: Option<&str>, config: &PkiConfig) -> Result<Self> {
        let (key, cert) = read_pair(&args.root_dir)?;
        let root = RootCertificateAuthority::parse_with(
            &key,
            &cert,
            password,
            default_generator(),
            config.clone(),
        )
        .with_context(|| format!("Failed to parse root CA in {}", args.root_dir.display()))?;

        let intermediate = match (&args.intermediate_dir, &args.namespace) {
            (Some(dir), Some(namespace)) => {
                let (key, cert) = read_pair(dir)?;
                let intermediate = IntermediateCertificateAuthority::parse_with(
                    namespace.as_str(),
                    &key,
                    &cert,
                    password,
                    default_generator(),
                    config.clone(),
                )
                .with_context(|| format!("Failed to parse intermediate CA in {}", dir.display()))?;
                Some(intermediate)
            }
            _ => None,
        };

        Ok(Self { root, intermediate })
    }

    fn chain(&self) -> TrustChain<'_> {
        match &self.intermediate {
            Some(intermediate) => TrustChain::new(&self.root).with_intermediate(intermediate),
            None => TrustChain::new(&self.root),
        }
    }
}

#[derive(Serialize)]
struct CertificateReport {
    common_name: String,
    issuer: String,
    serial: String,
    dns_names: Vec<String>,
    ip_addresses: Vec<IpAddr>,
    not_before: String,
    not_after: String,
    renewal_deadline: String,
    due_for_renewal: bool,
    valid: bool,
}

impl CertificateReport {
    fn new(certificate: &Certificate, valid: bool, now: SystemTime) -> Self {
        let (not_before, not_after) = (certificate.not_before(), certificate.not_after());
        Self {
            common_name: certificate.common_name(),
            issuer: certificate.issuer_common_name(),
            serial: certificate.serial_hex(),
            dns_names: certificate.dns_names(),
            ip_addresses: certificate.ip_addresses(),
            not_before: rfc3339(not_before),
            not_after: rfc3339(not_after),
            renewal_deadline: rfc3339(renewal_deadline(not_before, not_after)),
            due_for_renewal: is_due_for_renewal(not_before, not_after, now),
            valid,
        }
    }
}

#[derive(Serialize)]
struct CheckReport {
    root: CertificateReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    intermediate: Option<CertificateReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    leaf: Option<CertificateReport>,
}

impl CheckReport {
    fn all_valid(&self) -> bool {
        self.root.valid
            && self.intermediate.as_ref().map_or(true, |report| report.valid)
            && self.leaf.as_ref().map_or(true, |report| report.valid)
    }
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(&cli) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(2);
        }
    }
}

/// Returns whether everything checked out.
fn run(cli: &Cli) -> Result<bool> {
    let config = PkiConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let password = cli.password.as_deref().filter(|password| !password.is_empty());

    match &cli.command {
        Commands::Root { out } => {
            let mut root = RootCertificateAuthority::with_generator(default_generator(), config);
            root.generate()?;
            write_bundle(out, &root.to_pem(password)?)?;
            info!("Wrote root CA to {}", out.display());
            Ok(true)
        }
        Commands::Intermediate {
            root_dir,
            namespace,
            out,
        } => {
            let (key, cert) = read_pair(root_dir)?;
            let root = RootCertificateAuthority::parse_with(
                &key,
                &cert,
                password,
                default_generator(),
                config.clone(),
            )?;
            if !root_is_valid(&root) {
                bail!("Root CA in {} is not valid", root_dir.display());
            }

            let mut intermediate = IntermediateCertificateAuthority::with_generator(
                namespace.as_str(),
                default_generator(),
                config,
            );
            intermediate.generate(&root)?;
            write_bundle(out, &intermediate.to_pem(password)?)?;
            info!("Wrote intermediate CA for {} to {}", namespace, out.display());
            Ok(true)
        }
        Commands::Leaf {
            chain,
            subject,
            ip_addresses,
            out,
        } => {
            let stored = StoredChain::load(chain, password, &config)?;
            let mut leaf = LeafCertificate::with_generator(
                subject.common_name.as_str(),
                subject.dns_names.clone(),
                ip_addresses.clone(),
                default_generator(),
                config,
            );
            leaf.generate(stored.chain().issuing_authority())?;
            write_bundle(out, &leaf.to_pem(password)?)?;
            info!("Wrote leaf certificate for {} to {}", subject.common_name, out.display());
            Ok(true)
        }
        Commands::Check {
            chain,
            leaf_dir,
            server_name,
        } => {
            let stored = StoredChain::load(chain, password, &config)?;
            let report = check(&stored, leaf_dir.as_deref(), server_name.as_deref(), password)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(report.all_valid())
        }
        Commands::Renew {
            chain,
            subject,
            leaf_dir,
        } => {
            let stored = StoredChain::load(chain, password, &config)?;
            let existing = match read_pair(leaf_dir) {
                Ok((key, cert)) => match LeafCertificate::parse_with(
                    &key,
                    &cert,
                    password,
                    default_generator(),
                    config.clone(),
                ) {
                    Ok(leaf) => Some(leaf),
                    Err(e) => {
                        warn!("Ignoring unreadable leaf in {}: {}", leaf_dir.display(), e);
                        None
                    }
                },
                Err(_) => None,
            };

            let policy = RenewalPolicy::with_generator(default_generator(), config);
            let leaf = policy.regenerate_leaf_when_necessary(
                &stored.chain(),
                existing.as_ref(),
                &subject.common_name,
                &subject.dns_names,
            )?;

            let reissued = existing.map_or(true, |existing| existing.certificate != leaf.certificate);
            if reissued {
                write_bundle(leaf_dir, &leaf.to_pem(password)?)?;
                info!("Wrote renewed leaf certificate to {}", leaf_dir.display());
            } else {
                info!("Leaf certificate in {} is current", leaf_dir.display());
            }
            Ok(true)
        }
    }
}

fn check(
    stored: &StoredChain,
    leaf_dir: Option<&Path>,
    server_name: Option<&str>,
    password: Option<&str>,
) -> Result<CheckReport> {
    let now = SystemTime::now();
    let root_certificate = stored
        .root
        .certificate
        .as_ref()
        .context("Root CA has no certificate")?;
    let root = CertificateReport::new(root_certificate, root_is_valid(&stored.root), now);

    let intermediate = match &stored.intermediate {
        Some(intermediate) => {
            let certificate = intermediate
                .certificate
                .as_ref()
                .context("Intermediate CA has no certificate")?;
            let valid = intermediate_is_valid(intermediate, &stored.root);
            Some(CertificateReport::new(certificate, valid, now))
        }
        None => None,
    };

    let leaf = match leaf_dir {
        Some(dir) => {
            let (key, cert) = read_pair(dir)?;
            let leaf = LeafCertificate::parse(&key, &cert, password)
                .with_context(|| format!("Failed to parse leaf in {}", dir.display()))?;
            let chain = stored.chain();
            let mut valid = leaf_is_valid(&chain, &leaf);

            let certificate = leaf.certificate.as_ref().context("Leaf has no certificate")?;
            if let Some(name) = server_name {
                if let Err(e) = chain.verify_leaf(certificate, Some(name)) {
                    warn!("Leaf is not valid for {}: {}", name, e);
                    valid = false;
                }
            }
            Some(CertificateReport::new(certificate, valid, now))
        }
        None => None,
    };

    Ok(CheckReport {
        root,
        intermediate,
        leaf,
    })
}

fn read_pair(dir: &Path) -> Result<(Vec<u8>, Vec<u8>)> {
    let key_path = dir.join(KEY_FILE);
    let cert_path = dir.join(CERT_FILE);
    let key = fs::read(&key_path).with_context(|| format!("Failed to read {}", key_path.display()))?;
    let cert =
        fs::read(&cert_path).with_context(|| format!("Failed to read {}", cert_path.display()))?;
    Ok((key, cert))
}

fn write_bundle(dir: &Path, bundle: &PemBundle) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;

    let key_path = dir.join(KEY_FILE);
    write_private_key(&key_path, &bundle.private_key)
        .with_context(|| format!("Failed to write {}", key_path.display()))?;

    let cert_path = dir.join(CERT_FILE);
    fs::write(&cert_path, &bundle.certificate)
        .with_context(|| format!("Failed to write {}", cert_path.display()))?;
    Ok(())
}

/// Restricts the key file to its owner before any key bytes are written.
fn write_private_key(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(KEY_FILE_MODE);
    }
    let mut file = options.open(path)?;

    // `mode` only applies when the file is created.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(KEY_FILE_MODE))?;
    }

    file.set_len(0)?;
    file.write_all(contents)?;
    file.sync_all()
}

fn rfc3339(time: SystemTime) -> String {
    DateTime::<Utc>::from(time).to_rfc3339()
}
