//! Eavesdrop CLI - root CA and leaf certificate management
//!
//! Installs, exports and destroys the interception root CA, and issues
//! per-hostname leaf certificates signed by it.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use eavesdrop_cert::{CertificateManager, CertificateManagerConfig};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Eavesdrop - on-demand certificates for TLS interception
#[derive(Parser, Debug)]
#[command(name = "eavesdrop")]
#[command(about = "Eavesdrop - on-demand certificates for TLS interception")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Directory holding the personal and root certificate stores
    #[arg(long, global = true, env = "EAVESDROP_STORE_DIR", default_value = ".eavesdrop")]
    store_dir: PathBuf,

    /// Organization embedded in every certificate subject
    #[arg(long, global = true, env = "EAVESDROP_ISSUER", default_value = "EavesdropCA")]
    issuer: String,

    /// Common name of the root certificate authority
    #[arg(long, global = true, env = "EAVESDROP_ROOT_NAME", default_value = "Eavesdrop Root")]
    root_name: String,

    /// Persist issued leaf certificates to the personal store
    #[arg(long, global = true, env = "EAVESDROP_STORE_PERSONAL")]
    store_personal: bool,

    /// RSA modulus size for generated keys
    #[arg(long, global = true, env = "EAVESDROP_KEY_BITS", default_value = "2048")]
    key_bits: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Manage the root certificate authority
    Root {
        #[command(subcommand)]
        action: RootAction,
    },

    /// Issue (or load) the leaf certificate for a hostname
    #[command(long_about = r#"
Issue the leaf certificate for a hostname, signed by the root CA. The root
is created first if the root store does not hold one yet.

EXAMPLES:
  # Print the certificate for example.com
  eavesdrop issue example.com

  # Write certificate and key for a TLS server
  eavesdrop issue example.com --cert-out example.pem --key-out example.key

ENVIRONMENT VARIABLES:
  EAVESDROP_STORE_DIR       Store directory (default: .eavesdrop)
  EAVESDROP_ISSUER          Organization in subject names
  EAVESDROP_ROOT_NAME       Root CA common name
  EAVESDROP_STORE_PERSONAL  Persist leaves to the personal store
    "#)]
    Issue {
        /// Hostname to issue the certificate for
        hostname: String,

        /// Write the certificate (PEM) to this file instead of stdout
        #[arg(long)]
        cert_out: Option<PathBuf>,

        /// Write the private key (PEM) to this file
        #[arg(long)]
        key_out: Option<PathBuf>,
    },

    /// List personal-store certificates with an exact subject DN
    Find {
        /// Subject DN, e.g. "CN=example.com, O=EavesdropCA"
        subject: String,
    },

    /// Remove every certificate issued by the root from both stores
    Destroy,
}

#[derive(Subcommand, Debug)]
enum RootAction {
    /// Create the root CA in the root store if it is missing
    Install,

    /// Write the root CA certificate (DER, no key) to a file
    Export {
        /// Destination file
        path: PathBuf,
    },

    /// Remove the root CA from the root store
    Destroy,
}

/// Setup logging with the specified log level
fn setup_logging(verbose: bool) {
    let log_level = if verbose { "debug" } else { "info" };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let config = CertificateManagerConfig::new(cli.issuer, cli.root_name)
        .with_store_personal_certificates(cli.store_personal)
        .with_key_bits(cli.key_bits);
    let manager = CertificateManager::with_directory(config, &cli.store_dir)
        .context("Failed to create certificate manager")?;

    info!("Using certificate stores in {}", cli.store_dir.display());

    match cli.command {
        Commands::Root { action } => match action {
            RootAction::Install => {
                if !manager.create_trusted_root_certificate() {
                    bail!("Failed to install root certificate");
                }
                let root = manager.root_certificate()?;
                println!("Root certificate: {}", root.subject());
                println!("Serial:           {:x}", root.serial_number());
                println!("Valid until:      {}", root.not_after());
            }
            RootAction::Export { path } => {
                if !manager.export_trusted_root_certificate(&path) {
                    bail!("Failed to export root certificate to {}", path.display());
                }
                println!("Exported root certificate to {}", path.display());
            }
            RootAction::Destroy => {
                let removed = manager
                    .try_destroy_trusted_root_certificate()
                    .context("Failed to destroy root certificate")?;
                println!("Removed {} certificate(s) from the root store", removed);
            }
        },
        Commands::Issue {
            hostname,
            cert_out,
            key_out,
        } => {
            let certificate = manager
                .try_generate_certificate(&hostname)
                .with_context(|| format!("Failed to issue certificate for {}", hostname))?;

            match cert_out {
                Some(path) => {
                    std::fs::write(&path, certificate.to_pem())
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    println!("Certificate written to {}", path.display());
                }
                None => print!("{}", certificate.to_pem()),
            }

            if let Some(path) = key_out {
                let key_pem = certificate
                    .private_key_pem()
                    .context("Issued certificate has no private key")?;
                std::fs::write(&path, key_pem)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                println!("Private key written to {}", path.display());
            }
        }
        Commands::Find { subject } => match manager.find_certificates(&subject) {
            Some(found) => {
                for certificate in found {
                    println!(
                        "{}  serial={:x}  issuer={}  expires={}",
                        certificate.subject(),
                        certificate.serial_number(),
                        certificate.issuer(),
                        certificate.not_after()
                    );
                }
            }
            None => println!("No certificates found for {}", subject),
        },
        Commands::Destroy => {
            let removed = manager
                .try_destroy_certificates()
                .context("Failed to destroy certificates")?;
            println!("Removed {} certificate(s)", removed);
        }
    }

    Ok(())
}
