mod store;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use store::JsonFileStore;
use teif_core::audit::TracingAuditLog;
use teif_core::config::Config;
use teif_core::invoice::xml::{XmlFormat, to_xml_with_format};
use teif_core::invoice::{Invoice, check_compliance, compute_totals, validate_rib};
use teif_core::service::{CertificateService, CertificateStore, SignRequest, UploadRequest};
use teif_core::vault::{CertificateMetadata, CertificateStatus, CertificateVault, ExpiryStatus};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "teif")]
#[command(about = "Tunisian TEIF e-invoice CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print computed totals as JSON.
    Totals {
        #[arg(long)]
        invoice: PathBuf,
    },
    /// Render the TEIF document.
    Xml {
        #[arg(long)]
        invoice: PathBuf,
        #[arg(long)]
        minify: bool,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Print the compliance report; fails when there are errors.
    Check {
        #[arg(long)]
        invoice: PathBuf,
    },
    /// Validate a 20-digit RIB.
    Rib { rib: String },
    #[command(subcommand)]
    Cert(CertCommands),
    /// Sign a TEIF document with a stored certificate.
    Sign {
        #[arg(long)]
        store: PathBuf,
        #[arg(long)]
        user: String,
        #[arg(long)]
        xml: PathBuf,
        #[arg(long)]
        pin: String,
        #[arg(long)]
        invoice_ref: Option<String>,
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum CertCommands {
    /// Validate, encrypt and store a PKCS#12 certificate.
    Upload {
        #[arg(long)]
        store: PathBuf,
        #[arg(long)]
        user: String,
        #[arg(long)]
        p12: PathBuf,
        #[arg(long)]
        pin: String,
    },
    Status {
        #[arg(long)]
        store: PathBuf,
        #[arg(long)]
        user: String,
    },
    Revoke {
        #[arg(long)]
        store: PathBuf,
        #[arg(long)]
        user: String,
    },
}

#[derive(Serialize)]
struct CertificateStatusReport<'a> {
    user_id: &'a str,
    filename: &'a str,
    status: CertificateStatus,
    metadata: &'a CertificateMetadata,
    expiry: Option<ExpiryStatus>,
    last_used_at: Option<chrono::DateTime<chrono::Utc>>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Totals { invoice } => {
            let invoice = read_invoice(&invoice)?;
            let totals = compute_totals(&invoice);
            println!("{}", serde_json::to_string_pretty(&totals)?);
        }
        Commands::Xml {
            invoice,
            minify,
            output,
        } => {
            let invoice = read_invoice(&invoice)?;
            let totals = compute_totals(&invoice);
            let format = if minify {
                XmlFormat::Compact
            } else {
                XmlFormat::Pretty {
                    indent_char: ' ',
                    indent_size: 2,
                }
            };
            let xml = to_xml_with_format(&invoice, &totals, format)
                .context("failed to render TEIF document")?;
            write_output(output.as_deref(), &xml)?;
        }
        Commands::Check { invoice } => {
            let invoice = read_invoice(&invoice)?;
            let report = check_compliance(&invoice);
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.is_compliant() {
                bail!("invoice has {} compliance error(s)", report.errors.len());
            }
        }
        Commands::Rib { rib } => {
            if !validate_rib(&rib) {
                bail!("RIB {rib} is invalid");
            }
            println!("RIB {rib} is valid");
        }
        Commands::Cert(command) => run_cert(command)?,
        Commands::Sign {
            store,
            user,
            xml,
            pin,
            invoice_ref,
            output,
        } => {
            let (service, _) = certificate_service(&store)?;
            let unsigned = fs::read_to_string(&xml)
                .with_context(|| format!("failed to read {}", xml.display()))?;
            let invoice_ref = invoice_ref.unwrap_or_else(|| {
                xml.file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
                    .unwrap_or_default()
            });

            let result = service
                .sign(SignRequest {
                    user_id: &user,
                    invoice_ref: &invoice_ref,
                    xml: &unsigned,
                    pin: &pin,
                })
                .with_context(|| format!("failed to sign {}", xml.display()))?;
            tracing::info!(signature_id = %result.signature_id, "document signed");
            write_output(output.as_deref(), &result.signed_xml)?;
        }
    }

    Ok(())
}

fn run_cert(command: CertCommands) -> Result<()> {
    match command {
        CertCommands::Upload {
            store,
            user,
            p12,
            pin,
        } => {
            let (service, config) = certificate_service(&store)?;
            let size = fs::metadata(&p12)
                .with_context(|| format!("failed to read {}", p12.display()))?
                .len();
            if size > config.max_certificate_size() as u64 {
                bail!(
                    "{} is {size} bytes, above the {} byte limit",
                    p12.display(),
                    config.max_certificate_size()
                );
            }
            let blob = fs::read(&p12).with_context(|| format!("failed to read {}", p12.display()))?;
            let filename = p12
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();

            let metadata = service
                .upload(UploadRequest {
                    user_id: &user,
                    filename: &filename,
                    blob: &blob,
                    pin: &pin,
                })
                .context("certificate upload failed")?;
            println!("{}", serde_json::to_string_pretty(&metadata)?);
        }
        CertCommands::Status { store, user } => {
            let (service, _) = certificate_service(&store)?;
            let Some(record) = service.store().fetch(&user)? else {
                bail!("no certificate on file for {user}");
            };
            let expiry = service.expiry_status(&user)?;
            let report = CertificateStatusReport {
                user_id: &record.user_id,
                filename: &record.filename,
                status: record.status,
                metadata: &record.metadata,
                expiry,
                last_used_at: record.last_used_at,
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        CertCommands::Revoke { store, user } => {
            let (service, _) = certificate_service(&store)?;
            let metadata = service.revoke(&user).context("certificate revocation failed")?;
            println!("revoked certificate {} for {user}", metadata.serial_number);
        }
    }
    Ok(())
}

fn certificate_service(
    store: &Path,
) -> Result<(CertificateService<JsonFileStore, TracingAuditLog>, Config)> {
    let config = Config::from_env().context("failed to load signing configuration")?;
    for warning in config.security_warnings() {
        tracing::warn!("{warning}");
    }
    let service = CertificateService::new(
        CertificateVault::from_config(&config),
        JsonFileStore::new(store),
        TracingAuditLog,
    )
    .with_expiry_warning_days(config.expiry_warning_days());
    Ok((service, config))
}

fn read_invoice(path: &Path) -> Result<Invoice> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("{} is not a valid invoice", path.display()))
}

fn write_output(path: Option<&Path>, contents: &str) -> Result<()> {
    match path {
        Some(path) => fs::write(path, contents)
            .with_context(|| format!("failed to write {}", path.display())),
        None => {
            println!("{contents}");
            Ok(())
        }
    }
}
