//! pki-ledger command-line front end
//!
//! A thin wrapper that maps commands onto the library operations:
//!
//! ```text
//! pki-ledger init
//! pki-ledger ca [common-name]
//! pki-ledger issue <name> <common-name> [dns-name...]
//! pki-ledger revoke <serial-hex>
//! pki-ledger show <serial-hex>
//! pki-ledger list
//! ```
//!
//! The PKI root and certificate defaults come from `pki-ledger.toml`, or the
//! file named by `PKI_LEDGER_CONFIG`.

use anyhow::{anyhow, bail, Context, Result};
use pki_ledger::configs::AppConfig;
use pki_ledger::ledger::{find_record, format_timestamp};
use pki_ledger::serial_counter::serial_from_hex;
use pki_ledger::{
    initialize, issue_certificate, read_records, revoke, CertificateData, PkiRoot, CA_NAME,
};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "\
Usage: pki-ledger <command>

Commands:
  init                                  create the PKI root layout
  ca [common-name]                      issue the self-signed CA certificate
  issue <name> <common-name> [dns...]   issue a leaf certificate signed by the CA
  revoke <serial-hex>                   mark a leaf certificate as revoked
  show <serial-hex>                     print the ledger record of one certificate
  list                                  print the certificate ledger";

fn main() -> Result<()> {
    let config = AppConfig::load().context("Failed to load configuration")?;
    init_logging(&config);

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some((command, rest)) = args.split_first() else {
        println!("{USAGE}");
        return Ok(());
    };

    match command.as_str() {
        "init" => init(&config),
        "ca" => issue_ca(&config, rest),
        "issue" => issue_leaf(&config, rest),
        "revoke" => revoke_serial(&config, rest),
        "show" => show(&config, rest),
        "list" => list(&config),
        "help" | "-h" | "--help" => {
            println!("{USAGE}");
            Ok(())
        }
        other => bail!("Unknown command {other:?}\n\n{USAGE}"),
    }
}

fn init_logging(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn open_root(config: &AppConfig) -> Result<PkiRoot> {
    PkiRoot::open(&config.pki.root).with_context(|| {
        format!(
            "PKI root {} is not usable; run `pki-ledger init` first",
            config.pki.root.display()
        )
    })
}

fn init(config: &AppConfig) -> Result<()> {
    if PkiRoot::new(&config.pki.root).is_initialized() {
        bail!("PKI root {} is already initialized", config.pki.root.display());
    }
    let root = initialize(&config.pki.root).context("Failed to initialize PKI root")?;
    println!("✓ PKI root initialized at {}", root.path().display());
    Ok(())
}

fn issue_ca(config: &AppConfig, args: &[String]) -> Result<()> {
    let common_name = match args {
        [] => config.ca_defaults.common_name.clone(),
        [common_name] => common_name.clone(),
        _ => bail!("Usage: pki-ledger ca [common-name]"),
    };
    let root = open_root(config)?;
    let cert_data =
        CertificateData::certificate_authority(common_name, config.ca_defaults.validity_days);
    let issued = issue_certificate(&root, CA_NAME, &cert_data)
        .context("Failed to issue CA certificate")?;

    println!("✓ CA certificate written to {}", issued.certificate_path.display());
    println!("✓ CA private key written to {}", issued.private_key_path.display());
    println!("  Serial: {}", issued.serial);
    Ok(())
}

fn issue_leaf(config: &AppConfig, args: &[String]) -> Result<()> {
    let [name, common_name, dns_names @ ..] = args else {
        bail!("Usage: pki-ledger issue <name> <common-name> [dns-name...]");
    };
    let root = open_root(config)?;
    if !root.has_ca() {
        bail!("No CA in {}; run `pki-ledger ca` first", root.path().display());
    }
    let cert_data = CertificateData::leaf(common_name.clone(), config.leaf_defaults.validity_days)
        .with_dns_names(dns_names.iter().cloned());
    let issued = issue_certificate(&root, name, &cert_data)
        .with_context(|| format!("Failed to issue certificate {name:?}"))?;

    println!("✓ Certificate written to {}", issued.certificate_path.display());
    println!("✓ Private key written to {}", issued.private_key_path.display());
    println!("  Serial: {}", issued.serial);
    Ok(())
}

fn revoke_serial(config: &AppConfig, args: &[String]) -> Result<()> {
    let [serial_hex] = args else {
        bail!("Usage: pki-ledger revoke <serial-hex>");
    };
    let serial = serial_from_hex(serial_hex)
        .ok_or_else(|| anyhow!("{serial_hex:?} is not a hexadecimal serial"))?;
    let root = open_root(config)?;
    let record = revoke(&root, &serial)
        .with_context(|| format!("Failed to revoke serial {serial_hex}"))?;

    println!(
        "✓ Revoked {} ({}) at {}",
        record.serial,
        record.subject,
        record.revoked_at.map(format_timestamp).unwrap_or_default()
    );
    Ok(())
}

fn show(config: &AppConfig, args: &[String]) -> Result<()> {
    let [serial_hex] = args else {
        bail!("Usage: pki-ledger show <serial-hex>");
    };
    let serial = serial_from_hex(serial_hex)
        .ok_or_else(|| anyhow!("{serial_hex:?} is not a hexadecimal serial"))?;
    let root = open_root(config)?;
    let record = match find_record(&root, &serial) {
        Ok(record) => record,
        Err(e) if e.is_not_found() => {
            println!("No certificate with serial {serial_hex} in the ledger.");
            return Ok(());
        }
        Err(e) => return Err(e).context("Failed to read certificate ledger"),
    };

    println!("Serial:   {}", record.serial);
    println!("Subject:  {}", record.subject);
    println!("File:     {}", record.filename);
    println!("Status:   {}", record.status);
    println!("Expires:  {}", record.expires_at.to_rfc3339());
    if let Some(revoked_at) = record.revoked_at {
        println!("Revoked:  {}", revoked_at.to_rfc3339());
    }
    Ok(())
}

fn list(config: &AppConfig) -> Result<()> {
    let root = open_root(config)?;
    let records = read_records(&root).context("Failed to read certificate ledger")?;
    if records.is_empty() {
        println!("No certificates issued yet.");
        return Ok(());
    }
    println!("{:<8} {:<10} {:<14} {:<20} SUBJECT", "STATUS", "SERIAL", "EXPIRES", "FILE");
    for record in records {
        println!(
            "{:<8} {:<10} {:<14} {:<20} {}",
            record.status.to_string(),
            record.serial,
            format_timestamp(record.expires_at),
            record.filename,
            record.subject
        );
    }
    Ok(())
}
