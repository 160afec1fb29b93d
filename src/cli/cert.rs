//! Certificate authority CLI commands. Grounded in the teacher's
//! `cli::cert` (same `CertCommand`/`*Args` shape, same tracing-driven
//! summary output), trimmed to the two operations the spoofed CA actually
//! needs outside a running proxy: minting one to disk, and looking at one
//! that already exists.

use crate::tls::ca::SpoofedCertStore;
use crate::tls::trust_store::NoopTrustStoreInstaller;
use anyhow::{anyhow, Result};
use clap::{Args, Subcommand};
use std::fs;
use std::path::Path;
use tracing::info;

#[derive(Debug, Subcommand)]
pub enum CertCommand {
    /// Generate a new spoofed root CA and write it to disk as PEM.
    Generate(GenerateCertArgs),

    /// Print the subject, issuer, validity and serial of a PEM certificate.
    Inspect(InspectCertArgs),
}

#[derive(Debug, Args)]
pub struct GenerateCertArgs {
    /// Common name for the minted CA.
    #[arg(long, default_value = "CitadelCore")]
    pub authority_name: String,

    /// Organization name for the minted CA.
    #[arg(long, default_value = "Citadel Proxy")]
    pub organization: String,

    /// Validity floor, days before now.
    #[arg(long, default_value = "365")]
    pub validity_days_before: i64,

    /// Validity ceiling, days after now.
    #[arg(long, default_value = "730")]
    pub validity_days_after: i64,

    /// Output path for the CA certificate, PEM-encoded.
    #[arg(long, default_value = "certs/ca.pem")]
    pub output: String,

    /// Overwrite an existing file at `output`.
    #[arg(long, default_value = "false")]
    pub force: bool,
}

#[derive(Debug, Args)]
pub struct InspectCertArgs {
    /// Path to a PEM-encoded certificate.
    #[arg(long)]
    pub cert_path: String,
}

impl CertCommand {
    pub async fn execute(self) -> Result<()> {
        match self {
            CertCommand::Generate(args) => generate_ca(&args),
            CertCommand::Inspect(args) => inspect_cert(&args),
        }
    }
}

fn generate_ca(args: &GenerateCertArgs) -> Result<()> {
    if !args.force && Path::new(&args.output).exists() {
        return Err(anyhow!("{} already exists; pass --force to overwrite", args.output));
    }

    info!(authority_name = %args.authority_name, organization = %args.organization, "generating spoofed root CA");

    let store = SpoofedCertStore::new(
        &args.authority_name,
        &args.organization,
        args.validity_days_before,
        args.validity_days_after,
        &NoopTrustStoreInstaller,
    )?;

    if let Some(parent) = Path::new(&args.output).parent() {
        fs::create_dir_all(parent)?;
    }
    let pem = der_to_pem(store.ca_certificate_der());
    fs::write(&args.output, pem)?;

    info!(path = %args.output, "CA certificate written");
    Ok(())
}

fn inspect_cert(args: &InspectCertArgs) -> Result<()> {
    let contents = fs::read(&args.cert_path)?;
    let (_, pem) = x509_parser::pem::parse_x509_pem(&contents).map_err(|e| anyhow!("failed to parse PEM: {e}"))?;
    let cert = pem.parse_x509().map_err(|e| anyhow!("failed to parse certificate: {e}"))?;

    println!("Subject:      {}", cert.subject());
    println!("Issuer:       {}", cert.issuer());
    println!("Serial:       {}", cert.raw_serial_as_string());
    println!("Not before:   {}", cert.validity().not_before);
    println!("Not after:    {}", cert.validity().not_after);
    println!("Is CA:        {}", cert.is_ca());

    Ok(())
}

fn der_to_pem(der: &[u8]) -> String {
    use base64::Engine;
    let encoded = base64::engine::general_purpose::STANDARD.encode(der);
    let mut pem = String::from("-----BEGIN CERTIFICATE-----\n");
    for chunk in encoded.as_bytes().chunks(64) {
        pem.push_str(std::str::from_utf8(chunk).expect("base64 output is ASCII"));
        pem.push('\n');
    }
    pem.push_str("-----END CERTIFICATE-----\n");
    pem
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn generate_then_inspect_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("ca.pem").to_string_lossy().to_string();

        let generate_args = GenerateCertArgs {
            authority_name: "TestCA".to_string(),
            organization: "Test Org".to_string(),
            validity_days_before: 1,
            validity_days_after: 1,
            output: output.clone(),
            force: false,
        };
        generate_ca(&generate_args).unwrap();
        assert!(Path::new(&output).exists());

        let inspect_args = InspectCertArgs { cert_path: output };
        assert!(inspect_cert(&inspect_args).is_ok());
    }

    #[test]
    fn generate_refuses_to_overwrite_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("ca.pem");
        fs::write(&output, "placeholder").unwrap();

        let args = GenerateCertArgs {
            authority_name: "TestCA".to_string(),
            organization: "Test Org".to_string(),
            validity_days_before: 1,
            validity_days_after: 1,
            output: output.to_string_lossy().to_string(),
            force: false,
        };
        assert!(generate_ca(&args).is_err());
    }
}
