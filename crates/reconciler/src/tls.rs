//! Certificate material delivered by the CA and its installation on disk.

use std::collections::BTreeSet;

use igw_core::runner::args;
use igw_core::{CommandRunner, PathsConfig, UnitInfo};
use tracing::info;

use crate::collaborators::{ApplicationCert, CertificateAuthority};
use crate::error::Result;
use crate::render::write_with_mode;

const PRIVATE_MODE: u32 = 0o600;
const PUBLIC_MODE: u32 = 0o644;

/// A complete set of certificate material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsMaterial {
    pub root_ca: String,
    pub chain: Option<String>,
    pub app: ApplicationCert,
}

impl TlsMaterial {
    /// Gather material from the CA; `None` until both the root CA and this
    /// unit's certificate are present.
    pub fn collect(ca: &dyn CertificateAuthority) -> Option<Self> {
        let root_ca = ca.root_ca_cert()?;
        let app = ca.application_cert()?;
        Some(Self {
            root_ca,
            chain: ca.chain(),
            app,
        })
    }

    /// Root CA followed by the chain when one was issued.
    pub fn ca_bundle(&self) -> String {
        match &self.chain {
            Some(chain) => format!("{}\n{}", self.root_ca, chain),
            None => self.root_ca.clone(),
        }
    }

    /// Certificate followed by its key, as the gateway API expects.
    pub fn key_and_cert(&self) -> String {
        format!("{}\n{}", self.app.cert, self.app.key)
    }

    /// Write every file, refresh the trust store and derive the public key.
    ///
    /// # Errors
    ///
    /// Returns error if a file write or either command fails.
    pub fn install(&self, paths: &PathsConfig, runner: &dyn CommandRunner) -> Result<()> {
        info!(cert = %paths.tls_cert.display(), "Installing TLS material");

        write_with_mode(&paths.tls_key, self.app.key.as_bytes(), PRIVATE_MODE)?;
        write_with_mode(&paths.tls_cert, self.app.cert.as_bytes(), PUBLIC_MODE)?;
        write_with_mode(
            &paths.tls_key_and_cert,
            self.key_and_cert().as_bytes(),
            PRIVATE_MODE,
        )?;
        write_with_mode(&paths.tls_ca_cert, self.ca_bundle().as_bytes(), PUBLIC_MODE)?;

        runner.run("update-ca-certificates", &[])?;

        let pem = paths.tls_key_and_cert.display().to_string();
        let pub_key = runner.run(
            "openssl",
            &args(&["x509", "-inform", "pem", "-in", &pem, "-pubkey", "-noout"]),
        )?;
        write_with_mode(&paths.tls_pub_key, pub_key.stdout.as_bytes(), PUBLIC_MODE)
    }
}

/// Subject alternative names for this unit's certificate: every distinct
/// public and cluster address plus the hostname, sorted.
pub fn certificate_sans(unit: &UnitInfo) -> Vec<String> {
    [
        &unit.public.ingress_address,
        &unit.public.bind_address,
        &unit.cluster.ingress_address,
        &unit.cluster.bind_address,
        &unit.hostname,
    ]
    .into_iter()
    .filter(|value| !value.is_empty())
    .cloned()
    .collect::<BTreeSet<_>>()
    .into_iter()
    .collect()
}
