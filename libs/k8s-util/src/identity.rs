//! Serving identity of the webhook: certificate chain, private key and the CA bundle the API
//! server needs to trust it.

use crate::error::{Error, Result};

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::ServerConfig;
use rustls::crypto::aws_lc_rs::default_provider;
use rustls::pki_types::CertificateDer;

/// Where the static identity files live.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdentityPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
    pub ca: PathBuf,
}

impl IdentityPaths {
    /// `<dir>/<pair_name>.crt` and `<dir>/<pair_name>.key`, with the CA bundle at
    /// `<dir>/ca.crt` unless given explicitly.
    pub fn from_pair(dir: &Path, pair_name: &str, ca: Option<PathBuf>) -> Self {
        Self {
            cert: dir.join(format!("{pair_name}.crt")),
            key: dir.join(format!("{pair_name}.key")),
            ca: ca.unwrap_or_else(|| dir.join("ca.crt")),
        }
    }
}

/// PEM encoded identity, loaded once and immutable afterwards.
#[derive(Clone)]
pub struct IdentityMaterial {
    cert_pem: Vec<u8>,
    key_pem: Vec<u8>,
    ca_bundle: Vec<u8>,
}

impl fmt::Debug for IdentityMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityMaterial")
            .field("cert_pem", &format_args!("{} bytes", self.cert_pem.len()))
            .field("key_pem", &"<redacted>")
            .field("ca_bundle", &format_args!("{} bytes", self.ca_bundle.len()))
            .finish()
    }
}

impl IdentityMaterial {
    pub fn from_pem(cert_pem: Vec<u8>, key_pem: Vec<u8>, ca_bundle: Vec<u8>) -> Result<Self> {
        for (name, content) in [
            ("certificate", &cert_pem),
            ("private key", &key_pem),
            ("CA bundle", &ca_bundle),
        ] {
            if content.iter().all(u8::is_ascii_whitespace) {
                return Err(Error::MissingData(format!("{name} is empty")));
            }
        }
        Ok(Self {
            cert_pem,
            key_pem,
            ca_bundle,
        })
    }

    /// Read the three identity files. Any failure is fatal to startup.
    pub fn from_files(paths: &IdentityPaths) -> Result<Self> {
        let read = |path: &Path| {
            std::fs::read(path)
                .map_err(|e| Error::IoError(format!("failed to read {}", path.display()), e))
        };
        Self::from_pem(read(&paths.cert)?, read(&paths.key)?, read(&paths.ca)?)
    }

    pub fn cert_pem(&self) -> &[u8] {
        &self.cert_pem
    }

    pub fn key_pem(&self) -> &[u8] {
        &self.key_pem
    }

    pub fn ca_bundle(&self) -> &[u8] {
        &self.ca_bundle
    }

    /// Build the rustls server configuration serving this identity.
    pub fn tls_config(&self) -> Result<ServerConfig> {
        let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut self.cert_pem.as_slice())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| Error::IoError("failed to parse certificate PEM".to_string(), e))?;
        if certs.is_empty() {
            return Err(Error::MissingData(
                "no certificate found in certificate PEM".to_string(),
            ));
        }

        let key = rustls_pemfile::private_key(&mut self.key_pem.as_slice())
            .map_err(|e| Error::IoError("failed to parse private key PEM".to_string(), e))?
            .ok_or_else(|| Error::MissingData("no private key found in key PEM".to_string()))?;

        let mut config = ServerConfig::builder_with_provider(Arc::new(default_provider()))
            .with_safe_default_protocol_versions()
            .map_err(|e| Error::TlsError("unsupported TLS protocol versions".to_string(), e))?
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| Error::TlsError("invalid certificate or key".to_string(), e))?;

        config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

        Ok(config)
    }
}
