//! PEM loading for certificates and private keys.

use std::io::{self, BufRead};

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use thiserror::Error;

/// Errors loading PEM material.
#[derive(Error, Debug)]
pub enum PemError {
    /// Reading or decoding the PEM stream failed
    #[error("failed to read PEM: {0}")]
    Io(#[from] io::Error),

    /// The stream held no certificate
    #[error("no certificates found")]
    NoCertificates,

    /// The stream held no private key
    #[error("no private key found")]
    NoPrivateKey,
}

/// Read every certificate in `reader`, in file order.
pub fn load_certs(reader: &mut impl BufRead) -> Result<Vec<CertificateDer<'static>>, PemError> {
    let certs = rustls_pemfile::certs(reader).collect::<Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(PemError::NoCertificates);
    }
    Ok(certs)
}

/// Read the first private key (PKCS#1, PKCS#8 or SEC1) in `reader`.
pub fn load_private_key(reader: &mut impl BufRead) -> Result<PrivateKeyDer<'static>, PemError> {
    rustls_pemfile::private_key(reader)?.ok_or(PemError::NoPrivateKey)
}
