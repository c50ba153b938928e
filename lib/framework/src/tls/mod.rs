mod settings;

use std::path::PathBuf;

pub use settings::TlsConfig;

#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("Could not read {note} file {filename:?}: {err}")]
    FileReadFailed {
        note: &'static str,
        filename: PathBuf,
        err: std::io::Error,
    },
    #[error("Identity certificate is missing a key")]
    MissingKey,
    #[error("Certificate file contains no certificates")]
    MissingCertificate,
    #[error("Could not parse certificate in {filename:?}: {err}")]
    CertificateParse {
        filename: PathBuf,
        err: std::io::Error,
    },
    #[error("Could not parse private key in {filename:?}: {err}")]
    PrivateKeyParse {
        filename: PathBuf,
        err: std::io::Error,
    },
    #[error("Invalid server name {0:?}")]
    InvalidServerName(String),
    #[error("Error building TLS config: {0}")]
    TlsBuild(rustls::Error),
    #[error("Error adding a certificate to a store: {0}")]
    AddCertToStore(rustls::Error),
    #[error("{0}")]
    VerifierBuild(rustls::client::VerifierBuilderError),
    #[error("Load native certs: {0}")]
    NativeCerts(std::io::Error),
}
