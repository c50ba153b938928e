use std::path::PathBuf;
use std::sync::Arc;
use std::{fs, io};

use rustls::client::WebPkiServerVerifier;
use rustls::client::danger::ServerCertVerifier as _;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{
    CertificateError, ClientConfig, DigitallySignedStruct, Error, RootCertStore, SignatureScheme,
};
use serde::{Deserialize, Serialize};

use super::TlsError;

const fn default_true() -> bool {
    true
}

/// Configures the TLS options for outgoing connections.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TlsConfig {
    /// Absolute path to an additional CA certificate file, in PEM format(X.509).
    /// The system's native roots are used if not set.
    pub ca: Option<PathBuf>,

    /// Absolute path to a certificate file used to identify this connection,
    /// in PEM format (X.509). If this is set, "key" must also be set.
    pub cert: Option<PathBuf>,

    /// Absolute path to a private key file used to identify this connection,
    /// in PEM format (PKCS#8). If this is set, "cert" must also be set.
    pub key: Option<PathBuf>,

    /// Pass phrase used to unlock the encrypted key file. This has no effect
    /// unless "key" is set.
    pub key_pass: Option<String>,

    /// The name the server certificate is verified against, instead of the
    /// host of the requested URL.
    pub server_name: Option<String>,

    /// Enables certificate verification.
    /// If enabled, certificates must not be expired and must be issued by a trusted issuer.
    ///
    /// Do NOT set this to false unless you understand the risks of not verifying the
    /// validity of certificates.
    #[serde(default = "default_true")]
    pub verify_certificate: bool,

    /// Enables hostname verification. If enabled, the hostname used to connect to the remote
    /// host must be present in the TLS certificate presented by the remote host, either as the
    /// Common Name or as an entry in the Subject Alternative Name extension.
    ///
    /// Do NOT set this to false unless you understand the risks of not verifying the remote hostname.
    #[serde(default = "default_true")]
    pub verify_hostname: bool,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            verify_certificate: true,
            verify_hostname: true,
            ca: None,
            cert: None,
            key: None,
            key_pass: None,
            server_name: None,
        }
    }
}

impl TlsConfig {
    pub fn client_config(&self) -> Result<ClientConfig, TlsError> {
        let server_name = match &self.server_name {
            Some(name) => Some(
                ServerName::try_from(name.clone())
                    .map_err(|_| TlsError::InvalidServerName(name.clone()))?,
            ),
            None => None,
        };

        let certs = if let Some(ca_file) = &self.ca {
            load_certs(ca_file)?
        } else {
            let result = rustls_native_certs::load_native_certs();
            if !result.errors.is_empty() {
                warn!(
                    message = "native root CA certificate loading errors",
                    errs = ?result.errors
                );

                return Err(TlsError::NativeCerts(io::Error::other(
                    "native root CA certificate loading errors",
                )));
            }

            result.certs
        };

        let mut root_store = RootCertStore::empty();
        for cert in certs {
            root_store.add(cert).map_err(TlsError::AddCertToStore)?;
        }

        let root_store = Arc::new(root_store);
        let builder = ClientConfig::builder().with_root_certificates(Arc::clone(&root_store));
        let mut config = match (&self.cert, &self.key) {
            (Some(cert_file), Some(key_file)) => {
                let certs = load_certs(cert_file)?;
                let key = load_private_key(key_file, self.key_pass.as_deref())?;

                builder
                    .with_client_auth_cert(certs, key)
                    .map_err(TlsError::TlsBuild)?
            }
            (Some(_), None) => return Err(TlsError::MissingKey),
            (None, Some(_)) => return Err(TlsError::MissingCertificate),
            (None, None) => builder.with_no_client_auth(),
        };

        config
            .dangerous()
            .set_certificate_verifier(Arc::new(ServerCertVerifier {
                inner: WebPkiServerVerifier::builder(root_store)
                    .build()
                    .map_err(TlsError::VerifierBuild)?,
                server_name,
                verify_certificate: self.verify_certificate,
                verify_hostname: self.verify_hostname,
            }));

        Ok(config)
    }
}

#[derive(Debug)]
struct ServerCertVerifier {
    inner: Arc<WebPkiServerVerifier>,

    server_name: Option<ServerName<'static>>,
    verify_certificate: bool,
    verify_hostname: bool,
}

impl rustls::client::danger::ServerCertVerifier for ServerCertVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, Error> {
        if !self.verify_certificate {
            return Ok(ServerCertVerified::assertion());
        }

        let server_name = self.server_name.as_ref().unwrap_or(server_name);
        match self.inner.verify_server_cert(
            end_entity,
            intermediates,
            server_name,
            ocsp_response,
            now,
        ) {
            Ok(verified) => Ok(verified),
            err @ Err(Error::InvalidCertificate(CertificateError::NotValidForName)) => {
                if self.verify_hostname {
                    err
                } else {
                    Ok(ServerCertVerified::assertion())
                }
            }
            Err(err) => Err(err),
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, Error> {
        if self.verify_certificate {
            self.inner.verify_tls12_signature(message, cert, dss)
        } else {
            Ok(HandshakeSignatureValid::assertion())
        }
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, Error> {
        if self.verify_certificate {
            self.inner.verify_tls13_signature(message, cert, dss)
        } else {
            Ok(HandshakeSignatureValid::assertion())
        }
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

fn load_certs(filename: &PathBuf) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let content = fs::read(filename).map_err(|err| TlsError::FileReadFailed {
        note: "cert",
        filename: filename.clone(),
        err,
    })?;

    let certs = pem::parse_many(content)
        .map_err(|err| TlsError::CertificateParse {
            filename: filename.clone(),
            err: io::Error::new(io::ErrorKind::InvalidData, err),
        })?
        .into_iter()
        .filter(|block| block.tag() == "CERTIFICATE")
        .map(|block| CertificateDer::from(block.into_contents()))
        .collect::<Vec<_>>();

    if certs.is_empty() {
        return Err(TlsError::MissingCertificate);
    }

    Ok(certs)
}

fn load_private_key(
    filename: &PathBuf,
    password: Option<&str>,
) -> Result<PrivateKeyDer<'static>, TlsError> {
    use pkcs8::der::Decode;

    let parse_error = |err: String| TlsError::PrivateKeyParse {
        filename: filename.clone(),
        err: io::Error::new(io::ErrorKind::InvalidData, err),
    };

    let expected_tag = match password {
        Some(_) => "ENCRYPTED PRIVATE KEY",
        None => "PRIVATE KEY",
    };

    let content = fs::read(filename).map_err(|err| TlsError::FileReadFailed {
        note: "private key",
        filename: filename.clone(),
        err,
    })?;

    let key = pem::parse_many(content)
        .map_err(|err| parse_error(err.to_string()))?
        .into_iter()
        .find(|block| block.tag() == expected_tag)
        .map(|block| block.into_contents())
        .ok_or_else(|| parse_error(format!("no {expected_tag:?} block found in PEM file")))?;

    match password {
        Some(password) => {
            let encrypted = pkcs8::EncryptedPrivateKeyInfo::from_der(&key)
                .map_err(|err| parse_error(err.to_string()))?;
            let decrypted = encrypted
                .decrypt(password)
                .map_err(|err| parse_error(err.to_string()))?;

            PrivateKeyDer::try_from(decrypted.as_bytes().to_owned())
                .map_err(|err| parse_error(err.to_string()))
        }
        None => PrivateKeyDer::try_from(key).map_err(|err| parse_error(err.to_string())),
    }
}
