//! Server-side TLS configuration and per-connection session factory.
use std::collections::HashMap;
use std::fs::File;
use std::io::{Error as IoError, ErrorKind, Read, Result as IoResult};
use std::path::Path;
use std::sync::Arc;

use tokio_rustls::TlsAcceptor;
use tokio_rustls::rustls::crypto::ring::sign::any_supported_type;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::server::{ClientHello, ResolvesServerCert, WebPkiClientVerifier};
use tokio_rustls::rustls::sign::CertifiedKey;
use tokio_rustls::rustls::{RootCertStore, ServerConfig};

/// A private key and certificate chain, in PEM form.
#[derive(Clone, Debug, Default)]
#[non_exhaustive]
pub struct Keycert {
    key: Vec<u8>,
    cert: Vec<u8>,
}

impl Keycert {
    /// Creates an empty keycert; populate it with [`key`](Self::key) and
    /// [`cert`](Self::cert) or their `_path` counterparts before use.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads the private key from a PEM file.
    pub fn key_from_path(mut self, path: impl AsRef<Path>) -> IoResult<Self> {
        File::open(path)?.read_to_end(&mut self.key)?;
        Ok(self)
    }

    /// Sets the private key from PEM bytes.
    #[must_use]
    pub fn key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.key = key.into();
        self
    }

    /// Reads the certificate chain from a PEM file.
    pub fn cert_from_path(mut self, path: impl AsRef<Path>) -> IoResult<Self> {
        File::open(path)?.read_to_end(&mut self.cert)?;
        Ok(self)
    }

    /// Sets the certificate chain from PEM bytes.
    #[must_use]
    pub fn cert(mut self, cert: impl Into<Vec<u8>>) -> Self {
        self.cert = cert.into();
        self
    }

    fn build_certified_key(&self) -> IoResult<CertifiedKey> {
        let cert = rustls_pemfile::certs(&mut self.cert.as_slice())
            .collect::<Result<Vec<CertificateDer<'static>>, _>>()
            .map_err(|_| IoError::other("failed to parse tls certificate chain"))?;
        if cert.is_empty() {
            return Err(IoError::other("no certificate found in keycert"));
        }

        let mut pkcs8 = rustls_pemfile::pkcs8_private_keys(&mut self.key.as_slice())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| IoError::other("failed to parse tls private key"))?;
        let key = if !pkcs8.is_empty() {
            PrivateKeyDer::Pkcs8(pkcs8.remove(0))
        } else {
            let mut rsa = rustls_pemfile::rsa_private_keys(&mut self.key.as_slice())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|_| IoError::other("failed to parse tls private key"))?;
            if rsa.is_empty() {
                return Err(IoError::other("no supported private key found in keycert"));
            }
            PrivateKeyDer::Pkcs1(rsa.remove(0))
        };
        let key = any_supported_type(&key).map_err(|_| IoError::other("invalid private key"))?;
        Ok(CertifiedKey::new(cert, key))
    }
}

/// Client certificate authentication policy.
#[derive(Clone, Debug, Default)]
pub enum ClientAuth {
    /// No client certificate is requested.
    #[default]
    Off,
    /// A client certificate is accepted but not required, verified against
    /// the given trust anchor (PEM-encoded CA bundle).
    Optional(Vec<u8>),
    /// A verified client certificate is required.
    Required(Vec<u8>),
}

fn read_trust_anchor(mut trust_anchor: &[u8]) -> IoResult<RootCertStore> {
    let certs = rustls_pemfile::certs(&mut trust_anchor).collect::<IoResult<Vec<_>>>()?;
    let mut store = RootCertStore::empty();
    for cert in certs {
        store
            .add(cert)
            .map_err(|err| IoError::new(ErrorKind::InvalidData, err.to_string()))?;
    }
    Ok(store)
}

#[derive(Debug)]
struct CertResolver {
    fallback: Option<Arc<CertifiedKey>>,
    exact: HashMap<String, Arc<CertifiedKey>>,
}

impl ResolvesServerCert for CertResolver {
    fn resolve(&self, client_hello: ClientHello) -> Option<Arc<CertifiedKey>> {
        client_hello
            .server_name()
            .and_then(|name| self.exact.get(name).cloned())
            .or_else(|| self.fallback.clone())
    }
}

/// Builder for the server's TLS configuration.
///
/// Sessions are never server-side cached (client session caching only);
/// `tokio_rustls` buffers reads internally, giving read-ahead without any
/// configuration on our part.
#[derive(Clone, Debug, Default)]
pub struct TlsConfig {
    fallback: Option<Keycert>,
    sni: HashMap<String, Keycert>,
    client_auth: ClientAuth,
}

impl TlsConfig {
    /// Creates a new config with a default (SNI-less) keycert.
    #[must_use]
    pub fn new(fallback: Keycert) -> Self {
        Self {
            fallback: Some(fallback),
            sni: HashMap::new(),
            client_auth: ClientAuth::Off,
        }
    }

    /// Registers an additional keycert served for a specific SNI hostname.
    #[must_use]
    pub fn with_sni(mut self, hostname: impl Into<String>, keycert: Keycert) -> Self {
        self.sni.insert(hostname.into(), keycert);
        self
    }

    /// Requires (or makes optional) client certificate authentication.
    #[must_use]
    pub fn with_client_auth(mut self, auth: ClientAuth) -> Self {
        self.client_auth = auth;
        self
    }

    fn build_server_config(&self) -> IoResult<ServerConfig> {
        let fallback = self
            .fallback
            .as_ref()
            .map(Keycert::build_certified_key)
            .transpose()?
            .map(Arc::new);
        let mut exact = HashMap::new();
        for (name, keycert) in &self.sni {
            exact.insert(name.clone(), Arc::new(keycert.build_certified_key()?));
        }

        let client_verifier = match &self.client_auth {
            ClientAuth::Off => WebPkiClientVerifier::no_client_auth(),
            ClientAuth::Optional(trust_anchor) => {
                WebPkiClientVerifier::builder(read_trust_anchor(trust_anchor)?.into())
                    .allow_unauthenticated()
                    .build()
                    .map_err(|e| IoError::other(format!("invalid client trust anchor: {e}")))?
            }
            ClientAuth::Required(trust_anchor) => {
                WebPkiClientVerifier::builder(read_trust_anchor(trust_anchor)?.into())
                    .build()
                    .map_err(|e| IoError::other(format!("invalid client trust anchor: {e}")))?
            }
        };

        let mut config = ServerConfig::builder()
            .with_client_cert_verifier(client_verifier)
            .with_cert_resolver(Arc::new(CertResolver { fallback, exact }));
        config.alpn_protocols = vec![b"http/1.1".to_vec()];
        Ok(config)
    }

    /// Builds the [`TlsAcceptor`] used by the Acceptor component for every
    /// subsequent handshake. Constructed once at startup; TLS mode does not
    /// change for the lifetime of the instance.
    pub fn build_acceptor(&self) -> IoResult<TlsAcceptor> {
        Ok(TlsAcceptor::from(Arc::new(self.build_server_config()?)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_keycert_without_certificate() {
        let keycert = Keycert::new().key(b"not a key".to_vec());
        assert!(keycert.build_certified_key().is_err());
    }
}
