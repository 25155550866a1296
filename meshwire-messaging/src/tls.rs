//! TLS material loading and the mutual-TLS connector/acceptor pair.
//!
//! Key material is loaded once at service start; there is no hot reload.
//! Both roles authenticate the peer: the acceptor requires a client
//! certificate chaining to the trust store, and the connector presents the
//! node certificate while verifying the server against the same roots.

use crate::config::TlsConfig;
use crate::error::MessagingError;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::RootCertStore;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::{TlsAcceptor, TlsConnector};

/// The per-service TLS machinery, built from loaded key material.
#[derive(Clone)]
pub(crate) struct TlsContext {
    pub connector: TlsConnector,
    pub acceptor: TlsAcceptor,
}

/// Loads the key and trust stores and builds both TLS roles.
pub(crate) fn create_tls_context(config: &TlsConfig) -> Result<TlsContext, MessagingError> {
    let key_store = config
        .key_store
        .as_ref()
        .ok_or_else(|| MessagingError::Startup("tls.key_store not set".into()))?;
    let trust_store = config
        .trust_store
        .as_ref()
        .ok_or_else(|| MessagingError::Startup("tls.trust_store not set".into()))?;

    let certs = load_certs(key_store)?;
    let key = load_private_key(key_store)?;
    let trusted = load_certs(trust_store)?;

    let mut roots = RootCertStore::empty();
    for cert in trusted {
        roots.add(cert).map_err(|e| {
            MessagingError::Startup(format!("invalid certificate in trust store: {}", e))
        })?;
    }
    let roots = Arc::new(roots);

    let client_config = rustls::ClientConfig::builder()
        .with_root_certificates(roots.as_ref().clone())
        .with_client_auth_cert(certs.clone(), key.clone_key())
        .map_err(|e| MessagingError::Startup(format!("invalid key store cert/key: {}", e)))?;

    let client_verifier = WebPkiClientVerifier::builder(roots)
        .build()
        .map_err(|e| MessagingError::Startup(format!("cannot build client verifier: {}", e)))?;
    let server_config = rustls::ServerConfig::builder()
        .with_client_cert_verifier(client_verifier)
        .with_single_cert(certs, key)
        .map_err(|e| MessagingError::Startup(format!("invalid key store cert/key: {}", e)))?;

    Ok(TlsContext {
        connector: TlsConnector::from(Arc::new(client_config)),
        acceptor: TlsAcceptor::from(Arc::new(server_config)),
    })
}

fn open_store(path: &Path) -> Result<File, MessagingError> {
    File::open(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            MessagingError::Startup(format!("could not load cluster key store: {}", e))
        } else {
            MessagingError::Startup(format!("error loading cluster key store {:?}: {}", path, e))
        }
    })
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, MessagingError> {
    let mut reader = BufReader::new(open_store(path)?);
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| {
            MessagingError::Startup(format!("invalid certificate in {:?}: {}", path, e))
        })?;
    if certs.is_empty() {
        return Err(MessagingError::Startup(format!(
            "no certificates found in {:?}",
            path
        )));
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, MessagingError> {
    let mut reader = BufReader::new(open_store(path)?);
    loop {
        match rustls_pemfile::read_one(&mut reader)
            .map_err(|e| MessagingError::Startup(format!("invalid key store {:?}: {}", path, e)))?
        {
            Some(rustls_pemfile::Item::Pkcs1Key(key)) => return Ok(key.into()),
            Some(rustls_pemfile::Item::Pkcs8Key(key)) => return Ok(key.into()),
            Some(rustls_pemfile::Item::Sec1Key(key)) => return Ok(key.into()),
            None => {
                return Err(MessagingError::Startup(format!(
                    "no private key found in {:?}",
                    path
                )))
            }
            _ => continue, // Skip certs and other PEM items in the bundle.
        }
    }
}
