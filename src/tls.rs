use std::fs::File;
use std::io::{self, BufReader, ErrorKind};
use std::sync::Arc;

use pgwire::tokio::TlsAcceptor;
use pgwire::tokio::tokio_rustls::rustls::ServerConfig;

/// Build a TLS acceptor from PEM files. Both paths or neither; with neither
/// the server speaks plaintext only.
pub fn load_tls_acceptor(
    cert_path: Option<&str>,
    key_path: Option<&str>,
) -> io::Result<Option<TlsAcceptor>> {
    let (cert_path, key_path) = match (cert_path, key_path) {
        (None, None) => return Ok(None),
        (Some(c), Some(k)) => (c, k),
        _ => {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                "set both TIDYSLOT_TLS_CERT and TIDYSLOT_TLS_KEY, or neither",
            ));
        }
    };

    let certs: Vec<_> = rustls_pemfile::certs(&mut BufReader::new(File::open(cert_path)?))
        .collect::<Result<_, _>>()?;
    if certs.is_empty() {
        return Err(io::Error::new(
            ErrorKind::InvalidInput,
            format!("no certificates in {cert_path}"),
        ));
    }
    let key = rustls_pemfile::private_key(&mut BufReader::new(File::open(key_path)?))?
        .ok_or_else(|| {
            io::Error::new(ErrorKind::InvalidInput, format!("no private key in {key_path}"))
        })?;

    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| io::Error::new(ErrorKind::InvalidInput, e))?;
    config.alpn_protocols = vec![b"postgresql".to_vec()];

    Ok(Some(TlsAcceptor::from(Arc::new(config))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plaintext_when_unset() {
        assert!(load_tls_acceptor(None, None).unwrap().is_none());
    }

    #[test]
    fn half_configured_is_an_error() {
        let err = load_tls_acceptor(Some("cert.pem"), None).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(load_tls_acceptor(None, Some("key.pem")).is_err());
    }

    #[test]
    fn missing_cert_file() {
        let err = load_tls_acceptor(Some("/nonexistent/cert.pem"), Some("/nonexistent/key.pem"))
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
