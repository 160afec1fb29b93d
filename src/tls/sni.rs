//! TLS SNI adapter (component C).
//!
//! Unlike the teacher, which only ever terminates TLS behind a CONNECT
//! tunnel with a cert path known up front, this adapter runs directly on
//! an accepted socket (per §1, traffic arrives pre-diverted, there is no
//! CONNECT method) and must decide TLS-vs-plain and pick the right leaf
//! certificate from the ClientHello alone. It is built on
//! `tokio_rustls::LazyConfigAcceptor`, which exists for exactly this:
//! parsing just enough of the ClientHello to inspect the SNI before the
//! handshake is completed with a certificate chosen at that point.
//!
//! Step 1 (peek without consuming) is a plain `TcpStream::peek` for the
//! leading TLS record-type byte (`0x16`); nothing is consumed from the
//! stream unless that byte is present, so the plain-HTTP fallback can
//! still read the connection from the start.

use crate::error::{Error, Result};
use crate::tls::ca::SpoofedCertStore;
use tokio::net::TcpStream;
use tokio_rustls::server::TlsStream;
use tokio_rustls::LazyConfigAcceptor;

/// TLS record content type `handshake` (RFC 8446 §5.1).
const TLS_HANDSHAKE_RECORD_TYPE: u8 = 0x16;

pub enum PeekedConnection {
    Tls(Box<TlsStream<TcpStream>>, String),
    PlainHttp(TcpStream),
}

/// Peeks the accepted socket and, if it is carrying TLS, completes the
/// server handshake using a leaf certificate minted for the ClientHello's
/// SNI. Returns `PlainHttp` untouched (no bytes consumed) when no TLS
/// ClientHello is detected at all.
///
/// `rustls` only ever negotiates TLS 1.2/1.3; it has no SSLv3/TLS1.0/1.1
/// implementation at any configuration level, so the generous downstream
/// protocol floor described by the source design is not reachable with
/// this stack. `DownstreamTlsConfig`'s `allow_*` flags are kept as
/// configuration surface and logged when a handshake is accepted, but
/// rustls enforces TLS 1.2+ regardless of their value (see DESIGN.md).
pub async fn accept(stream: TcpStream, cert_store: &SpoofedCertStore) -> Result<PeekedConnection> {
    let mut probe = [0u8; 1];
    let peeked = stream
        .peek(&mut probe)
        .await
        .map_err(|e| Error::HandshakePeekFailed(e.to_string()))?;

    if peeked == 0 || probe[0] != TLS_HANDSHAKE_RECORD_TYPE {
        return Ok(PeekedConnection::PlainHttp(stream));
    }

    let acceptor = LazyConfigAcceptor::new(rustls::server::Acceptor::default(), stream);
    let start = acceptor
        .await
        .map_err(|e| Error::HandshakePeekFailed(e.to_string()))?;

    let sni = start
        .client_hello()
        .server_name()
        .map(|s| s.to_string())
        .ok_or(Error::SniMissing)?;

    let server_config = cert_store.leaf_for(&sni)?;
    let tls_stream = start
        .into_stream(server_config)
        .await
        .map_err(|e| Error::HandshakeFailed(e.to_string()))?;

    Ok(PeekedConnection::Tls(Box::new(tls_stream), sni))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn plain_http_byte_is_not_mistaken_for_tls() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            use tokio::io::AsyncWriteExt;
            stream.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();
            stream
        });

        let (server_stream, _) = listener.accept().await.unwrap();
        let store = crate::tls::ca::SpoofedCertStore::new(
            "Test CA",
            "Test Org",
            365,
            730,
            &crate::tls::trust_store::NoopTrustStoreInstaller,
        )
        .unwrap();

        match accept(server_stream, &store).await.unwrap() {
            PeekedConnection::PlainHttp(_) => {}
            PeekedConnection::Tls(..) => panic!("expected plain HTTP fallback"),
        }
        client.await.unwrap();
    }
}
