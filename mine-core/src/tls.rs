//! TLS upgrade: one-time crypto provider setup, client config, client handshake.

use std::net::TcpStream;
use std::sync::{Arc, Once};

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{ring, CryptoProvider, WebPkiSupportedAlgorithms};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, ClientConnection, DigitallySignedStruct, RootCertStore, SignatureScheme};
use serde::{Deserialize, Serialize};

use crate::error::Error;

static INIT: Once = Once::new();

/// How the broker certificate is checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TlsVerify {
    /// Chain to the Mozilla root set and match the server name.
    #[default]
    Webpki,
    /// Accept any certificate. Handshake signatures are still checked.
    Insecure,
}

/// Install the process-wide crypto provider. Idempotent; safe from any thread.
pub fn init() {
    INIT.call_once(|| {
        if ring::default_provider().install_default().is_err() {
            tracing::debug!("crypto provider already installed, keeping it");
        }
    });
}

/// Build a client config for the given verification mode. Calls [`init`].
pub fn client_config(verify: TlsVerify) -> Result<Arc<ClientConfig>, Error> {
    init();
    let config = match verify {
        TlsVerify::Webpki => {
            let roots = RootCertStore {
                roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
            };
            ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth()
        }
        TlsVerify::Insecure => ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCert::new()))
            .with_no_client_auth(),
    };
    Ok(Arc::new(config))
}

/// Run the client handshake over `socket`. The socket is borrowed, not consumed;
/// on failure the partially built session is dropped and the socket is untouched.
pub fn handshake(
    socket: &mut TcpStream,
    config: Arc<ClientConfig>,
    server_name: &str,
) -> Result<ClientConnection, Error> {
    let name = ServerName::try_from(server_name.to_string())
        .map_err(|e| Error::Tls(format!("invalid server name {server_name:?}: {e}")))?;
    let mut session = ClientConnection::new(config, name)?;
    while session.is_handshaking() {
        session
            .complete_io(socket)
            .map_err(|e| Error::Tls(e.to_string()))?;
    }
    tracing::debug!(
        version = ?session.protocol_version(),
        suite = ?session.negotiated_cipher_suite().map(|s| s.suite()),
        "tls handshake complete"
    );
    Ok(session)
}

/// Certificate verifier that trusts any server certificate.
#[derive(Debug)]
struct AcceptAnyCert {
    algorithms: WebPkiSupportedAlgorithms,
}

impl AcceptAnyCert {
    fn new() -> Self {
        let algorithms = match CryptoProvider::get_default() {
            Some(provider) => provider.signature_verification_algorithms,
            None => ring::default_provider().signature_verification_algorithms,
        };
        Self { algorithms }
    }
}

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}
