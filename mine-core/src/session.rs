//! Session setup: resolve, connect, read the protocol selector, upgrade to TLS if asked.

use std::io::Read;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};

use crate::connection::ConnectionConfig;
use crate::error::Error;
use crate::protocol::Protocol;
use crate::tls;
use crate::transport::Transport;

/// Open a broker session. Nothing is retried; everything built along the way
/// is dropped (socket included) when a step fails.
pub fn open(host: &str, port: u16, config: &ConnectionConfig) -> Result<Transport, Error> {
    let addrs: Vec<SocketAddr> = (host, port).to_socket_addrs()?.collect();
    let mut socket = TcpStream::connect(&addrs[..])?;
    tracing::debug!(%host, port, peer = ?socket.peer_addr().ok(), "tcp connected");

    let mut selector = [0u8; 1];
    socket.read_exact(&mut selector)?;
    match Protocol::from_selector(selector[0]) {
        Some(Protocol::Plain) => Ok(Transport::plain(socket)),
        Some(Protocol::Tls) => {
            let tls_config = tls::client_config(config.tls_verify)?;
            let server_name = config.tls_server_name.as_deref().unwrap_or(host);
            let session = tls::handshake(&mut socket, tls_config, server_name)?;
            Ok(Transport::tls(socket, session))
        }
        None => Err(Error::system(format!(
            "Unsupported protocol selector {}",
            selector[0]
        ))),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::net::TcpListener;
    use std::thread;

    use super::*;

    fn serve_selector(bytes: &'static [u8]) -> (u16, thread::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = thread::spawn(move || {
            let (mut s, _) = listener.accept().unwrap();
            s.write_all(bytes).unwrap();
        });
        (port, handle)
    }

    #[test]
    fn plain_selector() {
        let (port, server) = serve_selector(&[0]);
        let t = open("127.0.0.1", port, &ConnectionConfig::default()).unwrap();
        assert!(!t.is_tls());
        server.join().unwrap();
    }

    #[test]
    fn unknown_selector_is_system_error() {
        let (port, server) = serve_selector(&[7]);
        let err = open("127.0.0.1", port, &ConnectionConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, Error::System { .. }));
        assert!(err.to_string().contains("selector 7"));
        server.join().unwrap();
    }

    #[test]
    fn missing_selector_is_system_error() {
        let (port, server) = serve_selector(&[]);
        let err = open("127.0.0.1", port, &ConnectionConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, Error::System { .. }));
        server.join().unwrap();
    }

    #[test]
    fn refused_connection_carries_os_code() {
        let port = {
            let l = TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let err = open("127.0.0.1", port, &ConnectionConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, Error::System { .. }));
        assert!(err.code().is_some());
    }

    #[test]
    fn unresolvable_host_is_system_error() {
        let err = open("no-such-host.invalid", 1135, &ConnectionConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, Error::System { .. }));
    }
}
