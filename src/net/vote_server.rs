use crate::candidate::VoteHandler;
use crate::net::http::read_request;
use crate::net::{server, NetError};
use crate::timeouts::{REQUEST_TIMEOUT, SERVER_SHUTDOWN_GRACE};
use log::warn;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::time::Duration;

/// Configuration for the vote intake endpoint.
pub struct VoteHttpServerConfig {
    pub bind: SocketAddr,
    /// Optional cap on concurrently-served connections.
    pub max_connections: Option<usize>,
}

pub struct VoteServerHandle {
    inner: server::ServerHandle,
}

impl VoteServerHandle {
    /// Address the listener actually bound (useful with port 0).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.local_addr()
    }

    pub fn shutdown(&mut self) {
        if let Err(err) = self.try_shutdown(SERVER_SHUTDOWN_GRACE) {
            warn!("event=vote_http_shutdown_error error={err}");
        }
    }

    pub fn try_shutdown(&mut self, timeout: Duration) -> Result<(), NetError> {
        self.inner.try_shutdown(timeout)
    }
}

impl Drop for VoteServerHandle {
    fn drop(&mut self) {
        let _ = self.try_shutdown(SERVER_SHUTDOWN_GRACE);
    }
}

/// HTTP endpoint a candidate accepts votes on.
///
/// A single path serves all votes; the handler owns validation and the
/// election update, this layer owns sockets and lifecycle.
pub struct VoteHttpServer;

impl VoteHttpServer {
    pub fn spawn(
        config: VoteHttpServerConfig,
        handler: VoteHandler,
    ) -> Result<VoteServerHandle, NetError> {
        let listener = TcpListener::bind(config.bind)?;
        let handle = move |stream: TcpStream, addr: SocketAddr| -> Result<(), NetError> {
            let handler = handler.clone();
            if let Err(err) = serve_connection(stream, &handler) {
                warn!("event=vote_http_connection_error addr={addr} error={err}");
            }
            Ok(())
        };
        let inner = server::spawn_listener("vote_http", listener, config.max_connections, handle)?;
        Ok(VoteServerHandle { inner })
    }
}

fn serve_connection(mut stream: TcpStream, handler: &VoteHandler) -> Result<(), NetError> {
    stream.set_read_timeout(Some(REQUEST_TIMEOUT))?;
    stream.set_write_timeout(Some(REQUEST_TIMEOUT))?;
    let request = read_request(&mut stream)?;
    handler.handle_request(&request, &mut stream)
}
