//! A re-pointable TCP forwarder standing in for the operator's routing
//! layer: each new voter connection is forwarded to whichever backend the
//! test currently prefers. Voters never learn they were re-routed; they
//! notice only through the candidate identifier in the responses.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(10);
const PIPE_IDLE_TIMEOUT: Duration = Duration::from_secs(10);

pub struct RoutingProxy {
    addr: SocketAddr,
    backend: Arc<Mutex<SocketAddr>>,
    shutdown: Arc<AtomicBool>,
    join: Option<thread::JoinHandle<()>>,
}

impl RoutingProxy {
    pub fn spawn(backend: SocketAddr) -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;
        let backend = Arc::new(Mutex::new(backend));
        let shutdown = Arc::new(AtomicBool::new(false));
        let accept_backend = backend.clone();
        let accept_shutdown = shutdown.clone();
        let join = thread::spawn(move || loop {
            if accept_shutdown.load(Ordering::Relaxed) {
                break;
            }
            match listener.accept() {
                Ok((client, _)) => {
                    let target = *accept_backend.lock().unwrap();
                    let _pipe = thread::spawn(move || {
                        let _ = forward(client, target);
                    });
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_BACKOFF);
                }
                Err(_) => break,
            }
        });
        Ok(Self {
            addr,
            backend,
            shutdown,
            join: Some(join),
        })
    }

    /// URL voters should poll.
    pub fn url(&self) -> String {
        format!("http://{}/", self.addr)
    }

    /// Re-points every subsequent connection at a new backend.
    pub fn set_backend(&self, backend: SocketAddr) {
        *self.backend.lock().unwrap() = backend;
    }

    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for RoutingProxy {
    fn drop(&mut self) {
        self.stop();
    }
}

fn forward(client: TcpStream, target: SocketAddr) -> io::Result<()> {
    let upstream = TcpStream::connect_timeout(&target, Duration::from_secs(2))?;
    client.set_read_timeout(Some(PIPE_IDLE_TIMEOUT))?;
    upstream.set_read_timeout(Some(PIPE_IDLE_TIMEOUT))?;
    let request_side = client.try_clone()?;
    let upstream_side = upstream.try_clone()?;
    let request_pipe = thread::spawn(move || pipe(request_side, upstream_side));
    pipe(upstream, client);
    let _ = request_pipe.join();
    Ok(())
}

fn pipe(mut from: TcpStream, mut to: TcpStream) {
    let mut buffer = [0u8; 4096];
    loop {
        match from.read(&mut buffer) {
            Ok(0) => break,
            Ok(read) => {
                if to.write_all(&buffer[..read]).is_err() {
                    break;
                }
            }
            Err(_) => break,
        }
    }
    let _ = to.shutdown(Shutdown::Write);
}
