//! Lifecycle handle for both servers: an owned, `Clone`-able handle with
//! `start`/`stop`/`is_running`, rather than a process-wide global.

use crate::facade::EmulatorFacade;
use crate::gate::AsyncRequestGate;
use crate::json::JsonExtractor;
use crate::poll::{self, DebugPollLoop};
use crate::qmp::QmpSession;
use emudbg_common::config::ServerConfig;
use socket2::{Domain, Protocol, Socket, Type};
use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Bind a TCP listener on `INADDR_ANY` with backlog 1 and
/// `SO_REUSEADDR`/`SO_REUSEPORT` set.
fn bind_listener(port: u16) -> emudbg_common::Result<TcpListener> {
    let addr: SocketAddr = SocketAddr::new(std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED), port);
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1)?;
    Ok(socket.into())
}

struct ServerInner {
    facade: Arc<dyn EmulatorFacade>,
    gate: AsyncRequestGate,
    running: AtomicBool,
    gdb_thread: Mutex<Option<JoinHandle<()>>>,
    qmp_thread: Mutex<Option<JoinHandle<()>>>,
    qmp_client: Mutex<Option<TcpStream>>,
}

/// Owned handle to a running (or stopped) pair of GDB/QMP servers.
#[derive(Clone)]
pub struct DebugServer {
    inner: Arc<ServerInner>,
}

impl DebugServer {
    /// Construct a stopped server bound to `facade`. Call [`start`] to begin
    /// listening.
    pub fn new(facade: Arc<dyn EmulatorFacade>) -> Self {
        Self {
            inner: Arc::new(ServerInner {
                facade,
                gate: AsyncRequestGate::new(),
                running: AtomicBool::new(false),
                gdb_thread: Mutex::new(None),
                qmp_thread: Mutex::new(None),
                qmp_client: Mutex::new(None),
            }),
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Start whichever endpoints `config` enables. Idempotent: calling while
    /// already running is a no-op.
    pub fn start(&self, config: &ServerConfig) -> emudbg_common::Result<()> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if config.gdb.enabled {
            let listener = bind_listener(config.gdb.port)?;
            let inner = self.inner.clone();
            let handle = thread::spawn(move || run_gdb_loop(inner, listener));
            *self.inner.gdb_thread.lock().unwrap() = Some(handle);
            info!(port = config.gdb.port, "gdb endpoint listening");
        }

        if config.qmp.enabled {
            let listener = bind_listener(config.qmp.port)?;
            let inner = self.inner.clone();
            let handle = thread::spawn(move || run_qmp_loop(inner, listener));
            *self.inner.qmp_thread.lock().unwrap() = Some(handle);
            info!(port = config.qmp.port, "qmp endpoint listening");
        }

        Ok(())
    }

    /// Stop both endpoints: unblock any blocked accept/recv, join the
    /// transport threads, and reset the Async Request Gate to IDLE.
    /// Idempotent.
    pub fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }

        if let Some(stream) = self.inner.qmp_client.lock().unwrap().take() {
            let _ = stream.shutdown(Shutdown::Both);
        }

        if let Some(handle) = self.inner.gdb_thread.lock().unwrap().take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.inner.qmp_thread.lock().unwrap().take() {
            let _ = handle.join();
        }
        self.inner.gate.reset();
    }
}

fn run_gdb_loop(inner: Arc<ServerInner>, listener: TcpListener) {
    let mut poll_loop = match DebugPollLoop::new(listener) {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "failed to start gdb poll loop");
            return;
        }
    };
    while inner.running.load(Ordering::SeqCst) {
        if let Some(_action) = poll_loop.poll_once(inner.facade.as_ref()) {
            // No CPU interpreter lives in this crate; the standalone server
            // treats every step/continue as completing instantly against
            // the stand-in facade.
            poll_loop.report_stop();
        }
        poll::service_async_requests(&inner.gate, inner.facade.as_ref());
        thread::sleep(Duration::from_millis(2));
    }
}

fn run_qmp_loop(inner: Arc<ServerInner>, listener: TcpListener) {
    listener
        .set_nonblocking(true)
        .expect("qmp listener nonblocking");
    while inner.running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, addr)) => {
                debug!(%addr, "qmp client connected");
                stream.set_nonblocking(false).ok();
                *inner.qmp_client.lock().unwrap() = stream.try_clone().ok();
                handle_qmp_client(&inner, stream);
                *inner.qmp_client.lock().unwrap() = None;
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(10));
            }
            Err(e) => {
                warn!(error = %e, "qmp accept failed");
                thread::sleep(Duration::from_millis(10));
            }
        }
    }
}

fn handle_qmp_client(inner: &Arc<ServerInner>, mut stream: TcpStream) {
    let mut session = QmpSession::new();
    if stream.write_all(&session.greeting()).is_err() {
        return;
    }

    let mut extractor = JsonExtractor::new();
    let mut buf = [0u8; 4096];
    loop {
        if !inner.running.load(Ordering::SeqCst) {
            break;
        }
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => extractor.feed(&buf[..n]),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
        while let Some(obj) = extractor.try_extract() {
            let reply = session.dispatch(&obj, inner.facade.as_ref(), &inner.gate);
            if stream.write_all(&reply).is_err() {
                return;
            }
        }
    }
}
