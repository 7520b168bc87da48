// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 bitrpc-team

//! TCP RPC server: accept loop plus one worker per connection.
//!
//! The accept loop runs on a dedicated thread; each accepted connection
//! gets a detached worker thread. A worker reads one framed request at a
//! time, extracts the method name, dispatches through the service
//! registry (stream, then unary, then async), and writes the response
//! frame(s). Handler failures of any kind produce an empty response frame
//! and the connection continues; only socket errors close it.
//!
//! `stop()` clears the running flag and shuts the listening socket down,
//! which unblocks `accept`; in-flight workers observe broken reads and
//! exit on their own (they are detached and never block shutdown).

use super::frame::{extract_method_name, read_frame, write_frame};
use super::service::{Dispatcher, ServiceRegistry};
use super::{split_method, Result};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::fd::{AsRawFd, RawFd};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::thread;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP listen port (0 = ephemeral port assigned by the OS)
    pub listen_port: u16,

    /// Listen backlog (pending connection queue size)
    pub listen_backlog: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_port: 0,
            listen_backlog: 128,
        }
    }
}

/// TCP RPC server.
pub struct RpcServer {
    services: Arc<ServiceRegistry>,
    running: Arc<AtomicBool>,
    /// Raw fd of the listening socket, -1 while stopped. Kept so `stop()`
    /// can shut the socket down from outside the accept thread.
    listener_fd: Arc<AtomicI32>,
    local_port: u16,
    accept_thread: Option<thread::JoinHandle<()>>,
}

impl RpcServer {
    /// Create a server with an empty service registry
    #[must_use]
    pub fn new() -> Self {
        Self {
            services: Arc::new(ServiceRegistry::new()),
            running: Arc::new(AtomicBool::new(false)),
            listener_fd: Arc::new(AtomicI32::new(-1)),
            local_port: 0,
            accept_thread: None,
        }
    }

    /// The service registry used for dispatch
    #[must_use]
    pub fn services(&self) -> &ServiceRegistry {
        &self.services
    }

    /// Bind the listener and spawn the accept thread.
    ///
    /// Calling `start` on a running server is a no-op.
    pub fn start(&mut self, config: ServerConfig) -> Result<()> {
        if self.running.load(Ordering::Acquire) {
            log::warn!("[RPC] start ignored, server already running");
            return Ok(());
        }

        let listener = Self::bind(&config)?;
        self.local_port = listener.local_addr()?.port();
        self.listener_fd
            .store(listener.as_raw_fd(), Ordering::Release);
        self.running.store(true, Ordering::Release);
        log::info!("[RPC] server listening on port {}", self.local_port);

        let services = Arc::clone(&self.services);
        let running = Arc::clone(&self.running);
        self.accept_thread = Some(thread::spawn(move || {
            accept_loop(&listener, &services, &running);
        }));
        Ok(())
    }

    fn bind(config: &ServerConfig) -> Result<TcpListener> {
        let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        let addr: SocketAddr = ([0, 0, 0, 0], config.listen_port).into();
        socket.bind(&addr.into())?;
        socket.listen(config.listen_backlog as i32)?;
        Ok(socket.into())
    }

    /// True while the accept loop is live
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Port the listener is bound to (useful with an ephemeral port)
    #[must_use]
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// Stop accepting connections. Idempotent.
    ///
    /// Shuts the listening socket down to unblock `accept` and joins the
    /// accept thread. Connection workers are detached; they exit when
    /// their peers disconnect or their next read fails.
    pub fn stop(&mut self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }

        let fd = self.listener_fd.swap(-1, Ordering::AcqRel);
        if fd >= 0 {
            // SAFETY: fd came from the live listener owned by the accept
            // thread. shutdown() only transitions socket state and is safe
            // to call from another thread; the accept thread's blocked
            // accept() returns with an error and observes running=false.
            unsafe {
                libc::shutdown(fd as RawFd, libc::SHUT_RDWR);
            }
        }

        if let Some(handle) = self.accept_thread.take() {
            if handle.join().is_err() {
                log::error!("[RPC] accept thread panicked during shutdown");
            }
        }
        log::info!("[RPC] server stopped");
    }
}

impl Default for RpcServer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RpcServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn accept_loop(listener: &TcpListener, services: &Arc<ServiceRegistry>, running: &Arc<AtomicBool>) {
    while running.load(Ordering::Acquire) {
        match listener.accept() {
            Ok((stream, peer)) => {
                log::debug!("[RPC] accepted connection from {peer}");
                let services = Arc::clone(services);
                let running = Arc::clone(running);
                thread::spawn(move || {
                    handle_connection(stream, &services, &running);
                    log::debug!("[RPC] connection from {peer} closed");
                });
            }
            Err(e) => {
                if running.load(Ordering::Acquire) {
                    log::warn!("[RPC] accept failed: {e}");
                } else {
                    break;
                }
            }
        }
    }
}

/// Per-connection worker loop: one framed request at a time.
fn handle_connection(
    mut stream: TcpStream,
    services: &Arc<ServiceRegistry>,
    running: &Arc<AtomicBool>,
) {
    if let Err(e) = stream.set_nodelay(true) {
        log::debug!("[RPC] set_nodelay failed: {e}");
    }

    while running.load(Ordering::Acquire) {
        let payload = match read_frame(&mut stream) {
            Ok(Some(payload)) => payload,
            Ok(None) => return, // clean EOF
            Err(e) => {
                log::debug!("[RPC] dropping connection: {e}");
                return;
            }
        };
        if payload.is_empty() {
            continue;
        }

        let (full_name, body) = extract_method_name(&payload);
        let (service_name, method_name) = split_method(&full_name);

        let Some(service) = services.get(service_name) else {
            log::warn!("[RPC] service not found: {service_name}");
            if write_frame(&mut stream, &[]).is_err() {
                return;
            }
            continue;
        };

        let Some(dispatcher) = service.dispatcher(method_name) else {
            log::warn!("[RPC] method not found: {service_name}.{method_name}");
            if write_frame(&mut stream, &[]).is_err() {
                return;
            }
            continue;
        };

        if !dispatch(&mut stream, &dispatcher, body, &full_name) {
            return;
        }
    }
}

/// Run one dispatcher and write its response frame(s).
///
/// Returns false when the connection is no longer usable.
fn dispatch(stream: &mut TcpStream, dispatcher: &Dispatcher, body: &[u8], name: &str) -> bool {
    log::debug!("[RPC] dispatching {name} ({})", dispatcher.kind());
    match dispatcher {
        Dispatcher::Stream(f) => {
            match guarded(name, || f(body)) {
                Some(Ok(frames)) => {
                    for frame in frames {
                        if frame.len() > super::MAX_FRAME_SIZE {
                            log::error!("[RPC] {name}: stream frame exceeds cap, ending stream");
                            break;
                        }
                        if write_frame(stream, &frame).is_err() {
                            return false;
                        }
                    }
                }
                Some(Err(e)) => log::warn!("[RPC] {name}: stream handler failed: {e}"),
                None => {}
            }
            // Terminator doubles as the empty-stream response on error.
            write_frame(stream, &[]).is_ok()
        }
        Dispatcher::Unary(f) => write_unary(stream, guarded(name, || f(body)), name),
        Dispatcher::AsyncUnary(f) => write_unary(stream, guarded(name, || f(body)), name),
    }
}

fn write_unary(stream: &mut TcpStream, result: Option<Result<Vec<u8>>>, name: &str) -> bool {
    let response = match result {
        Some(Ok(response)) => response,
        Some(Err(e)) => {
            log::warn!("[RPC] {name}: handler failed: {e}");
            Vec::new()
        }
        None => Vec::new(),
    };
    write_frame(stream, &response).is_ok()
}

/// Invoke a handler, converting a panic into `None`.
///
/// A handler can never kill the connection: the worker reports an empty
/// response frame and keeps serving.
fn guarded<T>(name: &str, f: impl FnOnce() -> Result<T>) -> Option<Result<T>> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => Some(result),
        Err(_) => {
            log::error!("[RPC] handler for {name} panicked");
            None
        }
    }
}
