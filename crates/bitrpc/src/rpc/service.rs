// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 bitrpc-team

//! Service registry and method dispatch.
//!
//! A [`Service`] is a named table of methods. Each method is registered
//! in one of three shapes, captured as a [`Dispatcher`] sum so the server
//! worker can stay type-erased:
//!
//! - **Unary** `fn(Req) -> Resp`: decode, invoke, encode on the worker
//! - **AsyncUnary** `fn(Req) -> Resp`: invoked on a spawned thread and
//!   joined before framing the response
//! - **Stream** `fn(Req) -> IntoIterator<Item = Resp>`: the dispatcher
//!   relays pre-encoded frames until the iterator ends
//!
//! Resolution order for an incoming call is stream, then unary, then
//! async. The typed registration helpers capture the decode-request /
//! encode-response path, so dispatch itself never sees concrete types.

use super::{Result, RpcError};
use crate::codec::{decode_object, encode_object, Message};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Pre-encoded response frames produced by a streaming handler.
pub type FrameIter = Box<dyn Iterator<Item = Vec<u8>> + Send>;

/// Type-erased method dispatcher, one of three shapes.
pub(crate) enum Dispatcher {
    Unary(Box<dyn Fn(&[u8]) -> Result<Vec<u8>> + Send + Sync>),
    AsyncUnary(Box<dyn Fn(&[u8]) -> Result<Vec<u8>> + Send + Sync>),
    Stream(Box<dyn Fn(&[u8]) -> Result<FrameIter> + Send + Sync>),
}

impl Dispatcher {
    /// Rank used only for resolution-order bookkeeping in tests
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Self::Unary(_) => "unary",
            Self::AsyncUnary(_) => "async",
            Self::Stream(_) => "stream",
        }
    }
}

/// Decode a request body (`[i32 hash][payload]`) into its declared type.
fn decode_request<Req: Message>(body: &[u8]) -> Result<Req> {
    decode_object::<Req>(body).map_err(RpcError::Serialization)
}

/// A named group of methods registered with the server.
///
/// Method registration is one-shot at startup; lookups dominate at
/// runtime. Registering a method name twice overwrites the previous
/// registration.
pub struct Service {
    name: String,
    methods: Mutex<HashMap<String, Arc<Dispatcher>>>,
}

impl Service {
    /// Create an empty service with a stable name
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            methods: Mutex::new(HashMap::new()),
        }
    }

    /// The service's registered name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register a synchronous unary method `(Req) -> Resp`
    pub fn register_unary<Req, Resp, F>(&self, method: &str, handler: F)
    where
        Req: Message,
        Resp: Message,
        F: Fn(Req) -> Resp + Send + Sync + 'static,
    {
        let dispatcher = Dispatcher::Unary(Box::new(move |body: &[u8]| {
            let request = decode_request::<Req>(body)?;
            Ok(encode_object(&handler(request)))
        }));
        self.insert(method, dispatcher);
    }

    /// Register an asynchronous unary method.
    ///
    /// The handler runs on a dedicated worker thread; the dispatcher
    /// joins it before framing the response, so the wire contract is
    /// identical to a synchronous method.
    pub fn register_async_unary<Req, Resp, F>(&self, method: &str, handler: F)
    where
        Req: Message,
        Resp: Message,
        F: Fn(Req) -> Resp + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        let dispatcher = Dispatcher::AsyncUnary(Box::new(move |body: &[u8]| {
            let request = decode_request::<Req>(body)?;
            let handler = Arc::clone(&handler);
            let worker = std::thread::spawn(move || encode_object(&(*handler)(request)));
            worker
                .join()
                .map_err(|_| RpcError::Protocol("async handler panicked".into()))
        }));
        self.insert(method, dispatcher);
    }

    /// Register a server-streaming method `(Req) -> impl IntoIterator<Item = Resp>`.
    ///
    /// Each yielded item is encoded as a `[hash][body]` frame; the server
    /// writes the zero-length terminator after the iterator ends.
    pub fn register_stream<Req, Resp, F, I>(&self, method: &str, handler: F)
    where
        Req: Message,
        Resp: Message,
        F: Fn(Req) -> I + Send + Sync + 'static,
        I: IntoIterator<Item = Resp>,
        I::IntoIter: Send + 'static,
    {
        let dispatcher = Dispatcher::Stream(Box::new(move |body: &[u8]| {
            let request = decode_request::<Req>(body)?;
            let frames = handler(request)
                .into_iter()
                .map(|item| encode_object(&item));
            Ok(Box::new(frames) as FrameIter)
        }));
        self.insert(method, dispatcher);
    }

    fn insert(&self, method: &str, dispatcher: Dispatcher) {
        let previous = self
            .methods
            .lock()
            .insert(method.to_string(), Arc::new(dispatcher));
        if previous.is_some() {
            log::warn!(
                "[RPC] method {}.{} re-registered, previous handler dropped",
                self.name,
                method
            );
        }
    }

    /// True when `method` is registered in any shape
    #[must_use]
    pub fn has_method(&self, method: &str) -> bool {
        self.methods.lock().contains_key(method)
    }

    pub(crate) fn dispatcher(&self, method: &str) -> Option<Arc<Dispatcher>> {
        self.methods.lock().get(method).cloned()
    }
}

/// Registry of services keyed by name.
///
/// Shared between the registration site and the server's connection
/// workers; writes are one-shot at startup, reads dominate.
#[derive(Default)]
pub struct ServiceRegistry {
    services: Mutex<HashMap<String, Arc<Service>>>,
}

impl ServiceRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a service under its own name, replacing any previous
    /// registration with that name
    pub fn register(&self, service: Arc<Service>) {
        let name = service.name().to_string();
        log::info!("[RPC] service '{name}' registered");
        self.services.lock().insert(name, service);
    }

    /// Remove a service by name; unknown names are a no-op
    pub fn unregister(&self, name: &str) {
        if self.services.lock().remove(name).is_some() {
            log::info!("[RPC] service '{name}' unregistered");
        }
    }

    /// Look up a service by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<Service>> {
        self.services.lock().get(name).cloned()
    }

    /// True when a service with this name is registered
    #[must_use]
    pub fn has_service(&self, name: &str) -> bool {
        self.services.lock().contains_key(name)
    }

    /// Names of all registered services
    #[must_use]
    pub fn service_names(&self) -> Vec<String> {
        self.services.lock().keys().cloned().collect()
    }
}
