//! Method routing table.
//!
//! Services register once at server start and are scanned in registration
//! order when a request's method meta is resolved. The first service claiming
//! a method id wins, so registration order is significant when ids collide
//! across services. Handlers are never removed at runtime; the list only ever
//! grows, behind a read-mostly lock.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::Result;

/// A request handler over raw bytes.
///
/// Pure `bytes -> bytes` function; must not block the I/O path for unbounded
/// time. Errors become explicit error responses to the caller.
pub type MethodHandler = Arc<dyn Fn(&[u8]) -> Result<Vec<u8>> + Send + Sync>;

/// A service exposing handlers under method meta ids.
pub trait RpcService: Send + Sync {
    /// Human-readable service name, for logs.
    fn service_name(&self) -> &str;

    /// Numeric service id (the high component of its methods' meta ids).
    fn service_id(&self) -> u32;

    /// Handler for `method_meta`, if this service claims it.
    fn method_handler(&self, method_meta: u32) -> Option<MethodHandler>;
}

/// A plain map-backed [`RpcService`].
///
/// # Example
///
/// ```
/// use wirecall::server::ServiceRegistration;
///
/// let service = ServiceRegistration::new(0x0CAFE000, "storage")
///     .method(0x0CAFE000, |body| Ok(body.to_vec()));
/// ```
pub struct ServiceRegistration {
    service_id: u32,
    service_name: String,
    methods: HashMap<u32, MethodHandler>,
}

impl ServiceRegistration {
    /// Create an empty registration.
    pub fn new(service_id: u32, service_name: impl Into<String>) -> Self {
        Self {
            service_id,
            service_name: service_name.into(),
            methods: HashMap::new(),
        }
    }

    /// Attach a handler under a method meta id.
    pub fn method<F>(mut self, method_meta: u32, handler: F) -> Self
    where
        F: Fn(&[u8]) -> Result<Vec<u8>> + Send + Sync + 'static,
    {
        self.methods.insert(method_meta, Arc::new(handler));
        self
    }
}

impl RpcService for ServiceRegistration {
    fn service_name(&self) -> &str {
        &self.service_name
    }

    fn service_id(&self) -> u32 {
        self.service_id
    }

    fn method_handler(&self, method_meta: u32) -> Option<MethodHandler> {
        self.methods.get(&method_meta).cloned()
    }
}

/// Server-side routing table, scoped to one listener.
pub struct Router {
    services: RwLock<Vec<Arc<dyn RpcService>>>,
}

impl Router {
    /// Create an empty router.
    pub fn new() -> Self {
        Self {
            services: RwLock::new(Vec::new()),
        }
    }

    /// Append a service to the routing table.
    ///
    /// Safe to call concurrently; later registrations lose method-id ties to
    /// earlier ones.
    pub fn register(&self, service: Arc<dyn RpcService>) {
        tracing::debug!(
            service = service.service_name(),
            service_id = service.service_id(),
            "registering service"
        );
        self.services
            .write()
            .expect("router lock poisoned")
            .push(service);
    }

    /// Resolve a handler by method meta: first registered match wins.
    pub fn resolve(&self, method_meta: u32) -> Option<MethodHandler> {
        self.services
            .read()
            .expect("router lock poisoned")
            .iter()
            .find_map(|service| service.method_handler(method_meta))
    }

    /// Number of registered services.
    pub fn service_count(&self) -> usize {
        self.services.read().expect("router lock poisoned").len()
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}
