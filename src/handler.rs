//! Handler trait - the embedding application's decision hook.
//!
//! The worker invokes the handler once per NOTIFY frame, in its own task,
//! so handlers on different streams run concurrently on the same
//! connection. The handler reads the request's messages and appends
//! actions; the worker builds the ack from whatever it left there.
//!
//! # Example
//!
//! ```ignore
//! use spop_agent::{HandlerFn, Request, Scope, TypedData};
//!
//! let handler = HandlerFn(|req: &mut Request| {
//!     if req.message("check-client-ip").is_some() {
//!         req.set_var(Scope::Transaction, "ip_score", TypedData::Uint32(100));
//!     }
//! });
//! ```

use std::future::Future;
use std::pin::Pin;

use crate::request::Request;

/// Boxed future, as returned by handler implementations.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Per-notify decision hook.
///
/// May be invoked concurrently for distinct streams on one connection
/// and across connections; implementations must be `Sync`.
pub trait Handler: Send + Sync + 'static {
    /// Inspect the request and populate its actions.
    fn handle<'a>(&'a self, req: &'a mut Request) -> BoxFuture<'a, ()>;
}

/// Adapter turning a plain synchronous closure into a [`Handler`].
pub struct HandlerFn<F>(pub F);

impl<F> Handler for HandlerFn<F>
where
    F: Fn(&mut Request) + Send + Sync + 'static,
{
    fn handle<'a>(&'a self, req: &'a mut Request) -> BoxFuture<'a, ()> {
        (self.0)(req);
        Box::pin(std::future::ready(()))
    }
}
