//! Route dispatch for received messages.
//!
//! Handlers are registered per route and run synchronously on the receive
//! path, under the router's read lock. Middleware wraps every handler in
//! registration order (the first middleware added is the outermost).
//!
//! Two middleware are provided:
//! - [`recovery`] converts a handler panic into an error so one bad
//!   handler cannot take down the receive loop;
//! - [`phase_required`] rejects messages that arrive before the session
//!   has progressed far enough.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use veil_proto::{Metadata, Route};

use crate::{error::SessionError, phase::Phase};

/// What a handler sees for one received message.
pub struct HandlerRequest {
    pub route: Route,
    pub payload: Vec<u8>,
    pub metadata: Metadata,
    pub phase: Phase,
}

pub type Handler = Arc<dyn Fn(&HandlerRequest) -> Result<(), SessionError> + Send + Sync>;
pub type Middleware = Arc<dyn Fn(Handler) -> Handler + Send + Sync>;

#[derive(Default)]
pub struct Router {
    handlers: RwLock<HashMap<Route, Handler>>,
    middleware: RwLock<Vec<Middleware>>,
    default_handler: RwLock<Option<Handler>>,
    closed: AtomicBool,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. Each route takes exactly one handler; a second
    /// registration is refused rather than silently replaced.
    pub fn register(&self, route: Route, handler: Handler) -> Result<(), SessionError> {
        if !route.routable() {
            return Err(SessionError::InvalidRoute(route));
        }
        let mut handlers = self.handlers.write();
        if handlers.contains_key(&route) {
            return Err(SessionError::HandlerExists(route));
        }
        handlers.insert(route, handler);
        Ok(())
    }

    /// Fallback for routes without a registered handler.
    pub fn set_default(&self, handler: Handler) {
        *self.default_handler.write() = Some(handler);
    }

    /// Append a middleware. Dispatch wraps handlers in registration order,
    /// so the middleware added first runs first.
    pub fn add_middleware(&self, middleware: Middleware) {
        self.middleware.write().push(middleware);
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Dispatch one message to its handler.
    pub fn dispatch(&self, request: &HandlerRequest) -> Result<(), SessionError> {
        if self.is_closed() {
            return Err(SessionError::RouterClosed);
        }

        let handlers = self.handlers.read();
        let handler = match handlers.get(&request.route) {
            Some(h) => h.clone(),
            None => match self.default_handler.read().clone() {
                Some(h) => h,
                None => return Err(SessionError::NoHandler(request.route)),
            },
        };

        let wrapped = {
            let middleware = self.middleware.read();
            middleware
                .iter()
                .rev()
                .fold(handler, |inner, mw| mw(inner))
        };

        // The handlers read lock stays held across the call; handlers must
        // not register routes from inside themselves.
        wrapped(request)
    }
}

/// Convert handler panics into `InvalidHandler` errors.
pub fn recovery() -> Middleware {
    Arc::new(|next: Handler| {
        Arc::new(move |request: &HandlerRequest| {
            match catch_unwind(AssertUnwindSafe(|| next(request))) {
                Ok(result) => result,
                Err(panic) => {
                    let message = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "handler panicked".to_string());
                    tracing::error!(route = ?request.route, %message, "recovered handler panic");
                    Err(SessionError::InvalidHandler(message))
                }
            }
        })
    })
}

/// Reject messages that arrive before the session reached `min` phase.
pub fn phase_required(min: Phase) -> Middleware {
    Arc::new(move |next: Handler| {
        Arc::new(move |request: &HandlerRequest| {
            if request.phase < min {
                return Err(SessionError::InvalidRoute(request.route));
            }
            next(request)
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn request(route: Route, phase: Phase) -> HandlerRequest {
        HandlerRequest {
            route,
            payload: vec![],
            metadata: Metadata::default(),
            phase,
        }
    }

    fn counting_handler(counter: Arc<AtomicUsize>) -> Handler {
        Arc::new(move |_req| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[test]
    fn dispatch_reaches_registered_handler() {
        let router = Router::new();
        let hits = Arc::new(AtomicUsize::new(0));
        router
            .register(Route::ExchangeMessages, counting_handler(hits.clone()))
            .unwrap();

        router
            .dispatch(&request(Route::ExchangeMessages, Phase::Established))
            .unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn duplicate_registration_refused() {
        let router = Router::new();
        let noop: Handler = Arc::new(|_| Ok(()));
        router.register(Route::ExchangeMessages, noop.clone()).unwrap();
        assert!(matches!(
            router.register(Route::ExchangeMessages, noop),
            Err(SessionError::HandlerExists(Route::ExchangeMessages))
        ));
    }

    #[test]
    fn invalid_route_cannot_be_registered() {
        let router = Router::new();
        let noop: Handler = Arc::new(|_| Ok(()));
        assert!(matches!(
            router.register(Route::Invalid, noop),
            Err(SessionError::InvalidRoute(Route::Invalid))
        ));
    }

    #[test]
    fn unknown_route_falls_through_to_default() {
        let router = Router::new();
        assert!(matches!(
            router.dispatch(&request(Route::ExchangeMessages, Phase::Established)),
            Err(SessionError::NoHandler(Route::ExchangeMessages))
        ));

        let hits = Arc::new(AtomicUsize::new(0));
        router.set_default(counting_handler(hits.clone()));
        router
            .dispatch(&request(Route::ExchangeMessages, Phase::Established))
            .unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dispatch_after_close_fails() {
        let router = Router::new();
        router.close();
        assert!(matches!(
            router.dispatch(&request(Route::ExchangeMessages, Phase::Established)),
            Err(SessionError::RouterClosed)
        ));
    }

    #[test]
    fn middleware_runs_in_registration_order() {
        let router = Router::new();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        for label in ["first", "second"] {
            let order = order.clone();
            router.add_middleware(Arc::new(move |next: Handler| {
                let order = order.clone();
                Arc::new(move |req: &HandlerRequest| {
                    order.lock().push(label);
                    next(req)
                })
            }));
        }

        let order_inner = order.clone();
        router
            .register(
                Route::ExchangeMessages,
                Arc::new(move |_req| {
                    order_inner.lock().push("handler");
                    Ok(())
                }),
            )
            .unwrap();

        router
            .dispatch(&request(Route::ExchangeMessages, Phase::Established))
            .unwrap();
        assert_eq!(*order.lock(), vec!["first", "second", "handler"]);
    }

    #[test]
    fn recovery_converts_panics() {
        let router = Router::new();
        router.add_middleware(recovery());
        router
            .register(
                Route::ExchangeMessages,
                Arc::new(|_req| panic!("boom in handler")),
            )
            .unwrap();

        match router.dispatch(&request(Route::ExchangeMessages, Phase::Established)) {
            Err(SessionError::InvalidHandler(message)) => {
                assert!(message.contains("boom in handler"));
            }
            other => panic!("expected InvalidHandler, got {other:?}"),
        }
    }

    #[test]
    fn phase_gate_rejects_early_messages() {
        let router = Router::new();
        router.add_middleware(phase_required(Phase::Established));
        let hits = Arc::new(AtomicUsize::new(0));
        router
            .register(Route::ExchangeMessages, counting_handler(hits.clone()))
            .unwrap();

        assert!(router
            .dispatch(&request(Route::ExchangeMessages, Phase::ChallengeSent))
            .is_err());
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        router
            .dispatch(&request(Route::ExchangeMessages, Phase::Established))
            .unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
