//! The action registry: which handler answers which action.
//!
//! A [`Router`] is assembled once with a [`RouterBuilder`], then frozen
//! and shared between all sessions behind an `Arc`. There is no way to
//! add a route to a router that sessions are already using.
//!
//! ```ignore
//! let router = Router::builder()
//!     .on(Heartbeat, |_session, _req| async move {
//!         Ok(HeartbeatResponse { current_time: now() })
//!     })
//!     .after(BootNotification, |session, req, _resp| async move {
//!         tracing::info!(vendor = %req.charge_point_vendor, "booted");
//!         Ok(())
//!     })
//!     .build();
//! ```

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use ocpp_protocol::{
    Action, ErrorCode, ValidationError, decode_payload, encode_payload,
};
use serde_json::Value;

use crate::{SessionError, SessionHandle};

// ---------------------------------------------------------------------------
// HandlerError
// ---------------------------------------------------------------------------

/// Why a handler didn't produce a response.
///
/// The session turns this into what goes back on the wire:
/// `Call` becomes a CallError as is, while the two validation variants
/// follow the session's [`ValidationPolicy`](crate::ValidationPolicy).
#[derive(Debug, Clone, thiserror::Error)]
pub enum HandlerError {
    /// Answer the Call with this CallError.
    #[error("{code}: {description}")]
    Call {
        code: ErrorCode,
        description: String,
        details: Value,
    },

    /// The request payload didn't decode into the handler's type.
    #[error("invalid request: {0}")]
    InvalidRequest(ValidationError),

    /// The handler's response failed validation and must not be sent.
    #[error("invalid response: {0}")]
    InvalidResponse(ValidationError),
}

impl HandlerError {
    pub fn new(code: ErrorCode, description: impl Into<String>) -> Self {
        Self::Call {
            code,
            description: description.into(),
            details: Value::Object(Default::default()),
        }
    }

    pub fn internal(description: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, description)
    }

    pub fn not_supported(description: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotSupported, description)
    }

    /// Attaches details to a `Call` error. Other variants are unchanged.
    pub fn with_details(mut self, value: Value) -> Self {
        if let Self::Call { details, .. } = &mut self {
            *details = value;
        }
        self
    }
}

/// Lets handlers use `?` on nested calls to the peer.
impl From<SessionError> for HandlerError {
    fn from(err: SessionError) -> Self {
        Self::internal(err.to_string())
    }
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

/// Type-erased handler: raw request payload in, raw response payload out.
pub type Handler = Arc<
    dyn Fn(SessionHandle, Value) -> BoxFuture<'static, Result<Value, HandlerError>>
        + Send
        + Sync,
>;

/// Type-erased after-handler: gets the request and the response that was
/// written.
pub type AfterHandler = Arc<
    dyn Fn(SessionHandle, Value, Value) -> BoxFuture<'static, Result<(), HandlerError>>
        + Send
        + Sync,
>;

/// Everything registered for one action.
#[derive(Clone)]
pub struct Route {
    pub handler: Handler,
    pub after: Option<AfterHandler>,
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("after", &self.after.is_some())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// An immutable action → handler map.
#[derive(Debug, Clone, Default)]
pub struct Router {
    routes: HashMap<String, Route>,
}

impl Router {
    pub fn builder() -> RouterBuilder {
        RouterBuilder::default()
    }

    /// Looks up the route for an action.
    pub fn get(&self, action: &str) -> Option<&Route> {
        self.routes.get(action)
    }

    pub fn contains(&self, action: &str) -> bool {
        self.routes.contains_key(action)
    }

    /// Registered action names, sorted.
    pub fn actions(&self) -> Vec<&str> {
        let mut names: Vec<&str> =
            self.routes.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Collects routes, then [`build`](Self::build)s a [`Router`].
///
/// Registering the same action twice keeps the last handler.
#[derive(Default)]
pub struct RouterBuilder {
    handlers: HashMap<String, Handler>,
    afters: HashMap<String, AfterHandler>,
}

impl RouterBuilder {
    /// Registers a typed handler for action `A`.
    ///
    /// The request is decoded (and validated) into `A::Request` before the
    /// handler runs; the response is validated and encoded afterwards.
    pub fn on<A, F, Fut>(self, _action: A, handler: F) -> Self
    where
        A: Action,
        F: Fn(SessionHandle, A::Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<A::Response, HandlerError>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        self.on_raw(A::NAME, move |session, payload| {
            let handler = Arc::clone(&handler);
            async move {
                let request = decode_payload::<A::Request>(&payload)
                    .map_err(HandlerError::InvalidRequest)?;
                let response = (*handler)(session, request).await?;
                encode_payload(&response).map_err(HandlerError::InvalidResponse)
            }
        })
    }

    /// Registers a handler that works on raw JSON payloads.
    pub fn on_raw<F, Fut>(mut self, action: impl Into<String>, handler: F) -> Self
    where
        F: Fn(SessionHandle, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
    {
        let handler: Handler = Arc::new(
            move |session: SessionHandle,
                  payload: Value|
                  -> BoxFuture<'static, Result<Value, HandlerError>> {
                Box::pin(handler(session, payload))
            },
        );
        self.handlers.insert(action.into(), handler);
        self
    }

    /// Registers a typed after-handler for action `A`.
    ///
    /// It runs detached, once the CallResult has been written. Errors are
    /// logged and otherwise ignored.
    pub fn after<A, F, Fut>(self, _action: A, after: F) -> Self
    where
        A: Action,
        F: Fn(SessionHandle, A::Request, A::Response) -> Fut
            + Send
            + Sync
            + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        let after = Arc::new(after);
        self.after_raw(A::NAME, move |session, request, response| {
            let after = Arc::clone(&after);
            async move {
                let request = decode_payload::<A::Request>(&request)
                    .map_err(HandlerError::InvalidRequest)?;
                let response = decode_payload::<A::Response>(&response)
                    .map_err(HandlerError::InvalidResponse)?;
                (*after)(session, request, response).await
            }
        })
    }

    /// Registers an after-handler on raw payloads.
    pub fn after_raw<F, Fut>(mut self, action: impl Into<String>, after: F) -> Self
    where
        F: Fn(SessionHandle, Value, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        let after: AfterHandler = Arc::new(
            move |session: SessionHandle,
                  request: Value,
                  response: Value|
                  -> BoxFuture<'static, Result<(), HandlerError>> {
                Box::pin(after(session, request, response))
            },
        );
        self.afters.insert(action.into(), after);
        self
    }

    /// Freezes the registrations.
    ///
    /// An after-handler without a matching handler is dropped with a
    /// warning, since it could never run.
    pub fn build(self) -> Router {
        let Self {
            handlers,
            mut afters,
        } = self;
        let routes = handlers
            .into_iter()
            .map(|(action, handler)| {
                let after = afters.remove(&action);
                (action, Route { handler, after })
            })
            .collect();
        for action in afters.keys() {
            tracing::warn!(%action, "after-handler has no handler, ignoring");
        }
        Router { routes }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_empty_router() {
        let router = Router::builder().build();
        assert!(router.is_empty());
        assert!(router.get("Heartbeat").is_none());
    }

    #[test]
    fn test_build_pairs_after_with_handler() {
        let router = Router::builder()
            .on_raw("Heartbeat", |_, _| async { Ok(Value::Null) })
            .after_raw("Heartbeat", |_, _, _| async { Ok(()) })
            .on_raw("Authorize", |_, _| async { Ok(Value::Null) })
            .build();

        assert_eq!(router.len(), 2);
        assert!(router.get("Heartbeat").unwrap().after.is_some());
        assert!(router.get("Authorize").unwrap().after.is_none());
        assert_eq!(router.actions(), vec!["Authorize", "Heartbeat"]);
    }

    #[test]
    fn test_build_drops_orphan_after_handler() {
        let router = Router::builder()
            .after_raw("Reset", |_, _, _| async { Ok(()) })
            .build();

        assert!(!router.contains("Reset"));
    }

    #[test]
    fn test_handler_error_from_session_error_is_internal() {
        let err: HandlerError = SessionError::ConnectionClosed.into();
        assert!(matches!(
            err,
            HandlerError::Call { code: ErrorCode::InternalError, .. }
        ));
    }

    #[test]
    fn test_with_details_only_touches_call_variant() {
        let err = HandlerError::internal("x")
            .with_details(serde_json::json!({ "k": 1 }));
        let HandlerError::Call { details, .. } = err else {
            panic!("expected Call");
        };
        assert_eq!(details, serde_json::json!({ "k": 1 }));
    }
}
