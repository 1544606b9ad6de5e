//! The OCPP-J session engine.
//!
//! One [`SessionHandle`] per connected peer. It owns the connection and
//! runs everything the RPC layer needs:
//!
//! 1. **Correlation**: outgoing Calls get a UUID v4 and an entry in the
//!    [`PendingCalls`] table until their answer or a timeout arrives.
//! 2. **Dispatch**: incoming Calls go through the [`Router`] to the
//!    registered handler, and the result goes back to the peer.
//! 3. **Liveness**: pings from the client side, a read deadline on both.
//! 4. **Bookkeeping**: the [`SessionRegistry`] tracks who is connected.
//!
//! # How it fits in the stack
//!
//! ```text
//! Server / client (above)  ← accept loop, connect, duplicate policy
//!     ↕
//! Session layer (this crate)  ← pumps, pending calls, dispatch, registry
//!     ↕
//! Protocol layer (below)  ← Message, JsonCodec, PayloadSchema
//!     ↕
//! Transport layer (below)  ← Connection, Frame
//! ```

mod auth;
mod config;
mod error;
mod pending;
mod registry;
mod router;
mod session;

pub use auth::{AllowAll, Authenticator};
pub use config::{DispatchPolicy, Role, SessionConfig, ValidationPolicy};
pub use error::SessionError;
pub use pending::{CallOutcome, PendingCalls};
pub use registry::SessionRegistry;
pub use router::{
    AfterHandler, Handler, HandlerError, Route, Router, RouterBuilder,
};
pub use session::{SessionContext, SessionHandle, SessionState};
