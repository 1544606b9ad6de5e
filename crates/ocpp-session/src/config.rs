//! Session configuration: timeouts, queue sizes, and policies.

use std::time::Duration;

/// Which side of the connection a session plays.
///
/// Only the client (the charge point) sends pings. Apart from that both
/// roles behave the same: either side may call the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Charge point, the side that opened the WebSocket.
    Client,
    /// Central system, the side that accepted it.
    Server,
}

/// How inbound Calls are handed to handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchPolicy {
    /// One Call at a time, in arrival order. The next frame isn't read
    /// until the current handler has returned.
    #[default]
    Sequential,
    /// Each Call runs on its own task, at most `max_in_flight` at once.
    /// Replies may then leave in a different order than the Calls came in.
    Concurrent { max_in_flight: usize },
}

/// What happens when a payload fails its schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValidationPolicy {
    /// Answer with a CallError carrying the violation code. An invalid
    /// handler response is replaced by an `InternalError` CallError.
    #[default]
    Reply,
    /// Log the violation and send nothing.
    Suppress,
}

/// Configuration for a single session.
///
/// Every wait a session performs has a bound here. Start from
/// [`SessionConfig::for_client`] or [`SessionConfig::for_server`] and
/// override the fields you care about.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long [`call`](crate::SessionHandle::call) waits for the peer's
    /// CallResult or CallError.
    pub response_timeout: Duration,

    /// Deadline for a single frame write. Exceeding it closes the session.
    pub write_timeout: Duration,

    /// Read deadline. If nothing at all arrives for this long, the peer
    /// is considered dead.
    pub pong_wait: Duration,

    /// Interval between pings. `None` disables self-initiated pings.
    pub ping_interval: Option<Duration>,

    /// Capacity of the outbound frame queue.
    pub outbound_capacity: usize,

    /// How long a producer waits for room in a full outbound queue before
    /// giving up with [`SessionError::QueueFull`](crate::SessionError::QueueFull).
    pub enqueue_timeout: Duration,

    /// Grace delay between writing a CallResult and starting its
    /// after-handler.
    pub after_handler_delay: Duration,

    pub dispatch: DispatchPolicy,

    pub validation: ValidationPolicy,
}

impl SessionConfig {
    /// Charge point defaults: pings every 54 seconds.
    pub fn for_client() -> Self {
        Self {
            ping_interval: Some(Duration::from_secs(54)),
            ..Self::default()
        }
    }

    /// Central system defaults: no self-initiated pings, the charge point
    /// keeps the connection alive.
    pub fn for_server() -> Self {
        Self::default()
    }

    /// Defaults for the given role.
    pub fn for_role(role: Role) -> Self {
        match role {
            Role::Client => Self::for_client(),
            Role::Server => Self::for_server(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            response_timeout: Duration::from_secs(30),
            write_timeout: Duration::from_secs(10),
            pong_wait: Duration::from_secs(60),
            ping_interval: None,
            outbound_capacity: 64,
            enqueue_timeout: Duration::from_secs(5),
            after_handler_delay: Duration::from_millis(100),
            dispatch: DispatchPolicy::default(),
            validation: ValidationPolicy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_has_no_ping_and_sequential_dispatch() {
        let config = SessionConfig::default();
        assert_eq!(config.ping_interval, None);
        assert_eq!(config.dispatch, DispatchPolicy::Sequential);
        assert_eq!(config.validation, ValidationPolicy::Reply);
        assert_eq!(config.response_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_for_client_enables_ping() {
        let config = SessionConfig::for_client();
        assert_eq!(config.ping_interval, Some(Duration::from_secs(54)));
        assert!(config.ping_interval.unwrap() < config.pong_wait);
    }

    #[test]
    fn test_for_role_matches_constructors() {
        assert_eq!(
            SessionConfig::for_role(Role::Server).ping_interval,
            SessionConfig::for_server().ping_interval
        );
        assert_eq!(
            SessionConfig::for_role(Role::Client).ping_interval,
            SessionConfig::for_client().ping_interval
        );
    }
}
