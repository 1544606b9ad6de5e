//! Pre-upgrade authentication hook.
//!
//! This crate doesn't authenticate charge points itself. OCPP deployments
//! do it in many ways: HTTP Basic credentials, client certificates
//! checked by a TLS terminator, allow-lists of charge point ids. Instead
//! it defines the [`Authenticator`] trait, which the server consults with
//! the full upgrade request before the WebSocket is established.
//!
//! Rejected requests never become sessions: the client gets an HTTP error
//! response and the TCP connection is dropped.

use ocpp_transport::{Rejection, UpgradeRequest};

/// Decides whether an upgrade request may become a session.
///
/// The check runs inside the WebSocket handshake, so it is synchronous.
/// Keep it fast; look things up in memory, not over the network.
///
/// Any `Fn(&UpgradeRequest) -> Result<(), Rejection>` closure is an
/// authenticator:
///
/// ```rust
/// use ocpp_session::Authenticator;
/// use ocpp_transport::{Rejection, UpgradeRequest};
///
/// let allow_list = ["CP-1", "CP-2"];
/// let auth = move |req: &UpgradeRequest| match req.last_path_segment() {
///     Some(id) if allow_list.contains(&id) => Ok(()),
///     _ => Err(Rejection::unauthorized("unknown charge point")),
/// };
/// # fn check(_: &impl Authenticator) {}
/// # check(&auth);
/// ```
pub trait Authenticator: Send + Sync + 'static {
    /// Inspects the request (path, headers, remote address, offered
    /// sub-protocols) and accepts or rejects it.
    fn authorize(&self, request: &UpgradeRequest) -> Result<(), Rejection>;
}

impl<F> Authenticator for F
where
    F: Fn(&UpgradeRequest) -> Result<(), Rejection> + Send + Sync + 'static,
{
    fn authorize(&self, request: &UpgradeRequest) -> Result<(), Rejection> {
        self(request)
    }
}

/// Accepts every request.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl Authenticator for AllowAll {
    fn authorize(&self, _request: &UpgradeRequest) -> Result<(), Rejection> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(path: &str, headers: &[(&str, &str)]) -> UpgradeRequest {
        UpgradeRequest {
            path: path.to_string(),
            remote_addr: None,
            offered_subprotocols: vec!["ocpp1.6".into()],
            subprotocol: Some("ocpp1.6".into()),
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_ascii_lowercase(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn test_allow_all_accepts() {
        assert!(AllowAll.authorize(&request("/ocpp/CP-1", &[])).is_ok());
    }

    #[test]
    fn test_closure_authenticator_checks_header() {
        let auth = |req: &UpgradeRequest| {
            if req.header("authorization") == Some("Basic Q1AtMTpzZWNyZXQ=") {
                Ok(())
            } else {
                Err(Rejection::unauthorized("bad credentials"))
            }
        };

        assert!(
            auth.authorize(&request(
                "/ocpp/CP-1",
                &[("Authorization", "Basic Q1AtMTpzZWNyZXQ=")]
            ))
            .is_ok()
        );
        let rejection = auth.authorize(&request("/ocpp/CP-1", &[])).unwrap_err();
        assert_eq!(rejection.status, 401);
    }
}
