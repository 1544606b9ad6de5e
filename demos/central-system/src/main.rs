use std::collections::HashMap;
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use ocpp::prelude::*;
use ocpp::v16::{
    AuthorizationStatus, Authorize, AuthorizeResponse, BootNotification,
    BootNotificationResponse, ChargePointStatus, Heartbeat, HeartbeatResponse,
    IdTagInfo, RegistrationStatus, StatusNotification,
    StatusNotificationResponse,
};
use parking_lot::Mutex;
use serde_json::json;
use tracing_subscriber::EnvFilter;

const DEFAULT_BIND: &str = "0.0.0.0:8887";
const HEARTBEAT_INTERVAL: i32 = 300;

// ---------------------------------------------------------------------------
// Depot state
// ---------------------------------------------------------------------------

/// What the central system knows about its charge points.
#[derive(Default)]
struct Depot {
    /// Last reported status per (charge point, connector).
    connectors: Mutex<HashMap<(String, u32), ChargePointStatus>>,
    /// Id tags that must not start a charge.
    blocked_tags: Vec<String>,
}

impl Depot {
    fn with_blocked(tags: &[&str]) -> Self {
        Self {
            blocked_tags: tags.iter().map(|t| t.to_string()).collect(),
            ..Self::default()
        }
    }

    fn authorize(&self, id_tag: &str) -> AuthorizationStatus {
        if self.blocked_tags.iter().any(|t| t.eq_ignore_ascii_case(id_tag)) {
            AuthorizationStatus::Blocked
        } else {
            AuthorizationStatus::Accepted
        }
    }

    fn connector(&self, peer: &str, connector_id: u32) -> Option<ChargePointStatus> {
        self.connectors
            .lock()
            .get(&(peer.to_string(), connector_id))
            .copied()
    }
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

fn router(depot: Arc<Depot>) -> Router {
    let auth_depot = Arc::clone(&depot);
    Router::builder()
        .on(BootNotification, |session, req| async move {
            tracing::info!(
                peer = session.peer_id(),
                vendor = %req.charge_point_vendor,
                model = %req.charge_point_model,
                "boot notification"
            );
            Ok(BootNotificationResponse {
                status: RegistrationStatus::Accepted,
                current_time: now(),
                interval: HEARTBEAT_INTERVAL,
            })
        })
        // Once the charge point knows it's accepted, ask for its config.
        .after(BootNotification, |session, _req, _resp| async move {
            let config = session.call_raw("GetConfiguration", json!({})).await?;
            let keys = config["configurationKey"].as_array().map_or(0, Vec::len);
            tracing::info!(peer = session.peer_id(), keys, "configuration received");
            Ok(())
        })
        .on(Heartbeat, |_, _| async {
            Ok(HeartbeatResponse { current_time: now() })
        })
        .on(StatusNotification, move |session, req| {
            let depot = Arc::clone(&depot);
            async move {
                tracing::info!(
                    peer = session.peer_id(),
                    connector = req.connector_id,
                    status = ?req.status,
                    error_code = ?req.error_code,
                    "status notification"
                );
                depot
                    .connectors
                    .lock()
                    .insert((session.peer_id().to_string(), req.connector_id), req.status);
                Ok(StatusNotificationResponse {})
            }
        })
        .on(Authorize, move |session, req| {
            let depot = Arc::clone(&auth_depot);
            async move {
                let status = depot.authorize(&req.id_tag);
                tracing::info!(peer = session.peer_id(), id_tag = %req.id_tag, ?status, "authorize");
                Ok(AuthorizeResponse { id_tag_info: IdTagInfo::new(status) })
            }
        })
        .build()
}

// ---------------------------------------------------------------------------
// Server bootstrap
// ---------------------------------------------------------------------------

async fn build(bind: &str, depot: Arc<Depot>) -> Result<CentralSystem, OcppError> {
    CentralSystem::builder()
        .bind(bind)
        .router(router(depot))
        .duplicate_policy(DuplicatePolicy::ReplaceOld)
        .on_connect(|session| {
            tracing::info!(
                peer = session.peer_id(),
                subprotocol = session.subprotocol().unwrap_or("-"),
                "charge point connected"
            );
        })
        .on_disconnect(|session| {
            tracing::info!(peer = session.peer_id(), "charge point disconnected");
        })
        .build()
        .await
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let bind = std::env::var("OCPP_BIND").unwrap_or_else(|_| DEFAULT_BIND.to_string());
    let depot = Arc::new(Depot::with_blocked(&["BLOCKED-TAG"]));
    let server = build(&bind, depot).await?;
    tracing::info!(addr = %server.local_addr()?, "central system listening on ws://<addr>/ocpp/<id>");

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ocpp::v16::{
        AuthorizeRequest, BootNotificationRequest, ChargePointErrorCode,
        StatusNotificationRequest,
    };
    use std::time::Duration;

    async fn start(depot: Arc<Depot>) -> String {
        let server = build("127.0.0.1:0", depot).await.unwrap();
        let addr = server.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let _ = server.run().await;
        });
        addr
    }

    async fn charge_point(addr: &str, id: &str, router: Router) -> ChargePoint {
        ChargePoint::builder()
            .id(id)
            .router(router)
            .connect(&format!("ws://{addr}/ocpp"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_boot_then_central_system_asks_for_configuration() {
        let addr = start(Arc::new(Depot::default())).await;
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let cp_router = Router::builder()
            .on_raw("GetConfiguration", move |_, _| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(());
                    Ok(json!({ "configurationKey": [] }))
                }
            })
            .build();
        let cp = charge_point(&addr, "CP-1", cp_router).await;

        let boot = cp
            .call::<BootNotification>(BootNotificationRequest::new("VendorX", "ModelY"))
            .await
            .unwrap();

        assert_eq!(boot.status, RegistrationStatus::Accepted);
        assert_eq!(boot.interval, HEARTBEAT_INTERVAL);
        // The after-handler's GetConfiguration reaches the charge point.
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("GetConfiguration should arrive")
            .unwrap();
    }

    #[tokio::test]
    async fn test_status_notification_updates_depot() {
        let depot = Arc::new(Depot::default());
        let addr = start(Arc::clone(&depot)).await;
        let cp = charge_point(&addr, "CP-2", Router::builder().build()).await;

        cp.call::<StatusNotification>(StatusNotificationRequest {
            connector_id: 1,
            error_code: ChargePointErrorCode::NoError,
            status: ChargePointStatus::Charging,
            info: None,
            timestamp: None,
            vendor_id: None,
            vendor_error_code: None,
        })
        .await
        .unwrap();

        assert_eq!(depot.connector("CP-2", 1), Some(ChargePointStatus::Charging));
        assert_eq!(depot.connector("CP-2", 2), None);
    }

    #[tokio::test]
    async fn test_authorize_blocked_tag() {
        let addr = start(Arc::new(Depot::with_blocked(&["BAD"]))).await;
        let cp = charge_point(&addr, "CP-3", Router::builder().build()).await;

        let blocked = cp
            .call::<Authorize>(AuthorizeRequest { id_tag: "bad".into() })
            .await
            .unwrap();
        let ok = cp
            .call::<Authorize>(AuthorizeRequest { id_tag: "GOOD".into() })
            .await
            .unwrap();

        assert_eq!(blocked.id_tag_info.status, AuthorizationStatus::Blocked);
        assert_eq!(ok.id_tag_info.status, AuthorizationStatus::Accepted);
    }

    #[test]
    fn test_now_is_rfc3339_utc() {
        let ts = now();
        assert!(ts.ends_with('Z'), "{ts}");
        assert!(chrono::DateTime::parse_from_rfc3339(&ts).is_ok());
    }
}
