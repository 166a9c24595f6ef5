use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Path, Request, State},
    middleware::Next,
    response::Response,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::action::{ActionKind, ActionRequest, ActionSnapshot, TriggerSource};
use crate::config::AppConfig;
use crate::error::{AppError, Result};
use crate::pinger::ProbeStatus;
use crate::state::AppState;
use crate::supervisor::UnitReport;
use crate::targets::MacAddr;

/// Access policy middleware. Unlike the magic packet path, a denied web
/// client gets an explicit 403; HTTP has a response channel, so silence
/// would only look like an outage.
pub async fn access_filter(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Result<Response> {
    if !state.policy.is_allowed(peer.ip()) {
        debug!("Web client {} blocked by policy", peer.ip());
        return Err(AppError::AccessDenied(peer.ip().to_string()));
    }
    Ok(next.run(request).await)
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Liveness check; deliberately bypasses nothing and computes nothing
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// One target on the status page
#[derive(Serialize)]
pub struct TargetStatus {
    pub id: String,
    pub name: String,
    pub gpio_line: u32,
    pub mac: MacAddr,
    pub enabled: bool,
    /// Absent for disabled targets, which have no action machine
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<ActionSnapshot>,
}

/// Full fleet status response
#[derive(Serialize)]
pub struct StatusResponse {
    pub now: DateTime<Utc>,
    pub privileges_dropped: bool,
    pub targets: Vec<TargetStatus>,
    pub probes: Vec<ProbeStatus>,
    pub units: Vec<UnitReport>,
}

/// Fleet status: every target with its machine phase, the last probe
/// results and the supervised unit states
pub async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let targets = state
        .registry
        .iter()
        .map(|target| TargetStatus {
            id: target.id.clone(),
            name: target.name.clone(),
            gpio_line: target.gpio_line,
            mac: target.mac,
            enabled: target.enabled,
            action: state.machine(&target.id).map(|m| m.snapshot()),
        })
        .collect();

    let probes = state
        .pinger
        .as_ref()
        .map(|p| p.snapshot())
        .unwrap_or_default();

    Json(StatusResponse {
        now: Utc::now(),
        privileges_dropped: state.privs.dropped(),
        targets,
        probes,
        units: state.supervisor.statuses(),
    })
}

/// Running configuration, as loaded at startup. The `[security]` section
/// stays out of the response: the filter lists and drop-to user are of no
/// use to a legitimate client.
pub async fn show_config(State(state): State<Arc<AppState>>) -> Result<Json<serde_json::Value>> {
    let mut view = serde_json::to_value(&state.config)
        .map_err(|e| AppError::Internal(format!("Config serialization failed: {}", e)))?;
    if let Some(sections) = view.as_object_mut() {
        sections.remove("security");
    }
    Ok(Json(view))
}

/// Manual trigger request body. The kind is matched by hand so an unknown
/// value gets a 400, not the extractor's 422.
#[derive(Debug, Deserialize)]
pub struct ActionBody {
    pub kind: String,
}

fn parse_kind(kind: &str) -> Result<ActionKind> {
    match kind {
        "short" => Ok(ActionKind::Short),
        "long" => Ok(ActionKind::Long),
        other => Err(AppError::BadRequest(format!(
            "Unknown action kind: {}. Valid kinds: short, long",
            other
        ))),
    }
}

/// Manual trigger response
#[derive(Debug, Serialize)]
pub struct ActionResponse {
    pub success: bool,
    pub status: &'static str,
    pub message: String,
}

/// Trigger a press on one target. The response is sent after the pulse
/// completes, so success means the line was actually actuated.
pub async fn trigger_action(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<ActionBody>,
) -> Result<Json<ActionResponse>> {
    let kind = parse_kind(&body.kind)?;

    // Disabled targets are visible in status but not triggerable
    let machine = state
        .machine(&id)
        .ok_or_else(|| AppError::NotFound(format!("no such target: {}", id)))?;

    machine
        .submit(ActionRequest {
            kind,
            source: TriggerSource::Web,
        })
        .await?;

    Ok(Json(ActionResponse {
        success: true,
        status: "accepted",
        message: format!("{} press completed on {}", kind, id),
    }))
}

/// Per-target outcome of a fleet-wide trigger
#[derive(Debug, Serialize)]
pub struct FleetActionOutcome {
    pub id: String,
    pub status: &'static str,
    pub message: String,
}

/// Fleet-wide trigger response
#[derive(Debug, Serialize)]
pub struct FleetActionResponse {
    pub success: bool,
    pub results: Vec<FleetActionOutcome>,
}

/// Trigger a press on every enabled target at once. Pulses run
/// concurrently, one task per target, and each machine applies its own
/// busy/cooldown rules; the response reports one outcome per target.
pub async fn trigger_fleet_action(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ActionBody>,
) -> Result<Json<FleetActionResponse>> {
    let kind = parse_kind(&body.kind)?;

    let mut tasks = Vec::new();
    for (id, machine) in state.machines.iter() {
        let machine = machine.clone();
        tasks.push((
            id.clone(),
            tokio::spawn(async move {
                machine
                    .submit(ActionRequest {
                        kind,
                        source: TriggerSource::Web,
                    })
                    .await
            }),
        ));
    }

    let mut results = Vec::new();
    for (id, task) in tasks {
        let outcome = match task.await {
            Ok(Ok(())) => FleetActionOutcome {
                status: "accepted",
                message: format!("{} press completed on {}", kind, id),
                id,
            },
            Ok(Err(e)) => FleetActionOutcome {
                status: e.label(),
                message: e.to_string(),
                id,
            },
            Err(e) => FleetActionOutcome {
                status: "internal",
                message: format!("trigger task failed: {}", e),
                id,
            },
        };
        results.push(outcome);
    }
    results.sort_by(|a, b| a.id.cmp(&b.id));

    let success = results.iter().all(|r| r.status == "accepted");
    Ok(Json(FleetActionResponse { success, results }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ActionMachine, Phase, PressTimings};
    use crate::config::TargetConfig;
    use crate::error::Result;
    use crate::gpio::LineDriver;
    use crate::privs::PrivilegeState;
    use crate::security::{AccessPolicy, HostMatcher};
    use crate::supervisor::Supervisor;
    use crate::targets::TargetRegistry;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::time::Duration;

    struct CountingDriver {
        pulses: Mutex<usize>,
    }

    #[async_trait]
    impl LineDriver for CountingDriver {
        async fn pulse(&self, _duration: Duration) -> Result<()> {
            *self.pulses.lock() += 1;
            Ok(())
        }
    }

    fn fixture(policy: AccessPolicy) -> (Arc<AppState>, Arc<CountingDriver>) {
        let mut config = AppConfig::default();
        config.targets = vec![
            TargetConfig {
                id: "board1".to_string(),
                name: "Jetson-Orin-1".to_string(),
                gpio_line: 18,
                mac: "00:00:00:00:00:01".to_string(),
                ..Default::default()
            },
            TargetConfig {
                id: "board2".to_string(),
                name: "Jetson-Orin-2".to_string(),
                gpio_line: 19,
                mac: "00:00:00:00:00:02".to_string(),
                enabled: false,
                ..Default::default()
            },
            TargetConfig {
                id: "board3".to_string(),
                name: "Jetson-Orin-3".to_string(),
                gpio_line: 20,
                mac: "00:00:00:00:00:03".to_string(),
                ..Default::default()
            },
        ];
        let registry = Arc::new(TargetRegistry::from_config(&config).unwrap());

        let driver = Arc::new(CountingDriver {
            pulses: Mutex::new(0),
        });
        let timings = PressTimings {
            short: Duration::from_millis(1),
            long: Duration::from_millis(4100),
            fixed: None,
            min_interval: Duration::from_secs(180),
        };
        // Both enabled targets share the counting driver
        let machines = Arc::new(HashMap::from_iter(["board1", "board3"].map(|id| {
            (
                id.to_string(),
                Arc::new(ActionMachine::new(
                    registry.get(id).unwrap().clone(),
                    driver.clone(),
                    timings,
                )),
            )
        })));

        let privs = Arc::new(PrivilegeState::new());
        let supervisor = Arc::new(Supervisor::new(false, privs.clone()));
        let state = AppState::new(
            config,
            registry,
            machines,
            Arc::new(policy),
            None,
            privs,
            supervisor,
        );
        (state, driver)
    }

    #[tokio::test]
    async fn test_health_check() {
        let response = health_check().await;
        assert_eq!(response.status, "ok");
        assert_eq!(response.version, env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn test_status_lists_all_targets() {
        let (state, _) = fixture(AccessPolicy::allow_all());
        let response = status(State(state)).await;

        assert_eq!(response.targets.len(), 3);
        let board1 = &response.targets[0];
        assert!(board1.enabled);
        assert_eq!(board1.action.as_ref().unwrap().phase, Phase::Idle);
        // Disabled target is listed but has no machine
        let board2 = &response.targets[1];
        assert!(!board2.enabled);
        assert!(board2.action.is_none());
        assert!(!response.privileges_dropped);
    }

    #[tokio::test]
    async fn test_trigger_action_pulses_and_reports() {
        let (state, driver) = fixture(AccessPolicy::allow_all());
        let response = trigger_action(
            State(state.clone()),
            Path("board1".to_string()),
            Json(ActionBody {
                kind: "short".to_string(),
            }),
        )
        .await
        .unwrap();

        assert!(response.success);
        assert_eq!(response.status, "accepted");
        assert_eq!(*driver.pulses.lock(), 1);
        assert_eq!(
            state.machine("board1").unwrap().snapshot().phase,
            Phase::Cooldown
        );
    }

    #[tokio::test]
    async fn test_trigger_during_cooldown_is_too_soon() {
        let (state, driver) = fixture(AccessPolicy::allow_all());
        let body = || {
            Json(ActionBody {
                kind: "short".to_string(),
            })
        };

        trigger_action(State(state.clone()), Path("board1".to_string()), body())
            .await
            .unwrap();
        let err = trigger_action(State(state), Path("board1".to_string()), body())
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::TooSoon { .. }));
        assert_eq!(*driver.pulses.lock(), 1);
    }

    #[tokio::test]
    async fn test_trigger_unknown_target_not_found() {
        let (state, _) = fixture(AccessPolicy::allow_all());
        let err = trigger_action(
            State(state),
            Path("board9".to_string()),
            Json(ActionBody {
                kind: "short".to_string(),
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_trigger_unknown_kind_is_bad_request() {
        let (state, driver) = fixture(AccessPolicy::allow_all());
        let err = trigger_action(
            State(state),
            Path("board1".to_string()),
            Json(ActionBody {
                kind: "medium".to_string(),
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
        assert_eq!(*driver.pulses.lock(), 0);
    }

    #[tokio::test]
    async fn test_trigger_disabled_target_not_found() {
        let (state, driver) = fixture(AccessPolicy::allow_all());
        let err = trigger_action(
            State(state),
            Path("board2".to_string()),
            Json(ActionBody {
                kind: "long".to_string(),
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert_eq!(*driver.pulses.lock(), 0);
    }

    #[tokio::test]
    async fn test_fleet_action_pulses_every_enabled_target() {
        let (state, driver) = fixture(AccessPolicy::allow_all());
        let response = trigger_fleet_action(
            State(state),
            Json(ActionBody {
                kind: "short".to_string(),
            }),
        )
        .await
        .unwrap();

        assert!(response.success);
        // Enabled targets only; board2 has no machine
        assert_eq!(response.results.len(), 2);
        assert_eq!(response.results[0].id, "board1");
        assert_eq!(response.results[0].status, "accepted");
        assert_eq!(response.results[1].id, "board3");
        assert_eq!(response.results[1].status, "accepted");
        assert_eq!(*driver.pulses.lock(), 2);
    }

    #[tokio::test]
    async fn test_fleet_action_reports_per_target_cooldown() {
        let (state, driver) = fixture(AccessPolicy::allow_all());
        let body = || {
            Json(ActionBody {
                kind: "short".to_string(),
            })
        };

        trigger_fleet_action(State(state.clone()), body())
            .await
            .unwrap();
        let second = trigger_fleet_action(State(state), body()).await.unwrap();

        assert!(!second.success);
        assert!(second.results.iter().all(|r| r.status == "too-soon"));
        assert_eq!(*driver.pulses.lock(), 2);
    }

    #[tokio::test]
    async fn test_fleet_action_unknown_kind_is_bad_request() {
        let (state, driver) = fixture(AccessPolicy::allow_all());
        let err = trigger_fleet_action(
            State(state),
            Json(ActionBody {
                kind: "medium".to_string(),
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
        assert_eq!(*driver.pulses.lock(), 0);
    }

    #[tokio::test]
    async fn test_show_config_redacts_security_section() {
        let (state, _) = fixture(AccessPolicy::allow_all());
        let view = show_config(State(state)).await.unwrap().0;

        assert_eq!(view["target"].as_array().unwrap().len(), 3);
        assert_eq!(view["target"][0]["id"], "board1");
        assert!(view.get("security").is_none());
        assert!(view.get("timings").is_some());
    }

    #[tokio::test]
    async fn test_denied_client_gets_forbidden() {
        // End-to-end through the router so the middleware actually runs
        use axum::body::Body;
        use axum::http::{Request as HttpRequest, StatusCode};
        use tower::ServiceExt;

        let deny_all = AccessPolicy::new(vec![], vec![HostMatcher::Any]);
        let (state, _) = fixture(deny_all);
        let router = super::super::create_router(state);

        let peer: SocketAddr = "10.0.0.66:55000".parse().unwrap();
        let request = HttpRequest::builder()
            .uri("/api/status")
            .extension(ConnectInfo(peer))
            .body(Body::empty())
            .unwrap();

        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
