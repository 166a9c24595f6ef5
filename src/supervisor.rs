//! Unit supervisor
//!
//! Runs the long-lived service tasks (web interface, magic packet
//! listener, health pinger) and restarts the ones that die, when restart
//! is enabled. Each unit is registered as a factory so a fresh future can
//! be built per incarnation; the factories close over `try_clone`d
//! sockets, since the originals were bound once by the privilege
//! sequencer and cannot be re-bound.
//!
//! One restriction carries over from the privilege model: a unit serving
//! a privileged port can never be restarted after the drop, because the
//! process no longer holds the rights a re-bind would need. Eligibility
//! is re-checked at every crash, not cached at registration.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::privs::{self, PrivilegeState};

pub type UnitFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
pub type UnitFactory = Box<dyn Fn() -> UnitFuture + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitStatus {
    Running,
    Stopped,
    Crashed,
}

/// Status line for one unit, as reported on the status page
#[derive(Debug, Clone, Serialize)]
pub struct UnitReport {
    pub name: String,
    pub status: UnitStatus,
    pub restarts: u32,
}

struct Unit {
    name: String,
    /// Listener port, if the unit serves one; drives restart eligibility
    port: Option<u16>,
    factory: UnitFactory,
    handle: Option<JoinHandle<()>>,
    status: UnitStatus,
    restarts: u32,
}

pub struct Supervisor {
    restart_enabled: bool,
    privs: Arc<PrivilegeState>,
    units: Mutex<Vec<Unit>>,
}

impl Supervisor {
    pub fn new(restart_enabled: bool, privs: Arc<PrivilegeState>) -> Self {
        Self {
            restart_enabled,
            privs,
            units: Mutex::new(Vec::new()),
        }
    }

    /// Register a unit. Call before [`start`](Self::start); units added
    /// later are picked up on the next tick.
    pub fn add_unit(&self, name: &str, port: Option<u16>, factory: UnitFactory) {
        self.units.lock().push(Unit {
            name: name.to_string(),
            port,
            factory,
            handle: None,
            status: UnitStatus::Stopped,
            restarts: 0,
        });
    }

    /// Spawn every registered unit that is not already running
    pub fn start(&self) {
        let mut units = self.units.lock();
        for unit in units.iter_mut() {
            if unit.handle.is_none() {
                info!("Starting unit {}", unit.name);
                unit.handle = Some(tokio::spawn((unit.factory)()));
                unit.status = UnitStatus::Running;
            }
        }
    }

    fn restart_eligible(&self, unit: &Unit) -> bool {
        if !self.restart_enabled {
            return false;
        }
        match unit.port {
            Some(port) if privs::is_privileged_port(port) && self.privs.dropped() => false,
            _ => true,
        }
    }

    /// One supervision pass: reap finished units and restart the eligible
    /// ones.
    pub async fn tick(&self) {
        // Take the finished handles under the lock, await them outside it
        let finished: Vec<(usize, JoinHandle<()>)> = {
            let mut units = self.units.lock();
            units
                .iter_mut()
                .enumerate()
                .filter(|(_, u)| u.handle.as_ref().is_some_and(|h| h.is_finished()))
                .filter_map(|(i, u)| u.handle.take().map(|h| (i, h)))
                .collect()
        };

        for (index, handle) in finished {
            let panicked = handle.await.is_err();

            let mut units = self.units.lock();
            let unit = &mut units[index];
            if panicked {
                error!("Unit {} panicked", unit.name);
            } else {
                warn!("Unit {} exited", unit.name);
            }

            if self.restart_eligible(unit) {
                unit.restarts += 1;
                info!("Restarting unit {} (restart #{})", unit.name, unit.restarts);
                unit.handle = Some(tokio::spawn((unit.factory)()));
                unit.status = UnitStatus::Running;
            } else {
                unit.status = UnitStatus::Crashed;
                if self.restart_enabled {
                    warn!(
                        "Unit {} not restarted: privileged port after privilege drop",
                        unit.name
                    );
                }
            }
        }
    }

    pub fn statuses(&self) -> Vec<UnitReport> {
        self.units
            .lock()
            .iter()
            .map(|u| UnitReport {
                name: u.name.clone(),
                status: u.status,
                restarts: u.restarts,
            })
            .collect()
    }

    /// Supervision loop; runs until the task is dropped
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(Duration::from_millis(500));
        loop {
            ticker.tick().await;
            self.tick().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn counting_factory(counter: Arc<AtomicU32>) -> UnitFactory {
        Box::new(move || {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        })
    }

    async fn settle(supervisor: &Supervisor) {
        tokio::time::sleep(Duration::from_millis(20)).await;
        supervisor.tick().await;
        // Give any task respawned by the tick a chance to run
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_crashed_unit_restarts_when_enabled() {
        let supervisor = Supervisor::new(true, Arc::new(PrivilegeState::new()));
        let runs = Arc::new(AtomicU32::new(0));
        supervisor.add_unit("flaky", None, counting_factory(runs.clone()));

        supervisor.start();
        settle(&supervisor).await;

        assert!(runs.load(Ordering::SeqCst) >= 2);
        let report = &supervisor.statuses()[0];
        assert_eq!(report.status, UnitStatus::Running);
        assert!(report.restarts >= 1);
    }

    #[tokio::test]
    async fn test_no_restart_when_disabled() {
        let supervisor = Supervisor::new(false, Arc::new(PrivilegeState::new()));
        let runs = Arc::new(AtomicU32::new(0));
        supervisor.add_unit("oneshot", None, counting_factory(runs.clone()));

        supervisor.start();
        settle(&supervisor).await;
        settle(&supervisor).await;

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(supervisor.statuses()[0].status, UnitStatus::Crashed);
    }

    #[tokio::test]
    async fn test_privileged_port_unit_not_restarted_after_drop() {
        let privs = Arc::new(PrivilegeState::new());
        privs.mark_dropped();
        let supervisor = Supervisor::new(true, privs);

        let wol_runs = Arc::new(AtomicU32::new(0));
        let web_runs = Arc::new(AtomicU32::new(0));
        supervisor.add_unit("wol", Some(9), counting_factory(wol_runs.clone()));
        supervisor.add_unit("web", Some(8080), counting_factory(web_runs.clone()));

        supervisor.start();
        settle(&supervisor).await;

        // The privileged listener stays down; the unprivileged one restarts
        assert_eq!(wol_runs.load(Ordering::SeqCst), 1);
        assert!(web_runs.load(Ordering::SeqCst) >= 2);

        let statuses = supervisor.statuses();
        assert_eq!(statuses[0].status, UnitStatus::Crashed);
        assert_eq!(statuses[1].status, UnitStatus::Running);
    }

    #[tokio::test]
    async fn test_eligibility_rechecked_at_crash_time() {
        let privs = Arc::new(PrivilegeState::new());
        let supervisor = Supervisor::new(true, privs.clone());
        let runs = Arc::new(AtomicU32::new(0));
        supervisor.add_unit("wol", Some(9), counting_factory(runs.clone()));

        // Privileges intact: the privileged unit restarts fine
        supervisor.start();
        settle(&supervisor).await;
        assert!(runs.load(Ordering::SeqCst) >= 2);

        // After the drop the same unit becomes ineligible
        privs.mark_dropped();
        let before = runs.load(Ordering::SeqCst);
        settle(&supervisor).await;
        settle(&supervisor).await;
        let after = runs.load(Ordering::SeqCst);
        assert!(after <= before + 1);
        assert_eq!(supervisor.statuses()[0].status, UnitStatus::Crashed);
    }

    #[tokio::test]
    async fn test_panicking_unit_reported_crashed() {
        let supervisor = Supervisor::new(false, Arc::new(PrivilegeState::new()));
        supervisor.add_unit(
            "panicky",
            None,
            Box::new(|| {
                Box::pin(async {
                    panic!("boom");
                })
            }),
        );

        supervisor.start();
        settle(&supervisor).await;
        assert_eq!(supervisor.statuses()[0].status, UnitStatus::Crashed);
    }
}
