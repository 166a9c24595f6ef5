//! Shared application state for the web layer

use std::collections::HashMap;
use std::sync::Arc;

use crate::action::ActionMachine;
use crate::config::AppConfig;
use crate::pinger::HealthPinger;
use crate::privs::PrivilegeState;
use crate::security::AccessPolicy;
use crate::supervisor::Supervisor;
use crate::targets::TargetRegistry;

pub struct AppState {
    pub config: AppConfig,
    pub registry: Arc<TargetRegistry>,
    pub machines: Arc<HashMap<String, Arc<ActionMachine>>>,
    pub policy: Arc<AccessPolicy>,
    pub pinger: Option<Arc<HealthPinger>>,
    pub privs: Arc<PrivilegeState>,
    pub supervisor: Arc<Supervisor>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: AppConfig,
        registry: Arc<TargetRegistry>,
        machines: Arc<HashMap<String, Arc<ActionMachine>>>,
        policy: Arc<AccessPolicy>,
        pinger: Option<Arc<HealthPinger>>,
        privs: Arc<PrivilegeState>,
        supervisor: Arc<Supervisor>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            registry,
            machines,
            policy,
            pinger,
            privs,
            supervisor,
        })
    }

    /// Action machine for an enabled target, if it exists
    pub fn machine(&self, id: &str) -> Option<Arc<ActionMachine>> {
        self.machines.get(id).cloned()
    }
}
