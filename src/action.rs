//! Per-target action state machine
//!
//! One machine per target, the single owner of that target's reset line.
//! The machine serializes physical pulses and enforces the cooldown window:
//! a request arriving mid-pulse fails with `Busy`, a request inside the
//! cooldown fails with `TooSoon`, and neither is ever queued.
//!
//! Phase model: `idle -> pressing -> cooldown -> idle`. The
//! `cooldown -> idle` edge is evaluated lazily, on the next submit or
//! status read, so no timer task is needed.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::error::{AppError, Result};
use crate::gpio::{CdevLineDriver, LineDriver};
use crate::targets::{Target, TargetRegistry};

/// Action kind requested by a trigger source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    /// Short press (wake / reset pulse)
    Short,
    /// Long press (force power off)
    Long,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionKind::Short => write!(f, "short"),
            ActionKind::Long => write!(f, "long"),
        }
    }
}

/// Where a request came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerSource {
    /// Magic packet listener; fire-and-forget, no response channel
    Network,
    /// Web control panel
    Web,
}

/// A single trigger request
#[derive(Debug, Clone, Copy)]
pub struct ActionRequest {
    pub kind: ActionKind,
    pub source: TriggerSource,
}

/// Current phase of a target's state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Idle,
    Pressing,
    Cooldown,
}

/// Read-only view of a machine's state, for the status endpoint
#[derive(Debug, Clone, Serialize)]
pub struct ActionSnapshot {
    pub phase: Phase,
    pub last_action_at: Option<DateTime<Utc>>,
    pub last_action_kind: Option<ActionKind>,
}

/// Pulse durations and the cooldown window
#[derive(Debug, Clone, Copy)]
pub struct PressTimings {
    pub short: Duration,
    pub long: Duration,
    /// Overrides both press durations when set (dedicated reset lines)
    pub fixed: Option<Duration>,
    pub min_interval: Duration,
}

impl PressTimings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            short: config.short_press(),
            long: config.long_press(),
            fixed: config.fixed_pulse(),
            min_interval: config.min_interval(),
        }
    }

    fn duration_for(&self, kind: ActionKind) -> Duration {
        if let Some(fixed) = self.fixed {
            return fixed;
        }
        match kind {
            ActionKind::Short => self.short,
            ActionKind::Long => self.long,
        }
    }
}

struct MachineState {
    pressing: bool,
    last_action: Option<Instant>,
    last_action_at: Option<DateTime<Utc>>,
    last_action_kind: Option<ActionKind>,
}

/// Action state machine for one target
pub struct ActionMachine {
    target: Arc<Target>,
    driver: Arc<dyn LineDriver>,
    timings: PressTimings,
    state: Mutex<MachineState>,
}

impl ActionMachine {
    pub fn new(target: Arc<Target>, driver: Arc<dyn LineDriver>, timings: PressTimings) -> Self {
        Self {
            target,
            driver,
            timings,
            state: Mutex::new(MachineState {
                pressing: false,
                last_action: None,
                last_action_at: None,
                last_action_kind: None,
            }),
        }
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Submit a trigger request
    ///
    /// At most one caller passes the idle check at a time; a concurrent
    /// second caller observes `Busy`. Success means the pulse completed.
    pub async fn submit(&self, request: ActionRequest) -> Result<()> {
        let duration = self.timings.duration_for(request.kind);

        {
            let mut state = self.state.lock();
            if state.pressing {
                return Err(AppError::Busy);
            }
            if let Some(last) = state.last_action {
                let elapsed = last.elapsed();
                if elapsed < self.timings.min_interval {
                    let remaining = self.timings.min_interval - elapsed;
                    return Err(AppError::TooSoon {
                        remaining_ms: remaining.as_millis() as u64,
                    });
                }
            }
            state.pressing = true;
        }

        info!(
            target = %self.target.id,
            kind = %request.kind,
            source = ?request.source,
            duration_ms = duration.as_millis() as u64,
            "Pressing reset line {}:{}",
            self.target.gpio_chip,
            self.target.gpio_line,
        );

        // Only this task blocks for the pulse duration; the state lock is
        // not held, so other targets and status reads proceed.
        let result = self.driver.pulse(duration).await;

        let mut state = self.state.lock();
        state.pressing = false;
        match result {
            Ok(()) => {
                state.last_action = Some(Instant::now());
                state.last_action_at = Some(Utc::now());
                state.last_action_kind = Some(request.kind);
                Ok(())
            }
            Err(e) => {
                // A failed pulse does not start a cooldown: the line was
                // never actuated, so an immediate retry is legitimate.
                warn!(target = %self.target.id, "Pulse failed: {}", e);
                Err(e)
            }
        }
    }

    /// Snapshot for display; performs the lazy cooldown-to-idle check
    pub fn snapshot(&self) -> ActionSnapshot {
        let state = self.state.lock();
        let phase = if state.pressing {
            Phase::Pressing
        } else if state
            .last_action
            .is_some_and(|last| last.elapsed() < self.timings.min_interval)
        {
            Phase::Cooldown
        } else {
            Phase::Idle
        };
        ActionSnapshot {
            phase,
            last_action_at: state.last_action_at,
            last_action_kind: state.last_action_kind,
        }
    }
}

/// Build one machine per enabled target and initialize its line driver.
///
/// A driver that fails to initialize is kept: the target stays visible and
/// every action on it fails with `HardwareUnavailable`, matching how the
/// rest of the process treats hardware loss as a per-action error.
pub fn build_machines(
    registry: &TargetRegistry,
    timings: PressTimings,
) -> HashMap<String, Arc<ActionMachine>> {
    let mut machines = HashMap::new();
    for target in registry.iter() {
        if !target.enabled {
            continue;
        }
        let driver = CdevLineDriver::new(target.gpio_chip.clone(), target.gpio_line);
        match driver.init() {
            Ok(()) => info!(
                "Initialized {} on {}:{}",
                target.name, target.gpio_chip, target.gpio_line
            ),
            Err(e) => warn!(
                "Failed to initialize {} on {}:{}: {}",
                target.name, target.gpio_chip, target.gpio_line, e
            ),
        }
        machines.insert(
            target.id.clone(),
            Arc::new(ActionMachine::new(
                target.clone(),
                Arc::new(driver),
                timings,
            )),
        );
    }
    machines
}
