//! Health pinger
//!
//! Periodically probes configured hosts and records the last-known
//! reachability for the status page. Probe failures are recorded as
//! status, never raised to callers, and probing never blocks a trigger
//! path.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::PingerConfig;

/// Reachability probe capability. The raw ICMP mechanics live behind this
/// seam; tests substitute a canned prober.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, host: &str, timeout: Duration) -> bool;
}

/// Production prober: one shot of the system `ping` binary, bounded both
/// by ping's own deadline and an outer timeout.
pub struct SystemPing;

#[async_trait]
impl Prober for SystemPing {
    async fn probe(&self, host: &str, timeout: Duration) -> bool {
        let deadline_secs = timeout.as_secs().max(1);
        let command = tokio::process::Command::new("ping")
            .arg("-c")
            .arg("1")
            .arg("-W")
            .arg(deadline_secs.to_string())
            .arg(host)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        match tokio::time::timeout(timeout + Duration::from_secs(1), command).await {
            Ok(Ok(status)) => status.success(),
            Ok(Err(e)) => {
                debug!("ping invocation for {} failed: {}", host, e);
                false
            }
            Err(_) => {
                debug!("ping for {} timed out", host);
                false
            }
        }
    }
}

/// Last probe result for one host
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeStatus {
    pub host: String,
    pub reachable: bool,
    pub checked_at: DateTime<Utc>,
}

/// Periodic reachability prober over the configured host list
pub struct HealthPinger {
    hosts: Vec<String>,
    interval: Duration,
    timeout: Duration,
    prober: Arc<dyn Prober>,
    results: RwLock<HashMap<String, ProbeStatus>>,
}

impl HealthPinger {
    pub fn new(config: &PingerConfig, prober: Arc<dyn Prober>) -> Self {
        Self {
            hosts: config.hosts.clone(),
            interval: Duration::from_secs_f64(config.interval_secs),
            timeout: Duration::from_secs_f64(config.timeout_secs),
            prober,
            results: RwLock::new(HashMap::new()),
        }
    }

    /// Snapshot of the last-known status, sorted by host for stable output
    pub fn snapshot(&self) -> Vec<ProbeStatus> {
        let mut statuses: Vec<ProbeStatus> = self.results.read().values().cloned().collect();
        statuses.sort_by(|a, b| a.host.cmp(&b.host));
        statuses
    }

    /// Probe every host once
    pub async fn sweep(&self) {
        for host in &self.hosts {
            let reachable = self.prober.probe(host, self.timeout).await;
            debug!("Probe {}: {}", host, if reachable { "up" } else { "down" });
            self.results.write().insert(
                host.clone(),
                ProbeStatus {
                    host: host.clone(),
                    reachable,
                    checked_at: Utc::now(),
                },
            );
        }
    }

    /// Probe cycle; runs until the task is dropped
    pub async fn run(self: Arc<Self>) {
        info!(
            "Health pinger running, {} host(s), every {:?}",
            self.hosts.len(),
            self.interval
        );
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.sweep().await;
        }
    }
}
