//! Target registry
//!
//! Static mapping of target identity to reset line, MAC address and display
//! name. Built once from configuration; reconfiguration requires a restart.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::config::AppConfig;
use crate::error::{AppError, Result};

/// Hardware MAC address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddr([u8; 6]);

impl MacAddr {
    /// Parse a MAC address string
    /// Supports formats: "AA:BB:CC:DD:EE:FF" or "AA-BB-CC-DD-EE-FF"
    pub fn parse(mac: &str) -> Result<Self> {
        let mac = mac.trim();
        let sep = if mac.contains(':') {
            ':'
        } else if mac.contains('-') {
            '-'
        } else {
            return Err(AppError::Config(format!(
                "Invalid MAC address format: {}",
                mac
            )));
        };

        let parts: Vec<&str> = mac.split(sep).collect();
        if parts.len() != 6 {
            return Err(AppError::Config(format!(
                "Invalid MAC address: expected 6 parts, got {}",
                parts.len()
            )));
        }

        let mut bytes = [0u8; 6];
        for (i, part) in parts.iter().enumerate() {
            bytes[i] = u8::from_str_radix(part, 16)
                .map_err(|_| AppError::Config(format!("Invalid MAC address byte: {}", part)))?;
        }

        Ok(Self(bytes))
    }

    pub fn from_octets(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl Serialize for MacAddr {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// One managed device with its own reset line
#[derive(Debug, Clone)]
pub struct Target {
    pub id: String,
    pub name: String,
    pub gpio_chip: String,
    pub gpio_line: u32,
    pub mac: MacAddr,
    pub enabled: bool,
}

/// Immutable set of targets, indexed by identity and by MAC
pub struct TargetRegistry {
    targets: Vec<Arc<Target>>,
    by_id: HashMap<String, Arc<Target>>,
    by_mac: HashMap<MacAddr, Arc<Target>>,
}

impl TargetRegistry {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let mut targets = Vec::new();
        let mut by_id = HashMap::new();
        let mut by_mac = HashMap::new();

        for tc in &config.targets {
            let target = Arc::new(Target {
                id: tc.id.clone(),
                name: tc.name.clone(),
                gpio_chip: tc.gpio_chip.clone(),
                gpio_line: tc.gpio_line,
                mac: MacAddr::parse(&tc.mac)?,
                enabled: tc.enabled,
            });
            by_id.insert(target.id.clone(), target.clone());
            if target.enabled {
                // Disabled targets stay visible in status but never match
                // a magic packet
                by_mac.insert(target.mac, target.clone());
            }
            targets.push(target);
        }

        Ok(Self {
            targets,
            by_id,
            by_mac,
        })
    }

    pub fn get(&self, id: &str) -> Option<&Arc<Target>> {
        self.by_id.get(id)
    }

    /// Look up an enabled target by hardware address
    pub fn by_mac(&self, mac: &MacAddr) -> Option<&Arc<Target>> {
        self.by_mac.get(mac)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Target>> {
        self.targets.iter()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}
